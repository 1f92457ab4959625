//! The pushed-down predicate model. Queries arrive here already lowered — the SQL
//! surface that produces them is an external collaborator.

use std::cmp::Ordering;

use crate::error::StoreError;
use crate::item::FieldMap;
use crate::value::FieldValue;

#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub value: FieldValue,
    pub inclusive: bool,
}

impl Bound {
    pub fn inclusive(value: impl Into<FieldValue>) -> Self { Self { value: value.into(), inclusive: true } }
    pub fn exclusive(value: impl Into<FieldValue>) -> Self { Self { value: value.into(), inclusive: false } }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Eq(FieldValue),
    In(Vec<FieldValue>),
    Range { low: Option<Bound>, high: Option<Bound> },
}

/// One conjunct over a named field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPredicate {
    pub field: String,
    pub cmp: Comparison,
}

impl FieldPredicate {
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self { field: field.into(), cmp: Comparison::Eq(value.into()) }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Self { field: field.into(), cmp: Comparison::In(values) }
    }

    pub fn range(field: impl Into<String>, low: Option<Bound>, high: Option<Bound>) -> Self {
        Self { field: field.into(), cmp: Comparison::Range { low, high } }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::range(field, Some(Bound::exclusive(value)), None)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::range(field, Some(Bound::inclusive(value)), None)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::range(field, None, Some(Bound::exclusive(value)))
    }

    pub fn le(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::range(field, None, Some(Bound::inclusive(value)))
    }

    /// In-process evaluation against a record's field map. Missing and null
    /// fields match nothing except an explicit `Eq(Null)`.
    pub fn matches(&self, fields: &FieldMap) -> Result<bool, StoreError> {
        let value = fields.get(&self.field);
        match &self.cmp {
            Comparison::Eq(expect) => Ok(value.map(|v| v == expect).unwrap_or(expect.is_null())),
            Comparison::In(alternatives) => Ok(value.map(|v| alternatives.contains(v)).unwrap_or(false)),
            Comparison::Range { low, high } => {
                let Some(v) = value.filter(|v| !v.is_null()) else {
                    return Ok(false);
                };
                if let Some(b) = low {
                    match v.compare(&b.value)? {
                        Ordering::Less => return Ok(false),
                        Ordering::Equal if !b.inclusive => return Ok(false),
                        _ => {}
                    }
                }
                if let Some(b) = high {
                    match v.compare(&b.value)? {
                        Ordering::Greater => return Ok(false),
                        Ordering::Equal if !b.inclusive => return Ok(false),
                        _ => {}
                    }
                }
                Ok(true)
            }
        }
    }
}

/// Conjunction of field predicates, optionally disjoined with another filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All(Vec<FieldPredicate>),
    Any(Box<Filter>, Box<Filter>),
}

impl Filter {
    pub fn matches(&self, fields: &FieldMap) -> Result<bool, StoreError> {
        match self {
            Filter::All(preds) => {
                for p in preds {
                    if !p.matches(fields)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Any(a, b) => Ok(a.matches(fields)? || b.matches(fields)?),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub projection: Option<Vec<String>>,
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl Default for Query {
    fn default() -> Self { Self::new() }
}

impl Query {
    pub fn new() -> Self { Self { filter: Filter::All(Vec::new()), projection: None, order_by: None, limit: None } }

    pub fn filter(predicates: Vec<FieldPredicate>) -> Self { Self { filter: Filter::All(predicates), ..Self::new() } }

    pub fn and(mut self, predicate: FieldPredicate) -> Self {
        match &mut self.filter {
            Filter::All(preds) => preds.push(predicate),
            any @ Filter::Any(_, _) => {
                let prior = std::mem::replace(any, Filter::All(Vec::new()));
                *any = Filter::Any(Box::new(prior), Box::new(Filter::All(vec![predicate])));
            }
        }
        self
    }

    pub fn or(self, other: Query) -> Self {
        Self { filter: Filter::Any(Box::new(self.filter), Box::new(other.filter)), ..other }
    }

    pub fn project(mut self, fields: Vec<&str>) -> Self {
        self.projection = Some(fields.into_iter().map(String::from).collect());
        self
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
