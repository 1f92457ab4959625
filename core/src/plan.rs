//! Query planner. A pure function of the query, the entity's index descriptors,
//! and cardinality hints — it does no I/O and touches no index state.

use crate::query::{Comparison, FieldPredicate, Filter, Query, SortDirection};
use crate::schema::{EntityDescriptor, IndexKind};
use crate::value::FieldValue;

pub const SELECTIVITY_EQ: f64 = 0.01;
pub const SELECTIVITY_RANGE: f64 = 0.33;
pub const SELECTIVITY_UNKNOWN: f64 = 1.0;

/// Tunable cost constants.
#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    /// Per row visited by a table scan.
    pub row_cost: f64,
    /// Per index entry visited.
    pub index_row_cost: f64,
    /// One point lookup (full-equality seek).
    pub lookup_cost: f64,
    /// Per residual predicate applied to one matched row.
    pub residual_row_cost: f64,
    /// Per plan combined under a union/intersection.
    pub merge_cost: f64,
}

impl Default for CostModel {
    fn default() -> Self { Self { row_cost: 1.0, index_row_cost: 0.25, lookup_cost: 1.0, residual_row_cost: 0.05, merge_cost: 2.0 } }
}

#[derive(Debug, Clone, Copy)]
pub struct CardinalityHints {
    pub estimated_rows: u64,
}

impl Default for CardinalityHints {
    fn default() -> Self { Self { estimated_rows: 1_000 } }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    /// Fallback: scan every record and post-filter.
    TableScan { residual: Vec<FieldPredicate> },
    /// Left-prefix scan of one index.
    IndexScan { index: String, satisfied: Vec<FieldPredicate>, residual: Vec<FieldPredicate>, sort_required: bool },
    /// Every leading field bound by equality.
    IndexSeek { index: String, key: Vec<FieldValue>, residual: Vec<FieldPredicate> },
    /// Every projected field appears in the index key; no record fetch needed.
    IndexOnlyScan { index: String, satisfied: Vec<FieldPredicate>, residual: Vec<FieldPredicate> },
    Union { left: Box<PlanNode>, right: Box<PlanNode> },
    Intersection { left: Box<PlanNode>, right: Box<PlanNode>, residual: Vec<FieldPredicate> },
}

impl PlanNode {
    /// Tie-break preference: IndexOnlyScan > IndexSeek > IndexScan > TableScan.
    fn preference(&self) -> u8 {
        match self {
            PlanNode::IndexOnlyScan { .. } => 4,
            PlanNode::IndexSeek { .. } => 3,
            PlanNode::IndexScan { .. } => 2,
            PlanNode::TableScan { .. } => 1,
            PlanNode::Union { .. } | PlanNode::Intersection { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub node: PlanNode,
    pub cost: f64,
}

/// Result of matching a conjunct list against one index's leading fields.
struct PrefixMatch {
    satisfied: Vec<FieldPredicate>,
    residual: Vec<FieldPredicate>,
    all_equality: bool,
    selectivity: f64,
}

/// Left-prefix rule: equalities on `fields[0..j]`, optionally one range/IN on
/// `fields[j]`. Returns `None` when no leading field is bound.
fn match_left_prefix(predicates: &[FieldPredicate], index_fields: &[String]) -> Option<PrefixMatch> {
    let mut remaining: Vec<FieldPredicate> = predicates.to_vec();
    let mut satisfied = Vec::new();
    let mut selectivity = 1.0;
    let mut all_equality = true;

    for field in index_fields {
        let eq = remaining.iter().position(|p| &p.field == field && matches!(p.cmp, Comparison::Eq(_)));
        if let Some(i) = eq {
            satisfied.push(remaining.remove(i));
            selectivity *= SELECTIVITY_EQ;
            continue;
        }
        // One trailing range or IN is allowed, then the prefix ends.
        let trailing = remaining.iter().position(|p| &p.field == field);
        if let Some(i) = trailing {
            let pred = remaining.remove(i);
            selectivity *= match &pred.cmp {
                Comparison::In(alternatives) => (SELECTIVITY_EQ * alternatives.len() as f64).min(1.0),
                Comparison::Range { .. } => SELECTIVITY_RANGE,
                Comparison::Eq(_) => SELECTIVITY_EQ,
            };
            satisfied.push(pred);
            all_equality = false;
        }
        break;
    }

    if satisfied.is_empty() {
        return None;
    }
    let all_equality = all_equality && satisfied.len() == index_fields.len();
    Some(PrefixMatch { satisfied, residual: remaining, all_equality, selectivity })
}

/// Choose the lowest-cost plan for `query` against `entity`'s indexes.
pub fn plan(query: &Query, entity: &EntityDescriptor, hints: &CardinalityHints, cost: &CostModel) -> Plan {
    plan_filter(&query.filter, query, entity, hints, cost)
}

fn plan_filter(filter: &Filter, query: &Query, entity: &EntityDescriptor, hints: &CardinalityHints, cost: &CostModel) -> Plan {
    match filter {
        Filter::All(predicates) => plan_conjunction(predicates, query, entity, hints, cost),
        Filter::Any(a, b) => {
            let left = plan_filter(a, query, entity, hints, cost);
            let right = plan_filter(b, query, entity, hints, cost);
            let combined = left.cost + right.cost + cost.merge_cost;
            Plan { node: PlanNode::Union { left: Box::new(left.node), right: Box::new(right.node) }, cost: combined }
        }
    }
}

fn plan_conjunction(
    predicates: &[FieldPredicate],
    query: &Query,
    entity: &EntityDescriptor,
    hints: &CardinalityHints,
    cost: &CostModel,
) -> Plan {
    let rows = hints.estimated_rows as f64;
    let mut candidates = vec![Plan {
        node: PlanNode::TableScan { residual: predicates.to_vec() },
        cost: rows * cost.row_cost + rows * predicates.len() as f64 * cost.residual_row_cost,
    }];

    let mut matches: Vec<(String, PrefixMatch)> = Vec::new();
    for index in entity.indexes.iter().filter(|i| matches!(i.kind, IndexKind::Scalar)) {
        if let Some(m) = match_left_prefix(predicates, &index.fields) {
            candidates.push(index_plan(index.name.clone(), &index.fields, &m, query, rows, cost));
            matches.push((index.name.clone(), m));
        }
    }

    // AND over disjoint field sets: a second index covering part of the first
    // plan's residual can intersect with it.
    if let Some(intersection) = best_intersection(&matches, rows, cost) {
        candidates.push(intersection);
    }

    candidates
        .into_iter()
        .min_by(|a, b| {
            a.cost
                .partial_cmp(&b.cost)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.node.preference().cmp(&a.node.preference()))
        })
        .expect("candidates always includes a table scan")
}

fn index_plan(name: String, index_fields: &[String], m: &PrefixMatch, query: &Query, rows: f64, cost: &CostModel) -> Plan {
    let matched = rows * m.selectivity;
    let residual_cost = matched * m.residual.len() as f64 * cost.residual_row_cost;

    if m.all_equality {
        let key = m
            .satisfied
            .iter()
            .map(|p| match &p.cmp {
                Comparison::Eq(v) => v.clone(),
                _ => unreachable!("all_equality prefix"),
            })
            .collect();
        return Plan {
            node: PlanNode::IndexSeek { index: name, key, residual: m.residual.clone() },
            cost: cost.lookup_cost + m.residual.len() as f64 * cost.residual_row_cost,
        };
    }

    let covered = |fields: &Option<Vec<String>>| {
        fields.as_ref().is_some_and(|proj| proj.iter().all(|f| index_fields.contains(f)))
            && m.residual.iter().all(|p| index_fields.contains(&p.field))
    };

    let scan_cost = matched * cost.index_row_cost + residual_cost;
    if covered(&query.projection) {
        Plan {
            node: PlanNode::IndexOnlyScan { index: name, satisfied: m.satisfied.clone(), residual: m.residual.clone() },
            cost: scan_cost,
        }
    } else {
        let sort_required = match &query.order_by {
            None => false,
            Some((field, SortDirection::Asc)) => !order_satisfied(field, m, index_fields),
            // Entries are stored ascending only; descending output always re-sorts.
            Some((_, SortDirection::Desc)) => true,
        };
        Plan {
            node: PlanNode::IndexScan { index: name, satisfied: m.satisfied.clone(), residual: m.residual.clone(), sort_required },
            cost: scan_cost + matched * cost.lookup_cost,
        }
    }
}

/// An ascending ORDER BY is satisfied when the field is equality-bound (constant)
/// or is the first index field after the equality prefix.
fn order_satisfied(field: &str, m: &PrefixMatch, index_fields: &[String]) -> bool {
    let eq_len = m.satisfied.iter().take_while(|p| matches!(p.cmp, Comparison::Eq(_))).count();
    m.satisfied[..eq_len].iter().any(|p| p.field == field) || index_fields.get(eq_len).is_some_and(|f| f.as_str() == field)
}

fn best_intersection(matches: &[(String, PrefixMatch)], rows: f64, cost: &CostModel) -> Option<Plan> {
    let mut best: Option<Plan> = None;
    for (i, (name_a, a)) in matches.iter().enumerate() {
        for (name_b, b) in matches.iter().skip(i + 1) {
            let disjoint = a.satisfied.iter().all(|p| !b.satisfied.iter().any(|q| q.field == p.field));
            if !disjoint {
                continue;
            }
            // Residual: predicates neither side satisfied.
            let residual: Vec<FieldPredicate> =
                a.residual.iter().filter(|p| b.residual.contains(p)).cloned().collect();
            let matched = rows * a.selectivity * b.selectivity;
            let total = rows * a.selectivity * cost.index_row_cost
                + rows * b.selectivity * cost.index_row_cost
                + cost.merge_cost
                + matched * cost.lookup_cost
                + matched * residual.len() as f64 * cost.residual_row_cost;
            let node = PlanNode::Intersection {
                left: Box::new(PlanNode::IndexScan {
                    index: name_a.clone(),
                    satisfied: a.satisfied.clone(),
                    residual: Vec::new(),
                    sort_required: false,
                }),
                right: Box::new(PlanNode::IndexScan {
                    index: name_b.clone(),
                    satisfied: b.satisfied.clone(),
                    residual: Vec::new(),
                    sort_required: false,
                }),
                residual,
            };
            if best.as_ref().map(|p| total < p.cost).unwrap_or(true) {
                best = Some(Plan { node, cost: total });
            }
        }
    }
    best
}
