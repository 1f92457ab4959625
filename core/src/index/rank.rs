//! Rank stage: scores an existing candidate set by a numeric field. There are no
//! dedicated index entries; candidates are fetched and ordered on the fly, which
//! is why rank can never run first.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::fusion::{CandidateSet, ScoredId, Stage};
use crate::index::IndexQueryContext;
use crate::item::Item;
use crate::query::SortDirection;

pub struct RankStage {
    field: String,
    direction: SortDirection,
}

impl RankStage {
    pub fn ascending(field: impl Into<String>) -> Self { Self { field: field.into(), direction: SortDirection::Asc } }

    pub fn descending(field: impl Into<String>) -> Self { Self { field: field.into(), direction: SortDirection::Desc } }
}

#[async_trait]
impl<T: Item> Stage<T> for RankStage {
    fn requires_candidates(&self) -> bool { true }

    async fn execute(
        &self,
        ctx: &mut IndexQueryContext<'_, T>,
        candidates: Option<&CandidateSet>,
    ) -> Result<Vec<ScoredId>, StoreError> {
        let Some(candidates) = candidates else {
            return Err(StoreError::InvalidPlan("rank stage requires a candidate set".into()));
        };

        // Candidates lacking the field, or holding a non-numeric value, drop out.
        let mut keyed = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(item) = ctx.get_item(id).await? {
                if let Some(value) = item.field(&self.field).and_then(|v| v.as_f64()) {
                    keyed.push((id.clone(), value));
                }
            }
        }

        keyed.sort_by(|(a_id, a), (b_id, b)| {
            let ord = a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal);
            match self.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
            .then_with(|| a_id.cmp(b_id))
        });

        let n = keyed.len();
        Ok(keyed
            .into_iter()
            .enumerate()
            .map(|(i, (id, _))| {
                let score = if n == 1 { 1.0 } else { 1.0 - i as f64 / (n - 1) as f64 };
                ScoredId::new(id, score)
            })
            .collect())
    }
}
