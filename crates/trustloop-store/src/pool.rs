//! In-memory parameter pool.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;
use trustloop_core::{
    CandidateFilter, GroupId, ParameterPool, PoolError, PoolResult, StrategyGroup,
};

/// Parameter pool holding candidates in memory.
#[derive(Default)]
pub struct MemoryParameterPool {
    groups: RwLock<BTreeMap<GroupId, StrategyGroup>>,
}

impl MemoryParameterPool {
    #[must_use]
    pub fn new(groups: impl IntoIterator<Item = StrategyGroup>) -> Self {
        Self {
            groups: RwLock::new(groups.into_iter().map(|g| (g.id.clone(), g)).collect()),
        }
    }

    pub fn upsert(&self, group: StrategyGroup) {
        self.groups.write().insert(group.id.clone(), group);
    }

    pub fn get(&self, id: &GroupId) -> Option<StrategyGroup> {
        self.groups.read().get(id).cloned()
    }
}

impl ParameterPool for MemoryParameterPool {
    fn load_candidates(&self, filter: &CandidateFilter) -> PoolResult<Vec<StrategyGroup>> {
        let mut candidates: Vec<StrategyGroup> = self
            .groups
            .read()
            .values()
            .filter(|g| filter.matches(g))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        if let Some(top_k) = filter.top_k {
            candidates.truncate(top_k);
        }
        Ok(candidates)
    }

    fn update_group_performance(
        &self,
        group: &GroupId,
        win_rate: Decimal,
        score: Decimal,
    ) -> PoolResult<()> {
        let mut groups = self.groups.write();
        let entry = groups
            .get_mut(group)
            .ok_or_else(|| PoolError::UnknownGroup(group.clone()))?;
        entry.win_rate = win_rate;
        entry.score = score;
        debug!(group = %group, %win_rate, %score, "Group performance updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trustloop_core::GroupStatus;

    fn group(id: &str, score: Decimal, win_rate: Decimal) -> StrategyGroup {
        let mut g = StrategyGroup::new(GroupId::from(id));
        g.score = score;
        g.win_rate = win_rate;
        g
    }

    fn pool() -> MemoryParameterPool {
        let mut retired = group("retired", dec!(99), dec!(0.9));
        retired.status = GroupStatus::Retired;
        MemoryParameterPool::new([
            group("a", dec!(5), dec!(0.6)),
            group("b", dec!(9), dec!(0.4)),
            group("c", dec!(7), dec!(0.55)),
            retired,
        ])
    }

    #[test]
    fn test_load_candidates_sorted_and_filtered() {
        let pool = pool();
        let all = pool.load_candidates(&CandidateFilter::default()).unwrap();
        let ids: Vec<&str> = all.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let filter = CandidateFilter {
            min_win_rate: Some(dec!(0.5)),
            top_k: Some(1),
            ..Default::default()
        };
        let best = pool.load_candidates(&filter).unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].id.as_str(), "c");
    }

    #[test]
    fn test_update_group_performance() {
        let pool = pool();
        pool.update_group_performance(&GroupId::from("a"), dec!(0.7), dec!(1.2))
            .unwrap();
        let a = pool.get(&GroupId::from("a")).unwrap();
        assert_eq!(a.win_rate, dec!(0.7));
        assert_eq!(a.score, dec!(1.2));

        let missing = pool.update_group_performance(&GroupId::from("zz"), dec!(0), dec!(0));
        assert!(matches!(missing, Err(PoolError::UnknownGroup(_))));
    }
}
