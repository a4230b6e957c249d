//! Termination selector: picks which idle instances to retire.

use serde::{Deserialize, Serialize};

use spotgrid_core::{InstanceId, InstanceMap, JoinKey};

/// Instances chosen for termination this cycle.
///
/// `instance_ids[i]` and `join_keys[i]` describe the same instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationPlan {
    pub instance_ids: Vec<InstanceId>,
    pub join_keys: Vec<JoinKey>,
}

impl TerminationPlan {
    pub fn len(&self) -> usize {
        self.instance_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_ids.is_empty()
    }
}

/// Take the first `count` idle instances in join-key order.
///
/// Returns fewer than `count` only when there are fewer idle instances.
pub fn select_for_termination(instances: &InstanceMap, count: usize) -> TerminationPlan {
    let mut plan = TerminationPlan::default();
    for record in instances.idle().take(count) {
        plan.instance_ids.push(record.instance_id.clone());
        plan.join_keys.push(record.join_key.clone());
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str, bool)]) -> InstanceMap {
        let mut map = InstanceMap::new();
        for (key, id, busy) in entries {
            map.insert(key, id);
            if *busy {
                map.mark_busy(key);
            }
        }
        map
    }

    #[test]
    fn selects_only_idle_instances() {
        let instances = map(&[
            ("ip-a.internal", "i-a", true),
            ("ip-b.internal", "i-b", false),
            ("ip-c.internal", "i-c", false),
        ]);
        let plan = select_for_termination(&instances, 5);
        assert_eq!(plan.instance_ids, vec!["i-b", "i-c"]);
        assert_eq!(plan.join_keys, vec!["ip-b.internal", "ip-c.internal"]);
    }

    #[test]
    fn respects_count() {
        let instances = map(&[
            ("ip-a.internal", "i-a", false),
            ("ip-b.internal", "i-b", false),
            ("ip-c.internal", "i-c", false),
        ]);
        let plan = select_for_termination(&instances, 2);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan, select_for_termination(&instances, 2));
    }

    #[test]
    fn zero_count_is_empty() {
        let instances = map(&[("ip-a.internal", "i-a", false)]);
        assert!(select_for_termination(&instances, 0).is_empty());
    }
}
