use planloom_core::{NodeType, TaskNode, TaskStatus};

/// Pick at most one task to run this tick.
///
/// Candidates are ACTIONs in READY or TO_BE_MODIFY. The total order:
/// TO_BE_MODIFY before READY, higher priority first, fewer attempts first,
/// earlier creation first, and finally the task id — so the same snapshot
/// always yields the same pick.
pub fn pick_next(nodes: &[TaskNode]) -> Option<&TaskNode> {
    nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Action)
        .filter(|n| matches!(n.status, TaskStatus::Ready | TaskStatus::ToBeModify))
        .min_by_key(|n| {
            (
                n.status != TaskStatus::ToBeModify,
                -(n.priority as i64),
                n.attempt_count,
                n.created_at,
                n.task_id,
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use planloom_core::TaskNode;
    use uuid::Uuid;

    fn action(status: TaskStatus, priority: i32, attempts: u32, age_s: i64) -> TaskNode {
        let mut n = TaskNode::new(Uuid::new_v4(), NodeType::Action, "t").with_priority(priority);
        n.status = status;
        n.attempt_count = attempts;
        n.created_at = Utc::now() - Duration::seconds(age_s);
        n
    }

    #[test]
    fn test_to_be_modify_wins_over_ready() {
        let ready = action(TaskStatus::Ready, 100, 0, 1000);
        let rework = action(TaskStatus::ToBeModify, 0, 2, 0);
        let nodes = vec![ready, rework.clone()];
        assert_eq!(pick_next(&nodes).unwrap().task_id, rework.task_id);
    }

    #[test]
    fn test_priority_then_attempts_then_age() {
        let low = action(TaskStatus::Ready, 1, 0, 10);
        let high = action(TaskStatus::Ready, 9, 0, 10);
        let nodes = vec![low.clone(), high.clone()];
        assert_eq!(pick_next(&nodes).unwrap().task_id, high.task_id);

        let fresh = action(TaskStatus::Ready, 5, 0, 10);
        let tried = action(TaskStatus::Ready, 5, 2, 10);
        let nodes = vec![tried, fresh.clone()];
        assert_eq!(pick_next(&nodes).unwrap().task_id, fresh.task_id);

        let old = action(TaskStatus::Ready, 5, 1, 100);
        let new = action(TaskStatus::Ready, 5, 1, 1);
        let nodes = vec![new, old.clone()];
        assert_eq!(pick_next(&nodes).unwrap().task_id, old.task_id);
    }

    #[test]
    fn test_non_candidates_ignored() {
        let mut goal = TaskNode::new(Uuid::new_v4(), NodeType::Goal, "g");
        goal.status = TaskStatus::Ready;
        let blocked = action(TaskStatus::Blocked, 9, 0, 0);
        let done = action(TaskStatus::Done, 9, 0, 0);
        let nodes = vec![goal, blocked, done];
        assert!(pick_next(&nodes).is_none());
    }

    #[test]
    fn test_same_snapshot_same_pick() {
        let nodes: Vec<TaskNode> = (0..5)
            .map(|i| action(TaskStatus::Ready, i % 3, (i % 2) as u32, i as i64))
            .collect();
        let first = pick_next(&nodes).unwrap().task_id;
        for _ in 0..10 {
            assert_eq!(pick_next(&nodes).unwrap().task_id, first);
        }
    }
}
