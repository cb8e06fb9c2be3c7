use crate::error::{Error, Result};
use crate::models::WaypointSymbol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_TASK_RETRIES: i32 = 3;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    AcquireDeliver,
    CollectSell,
    StorageAcquireDeliver,
    Liquidate,
    DeliverToConstruction,
}

impl TaskType {
    /// Base scheduling priority. Liquidation dwarfs everything (stranded
    /// cargo blocks a ship), deliveries beat collections.
    pub fn base_priority(&self) -> i64 {
        match self {
            TaskType::Liquidate => 1000,
            TaskType::DeliverToConstruction => 150,
            TaskType::AcquireDeliver => 100,
            TaskType::StorageAcquireDeliver => 100,
            TaskType::CollectSell => 50,
        }
    }

    pub fn is_acquire_kind(&self) -> bool {
        matches!(
            self,
            TaskType::AcquireDeliver | TaskType::StorageAcquireDeliver
        )
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Ready,
    Assigned,
    Executing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                // market conditions regressed; the rescuer parks the task again
                | (Ready, Pending)
                | (Ready, Assigned)
                | (Assigned, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
                // retry path, guarded by retry_count in MfgTask::transition
                | (Failed, Pending)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResults {
    pub actual_qty: i64,
    pub total_cost: i64,
    pub total_revenue: i64,
    pub error_msg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfgTask {
    pub id: i64,
    pub pipeline_id: i64,
    pub task_type: TaskType,
    pub good: String,
    pub desired_qty: i64,
    pub source_market: Option<WaypointSymbol>,
    pub target_market: Option<WaypointSymbol>,
    pub factory_symbol: Option<WaypointSymbol>,
    pub storage_op_id: Option<String>,
    pub depends_on: Vec<i64>,
    pub status: TaskStatus,
    pub assigned_ship: Option<String>,
    pub priority: i64,
    pub retry_count: i32,
    pub max_retries: i32,
    pub results: TaskResults,
    pub created_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MfgTask {
    /// Apply a status transition, stamping the matching timestamp.
    /// Terminal states are absorbing: COMPLETED never leaves, FAILED only
    /// returns to PENDING while the retry budget lasts.
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Precondition(format!(
                "task {}: illegal transition {} -> {}",
                self.id, self.status, next
            )));
        }
        if self.status == TaskStatus::Failed
            && next == TaskStatus::Pending
            && self.retry_count >= self.max_retries
        {
            return Err(Error::Precondition(format!(
                "task {}: retries exhausted ({})",
                self.id, self.retry_count
            )));
        }
        let now = Utc::now();
        match next {
            TaskStatus::Ready => self.ready_at = Some(now),
            TaskStatus::Executing => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed => self.completed_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// Restore a failed task to PENDING for another attempt. Clears the
    /// error and phase timestamps, keeps retry_count (already incremented
    /// when the failure was recorded).
    pub fn reset_for_retry(&mut self) -> Result<()> {
        self.transition(TaskStatus::Pending)?;
        self.results.error_msg = None;
        self.started_at = None;
        self.completed_at = None;
        self.assigned_ship = None;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        match self.status {
            TaskStatus::Completed => true,
            TaskStatus::Failed => self.retry_count >= self.max_retries,
            _ => false,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed
            && self.retry_count < self.max_retries
            && self.task_type != TaskType::Liquidate
    }

    /// Aging reference point: when the task became READY, else creation.
    pub fn age_reference(&self) -> DateTime<Utc> {
        self.ready_at.unwrap_or(self.created_at)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    pub fn test_task(task_type: TaskType) -> MfgTask {
        MfgTask {
            id: 1,
            pipeline_id: 1,
            task_type,
            good: "ALUMINUM".to_string(),
            desired_qty: 100,
            source_market: Some(WaypointSymbol::new("X1-S1-A2")),
            target_market: None,
            factory_symbol: Some(WaypointSymbol::new("X1-S1-F1")),
            storage_op_id: None,
            depends_on: vec![],
            status: TaskStatus::Pending,
            assigned_ship: None,
            priority: task_type.base_priority(),
            retry_count: 0,
            max_retries: MAX_TASK_RETRIES,
            results: TaskResults::default(),
            created_at: Utc::now(),
            ready_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_legal_lifecycle() {
        let mut task = test_task(TaskType::AcquireDeliver);
        task.transition(TaskStatus::Ready).unwrap();
        task.transition(TaskStatus::Assigned).unwrap();
        task.transition(TaskStatus::Executing).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
        assert!(task.is_terminal());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut task = test_task(TaskType::AcquireDeliver);
        assert!(task.transition(TaskStatus::Executing).is_err());
        assert!(task.transition(TaskStatus::Completed).is_err());
        task.transition(TaskStatus::Ready).unwrap();
        assert!(task.transition(TaskStatus::Completed).is_err());
    }

    #[test]
    fn test_completed_is_absorbing() {
        let mut task = test_task(TaskType::CollectSell);
        task.transition(TaskStatus::Ready).unwrap();
        task.transition(TaskStatus::Assigned).unwrap();
        task.transition(TaskStatus::Executing).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
        for next in [
            TaskStatus::Pending,
            TaskStatus::Ready,
            TaskStatus::Assigned,
            TaskStatus::Executing,
            TaskStatus::Failed,
        ] {
            assert!(task.transition(next).is_err());
        }
    }

    #[test]
    fn test_retry_budget() {
        let mut task = test_task(TaskType::AcquireDeliver);
        task.transition(TaskStatus::Ready).unwrap();
        task.transition(TaskStatus::Assigned).unwrap();
        task.transition(TaskStatus::Executing).unwrap();
        task.transition(TaskStatus::Failed).unwrap();
        task.retry_count = 1;
        task.reset_for_retry().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);

        // exhausted budget: FAILED becomes absorbing
        let mut task = test_task(TaskType::AcquireDeliver);
        task.transition(TaskStatus::Ready).unwrap();
        task.transition(TaskStatus::Assigned).unwrap();
        task.transition(TaskStatus::Executing).unwrap();
        task.transition(TaskStatus::Failed).unwrap();
        task.retry_count = MAX_TASK_RETRIES;
        assert!(task.reset_for_retry().is_err());
        assert!(task.is_terminal());
    }

    #[test]
    fn test_random_event_sequences_stay_legal() {
        use rand::Rng as _;
        let all = [
            TaskStatus::Pending,
            TaskStatus::Ready,
            TaskStatus::Assigned,
            TaskStatus::Executing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ];
        let mut rng = rand::rng();
        for _ in 0..200 {
            let mut task = test_task(TaskType::AcquireDeliver);
            for _ in 0..20 {
                let next = all[rng.random_range(0..all.len())];
                let before = task.status;
                match task.transition(next) {
                    Ok(()) => assert!(before.can_transition_to(next)),
                    Err(_) => assert_eq!(task.status, before),
                }
            }
        }
    }
}
