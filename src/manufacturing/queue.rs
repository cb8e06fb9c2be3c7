use crate::models::{MfgTask, TaskType};
use chrono::{DateTime, Utc};
use log::*;

/// Priority gained per minute a task has been waiting, and its cap.
/// Aging keeps low-priority collections from starving behind a steady
/// stream of deliveries.
pub const AGING_RATE_PER_MINUTE: f64 = 0.5;
pub const MAX_AGING_BONUS: f64 = 50.0;

/// Minimum worker counts per kind before the other kind may take ships.
pub const MIN_COLLECT_SELL_WORKERS: usize = 1;
pub const MIN_ACQUIRE_DELIVER_WORKERS: usize = 1;

#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: i64,
    pub task_type: TaskType,
    pub base_priority: i64,
    pub created_at: DateTime<Utc>,
    pub age_reference: DateTime<Utc>,
}

impl QueuedTask {
    pub fn from_task(task: &MfgTask) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type,
            base_priority: task.priority,
            created_at: task.created_at,
            age_reference: task.age_reference(),
        }
    }
}

/// `base + min(age_minutes x rate, cap)`; ages from the READY timestamp
/// when there is one, creation otherwise.
pub fn effective_priority(entry: &QueuedTask, now: DateTime<Utc>) -> f64 {
    let age_minutes = (now - entry.age_reference).num_seconds().max(0) as f64 / 60.0;
    let bonus = (age_minutes * AGING_RATE_PER_MINUTE).min(MAX_AGING_BONUS);
    entry.base_priority as f64 + bonus
}

/// Current worker counts and ready-work flags per reserved kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerAllocation {
    pub collect_sell: usize,
    pub acquire_deliver: usize,
    pub collect_sell_has_ready: bool,
    pub acquire_deliver_has_ready: bool,
}

/// Worker-type reservation: an assignment of one kind is denied while the
/// other kind is under its minimum with ready work waiting, EXCEPT when
/// both are under minimum with ready work (otherwise nothing could ever
/// start). Liquidations and construction runs bypass the policy.
pub fn should_assign(task_type: TaskType, alloc: &WorkerAllocation) -> bool {
    let cs_starved =
        alloc.collect_sell < MIN_COLLECT_SELL_WORKERS && alloc.collect_sell_has_ready;
    let ad_starved =
        alloc.acquire_deliver < MIN_ACQUIRE_DELIVER_WORKERS && alloc.acquire_deliver_has_ready;
    match task_type {
        TaskType::Liquidate | TaskType::DeliverToConstruction => true,
        TaskType::CollectSell => !ad_starved || cs_starved,
        TaskType::AcquireDeliver | TaskType::StorageAcquireDeliver => !cs_starved || ad_starved,
    }
}

/// In-memory priority queue over READY tasks. Strict total order:
/// effective priority desc, then created_at asc, then id asc. Contents are
/// rebuilt from the task table at startup; the DB stays authoritative.
#[derive(Debug, Default)]
pub struct TaskQueue {
    entries: Vec<QueuedTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, task_id: i64) -> bool {
        self.entries.iter().any(|e| e.task_id == task_id)
    }

    pub fn push(&mut self, task: &MfgTask) {
        if self.contains(task.id) {
            return;
        }
        debug!(
            "queue: push task {} ({}, prio {})",
            task.id, task.task_type, task.priority
        );
        self.entries.push(QueuedTask::from_task(task));
    }

    pub fn remove(&mut self, task_id: i64) {
        self.entries.retain(|e| e.task_id != task_id);
    }

    fn sorted(&self, now: DateTime<Utc>) -> Vec<QueuedTask> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| {
            effective_priority(b, now)
                .partial_cmp(&effective_priority(a, now))
                .unwrap()
                .then(a.created_at.cmp(&b.created_at))
                .then(a.task_id.cmp(&b.task_id))
        });
        entries
    }

    /// Highest-priority entry the reservation policy allows right now.
    /// Removes and returns it.
    pub fn pop_next(&mut self, now: DateTime<Utc>, alloc: &WorkerAllocation) -> Option<QueuedTask> {
        let next = self
            .sorted(now)
            .into_iter()
            .find(|entry| should_assign(entry.task_type, alloc))?;
        self.remove(next.task_id);
        Some(next)
    }

    /// Ready-work flags computed from the queue itself.
    pub fn ready_flags(&self) -> (bool, bool) {
        let collect_sell = self
            .entries
            .iter()
            .any(|e| e.task_type == TaskType::CollectSell);
        let acquire = self.entries.iter().any(|e| e.task_type.is_acquire_kind());
        (collect_sell, acquire)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{TaskResults, TaskStatus};

    fn task(id: i64, task_type: TaskType, age_minutes: i64) -> MfgTask {
        let created = Utc::now() - chrono::Duration::minutes(age_minutes);
        MfgTask {
            id,
            pipeline_id: 1,
            task_type,
            good: "ALUMINUM".to_string(),
            desired_qty: 40,
            source_market: None,
            target_market: None,
            factory_symbol: None,
            storage_op_id: None,
            depends_on: vec![],
            status: TaskStatus::Ready,
            assigned_ship: None,
            priority: task_type.base_priority(),
            retry_count: 0,
            max_retries: 3,
            results: TaskResults::default(),
            created_at: created,
            ready_at: Some(created),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_aging_bonus_is_bounded() {
        let now = Utc::now();
        for age in [0, 1, 60, 100, 10_000] {
            let task = task(1, TaskType::CollectSell, age);
            let entry = QueuedTask::from_task(&task);
            let effective = effective_priority(&entry, now);
            let bonus = effective - task.priority as f64;
            assert!(bonus >= 0.0);
            assert!(bonus <= MAX_AGING_BONUS + 1e-9, "bonus {} at age {}", bonus, age);
        }
    }

    #[test]
    fn test_aged_collection_overtakes_fresh_delivery() {
        let now = Utc::now();
        let mut queue = TaskQueue::new();
        // base 50 + capped bonus 50 = 100; ties broken by older created_at
        queue.push(&task(1, TaskType::CollectSell, 200));
        queue.push(&task(2, TaskType::AcquireDeliver, 0));
        let alloc = WorkerAllocation {
            collect_sell: 1,
            acquire_deliver: 1,
            ..Default::default()
        };
        let next = queue.pop_next(now, &alloc).unwrap();
        assert_eq!(next.task_id, 1);
    }

    #[test]
    fn test_liquidate_outranks_everything() {
        let now = Utc::now();
        let mut queue = TaskQueue::new();
        queue.push(&task(1, TaskType::AcquireDeliver, 500));
        queue.push(&task(2, TaskType::Liquidate, 0));
        let alloc = WorkerAllocation::default();
        assert_eq!(queue.pop_next(now, &alloc).unwrap().task_id, 2);
    }

    #[test]
    fn test_reservation_blocks_the_other_kind() {
        // acquire-deliver is starved: collect-sell assignments are denied
        let alloc = WorkerAllocation {
            collect_sell: 2,
            acquire_deliver: 0,
            collect_sell_has_ready: true,
            acquire_deliver_has_ready: true,
        };
        assert!(!should_assign(TaskType::CollectSell, &alloc));
        assert!(should_assign(TaskType::AcquireDeliver, &alloc));
        assert!(should_assign(TaskType::StorageAcquireDeliver, &alloc));
        assert!(should_assign(TaskType::Liquidate, &alloc));
    }

    #[test]
    fn test_startup_deadlock_break() {
        // nothing running, both kinds have ready work: either may start
        let alloc = WorkerAllocation {
            collect_sell: 0,
            acquire_deliver: 0,
            collect_sell_has_ready: true,
            acquire_deliver_has_ready: true,
        };
        assert!(should_assign(TaskType::CollectSell, &alloc));
        assert!(should_assign(TaskType::AcquireDeliver, &alloc));
    }

    #[test]
    fn test_reservation_reaches_both_minimums() {
        // simulate assigning from a mixed queue: both kinds eventually run
        let now = Utc::now();
        let mut queue = TaskQueue::new();
        for i in 0..4 {
            queue.push(&task(i, TaskType::AcquireDeliver, 0));
        }
        queue.push(&task(10, TaskType::CollectSell, 0));

        let mut alloc = WorkerAllocation::default();
        let mut started_cs = 0;
        let mut started_ad = 0;
        while !queue.is_empty() {
            let (cs_ready, ad_ready) = queue.ready_flags();
            alloc.collect_sell_has_ready = cs_ready;
            alloc.acquire_deliver_has_ready = ad_ready;
            let entry = match queue.pop_next(now, &alloc) {
                Some(entry) => entry,
                None => break,
            };
            match entry.task_type {
                TaskType::CollectSell => {
                    started_cs += 1;
                    alloc.collect_sell += 1;
                }
                _ => {
                    started_ad += 1;
                    alloc.acquire_deliver += 1;
                }
            }
        }
        assert!(started_cs >= MIN_COLLECT_SELL_WORKERS);
        assert!(started_ad >= MIN_ACQUIRE_DELIVER_WORKERS);
    }
}
