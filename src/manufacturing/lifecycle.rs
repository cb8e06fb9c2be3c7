use crate::api_client::ApiClient;
use crate::container_manager::{CompletionSender, CompletionSignal, ContainerManager};
use crate::database::DbClient;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::manufacturing::factory_state::FactoryStateManager;
use crate::manufacturing::queue::TaskQueue;
use crate::models::{
    ContainerRecord, ContainerType, MfgTask, PipelineStatus, Ship, TaskStatus, TaskType,
};
use crate::registry::ShipAssignmentRegistry;
use crate::ship_controller::ShipController;
use crate::storage::StorageCoordinator;
use crate::universe::Universe;
use crate::workers::task_worker::{self, TaskWorkerDeps};
use dashmap::DashMap;
use log::*;
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Binds tasks to ships to worker containers, with a rollback for every
/// step, and unwinds the binding on completion. The database rows are the
/// authority; the in-memory map only routes completion signals.
pub struct WorkerLifecycle {
    player_id: String,
    db: DbClient,
    api_client: ApiClient,
    universe: Universe,
    ledger: Arc<Ledger>,
    registry: ShipAssignmentRegistry,
    containers: ContainerManager,
    storage: Arc<StorageCoordinator>,
    active: DashMap<String, ActiveWorker>,
}

#[derive(Debug, Clone)]
struct ActiveWorker {
    task_id: i64,
    container_id: String,
    task_type: TaskType,
}

impl WorkerLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        player_id: &str,
        db: &DbClient,
        api_client: &ApiClient,
        universe: &Universe,
        ledger: &Arc<Ledger>,
        registry: &ShipAssignmentRegistry,
        containers: &ContainerManager,
        storage: &Arc<StorageCoordinator>,
    ) -> Self {
        Self {
            player_id: player_id.to_string(),
            db: db.clone(),
            api_client: api_client.clone(),
            universe: universe.clone(),
            ledger: ledger.clone(),
            registry: registry.clone(),
            containers: containers.clone(),
            storage: storage.clone(),
            active: DashMap::new(),
        }
    }

    /// (collect-sell, acquire-deliver) worker counts for the reservation
    /// policy.
    pub fn allocation_counts(&self) -> (usize, usize) {
        let mut collect_sell = 0;
        let mut acquire_deliver = 0;
        for entry in self.active.iter() {
            match entry.value().task_type {
                TaskType::CollectSell => collect_sell += 1,
                t if t.is_acquire_kind() => acquire_deliver += 1,
                _ => {}
            }
        }
        (collect_sell, acquire_deliver)
    }

    /// The four-step atomic assignment. A failure at any step unwinds the
    /// earlier ones in reverse, leaving the task claimable again.
    pub async fn assign_task_to_ship(
        &self,
        task: &MfgTask,
        ship: Arc<Mutex<Ship>>,
        coordinator_id: &str,
        completion: &CompletionSender,
    ) -> Result<()> {
        let ship_symbol = { ship.lock().unwrap().symbol.clone() };

        // 1. claim the task row (fails if another scheduler got there first)
        if !self.db.claim_task(task.id, &ship_symbol).await {
            return Err(Error::TaskClaimRejected(task.id));
        }

        // 2. persist the worker container
        let record = ContainerRecord::new(
            ContainerType::MfgTaskWorker,
            Some(coordinator_id),
            &self.player_id,
            json!({ "task_id": task.id, "ship": ship_symbol }),
        );
        self.containers.persist(&record).await;

        // 3. exclusive ship claim
        if let Err(e) = self.registry.assign(&ship_symbol, &record.id).await {
            self.containers.remove(&record.id).await;
            self.rollback_task_claim(task.id).await;
            return Err(e);
        }

        // 4. start the worker
        let task = self
            .db
            .get_task(task.id)
            .await
            .expect("claimed task vanished");
        let task_id = task.id;
        let task_type = task.task_type;
        let api_client = self.api_client.clone();
        let universe = self.universe.clone();
        let ledger = self.ledger.clone();
        let storage = self.storage.clone();
        let db = self.db.clone();
        let container_id = record.id.clone();
        self.containers
            .start(
                &record.id,
                Some(ship_symbol.clone()),
                Some(completion.clone()),
                move |token| async move {
                    let controller = ShipController::new(
                        &api_client,
                        &universe,
                        &ledger,
                        ship,
                        &container_id,
                        token,
                    );
                    run_and_record(db, controller, task, storage).await
                },
            )
            .await;

        self.active.insert(
            ship_symbol.clone(),
            ActiveWorker {
                task_id,
                container_id: record.id.clone(),
                task_type,
            },
        );
        info!(
            "Assigned task {} to {} (container {})",
            task_id, ship_symbol, record.id
        );
        Ok(())
    }

    async fn rollback_task_claim(&self, task_id: i64) {
        if let Some(mut task) = self.db.get_task(task_id).await {
            // undo of the claim, not a forward transition: restore the
            // exact pre-claim state
            task.status = TaskStatus::Ready;
            task.assigned_ship = None;
            self.db.update_task(&task).await;
        }
    }

    /// Worker finished (or died). The task row decides what happened;
    /// resources are freed either way.
    pub async fn on_worker_complete(
        &self,
        signal: &CompletionSignal,
        factory_manager: &FactoryStateManager,
        queue: &Arc<Mutex<TaskQueue>>,
    ) -> Result<()> {
        let ship_symbol = match &signal.ship_symbol {
            Some(ship_symbol) => ship_symbol.clone(),
            None => return Ok(()),
        };
        let (task_id, container_id) = match self.active.remove(&ship_symbol) {
            Some((_, entry)) => (entry.task_id, entry.container_id),
            None => {
                // not in memory (restart); the DB still knows
                let task = self.db.find_latest_task_by_ship(&ship_symbol).await;
                match task {
                    Some(task) => (task.id, signal.container_id.clone()),
                    None => {
                        warn!("Completion for unknown worker ship {}", ship_symbol);
                        return Ok(());
                    }
                }
            }
        };

        self.registry.release(&ship_symbol, "task worker complete").await;
        self.containers.remove(&container_id).await;

        let task = match self.db.get_task(task_id).await {
            Some(task) => task,
            None => return Ok(()),
        };
        match task.status {
            TaskStatus::Completed => {
                info!(
                    "Task {} completed by {}: {} x{}, cost ${}, revenue ${}",
                    task.id,
                    ship_symbol,
                    task.good,
                    task.results.actual_qty,
                    task.results.total_cost,
                    task.results.total_revenue
                );
                self.record_pipeline_progress(&task, factory_manager, queue)
                    .await?;
            }
            TaskStatus::Failed => {
                warn!(
                    "Task {} failed on {} (retry {}/{}): {}",
                    task.id,
                    ship_symbol,
                    task.retry_count,
                    task.max_retries,
                    task.results
                        .error_msg
                        .as_deref()
                        .unwrap_or("unknown error")
                );
                self.handle_failure(task).await?;
            }
            other => {
                // cancelled mid-phase; startup reconciliation resets it
                debug!("Worker for task {} ended while {}", task.id, other);
            }
        }
        Ok(())
    }

    async fn record_pipeline_progress(
        &self,
        task: &MfgTask,
        factory_manager: &FactoryStateManager,
        queue: &Arc<Mutex<TaskQueue>>,
    ) -> Result<()> {
        if let Some(mut pipeline) = self.db.get_pipeline(task.pipeline_id).await {
            pipeline.total_cost += task.results.total_cost;
            pipeline.total_revenue += task.results.total_revenue;
            pipeline.updated_at = chrono::Utc::now();
            self.db.update_pipeline(&pipeline).await;
        }

        let promoted = if task.task_type.is_acquire_kind() {
            factory_manager.record_delivery(task).await?
        } else {
            factory_manager
                .promote_ready_dependents(task.pipeline_id)
                .await?
        };
        for task_id in promoted {
            if let Some(promoted_task) = self.db.get_task(task_id).await {
                queue.lock().unwrap().push(&promoted_task);
            }
        }

        self.check_pipeline_completion(task.pipeline_id).await
    }

    async fn check_pipeline_completion(&self, pipeline_id: i64) -> Result<()> {
        let tasks = self.db.find_tasks_by_pipeline(pipeline_id).await;
        if tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            if let Some(mut pipeline) = self.db.get_pipeline(pipeline_id).await {
                if pipeline.status.is_active() {
                    pipeline.transition(PipelineStatus::Completed)?;
                    self.db.update_pipeline(&pipeline).await;
                    info!(
                        "Pipeline {} ({}) completed: cost ${}, revenue ${}, net ${}",
                        pipeline.id,
                        pipeline.product_good,
                        pipeline.total_cost,
                        pipeline.total_revenue,
                        pipeline.net()
                    );
                }
            }
        }
        Ok(())
    }

    /// Retries happen via the rescuer; a task out of retries fails its
    /// pipeline unless the factory-state manager already planted a
    /// continuation covering the same work.
    async fn handle_failure(&self, task: MfgTask) -> Result<()> {
        if task.can_retry() {
            // leave FAILED; the rescuer resets it on its next pass
            return Ok(());
        }
        let siblings = self.db.find_tasks_by_pipeline(task.pipeline_id).await;
        let continuation_exists = siblings.iter().any(|t| {
            t.id != task.id
                && t.good == task.good
                && t.factory_symbol == task.factory_symbol
                && !t.is_terminal()
        });
        if continuation_exists {
            info!(
                "Task {} exhausted retries but a continuation exists; pipeline {} continues",
                task.id, task.pipeline_id
            );
            return Ok(());
        }
        if let Some(mut pipeline) = self.db.get_pipeline(task.pipeline_id).await {
            if pipeline.status.is_active() {
                warn!(
                    "Pipeline {} failed: task {} ({} {}) out of retries",
                    pipeline.id, task.id, task.task_type, task.good
                );
                pipeline.transition(PipelineStatus::Failed)?;
                self.db.update_pipeline(&pipeline).await;
            }
        }
        Ok(())
    }

    /// Startup pass: tasks claimed by workers that no longer run go back
    /// to a schedulable state; their ships and containers are freed.
    pub async fn recover_orphans(&self) -> Result<Vec<i64>> {
        let pipelines = self.db.find_active_pipelines(&self.player_id).await;
        let pipeline_ids: Vec<i64> = pipelines.iter().map(|p| p.id).collect();
        let mut recovered = vec![];
        for status in [TaskStatus::Assigned, TaskStatus::Executing] {
            for mut task in self.db.find_tasks_by_status(&pipeline_ids, status).await {
                let ship = match task.assigned_ship.clone() {
                    Some(ship) => ship,
                    None => continue,
                };
                if self.active.contains_key(&ship) {
                    continue;
                }
                info!(
                    "Recovering orphaned task {} (was {} on {})",
                    task.id, task.status, ship
                );
                self.registry.release(&ship, "orphaned task worker").await;
                // restart recovery restores schedulable state directly
                task.status = if task.task_type == TaskType::CollectSell {
                    TaskStatus::Pending
                } else {
                    TaskStatus::Ready
                };
                task.assigned_ship = None;
                task.started_at = None;
                self.db.update_task(&task).await;
                if task.status == TaskStatus::Ready {
                    recovered.push(task.id);
                }
            }
        }
        Ok(recovered)
    }
}

/// The worker body: mark EXECUTING, run the executor, record the outcome.
/// Cancellation leaves the row EXECUTING for restart recovery.
async fn run_and_record(
    db: DbClient,
    ship: ShipController,
    mut task: MfgTask,
    storage: Arc<StorageCoordinator>,
) -> Result<()> {
    task.transition(TaskStatus::Executing)?;
    db.update_task(&task).await;

    let result = task_worker::run(ship, task.clone(), TaskWorkerDeps { storage }).await;
    match result {
        Ok(outcome) => {
            task.results.actual_qty = outcome.actual_qty;
            task.results.total_cost = outcome.total_cost;
            task.results.total_revenue = outcome.total_revenue;
            task.transition(TaskStatus::Completed)?;
            db.update_task(&task).await;
            Ok(())
        }
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => {
            task.retry_count += 1;
            task.results.error_msg = Some(e.to_string());
            task.transition(TaskStatus::Failed)?;
            db.update_task(&task).await;
            Err(e)
        }
    }
}
