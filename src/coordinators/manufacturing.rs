use crate::config::CONFIG;
use crate::container_manager::completion_channel;
use crate::coordinators::{select_closest_ship, CoordinatorContext};
use crate::error::{Error, Result};
use crate::manufacturing::factory_state::FactoryStateManager;
use crate::manufacturing::lifecycle::WorkerLifecycle;
use crate::manufacturing::queue::{TaskQueue, WorkerAllocation};
use crate::manufacturing::rescuer::TaskRescuer;
use crate::manufacturing::{PipelinePlanner, SIPHON_GASES};
use crate::models::TaskStatus;
use crate::storage::StorageCoordinator;
use crate::util;
use log::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SCHEDULE_WAIT: Duration = Duration::from_secs(30);

/// Owns the manufacturing activity: pipelines, the task queue, worker
/// assignment, and recovery. In-memory state is rebuilt from the database
/// before any scheduling happens.
pub struct MfgCoordinator {
    ctx: CoordinatorContext,
    storage: Arc<StorageCoordinator>,
    lifecycle: Arc<WorkerLifecycle>,
    factory_manager: FactoryStateManager,
    rescuer: Arc<TaskRescuer>,
    queue: Arc<Mutex<TaskQueue>>,
}

impl MfgCoordinator {
    pub fn new(ctx: &CoordinatorContext, storage: &Arc<StorageCoordinator>) -> Self {
        let lifecycle = Arc::new(WorkerLifecycle::new(
            &ctx.player_id,
            &ctx.db,
            &ctx.api_client,
            &ctx.universe,
            &ctx.ledger,
            &ctx.registry,
            &ctx.containers,
            storage,
        ));
        Self {
            ctx: ctx.clone(),
            storage: storage.clone(),
            lifecycle,
            factory_manager: FactoryStateManager::new(&ctx.db, &ctx.universe),
            rescuer: Arc::new(TaskRescuer::new(&ctx.player_id, &ctx.db, &ctx.universe)),
            queue: Arc::new(Mutex::new(TaskQueue::new())),
        }
    }

    /// Cleanup runs on every exit path, cancellation included.
    pub async fn run(&self, coordinator_id: &str, token: CancellationToken) -> Result<()> {
        let result = self.run_loop(coordinator_id, &token).await;
        self.shutdown(coordinator_id).await;
        match result {
            Err(Error::Cancelled) => Ok(()),
            other => other,
        }
    }

    async fn run_loop(&self, coordinator_id: &str, token: &CancellationToken) -> Result<()> {
        info!("Starting manufacturing coordinator {}", coordinator_id);

        // the DB is authoritative after a restart: free orphaned claims,
        // then rebuild the queue from READY rows
        self.ctx
            .cleanup_stale_workers(crate::models::ContainerType::MfgTaskWorker)
            .await;
        let recovered = self.lifecycle.recover_orphans().await?;
        for task_id in recovered {
            if let Some(task) = self.ctx.db.get_task(task_id).await {
                self.queue.lock().unwrap().push(&task);
            }
        }
        self.reload_ready_tasks().await;

        self.create_pipelines().await;

        // the rescuer runs beside the scheduler on a child token
        let rescuer_handle = {
            let rescuer = self.rescuer.clone();
            let queue = self.queue.clone();
            let rescuer_token = token.child_token();
            tokio::spawn(async move { rescuer.run(rescuer_token, queue).await })
        };

        let (completion_tx, mut completion_rx) = completion_channel();
        let result = loop {
            if token.is_cancelled() {
                break Ok(());
            }

            // drain any completion that landed while we were scheduling
            while let Ok(signal) = completion_rx.try_recv() {
                self.lifecycle
                    .on_worker_complete(&signal, &self.factory_manager, &self.queue)
                    .await?;
            }

            // supply monitor: promote collections whose factory is flush
            self.gate_collections().await;

            let entry = {
                let (collect_sell, acquire_deliver) = self.lifecycle.allocation_counts();
                let mut queue = self.queue.lock().unwrap();
                let (collect_sell_has_ready, acquire_deliver_has_ready) = queue.ready_flags();
                let alloc = WorkerAllocation {
                    collect_sell,
                    acquire_deliver,
                    collect_sell_has_ready,
                    acquire_deliver_has_ready,
                };
                queue.pop_next(chrono::Utc::now(), &alloc)
            };

            let entry = match entry {
                Some(entry) => entry,
                None => {
                    match util::recv_timeout(token, &mut completion_rx, SCHEDULE_WAIT).await {
                        Ok(Some(signal)) => {
                            self.lifecycle
                                .on_worker_complete(&signal, &self.factory_manager, &self.queue)
                                .await?;
                        }
                        Ok(None) => {}
                        Err(Error::Cancelled) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                    continue;
                }
            };

            let task = match self.ctx.db.get_task(entry.task_id).await {
                Some(task) if task.status == TaskStatus::Ready => task,
                _ => continue, // rescued or claimed elsewhere meanwhile
            };

            // pick the closest idle hauler to the task's first stop
            let fleet = self.ctx.fleet_snapshot();
            let idle = self
                .ctx
                .registry
                .find_idle_of_kind(&fleet, |s| s.is_hauler())
                .await;
            if idle.is_empty() {
                debug!("No idle hauler for task {}; requeueing", task.id);
                self.queue.lock().unwrap().push(&task);
                match util::recv_timeout(token, &mut completion_rx, SCHEDULE_WAIT).await {
                    Ok(Some(signal)) => {
                        self.lifecycle
                            .on_worker_complete(&signal, &self.factory_manager, &self.queue)
                            .await?;
                    }
                    Ok(None) => {}
                    Err(Error::Cancelled) => break Ok(()),
                    Err(e) => break Err(e),
                }
                continue;
            }
            let start_waypoint = task
                .source_market
                .clone()
                .or_else(|| task.factory_symbol.clone())
                .or_else(|| task.target_market.clone());
            let selected = match &start_waypoint {
                Some(waypoint) => {
                    let graph = self.ctx.universe.get_graph(&waypoint.system()).await?;
                    select_closest_ship(&graph, &idle, waypoint, Some(&task.good))
                        .unwrap_or_else(|| idle[0].clone())
                }
                None => idle[0].clone(),
            };
            let ship_arc = self
                .ctx
                .ship_arc(&selected.symbol)
                .expect("idle ship missing from fleet");

            match self
                .lifecycle
                .assign_task_to_ship(&task, ship_arc, coordinator_id, &completion_tx)
                .await
            {
                Ok(()) => {}
                Err(Error::TaskClaimRejected(id)) => {
                    debug!("Task {} claimed elsewhere; moving on", id);
                }
                Err(e) => {
                    warn!("Assignment of task {} failed: {}; requeueing", task.id, e);
                    self.queue.lock().unwrap().push(&task);
                    util::sleep(token, Duration::from_secs(5)).await?;
                }
            }
        };

        rescuer_handle.abort();
        result
    }

    async fn reload_ready_tasks(&self) {
        let pipelines = self.ctx.db.find_active_pipelines(&self.ctx.player_id).await;
        let pipeline_ids: Vec<i64> = pipelines.iter().map(|p| p.id).collect();
        let ready = self
            .ctx
            .db
            .find_tasks_by_status(&pipeline_ids, TaskStatus::Ready)
            .await;
        let mut queue = self.queue.lock().unwrap();
        for task in &ready {
            queue.push(task);
        }
        info!(
            "Manufacturing: {} active pipelines, {} ready tasks queued",
            pipelines.len(),
            ready.len()
        );
    }

    /// Configured fabrication products, plus collection pipelines for the
    /// siphoned gases when storage ships are online.
    async fn create_pipelines(&self) {
        let gas_giant = match self.ctx.universe.get_gas_giant(&self.ctx.system).await {
            Ok(gas_giant) => gas_giant,
            Err(_) => None,
        };
        let planner = PipelinePlanner::new(
            &self.ctx.player_id,
            &self.ctx.db,
            &self.ctx.universe,
            &self.storage,
            CONFIG.mfg_strategy,
            gas_giant,
        );
        for product in &CONFIG.mfg_products {
            match planner
                .create_fabrication_pipeline(&self.ctx.system, product)
                .await
            {
                Ok(pipeline_id) => {
                    let tasks = self.ctx.db.find_tasks_by_pipeline(pipeline_id).await;
                    let mut queue = self.queue.lock().unwrap();
                    for task in tasks.iter().filter(|t| t.status == TaskStatus::Ready) {
                        queue.push(task);
                    }
                }
                Err(Error::Precondition(reason)) => debug!("Pipeline skipped: {}", reason),
                Err(e) => warn!("Pipeline creation for {} failed: {}", product, e),
            }
        }
        if !self.storage.registered_ships().is_empty() {
            for gas in SIPHON_GASES.iter().filter(|g| **g != "HYDROCARBON") {
                match planner.create_collection_pipeline(&self.ctx.system, gas).await {
                    Ok(_) => {}
                    Err(Error::Precondition(_)) => {}
                    Err(e) => debug!("Collection pipeline for {} not created: {}", gas, e),
                }
            }
        }
    }

    async fn gate_collections(&self) {
        let pipelines = self.ctx.db.find_active_pipelines(&self.ctx.player_id).await;
        for pipeline in pipelines {
            match self.factory_manager.gate_collections(pipeline.id).await {
                Ok(promoted) => {
                    for task_id in promoted {
                        if let Some(task) = self.ctx.db.get_task(task_id).await {
                            self.queue.lock().unwrap().push(&task);
                        }
                    }
                }
                Err(e) => warn!("Collection gating for pipeline {} failed: {}", pipeline.id, e),
            }
        }
    }

    async fn shutdown(&self, coordinator_id: &str) {
        info!("Manufacturing coordinator {} shutting down", coordinator_id);
        let workers = self
            .ctx
            .containers
            .find_running_workers(crate::models::ContainerType::MfgTaskWorker)
            .await;
        for worker in workers {
            if worker.parent_id.as_deref() == Some(coordinator_id) {
                self.ctx.containers.stop(&worker.id).await;
                for ship in self.ctx.registry.find_by_container(&worker.id).await {
                    self.ctx.registry.release(&ship, "coordinator shutdown").await;
                }
            }
        }
        for ship in self.ctx.registry.find_by_container(coordinator_id).await {
            self.ctx.registry.release(&ship, "coordinator shutdown").await;
        }
    }
}
