use crate::database::DbClient;
use crate::error::Result;
use crate::manufacturing::factory_state::ready_for_collection;
use crate::manufacturing::queue::TaskQueue;
use crate::models::{MarketSupply, MfgTask, TaskStatus, TaskType};
use crate::universe::Universe;
use crate::util;
use log::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RESCUE_INTERVAL: Duration = Duration::from_secs(60);

fn saturated(supply: Option<MarketSupply>) -> bool {
    matches!(supply, Some(s) if s >= MarketSupply::High)
}

/// Periodically revalidates READY tasks against live market conditions and
/// gives failed tasks their retries back. A READY task whose conditions
/// regressed goes back to PENDING and leaves the queue; a FAILED task with
/// budget left returns to the flow. LIQUIDATE is never rescued.
pub struct TaskRescuer {
    db: DbClient,
    universe: Universe,
    player_id: String,
}

impl TaskRescuer {
    pub fn new(player_id: &str, db: &DbClient, universe: &Universe) -> Self {
        Self {
            db: db.clone(),
            universe: universe.clone(),
            player_id: player_id.to_string(),
        }
    }

    pub async fn run(
        &self,
        token: CancellationToken,
        queue: Arc<Mutex<TaskQueue>>,
    ) -> Result<()> {
        info!("Starting task rescuer");
        loop {
            util::sleep(&token, RESCUE_INTERVAL).await?;
            if let Err(e) = self.tick(&queue).await {
                warn!("Task rescue pass failed: {}", e);
            }
        }
    }

    pub async fn tick(&self, queue: &Arc<Mutex<TaskQueue>>) -> Result<()> {
        let pipelines = self.db.find_active_pipelines(&self.player_id).await;
        let pipeline_ids: Vec<i64> = pipelines.iter().map(|p| p.id).collect();

        // READY tasks: requeue the still-valid, park the rest
        for mut task in self
            .db
            .find_tasks_by_status(&pipeline_ids, TaskStatus::Ready)
            .await
        {
            if self.validate(&task).await {
                let mut queue = queue.lock().unwrap();
                if !queue.contains(task.id) {
                    queue.push(&task);
                }
            } else {
                debug!(
                    "Task {} ({} {}) no longer valid; back to PENDING",
                    task.id, task.task_type, task.good
                );
                task.transition(TaskStatus::Pending)?;
                self.db.update_task(&task).await;
                queue.lock().unwrap().remove(task.id);
            }
        }

        // FAILED tasks with retry budget
        for mut task in self
            .db
            .find_tasks_by_status(&pipeline_ids, TaskStatus::Failed)
            .await
        {
            if !task.can_retry() {
                continue;
            }
            task.reset_for_retry()?;
            if task.task_type != TaskType::CollectSell {
                // collections stay PENDING behind the supply gate
                task.transition(TaskStatus::Ready)?;
            }
            self.db.update_task(&task).await;
            info!(
                "Rescued failed task {} ({} {}), retry {}/{}",
                task.id, task.task_type, task.good, task.retry_count, task.max_retries
            );
            if task.status == TaskStatus::Ready {
                queue.lock().unwrap().push(&task);
            }
        }
        Ok(())
    }

    /// Is this READY task still worth a ship under current market data?
    async fn validate(&self, task: &MfgTask) -> bool {
        match task.task_type {
            TaskType::CollectSell => {
                let factory_ok = match &task.factory_symbol {
                    Some(factory) => ready_for_collection(
                        self.universe.supply_of(factory, &task.good).await,
                    ),
                    None => true,
                };
                let sell_ok = match &task.target_market {
                    Some(market) => {
                        !saturated(self.universe.supply_of(market, &task.good).await)
                    }
                    None => true,
                };
                factory_ok && sell_ok
            }
            TaskType::AcquireDeliver | TaskType::StorageAcquireDeliver => {
                // a factory drowning in this input doesn't need more of it
                match &task.factory_symbol {
                    Some(factory) => {
                        !saturated(self.universe.supply_of(factory, &task.good).await)
                    }
                    None => true,
                }
            }
            TaskType::Liquidate | TaskType::DeliverToConstruction => true,
        }
    }
}
