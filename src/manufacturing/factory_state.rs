use crate::database::db_models::NewTask;
use crate::database::DbClient;
use crate::error::Result;
use crate::models::{MarketSupply, MfgTask, TaskStatus, TaskType, WaypointSymbol};
use crate::universe::Universe;
use log::*;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// A factory is ripe for collection while its output supply is flush.
/// Recomputed from the latest observation every time; a supply drop takes
/// the flag away again.
pub fn ready_for_collection(supply: Option<MarketSupply>) -> bool {
    matches!(supply, Some(s) if s >= MarketSupply::High)
}

/// Tracks per-(pipeline, factory, output) delivery progress and supply
/// observations, creates continued deliveries while a factory still
/// starves, and promotes dependent tasks once their dependencies finish.
pub struct FactoryStateManager {
    db: DbClient,
    universe: Universe,
}

impl FactoryStateManager {
    pub fn new(db: &DbClient, universe: &Universe) -> Self {
        Self {
            db: db.clone(),
            universe: universe.clone(),
        }
    }

    /// Handle a completed ACQUIRE_DELIVER / STORAGE_ACQUIRE_DELIVER:
    /// record the delivered input, re-observe the output supply, and when
    /// the factory still isn't ready, plant a continued delivery (PENDING,
    /// so the supply monitor gates it). Returns task ids newly READY.
    pub async fn record_delivery(&self, task: &MfgTask) -> Result<Vec<i64>> {
        let factory = match &task.factory_symbol {
            Some(factory) => factory.clone(),
            None => return Ok(vec![]),
        };
        let pipeline_tasks = self.db.find_tasks_by_pipeline(task.pipeline_id).await;
        let output_good = match output_good_of(&factory, &pipeline_tasks) {
            Some(good) => good,
            None => {
                debug!(
                    "No downstream consumer of factory {} in pipeline {}",
                    factory, task.pipeline_id
                );
                return self.promote_ready_dependents(task.pipeline_id).await;
            }
        };

        // fold this delivery into the state row
        let states = self.db.get_factory_states(task.pipeline_id).await;
        let existing = states
            .iter()
            .find(|s| s.factory_symbol == factory.to_string() && s.output_good == output_good);
        let mut delivered: BTreeMap<String, i64> = existing
            .map(|s| serde_json::from_value(s.delivered.clone()).unwrap_or_default())
            .unwrap_or_default();
        *delivered.entry(task.good.clone()).or_insert(0) += task.results.actual_qty;

        let supply_prev = existing.and_then(|s| s.supply_last.clone());
        let supply_now = self.universe.supply_of(&factory, &output_good).await;
        let ready = ready_for_collection(supply_now);
        self.db
            .upsert_factory_state(
                task.pipeline_id,
                &factory,
                &output_good,
                &json!(delivered),
                supply_prev.clone(),
                supply_now.map(|s| s.to_string()),
                ready,
            )
            .await;
        debug!(
            "Factory {} ({}): delivered {:?}, supply {:?} -> {:?}, ready={}",
            factory, output_good, delivered, supply_prev, supply_now, ready
        );

        if !ready {
            self.create_continued_delivery(task).await;
        }
        self.promote_ready_dependents(task.pipeline_id).await
    }

    /// The factory ate the delivery without reaching flush output supply;
    /// queue another round of the same input.
    async fn create_continued_delivery(&self, task: &MfgTask) {
        let continued = NewTask {
            pipeline_id: task.pipeline_id,
            task_type: task.task_type.to_string(),
            good: task.good.clone(),
            desired_qty: task.desired_qty,
            source_market: task.source_market.as_ref().map(|s| s.to_string()),
            target_market: task.target_market.as_ref().map(|s| s.to_string()),
            factory_symbol: task.factory_symbol.as_ref().map(|s| s.to_string()),
            storage_op_id: task.storage_op_id.clone(),
            depends_on: json!([]),
            status: TaskStatus::Pending.to_string(),
            priority: task.task_type.base_priority(),
            max_retries: task.max_retries,
        };
        let ids = self.db.insert_tasks(&[continued]).await;
        info!(
            "Created continued delivery task {:?} ({} -> {:?})",
            ids, task.good, task.factory_symbol
        );
    }

    /// PENDING tasks whose dependencies are all COMPLETED become READY.
    /// COLLECT_SELL is exempt: it is gated by factory supply, not by its
    /// siblings.
    pub async fn promote_ready_dependents(&self, pipeline_id: i64) -> Result<Vec<i64>> {
        let tasks = self.db.find_tasks_by_pipeline(pipeline_id).await;
        let completed: BTreeSet<i64> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id)
            .collect();
        let mut promoted = vec![];
        for mut task in tasks {
            if task.status != TaskStatus::Pending || task.task_type == TaskType::CollectSell {
                continue;
            }
            if task.depends_on.iter().all(|dep| completed.contains(dep)) {
                task.transition(TaskStatus::Ready)?;
                self.db.update_task(&task).await;
                debug!("Task {} promoted to READY (deps complete)", task.id);
                promoted.push(task.id);
            }
        }
        Ok(promoted)
    }

    /// Supply monitor for COLLECT_SELL gating: re-observe each pending
    /// collection's factory and promote the ones whose output is flush.
    /// Returns task ids newly READY.
    pub async fn gate_collections(&self, pipeline_id: i64) -> Result<Vec<i64>> {
        let tasks = self.db.find_tasks_by_pipeline(pipeline_id).await;
        let mut promoted = vec![];
        for mut task in tasks {
            if task.status != TaskStatus::Pending || task.task_type != TaskType::CollectSell {
                continue;
            }
            // storage-sourced collections wait on storage, not on a factory
            if task.storage_op_id.is_some() {
                task.transition(TaskStatus::Ready)?;
                self.db.update_task(&task).await;
                promoted.push(task.id);
                continue;
            }
            let factory = match &task.factory_symbol {
                Some(factory) => factory.clone(),
                None => continue,
            };
            let supply = self.universe.supply_of(&factory, &task.good).await;
            let ready = ready_for_collection(supply);
            self.record_supply_observation(&task, &factory, supply, ready)
                .await;
            if ready {
                task.transition(TaskStatus::Ready)?;
                self.db.update_task(&task).await;
                info!(
                    "Collection task {} promoted: {} at {} is {}",
                    task.id,
                    task.good,
                    factory,
                    supply.map(|s| s.to_string()).unwrap_or_default()
                );
                promoted.push(task.id);
            }
        }
        Ok(promoted)
    }

    async fn record_supply_observation(
        &self,
        task: &MfgTask,
        factory: &WaypointSymbol,
        supply: Option<MarketSupply>,
        ready: bool,
    ) {
        let states = self.db.get_factory_states(task.pipeline_id).await;
        let existing = states
            .iter()
            .find(|s| s.factory_symbol == factory.to_string() && s.output_good == task.good);
        let delivered = existing
            .map(|s| s.delivered.clone())
            .unwrap_or_else(|| json!({}));
        let supply_prev = existing.and_then(|s| s.supply_last.clone());
        self.db
            .upsert_factory_state(
                task.pipeline_id,
                factory,
                &task.good,
                &delivered,
                supply_prev,
                supply.map(|s| s.to_string()),
                ready,
            )
            .await;
    }
}

/// The output of `factory` within this pipeline: the good some downstream
/// task collects from it (COLLECT_SELL at the factory, or an
/// ACQUIRE_DELIVER sourcing from it).
fn output_good_of(factory: &WaypointSymbol, tasks: &[MfgTask]) -> Option<String> {
    tasks
        .iter()
        .find(|t| {
            (t.task_type == TaskType::CollectSell && t.factory_symbol.as_ref() == Some(factory))
                || (t.task_type == TaskType::AcquireDeliver
                    && t.source_market.as_ref() == Some(factory))
        })
        .map(|t| t.good.clone())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_readiness_is_not_sticky() {
        // readiness tracks the latest observation only
        assert!(ready_for_collection(Some(MarketSupply::High)));
        assert!(ready_for_collection(Some(MarketSupply::Abundant)));
        assert!(!ready_for_collection(Some(MarketSupply::Moderate)));
        assert!(!ready_for_collection(Some(MarketSupply::Scarce)));
        assert!(!ready_for_collection(None));
    }
}
