pub mod factory_state;
pub mod lifecycle;
pub mod queue;
pub mod rescuer;
pub mod resolver;

use crate::database::db_models::{NewPipeline, NewTask};
use crate::database::DbClient;
use crate::error::{Error, Result};
use crate::models::{PipelineStatus, PipelineType, SystemSymbol, TaskStatus, WaypointSymbol};
use crate::storage::StorageCoordinator;
use crate::universe::Universe;
use futures::future::BoxFuture;
use log::*;
use resolver::{Acquisition, SupplyChainNode, SupplyChainResolver, SupplyChainStrategy};
use serde_json::json;
use std::sync::Arc;

/// Default units per task batch; roughly one light-hauler hold.
pub const DEFAULT_BATCH_UNITS: i64 = 40;

/// Goods the siphon pipeline produces. Inputs on this list are picked up
/// from storage ships instead of bought, when storage is online.
pub const SIPHON_GASES: [&str; 3] = ["LIQUID_HYDROGEN", "LIQUID_NITROGEN", "HYDROCARBON"];

/// Turns a resolved supply chain into a pipeline row plus its task DAG.
/// Leaf tasks are born READY; tasks that consume a fabricated input are
/// born PENDING with dependencies; the final collection is PENDING behind
/// the supply gate.
pub struct PipelinePlanner {
    player_id: String,
    db: DbClient,
    universe: Universe,
    storage: Arc<StorageCoordinator>,
    strategy: SupplyChainStrategy,
    gas_giant: Option<WaypointSymbol>,
}

impl PipelinePlanner {
    pub fn new(
        player_id: &str,
        db: &DbClient,
        universe: &Universe,
        storage: &Arc<StorageCoordinator>,
        strategy: SupplyChainStrategy,
        gas_giant: Option<WaypointSymbol>,
    ) -> Self {
        Self {
            player_id: player_id.to_string(),
            db: db.clone(),
            universe: universe.clone(),
            storage: storage.clone(),
            strategy,
            gas_giant,
        }
    }

    /// One active FABRICATION pipeline per product per player.
    pub async fn create_fabrication_pipeline(
        &self,
        system: &SystemSymbol,
        product: &str,
    ) -> Result<i64> {
        let active = self
            .db
            .count_active_pipelines(&self.player_id, PipelineType::Fabrication, product)
            .await;
        if active > 0 {
            return Err(Error::Precondition(format!(
                "active fabrication pipeline for {} already exists",
                product
            )));
        }

        let resolver = SupplyChainResolver::new(&self.universe, self.strategy);
        let tree = resolver.resolve(system, product).await?;
        let (sell_market, expected_price) = self
            .universe
            .find_sell_market(system, product)
            .await?
            .map(|(market, trade)| (market, trade.sell_price))
            .ok_or_else(|| Error::NoMarket(product.to_string()))?;

        let seq_no = self.db.next_pipeline_seq_no(&self.player_id).await;
        let pipeline_id = self
            .db
            .insert_pipeline(&NewPipeline {
                seq_no,
                pipeline_type: PipelineType::Fabrication.to_string(),
                product_good: product.to_string(),
                sell_market: sell_market.to_string(),
                expected_price,
                status: PipelineStatus::Planning.to_string(),
                player_id: self.player_id.clone(),
            })
            .await;

        let (root_factory, inputs) = match &tree.acquisition {
            Acquisition::Fabricate { factory, inputs } => (factory.clone(), inputs),
            Acquisition::Buy { .. } => unreachable!("root is always fabricated"),
        };
        for input in inputs {
            self.create_input_tasks(pipeline_id, input, &root_factory)
                .await?;
        }

        // the product collection; supply-gated, so PENDING
        self.db
            .insert_tasks(&[collect_sell_task(
                pipeline_id,
                product,
                &root_factory,
                &sell_market,
            )])
            .await;

        let mut pipeline = self
            .db
            .get_pipeline(pipeline_id)
            .await
            .expect("pipeline vanished");
        pipeline.transition(PipelineStatus::Executing)?;
        self.db.update_pipeline(&pipeline).await;
        info!(
            "Created fabrication pipeline {} for {} (sell at {}, expected ${})",
            pipeline_id, product, sell_market, expected_price
        );
        Ok(pipeline_id)
    }

    /// At most one active COLLECTION pipeline per (player, good).
    pub async fn create_collection_pipeline(
        &self,
        system: &SystemSymbol,
        good: &str,
    ) -> Result<i64> {
        let active = self
            .db
            .count_active_pipelines(&self.player_id, PipelineType::Collection, good)
            .await;
        if active > 0 {
            return Err(Error::Precondition(format!(
                "active collection pipeline for {} already exists",
                good
            )));
        }
        let factory = self
            .universe
            .find_factory_for_good(system, good)
            .await?
            .ok_or_else(|| Error::NoFactory(good.to_string()))?;
        let (sell_market, expected_price) = self
            .universe
            .find_sell_market(system, good)
            .await?
            .map(|(market, trade)| (market, trade.sell_price))
            .ok_or_else(|| Error::NoMarket(good.to_string()))?;

        let seq_no = self.db.next_pipeline_seq_no(&self.player_id).await;
        let pipeline_id = self
            .db
            .insert_pipeline(&NewPipeline {
                seq_no,
                pipeline_type: PipelineType::Collection.to_string(),
                product_good: good.to_string(),
                sell_market: sell_market.to_string(),
                expected_price,
                status: PipelineStatus::Planning.to_string(),
                player_id: self.player_id.clone(),
            })
            .await;
        self.db
            .insert_tasks(&[collect_sell_task(pipeline_id, good, &factory, &sell_market)])
            .await;

        let mut pipeline = self
            .db
            .get_pipeline(pipeline_id)
            .await
            .expect("pipeline vanished");
        pipeline.transition(PipelineStatus::Executing)?;
        self.db.update_pipeline(&pipeline).await;
        info!(
            "Created collection pipeline {} for {} at {}",
            pipeline_id, good, factory
        );
        Ok(pipeline_id)
    }

    /// Bottom-up task creation for one input of `target_factory`. Returns
    /// the id of the task that delivers this input.
    fn create_input_tasks<'a>(
        &'a self,
        pipeline_id: i64,
        node: &'a SupplyChainNode,
        target_factory: &'a WaypointSymbol,
    ) -> BoxFuture<'a, Result<i64>> {
        Box::pin(async move {
            match &node.acquisition {
                Acquisition::Buy { market } => {
                    let use_storage = self.gas_giant.is_some()
                        && SIPHON_GASES.contains(&node.good.as_str())
                        && !self.storage.registered_ships().is_empty();
                    let new_task = if use_storage {
                        // gas rides the siphon pipeline: free cargo from a
                        // storage ship at the gas giant
                        NewTask {
                            pipeline_id,
                            task_type: crate::models::TaskType::StorageAcquireDeliver.to_string(),
                            good: node.good.clone(),
                            desired_qty: DEFAULT_BATCH_UNITS,
                            source_market: self.gas_giant.as_ref().map(|g| g.to_string()),
                            target_market: None,
                            factory_symbol: Some(target_factory.to_string()),
                            storage_op_id: Some(format!("pipeline-{}", pipeline_id)),
                            depends_on: json!([]),
                            status: TaskStatus::Ready.to_string(),
                            priority: crate::models::TaskType::StorageAcquireDeliver
                                .base_priority(),
                            max_retries: crate::models::MAX_TASK_RETRIES,
                        }
                    } else {
                        NewTask {
                            pipeline_id,
                            task_type: crate::models::TaskType::AcquireDeliver.to_string(),
                            good: node.good.clone(),
                            desired_qty: DEFAULT_BATCH_UNITS,
                            source_market: Some(market.to_string()),
                            target_market: None,
                            factory_symbol: Some(target_factory.to_string()),
                            storage_op_id: None,
                            depends_on: json!([]),
                            status: TaskStatus::Ready.to_string(),
                            priority: crate::models::TaskType::AcquireDeliver.base_priority(),
                            max_retries: crate::models::MAX_TASK_RETRIES,
                        }
                    };
                    let ids = self.db.insert_tasks(&[new_task]).await;
                    Ok(ids[0])
                }
                Acquisition::Fabricate { factory, inputs } => {
                    let mut dep_ids = vec![];
                    for input in inputs {
                        let dep_id = self
                            .create_input_tasks(pipeline_id, input, factory)
                            .await?;
                        dep_ids.push(dep_id);
                    }
                    // move the intermediate from its factory into the
                    // parent factory once the child inputs are delivered
                    let new_task = NewTask {
                        pipeline_id,
                        task_type: crate::models::TaskType::AcquireDeliver.to_string(),
                        good: node.good.clone(),
                        desired_qty: DEFAULT_BATCH_UNITS,
                        source_market: Some(factory.to_string()),
                        target_market: None,
                        factory_symbol: Some(target_factory.to_string()),
                        storage_op_id: None,
                        depends_on: json!(dep_ids),
                        status: TaskStatus::Pending.to_string(),
                        priority: crate::models::TaskType::AcquireDeliver.base_priority(),
                        max_retries: crate::models::MAX_TASK_RETRIES,
                    };
                    let ids = self.db.insert_tasks(&[new_task]).await;
                    Ok(ids[0])
                }
            }
        })
    }
}

fn collect_sell_task(
    pipeline_id: i64,
    good: &str,
    factory: &WaypointSymbol,
    sell_market: &WaypointSymbol,
) -> NewTask {
    NewTask {
        pipeline_id,
        task_type: crate::models::TaskType::CollectSell.to_string(),
        good: good.to_string(),
        desired_qty: DEFAULT_BATCH_UNITS,
        source_market: None,
        target_market: Some(sell_market.to_string()),
        factory_symbol: Some(factory.to_string()),
        storage_op_id: None,
        depends_on: json!([]),
        status: TaskStatus::Pending.to_string(),
        priority: crate::models::TaskType::CollectSell.base_priority(),
        max_retries: crate::models::MAX_TASK_RETRIES,
    }
}
