use crate::error::{Error, Result};
use crate::models::{MfgTask, TaskType};
use crate::ship_controller::ShipController;
use crate::storage::StorageCoordinator;
use crate::workers::purchaser::{self, PurchaseRequest};
use crate::workers::seller;
use log::*;
use std::cmp::min;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct TaskOutcome {
    pub actual_qty: i64,
    pub total_cost: i64,
    pub total_revenue: i64,
}

pub struct TaskWorkerDeps {
    pub storage: Arc<StorageCoordinator>,
}

/// Phase 1 (acquisition) is skipped when the ship already holds the good:
/// that's what makes a restarted task resume at phase 2 without re-buying.
pub fn phase_one_done(held_units: i64) -> bool {
    held_units > 0
}

/// Executes one manufacturing task on one ship, dispatched by type. Each
/// executor is idempotent per phase.
pub async fn run(ship: ShipController, task: MfgTask, deps: TaskWorkerDeps) -> Result<TaskOutcome> {
    info!(
        "[{}] Executing task {} ({} {} x{})",
        ship.symbol(),
        task.id,
        task.task_type,
        task.good,
        task.desired_qty
    );
    ship.wait_for_transit().await?;
    match task.task_type {
        TaskType::AcquireDeliver => acquire_deliver(&ship, &task).await,
        TaskType::CollectSell => collect_sell(&ship, &task, &deps).await,
        TaskType::StorageAcquireDeliver => storage_acquire_deliver(&ship, &task, &deps).await,
        TaskType::Liquidate => liquidate(&ship, &task).await,
        TaskType::DeliverToConstruction => deliver_to_construction(&ship, &task).await,
    }
}

fn required<'a>(
    symbol: &'a Option<crate::models::WaypointSymbol>,
    what: &str,
    task: &MfgTask,
) -> Result<&'a crate::models::WaypointSymbol> {
    symbol
        .as_ref()
        .ok_or_else(|| Error::Precondition(format!("task {} has no {}", task.id, what)))
}

/// Buy at the source market, sell into the factory. One ship, one round
/// trip, cost and revenue recorded.
async fn acquire_deliver(ship: &ShipController, task: &MfgTask) -> Result<TaskOutcome> {
    let mut outcome = TaskOutcome::default();
    ship.reload().await?;

    if !phase_one_done(ship.cargo_good_count(&task.good)) {
        let source = required(&task.source_market, "source market", task)?;
        ship.navigate_and_dock(source).await?;
        let desired = min(task.desired_qty, ship.cargo_space_available());
        let purchase = purchaser::purchase_iteratively(
            ship,
            &PurchaseRequest {
                good: task.good.clone(),
                desired_units: desired,
                require_high_supply: false,
            },
        )
        .await?;
        if purchase.units_bought == 0 {
            return Err(Error::Precondition(format!(
                "no {} available at {}",
                task.good, source
            )));
        }
        outcome.total_cost = purchase.total_cost;
    }

    let factory = required(&task.factory_symbol, "factory", task)?;
    ship.navigate_and_dock(factory).await?;
    let held = ship.cargo_good_count(&task.good);
    let sale = seller::sell_cargo(ship, &task.good, held).await?;
    outcome.actual_qty = sale.units_sold;
    outcome.total_revenue = sale.total_revenue;
    Ok(outcome)
}

/// Collect the factory's output (flush supply only) or pick it up from
/// storage, then sell at the target market.
async fn collect_sell(
    ship: &ShipController,
    task: &MfgTask,
    deps: &TaskWorkerDeps,
) -> Result<TaskOutcome> {
    let mut outcome = TaskOutcome::default();
    ship.reload().await?;

    if !phase_one_done(ship.cargo_good_count(&task.good)) {
        if task.storage_op_id.is_some() {
            // storage-sourced cargo was already paid for by the gas pipeline
            collect_from_storage(ship, task, deps).await?;
        } else {
            let factory = required(&task.factory_symbol, "factory", task)?;
            ship.navigate_and_dock(factory).await?;
            let desired = min(task.desired_qty, ship.cargo_space_available());
            let purchase = purchaser::purchase_iteratively(
                ship,
                &PurchaseRequest {
                    good: task.good.clone(),
                    desired_units: desired,
                    require_high_supply: true,
                },
            )
            .await?;
            outcome.total_cost = purchase.total_cost;
        }
    }

    let target = required(&task.target_market, "target market", task)?;
    ship.navigate_and_dock(target).await?;
    let held = ship.cargo_good_count(&task.good);
    let sale = seller::sell_cargo(ship, &task.good, held).await?;
    outcome.actual_qty = sale.units_sold;
    outcome.total_revenue = sale.total_revenue;
    Ok(outcome)
}

/// Pick gas up from a storage ship at the gas giant, haul it to the
/// factory, sell it there. Cargo cost is zero; the siphons already paid.
async fn storage_acquire_deliver(
    ship: &ShipController,
    task: &MfgTask,
    deps: &TaskWorkerDeps,
) -> Result<TaskOutcome> {
    let mut outcome = TaskOutcome::default();
    ship.reload().await?;

    if !phase_one_done(ship.cargo_good_count(&task.good)) {
        collect_from_storage(ship, task, deps).await?;
    }

    let factory = required(&task.factory_symbol, "factory", task)?;
    ship.navigate_and_dock(factory).await?;
    let held = ship.cargo_good_count(&task.good);
    let sale = seller::sell_cargo(ship, &task.good, held).await?;
    outcome.actual_qty = sale.units_sold;
    outcome.total_revenue = sale.total_revenue;
    Ok(outcome)
}

async fn collect_from_storage(
    ship: &ShipController,
    task: &MfgTask,
    deps: &TaskWorkerDeps,
) -> Result<()> {
    let storage_waypoint = required(&task.source_market, "storage waypoint", task)?;
    ship.goto_waypoint(storage_waypoint).await?;
    ship.orbit().await?;

    let op_id = task
        .storage_op_id
        .clone()
        .unwrap_or_else(|| format!("task-{}", task.id));
    let max_units = min(task.desired_qty, ship.cargo_space_available());
    // min_units of 1: storage full of byproduct must not deadlock a hauler
    // that only wants a sliver of the right gas
    let (store_ship, units) = deps
        .storage
        .wait_for_cargo(ship.token(), &op_id, &task.good, 1, max_units, &ship.symbol())
        .await?;
    match ship.receive_cargo_from(&store_ship, &task.good, units).await {
        Ok(()) => {
            deps.storage
                .confirm_transfer(&store_ship, &task.good, units, &ship.symbol());
            Ok(())
        }
        Err(e) => {
            deps.storage
                .cancel_reservation(&store_ship, &task.good, units, &ship.symbol());
            Err(e)
        }
    }
}

/// Dump whatever the ship holds at the target market. No-op on an empty
/// hold; a liquidation that lost its cargo has nothing left to rescue.
async fn liquidate(ship: &ShipController, task: &MfgTask) -> Result<TaskOutcome> {
    ship.reload().await?;
    if ship.cargo_empty() {
        debug!("[{}] Liquidate task {}: hold empty", ship.symbol(), task.id);
        return Ok(TaskOutcome::default());
    }
    let target = required(&task.target_market, "target market", task)?;
    ship.navigate_and_dock(target).await?;
    let sale = seller::sell_all(ship).await?;
    Ok(TaskOutcome {
        actual_qty: sale.units_sold,
        total_cost: 0,
        total_revenue: sale.total_revenue,
    })
}

/// Buy construction materials if the hold is empty, then supply the site.
async fn deliver_to_construction(ship: &ShipController, task: &MfgTask) -> Result<TaskOutcome> {
    let mut outcome = TaskOutcome::default();
    ship.reload().await?;

    let site = required(&task.target_market, "construction site", task)?;
    let construction = ship.universe.get_construction(site).await?;
    if construction.data.as_ref().map(|c| c.is_complete).unwrap_or(true) {
        debug!("[{}] Construction at {} needs nothing", ship.symbol(), site);
        return Ok(outcome);
    }

    if !phase_one_done(ship.cargo_good_count(&task.good)) {
        let source = required(&task.source_market, "source market", task)?;
        ship.navigate_and_dock(source).await?;
        let desired = min(task.desired_qty, ship.cargo_space_available());
        let purchase = purchaser::purchase_iteratively(
            ship,
            &PurchaseRequest {
                good: task.good.clone(),
                desired_units: desired,
                require_high_supply: false,
            },
        )
        .await?;
        outcome.total_cost = purchase.total_cost;
    }

    ship.navigate_and_dock(site).await?;
    let units = ship.cargo_good_count(&task.good);
    let construction = ship.supply_construction(&task.good, units).await?;
    outcome.actual_qty = units;
    if construction.is_complete {
        info!("[{}] Construction at {} is complete", ship.symbol(), site);
    }
    Ok(outcome)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_phase_one_skip_predicate() {
        // a restarted executor with cargo aboard goes straight to phase 2
        assert!(phase_one_done(40));
        assert!(phase_one_done(1));
        assert!(!phase_one_done(0));
    }
}
