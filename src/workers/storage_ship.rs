use crate::error::Result;
use crate::ship_controller::ShipController;
use crate::storage::{DepositEvent, StorageCoordinator};
use crate::util;
use log::*;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Worthless siphon byproduct; it only wastes storage capacity.
const BYPRODUCT: &str = "HYDROCARBON";

pub struct StorageShipDeps {
    pub gas_giant: crate::models::WaypointSymbol,
    pub storage: Arc<StorageCoordinator>,
}

/// Parks a ship at the gas giant as a cargo sink. Subscribes to its own
/// deposit stream and jettisons byproduct as it arrives, keeping capacity
/// free for the gases the manufacturing haulers want.
pub async fn run(ship: ShipController, deps: StorageShipDeps) -> Result<()> {
    info!("Starting storage ship worker for {}", ship.symbol());
    ship.wait_for_transit().await?;
    ship.goto_waypoint(&deps.gas_giant).await?;
    ship.orbit().await?;

    deps.storage
        .register_storage_ship(&ship.symbol(), ship.cargo_capacity(), ship.cargo_map());
    let mut deposits = deps.storage.subscribe_to_deposits(&ship.symbol());

    let result = deposit_loop(&ship, &deps.storage, &mut deposits).await;

    deps.storage.unsubscribe(&ship.symbol());
    deps.storage.unregister_storage_ship(&ship.symbol());
    result
}

async fn deposit_loop(
    ship: &ShipController,
    storage: &StorageCoordinator,
    deposits: &mut mpsc::Receiver<DepositEvent>,
) -> Result<()> {
    loop {
        let event = util::recv(ship.token(), deposits).await?;
        debug!(
            "[{}] Deposit: {} {}",
            ship.symbol(),
            event.units,
            event.good
        );
        if event.good == BYPRODUCT {
            // drop exactly the notified units so AvailableSpace stays true
            ship.jettison_cargo(&event.good, event.units).await?;
            storage.notify_cargo_jettisoned(&ship.symbol(), &event.good, event.units);
        }
    }
}
