use crate::error::Result;
use crate::rendezvous::GasRendezvous;
use crate::ship_controller::ShipController;
use crate::util;
use crate::workers::seller;
use log::*;
use std::sync::Arc;

/// Depart for a delivery round when the hold is at least this full.
const FILL_THRESHOLD: f64 = 0.95;

pub struct GasTransportDeps {
    pub gas_giant: crate::models::WaypointSymbol,
    pub rendezvous: Arc<GasRendezvous>,
}

/// Long-running transport loop: sit at the gas giant collecting gas from
/// siphon ships until nearly full, then tour the factories that need it.
pub async fn run(ship: ShipController, deps: GasTransportDeps) -> Result<()> {
    info!("Starting gas transport worker for {}", ship.symbol());
    ship.wait_for_transit().await?;

    loop {
        ship.goto_waypoint(&deps.gas_giant).await?;
        ship.orbit().await?;

        // receive transfers until the hold is effectively full
        loop {
            ship.reload().await?;
            let capacity = ship.cargo_capacity();
            let units = ship.cargo_units();
            let fill = units as f64 / capacity as f64;
            if fill >= FILL_THRESHOLD || ship.cargo_space_available() == 0 {
                break;
            }
            let mut events = deps.rendezvous.announce_transport(&ship.symbol(), units).await;
            let event = util::recv(ship.token(), &mut events).await?;
            debug!(
                "[{}] Received {} {} from {}",
                ship.symbol(),
                event.units,
                event.good,
                event.from_siphon
            );
        }

        factory_delivery_round(&ship).await?;
    }
}

/// Sell each held gas at the factory hungriest for it. Factories may not
/// sell fuel, so refuelling along the way is best-effort only.
async fn factory_delivery_round(ship: &ShipController) -> Result<()> {
    info!("[{}] Starting factory delivery round", ship.symbol());
    let system = ship.system();
    loop {
        ship.reload().await?;
        let item = match ship.cargo_first_item() {
            Some(item) => item,
            None => break,
        };
        let factory = ship
            .universe
            .find_factory_needing_gas(&system, &item.symbol)
            .await?;
        match factory {
            Some(factory) => {
                ship.navigate_and_dock(&factory).await?;
                let sale = seller::sell_cargo(ship, &item.symbol, item.units).await?;
                info!(
                    "[{}] Delivered {} {} to {} for ${}",
                    ship.symbol(),
                    sale.units_sold,
                    item.symbol,
                    factory,
                    sale.total_revenue
                );
                ship.refuel_best_effort().await;
            }
            None => {
                warn!(
                    "[{}] No factory imports {}; jettisoning {} units",
                    ship.symbol(),
                    item.symbol,
                    item.units
                );
                ship.jettison_cargo(&item.symbol, item.units).await?;
            }
        }
    }
    Ok(())
}
