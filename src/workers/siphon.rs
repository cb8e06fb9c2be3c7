use crate::error::{Error, Result};
use crate::rendezvous::GasRendezvous;
use crate::ship_controller::ShipController;
use crate::storage::StorageCoordinator;
use crate::util;
use log::*;
use std::sync::Arc;
use std::time::Duration;

const TRANSIENT_RETRY_PAUSE: Duration = Duration::from_secs(10);

pub struct SiphonDeps {
    pub gas_giant: crate::models::WaypointSymbol,
    pub storage: Arc<StorageCoordinator>,
    pub rendezvous: Arc<GasRendezvous>,
}

/// Long-running siphon loop. Siphons until the hold is full, then empties
/// it into a storage ship (or a transport via the rendezvous when storage
/// is full). Cargo is tracked locally from siphon yields so the loop
/// doesn't burn an API call per iteration on GetShip.
pub async fn run(ship: ShipController, deps: SiphonDeps) -> Result<()> {
    info!("Starting siphon worker for {}", ship.symbol());
    ship.wait_for_transit().await?;
    ship.goto_waypoint(&deps.gas_giant).await?;
    ship.orbit().await?;
    // a cooldown may have carried over from before a restart
    ship.wait_for_cooldown().await?;

    let capacity = ship.cargo_capacity();
    let mut cargo_units = ship.cargo_units();
    loop {
        if capacity - cargo_units < 1 {
            deposit_cargo(&ship, &deps).await?;
            cargo_units = ship.cargo_units();
            continue;
        }
        match ship.siphon().await {
            Ok(response) => {
                cargo_units = response.cargo.units;
                let cooldown =
                    Duration::from_secs(response.cooldown.remaining_seconds.max(0) as u64);
                util::sleep(ship.token(), cooldown).await?;
            }
            Err(e) => {
                // code 4000 carries the remaining seconds; sleeping it off
                // (+1s) replaces a speculative cooldown poll
                if let Some(wait) = e.cooldown_retry_after() {
                    debug!(
                        "[{}] Siphon on cooldown, sleeping {}s",
                        ship.symbol(),
                        wait.as_secs()
                    );
                    util::sleep(ship.token(), wait).await?;
                } else if e.is_transient() {
                    warn!("[{}] Siphon failed (retrying): {}", ship.symbol(), e);
                    util::sleep(ship.token(), TRANSIENT_RETRY_PAUSE).await?;
                } else {
                    return Err(e.into());
                }
            }
        }
    }
}

/// Empty the hold: storage ships first (they feed the manufacturing
/// haulers), a transport via the rendezvous when storage has no room.
async fn deposit_cargo(ship: &ShipController, deps: &SiphonDeps) -> Result<()> {
    let cargo = ship.cargo_map();
    let total: i64 = cargo.values().sum();
    if total == 0 {
        return Ok(());
    }

    if let Some(store) = deps.storage.find_storage_ship_with_space(total) {
        debug!("[{}] Depositing {} units into {}", ship.symbol(), total, store);
        for (good, units) in cargo {
            ship.transfer_cargo_to(&store, &good, units).await?;
            deps.storage.notify_cargo_deposited(&store, &good, units);
        }
        return Ok(());
    }

    debug!("[{}] Storage full; requesting transport", ship.symbol());
    let ship_symbol = ship.symbol();
    let transport = tokio::select! {
        _ = ship.token().cancelled() => return Err(Error::Cancelled),
        transport = deps.rendezvous.request_transport(&ship_symbol) => {
            transport.ok_or(Error::Cancelled)?
        }
    };
    debug!("[{}] Paired with transport {}", ship.symbol(), transport);
    for (good, units) in cargo {
        ship.transfer_cargo_to(&transport, &good, units).await?;
        deps.rendezvous
            .transfer_complete(&ship.symbol(), &transport, &good, units)
            .await;
    }
    Ok(())
}
