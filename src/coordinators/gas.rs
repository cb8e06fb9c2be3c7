use crate::config::CONFIG;
use crate::container_manager::completion_channel;
use crate::coordinators::CoordinatorContext;
use crate::error::Result;
use crate::models::{ContainerRecord, ContainerType, Ship, WaypointSymbol};
use crate::rendezvous::GasRendezvous;
use crate::storage::StorageCoordinator;
use crate::workers::{gas_transport, siphon, storage_ship};
use log::*;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const MAX_TRANSPORTS: usize = 2;
const MAX_STORAGE_SHIPS: usize = 2;

/// Route plan produced by DryRun mode instead of spawning workers.
#[derive(Debug, Clone)]
pub struct PlannedSegment {
    pub ship_symbol: String,
    pub from: WaypointSymbol,
    pub to: WaypointSymbol,
    pub travel_duration: i64,
}

/// Owns the gas operation at the system's gas giant: one SIPHON_WORKER per
/// siphon-mounted ship, transports and storage ships from the idle hauler
/// pool, and the rendezvous loop that pairs them up.
pub struct GasCoordinator {
    ctx: CoordinatorContext,
    storage: Arc<StorageCoordinator>,
    rendezvous: Arc<GasRendezvous>,
}

impl GasCoordinator {
    pub fn new(
        ctx: &CoordinatorContext,
        storage: &Arc<StorageCoordinator>,
        rendezvous: &Arc<GasRendezvous>,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            storage: storage.clone(),
            rendezvous: rendezvous.clone(),
        }
    }

    pub async fn run(&self, coordinator_id: &str, token: CancellationToken) -> Result<()> {
        info!("Starting gas coordinator {}", coordinator_id);
        for container_type in [
            ContainerType::SiphonWorker,
            ContainerType::GasTransportWorker,
            ContainerType::StorageShipWorker,
        ] {
            self.ctx.cleanup_stale_workers(container_type).await;
        }
        let gas_giant = match self.ctx.universe.get_gas_giant(&self.ctx.system).await? {
            Some(gas_giant) => gas_giant,
            None => {
                warn!("No gas giant in {}; gas operation idle", self.ctx.system);
                return Ok(());
            }
        };

        let fleet = self.ctx.fleet_snapshot();
        let siphon_ships = self
            .ctx
            .registry
            .find_idle_of_kind(&fleet, |s| s.has_siphon_mount())
            .await;
        let haulers = self
            .ctx
            .registry
            .find_idle_of_kind(&fleet, |s| s.is_hauler() && !s.is_command_ship())
            .await;
        let transports: Vec<Ship> = haulers.iter().take(MAX_TRANSPORTS).cloned().collect();
        let storage_ships: Vec<Ship> = haulers
            .iter()
            .skip(MAX_TRANSPORTS)
            .take(MAX_STORAGE_SHIPS)
            .cloned()
            .collect();

        if CONFIG.gas_dry_run {
            let plan = self
                .dry_run(&gas_giant, &siphon_ships, &transports, &storage_ships)
                .await?;
            for segment in &plan {
                info!(
                    "DryRun: {} {} -> {} ({}s)",
                    segment.ship_symbol, segment.from, segment.to, segment.travel_duration
                );
            }
            return Ok(());
        }

        if siphon_ships.is_empty() {
            warn!("No siphon-mounted ships idle; gas operation idle");
            return Ok(());
        }

        // pool the ships under the coordinator first; each is then moved to
        // its worker with an atomic transfer (no unowned window)
        for ship in siphon_ships
            .iter()
            .chain(&transports)
            .chain(&storage_ships)
        {
            if let Err(e) = self.ctx.registry.assign(&ship.symbol, coordinator_id).await {
                warn!("Could not pool {} for gas duty: {}", ship.symbol, e);
            }
        }

        let (completion_tx, mut completion_rx) = completion_channel();
        let mut worker_ids = vec![];
        if CONFIG
            .worker_filter
            .is_match(&ContainerType::SiphonWorker.to_string())
        {
            for ship in &siphon_ships {
                let deps = siphon::SiphonDeps {
                    gas_giant: gas_giant.clone(),
                    storage: self.storage.clone(),
                    rendezvous: self.rendezvous.clone(),
                };
                match self
                    .spawn_worker(
                        coordinator_id,
                        ContainerType::SiphonWorker,
                        ship,
                        &completion_tx,
                        move |controller| siphon::run(controller, deps),
                    )
                    .await
                {
                    Ok(id) => worker_ids.push(id),
                    Err(e) => warn!("Siphon worker for {} not started: {}", ship.symbol, e),
                }
            }
        }
        if CONFIG
            .worker_filter
            .is_match(&ContainerType::GasTransportWorker.to_string())
        {
            for ship in &transports {
                let deps = gas_transport::GasTransportDeps {
                    gas_giant: gas_giant.clone(),
                    rendezvous: self.rendezvous.clone(),
                };
                match self
                    .spawn_worker(
                        coordinator_id,
                        ContainerType::GasTransportWorker,
                        ship,
                        &completion_tx,
                        move |controller| gas_transport::run(controller, deps),
                    )
                    .await
                {
                    Ok(id) => worker_ids.push(id),
                    Err(e) => warn!("Transport worker for {} not started: {}", ship.symbol, e),
                }
            }
        }
        if CONFIG
            .worker_filter
            .is_match(&ContainerType::StorageShipWorker.to_string())
        {
            for ship in &storage_ships {
                let deps = storage_ship::StorageShipDeps {
                    gas_giant: gas_giant.clone(),
                    storage: self.storage.clone(),
                };
                match self
                    .spawn_worker(
                        coordinator_id,
                        ContainerType::StorageShipWorker,
                        ship,
                        &completion_tx,
                        move |controller| storage_ship::run(controller, deps),
                    )
                    .await
                {
                    Ok(id) => worker_ids.push(id),
                    Err(e) => warn!("Storage worker for {} not started: {}", ship.symbol, e),
                }
            }
        }
        info!(
            "Gas operation at {}: {} siphons, {} transports, {} storage ships",
            gas_giant,
            siphon_ships.len(),
            transports.len(),
            storage_ships.len()
        );

        // the coordinator's loop is the rendezvous itself
        let rendezvous_handle = {
            let rendezvous = self.rendezvous.clone();
            tokio::spawn(async move { rendezvous.run().await })
        };

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                signal = completion_rx.recv() => {
                    match signal {
                        Some(signal) => {
                            // long-running workers only return on failure
                            warn!("Gas worker {} exited", signal.container_id);
                            if let Some(ship) = &signal.ship_symbol {
                                self.ctx.registry.release(ship, "gas worker exited").await;
                            }
                            self.ctx.containers.remove(&signal.container_id).await;
                        }
                        None => break,
                    }
                }
            }
        }

        // context done: stop all workers, release all assignments
        info!("Gas coordinator {} shutting down", coordinator_id);
        self.rendezvous.terminate().await;
        let _ = rendezvous_handle.await;
        for worker_id in &worker_ids {
            self.ctx.containers.stop(worker_id).await;
            for ship in self.ctx.registry.find_by_container(worker_id).await {
                self.ctx.registry.release(&ship, "coordinator shutdown").await;
            }
        }
        for ship in self.ctx.registry.find_by_container(coordinator_id).await {
            self.ctx.registry.release(&ship, "coordinator shutdown").await;
        }
        Ok(())
    }

    async fn spawn_worker<F, Fut>(
        &self,
        coordinator_id: &str,
        container_type: ContainerType,
        ship: &Ship,
        completion_tx: &crate::container_manager::CompletionSender,
        worker: F,
    ) -> Result<String>
    where
        F: FnOnce(crate::ship_controller::ShipController) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let record = ContainerRecord::new(
            container_type,
            Some(coordinator_id),
            &self.ctx.player_id,
            json!({ "ship": ship.symbol }),
        );
        self.ctx.containers.persist(&record).await;
        if let Err(e) = self
            .ctx
            .registry
            .transfer(&ship.symbol, coordinator_id, &record.id)
            .await
        {
            self.ctx.containers.remove(&record.id).await;
            return Err(e);
        }

        let ctx = self.ctx.clone();
        let ship_symbol = ship.symbol.clone();
        let container_id = record.id.clone();
        self.ctx
            .containers
            .start(
                &record.id,
                Some(ship.symbol.clone()),
                Some(completion_tx.clone()),
                move |token| {
                    let controller = ctx.ship_controller(&ship_symbol, &container_id, token);
                    worker(controller)
                },
            )
            .await;
        Ok(record.id)
    }

    /// Plan the approach routes without touching any ship.
    async fn dry_run(
        &self,
        gas_giant: &WaypointSymbol,
        siphon_ships: &[Ship],
        transports: &[Ship],
        storage_ships: &[Ship],
    ) -> Result<Vec<PlannedSegment>> {
        let mut plan = vec![];
        for ship in siphon_ships.iter().chain(transports).chain(storage_ships) {
            if ship.nav.waypoint_symbol == *gas_giant {
                continue;
            }
            let route = self
                .ctx
                .universe
                .get_route(
                    &ship.nav.waypoint_symbol,
                    gas_giant,
                    ship.engine.speed,
                    ship.fuel.current,
                    ship.fuel.capacity,
                )
                .await?;
            let mut from = ship.nav.waypoint_symbol.clone();
            for leg in route.legs {
                plan.push(PlannedSegment {
                    ship_symbol: ship.symbol.clone(),
                    from: from.clone(),
                    to: leg.to.clone(),
                    travel_duration: leg.travel_duration,
                });
                from = leg.to;
            }
        }
        Ok(plan)
    }
}
