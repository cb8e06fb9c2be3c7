use crate::container_manager::completion_channel;
use crate::coordinators::{balancing, select_closest_ship, CoordinatorContext};
use crate::error::{Error, Result};
use crate::models::{Contract, ContainerRecord, ContainerType, Ship};
use crate::util;
use crate::workers::contract_workflow;
use log::*;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const IDLE_WAIT: Duration = Duration::from_secs(30);
const OTHER_WORKER_WAIT: Duration = Duration::from_secs(60);
const WORKER_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const API_ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Drives the one-contract-at-a-time loop: find an idle hauler, make sure
/// no workflow worker is already out, check the market can source the
/// contract good, then hand the ship to a CONTRACT_WORKFLOW worker and
/// wait for it.
pub struct ContractCoordinator {
    ctx: CoordinatorContext,
}

impl ContractCoordinator {
    pub fn new(ctx: &CoordinatorContext) -> Self {
        Self { ctx: ctx.clone() }
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
        info!("Starting contract coordinator {}", coordinator_id);
        self.ctx
            .cleanup_stale_workers(ContainerType::ContractWorkflow)
            .await;
        let (completion_tx, mut completion_rx) = completion_channel();
        let mut previous_ship: Option<String> = None;

        loop {
            if token.is_cancelled() {
                break Ok(());
            }

            // 1. an idle light hauler, or the command ship as fallback
            let fleet = self.ctx.fleet_snapshot();
            let mut idle = self
                .ctx
                .registry
                .find_idle_of_kind(&fleet, |s| s.is_hauler() && !s.is_command_ship())
                .await;
            if idle.is_empty() {
                idle = self
                    .ctx
                    .registry
                    .find_idle_of_kind(&fleet, |s| s.is_command_ship())
                    .await;
            }
            if idle.is_empty() {
                debug!("No idle ship for contract work; waiting");
                util::recv_timeout(token, &mut completion_rx, IDLE_WAIT).await?;
                continue;
            }

            // 2. the game allows one active contract; never two workers
            let running = self
                .ctx
                .containers
                .find_running_workers(ContainerType::ContractWorkflow)
                .await;
            if !running.is_empty() {
                if let Some(signal) =
                    util::recv_timeout(token, &mut completion_rx, OTHER_WORKER_WAIT).await?
                {
                    self.finish_worker(&signal.container_id, signal.ship_symbol.as_deref())
                        .await;
                }
                continue;
            }

            // 3. current contract state (the worker negotiates when none)
            let contract = match self.current_contract().await {
                Ok(contract) => contract,
                Err(e) => {
                    warn!("Failed to load contracts: {}", e);
                    util::sleep(token, API_ERROR_BACKOFF).await?;
                    continue;
                }
            };

            if let Some(contract) = &contract {
                // 4. everything delivered already: just fulfil
                if contract.accepted && !contract.fulfilled && contract.all_deliveries_fulfilled()
                {
                    match self.ctx.api_client.fulfill_contract(&contract.id).await {
                        Ok(response) => {
                            self.ctx.ledger.set_credits(response.agent.credits);
                            info!("Fulfilled contract {} without deliveries", contract.id);
                        }
                        Err(e) => warn!("Fulfill of {} failed: {}", contract.id, e),
                    }
                    continue;
                }

                // single delivery index: the first unfinished line decides
                if let Some(deliver) = contract.first_unfinished_delivery() {
                    // 5. a purchase market must exist (scouts fill data in)
                    let market = self
                        .ctx
                        .universe
                        .find_purchase_market(&self.ctx.system, &deliver.trade_symbol)
                        .await?;
                    if market.is_none() {
                        debug!(
                            "No purchase market data for {}; waiting for scouts",
                            deliver.trade_symbol
                        );
                        util::sleep(token, API_ERROR_BACKOFF).await?;
                        continue;
                    }

                    // 6. cargo already riding toward the delivery counts
                    let in_flight = self.in_flight_cargo(&deliver.trade_symbol).await;
                    if in_flight >= deliver.units_remaining() {
                        debug!(
                            "{} units of {} already in flight; waiting",
                            in_flight, deliver.trade_symbol
                        );
                        if let Some(signal) =
                            util::recv_timeout(token, &mut completion_rx, WORKER_TIMEOUT).await?
                        {
                            self.finish_worker(
                                &signal.container_id,
                                signal.ship_symbol.as_deref(),
                            )
                            .await;
                        }
                        continue;
                    }
                }
            }

            // 7. closest ship wins; carrying the good breaks ties
            let good = contract
                .as_ref()
                .and_then(|c| c.first_unfinished_delivery())
                .map(|d| d.trade_symbol.clone());
            let selected = self.select_ship(&idle, &contract, good.as_deref()).await?;

            // 8. the ship we stopped using gets repositioned, best-effort
            if let Some(previous) = &previous_ship {
                if *previous != selected.symbol {
                    balancing::spawn_balancing_task(&self.ctx, coordinator_id, previous.clone());
                }
            }
            previous_ship = Some(selected.symbol.clone());

            // 9. persist container, assign ship, start; unwind on failure
            let container_id = match self.start_worker(coordinator_id, &selected, &completion_tx).await
            {
                Ok(container_id) => container_id,
                Err(e) => {
                    warn!("Failed to start contract workflow: {}", e);
                    util::sleep(token, Duration::from_secs(10)).await?;
                    continue;
                }
            };

            // 10. wait for the worker, bounded
            match util::recv_timeout(token, &mut completion_rx, WORKER_TIMEOUT).await {
                Ok(Some(signal)) => {
                    self.finish_worker(&signal.container_id, signal.ship_symbol.as_deref())
                        .await;
                }
                Ok(None) => {
                    warn!(
                        "Contract workflow {} exceeded {}s; retrying loop",
                        container_id,
                        WORKER_TIMEOUT.as_secs()
                    );
                }
                Err(e) => break Err(e),
            }
        }
    }

    async fn current_contract(&self) -> std::result::Result<Option<Contract>, crate::api_client::ApiError> {
        let contracts = self.ctx.api_client.get_contracts().await?;
        Ok(contracts.into_iter().find(|c| !c.fulfilled))
    }

    /// Units of `good` held by ships assigned to running workflow workers.
    async fn in_flight_cargo(&self, good: &str) -> i64 {
        let workers = self
            .ctx
            .containers
            .find_running_workers(ContainerType::ContractWorkflow)
            .await;
        let mut units = 0;
        for worker in workers {
            for ship_symbol in self.ctx.registry.find_by_container(&worker.id).await {
                if let Some(ship) = self.ctx.ship_arc(&ship_symbol) {
                    units += ship.lock().unwrap().cargo_good_count(good);
                }
            }
        }
        units
    }

    async fn select_ship(
        &self,
        idle: &[Ship],
        contract: &Option<Contract>,
        good: Option<&str>,
    ) -> Result<Ship> {
        let target = contract.as_ref().and_then(|c| {
            c.first_unfinished_delivery()
                .map(|d| d.destination_symbol.clone())
        });
        if let Some(target) = target {
            if let Some(good) = good {
                if let Some((market, _)) = self
                    .ctx
                    .universe
                    .find_purchase_market(&target.system(), good)
                    .await?
                {
                    let graph = self.ctx.universe.get_graph(&market.system()).await?;
                    if let Some(ship) = select_closest_ship(&graph, idle, &market, Some(good)) {
                        return Ok(ship);
                    }
                }
            }
        }
        Ok(idle[0].clone())
    }

    async fn start_worker(
        &self,
        coordinator_id: &str,
        ship: &Ship,
        completion_tx: &crate::container_manager::CompletionSender,
    ) -> Result<String> {
        let record = ContainerRecord::new(
            ContainerType::ContractWorkflow,
            Some(coordinator_id),
            &self.ctx.player_id,
            json!({ "ship": ship.symbol }),
        );
        self.ctx.containers.persist(&record).await;
        if let Err(e) = self.ctx.registry.assign(&ship.symbol, &record.id).await {
            self.ctx.containers.remove(&record.id).await;
            return Err(e);
        }

        let api_client = self.ctx.api_client.clone();
        let universe = self.ctx.universe.clone();
        let ledger = self.ctx.ledger.clone();
        let ship_arc = self
            .ctx
            .ship_arc(&ship.symbol)
            .expect("selected ship missing from fleet");
        let container_id = record.id.clone();
        self.ctx
            .containers
            .start(
                &record.id,
                Some(ship.symbol.clone()),
                Some(completion_tx.clone()),
                move |token| async move {
                    let controller = crate::ship_controller::ShipController::new(
                        &api_client,
                        &universe,
                        &ledger,
                        ship_arc,
                        &container_id,
                        token,
                    );
                    let outcome = contract_workflow::run(api_client.clone(), controller, ledger).await?;
                    debug!(
                        "Contract workflow outcome: accepted={} fulfilled={} trips={}",
                        outcome.accepted, outcome.fulfilled, outcome.total_trips
                    );
                    Ok(())
                },
            )
            .await;
        Ok(record.id)
    }

    /// Free a finished worker's resources before the next cycle.
    async fn finish_worker(&self, container_id: &str, ship_symbol: Option<&str>) {
        if let Some(ship_symbol) = ship_symbol {
            self.ctx
                .registry
                .release(ship_symbol, "contract workflow complete")
                .await;
        }
        self.ctx.containers.remove(container_id).await;
    }

    /// Cancellation obligations: stop every worker we started, release
    /// every assignment we hold.
    async fn shutdown(&self, coordinator_id: &str) {
        info!("Contract coordinator {} shutting down", coordinator_id);
        let workers = self
            .ctx
            .containers
            .find_running_workers(ContainerType::ContractWorkflow)
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
