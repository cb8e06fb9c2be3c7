use crate::api_client::api_models::{DeliverContractResponse, SiphonResponse};
use crate::api_client::{ApiClient, ApiError};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::models::ShipNavStatus::*;
use crate::models::*;
use crate::universe::Universe;
use crate::util;
use log::*;
use std::cmp::min;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DOCK_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// One ship's API surface. The in-memory `Ship` is authoritative only
/// between `reload` calls; every mutation mirrors the API response back
/// into it. All waits select on the worker's cancellation token.
#[derive(Clone)]
pub struct ShipController {
    pub ship_symbol: String,
    ship: Arc<Mutex<Ship>>,

    api_client: ApiClient,
    pub universe: Universe,
    ledger: Arc<Ledger>,
    container_id: String,
    token: CancellationToken,
}

impl ShipController {
    pub fn new(
        api_client: &ApiClient,
        universe: &Universe,
        ledger: &Arc<Ledger>,
        ship: Arc<Mutex<Ship>>,
        container_id: &str,
        token: CancellationToken,
    ) -> ShipController {
        let symbol = ship.lock().unwrap().symbol.clone();
        ShipController {
            api_client: api_client.clone(),
            universe: universe.clone(),
            ledger: ledger.clone(),
            ship,
            ship_symbol: symbol,
            container_id: container_id.to_string(),
            token,
        }
    }

    pub fn ship(&self) -> Ship {
        self.ship.lock().unwrap().clone()
    }
    pub fn symbol(&self) -> String {
        self.ship_symbol.clone()
    }
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
    pub fn container_id(&self) -> &str {
        &self.container_id
    }
    pub fn nav_status(&self) -> ShipNavStatus {
        self.ship.lock().unwrap().nav.status.clone()
    }
    pub fn flight_mode(&self) -> ShipFlightMode {
        self.ship.lock().unwrap().nav.flight_mode.clone()
    }
    pub fn waypoint(&self) -> WaypointSymbol {
        self.ship.lock().unwrap().nav.waypoint_symbol.clone()
    }
    pub fn system(&self) -> SystemSymbol {
        self.ship.lock().unwrap().nav.system_symbol.clone()
    }
    pub fn engine_speed(&self) -> i64 {
        self.ship.lock().unwrap().engine.speed
    }
    pub fn fuel_capacity(&self) -> i64 {
        self.ship.lock().unwrap().fuel.capacity
    }
    pub fn current_fuel(&self) -> i64 {
        self.ship.lock().unwrap().fuel.current
    }
    pub fn cargo_capacity(&self) -> i64 {
        self.ship.lock().unwrap().cargo.capacity
    }
    pub fn cargo_units(&self) -> i64 {
        self.ship.lock().unwrap().cargo.units
    }
    pub fn cargo_empty(&self) -> bool {
        self.cargo_units() == 0
    }
    pub fn cargo_space_available(&self) -> i64 {
        let ship = self.ship.lock().unwrap();
        ship.cargo.capacity - ship.cargo.units
    }
    pub fn cargo_good_count(&self, good: &str) -> i64 {
        self.ship.lock().unwrap().cargo_good_count(good)
    }
    pub fn cargo_map(&self) -> std::collections::BTreeMap<String, i64> {
        let ship = self.ship.lock().unwrap();
        ship.cargo
            .inventory
            .iter()
            .map(|g| (g.symbol.clone(), g.units))
            .collect()
    }
    pub fn cargo_first_item(&self) -> Option<ShipCargoItem> {
        self.ship.lock().unwrap().cargo.inventory.first().cloned()
    }

    pub fn debug(&self, msg: &str) {
        debug!("[{}] {}", self.ship_symbol, msg);
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn update_nav(&self, nav: ShipNav) {
        self.ship.lock().unwrap().nav = nav;
    }
    fn update_fuel(&self, fuel: ShipFuel) {
        self.ship.lock().unwrap().fuel = fuel;
    }
    pub fn update_cargo(&self, cargo: ShipCargo) {
        self.ship.lock().unwrap().cargo = cargo;
    }
    fn update_cooldown(&self, cooldown: ShipCooldown) {
        self.ship.lock().unwrap().cooldown = cooldown;
    }

    /// Replace the local snapshot with fresh state from the API. Workers
    /// call this before checking preconditions.
    pub async fn reload(&self) -> Result<Ship> {
        self.check_cancelled()?;
        let ship = self.api_client.get_ship(&self.ship_symbol).await?;
        *self.ship.lock().unwrap() = ship.clone();
        Ok(ship)
    }

    pub fn is_in_transit(&self) -> bool {
        let arrival = self.ship.lock().unwrap().nav.route.arrival;
        arrival >= chrono::Utc::now()
    }

    pub async fn wait_for_transit(&self) -> Result<()> {
        let arrival = { self.ship.lock().unwrap().nav.route.arrival };
        let wait = arrival - chrono::Utc::now() + chrono::Duration::seconds(1);
        if wait > chrono::Duration::zero() {
            self.debug(&format!("Waiting for transit: {} seconds", wait.num_seconds()));
            util::sleep(&self.token, wait.to_std().unwrap()).await?;
        }
        let mut ship = self.ship.lock().unwrap();
        if ship.nav.status == InTransit {
            ship.nav.status = InOrbit;
        }
        Ok(())
    }

    pub async fn wait_for_cooldown(&self) -> Result<()> {
        let cooldown = { self.ship.lock().unwrap().cooldown.clone() };
        if let Some(expiration) = cooldown.expiration {
            let wait = expiration - chrono::Utc::now() + chrono::Duration::seconds(1);
            if wait > chrono::Duration::zero() {
                self.debug(&format!(
                    "Waiting for cooldown: {} seconds",
                    wait.num_seconds()
                ));
                util::sleep(&self.token, wait.to_std().unwrap()).await?;
            }
        }
        Ok(())
    }

    pub async fn orbit(&self) -> Result<()> {
        if self.nav_status() == InOrbit {
            return Ok(());
        }
        self.check_cancelled()?;
        let nav = self.api_client.orbit_ship(&self.ship_symbol).await?;
        self.update_nav(nav);
        Ok(())
    }

    pub async fn dock(&self) -> Result<()> {
        if self.nav_status() == Docked {
            return Ok(());
        }
        self.check_cancelled()?;
        let nav = self.api_client.dock_ship(&self.ship_symbol).await?;
        self.update_nav(nav);
        Ok(())
    }

    pub async fn set_flight_mode(&self, mode: ShipFlightMode) -> Result<()> {
        if self.flight_mode() == mode {
            return Ok(());
        }
        self.check_cancelled()?;
        self.debug(&format!("Setting flight mode to {:?}", mode));
        let response = self
            .api_client
            .set_flight_mode(&self.ship_symbol, &mode)
            .await?;
        self.update_nav(response.nav);
        self.update_fuel(response.fuel);
        Ok(())
    }

    async fn navigate(&self, flight_mode: ShipFlightMode, waypoint: &WaypointSymbol) -> Result<()> {
        if self.waypoint() == *waypoint {
            return Ok(());
        }
        assert_eq!(self.waypoint().system(), waypoint.system());
        self.set_flight_mode(flight_mode).await?;
        self.orbit().await?;
        self.check_cancelled()?;
        self.debug(&format!("Navigating to waypoint: {}", waypoint));
        let response = self
            .api_client
            .navigate_ship(&self.ship_symbol, waypoint)
            .await?;
        self.update_nav(response.nav);
        self.update_fuel(response.fuel);
        self.wait_for_transit().await?;
        Ok(())
    }

    /// Navigation between two waypoints, refuelling along the way.
    pub async fn goto_waypoint(&self, target: &WaypointSymbol) -> Result<()> {
        if self.is_in_transit() {
            self.wait_for_transit().await?;
        }
        if self.waypoint() == *target {
            return Ok(());
        }
        if self.fuel_capacity() == 0 {
            self.navigate(ShipFlightMode::Cruise, target).await?;
            return Ok(());
        }
        let route = self
            .universe
            .get_route(
                &self.waypoint(),
                target,
                self.engine_speed(),
                self.current_fuel(),
                self.fuel_capacity(),
            )
            .await?;
        for leg in &route.legs {
            // calculate fuel required before leaving
            let required_fuel = if leg.to_market {
                leg.fuel_cost
            } else {
                assert!(leg.to == *target);
                leg.fuel_cost + route.req_terminal_fuel
            };
            if self.current_fuel() < required_fuel {
                assert!(leg.from_market);
                self.refuel(required_fuel).await?;
            }
            self.navigate(leg.flight_mode.clone(), &leg.to).await?;
            self.debug(&format!("Arrived at waypoint: {}", leg.to));
        }
        Ok(())
    }

    /// Idempotent navigate-then-dock: skips navigation when already at the
    /// destination and waits out an in-flight transit before docking.
    pub async fn navigate_and_dock(&self, target: &WaypointSymbol) -> Result<()> {
        if self.waypoint() == *target {
            if self.is_in_transit() {
                // arrival is imminent; poll briefly rather than replan
                let deadline = tokio::time::Instant::now() + DOCK_POLL_TIMEOUT;
                while self.is_in_transit() && tokio::time::Instant::now() < deadline {
                    util::sleep(&self.token, Duration::from_secs(1)).await?;
                }
                if self.is_in_transit() {
                    self.wait_for_transit().await?;
                }
            }
        } else {
            self.goto_waypoint(target).await?;
        }
        self.dock().await
    }

    // Fuel is bought in multiples of 100, so refuel as the highest multiple
    // of 100, or exactly to the requirement if the rounding falls short.
    pub async fn refuel(&self, required_fuel: i64) -> Result<()> {
        assert!(
            required_fuel <= self.fuel_capacity(),
            "Ship can't hold that much fuel"
        );
        if self.current_fuel() >= required_fuel {
            return Ok(());
        }
        let current = self.current_fuel();
        let capacity = self.fuel_capacity();
        let units = {
            let missing_fuel = capacity - current;
            let units = (missing_fuel / 100) * 100;
            if units + current < required_fuel {
                missing_fuel
            } else {
                units
            }
        };
        self.dock().await?;
        self.check_cancelled()?;
        self.debug(&format!(
            "Refueling {} to {}/{}",
            units,
            current + units,
            capacity
        ));
        let response = self.api_client.refuel_ship(&self.ship_symbol, Some(units)).await?;
        self.update_fuel(response.fuel);
        self.ledger
            .record_transaction(Some(&self.container_id), &response.transaction);
        self.ledger.set_credits(response.agent.credits);
        Ok(())
    }

    /// Full refuel that swallows failures: factories frequently don't sell
    /// fuel, and a transport must not abort its round over it.
    pub async fn refuel_best_effort(&self) {
        if self.current_fuel() == self.fuel_capacity() {
            return;
        }
        if let Err(e) = self.try_full_refuel().await {
            warn!(
                "[{}] Refuel at {} failed (ignored): {}",
                self.ship_symbol,
                self.waypoint(),
                e
            );
        }
    }

    async fn try_full_refuel(&self) -> Result<()> {
        self.dock().await?;
        self.check_cancelled()?;
        let response = self.api_client.refuel_ship(&self.ship_symbol, None).await?;
        self.update_fuel(response.fuel);
        self.ledger
            .record_transaction(Some(&self.container_id), &response.transaction);
        self.ledger.set_credits(response.agent.credits);
        Ok(())
    }

    pub async fn buy_goods(&self, good: &str, units: i64) -> Result<MarketTransaction> {
        assert!(
            units <= self.cargo_space_available(),
            "Ship can't hold that much cargo"
        );
        self.dock().await?;
        self.check_cancelled()?;
        self.debug(&format!("Buying {} units of {}", units, good));
        let response = self
            .api_client
            .purchase_cargo(&self.ship_symbol, good, units)
            .await?;
        self.update_cargo(response.cargo);
        self.ledger.set_credits(response.agent.credits);
        self.ledger
            .record_transaction(Some(&self.container_id), &response.transaction);
        self.debug(&format!(
            "PURCHASE {} {} for ${} (total ${})",
            response.transaction.units,
            response.transaction.trade_symbol,
            response.transaction.price_per_unit,
            response.transaction.total_price
        ));
        Ok(response.transaction)
    }

    pub async fn sell_goods(&self, good: &str, units: i64) -> Result<MarketTransaction> {
        self.dock().await?;
        self.check_cancelled()?;
        self.debug(&format!("Selling {} units of {}", units, good));
        let response = self
            .api_client
            .sell_cargo(&self.ship_symbol, good, units)
            .await?;
        self.update_cargo(response.cargo);
        self.ledger.set_credits(response.agent.credits);
        self.ledger
            .record_transaction(Some(&self.container_id), &response.transaction);
        self.debug(&format!(
            "SELL {} {} for ${} (total ${})",
            response.transaction.units,
            response.transaction.trade_symbol,
            response.transaction.price_per_unit,
            response.transaction.total_price
        ));
        Ok(response.transaction)
    }

    pub async fn jettison_cargo(&self, good: &str, units: i64) -> Result<()> {
        self.check_cancelled()?;
        self.debug(&format!("Jettisoning {} {}", units, good));
        let cargo = self
            .api_client
            .jettison_cargo(&self.ship_symbol, good, units)
            .await?;
        self.update_cargo(cargo);
        Ok(())
    }

    /// Drop every cargo item except `keep`. Contract runs start with a
    /// clean hold so capacity math stays simple.
    pub async fn jettison_all_except(&self, keep: &str) -> Result<()> {
        let wrong: Vec<(String, i64)> = {
            let ship = self.ship.lock().unwrap();
            ship.cargo
                .inventory
                .iter()
                .filter(|item| item.symbol != keep)
                .map(|item| (item.symbol.clone(), item.units))
                .collect()
        };
        for (good, units) in wrong {
            self.jettison_cargo(&good, units).await?;
        }
        Ok(())
    }

    pub async fn transfer_cargo_to(&self, dest_ship: &str, good: &str, units: i64) -> Result<()> {
        self.check_cancelled()?;
        self.debug(&format!(
            "Transferring {} {} -> {}",
            units, good, dest_ship
        ));
        let response = self
            .api_client
            .transfer_cargo(&self.ship_symbol, dest_ship, good, units)
            .await?;
        self.update_cargo(response.cargo);
        Ok(())
    }

    /// Pull cargo from another of our ships (storage pickup). The transfer
    /// runs from the source ship's side; our own snapshot is reloaded after.
    pub async fn receive_cargo_from(
        &self,
        source_ship: &str,
        good: &str,
        units: i64,
    ) -> Result<()> {
        self.check_cancelled()?;
        self.debug(&format!(
            "Receiving {} {} from {}",
            units, good, source_ship
        ));
        self.api_client
            .transfer_cargo(source_ship, &self.ship_symbol, good, units)
            .await?;
        self.reload().await?;
        Ok(())
    }

    pub async fn negotiate_contract(&self) -> Result<Contract> {
        self.dock().await?;
        self.check_cancelled()?;
        self.debug("Negotiating contract");
        let contract = self
            .api_client
            .negotiate_contract(&self.ship_symbol)
            .await?;
        Ok(contract)
    }

    /// A single siphon action. Cooldown errors (code 4000) pass through to
    /// the caller, which parses the remaining seconds and retries in place.
    pub async fn siphon(&self) -> std::result::Result<SiphonResponse, ApiError> {
        self.debug("Siphoning");
        let response = self.api_client.siphon_resources(&self.ship_symbol).await?;
        self.update_cooldown(response.cooldown.clone());
        self.update_cargo(response.cargo.clone());
        self.debug(&format!(
            "Siphoned {} units of {}",
            response.siphon.yield_.units, response.siphon.yield_.symbol
        ));
        Ok(response)
    }

    pub async fn deliver_contract(
        &self,
        contract_id: &str,
        good: &str,
        units: i64,
    ) -> Result<DeliverContractResponse> {
        self.dock().await?;
        self.check_cancelled()?;
        self.debug(&format!(
            "Delivering {} {} for contract {}",
            units, good, contract_id
        ));
        let response = self
            .api_client
            .deliver_contract(contract_id, &self.ship_symbol, good, units)
            .await?;
        self.update_cargo(response.cargo.clone());
        Ok(response)
    }

    pub async fn supply_construction(&self, good: &str, units: i64) -> Result<Construction> {
        self.dock().await?;
        self.check_cancelled()?;
        self.debug(&format!("Constructing {} units of {}", units, good));
        let response = self
            .api_client
            .supply_construction(&self.waypoint(), &self.ship_symbol, good, units)
            .await?;
        self.update_cargo(response.cargo);
        self.universe.update_construction(&response.construction).await;
        Ok(response.construction)
    }

    pub async fn refresh_market(&self) -> Result<()> {
        let waypoint = self.waypoint();
        self.check_cancelled()?;
        self.debug(&format!("Refreshing market at waypoint {}", &waypoint));
        let market = self.api_client.get_market(&waypoint).await?;
        let market = WithTimestamp::<Market> {
            timestamp: chrono::Utc::now(),
            data: market,
        };
        self.universe.save_market(&waypoint, market).await;
        Ok(())
    }

    /// Current trade entry for `good` at the ship's waypoint.
    pub async fn local_trade_good(&self, good: &str) -> Result<MarketTradeGood> {
        let market = self
            .universe
            .get_market(&self.waypoint())
            .await
            .ok_or_else(|| Error::NoMarket(good.to_string()))?;
        market
            .data
            .trade_good(good)
            .cloned()
            .ok_or_else(|| Error::NoMarket(good.to_string()))
    }

    /// Sell every held good at the current market, chunked by trade volume.
    pub async fn sell_all_cargo(&self) -> Result<(i64, i64)> {
        self.refresh_market().await?;
        let mut units_sold = 0;
        let mut total_revenue = 0;
        while let Some(cargo_item) = self.cargo_first_item() {
            let trade = self.local_trade_good(&cargo_item.symbol).await?;
            let units = min(trade.trade_volume, cargo_item.units);
            assert!(units > 0);
            let transaction = self.sell_goods(&cargo_item.symbol, units).await?;
            units_sold += transaction.units;
            total_revenue += transaction.total_price;
            self.refresh_market().await?;
        }
        Ok((units_sold, total_revenue))
    }
}
