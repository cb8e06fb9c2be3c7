use crate::error::Result;
use crate::util;
use log::*;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How often a waiting hauler re-checks storage inventory. Also the pause
/// when every storage ship is full.
const STORAGE_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DepositEvent {
    pub good: String,
    pub units: i64,
}

#[derive(Debug, Clone)]
struct Reservation {
    good: String,
    units: i64,
    hauler: String,
}

#[derive(Debug, Default)]
struct StorageShipState {
    capacity: i64,
    inventory: BTreeMap<String, i64>,
    reservations: Vec<Reservation>,
    deposit_tx: Option<mpsc::Sender<DepositEvent>>,
}

impl StorageShipState {
    fn inventory_total(&self) -> i64 {
        self.inventory.values().sum()
    }

    fn available_space(&self) -> i64 {
        self.capacity - self.inventory_total()
    }

    fn reserved(&self, good: &str) -> i64 {
        self.reservations
            .iter()
            .filter(|r| r.good == good)
            .map(|r| r.units)
            .sum()
    }

    fn reservable(&self, good: &str) -> i64 {
        self.inventory.get(good).copied().unwrap_or(0) - self.reserved(good)
    }

    // Invariant: reservations never exceed inventory, per good
    fn check(&self, symbol: &str) {
        for good in self.inventory.keys() {
            debug_assert!(
                self.reserved(good) <= self.inventory[good],
                "storage {}: reservations exceed inventory for {}",
                symbol,
                good
            );
        }
    }
}

/// Registry of storage ships parked at the gas giant, acting as cargo sinks
/// for siphon drones and cargo sources for manufacturing haulers. Tracks
/// inventory and per-hauler reservations; reads dominate, so a plain
/// reader-writer lock guards the registry.
#[derive(Default)]
pub struct StorageCoordinator {
    ships: RwLock<BTreeMap<String, StorageShipState>>,
}

impl StorageCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_storage_ship(
        &self,
        symbol: &str,
        capacity: i64,
        inventory: BTreeMap<String, i64>,
    ) {
        info!(
            "Registering storage ship {} ({}/{} used)",
            symbol,
            inventory.values().sum::<i64>(),
            capacity
        );
        let mut ships = self.ships.write().unwrap();
        ships.insert(
            symbol.to_string(),
            StorageShipState {
                capacity,
                inventory,
                reservations: vec![],
                deposit_tx: None,
            },
        );
    }

    pub fn unregister_storage_ship(&self, symbol: &str) {
        info!("Unregistering storage ship {}", symbol);
        let mut ships = self.ships.write().unwrap();
        ships.remove(symbol);
    }

    /// A storage ship able to take `min_units` more cargo, preferring the
    /// fullest so deposits concentrate.
    pub fn find_storage_ship_with_space(&self, min_units: i64) -> Option<String> {
        let ships = self.ships.read().unwrap();
        ships
            .iter()
            .filter(|(_, state)| state.available_space() >= min_units)
            .max_by_key(|(_, state)| state.inventory_total())
            .map(|(symbol, _)| symbol.clone())
    }

    /// Per-ship deposit stream for the storage-ship worker. Re-subscribing
    /// replaces the previous stream.
    pub fn subscribe_to_deposits(&self, symbol: &str) -> mpsc::Receiver<DepositEvent> {
        let (tx, rx) = mpsc::channel::<DepositEvent>(16);
        let mut ships = self.ships.write().unwrap();
        if let Some(state) = ships.get_mut(symbol) {
            state.deposit_tx = Some(tx);
        }
        rx
    }

    pub fn unsubscribe(&self, symbol: &str) {
        let mut ships = self.ships.write().unwrap();
        if let Some(state) = ships.get_mut(symbol) {
            state.deposit_tx = None;
        }
    }

    /// A siphon ship deposited cargo into `symbol`.
    pub fn notify_cargo_deposited(&self, symbol: &str, good: &str, units: i64) {
        let mut ships = self.ships.write().unwrap();
        let state = match ships.get_mut(symbol) {
            Some(state) => state,
            None => {
                warn!("Deposit notification for unknown storage ship {}", symbol);
                return;
            }
        };
        *state.inventory.entry(good.to_string()).or_insert(0) += units;
        state.check(symbol);
        if let Some(tx) = &state.deposit_tx {
            let event = DepositEvent {
                good: good.to_string(),
                units,
            };
            if tx.try_send(event).is_err() {
                debug!("Storage ship {} not consuming deposit events", symbol);
            }
        }
    }

    /// The storage-ship worker jettisoned cargo (byproduct cleanup).
    /// Reserved units are never jettisoned away.
    pub fn notify_cargo_jettisoned(&self, symbol: &str, good: &str, units: i64) {
        let mut ships = self.ships.write().unwrap();
        let state = match ships.get_mut(symbol) {
            Some(state) => state,
            None => return,
        };
        let held = state.inventory.get(good).copied().unwrap_or(0);
        let reserved = state.reserved(good);
        let removable = (held - reserved).min(units);
        if removable < units {
            warn!(
                "Storage {}: jettison of {} {} clamped to {} (reserved {})",
                symbol, units, good, removable, reserved
            );
        }
        if removable > 0 {
            *state.inventory.entry(good.to_string()).or_insert(0) -= removable;
        }
        state.check(symbol);
    }

    /// Block until some storage ship has at least `min_units` of `good`
    /// reservable, then reserve up to `max_units` for `hauler` and return
    /// `(ship, reserved_units)`. `min_units` is deliberately small (1) so a
    /// hauler is never deadlocked by storage full of another good.
    pub async fn wait_for_cargo(
        &self,
        token: &CancellationToken,
        op_id: &str,
        good: &str,
        min_units: i64,
        max_units: i64,
        hauler: &str,
    ) -> Result<(String, i64)> {
        loop {
            {
                let mut ships = self.ships.write().unwrap();
                let candidate = ships
                    .iter()
                    .map(|(symbol, state)| (symbol.clone(), state.reservable(good)))
                    .filter(|(_, reservable)| *reservable >= min_units)
                    .max_by_key(|(_, reservable)| *reservable);
                if let Some((symbol, reservable)) = candidate {
                    let units = reservable.min(max_units);
                    let state = ships.get_mut(&symbol).unwrap();
                    state.reservations.push(Reservation {
                        good: good.to_string(),
                        units,
                        hauler: hauler.to_string(),
                    });
                    state.check(&symbol);
                    debug!(
                        "[{}] reserved {} {} on {} for {}",
                        op_id, units, good, symbol, hauler
                    );
                    return Ok((symbol, units));
                }
            }
            util::sleep(token, STORAGE_POLL_INTERVAL).await?;
        }
    }

    /// Transfer done: drop the reservation and deduct the units.
    pub fn confirm_transfer(&self, symbol: &str, good: &str, units: i64, hauler: &str) {
        let mut ships = self.ships.write().unwrap();
        let state = match ships.get_mut(symbol) {
            Some(state) => state,
            None => return,
        };
        remove_reservation(state, good, units, hauler);
        let held = state.inventory.entry(good.to_string()).or_insert(0);
        *held -= units.min(*held);
        state.check(symbol);
    }

    /// Transfer failed: drop the reservation, inventory stays.
    pub fn cancel_reservation(&self, symbol: &str, good: &str, units: i64, hauler: &str) {
        let mut ships = self.ships.write().unwrap();
        let state = match ships.get_mut(symbol) {
            Some(state) => state,
            None => return,
        };
        remove_reservation(state, good, units, hauler);
        state.check(symbol);
    }

    pub fn registered_ships(&self) -> Vec<String> {
        self.ships.read().unwrap().keys().cloned().collect()
    }

    #[cfg(test)]
    fn reserved_total(&self, symbol: &str, good: &str) -> i64 {
        let ships = self.ships.read().unwrap();
        ships.get(symbol).map(|s| s.reserved(good)).unwrap_or(0)
    }

    #[cfg(test)]
    fn inventory_of(&self, symbol: &str, good: &str) -> i64 {
        let ships = self.ships.read().unwrap();
        ships
            .get(symbol)
            .and_then(|s| s.inventory.get(good).copied())
            .unwrap_or(0)
    }
}

fn remove_reservation(state: &mut StorageShipState, good: &str, units: i64, hauler: &str) {
    let index = state
        .reservations
        .iter()
        .position(|r| r.good == good && r.units == units && r.hauler == hauler);
    match index {
        Some(index) => {
            state.reservations.remove(index);
        }
        None => warn!(
            "No matching reservation ({} {} for {}) to remove",
            units, good, hauler
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    fn coordinator_with_ship(symbol: &str, capacity: i64) -> StorageCoordinator {
        let coordinator = StorageCoordinator::new();
        coordinator.register_storage_ship(symbol, capacity, BTreeMap::new());
        coordinator
    }

    #[tokio::test]
    async fn test_reservation_conservation() {
        let coordinator = coordinator_with_ship("STORE-1", 100);
        coordinator.notify_cargo_deposited("STORE-1", "LIQUID_HYDROGEN", 40);

        let token = CancellationToken::new();
        let (ship, reserved) = coordinator
            .wait_for_cargo(&token, "op-1", "LIQUID_HYDROGEN", 1, 25, "HAULER-1")
            .await
            .unwrap();
        assert_eq!(ship, "STORE-1");
        assert_eq!(reserved, 25);
        assert!(
            coordinator.reserved_total("STORE-1", "LIQUID_HYDROGEN")
                <= coordinator.inventory_of("STORE-1", "LIQUID_HYDROGEN")
        );

        // cancel restores reservable units, inventory untouched
        coordinator.cancel_reservation("STORE-1", "LIQUID_HYDROGEN", 25, "HAULER-1");
        assert_eq!(coordinator.reserved_total("STORE-1", "LIQUID_HYDROGEN"), 0);
        assert_eq!(coordinator.inventory_of("STORE-1", "LIQUID_HYDROGEN"), 40);

        // confirm removes both reservation and inventory
        let (_, reserved) = coordinator
            .wait_for_cargo(&token, "op-1", "LIQUID_HYDROGEN", 1, 40, "HAULER-1")
            .await
            .unwrap();
        assert_eq!(reserved, 40);
        coordinator.confirm_transfer("STORE-1", "LIQUID_HYDROGEN", 40, "HAULER-1");
        assert_eq!(coordinator.inventory_of("STORE-1", "LIQUID_HYDROGEN"), 0);
        assert_eq!(coordinator.reserved_total("STORE-1", "LIQUID_HYDROGEN"), 0);
    }

    #[tokio::test]
    async fn test_jettison_never_eats_reservations() {
        let coordinator = coordinator_with_ship("STORE-1", 100);
        coordinator.notify_cargo_deposited("STORE-1", "HYDROCARBON", 30);

        let token = CancellationToken::new();
        let (_, reserved) = coordinator
            .wait_for_cargo(&token, "op-1", "HYDROCARBON", 1, 20, "HAULER-1")
            .await
            .unwrap();
        assert_eq!(reserved, 20);

        // 30 held, 20 reserved: only 10 may be jettisoned
        coordinator.notify_cargo_jettisoned("STORE-1", "HYDROCARBON", 30);
        assert_eq!(coordinator.inventory_of("STORE-1", "HYDROCARBON"), 20);
        assert_eq!(coordinator.reserved_total("STORE-1", "HYDROCARBON"), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_cargo_blocks_until_deposit() {
        let coordinator = std::sync::Arc::new(coordinator_with_ship("STORE-1", 100));
        let token = CancellationToken::new();

        let waiter = {
            let coordinator = coordinator.clone();
            let token = token.clone();
            tokio::spawn(async move {
                coordinator
                    .wait_for_cargo(&token, "op-1", "LIQUID_NITROGEN", 1, 10, "HAULER-1")
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        coordinator.notify_cargo_deposited("STORE-1", "LIQUID_NITROGEN", 5);
        let (ship, units) = tokio::time::timeout(Duration::from_secs(10), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(ship, "STORE-1");
        assert_eq!(units, 5);
    }

    #[tokio::test]
    async fn test_deposit_stream() {
        let coordinator = coordinator_with_ship("STORE-1", 100);
        let mut rx = coordinator.subscribe_to_deposits("STORE-1");
        coordinator.notify_cargo_deposited("STORE-1", "HYDROCARBON", 7);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.good, "HYDROCARBON");
        assert_eq!(event.units, 7);
    }

    #[tokio::test]
    async fn test_space_prefers_fullest_ship() {
        let coordinator = StorageCoordinator::new();
        coordinator.register_storage_ship("STORE-1", 100, BTreeMap::new());
        coordinator.register_storage_ship("STORE-2", 100, BTreeMap::new());
        coordinator.notify_cargo_deposited("STORE-2", "LIQUID_HYDROGEN", 60);

        assert_eq!(
            coordinator.find_storage_ship_with_space(10),
            Some("STORE-2".to_string())
        );
        // STORE-2 can no longer take 50 units
        assert_eq!(
            coordinator.find_storage_ship_with_space(50),
            Some("STORE-1".to_string())
        );
    }
}
