use crate::database::DbClient;
use crate::error::{Error, Result};
use crate::models::Ship;
use futures::future::BoxFuture;
use log::*;
use std::sync::Arc;

/// Storage seam for ship assignments. Production goes through the database
/// (single-statement claims); tests swap in the in-memory store and hammer
/// it from concurrent tasks.
pub trait AssignmentStore: Send + Sync {
    /// Insert iff no active assignment exists. Returns false when occupied.
    fn insert<'a>(
        &'a self,
        ship: &'a str,
        container: &'a str,
        player: &'a str,
    ) -> BoxFuture<'a, bool>;
    fn remove<'a>(&'a self, ship: &'a str, player: &'a str) -> BoxFuture<'a, ()>;
    /// Atomic ownership move: succeeds iff `from` is still the owner.
    fn transfer<'a>(
        &'a self,
        ship: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, bool>;
    fn by_container<'a>(
        &'a self,
        container: &'a str,
        player: &'a str,
    ) -> BoxFuture<'a, Vec<String>>;
    fn all<'a>(&'a self, player: &'a str) -> BoxFuture<'a, Vec<(String, String)>>;
}

pub struct DbAssignmentStore {
    db: DbClient,
}

impl DbAssignmentStore {
    pub fn new(db: &DbClient) -> Self {
        Self { db: db.clone() }
    }
}

impl AssignmentStore for DbAssignmentStore {
    fn insert<'a>(
        &'a self,
        ship: &'a str,
        container: &'a str,
        player: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.db.insert_assignment(ship, container, player).await })
    }
    fn remove<'a>(&'a self, ship: &'a str, player: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.db.delete_assignment(ship, player).await })
    }
    fn transfer<'a>(
        &'a self,
        ship: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.db.transfer_assignment(ship, from, to).await })
    }
    fn by_container<'a>(
        &'a self,
        container: &'a str,
        player: &'a str,
    ) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move { self.db.assignments_by_container(container, player).await })
    }
    fn all<'a>(&'a self, player: &'a str) -> BoxFuture<'a, Vec<(String, String)>> {
        Box::pin(async move { self.db.all_assignments(player).await })
    }
}

/// In-memory store with the same claim semantics, one mutex per map so the
/// compare-and-swap in `transfer` is indivisible.
#[derive(Default)]
pub struct MemAssignmentStore {
    map: std::sync::Mutex<std::collections::BTreeMap<String, String>>,
}

impl AssignmentStore for MemAssignmentStore {
    fn insert<'a>(
        &'a self,
        ship: &'a str,
        container: &'a str,
        _player: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let mut map = self.map.lock().unwrap();
            if map.contains_key(ship) {
                false
            } else {
                map.insert(ship.to_string(), container.to_string());
                true
            }
        })
    }
    fn remove<'a>(&'a self, ship: &'a str, _player: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.map.lock().unwrap().remove(ship);
        })
    }
    fn transfer<'a>(
        &'a self,
        ship: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let mut map = self.map.lock().unwrap();
            match map.get(ship) {
                Some(owner) if owner == from => {
                    map.insert(ship.to_string(), to.to_string());
                    true
                }
                _ => false,
            }
        })
    }
    fn by_container<'a>(
        &'a self,
        container: &'a str,
        _player: &'a str,
    ) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.map
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, c)| c.as_str() == container)
                .map(|(s, _)| s.clone())
                .collect()
        })
    }
    fn all<'a>(&'a self, _player: &'a str) -> BoxFuture<'a, Vec<(String, String)>> {
        Box::pin(async move {
            self.map
                .lock()
                .unwrap()
                .iter()
                .map(|(s, c)| (s.clone(), c.clone()))
                .collect()
        })
    }
}

/// Single source of truth for which container owns which ship. Coordinators
/// never assume ownership from having spawned a worker; they ask here.
#[derive(Clone)]
pub struct ShipAssignmentRegistry {
    player_id: String,
    store: Arc<dyn AssignmentStore>,
}

impl ShipAssignmentRegistry {
    pub fn new(player_id: &str, db: &DbClient) -> Self {
        Self {
            player_id: player_id.to_string(),
            store: Arc::new(DbAssignmentStore::new(db)),
        }
    }

    pub fn with_store(player_id: &str, store: Arc<dyn AssignmentStore>) -> Self {
        Self {
            player_id: player_id.to_string(),
            store,
        }
    }

    pub async fn assign(&self, ship_symbol: &str, container_id: &str) -> Result<()> {
        if self
            .store
            .insert(ship_symbol, container_id, &self.player_id)
            .await
        {
            info!("Assigned {} to {}", ship_symbol, container_id);
            Ok(())
        } else {
            Err(Error::ShipAlreadyAssigned(ship_symbol.to_string()))
        }
    }

    pub async fn release(&self, ship_symbol: &str, reason: &str) {
        info!("Releasing {} ({})", ship_symbol, reason);
        self.store.remove(ship_symbol, &self.player_id).await;
    }

    /// Move a ship between containers without a window in which neither
    /// holds it. Fails when `from_container` no longer owns the ship.
    pub async fn transfer(
        &self,
        ship_symbol: &str,
        from_container: &str,
        to_container: &str,
    ) -> Result<()> {
        if self
            .store
            .transfer(ship_symbol, from_container, to_container)
            .await
        {
            info!(
                "Transferred {} from {} to {}",
                ship_symbol, from_container, to_container
            );
            Ok(())
        } else {
            Err(Error::OwnerMismatch(ship_symbol.to_string()))
        }
    }

    pub async fn find_by_container(&self, container_id: &str) -> Vec<String> {
        self.store.by_container(container_id, &self.player_id).await
    }

    /// Ships from `fleet` with no active assignment whose attributes pass
    /// `predicate`. The fleet snapshot comes from the caller; assignment
    /// state comes from the store, which is authoritative.
    pub async fn find_idle_of_kind<F>(&self, fleet: &[Ship], predicate: F) -> Vec<Ship>
    where
        F: Fn(&Ship) -> bool,
    {
        let assigned: std::collections::BTreeSet<String> = self
            .store
            .all(&self.player_id)
            .await
            .into_iter()
            .map(|(ship, _)| ship)
            .collect();
        fleet
            .iter()
            .filter(|ship| !assigned.contains(&ship.symbol) && predicate(ship))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng as _;

    fn registry() -> ShipAssignmentRegistry {
        ShipAssignmentRegistry::with_store("PLAYER", Arc::new(MemAssignmentStore::default()))
    }

    #[tokio::test]
    async fn test_exclusive_assignment() {
        let registry = registry();
        registry.assign("SHIP-1", "container-a").await.unwrap();
        let err = registry.assign("SHIP-1", "container-b").await.unwrap_err();
        assert!(matches!(err, Error::ShipAlreadyAssigned(_)));

        registry.release("SHIP-1", "test").await;
        registry.assign("SHIP-1", "container-b").await.unwrap();
        assert_eq!(
            registry.find_by_container("container-b").await,
            vec!["SHIP-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        // many tasks race to claim the same ship; exactly one may win
        for _ in 0..20 {
            let registry = Arc::new(registry());
            let mut handles = vec![];
            for i in 0..8 {
                let registry = registry.clone();
                handles.push(tokio::spawn(async move {
                    registry.assign("SHIP-1", &format!("container-{}", i)).await
                }));
            }
            let mut wins = 0;
            for handle in handles {
                if handle.await.unwrap().is_ok() {
                    wins += 1;
                }
            }
            assert_eq!(wins, 1);
        }
    }

    #[tokio::test]
    async fn test_transfer_atomicity() {
        let registry = registry();
        registry.assign("SHIP-1", "coordinator").await.unwrap();

        // wrong owner: no ownership change, no unowned window
        let err = registry
            .transfer("SHIP-1", "not-the-owner", "worker-1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OwnerMismatch(_)));
        assert_eq!(
            registry.find_by_container("coordinator").await,
            vec!["SHIP-1".to_string()]
        );

        registry
            .transfer("SHIP-1", "coordinator", "worker-1")
            .await
            .unwrap();
        assert!(registry.find_by_container("coordinator").await.is_empty());
        assert_eq!(
            registry.find_by_container("worker-1").await,
            vec!["SHIP-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_random_schedules_keep_at_most_one_owner() {
        // random interleavings of assign/transfer/release across tasks;
        // after the dust settles the ship has 0 or 1 owner, and at no point
        // can two containers both claim it (transfer is a CAS)
        let store = Arc::new(MemAssignmentStore::default());
        let registry = ShipAssignmentRegistry::with_store("PLAYER", store.clone());
        let registry = Arc::new(registry);

        let mut handles = vec![];
        for i in 0..6 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let me = format!("container-{}", i);
                for _ in 0..50 {
                    let choice = { rand::rng().random_range(0..3) };
                    match choice {
                        0 => {
                            let _ = registry.assign("SHIP-1", &me).await;
                        }
                        1 => {
                            let _ = registry
                                .transfer("SHIP-1", &me, &format!("container-{}", (i + 1) % 6))
                                .await;
                        }
                        _ => {
                            let owners = registry.find_by_container(&me).await;
                            if !owners.is_empty() {
                                registry.release("SHIP-1", "test churn").await;
                            }
                        }
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let all = store.all("PLAYER").await;
        assert!(all.len() <= 1);
    }
}
