pub mod balancing;
pub mod contract;
pub mod gas;
pub mod manufacturing;

use crate::api_client::ApiClient;
use crate::container_manager::ContainerManager;
use crate::database::DbClient;
use crate::ledger::Ledger;
use crate::models::{Ship, SystemSymbol, WaypointSymbol};
use crate::registry::ShipAssignmentRegistry;
use crate::ship_controller::ShipController;
use crate::universe::Universe;
use crate::util::distance;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Everything a coordinator needs to own ships and run workers. The fleet
/// map holds the shared in-memory ship snapshots; the registry stays the
/// authority on who owns what.
#[derive(Clone)]
pub struct CoordinatorContext {
    pub player_id: String,
    pub system: SystemSymbol,
    pub api_client: ApiClient,
    pub db: DbClient,
    pub universe: Universe,
    pub ledger: Arc<Ledger>,
    pub registry: ShipAssignmentRegistry,
    pub containers: ContainerManager,
    pub fleet: Arc<DashMap<String, Arc<Mutex<Ship>>>>,
}

impl CoordinatorContext {
    pub fn fleet_snapshot(&self) -> Vec<Ship> {
        self.fleet
            .iter()
            .map(|entry| entry.value().lock().unwrap().clone())
            .collect()
    }

    pub fn ship_arc(&self, ship_symbol: &str) -> Option<Arc<Mutex<Ship>>> {
        self.fleet.get(ship_symbol).map(|entry| entry.value().clone())
    }

    /// Restart reconciliation: container rows still marked RUNNING that no
    /// live task backs are leftovers of a previous process. Their ships
    /// are released and the rows removed before any scheduling happens.
    pub async fn cleanup_stale_workers(&self, container_type: crate::models::ContainerType) {
        let workers = self.containers.find_running_workers(container_type).await;
        for worker in workers {
            if self.containers.is_running(&worker.id) {
                continue;
            }
            log::warn!("Cleaning up stale {} container {}", container_type, worker.id);
            for ship in self.registry.find_by_container(&worker.id).await {
                self.registry.release(&ship, "stale worker").await;
            }
            self.containers.remove(&worker.id).await;
        }
    }

    pub fn ship_controller(
        &self,
        ship_symbol: &str,
        container_id: &str,
        token: CancellationToken,
    ) -> ShipController {
        let ship = self
            .ship_arc(ship_symbol)
            .unwrap_or_else(|| panic!("Unknown ship {}", ship_symbol));
        ShipController::new(
            &self.api_client,
            &self.universe,
            &self.ledger,
            ship,
            container_id,
            token,
        )
    }
}

/// The ship closest to `target` (2-D Euclidean over waypoint coordinates),
/// ties broken in favour of ships already carrying `required_good`.
pub fn select_closest_ship(
    graph: &crate::universe::SystemGraph,
    ships: &[Ship],
    target: &WaypointSymbol,
    required_good: Option<&str>,
) -> Option<Ship> {
    let target_waypoint = match graph.waypoints.get(target) {
        Some(waypoint) => waypoint.clone(),
        None => return ships.first().cloned(),
    };
    ships
        .iter()
        .min_by_key(|ship| {
            let d = graph
                .waypoints
                .get(&ship.nav.waypoint_symbol)
                .map(|w| distance(w, &target_waypoint))
                .unwrap_or(i64::MAX);
            let carries_good = match required_good {
                Some(good) => ship.cargo_good_count(good) > 0,
                None => false,
            };
            // carrying the good wins ties
            (d, !carries_good, ship.symbol.clone())
        })
        .cloned()
}

#[cfg(test)]
mod test {
    use super::test_support::test_ship;
    use super::*;
    use crate::universe::{GraphWaypoint, SystemGraph};
    use std::collections::BTreeMap;

    fn graph(waypoints: &[(&str, i64, i64)]) -> SystemGraph {
        let waypoints = waypoints
            .iter()
            .map(|(symbol, x, y)| {
                let symbol = WaypointSymbol::new(symbol);
                (
                    symbol.clone(),
                    GraphWaypoint {
                        symbol,
                        x: *x,
                        y: *y,
                        has_fuel: true,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        SystemGraph { waypoints }
    }

    #[test]
    fn test_closest_ship_wins() {
        let graph = graph(&[
            ("X1-S1-A1", 0, 0),
            ("X1-S1-A2", 10, 0),
            ("X1-S1-A4", 100, 0),
        ]);
        let ships = vec![
            test_ship("SHIP-A", "X1-S1-A4", "HAULER", vec![]),
            test_ship("SHIP-B", "X1-S1-A1", "HAULER", vec![]),
        ];
        let selected =
            select_closest_ship(&graph, &ships, &WaypointSymbol::new("X1-S1-A2"), None).unwrap();
        assert_eq!(selected.symbol, "SHIP-B");
    }

    #[test]
    fn test_cargo_breaks_distance_ties() {
        let graph = graph(&[
            ("X1-S1-A1", 0, 0),
            ("X1-S1-A3", 0, 20),
            ("X1-S1-A2", 0, 10),
        ]);
        // equidistant from A2; SHIP-D already carries the contract good
        let ships = vec![
            test_ship("SHIP-C", "X1-S1-A1", "HAULER", vec![]),
            test_ship("SHIP-D", "X1-S1-A3", "HAULER", vec![("IRON", 5)]),
        ];
        let selected = select_closest_ship(
            &graph,
            &ships,
            &WaypointSymbol::new("X1-S1-A2"),
            Some("IRON"),
        )
        .unwrap();
        assert_eq!(selected.symbol, "SHIP-D");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::*;
    use chrono::Utc;

    /// Minimal plausible ship for selection tests.
    pub fn test_ship(symbol: &str, waypoint: &str, role: &str, cargo: Vec<(&str, i64)>) -> Ship {
        let waypoint = WaypointSymbol::new(waypoint);
        let units: i64 = cargo.iter().map(|(_, u)| u).sum();
        let route_waypoint = ShipNavRouteWaypoint {
            symbol: waypoint.clone(),
            waypoint_type: "PLANET".to_string(),
            system_symbol: waypoint.system(),
            x: 0,
            y: 0,
        };
        Ship {
            symbol: symbol.to_string(),
            nav: ShipNav {
                system_symbol: waypoint.system(),
                waypoint_symbol: waypoint.clone(),
                route: ShipNavRoute {
                    origin: route_waypoint.clone(),
                    destination: route_waypoint,
                    arrival: Utc::now(),
                    departure_time: Utc::now(),
                },
                status: ShipNavStatus::InOrbit,
                flight_mode: ShipFlightMode::Cruise,
            },
            crew: ShipCrew {
                current: 0,
                capacity: 0,
                required: 0,
                rotation: "STRICT".to_string(),
                morale: 100,
                wages: 0,
            },
            fuel: ShipFuel {
                current: 400,
                capacity: 400,
                consumed: ShipFuelConsumed {
                    amount: 0,
                    timestamp: Utc::now(),
                },
            },
            cooldown: ShipCooldown {
                ship_symbol: symbol.to_string(),
                total_seconds: 0,
                remaining_seconds: 0,
                expiration: None,
            },
            frame: ShipFrame {
                symbol: "FRAME_LIGHT_FREIGHTER".to_string(),
                name: String::new(),
                description: String::new(),
                module_slots: 4,
                mounting_points: 2,
                fuel_capacity: 400,
                condition: Some(1.0),
                integrity: Some(1.0),
                requirements: ShipRequirements::default(),
            },
            reactor: ShipReactor {
                symbol: "REACTOR_CHEMICAL_I".to_string(),
                name: String::new(),
                description: String::new(),
                condition: Some(1.0),
                integrity: Some(1.0),
                power_output: 10,
                requirements: ShipRequirements::default(),
            },
            engine: ShipEngine {
                symbol: "ENGINE_ION_DRIVE_I".to_string(),
                name: String::new(),
                description: String::new(),
                condition: Some(1.0),
                integrity: Some(1.0),
                speed: 30,
                requirements: ShipRequirements::default(),
            },
            modules: vec![],
            mounts: vec![],
            registration: ShipRegistration {
                name: symbol.to_string(),
                faction_symbol: "CORSAIRS".to_string(),
                role: role.to_string(),
            },
            cargo: ShipCargo {
                capacity: 40,
                units,
                inventory: cargo
                    .into_iter()
                    .map(|(good, units)| ShipCargoItem {
                        symbol: good.to_string(),
                        units,
                        name: good.to_string(),
                        description: String::new(),
                    })
                    .collect(),
            },
        }
    }
}
