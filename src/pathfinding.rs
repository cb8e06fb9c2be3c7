use crate::models::{ShipFlightMode, Waypoint, WaypointSymbol};
use crate::util::distance;
use std::collections::BTreeMap;
use std::sync::Arc;

const CRUISE_NAV_MODIFIER: f64 = 25.0;
const BURN_NAV_MODIFIER: f64 = 12.5;

#[derive(Debug)]
pub struct Pathfinding {
    waypoints: Arc<BTreeMap<WaypointSymbol, Waypoint>>,
    closest_market: BTreeMap<WaypointSymbol, (WaypointSymbol, i64)>,
}

#[derive(Debug, Clone)]
pub struct RouteLeg {
    pub to: WaypointSymbol,
    pub flight_mode: ShipFlightMode,
    pub fuel_cost: i64,
    pub travel_duration: i64,
    pub from_market: bool,
    pub to_market: bool,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub legs: Vec<RouteLeg>,
    pub min_travel_duration: i64,
    /// Fuel that must remain on arrival at a fuel-less destination to
    /// escape back to the closest market.
    pub req_terminal_fuel: i64,
}

struct Hop {
    distance: i64,
    travel_duration: i64,
    fuel_cost: i64,
    flight_mode: ShipFlightMode,
}

// Fastest single hop within the fuel limit: burn if affordable, else cruise
fn hop(a: &Waypoint, b: &Waypoint, speed: i64, fuel_max: i64) -> Option<Hop> {
    let distance = distance(a, b);
    if 2 * distance <= fuel_max {
        let travel_duration =
            (15.0 + BURN_NAV_MODIFIER / (speed as f64) * (distance as f64)).round() as i64;
        return Some(Hop {
            distance,
            travel_duration,
            fuel_cost: 2 * distance,
            flight_mode: ShipFlightMode::Burn,
        });
    }
    if distance <= fuel_max {
        let travel_duration =
            (15.0 + CRUISE_NAV_MODIFIER / (speed as f64) * (distance as f64)).round() as i64;
        return Some(Hop {
            distance,
            travel_duration,
            fuel_cost: distance,
            flight_mode: ShipFlightMode::Cruise,
        });
    }
    None
}

impl Pathfinding {
    pub fn new(waypoints: Vec<Waypoint>) -> Pathfinding {
        let mut waypoint_map: BTreeMap<WaypointSymbol, Waypoint> = BTreeMap::new();
        let mut closest_market: BTreeMap<WaypointSymbol, (WaypointSymbol, i64)> = BTreeMap::new();
        for waypoint in &waypoints {
            waypoint_map.insert(waypoint.symbol.clone(), waypoint.clone());
            if waypoint.is_market() {
                continue;
            }
            let closest = waypoints
                .iter()
                .filter(|w| w.is_market())
                .map(|w| (w.symbol.clone(), distance(waypoint, w)))
                .min_by_key(|(_symbol, distance)| *distance);
            if let Some(closest) = closest {
                closest_market.insert(waypoint.symbol.clone(), closest);
            }
        }
        Pathfinding {
            waypoints: Arc::new(waypoint_map),
            closest_market,
        }
    }

    /// Fueled route between two waypoints in one system. Hops run
    /// market-to-market so the ship can always refuel; a fuel-less
    /// endpoint is entered/left with enough reserve to escape.
    pub fn get_route(
        &self,
        src_symbol: &WaypointSymbol,
        dest_symbol: &WaypointSymbol,
        speed: i64,
        start_fuel: i64,
        fuel_capacity: i64,
    ) -> Route {
        use pathfinding::directed::dijkstra::dijkstra;

        let src = self.waypoints.get(src_symbol).unwrap();
        let dst = self.waypoints.get(dest_symbol).unwrap();
        let src_is_market = src.is_market();
        let dest_is_market = dst.is_market();
        let req_escape_fuel = if !dest_is_market {
            self.closest_market
                .get(dest_symbol)
                .map(|(_, d)| *d)
                .unwrap_or(0) // assumes CRUISE
        } else {
            0
        };

        // Route edge conditions:
        // - if src is not a market: the first hop must be <= start_fuel
        // - if dest is not a market, with the closest market X away,
        //   then the last hop must be <= max_fuel - X from a market
        //                          or <= start_fuel - X from a non-market src
        let path: (Vec<WaypointSymbol>, i64) = dijkstra(
            src_symbol,
            |x_symbol| {
                let x = self.waypoints.get(x_symbol).unwrap();
                let mut edges = if x.is_market() {
                    self.waypoints
                        .iter()
                        .filter(|(y_symbol, y)| y.is_market() && *y_symbol != x_symbol)
                        .filter_map(|(y_symbol, y)| {
                            hop(x, y, speed, fuel_capacity)
                                .map(|e| (y_symbol.clone(), e.travel_duration))
                        })
                        .collect::<Vec<_>>()
                } else {
                    vec![]
                };
                if !src_is_market && x_symbol == src_symbol {
                    let from_src = self
                        .waypoints
                        .iter()
                        .filter(|(_y_symbol, y)| y.is_market())
                        .filter_map(|(y_symbol, y)| {
                            hop(x, y, speed, start_fuel)
                                .map(|e| (y_symbol.clone(), e.travel_duration))
                        })
                        .collect::<Vec<_>>();
                    edges.extend(from_src);
                }
                if !dest_is_market && x_symbol != dest_symbol {
                    if let Some(e) = hop(x, dst, speed, fuel_capacity - req_escape_fuel) {
                        edges.push((dest_symbol.clone(), e.travel_duration));
                    }
                }
                if !src_is_market && !dest_is_market && x_symbol == src_symbol {
                    if let Some(e) = hop(src, dst, speed, start_fuel - req_escape_fuel) {
                        edges.push((dest_symbol.clone(), e.travel_duration));
                    }
                }
                edges
            },
            |x_symbol| *x_symbol == *dest_symbol,
        )
        .expect("No path found");

        let legs = path
            .0
            .iter()
            .zip(path.0.iter().skip(1))
            .map(|(a_symbol, b_symbol)| {
                let a = self.waypoints.get(a_symbol).unwrap();
                let b = self.waypoints.get(b_symbol).unwrap();
                let fuel_max = match (a.is_market(), b.is_market()) {
                    (true, true) => fuel_capacity,
                    (true, false) => fuel_capacity - req_escape_fuel,
                    (false, true) => start_fuel,
                    (false, false) => start_fuel - req_escape_fuel,
                };
                let e = hop(a, b, speed, fuel_max).unwrap();
                RouteLeg {
                    to: b_symbol.clone(),
                    flight_mode: e.flight_mode,
                    fuel_cost: e.fuel_cost,
                    travel_duration: e.travel_duration,
                    from_market: a.is_market(),
                    to_market: b.is_market(),
                }
            })
            .collect();
        Route {
            legs,
            min_travel_duration: path.1,
            req_terminal_fuel: req_escape_fuel,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{SymbolNameDescr, SystemSymbol};

    fn waypoint(symbol: &str, x: i64, y: i64, market: bool) -> Waypoint {
        let traits = if market {
            vec![SymbolNameDescr {
                symbol: "MARKETPLACE".to_string(),
                name: "Marketplace".to_string(),
                description: String::new(),
            }]
        } else {
            vec![]
        };
        Waypoint {
            symbol: WaypointSymbol::new(symbol),
            waypoint_type: "PLANET".to_string(),
            system_symbol: SystemSymbol::new("X1-S1"),
            x,
            y,
            traits,
        }
    }

    #[test]
    fn test_direct_route_burns_when_fuel_allows() {
        let waypoints = vec![
            waypoint("X1-S1-A1", 0, 0, true),
            waypoint("X1-S1-A2", 30, 0, true),
        ];
        let pathfinding = Pathfinding::new(waypoints);
        let route = pathfinding.get_route(
            &WaypointSymbol::new("X1-S1-A1"),
            &WaypointSymbol::new("X1-S1-A2"),
            30,
            400,
            400,
        );
        assert_eq!(route.legs.len(), 1);
        assert_eq!(route.legs[0].flight_mode, ShipFlightMode::Burn);
        assert_eq!(route.legs[0].fuel_cost, 60);
    }

    #[test]
    fn test_multi_hop_route_through_fuel_stop() {
        // A1 -> A3 is too far on one tank; A2 sits in between
        let waypoints = vec![
            waypoint("X1-S1-A1", 0, 0, true),
            waypoint("X1-S1-A2", 90, 0, true),
            waypoint("X1-S1-A3", 180, 0, true),
        ];
        let pathfinding = Pathfinding::new(waypoints);
        let route = pathfinding.get_route(
            &WaypointSymbol::new("X1-S1-A1"),
            &WaypointSymbol::new("X1-S1-A3"),
            30,
            100,
            100,
        );
        assert_eq!(route.legs.len(), 2);
        assert_eq!(route.legs[0].to, WaypointSymbol::new("X1-S1-A2"));
        assert_eq!(route.legs[1].to, WaypointSymbol::new("X1-S1-A3"));
    }

    #[test]
    fn test_terminal_fuel_reserved_for_gas_giant() {
        // destination has no market; closest market is 40 away
        let waypoints = vec![
            waypoint("X1-S1-A1", 0, 0, true),
            waypoint("X1-S1-B7", 40, 0, false),
        ];
        let pathfinding = Pathfinding::new(waypoints);
        let route = pathfinding.get_route(
            &WaypointSymbol::new("X1-S1-A1"),
            &WaypointSymbol::new("X1-S1-B7"),
            30,
            400,
            400,
        );
        assert_eq!(route.req_terminal_fuel, 40);
        assert!(!route.legs.last().unwrap().to_market);
    }
}
