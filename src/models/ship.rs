use crate::models::{SystemSymbol, WaypointSymbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SIPHON_MOUNT_PREFIX: &str = "MOUNT_GAS_SIPHON";
pub const DRILL_MOUNT_PREFIX: &str = "MOUNT_MINING_LASER";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ship {
    pub symbol: String,
    pub nav: ShipNav,
    pub crew: ShipCrew,
    pub fuel: ShipFuel,
    pub cooldown: ShipCooldown,
    pub frame: ShipFrame,
    pub reactor: ShipReactor,
    pub engine: ShipEngine,
    pub modules: Vec<ShipModule>,
    pub mounts: Vec<ShipMount>,
    pub registration: ShipRegistration,
    pub cargo: ShipCargo,
}

impl Ship {
    pub fn has_mount(&self, symbol_prefix: &str) -> bool {
        self.mounts.iter().any(|m| m.symbol.starts_with(symbol_prefix))
    }

    pub fn has_siphon_mount(&self) -> bool {
        self.has_mount(SIPHON_MOUNT_PREFIX)
    }

    pub fn has_drill_mount(&self) -> bool {
        self.has_mount(DRILL_MOUNT_PREFIX)
    }

    pub fn is_command_ship(&self) -> bool {
        self.registration.role == "COMMAND"
    }

    // A hauler in the sense of the coordinators: real cargo hold, no
    // extraction mounts, not a satellite
    pub fn is_hauler(&self) -> bool {
        self.cargo.capacity > 0
            && !self.has_siphon_mount()
            && !self.has_drill_mount()
            && self.registration.role != "SATELLITE"
    }

    pub fn cargo_space_available(&self) -> i64 {
        self.cargo.capacity - self.cargo.units
    }

    pub fn cargo_good_count(&self, good: &str) -> i64 {
        self.cargo
            .inventory
            .iter()
            .find(|g| g.symbol == good)
            .map(|g| g.units)
            .unwrap_or(0)
    }

    pub fn incr_cargo(&mut self, item: ShipCargoItem) {
        self.cargo.units += item.units;
        let good = self
            .cargo
            .inventory
            .iter_mut()
            .find(|good| good.symbol == item.symbol);
        match good {
            Some(good) => {
                good.units += item.units;
            }
            None => {
                self.cargo.inventory.push(item);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipNav {
    pub system_symbol: SystemSymbol,
    pub waypoint_symbol: WaypointSymbol,
    pub route: ShipNavRoute,
    pub status: ShipNavStatus,
    pub flight_mode: ShipFlightMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ShipFlightMode {
    #[serde(rename = "CRUISE")]
    Cruise,
    #[serde(rename = "BURN")]
    Burn,
    #[serde(rename = "DRIFT")]
    Drift,
    #[serde(rename = "STEALTH")]
    Stealth,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ShipNavStatus {
    #[serde(rename = "DOCKED")]
    Docked,
    #[serde(rename = "IN_TRANSIT")]
    InTransit,
    #[serde(rename = "IN_ORBIT")]
    InOrbit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipNavRoute {
    pub origin: ShipNavRouteWaypoint,
    pub destination: ShipNavRouteWaypoint,
    pub arrival: DateTime<Utc>,
    pub departure_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipNavRouteWaypoint {
    pub symbol: WaypointSymbol,
    #[serde(rename = "type")]
    pub waypoint_type: String,
    pub system_symbol: SystemSymbol,
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipCrew {
    pub current: i64,
    pub capacity: i64,
    pub required: i64,
    pub rotation: String,
    pub morale: i64,
    pub wages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipFuel {
    pub current: i64,
    pub capacity: i64,
    pub consumed: ShipFuelConsumed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipFuelConsumed {
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipCooldown {
    pub ship_symbol: String,
    pub total_seconds: i64,
    pub remaining_seconds: i64,
    pub expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipFrame {
    pub symbol: String,
    pub name: String,
    pub description: String,
    pub module_slots: i64,
    pub mounting_points: i64,
    pub fuel_capacity: i64,
    pub condition: Option<f64>,
    pub integrity: Option<f64>,
    pub requirements: ShipRequirements,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipRequirements {
    #[serde(default)]
    pub power: i64,
    #[serde(default)]
    pub crew: i64,
    #[serde(default)]
    pub slots: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipReactor {
    pub symbol: String,
    pub name: String,
    pub description: String,
    pub condition: Option<f64>,
    pub integrity: Option<f64>,
    pub power_output: i64,
    pub requirements: ShipRequirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipEngine {
    pub symbol: String,
    pub name: String,
    pub description: String,
    pub condition: Option<f64>,
    pub integrity: Option<f64>,
    pub speed: i64,
    pub requirements: ShipRequirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipModule {
    pub symbol: String,
    pub name: String,
    pub description: String,
    pub capacity: Option<i64>,
    pub requirements: ShipRequirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipMount {
    pub symbol: String,
    pub name: String,
    pub description: String,
    pub strength: Option<i64>,
    pub requirements: ShipRequirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipRegistration {
    pub name: String,
    pub faction_symbol: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipCargo {
    pub capacity: i64,
    pub units: i64,
    pub inventory: Vec<ShipCargoItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipCargoItem {
    pub symbol: String,
    pub units: i64,
    pub name: String,
    pub description: String,
}
