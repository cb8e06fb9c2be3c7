mod container;
mod contract;
mod market;
mod pipeline;
mod ship;
mod task;
mod waypoint_symbol;

pub use container::*;
pub use contract::*;
pub use market::*;
pub use pipeline::*;
pub use ship::*;
pub use task::*;
pub use waypoint_symbol::*;

use crate::util::Coord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub status: String,
    pub version: String,
    pub reset_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    // account_id field is only present for own agent
    pub account_id: Option<String>,
    pub symbol: String,
    pub headquarters: WaypointSymbol,
    pub credits: i64,
    pub starting_faction: String,
    pub ship_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedList<T> {
    pub data: Vec<T>,
    pub meta: Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub page: u32,
    pub limit: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Data<T> {
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolNameDescr {
    pub symbol: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithTimestamp<T> {
    pub timestamp: DateTime<Utc>,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Faction {
    pub symbol: String,
    pub name: String,
    pub description: String,
    pub headquarters: Option<SystemSymbol>,
    pub traits: Vec<SymbolNameDescr>,
    pub is_recruiting: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub symbol: WaypointSymbol,
    #[serde(rename = "type")]
    pub waypoint_type: String,
    pub system_symbol: SystemSymbol,
    pub x: i64,
    pub y: i64,
    #[serde(default)]
    pub traits: Vec<SymbolNameDescr>,
}

impl Waypoint {
    pub fn has_trait(&self, symbol: &str) -> bool {
        self.traits.iter().any(|t| t.symbol == symbol)
    }

    pub fn is_market(&self) -> bool {
        self.has_trait("MARKETPLACE")
    }

    pub fn is_gas_giant(&self) -> bool {
        self.waypoint_type == "GAS_GIANT"
    }

    // Fuel is sold at markets
    pub fn has_fuel(&self) -> bool {
        self.is_market()
    }
}

impl Coord for Waypoint {
    fn x(&self) -> i64 {
        self.x
    }
    fn y(&self) -> i64 {
        self.y
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Construction {
    pub symbol: WaypointSymbol,
    pub materials: Vec<ConstructionMaterial>,
    pub is_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructionMaterial {
    pub trade_symbol: String,
    pub required: i64,
    pub fulfilled: i64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_waypoint_deserialize() {
        let json = r#"{"symbol":"X1-TZ26-B7","type":"GAS_GIANT","systemSymbol":"X1-TZ26","x":-9,"y":62,"orbitals":[],"traits":[{"symbol":"VIBRANT_AURORAS","name":"Vibrant Auroras","description":"..."}]}"#;
        let waypoint: Waypoint = serde_json::from_str(json).unwrap();
        assert!(waypoint.is_gas_giant());
        assert!(!waypoint.is_market());
    }

    #[test]
    fn test_agent_deserialize() {
        let json = r#"{"accountId":"abc123","symbol":"CALLSIGN","headquarters":"X1-TZ26-A1","credits":250000,"startingFaction":"CORSAIRS","shipCount":2}"#;
        let agent: Agent = serde_json::from_str(json).unwrap();
        assert_eq!(agent.credits, 250000);
        assert_eq!(agent.headquarters.system(), SystemSymbol::new("X1-TZ26"));
    }
}
