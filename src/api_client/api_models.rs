use crate::models::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipConditionEvent {
    pub symbol: String,
    pub component: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitResponse {
    pub nav: ShipNav,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResponse {
    pub nav: ShipNav,
    pub fuel: ShipFuel,
    #[serde(default)]
    pub events: Vec<ShipConditionEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightModeResponse {
    pub nav: ShipNav,
    pub fuel: ShipFuel,
    #[serde(default)]
    pub events: Vec<ShipConditionEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResponse {
    pub agent: Agent,
    pub cargo: ShipCargo,
    pub transaction: MarketTransaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub cargo: ShipCargo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JettisonResponse {
    pub cargo: ShipCargo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiphonYieldItem {
    pub symbol: String,
    pub units: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiphonYield {
    pub ship_symbol: String,
    #[serde(rename = "yield")]
    pub yield_: SiphonYieldItem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiphonResponse {
    pub siphon: SiphonYield,
    pub cooldown: ShipCooldown,
    pub cargo: ShipCargo,
    #[serde(default)]
    pub events: Vec<ShipConditionEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefuelResponse {
    pub agent: Agent,
    pub fuel: ShipFuel,
    pub transaction: MarketTransaction,
    #[serde(default)]
    pub cargo: Option<ShipCargo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateContractResponse {
    pub contract: Contract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptContractResponse {
    pub agent: Agent,
    pub contract: Contract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverContractResponse {
    pub contract: Contract,
    pub cargo: ShipCargo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillContractResponse {
    pub agent: Agent,
    pub contract: Contract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyConstructionResponse {
    pub construction: Construction,
    pub cargo: ShipCargo,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_siphon_response_deserialize() {
        let json = r#"{"siphon":{"shipSymbol":"CALLSIGN-4","yield":{"symbol":"LIQUID_HYDROGEN","units":15}},"cooldown":{"shipSymbol":"CALLSIGN-4","totalSeconds":70,"remainingSeconds":70,"expiration":"2024-02-04T12:00:00.000Z"},"cargo":{"capacity":80,"units":15,"inventory":[{"symbol":"LIQUID_HYDROGEN","units":15,"name":"Liquid Hydrogen","description":"..."}]},"events":[]}"#;
        let response: SiphonResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.siphon.yield_.symbol, "LIQUID_HYDROGEN");
        assert_eq!(response.siphon.yield_.units, 15);
        assert_eq!(response.cooldown.remaining_seconds, 70);
    }
}
