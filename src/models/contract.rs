use crate::models::WaypointSymbol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: String,
    pub faction_symbol: String,
    #[serde(rename = "type")]
    pub contract_type: String,
    pub terms: Terms,
    pub accepted: bool,
    pub fulfilled: bool,
    pub expiration: DateTime<Utc>,
    pub deadline_to_accept: DateTime<Utc>,
}

impl Contract {
    /// The first delivery with units outstanding. Multi-delivery contracts
    /// are processed one delivery index at a time.
    pub fn first_unfinished_delivery(&self) -> Option<&Deliver> {
        self.terms
            .deliver
            .iter()
            .find(|d| d.units_fulfilled < d.units_required)
    }

    pub fn all_deliveries_fulfilled(&self) -> bool {
        self.first_unfinished_delivery().is_none()
    }

    pub fn total_payment(&self) -> i64 {
        self.terms.payment.on_accepted + self.terms.payment.on_fulfilled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Hash)]
pub struct Terms {
    pub deadline: String,
    pub payment: Payment,
    pub deliver: Vec<Deliver>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub on_fulfilled: i64,
    pub on_accepted: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Deliver {
    pub trade_symbol: String,
    pub destination_symbol: WaypointSymbol,
    pub units_required: i64,
    pub units_fulfilled: i64,
}

impl Deliver {
    pub fn units_remaining(&self) -> i64 {
        self.units_required - self.units_fulfilled
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_contract_deserialize() {
        let json = r#"{"id":"cls7fi0q2","factionSymbol":"CORSAIRS","type":"PROCUREMENT","terms":{"deadline":"2024-02-11T11:37:29.626Z","payment":{"onAccepted":1391,"onFulfilled":10466},"deliver":[{"tradeSymbol":"ALUMINUM_ORE","destinationSymbol":"X1-TZ26-H51","unitsRequired":46,"unitsFulfilled":12}]},"accepted":true,"fulfilled":false,"expiration":"2024-02-05T11:37:29.626Z","deadlineToAccept":"2024-02-05T11:37:29.626Z"}"#;
        let contract: Contract = serde_json::from_str(json).unwrap();
        let deliver = contract.first_unfinished_delivery().unwrap();
        assert_eq!(deliver.trade_symbol, "ALUMINUM_ORE");
        assert_eq!(deliver.units_remaining(), 34);
        assert_eq!(contract.total_payment(), 11857);
    }
}
