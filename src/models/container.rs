use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A persisted record of a running coordinator or worker. Workers carry a
/// `parent_id` pointing at the coordinator that spawned them, which is what
/// orphan cleanup keys off after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub container_type: ContainerType,
    pub parent_id: Option<String>,
    pub player_id: String,
    pub status: ContainerStatus,
    /// Command payload the container executes, e.g. the task id for a
    /// MFG_TASK_WORKER or the gas giant for a SIPHON_WORKER.
    pub command: Value,
}

impl ContainerRecord {
    pub fn new(
        container_type: ContainerType,
        parent_id: Option<&str>,
        player_id: &str,
        command: Value,
    ) -> Self {
        let id = format!(
            "{}-{}",
            container_type.to_string().to_lowercase().replace('_', "-"),
            &uuid::Uuid::new_v4().to_string()[..8]
        );
        Self {
            id,
            container_type,
            parent_id: parent_id.map(|s| s.to_string()),
            player_id: player_id.to_string(),
            status: ContainerStatus::Persisted,
            command,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerType {
    ContractCoordinator,
    ContractWorkflow,
    GasCoordinator,
    SiphonWorker,
    GasTransportWorker,
    StorageShipWorker,
    MfgCoordinator,
    MfgTaskWorker,
    Balancing,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    Persisted,
    Running,
    Stopped,
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr as _;

    #[test]
    fn test_container_type_strings() {
        assert_eq!(
            ContainerType::ContractWorkflow.to_string(),
            "CONTRACT_WORKFLOW"
        );
        assert_eq!(
            ContainerType::from_str("GAS_TRANSPORT_WORKER").unwrap(),
            ContainerType::GasTransportWorker
        );
    }

    #[test]
    fn test_record_id_prefix() {
        let record = ContainerRecord::new(
            ContainerType::SiphonWorker,
            Some("gas-coordinator-1234"),
            "CALLSIGN",
            serde_json::json!({"ship": "CALLSIGN-3"}),
        );
        assert!(record.id.starts_with("siphon-worker-"));
        assert_eq!(record.status, ContainerStatus::Persisted);
    }
}
