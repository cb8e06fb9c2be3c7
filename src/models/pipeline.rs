use crate::error::{Error, Result};
use crate::models::WaypointSymbol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

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
pub enum PipelineType {
    Fabrication,
    Collection,
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
pub enum PipelineStatus {
    Planning,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStatus::Completed | PipelineStatus::Failed | PipelineStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub seq_no: i64,
    pub pipeline_type: PipelineType,
    pub product_good: String,
    pub sell_market: WaypointSymbol,
    pub expected_price: i64,
    pub status: PipelineStatus,
    pub total_cost: i64,
    pub total_revenue: i64,
    pub player_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    pub fn net(&self) -> i64 {
        self.total_revenue - self.total_cost
    }

    /// Terminal statuses are absorbing.
    pub fn transition(&mut self, next: PipelineStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::Precondition(format!(
                "pipeline {}: already {} (terminal)",
                self.id, self.status
            )));
        }
        let now = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.updated_at = now;
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_terminal_is_absorbing() {
        let mut pipeline = Pipeline {
            id: 1,
            seq_no: 1,
            pipeline_type: PipelineType::Fabrication,
            product_good: "MICROPROCESSORS".to_string(),
            sell_market: WaypointSymbol::new("X1-S1-B2"),
            expected_price: 4000,
            status: PipelineStatus::Planning,
            total_cost: 0,
            total_revenue: 0,
            player_id: "CALLSIGN".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        pipeline.transition(PipelineStatus::Executing).unwrap();
        pipeline.transition(PipelineStatus::Completed).unwrap();
        assert!(pipeline.transition(PipelineStatus::Executing).is_err());
        assert!(pipeline.transition(PipelineStatus::Failed).is_err());
        assert!(pipeline.completed_at.is_some());
    }
}
