use crate::models::{
    ContainerRecord, ContainerStatus, ContainerType, MfgTask, Pipeline, PipelineStatus,
    PipelineType, TaskResults, TaskStatus, TaskType, WaypointSymbol,
};
use crate::schema::*;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use std::str::FromStr as _;

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = markets)]
pub struct DbMarket {
    pub waypoint_symbol: String,
    pub market_data: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = remote_markets)]
pub struct DbRemoteMarket {
    pub waypoint_symbol: String,
    pub market_data: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = ship_assignments)]
pub struct DbShipAssignment {
    pub ship_symbol: String,
    pub container_id: String,
    pub player_id: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = containers)]
pub struct DbContainer {
    pub id: String,
    pub container_type: String,
    pub parent_id: Option<String>,
    pub player_id: String,
    pub status: String,
    pub command: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbContainer {
    pub fn into_record(self) -> ContainerRecord {
        ContainerRecord {
            id: self.id,
            container_type: ContainerType::from_str(&self.container_type)
                .expect("Invalid container type in DB"),
            parent_id: self.parent_id,
            player_id: self.player_id,
            status: ContainerStatus::from_str(&self.status)
                .expect("Invalid container status in DB"),
            command: self.command,
        }
    }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = pipelines)]
pub struct DbPipeline {
    pub id: i64,
    pub seq_no: i64,
    pub pipeline_type: String,
    pub product_good: String,
    pub sell_market: String,
    pub expected_price: i64,
    pub status: String,
    pub total_cost: i64,
    pub total_revenue: i64,
    pub player_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DbPipeline {
    pub fn into_pipeline(self) -> Pipeline {
        Pipeline {
            id: self.id,
            seq_no: self.seq_no,
            pipeline_type: PipelineType::from_str(&self.pipeline_type)
                .expect("Invalid pipeline type in DB"),
            product_good: self.product_good,
            sell_market: WaypointSymbol(self.sell_market),
            expected_price: self.expected_price,
            status: PipelineStatus::from_str(&self.status)
                .expect("Invalid pipeline status in DB"),
            total_cost: self.total_cost,
            total_revenue: self.total_revenue,
            player_id: self.player_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = pipelines)]
pub struct NewPipeline {
    pub seq_no: i64,
    pub pipeline_type: String,
    pub product_good: String,
    pub sell_market: String,
    pub expected_price: i64,
    pub status: String,
    pub player_id: String,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = tasks)]
pub struct DbTask {
    pub id: i64,
    pub pipeline_id: i64,
    pub task_type: String,
    pub good: String,
    pub desired_qty: i64,
    pub source_market: Option<String>,
    pub target_market: Option<String>,
    pub factory_symbol: Option<String>,
    pub storage_op_id: Option<String>,
    pub depends_on: Value,
    pub status: String,
    pub assigned_ship: Option<String>,
    pub priority: i64,
    pub retry_count: i32,
    pub max_retries: i32,
    pub actual_qty: i64,
    pub total_cost: i64,
    pub total_revenue: i64,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DbTask {
    pub fn into_task(self) -> MfgTask {
        MfgTask {
            id: self.id,
            pipeline_id: self.pipeline_id,
            task_type: TaskType::from_str(&self.task_type).expect("Invalid task type in DB"),
            good: self.good,
            desired_qty: self.desired_qty,
            source_market: self.source_market.map(|s| WaypointSymbol(s)),
            target_market: self.target_market.map(|s| WaypointSymbol(s)),
            factory_symbol: self.factory_symbol.map(|s| WaypointSymbol(s)),
            storage_op_id: self.storage_op_id,
            depends_on: serde_json::from_value(self.depends_on)
                .expect("Invalid depends_on in DB"),
            status: TaskStatus::from_str(&self.status).expect("Invalid task status in DB"),
            assigned_ship: self.assigned_ship,
            priority: self.priority,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            results: TaskResults {
                actual_qty: self.actual_qty,
                total_cost: self.total_cost,
                total_revenue: self.total_revenue,
                error_msg: self.error_msg,
            },
            created_at: self.created_at,
            ready_at: self.ready_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask {
    pub pipeline_id: i64,
    pub task_type: String,
    pub good: String,
    pub desired_qty: i64,
    pub source_market: Option<String>,
    pub target_market: Option<String>,
    pub factory_symbol: Option<String>,
    pub storage_op_id: Option<String>,
    pub depends_on: Value,
    pub status: String,
    pub priority: i64,
    pub max_retries: i32,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = factory_states)]
pub struct DbFactoryState {
    pub pipeline_id: i64,
    pub factory_symbol: String,
    pub output_good: String,
    pub delivered: Value,
    pub supply_prev: Option<String>,
    pub supply_last: Option<String>,
    pub ready_for_collection: bool,
    pub updated_at: DateTime<Utc>,
}
