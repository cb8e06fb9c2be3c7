pub mod db_models;

use crate::models::{
    ContainerRecord, ContainerStatus, ContainerType, Market, MfgTask, MarketRemoteView, Pipeline,
    PipelineStatus, PipelineType, TaskStatus, WaypointSymbol, WithTimestamp,
};
use crate::schema::*;
use db_models::*;
use chrono::{DateTime, Utc};
use diesel::ExpressionMethods as _;
use diesel::OptionalExtension as _;
use diesel::QueryDsl as _;
use diesel::QueryableByName;
use diesel::SelectableHelper as _;
use diesel::sql_types::Integer;
use diesel::upsert::excluded;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_async::RunQueryDsl as _;
use diesel_async::SimpleAsyncConnection as _;
use log::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone)]
pub struct DbClient {
    db: Pool<AsyncPgConnection>,
}

impl DbClient {
    pub async fn new(reset_date: &str) -> DbClient {
        let database_url = std::env::var("POSTGRES_URI").expect("POSTGRES_URI must be set");
        let pg_schema = std::env::var("POSTGRES_SCHEMA").expect("POSTGRES_SCHEMA must be set");
        let schema_name = pg_schema.replace("{RESET_DATE}", &reset_date.replace("-", ""));
        info!("Using schema: {}", schema_name);
        let db = {
            let database_url = format!(
                "{}?options=-c%20search_path%3D{}",
                database_url, schema_name
            );
            let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
            Pool::builder(manager).max_size(5).build().unwrap()
        };
        // Check the connection
        {
            let mut conn = db.get().await.unwrap();
            #[derive(QueryableByName)]
            struct Ret {
                #[diesel(sql_type = Integer)]
                value: i32,
            }
            let result: Vec<Ret> = diesel::sql_query("SELECT 1 as value")
                .load(&mut conn)
                .await
                .unwrap();
            assert_eq!(result.len(), 1);
            assert_eq!(result[0].value, 1);
            info!("Successfully connected to database");
        }
        let db = DbClient { db };
        db.create_schema(&schema_name).await;
        db
    }

    async fn create_schema(&self, schema_name: &str) {
        let sql =
            include_str!("../../st_fleet_schema.sql.template").replace("___SCHEMA___", schema_name);
        let mut conn = self.conn().await;
        conn.batch_execute(&sql).await.unwrap();
    }

    pub async fn conn(&self) -> Object<AsyncPgConnection> {
        self.db
            .get()
            .await
            .expect("Timed out waiting for a database connection")
    }

    // Generic key/value state

    pub async fn get_value<T>(&self, key: &str) -> Option<T>
    where
        T: Sized + DeserializeOwned,
    {
        debug!("db get: {}", key);
        let value_opt: Option<Value> = generic_lookup::table
            .select(generic_lookup::value)
            .filter(generic_lookup::key.eq(key))
            .first(&mut self.conn().await)
            .await
            .optional()
            .expect("DB Query error");
        value_opt.map(|data| serde_json::from_value(data).unwrap())
    }

    pub async fn set_value<T>(&self, key: &str, value: &T)
    where
        T: Serialize + ?Sized,
    {
        debug!("db set: {}", key);
        let value: Value = serde_json::to_value(value).unwrap();
        diesel::insert_into(generic_lookup::table)
            .values((
                generic_lookup::key.eq(key),
                generic_lookup::value.eq(&value),
            ))
            .on_conflict(generic_lookup::key)
            .do_update()
            .set(generic_lookup::value.eq(&value))
            .execute(&mut self.conn().await)
            .await
            .expect("DB Query error");
    }

    pub async fn get_agent_token(&self, callsign: &str) -> Option<String> {
        self.get_value(&format!("registrations/{}", callsign)).await
    }

    pub async fn save_agent_token(&self, callsign: &str, token: &str) {
        self.set_value(&format!("registrations/{}", callsign), token)
            .await
    }

    // Ship assignments (exclusivity is enforced here, not in memory)

    /// Insert iff the ship has no active assignment. Returns false when an
    /// assignment already exists.
    pub async fn insert_assignment(
        &self,
        ship_symbol: &str,
        container_id: &str,
        player_id: &str,
    ) -> bool {
        let rows = diesel::insert_into(ship_assignments::table)
            .values((
                ship_assignments::ship_symbol.eq(ship_symbol),
                ship_assignments::container_id.eq(container_id),
                ship_assignments::player_id.eq(player_id),
                ship_assignments::assigned_at.eq(Utc::now()),
            ))
            .on_conflict(ship_assignments::ship_symbol)
            .do_nothing()
            .execute(&mut self.conn().await)
            .await
            .expect("DB Insert error");
        rows == 1
    }

    pub async fn delete_assignment(&self, ship_symbol: &str, player_id: &str) {
        diesel::delete(
            ship_assignments::table
                .filter(ship_assignments::ship_symbol.eq(ship_symbol))
                .filter(ship_assignments::player_id.eq(player_id)),
        )
        .execute(&mut self.conn().await)
        .await
        .expect("DB Query error");
    }

    /// Single-statement ownership move: succeeds iff `from_container` still
    /// owns the ship. No window exists in which neither container holds it.
    pub async fn transfer_assignment(
        &self,
        ship_symbol: &str,
        from_container: &str,
        to_container: &str,
    ) -> bool {
        let rows = diesel::update(
            ship_assignments::table
                .filter(ship_assignments::ship_symbol.eq(ship_symbol))
                .filter(ship_assignments::container_id.eq(from_container)),
        )
        .set((
            ship_assignments::container_id.eq(to_container),
            ship_assignments::assigned_at.eq(Utc::now()),
        ))
        .execute(&mut self.conn().await)
        .await
        .expect("DB Query error");
        rows == 1
    }

    pub async fn assignments_by_container(
        &self,
        container_id: &str,
        player_id: &str,
    ) -> Vec<String> {
        ship_assignments::table
            .filter(ship_assignments::container_id.eq(container_id))
            .filter(ship_assignments::player_id.eq(player_id))
            .select(ship_assignments::ship_symbol)
            .load(&mut self.conn().await)
            .await
            .expect("DB Query error")
    }

    pub async fn all_assignments(&self, player_id: &str) -> Vec<(String, String)> {
        ship_assignments::table
            .filter(ship_assignments::player_id.eq(player_id))
            .select((
                ship_assignments::ship_symbol,
                ship_assignments::container_id,
            ))
            .load(&mut self.conn().await)
            .await
            .expect("DB Query error")
    }

    // Containers

    pub async fn insert_container(&self, record: &ContainerRecord) {
        diesel::insert_into(containers::table)
            .values((
                containers::id.eq(&record.id),
                containers::container_type.eq(record.container_type.to_string()),
                containers::parent_id.eq(&record.parent_id),
                containers::player_id.eq(&record.player_id),
                containers::status.eq(record.status.to_string()),
                containers::command.eq(&record.command),
            ))
            .execute(&mut self.conn().await)
            .await
            .expect("DB Insert error");
    }

    pub async fn update_container_status(&self, container_id: &str, status: ContainerStatus) {
        diesel::update(containers::table.filter(containers::id.eq(container_id)))
            .set((
                containers::status.eq(status.to_string()),
                containers::updated_at.eq(Utc::now()),
            ))
            .execute(&mut self.conn().await)
            .await
            .expect("DB Query error");
    }

    pub async fn delete_container(&self, container_id: &str, player_id: &str) {
        diesel::delete(
            containers::table
                .filter(containers::id.eq(container_id))
                .filter(containers::player_id.eq(player_id)),
        )
        .execute(&mut self.conn().await)
        .await
        .expect("DB Query error");
    }

    pub async fn find_containers(
        &self,
        container_type: ContainerType,
        player_id: &str,
    ) -> Vec<ContainerRecord> {
        let rows: Vec<DbContainer> = containers::table
            .filter(containers::container_type.eq(container_type.to_string()))
            .filter(containers::player_id.eq(player_id))
            .select(DbContainer::as_select())
            .load(&mut self.conn().await)
            .await
            .expect("DB Query error");
        rows.into_iter().map(|c| c.into_record()).collect()
    }

    pub async fn find_running_containers(
        &self,
        container_type: ContainerType,
        player_id: &str,
    ) -> Vec<ContainerRecord> {
        let rows: Vec<DbContainer> = containers::table
            .filter(containers::container_type.eq(container_type.to_string()))
            .filter(containers::player_id.eq(player_id))
            .filter(containers::status.eq(ContainerStatus::Running.to_string()))
            .select(DbContainer::as_select())
            .load(&mut self.conn().await)
            .await
            .expect("DB Query error");
        rows.into_iter().map(|c| c.into_record()).collect()
    }

    // Pipelines

    pub async fn insert_pipeline(&self, new_pipeline: &NewPipeline) -> i64 {
        diesel::insert_into(pipelines::table)
            .values(new_pipeline)
            .returning(pipelines::id)
            .get_result(&mut self.conn().await)
            .await
            .expect("DB Insert error")
    }

    pub async fn get_pipeline(&self, pipeline_id: i64) -> Option<Pipeline> {
        let row: Option<DbPipeline> = pipelines::table
            .filter(pipelines::id.eq(pipeline_id))
            .select(DbPipeline::as_select())
            .first(&mut self.conn().await)
            .await
            .optional()
            .expect("DB Query error");
        row.map(|p| p.into_pipeline())
    }

    pub async fn update_pipeline(&self, pipeline: &Pipeline) {
        diesel::update(pipelines::table.filter(pipelines::id.eq(pipeline.id)))
            .set((
                pipelines::status.eq(pipeline.status.to_string()),
                pipelines::total_cost.eq(pipeline.total_cost),
                pipelines::total_revenue.eq(pipeline.total_revenue),
                pipelines::updated_at.eq(pipeline.updated_at),
                pipelines::completed_at.eq(pipeline.completed_at),
            ))
            .execute(&mut self.conn().await)
            .await
            .expect("DB Query error");
    }

    pub async fn delete_pipeline(&self, pipeline_id: i64) {
        // tasks and factory states cascade
        diesel::delete(pipelines::table.filter(pipelines::id.eq(pipeline_id)))
            .execute(&mut self.conn().await)
            .await
            .expect("DB Query error");
    }

    pub async fn find_active_pipelines(&self, player_id: &str) -> Vec<Pipeline> {
        let active = vec![
            PipelineStatus::Planning.to_string(),
            PipelineStatus::Executing.to_string(),
        ];
        let rows: Vec<DbPipeline> = pipelines::table
            .filter(pipelines::player_id.eq(player_id))
            .filter(pipelines::status.eq_any(active))
            .select(DbPipeline::as_select())
            .load(&mut self.conn().await)
            .await
            .expect("DB Query error");
        rows.into_iter().map(|p| p.into_pipeline()).collect()
    }

    pub async fn count_active_pipelines(
        &self,
        player_id: &str,
        pipeline_type: PipelineType,
        product_good: &str,
    ) -> i64 {
        let active = vec![
            PipelineStatus::Planning.to_string(),
            PipelineStatus::Executing.to_string(),
        ];
        pipelines::table
            .filter(pipelines::player_id.eq(player_id))
            .filter(pipelines::pipeline_type.eq(pipeline_type.to_string()))
            .filter(pipelines::product_good.eq(product_good))
            .filter(pipelines::status.eq_any(active))
            .count()
            .get_result(&mut self.conn().await)
            .await
            .expect("DB Query error")
    }

    pub async fn next_pipeline_seq_no(&self, player_id: &str) -> i64 {
        let max: Option<i64> = pipelines::table
            .filter(pipelines::player_id.eq(player_id))
            .select(diesel::dsl::max(pipelines::seq_no))
            .first(&mut self.conn().await)
            .await
            .expect("DB Query error");
        max.unwrap_or(0) + 1
    }

    // Tasks

    pub async fn insert_tasks(&self, new_tasks: &[NewTask]) -> Vec<i64> {
        if new_tasks.is_empty() {
            return vec![];
        }
        diesel::insert_into(tasks::table)
            .values(new_tasks)
            .returning(tasks::id)
            .get_results(&mut self.conn().await)
            .await
            .expect("DB Insert error")
    }

    pub async fn get_task(&self, task_id: i64) -> Option<MfgTask> {
        let row: Option<DbTask> = tasks::table
            .filter(tasks::id.eq(task_id))
            .select(DbTask::as_select())
            .first(&mut self.conn().await)
            .await
            .optional()
            .expect("DB Query error");
        row.map(|t| t.into_task())
    }

    pub async fn update_task(&self, task: &MfgTask) {
        diesel::update(tasks::table.filter(tasks::id.eq(task.id)))
            .set((
                tasks::status.eq(task.status.to_string()),
                tasks::assigned_ship.eq(&task.assigned_ship),
                tasks::storage_op_id.eq(&task.storage_op_id),
                tasks::priority.eq(task.priority),
                tasks::retry_count.eq(task.retry_count),
                tasks::actual_qty.eq(task.results.actual_qty),
                tasks::total_cost.eq(task.results.total_cost),
                tasks::total_revenue.eq(task.results.total_revenue),
                tasks::error_msg.eq(&task.results.error_msg),
                tasks::ready_at.eq(task.ready_at),
                tasks::started_at.eq(task.started_at),
                tasks::completed_at.eq(task.completed_at),
            ))
            .execute(&mut self.conn().await)
            .await
            .expect("DB Query error");
    }

    /// SELECT-FOR-UPDATE-style claim: flips READY -> ASSIGNED iff the task
    /// is still unassigned. This is the synchronisation point for task
    /// ownership (invariant: a ship owns at most one task).
    pub async fn claim_task(&self, task_id: i64, ship_symbol: &str) -> bool {
        let rows = diesel::update(
            tasks::table
                .filter(tasks::id.eq(task_id))
                .filter(tasks::status.eq(TaskStatus::Ready.to_string()))
                .filter(tasks::assigned_ship.is_null()),
        )
        .set((
            tasks::status.eq(TaskStatus::Assigned.to_string()),
            tasks::assigned_ship.eq(ship_symbol),
        ))
        .execute(&mut self.conn().await)
        .await
        .expect("DB Query error");
        rows == 1
    }

    pub async fn find_tasks_by_pipeline(&self, pipeline_id: i64) -> Vec<MfgTask> {
        let rows: Vec<DbTask> = tasks::table
            .filter(tasks::pipeline_id.eq(pipeline_id))
            .select(DbTask::as_select())
            .load(&mut self.conn().await)
            .await
            .expect("DB Query error");
        rows.into_iter().map(|t| t.into_task()).collect()
    }

    pub async fn find_tasks_by_status(
        &self,
        pipeline_ids: &[i64],
        status: TaskStatus,
    ) -> Vec<MfgTask> {
        let rows: Vec<DbTask> = tasks::table
            .filter(tasks::pipeline_id.eq_any(pipeline_ids.to_vec()))
            .filter(tasks::status.eq(status.to_string()))
            .select(DbTask::as_select())
            .load(&mut self.conn().await)
            .await
            .expect("DB Query error");
        rows.into_iter().map(|t| t.into_task()).collect()
    }

    /// The most recent task a ship was assigned, any status. Authoritative
    /// for completion handling across restarts.
    pub async fn find_latest_task_by_ship(&self, ship_symbol: &str) -> Option<MfgTask> {
        let row: Option<DbTask> = tasks::table
            .filter(tasks::assigned_ship.eq(ship_symbol))
            .order(tasks::id.desc())
            .select(DbTask::as_select())
            .first(&mut self.conn().await)
            .await
            .optional()
            .expect("DB Query error");
        row.map(|t| t.into_task())
    }

    /// The task a ship is actively working (claimed or executing).
    pub async fn find_inflight_task_by_ship(&self, ship_symbol: &str) -> Option<MfgTask> {
        let assigned = vec![
            TaskStatus::Assigned.to_string(),
            TaskStatus::Executing.to_string(),
        ];
        let row: Option<DbTask> = tasks::table
            .filter(tasks::assigned_ship.eq(ship_symbol))
            .filter(tasks::status.eq_any(assigned))
            .select(DbTask::as_select())
            .first(&mut self.conn().await)
            .await
            .optional()
            .expect("DB Query error");
        row.map(|t| t.into_task())
    }

    // Factory states

    pub async fn upsert_factory_state(
        &self,
        pipeline_id: i64,
        factory_symbol: &WaypointSymbol,
        output_good: &str,
        delivered: &Value,
        supply_prev: Option<String>,
        supply_last: Option<String>,
        ready_for_collection: bool,
    ) {
        diesel::insert_into(factory_states::table)
            .values((
                factory_states::pipeline_id.eq(pipeline_id),
                factory_states::factory_symbol.eq(factory_symbol.to_string()),
                factory_states::output_good.eq(output_good),
                factory_states::delivered.eq(delivered),
                factory_states::supply_prev.eq(&supply_prev),
                factory_states::supply_last.eq(&supply_last),
                factory_states::ready_for_collection.eq(ready_for_collection),
                factory_states::updated_at.eq(Utc::now()),
            ))
            .on_conflict((
                factory_states::pipeline_id,
                factory_states::factory_symbol,
                factory_states::output_good,
            ))
            .do_update()
            .set((
                factory_states::delivered.eq(excluded(factory_states::delivered)),
                factory_states::supply_prev.eq(excluded(factory_states::supply_prev)),
                factory_states::supply_last.eq(excluded(factory_states::supply_last)),
                factory_states::ready_for_collection
                    .eq(excluded(factory_states::ready_for_collection)),
                factory_states::updated_at.eq(Utc::now()),
            ))
            .execute(&mut self.conn().await)
            .await
            .expect("DB Insert error");
    }

    pub async fn get_factory_states(&self, pipeline_id: i64) -> Vec<DbFactoryState> {
        factory_states::table
            .filter(factory_states::pipeline_id.eq(pipeline_id))
            .select(DbFactoryState::as_select())
            .load(&mut self.conn().await)
            .await
            .expect("DB Query error")
    }

    // Markets

    pub async fn get_market(&self, symbol: &WaypointSymbol) -> Option<WithTimestamp<Market>> {
        let market: Option<DbMarket> = markets::table
            .filter(markets::waypoint_symbol.eq(symbol.to_string()))
            .select(DbMarket::as_select())
            .first(&mut self.conn().await)
            .await
            .optional()
            .expect("DB Query error");
        market.map(|m| {
            let market_data: Market =
                serde_json::from_value(m.market_data).expect("Invalid market data");
            WithTimestamp {
                data: market_data,
                timestamp: m.updated_at,
            }
        })
    }

    pub async fn save_market(&self, symbol: &WaypointSymbol, market: &WithTimestamp<Market>) {
        let market_data = serde_json::to_value(&market.data).expect("Failed to serialize market");
        diesel::insert_into(markets::table)
            .values((
                markets::waypoint_symbol.eq(symbol.to_string()),
                markets::market_data.eq(&market_data),
            ))
            .on_conflict(markets::waypoint_symbol)
            .do_update()
            .set((
                markets::market_data.eq(excluded(markets::market_data)),
                markets::updated_at.eq(Utc::now()),
            ))
            .execute(&mut self.conn().await)
            .await
            .expect("DB Insert error");
    }

    pub async fn get_market_remote(&self, symbol: &WaypointSymbol) -> Option<MarketRemoteView> {
        let market: Option<DbRemoteMarket> = remote_markets::table
            .filter(remote_markets::waypoint_symbol.eq(symbol.to_string()))
            .select(DbRemoteMarket::as_select())
            .first(&mut self.conn().await)
            .await
            .optional()
            .expect("DB Query error");
        market.map(|m| serde_json::from_value(m.market_data).expect("Invalid market data"))
    }

    pub async fn save_market_remote(&self, symbol: &WaypointSymbol, market: &MarketRemoteView) {
        let market_data = serde_json::to_value(market).expect("Failed to serialize market");
        diesel::insert_into(remote_markets::table)
            .values((
                remote_markets::waypoint_symbol.eq(symbol.to_string()),
                remote_markets::market_data.eq(&market_data),
            ))
            .on_conflict(remote_markets::waypoint_symbol)
            .do_update()
            .set((
                remote_markets::market_data.eq(excluded(remote_markets::market_data)),
                remote_markets::updated_at.eq(Utc::now()),
            ))
            .execute(&mut self.conn().await)
            .await
            .expect("DB Insert error");
    }

    // Transaction log (best-effort accounting)

    #[allow(clippy::too_many_arguments)]
    pub async fn record_transaction(
        &self,
        timestamp: DateTime<Utc>,
        player_id: &str,
        ship_symbol: &str,
        container_id: Option<&str>,
        symbol: &str,
        _type: &str,
        units: i64,
        price_per_unit: i64,
        total_price: i64,
        credits_before: Option<i64>,
        credits_after: Option<i64>,
    ) {
        diesel::insert_into(transaction_log::table)
            .values((
                transaction_log::timestamp.eq(timestamp),
                transaction_log::player_id.eq(player_id),
                transaction_log::ship_symbol.eq(ship_symbol),
                transaction_log::container_id.eq(container_id),
                transaction_log::symbol.eq(symbol),
                transaction_log::type_.eq(_type),
                transaction_log::units.eq(units as i32),
                transaction_log::price_per_unit.eq(price_per_unit as i32),
                transaction_log::total_price.eq(total_price as i32),
                transaction_log::credits_before.eq(credits_before),
                transaction_log::credits_after.eq(credits_after),
            ))
            .on_conflict((transaction_log::ship_symbol, transaction_log::timestamp))
            .do_nothing()
            .execute(&mut self.conn().await)
            .await
            .expect("DB Insert error");
    }
}
