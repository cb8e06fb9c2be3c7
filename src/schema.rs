diesel::table! {
    generic_lookup (key) {
        key -> Text,
        value -> Json,
        inserted_at -> Timestamptz,
    }
}

diesel::table! {
    ship_assignments (ship_symbol) {
        ship_symbol -> Text,
        container_id -> Text,
        player_id -> Text,
        assigned_at -> Timestamptz,
    }
}

diesel::table! {
    containers (id) {
        id -> Text,
        container_type -> Text,
        parent_id -> Nullable<Text>,
        player_id -> Text,
        status -> Text,
        command -> Json,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    pipelines (id) {
        id -> Int8,
        seq_no -> Int8,
        pipeline_type -> Text,
        product_good -> Text,
        sell_market -> Text,
        expected_price -> Int8,
        status -> Text,
        total_cost -> Int8,
        total_revenue -> Int8,
        player_id -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    tasks (id) {
        id -> Int8,
        pipeline_id -> Int8,
        task_type -> Text,
        good -> Text,
        desired_qty -> Int8,
        source_market -> Nullable<Text>,
        target_market -> Nullable<Text>,
        factory_symbol -> Nullable<Text>,
        storage_op_id -> Nullable<Text>,
        depends_on -> Json,
        status -> Text,
        assigned_ship -> Nullable<Text>,
        priority -> Int8,
        retry_count -> Int4,
        max_retries -> Int4,
        actual_qty -> Int8,
        total_cost -> Int8,
        total_revenue -> Int8,
        error_msg -> Nullable<Text>,
        created_at -> Timestamptz,
        ready_at -> Nullable<Timestamptz>,
        started_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    factory_states (pipeline_id, factory_symbol, output_good) {
        pipeline_id -> Int8,
        factory_symbol -> Text,
        output_good -> Text,
        delivered -> Json,
        supply_prev -> Nullable<Text>,
        supply_last -> Nullable<Text>,
        ready_for_collection -> Bool,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    markets (waypoint_symbol) {
        waypoint_symbol -> Text,
        market_data -> Json,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    remote_markets (waypoint_symbol) {
        waypoint_symbol -> Text,
        market_data -> Json,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    transaction_log (ship_symbol, timestamp) {
        timestamp -> Timestamptz,
        player_id -> Text,
        ship_symbol -> Text,
        container_id -> Nullable<Text>,
        symbol -> Text,
        #[sql_name = "type"]
        type_ -> Text,
        units -> Int4,
        price_per_unit -> Int4,
        total_price -> Int4,
        credits_before -> Nullable<Int8>,
        credits_after -> Nullable<Int8>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    generic_lookup,
    ship_assignments,
    containers,
    pipelines,
    tasks,
    factory_states,
    markets,
    remote_markets,
    transaction_log,
);
