pub mod models;
pub mod schema;

pub mod api_client;
pub mod database;
pub mod universe;

pub mod config;
pub mod container_manager;
pub mod coordinators;
pub mod error;
pub mod ledger;
pub mod manufacturing;
pub mod pathfinding;
pub mod registry;
pub mod rendezvous;
pub mod ship_controller;
pub mod storage;
pub mod util;
pub mod workers;
