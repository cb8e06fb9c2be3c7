use dashmap::DashMap;
use log::*;
use serde_json::json;
use st_fleet::api_client::ApiClient;
use st_fleet::config::CONFIG;
use st_fleet::container_manager::ContainerManager;
use st_fleet::coordinators::contract::ContractCoordinator;
use st_fleet::coordinators::gas::GasCoordinator;
use st_fleet::coordinators::manufacturing::MfgCoordinator;
use st_fleet::coordinators::CoordinatorContext;
use st_fleet::database::DbClient;
use st_fleet::ledger::Ledger;
use st_fleet::models::{ContainerRecord, ContainerType};
use st_fleet::registry::ShipAssignmentRegistry;
use st_fleet::rendezvous::GasRendezvous;
use st_fleet::storage::StorageCoordinator;
use st_fleet::universe::Universe;
use std::env;
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    pretty_env_logger::init_timed();

    let faction = env::var("AGENT_FACTION").unwrap_or_default();
    let callsign = env::var("AGENT_CALLSIGN")
        .expect("AGENT_CALLSIGN env var not set")
        .to_ascii_uppercase();

    info!("Starting agent {}", callsign);

    let api_client = ApiClient::new();
    let status = api_client.status().await.expect("Failed to get API status");
    info!("Reset date: {}", status.reset_date);

    // the reset date partitions persistent state between game resets
    let db = DbClient::new(&status.reset_date).await;

    let agent_token = match db.get_agent_token(&callsign).await {
        Some(token) => token,
        None => {
            let faction = match faction.as_str() {
                "" => {
                    let factions = api_client
                        .get_factions()
                        .await
                        .expect("Failed to list factions");
                    let factions: Vec<_> =
                        factions.into_iter().filter(|f| f.is_recruiting).collect();
                    use rand::prelude::IndexedRandom as _;
                    let faction = factions
                        .choose(&mut rand::rng())
                        .expect("No recruiting factions");
                    info!("Picked faction {}", faction.symbol);
                    faction.symbol.clone()
                }
                _ => faction.to_string(),
            };
            let token = api_client
                .register(&faction, &callsign)
                .await
                .expect("Registration failed");
            db.save_agent_token(&callsign, &token).await;
            token
        }
    };
    api_client.set_agent_token(&agent_token);

    let universe = Universe::new(&api_client, &db);
    let agent = api_client.get_agent().await.expect("Failed to load agent");
    let system = agent.headquarters.system();
    let ledger = Arc::new(Ledger::new(&callsign, &db, agent.credits));

    let ships = api_client
        .get_all_ships()
        .await
        .expect("Failed to load ships");
    let fleet = Arc::new(DashMap::new());
    for ship in ships {
        fleet.insert(ship.symbol.clone(), Arc::new(Mutex::new(ship)));
    }
    info!(
        "Loaded agent {} ${} with {} ships",
        callsign,
        agent.credits,
        fleet.len()
    );

    let registry = ShipAssignmentRegistry::new(&callsign, &db);
    let containers = ContainerManager::new(&callsign, &db);
    let storage = Arc::new(StorageCoordinator::new());
    let rendezvous = Arc::new(GasRendezvous::new());

    let ctx = CoordinatorContext {
        player_id: callsign.clone(),
        system,
        api_client: api_client.clone(),
        db: db.clone(),
        universe: universe.clone(),
        ledger: ledger.clone(),
        registry: registry.clone(),
        containers: containers.clone(),
        fleet: fleet.clone(),
    };

    if CONFIG
        .worker_filter
        .is_match(&ContainerType::ContractCoordinator.to_string())
    {
        let coordinator = ContractCoordinator::new(&ctx);
        let record = ContainerRecord::new(
            ContainerType::ContractCoordinator,
            None,
            &callsign,
            json!({}),
        );
        containers.persist(&record).await;
        let record_id = record.id.clone();
        containers
            .start(&record.id, None, None, move |token| async move {
                coordinator.run(&record_id, token).await
            })
            .await;
    }

    if CONFIG
        .worker_filter
        .is_match(&ContainerType::GasCoordinator.to_string())
    {
        let coordinator = GasCoordinator::new(&ctx, &storage, &rendezvous);
        let record =
            ContainerRecord::new(ContainerType::GasCoordinator, None, &callsign, json!({}));
        containers.persist(&record).await;
        let record_id = record.id.clone();
        containers
            .start(&record.id, None, None, move |token| async move {
                coordinator.run(&record_id, token).await
            })
            .await;
    }

    if CONFIG
        .worker_filter
        .is_match(&ContainerType::MfgCoordinator.to_string())
    {
        let coordinator = MfgCoordinator::new(&ctx, &storage);
        let record =
            ContainerRecord::new(ContainerType::MfgCoordinator, None, &callsign, json!({}));
        containers.persist(&record).await;
        let record_id = record.id.clone();
        containers
            .start(&record.id, None, None, move |token| async move {
                coordinator.run(&record_id, token).await
            })
            .await;
    }

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    info!("Shutdown requested");
    containers.shutdown().await;
    info!("All containers stopped");
}
