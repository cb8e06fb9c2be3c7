use crate::database::DbClient;
use crate::models::MarketTransaction;
use log::*;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Tracks the agent's credits and per-ship reservations, and appends every
/// market transaction to the transaction log. Log writes are fire-and-forget:
/// accounting must never stall a workflow, failures only warn.
pub struct Ledger {
    player_id: String,
    db: DbClient,
    total_credits: Mutex<i64>,
    reserved_credits: Mutex<BTreeMap<String, i64>>,
}

impl Ledger {
    pub fn new(player_id: &str, db: &DbClient, start_credits: i64) -> Self {
        Ledger {
            player_id: player_id.to_string(),
            db: db.clone(),
            total_credits: Mutex::new(start_credits),
            reserved_credits: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_credits(&self, credits: i64) {
        *self.total_credits.lock().unwrap() = credits;
    }

    pub fn credits(&self) -> i64 {
        *self.total_credits.lock().unwrap()
    }

    pub fn reserve_credits(&self, ship_symbol: &str, amount: i64) {
        debug!("Setting {} credits reserved for {}", amount, ship_symbol);
        let mut reserved_credits = self.reserved_credits.lock().unwrap();
        reserved_credits.insert(ship_symbol.to_string(), amount);
    }

    pub fn release_reservation(&self, ship_symbol: &str) {
        let mut reserved_credits = self.reserved_credits.lock().unwrap();
        reserved_credits.remove(ship_symbol);
    }

    pub fn reserved_credits(&self) -> i64 {
        let reserved_credits = self.reserved_credits.lock().unwrap();
        reserved_credits.values().sum::<i64>()
    }

    pub fn available_credits(&self) -> i64 {
        self.credits() - self.reserved_credits()
    }

    /// Append a market transaction to the log in the background.
    pub fn record_transaction(&self, container_id: Option<&str>, transaction: &MarketTransaction) {
        let db = self.db.clone();
        let player_id = self.player_id.clone();
        let container_id = container_id.map(|s| s.to_string());
        let transaction = transaction.clone();
        tokio::spawn(async move {
            db.record_transaction(
                transaction.timestamp,
                &player_id,
                &transaction.ship_symbol,
                container_id.as_deref(),
                &transaction.trade_symbol,
                &transaction._type,
                transaction.units,
                transaction.price_per_unit,
                transaction.total_price,
                None,
                None,
            )
            .await;
        });
    }

    /// Record a contract payment with before/after balances.
    #[allow(clippy::too_many_arguments)]
    pub fn record_contract_payment(
        &self,
        container_id: Option<&str>,
        ship_symbol: &str,
        contract_id: &str,
        kind: &str,
        amount: i64,
        credits_before: Option<i64>,
        credits_after: Option<i64>,
    ) {
        let db = self.db.clone();
        let player_id = self.player_id.clone();
        let container_id = container_id.map(|s| s.to_string());
        let ship_symbol = ship_symbol.to_string();
        let contract_id = contract_id.to_string();
        let kind = kind.to_string();
        tokio::spawn(async move {
            db.record_transaction(
                chrono::Utc::now(),
                &player_id,
                &ship_symbol,
                container_id.as_deref(),
                &contract_id,
                &kind,
                0,
                0,
                amount,
                credits_before,
                credits_after,
            )
            .await;
        });
    }
}
