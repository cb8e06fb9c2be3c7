use crate::api_client::ApiClient;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::models::{Contract, Deliver};
use crate::ship_controller::ShipController;
use log::*;
use std::cmp::min;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct ContractWorkflowOutcome {
    pub contract_id: String,
    pub newly_negotiated: bool,
    pub accepted: bool,
    pub fulfilled: bool,
    pub total_trips: u32,
    pub total_cost: i64,
    pub total_payment: i64,
}

/// Five idempotent phases: find-or-negotiate, evaluate, accept, deliver,
/// fulfil. A restart in any phase resumes without double-spending: held
/// cargo is delivered before anything is bought, an accepted contract is
/// never re-accepted.
pub async fn run(
    api: ApiClient,
    ship: ShipController,
    ledger: Arc<Ledger>,
) -> Result<ContractWorkflowOutcome> {
    info!("Starting contract workflow for {}", ship.symbol());
    ship.wait_for_transit().await?;
    let mut outcome = ContractWorkflowOutcome::default();

    // Phase 1: find an open contract or negotiate a new one
    let mut contract = match find_open_contract(&api).await? {
        Some(contract) => contract,
        None => {
            let contract = ship.negotiate_contract().await?;
            info!(
                "[{}] Negotiated contract {} ({})",
                ship.symbol(),
                contract.id,
                contract.contract_type
            );
            outcome.newly_negotiated = true;
            contract
        }
    };
    outcome.contract_id = contract.id.clone();

    // Phase 2: profitability is informational; the on-accept payment means
    // we always take the contract
    log_profitability(&ship, &contract).await;

    // Phase 3: accept
    if !contract.accepted {
        let response = api.accept_contract(&contract.id).await?;
        ledger.set_credits(response.agent.credits);
        record_payment_async(
            &api,
            &ledger,
            &ship,
            &contract.id,
            "CONTRACT_ACCEPT",
            contract.terms.payment.on_accepted,
        );
        contract = response.contract;
    }
    outcome.accepted = true;

    // Phase 4: deliveries, one unfinished delivery at a time
    while let Some(deliver) = contract.first_unfinished_delivery().cloned() {
        contract = execute_delivery(&ship, &contract.id, &deliver, &mut outcome).await?;
    }

    // Phase 5: fulfil
    if !contract.fulfilled {
        let response = api.fulfill_contract(&contract.id).await?;
        ledger.set_credits(response.agent.credits);
        record_payment_async(
            &api,
            &ledger,
            &ship,
            &contract.id,
            "CONTRACT_FULFILL",
            contract.terms.payment.on_fulfilled,
        );
        contract = response.contract;
    }
    outcome.fulfilled = contract.fulfilled;
    outcome.total_payment = contract.total_payment();
    info!(
        "[{}] Contract {} fulfilled: {} trips, cost ${}, payment ${}, profit ${}",
        ship.symbol(),
        contract.id,
        outcome.total_trips,
        outcome.total_cost,
        outcome.total_payment,
        outcome.total_payment - outcome.total_cost
    );
    Ok(outcome)
}

async fn find_open_contract(api: &ApiClient) -> Result<Option<Contract>> {
    let now = chrono::Utc::now();
    let contracts = api.get_contracts().await?;
    Ok(contracts
        .into_iter()
        .find(|c| !c.fulfilled && (c.accepted || c.deadline_to_accept > now)))
}

async fn log_profitability(ship: &ShipController, contract: &Contract) {
    let deliver = match contract.first_unfinished_delivery() {
        Some(deliver) => deliver,
        None => return,
    };
    let purchase = ship
        .universe
        .find_purchase_market(&ship.system(), &deliver.trade_symbol)
        .await;
    match purchase {
        Ok(Some((market, trade))) => {
            let estimated_cost = trade.purchase_price * deliver.units_remaining();
            let reward = contract.total_payment();
            info!(
                "[{}] Contract {}: {} {} from {} @ ${}, est. cost ${}, reward ${}, est. profit ${}",
                ship.symbol(),
                contract.id,
                deliver.units_remaining(),
                deliver.trade_symbol,
                market,
                trade.purchase_price,
                estimated_cost,
                reward,
                reward - estimated_cost
            );
        }
        _ => info!(
            "[{}] Contract {}: no purchase market data for {} yet",
            ship.symbol(),
            contract.id,
            deliver.trade_symbol
        ),
    }
}

/// One delivery line: loop trips of buy-at-source, deliver-at-destination
/// until the line is fulfilled. Held cargo is always delivered first, so a
/// resumed workflow never re-buys what it already carries.
async fn execute_delivery(
    ship: &ShipController,
    contract_id: &str,
    deliver: &Deliver,
    outcome: &mut ContractWorkflowOutcome,
) -> Result<Contract> {
    let good = &deliver.trade_symbol;
    ship.reload().await?;
    // anything that isn't the contract good is dead weight for capacity math
    ship.jettison_all_except(good).await?;

    let mut remaining = deliver.units_remaining();
    loop {
        assert!(remaining > 0);
        let held = ship.cargo_good_count(good);
        if held == 0 {
            let (market, _trade) = ship
                .universe
                .find_purchase_market(&ship.system(), good)
                .await?
                .ok_or_else(|| Error::NoMarket(good.to_string()))?;
            let to_buy = min(remaining, ship.cargo_space_available());
            ship.navigate_and_dock(&market).await?;
            outcome.total_cost += buy_exact(ship, good, to_buy).await?;
        }

        ship.navigate_and_dock(&deliver.destination_symbol).await?;
        let units = min(ship.cargo_good_count(good), remaining);
        let response = ship.deliver_contract(contract_id, good, units).await?;
        outcome.total_trips += 1;
        remaining -= units;
        debug!(
            "[{}] Delivered {} {} ({} remaining)",
            ship.symbol(),
            units,
            good,
            remaining
        );
        if remaining <= 0 {
            return Ok(response.contract);
        }
    }
}

/// Buy exactly `units`, split into trade-volume sized transactions.
async fn buy_exact(ship: &ShipController, good: &str, units: i64) -> Result<i64> {
    ship.refresh_market().await?;
    let mut total_cost = 0;
    let mut remaining = units;
    while remaining > 0 {
        let trade = ship.local_trade_good(good).await?;
        let buy_units = min(trade.trade_volume, remaining);
        assert!(buy_units > 0);
        let transaction = ship.buy_goods(good, buy_units).await?;
        total_cost += transaction.total_price;
        remaining -= buy_units;
        ship.refresh_market().await?;
    }
    Ok(total_cost)
}

/// Ledger entries are best-effort and must not block the workflow: a
/// background task fetches the post-payment balance and appends the entry,
/// warning on failure.
fn record_payment_async(
    api: &ApiClient,
    ledger: &Arc<Ledger>,
    ship: &ShipController,
    contract_id: &str,
    kind: &str,
    amount: i64,
) {
    let api = api.clone();
    let ledger = ledger.clone();
    let ship_symbol = ship.symbol();
    let container_id = ship.container_id().to_string();
    let contract_id = contract_id.to_string();
    let kind = kind.to_string();
    tokio::spawn(async move {
        match api.get_agent().await {
            Ok(agent) => {
                ledger.set_credits(agent.credits);
                ledger.record_contract_payment(
                    Some(&container_id),
                    &ship_symbol,
                    &contract_id,
                    &kind,
                    amount,
                    Some(agent.credits - amount),
                    Some(agent.credits),
                );
            }
            Err(e) => warn!(
                "Failed to record {} ledger entry for {}: {}",
                kind, contract_id, e
            ),
        }
    });
}
