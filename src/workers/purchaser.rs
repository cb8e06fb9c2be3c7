use crate::error::{Error, Result};
use crate::models::{MarketActivity, MarketSupply};
use crate::ship_controller::ShipController;
use log::*;
use std::cmp::min;

/// Per-round purchase fraction by supply level. Thin markets get nibbled,
/// flush markets get drained faster.
pub fn supply_multiplier(supply: Option<MarketSupply>) -> f64 {
    match supply {
        Some(MarketSupply::Abundant) => 0.80,
        Some(MarketSupply::High) => 0.60,
        Some(MarketSupply::Moderate) => 0.40,
        Some(MarketSupply::Limited) => 0.20,
        Some(MarketSupply::Scarce) => 0.10,
        None => 0.40,
    }
}

/// Activity modifier: weak markets tolerate bigger bites, restricted ones
/// don't.
pub fn activity_modifier(activity: Option<MarketActivity>) -> f64 {
    match activity {
        Some(MarketActivity::Weak) => 1.15,
        Some(MarketActivity::Growing) => 1.05,
        Some(MarketActivity::Strong) => 0.85,
        Some(MarketActivity::Restricted) => 0.75,
        None => 1.00,
    }
}

/// Units allowed in one purchase round:
/// `trade_volume × supply_multiplier × activity_modifier`, the fraction
/// capped at 1.0. `trade_volume <= 0` disables the cap.
pub fn purchase_round_cap(
    trade_volume: i64,
    supply: Option<MarketSupply>,
    activity: Option<MarketActivity>,
) -> i64 {
    if trade_volume <= 0 {
        return i64::MAX;
    }
    let fraction = (supply_multiplier(supply) * activity_modifier(activity)).min(1.0);
    ((trade_volume as f64) * fraction).floor() as i64
}

#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub good: String,
    pub desired_units: i64,
    /// COLLECT_SELL only buys factory output while it's flush; the first
    /// round aborts outright below HIGH supply.
    pub require_high_supply: bool,
}

#[derive(Debug, Default, Clone)]
pub struct PurchaseOutcome {
    pub units_bought: i64,
    pub total_cost: i64,
}

/// Iterative purchase at the ship's current market. Each round re-reads the
/// market and buys at most the supply/activity-capped amount; stops when
/// the desired quantity is met, cargo is full, or the market thins out.
pub async fn purchase_iteratively(
    ship: &ShipController,
    request: &PurchaseRequest,
) -> Result<PurchaseOutcome> {
    ship.refresh_market().await?;
    let mut outcome = PurchaseOutcome::default();
    let mut first_round = true;
    loop {
        let remaining = request.desired_units - outcome.units_bought;
        if remaining <= 0 || ship.cargo_space_available() <= 0 {
            break;
        }
        let trade = ship.local_trade_good(&request.good).await?;
        if request.require_high_supply && trade.supply < MarketSupply::High {
            if first_round {
                return Err(Error::Precondition(format!(
                    "supply of {} at {} is {} (need HIGH)",
                    request.good,
                    ship.waypoint(),
                    trade.supply
                )));
            }
            debug!(
                "[{}] supply of {} dropped to {}, stopping collection",
                ship.symbol(),
                request.good,
                trade.supply
            );
            break;
        }
        let cap = purchase_round_cap(trade.trade_volume, Some(trade.supply), trade.activity);
        let units = min(min(cap, remaining), ship.cargo_space_available());
        if units <= 0 {
            debug!(
                "[{}] market too thin for another round of {}",
                ship.symbol(),
                request.good
            );
            break;
        }
        let transaction = ship.buy_goods(&request.good, units).await?;
        outcome.units_bought += transaction.units;
        outcome.total_cost += transaction.total_price;
        ship.refresh_market().await?;
        first_round = false;
    }
    Ok(outcome)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_supply_cap_table() {
        // LIMITED supply, STRONG activity, trade volume 100:
        // 100 * 0.20 * 0.85 = 17
        assert_eq!(
            purchase_round_cap(
                100,
                Some(MarketSupply::Limited),
                Some(MarketActivity::Strong)
            ),
            17
        );
        // unknown supply defaults to 0.40, unknown activity to 1.00
        assert_eq!(purchase_round_cap(100, None, None), 40);
        // fraction caps at 1.0: ABUNDANT+WEAK = 0.92, not capped here
        assert_eq!(
            purchase_round_cap(100, Some(MarketSupply::Abundant), Some(MarketActivity::Weak)),
            92
        );
        // disabled cap
        assert_eq!(purchase_round_cap(0, None, None), i64::MAX);
    }

    #[test]
    fn test_cap_never_exceeds_trade_volume() {
        let supplies = [
            None,
            Some(MarketSupply::Scarce),
            Some(MarketSupply::Limited),
            Some(MarketSupply::Moderate),
            Some(MarketSupply::High),
            Some(MarketSupply::Abundant),
        ];
        let activities = [
            None,
            Some(MarketActivity::Weak),
            Some(MarketActivity::Growing),
            Some(MarketActivity::Strong),
            Some(MarketActivity::Restricted),
        ];
        for tv in [1, 10, 60, 180] {
            for supply in supplies {
                for activity in activities {
                    let cap = purchase_round_cap(tv, supply, activity);
                    assert!(cap <= tv, "cap {} exceeds trade volume {}", cap, tv);
                }
            }
        }
    }
}
