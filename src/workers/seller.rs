use crate::error::Result;
use crate::ship_controller::ShipController;
use std::cmp::min;

#[derive(Debug, Default, Clone)]
pub struct SaleOutcome {
    pub units_sold: i64,
    pub total_revenue: i64,
}

/// Sell `units` of `good` at the current market, split into trade-volume
/// sized transactions, re-reading the market between rounds.
pub async fn sell_cargo(ship: &ShipController, good: &str, units: i64) -> Result<SaleOutcome> {
    ship.refresh_market().await?;
    let mut outcome = SaleOutcome::default();
    let mut remaining = min(units, ship.cargo_good_count(good));
    while remaining > 0 {
        let trade = ship.local_trade_good(good).await?;
        let sell_units = min(trade.trade_volume, remaining);
        assert!(sell_units > 0);
        let transaction = ship.sell_goods(good, sell_units).await?;
        outcome.units_sold += transaction.units;
        outcome.total_revenue += transaction.total_price;
        remaining -= sell_units;
        ship.refresh_market().await?;
    }
    Ok(outcome)
}

/// Sell everything in the hold.
pub async fn sell_all(ship: &ShipController) -> Result<SaleOutcome> {
    let (units_sold, total_revenue) = ship.sell_all_cargo().await?;
    Ok(SaleOutcome {
        units_sold,
        total_revenue,
    })
}
