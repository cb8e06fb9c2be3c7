use crate::coordinators::CoordinatorContext;
use crate::error::Result;
use crate::models::{ContainerRecord, ContainerType, WaypointSymbol};
use log::*;
use serde_json::json;

/// Composite reposition score: closer is better, so is a market few of
/// our ships sit at. Ties go to the lexicographically smaller symbol.
pub const DISTANCE_WEIGHT: f64 = 1.0;
pub const COVERAGE_WEIGHT: f64 = 10.0;

pub fn market_score(distance: i64, assigned_ship_count: usize) -> f64 {
    DISTANCE_WEIGHT * distance as f64 + COVERAGE_WEIGHT * assigned_ship_count as f64
}

/// Fire-and-forget repositioning of a ship the coordinator stopped using.
/// Best-effort by design: every failure is a warning, and the container
/// and assignment are cleaned up on every exit path.
pub fn spawn_balancing_task(ctx: &CoordinatorContext, coordinator_id: &str, ship_symbol: String) {
    let ctx = ctx.clone();
    let coordinator_id = coordinator_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = run_balancing(&ctx, &coordinator_id, &ship_symbol).await {
            warn!("Balancing task for {} failed: {}", ship_symbol, e);
        }
    });
}

async fn run_balancing(
    ctx: &CoordinatorContext,
    coordinator_id: &str,
    ship_symbol: &str,
) -> Result<()> {
    let record = ContainerRecord::new(
        ContainerType::Balancing,
        Some(coordinator_id),
        &ctx.player_id,
        json!({ "ship": ship_symbol }),
    );
    ctx.containers.persist(&record).await;
    if let Err(e) = ctx.registry.assign(ship_symbol, &record.id).await {
        // someone else took the ship; that's fine, balancing yields
        ctx.containers.remove(&record.id).await;
        debug!("Balancing skipped for {}: {}", ship_symbol, e);
        return Ok(());
    }

    let result = reposition(ctx, &record.id, ship_symbol).await;

    ctx.registry.release(ship_symbol, "balancing done").await;
    ctx.containers.remove(&record.id).await;
    result
}

async fn reposition(
    ctx: &CoordinatorContext,
    container_id: &str,
    ship_symbol: &str,
) -> Result<()> {
    let target = match pick_balancing_target(ctx, ship_symbol).await? {
        Some(target) => target,
        None => return Ok(()),
    };
    info!("Balancing: repositioning {} to {}", ship_symbol, target);
    let controller =
        ctx.ship_controller(ship_symbol, container_id, ctx.containers.root_token().child_token());
    controller.goto_waypoint(&target).await?;
    Ok(())
}

/// Lowest distance+coverage score over the system's markets.
async fn pick_balancing_target(
    ctx: &CoordinatorContext,
    ship_symbol: &str,
) -> Result<Option<WaypointSymbol>> {
    let graph = ctx.universe.get_graph(&ctx.system).await?;
    let ship_waypoint = {
        let ship = ctx.ship_arc(ship_symbol);
        match ship {
            Some(ship) => ship.lock().unwrap().nav.waypoint_symbol.clone(),
            None => return Ok(None),
        }
    };
    let ship_location = match graph.waypoints.get(&ship_waypoint) {
        Some(waypoint) => waypoint.clone(),
        None => return Ok(None),
    };

    // how many of our ships already sit at each waypoint
    let fleet = ctx.fleet_snapshot();
    let count_at = |waypoint: &WaypointSymbol| {
        fleet
            .iter()
            .filter(|s| s.symbol != ship_symbol && s.nav.waypoint_symbol == *waypoint)
            .count()
    };

    let markets = ctx.universe.get_system_markets(&ctx.system).await?;
    let mut scored: Vec<(f64, WaypointSymbol)> = markets
        .iter()
        .filter_map(|(remote, _)| {
            let waypoint = graph.waypoints.get(&remote.symbol)?;
            let d = crate::util::distance(&ship_location, waypoint);
            Some((market_score(d, count_at(&remote.symbol)), remote.symbol.clone()))
        })
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
    Ok(scored.first().map(|(_, symbol)| symbol.clone()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_market_score_is_numeric_not_bracketed() {
        // the composite overlaps across "brackets"; tests pin numbers only
        assert_eq!(market_score(0, 0), 0.0);
        assert_eq!(market_score(50, 0), 50.0);
        assert_eq!(market_score(0, 5), 50.0);
        // a close but crowded market can score worse than a far empty one
        assert!(market_score(10, 3) > market_score(35, 0));
    }
}
