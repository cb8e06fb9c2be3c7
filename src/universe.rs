use crate::api_client::ApiClient;
use crate::database::DbClient;
use crate::error::Result;
use crate::models::{
    Construction, Market, MarketRemoteView, MarketSupply, MarketTradeGood, MarketType,
    SystemSymbol, Waypoint, WaypointSymbol, WithTimestamp,
};
use crate::pathfinding::{Pathfinding, Route};
use chrono::Utc;
use dashmap::DashMap;
use log::*;
use std::collections::BTreeMap;
use std::sync::Arc;

pub enum WaypointFilter {
    Imports(String),
    Exports(String),
    Market,
    GasGiant,
}

/// Read-only graph snapshot consumed by routing and the balancing scorer.
#[derive(Debug, Clone)]
pub struct SystemGraph {
    pub waypoints: BTreeMap<WaypointSymbol, GraphWaypoint>,
}

#[derive(Debug, Clone)]
pub struct GraphWaypoint {
    pub symbol: WaypointSymbol,
    pub x: i64,
    pub y: i64,
    pub has_fuel: bool,
}

impl crate::util::Coord for GraphWaypoint {
    fn x(&self) -> i64 {
        self.x
    }
    fn y(&self) -> i64 {
        self.y
    }
}

/// Shared cache of game-world data: waypoints, markets, constructions.
/// Everything in here is reconstructable from the DB + API; the DashMaps
/// only save round trips.
#[derive(Clone)]
pub struct Universe {
    api_client: ApiClient,
    db: DbClient,

    waypoints: Arc<DashMap<SystemSymbol, Arc<Vec<Waypoint>>>>,
    markets: Arc<DashMap<WaypointSymbol, Option<Arc<WithTimestamp<Market>>>>>,
    remote_markets: Arc<DashMap<WaypointSymbol, MarketRemoteView>>,
    constructions: Arc<DashMap<WaypointSymbol, Arc<WithTimestamp<Option<Construction>>>>>,
    pathfindings: Arc<DashMap<SystemSymbol, Arc<Pathfinding>>>,
}

impl Universe {
    pub fn new(api_client: &ApiClient, db: &DbClient) -> Self {
        Self {
            api_client: api_client.clone(),
            db: db.clone(),
            waypoints: Arc::new(DashMap::new()),
            markets: Arc::new(DashMap::new()),
            remote_markets: Arc::new(DashMap::new()),
            constructions: Arc::new(DashMap::new()),
            pathfindings: Arc::new(DashMap::new()),
        }
    }

    pub async fn get_system_waypoints(&self, system: &SystemSymbol) -> Result<Arc<Vec<Waypoint>>> {
        if let Some(waypoints) = self.waypoints.get(system) {
            return Ok(waypoints.clone());
        }
        let key = format!("waypoints/{}", system);
        let waypoints: Vec<Waypoint> = match self.db.get_value(&key).await {
            Some(waypoints) => waypoints,
            None => {
                let waypoints = self.api_client.get_system_waypoints(system).await?;
                self.db.set_value(&key, &waypoints).await;
                waypoints
            }
        };
        let waypoints = Arc::new(waypoints);
        self.waypoints.insert(system.clone(), waypoints.clone());
        Ok(waypoints)
    }

    pub async fn get_waypoint(&self, symbol: &WaypointSymbol) -> Result<Waypoint> {
        let waypoints = self.get_system_waypoints(&symbol.system()).await?;
        Ok(waypoints
            .iter()
            .find(|w| w.symbol == *symbol)
            .unwrap_or_else(|| panic!("Unknown waypoint {}", symbol))
            .clone())
    }

    pub async fn search_waypoints(
        &self,
        system: &SystemSymbol,
        filters: &[WaypointFilter],
    ) -> Result<Vec<Waypoint>> {
        let waypoints = self.get_system_waypoints(system).await?;
        let mut matched = vec![];
        for waypoint in waypoints.iter() {
            let mut ok = true;
            for filter in filters {
                match filter {
                    WaypointFilter::Market => ok &= waypoint.is_market(),
                    WaypointFilter::GasGiant => ok &= waypoint.is_gas_giant(),
                    WaypointFilter::Imports(good) => {
                        ok &= match self.get_market_remote(&waypoint.symbol).await? {
                            Some(remote) => remote.imports.iter().any(|g| g.symbol == *good),
                            None => false,
                        };
                    }
                    WaypointFilter::Exports(good) => {
                        ok &= match self.get_market_remote(&waypoint.symbol).await? {
                            Some(remote) => remote.exports.iter().any(|g| g.symbol == *good),
                            None => false,
                        };
                    }
                }
                if !ok {
                    break;
                }
            }
            if ok {
                matched.push(waypoint.clone());
            }
        }
        Ok(matched)
    }

    pub async fn get_gas_giant(&self, system: &SystemSymbol) -> Result<Option<WaypointSymbol>> {
        let giants = self
            .search_waypoints(system, &[WaypointFilter::GasGiant])
            .await?;
        Ok(giants.first().map(|w| w.symbol.clone()))
    }

    /// Immutable graph snapshot: `{symbol, x, y, has_fuel}` per waypoint.
    pub async fn get_graph(&self, system: &SystemSymbol) -> Result<SystemGraph> {
        let waypoints = self.get_system_waypoints(system).await?;
        let waypoints = waypoints
            .iter()
            .map(|w| {
                (
                    w.symbol.clone(),
                    GraphWaypoint {
                        symbol: w.symbol.clone(),
                        x: w.x,
                        y: w.y,
                        has_fuel: w.has_fuel(),
                    },
                )
            })
            .collect();
        Ok(SystemGraph { waypoints })
    }

    pub async fn get_route(
        &self,
        from: &WaypointSymbol,
        to: &WaypointSymbol,
        speed: i64,
        start_fuel: i64,
        fuel_capacity: i64,
    ) -> Result<Route> {
        let system = from.system();
        assert_eq!(system, to.system());
        let pathfinding = match self.pathfindings.get(&system) {
            Some(pathfinding) => pathfinding.clone(),
            None => {
                let waypoints = self.get_system_waypoints(&system).await?;
                let pathfinding = Arc::new(Pathfinding::new(waypoints.as_ref().clone()));
                self.pathfindings
                    .insert(system.clone(), pathfinding.clone());
                pathfinding
            }
        };
        Ok(pathfinding.get_route(from, to, speed, start_fuel, fuel_capacity))
    }

    // Markets

    pub async fn get_market_remote(
        &self,
        symbol: &WaypointSymbol,
    ) -> Result<Option<MarketRemoteView>> {
        if let Some(market) = self.remote_markets.get(symbol) {
            return Ok(Some(market.clone()));
        }
        let market = match self.db.get_market_remote(symbol).await {
            Some(market) => market,
            None => {
                let waypoint = self.get_waypoint(symbol).await?;
                if !waypoint.is_market() {
                    return Ok(None);
                }
                let market = self.api_client.get_market(symbol).await?;
                let remote = MarketRemoteView {
                    symbol: market.symbol.clone(),
                    imports: market.imports.clone(),
                    exports: market.exports.clone(),
                    exchange: market.exchange.clone(),
                };
                self.db.save_market_remote(symbol, &remote).await;
                remote
            }
        };
        self.remote_markets.insert(symbol.clone(), market.clone());
        Ok(Some(market))
    }

    pub async fn get_market(&self, symbol: &WaypointSymbol) -> Option<Arc<WithTimestamp<Market>>> {
        match self.markets.get(symbol) {
            Some(market) => market.clone(),
            None => {
                let market = self.db.get_market(symbol).await.map(Arc::new);
                self.markets.insert(symbol.clone(), market.clone());
                market
            }
        }
    }

    pub async fn save_market(&self, symbol: &WaypointSymbol, market: WithTimestamp<Market>) {
        self.markets
            .insert(symbol.clone(), Some(Arc::new(market.clone())));
        self.db.save_market(symbol, &market).await;
    }

    /// All market waypoints in a system, with whatever local data we hold.
    pub async fn get_system_markets(
        &self,
        system: &SystemSymbol,
    ) -> Result<Vec<(MarketRemoteView, Option<Arc<WithTimestamp<Market>>>)>> {
        let waypoints = self
            .search_waypoints(system, &[WaypointFilter::Market])
            .await?;
        let mut markets = vec![];
        for waypoint in waypoints {
            let remote = match self.get_market_remote(&waypoint.symbol).await? {
                Some(remote) => remote,
                None => continue,
            };
            let local = self.get_market(&waypoint.symbol).await;
            markets.push((remote, local));
        }
        Ok(markets)
    }

    /// Cheapest place to buy `good`. Imports are excluded: that's where the
    /// game wants the good delivered, not where it's sold.
    pub async fn find_purchase_market(
        &self,
        system: &SystemSymbol,
        good: &str,
    ) -> Result<Option<(WaypointSymbol, MarketTradeGood)>> {
        let markets = self.get_system_markets(system).await?;
        let mut best: Option<(WaypointSymbol, MarketTradeGood)> = None;
        for (remote, local) in markets {
            let trade = match local.as_ref().and_then(|m| m.data.trade_good(good)) {
                Some(trade) => trade.clone(),
                None => continue,
            };
            if trade._type == MarketType::Import {
                continue;
            }
            let better = match &best {
                Some((_, best_trade)) => trade.purchase_price < best_trade.purchase_price,
                None => true,
            };
            if better {
                best = Some((remote.symbol.clone(), trade));
            }
        }
        Ok(best)
    }

    /// Best place to sell `good`: highest sell price among import/exchange
    /// trades.
    pub async fn find_sell_market(
        &self,
        system: &SystemSymbol,
        good: &str,
    ) -> Result<Option<(WaypointSymbol, MarketTradeGood)>> {
        let markets = self.get_system_markets(system).await?;
        let mut best: Option<(WaypointSymbol, MarketTradeGood)> = None;
        for (remote, local) in markets {
            let trade = match local.as_ref().and_then(|m| m.data.trade_good(good)) {
                Some(trade) => trade.clone(),
                None => continue,
            };
            if trade._type == MarketType::Export {
                continue;
            }
            let better = match &best {
                Some((_, best_trade)) => trade.sell_price > best_trade.sell_price,
                None => true,
            };
            if better {
                best = Some((remote.symbol.clone(), trade));
            }
        }
        Ok(best)
    }

    /// The factory producing `good`: an EXPORT market for it. Factories are
    /// modelled by the game as export markets fed by their import goods.
    pub async fn find_factory_for_good(
        &self,
        system: &SystemSymbol,
        good: &str,
    ) -> Result<Option<WaypointSymbol>> {
        let markets = self.get_system_markets(system).await?;
        Ok(markets
            .into_iter()
            .find(|(remote, _)| remote.exports.iter().any(|g| g.symbol == good))
            .map(|(remote, _)| remote.symbol))
    }

    /// The recipe for a fabricated good: the import list of its factory.
    pub async fn find_recipe(
        &self,
        system: &SystemSymbol,
        good: &str,
    ) -> Result<Option<(WaypointSymbol, Vec<String>)>> {
        let markets = self.get_system_markets(system).await?;
        Ok(markets
            .into_iter()
            .find(|(remote, _)| remote.exports.iter().any(|g| g.symbol == good))
            .map(|(remote, _)| {
                let inputs = remote.imports.iter().map(|g| g.symbol.clone()).collect();
                (remote.symbol, inputs)
            }))
    }

    /// The factory hungriest for `gas`: the import market with the lowest
    /// current supply of it.
    pub async fn find_factory_needing_gas(
        &self,
        system: &SystemSymbol,
        gas: &str,
    ) -> Result<Option<WaypointSymbol>> {
        let markets = self.get_system_markets(system).await?;
        let mut best: Option<(WaypointSymbol, MarketSupply)> = None;
        for (remote, local) in markets {
            if !remote.imports.iter().any(|g| g.symbol == gas) {
                continue;
            }
            let supply = local
                .as_ref()
                .and_then(|m| m.data.trade_good(gas).map(|t| t.supply))
                .unwrap_or(MarketSupply::Scarce);
            let better = match &best {
                Some((_, best_supply)) => supply < *best_supply,
                None => true,
            };
            if better {
                best = Some((remote.symbol.clone(), supply));
            }
        }
        Ok(best.map(|(symbol, _)| symbol))
    }

    /// Current supply of `good` at a market, if we hold local data for it.
    pub async fn supply_of(&self, market: &WaypointSymbol, good: &str) -> Option<MarketSupply> {
        self.get_market(market)
            .await
            .and_then(|m| m.data.trade_good(good).map(|t| t.supply))
    }

    // Constructions

    pub async fn get_construction(
        &self,
        symbol: &WaypointSymbol,
    ) -> Result<Arc<WithTimestamp<Option<Construction>>>> {
        if let Some(construction) = self.constructions.get(symbol) {
            return Ok(construction.clone());
        }
        let construction = self.api_client.get_construction(symbol).await?;
        let construction = Arc::new(WithTimestamp {
            timestamp: Utc::now(),
            data: construction,
        });
        self.constructions
            .insert(symbol.clone(), construction.clone());
        Ok(construction)
    }

    pub async fn update_construction(&self, construction: &Construction) {
        debug!("Updating construction {}", construction.symbol);
        self.constructions.insert(
            construction.symbol.clone(),
            Arc::new(WithTimestamp {
                timestamp: Utc::now(),
                data: Some(construction.clone()),
            }),
        );
    }
}
