use crate::error::{Error, Result};
use crate::models::{MarketSupply, SystemSymbol, WaypointSymbol};
use crate::universe::Universe;
use futures::future::BoxFuture;
use log::*;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyChainStrategy {
    /// Buy whenever any market has stock; fabricate only as a fallback.
    PreferBuy,
    /// Fabricate whenever a recipe exists, unless supply is flush.
    PreferFabricate,
    /// Fabricate scarce goods, buy liquid ones.
    Smart,
}

#[derive(Debug, Clone)]
pub struct SupplyChainNode {
    pub good: String,
    pub acquisition: Acquisition,
}

#[derive(Debug, Clone)]
pub enum Acquisition {
    Buy {
        market: WaypointSymbol,
    },
    Fabricate {
        factory: WaypointSymbol,
        inputs: Vec<SupplyChainNode>,
    },
}

impl SupplyChainNode {
    pub fn fabricated(&self) -> bool {
        matches!(self.acquisition, Acquisition::Fabricate { .. })
    }
}

/// Resolves a target good into a BUY/FABRICATE dependency tree over the
/// system's markets. The target itself is always fabricated; each input is
/// decided by the strategy. Recursion carries the path set to reject
/// circular recipes.
pub struct SupplyChainResolver {
    universe: Universe,
    strategy: SupplyChainStrategy,
}

impl SupplyChainResolver {
    pub fn new(universe: &Universe, strategy: SupplyChainStrategy) -> Self {
        Self {
            universe: universe.clone(),
            strategy,
        }
    }

    pub async fn resolve(&self, system: &SystemSymbol, good: &str) -> Result<SupplyChainNode> {
        let mut path = BTreeSet::new();
        self.resolve_node(system, good.to_string(), &mut path, true)
            .await
    }

    fn resolve_node<'a>(
        &'a self,
        system: &'a SystemSymbol,
        good: String,
        path: &'a mut BTreeSet<String>,
        is_root: bool,
    ) -> BoxFuture<'a, Result<SupplyChainNode>> {
        Box::pin(async move {
            if !path.insert(good.clone()) {
                return Err(Error::CircularDependency(good));
            }

            let recipe = self.universe.find_recipe(system, &good).await?;
            let purchase = self.universe.find_purchase_market(system, &good).await?;

            let fabricate = if is_root {
                if recipe.is_none() {
                    return Err(Error::NoFactory(good));
                }
                true
            } else {
                self.decide_fabricate(&good, &recipe, &purchase)?
            };

            let node = if fabricate {
                let (factory, input_goods) = recipe.unwrap();
                debug!(
                    "supply chain: FABRICATE {} at {} from {:?}",
                    good, factory, input_goods
                );
                let mut inputs = vec![];
                for input in input_goods {
                    let input_node = self
                        .resolve_node(system, input, path, false)
                        .await?;
                    inputs.push(input_node);
                }
                SupplyChainNode {
                    good: good.clone(),
                    acquisition: Acquisition::Fabricate { factory, inputs },
                }
            } else {
                let (market, trade) = purchase.unwrap();
                debug!(
                    "supply chain: BUY {} at {} (supply {})",
                    good, market, trade.supply
                );
                SupplyChainNode {
                    good: good.clone(),
                    acquisition: Acquisition::Buy { market },
                }
            };
            path.remove(&good);
            Ok(node)
        })
    }

    fn decide_fabricate(
        &self,
        good: &str,
        recipe: &Option<(WaypointSymbol, Vec<String>)>,
        purchase: &Option<(WaypointSymbol, crate::models::MarketTradeGood)>,
    ) -> Result<bool> {
        let supply = purchase.as_ref().map(|(_, trade)| trade.supply);
        match (recipe, purchase) {
            (None, None) => Err(Error::NoRecipe(good.to_string())),
            (None, Some(_)) => Ok(false),
            (Some(_), None) => Ok(true),
            (Some(_), Some(_)) => {
                let supply = supply.unwrap();
                let fabricate = match self.strategy {
                    SupplyChainStrategy::PreferBuy => false,
                    SupplyChainStrategy::PreferFabricate => supply < MarketSupply::High,
                    SupplyChainStrategy::Smart => supply <= MarketSupply::Limited,
                };
                Ok(fabricate)
            }
        }
    }
}
