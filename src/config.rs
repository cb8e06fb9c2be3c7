use crate::manufacturing::resolver::SupplyChainStrategy;
use lazy_static::lazy_static;
use regex::Regex;

pub struct Config {
    pub api_base_url: String,
    // coordinators skip worker kinds whose container-type name doesn't match
    pub worker_filter: Regex,
    pub mfg_products: Vec<String>,
    pub mfg_strategy: SupplyChainStrategy,
    pub gas_dry_run: bool,
}

lazy_static! {
    pub static ref CONFIG: Config = {
        let api_base_url = std::env::var("API_BASE_URL")
            .unwrap_or_else(|_| "https://api.spacetraders.io/v2".to_string());
        let worker_filter = match std::env::var("WORKER_FILTER") {
            Ok(val) if !val.is_empty() => {
                Regex::new(&val).expect("Invalid WORKER_FILTER regex")
            }
            _ => Regex::new(".*").expect("Invalid default regex"),
        };
        let mfg_products = match std::env::var("MFG_PRODUCTS") {
            Ok(val) if !val.is_empty() => val
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            _ => vec![],
        };
        let mfg_strategy = match std::env::var("MFG_STRATEGY").as_deref() {
            Ok("PREFER_BUY") => SupplyChainStrategy::PreferBuy,
            Ok("PREFER_FABRICATE") => SupplyChainStrategy::PreferFabricate,
            _ => SupplyChainStrategy::Smart,
        };
        let gas_dry_run = std::env::var("GAS_DRY_RUN")
            .map(|val| val == "1")
            .unwrap_or(false);
        Config {
            api_base_url,
            worker_filter,
            mfg_products,
            mfg_strategy,
            gas_dry_run,
        }
    };
}
