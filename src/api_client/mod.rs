pub mod api_models;

use crate::config::CONFIG;
use crate::models::*;
use api_models::*;
use log::*;
use reqwest::{self, Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Error code the game returns while a ship's cooldown is still running.
pub const COOLDOWN_ERROR_CODE: i64 = 4000;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("api error {status} code {code}: {message}")]
    Game {
        status: u16,
        code: i64,
        message: String,
        data: Value,
    },
}

impl ApiError {
    fn from_error_body(status: StatusCode, body: &str) -> ApiError {
        let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let error = &parsed["error"];
        ApiError::Game {
            status: status.as_u16(),
            code: error["code"].as_i64().unwrap_or(0),
            message: error["message"]
                .as_str()
                .unwrap_or(body)
                .to_string(),
            data: error["data"].clone(),
        }
    }

    pub fn error_code(&self) -> Option<i64> {
        match self {
            ApiError::Game { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Remaining cooldown reported with a code-4000 error.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        match self {
            ApiError::Game { code, data, .. } if *code == COOLDOWN_ERROR_CODE => {
                let seconds = data["cooldown"]["remainingSeconds"]
                    .as_i64()
                    .or_else(|| data["remainingSeconds"].as_i64())?;
                Some(Duration::from_secs(seconds.max(0) as u64))
            }
            _ => None,
        }
    }

    /// How long to sleep before retrying a cooldown error: remaining + 1s
    /// buffer so the retry lands after the server-side expiry.
    pub fn cooldown_retry_after(&self) -> Option<Duration> {
        self.cooldown_remaining()
            .map(|d| d + Duration::from_secs(1))
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ApiError::Game { status: 429, .. })
    }

    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Game { status, .. } => *status >= 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    agent_token: Arc<RwLock<Option<String>>>,
    next_request_ts: Arc<Mutex<Option<Instant>>>,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient {
    pub fn new() -> ApiClient {
        let user_agent = format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let client = reqwest::ClientBuilder::new()
            .user_agent(user_agent)
            .timeout(std::time::Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        ApiClient {
            client,
            base_url: CONFIG.api_base_url.to_string(),
            agent_token: Arc::new(RwLock::new(None)),
            next_request_ts: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_agent_token(&self, token: &str) {
        let mut agent_token = self.agent_token.write().unwrap();
        assert!(
            agent_token.is_none(),
            "Cannot set agent token while agent token is already set"
        );
        *agent_token = Some(token.to_string());
    }

    pub fn agent_token(&self) -> Option<String> {
        self.agent_token.read().unwrap().clone()
    }

    pub async fn status(&self) -> Result<Status, ApiError> {
        self.get("/").await
    }

    pub async fn register(&self, faction: &str, callsign: &str) -> Result<String, ApiError> {
        assert!(
            self.agent_token().is_none(),
            "Cannot register while agent token is already set"
        );
        debug!("Registering new agent {} with faction {}", callsign, faction);
        let body: Value = self
            .post(
                "/register",
                &json!({
                    "faction": faction,
                    "symbol": callsign,
                }),
            )
            .await?;
        let token = body["data"]["token"]
            .as_str()
            .expect("Registration response missing token")
            .to_string();
        Ok(token)
    }

    pub async fn get_agent(&self) -> Result<Agent, ApiError> {
        let response: Data<Agent> = self.get("/my/agent").await?;
        Ok(response.data)
    }

    pub async fn get_ship(&self, ship_symbol: &str) -> Result<Ship, ApiError> {
        let response: Data<Ship> = self.get(&format!("/my/ships/{}", ship_symbol)).await?;
        Ok(response.data)
    }

    pub async fn get_all_ships(&self) -> Result<Vec<Ship>, ApiError> {
        self.get_all_pages("/my/ships").await
    }

    pub async fn get_factions(&self) -> Result<Vec<Faction>, ApiError> {
        self.get_all_pages("/factions").await
    }

    pub async fn get_system_waypoints(
        &self,
        system_symbol: &SystemSymbol,
    ) -> Result<Vec<Waypoint>, ApiError> {
        self.get_all_pages(&format!("/systems/{}/waypoints", system_symbol))
            .await
    }

    pub async fn get_market(&self, symbol: &WaypointSymbol) -> Result<Market, ApiError> {
        let market: Data<Market> = self
            .get(&format!(
                "/systems/{}/waypoints/{}/market",
                symbol.system(),
                symbol
            ))
            .await?;
        Ok(market.data)
    }

    pub async fn get_shipyard(&self, symbol: &WaypointSymbol) -> Result<Shipyard, ApiError> {
        let shipyard: Data<Shipyard> = self
            .get(&format!(
                "/systems/{}/waypoints/{}/shipyard",
                symbol.system(),
                symbol
            ))
            .await?;
        Ok(shipyard.data)
    }

    pub async fn get_construction(
        &self,
        symbol: &WaypointSymbol,
    ) -> Result<Option<Construction>, ApiError> {
        let path = format!(
            "/systems/{}/waypoints/{}/construction",
            symbol.system(),
            symbol
        );
        match self.get::<Data<Construction>>(&path).await {
            Ok(response) => Ok(Some(response.data)),
            Err(ApiError::Game { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn orbit_ship(&self, ship_symbol: &str) -> Result<ShipNav, ApiError> {
        let uri = format!("/my/ships/{}/orbit", ship_symbol);
        let response: Data<OrbitResponse> = self.post(&uri, &json!({})).await?;
        Ok(response.data.nav)
    }

    pub async fn dock_ship(&self, ship_symbol: &str) -> Result<ShipNav, ApiError> {
        let uri = format!("/my/ships/{}/dock", ship_symbol);
        let response: Data<OrbitResponse> = self.post(&uri, &json!({})).await?;
        Ok(response.data.nav)
    }

    pub async fn set_flight_mode(
        &self,
        ship_symbol: &str,
        mode: &ShipFlightMode,
    ) -> Result<FlightModeResponse, ApiError> {
        let uri = format!("/my/ships/{}/nav", ship_symbol);
        let response: Data<FlightModeResponse> = self
            .patch(&uri, &json!({ "flightMode": mode }))
            .await?;
        Ok(response.data)
    }

    pub async fn navigate_ship(
        &self,
        ship_symbol: &str,
        waypoint: &WaypointSymbol,
    ) -> Result<NavigateResponse, ApiError> {
        let uri = format!("/my/ships/{}/navigate", ship_symbol);
        let response: Data<NavigateResponse> = self
            .post(&uri, &json!({ "waypointSymbol": waypoint }))
            .await?;
        Ok(response.data)
    }

    pub async fn purchase_cargo(
        &self,
        ship_symbol: &str,
        good: &str,
        units: i64,
    ) -> Result<TradeResponse, ApiError> {
        let uri = format!("/my/ships/{}/purchase", ship_symbol);
        let body = json!({ "symbol": good, "units": units });
        let response: Data<TradeResponse> = self.post(&uri, &body).await?;
        Ok(response.data)
    }

    pub async fn sell_cargo(
        &self,
        ship_symbol: &str,
        good: &str,
        units: i64,
    ) -> Result<TradeResponse, ApiError> {
        let uri = format!("/my/ships/{}/sell", ship_symbol);
        let body = json!({ "symbol": good, "units": units });
        let response: Data<TradeResponse> = self.post(&uri, &body).await?;
        Ok(response.data)
    }

    pub async fn transfer_cargo(
        &self,
        from_ship: &str,
        to_ship: &str,
        good: &str,
        units: i64,
    ) -> Result<TransferResponse, ApiError> {
        let uri = format!("/my/ships/{}/transfer", from_ship);
        let body = json!({
            "shipSymbol": to_ship,
            "tradeSymbol": good,
            "units": units,
        });
        let response: Data<TransferResponse> = self.post(&uri, &body).await?;
        Ok(response.data)
    }

    pub async fn jettison_cargo(
        &self,
        ship_symbol: &str,
        good: &str,
        units: i64,
    ) -> Result<ShipCargo, ApiError> {
        let uri = format!("/my/ships/{}/jettison", ship_symbol);
        let body = json!({ "symbol": good, "units": units });
        let response: Data<JettisonResponse> = self.post(&uri, &body).await?;
        Ok(response.data.cargo)
    }

    /// May return a code-4000 cooldown error; callers parse
    /// `cooldown_retry_after` and retry in place.
    pub async fn siphon_resources(&self, ship_symbol: &str) -> Result<SiphonResponse, ApiError> {
        let uri = format!("/my/ships/{}/siphon", ship_symbol);
        let response: Data<SiphonResponse> = self.post(&uri, &json!({})).await?;
        Ok(response.data)
    }

    /// `units = None` refuels to capacity.
    pub async fn refuel_ship(
        &self,
        ship_symbol: &str,
        units: Option<i64>,
    ) -> Result<RefuelResponse, ApiError> {
        let uri = format!("/my/ships/{}/refuel", ship_symbol);
        let body = match units {
            Some(units) => json!({ "units": units }),
            None => json!({}),
        };
        let response: Data<RefuelResponse> = self.post(&uri, &body).await?;
        Ok(response.data)
    }

    pub async fn negotiate_contract(
        &self,
        ship_symbol: &str,
    ) -> Result<Contract, ApiError> {
        let uri = format!("/my/ships/{}/negotiate/contract", ship_symbol);
        let response: Data<NegotiateContractResponse> = self.post(&uri, &json!({})).await?;
        Ok(response.data.contract)
    }

    pub async fn accept_contract(
        &self,
        contract_id: &str,
    ) -> Result<AcceptContractResponse, ApiError> {
        let uri = format!("/my/contracts/{}/accept", contract_id);
        let response: Data<AcceptContractResponse> = self.post(&uri, &json!({})).await?;
        Ok(response.data)
    }

    pub async fn deliver_contract(
        &self,
        contract_id: &str,
        ship_symbol: &str,
        good: &str,
        units: i64,
    ) -> Result<DeliverContractResponse, ApiError> {
        let uri = format!("/my/contracts/{}/deliver", contract_id);
        let body = json!({
            "shipSymbol": ship_symbol,
            "tradeSymbol": good,
            "units": units,
        });
        let response: Data<DeliverContractResponse> = self.post(&uri, &body).await?;
        Ok(response.data)
    }

    pub async fn fulfill_contract(
        &self,
        contract_id: &str,
    ) -> Result<FulfillContractResponse, ApiError> {
        let uri = format!("/my/contracts/{}/fulfill", contract_id);
        let response: Data<FulfillContractResponse> = self.post(&uri, &json!({})).await?;
        Ok(response.data)
    }

    pub async fn get_contracts(&self) -> Result<Vec<Contract>, ApiError> {
        self.get_all_pages("/my/contracts").await
    }

    pub async fn supply_construction(
        &self,
        site: &WaypointSymbol,
        ship_symbol: &str,
        good: &str,
        units: i64,
    ) -> Result<SupplyConstructionResponse, ApiError> {
        let uri = format!(
            "/systems/{}/waypoints/{}/construction/supply",
            site.system(),
            site
        );
        let body = json!({
            "shipSymbol": ship_symbol,
            "tradeSymbol": good,
            "units": units,
        });
        let response: Data<SupplyConstructionResponse> = self.post(&uri, &body).await?;
        Ok(response.data)
    }

    pub async fn get_all_pages<T>(&self, path: &str) -> Result<Vec<T>, ApiError>
    where
        T: serde::de::DeserializeOwned,
    {
        const PAGE_SIZE: u32 = 20;
        let mut page = 1;
        let mut vec = Vec::new();
        loop {
            let response: PaginatedList<T> = self
                .get(&format!("{}?page={}&limit={}", path, page, PAGE_SIZE))
                .await?;
            vec.extend(response.data);
            if response.meta.page * PAGE_SIZE >= response.meta.total {
                break;
            }
            page += 1;
        }
        Ok(vec)
    }
}

/// Private methods

impl ApiClient {
    pub async fn get<T>(&self, path: &str) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
    {
        self.request(Method::GET, path, None::<&()>).await
    }

    pub async fn post<T, U>(&self, path: &str, json_body: &U) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
        U: Serialize,
    {
        self.request(Method::POST, path, Some(json_body)).await
    }

    pub async fn patch<T, U>(&self, path: &str, json_body: &U) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
        U: Serialize,
    {
        self.request(Method::PATCH, path, Some(json_body)).await
    }

    async fn wait_rate_limit(&self) {
        let now = Instant::now();
        let request_instant = {
            let mut next_request_ts = self.next_request_ts.lock().unwrap();
            let request_instant = match *next_request_ts {
                Some(ts) if ts > now => ts,
                _ => now,
            };
            *next_request_ts = Some(request_instant + std::time::Duration::from_millis(501));
            request_instant
        };
        let wait_duration = request_instant
            .checked_duration_since(now)
            .unwrap_or_default();
        if wait_duration >= std::time::Duration::from_secs(10) {
            warn!(
                "Rate limit queue exceeds 10 seconds: {:.3}s",
                wait_duration.as_secs_f64()
            );
        }
        tokio::time::sleep_until(request_instant).await;
    }

    async fn request<T, U>(
        &self,
        method: Method,
        path: &str,
        json_body: Option<&U>,
    ) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
        U: Serialize,
    {
        self.wait_rate_limit().await;
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = json_body {
            request = request.json(body);
        }
        if let Some(token) = self.agent_token() {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let response = request.send().await?;
        let status = response.status();
        debug!("{} {} {}", status.as_u16(), method, path);

        if status.is_success() {
            let content = response.json::<T>().await?;
            Ok(content)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_error_body(status, &body))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cooldown_error_parse() {
        let body = r#"{"error":{"message":"Ship action is still on cooldown for 49 second(s).","code":4000,"data":{"cooldown":{"shipSymbol":"CALLSIGN-4","totalSeconds":70,"remainingSeconds":49,"expiration":"2024-02-04T12:00:00.000Z"}}}}"#;
        let error = ApiError::from_error_body(StatusCode::CONFLICT, body);
        assert_eq!(error.error_code(), Some(COOLDOWN_ERROR_CODE));
        assert_eq!(
            error.cooldown_remaining(),
            Some(Duration::from_secs(49))
        );
        // retry lands 1s after the server-side expiry
        assert_eq!(
            error.cooldown_retry_after(),
            Some(Duration::from_secs(50))
        );
        assert!(!error.is_transient());
    }

    #[test]
    fn test_non_cooldown_error() {
        let body = r#"{"error":{"message":"Market does not sell fuel","code":4600}}"#;
        let error = ApiError::from_error_body(StatusCode::BAD_REQUEST, body);
        assert_eq!(error.error_code(), Some(4600));
        assert_eq!(error.cooldown_remaining(), None);
        assert!(!error.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        let error = ApiError::from_error_body(StatusCode::BAD_GATEWAY, "upstream died");
        assert!(error.is_transient());
        let rate_limited = ApiError::from_error_body(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"rate limited","code":429}}"#,
        );
        assert!(rate_limited.is_rate_limit());
    }
}
