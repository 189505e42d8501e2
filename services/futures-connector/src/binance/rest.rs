//! Signed REST access to the Binance derivatives API

use super::ws;
use crate::transport::{
    AmendOrderParams, ConditionalOrderParams, ExchangeInfo, OrderParams, StreamHandle,
    VenueTransport,
};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use connector_common::{
    AccountSnapshot, AlgoAck, AlgoOrder, Candle, ConnectorConfig, ConnectorError, ConnectorResult,
    OrderAck, OrderRef, OrderState,
};
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const PROD_API: &str = "https://fapi.binance.com";
const TESTNET_API: &str = "https://testnet.binancefuture.com";
const PROD_WS: &str = "wss://fstream.binance.com";
const TESTNET_WS: &str = "wss://stream.binancefuture.com";

/// Venue rejection body
#[derive(Debug, Deserialize)]
struct VenueErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[serde(rename = "lastPrice")]
    last_price: String,
}

/// Binance USDS-M implementation of the venue transport
pub struct BinanceTransport {
    http: reqwest::Client,
    config: ConnectorConfig,
}

impl BinanceTransport {
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("building HTTP client")?;
        Ok(Self { http, config })
    }

    fn api_base(&self) -> &'static str {
        if self.config.testnet {
            TESTNET_API
        } else {
            PROD_API
        }
    }

    fn ws_base(&self) -> &'static str {
        if self.config.testnet {
            TESTNET_WS
        } else {
            PROD_WS
        }
    }

    fn sign(&self, query: &str) -> ConnectorResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|err| anyhow!("HMAC key setup failed: {err}"))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build the query string for a signed request: params plus
    /// `recvWindow`, `timestamp` and the HMAC `signature`.
    ///
    /// Kept synchronous: the form serializer is not `Send` and must not
    /// be held across an await.
    fn signed_query(&self, params: &[(&str, String)]) -> ConnectorResult<String> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            query.append_pair(key, value);
        }
        query.append_pair("recvWindow", &self.config.recv_window_ms.to_string());
        query.append_pair("timestamp", &timestamp.to_string());
        let query = query.finish();
        let signature = self.sign(&query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn signed_request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> ConnectorResult<T> {
        let query = self.signed_query(params)?;
        let url = format!("{}{path}?{query}", self.api_base());
        debug!(%method, path, "signed venue request");
        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;
        Self::decode(path, response).await
    }

    /// Execute an unsigned (public) request against the given base URL.
    async fn public_request<T: serde::de::DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> ConnectorResult<T> {
        let mut url = url::Url::parse(base)
            .and_then(|u| u.join(path))
            .map_err(|err| anyhow!("bad venue URL {base}{path}: {err}"))?;
        url.query_pairs_mut().extend_pairs(params);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;
        Self::decode(path, response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> ConnectorResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("reading {path} response body"))?;

        if !status.is_success() {
            if let Ok(venue) = serde_json::from_str::<VenueErrorBody>(&body) {
                return Err(ConnectorError::from_venue_code(venue.code, venue.msg));
            }
            return Err(anyhow!("{path} returned {status}: {body}").into());
        }
        serde_json::from_str(&body)
            .with_context(|| format!("decoding {path} response"))
            .map_err(Into::into)
    }
}

#[async_trait]
impl VenueTransport for BinanceTransport {
    async fn open_user_session(&self) -> ConnectorResult<String> {
        let response: ListenKeyResponse = self
            .signed_request(Method::POST, "/fapi/v1/listenKey", &[])
            .await?;
        Ok(response.listen_key)
    }

    async fn keepalive_session(&self, _listen_key: &str) -> ConnectorResult<()> {
        // The venue extends the key bound to the API key; no body needed.
        let _: serde_json::Value = self
            .signed_request(Method::PUT, "/fapi/v1/listenKey", &[])
            .await?;
        Ok(())
    }

    async fn submit_order(&self, params: OrderParams) -> ConnectorResult<OrderAck> {
        let mut query: Vec<(&str, String)> = vec![
            ("symbol", params.symbol),
            ("side", params.side.to_string()),
            ("type", params.order_type.to_string()),
            ("quantity", params.quantity),
            ("positionSide", params.position_side.to_string()),
        ];
        if let Some(price) = params.price {
            query.push(("price", price));
        }
        if let Some(tif) = params.time_in_force {
            query.push(("timeInForce", tif.to_string()));
        }
        if let Some(id) = params.new_client_order_id {
            query.push(("newClientOrderId", id));
        }
        self.signed_request(Method::POST, "/fapi/v1/order", &query)
            .await
    }

    async fn submit_conditional_order(
        &self,
        params: ConditionalOrderParams,
    ) -> ConnectorResult<AlgoAck> {
        let working_type = match params.working_type {
            connector_common::WorkingType::MarkPrice => "MARK_PRICE",
            connector_common::WorkingType::ContractPrice => "CONTRACT_PRICE",
        };
        let mut query: Vec<(&str, String)> = vec![
            ("symbol", params.symbol),
            ("side", params.side.to_string()),
            ("algoType", "CONDITIONAL".to_string()),
            ("type", params.order_type.to_string()),
            ("quantity", params.quantity),
            ("triggerPrice", params.trigger_price),
            ("workingType", working_type.to_string()),
            ("positionSide", params.position_side.to_string()),
        ];
        if let Some(id) = params.new_client_algo_id {
            query.push(("newClientOrderId", id));
        }
        self.signed_request(Method::POST, "/fapi/v1/algoOrder", &query)
            .await
    }

    async fn amend_order(&self, params: AmendOrderParams) -> ConnectorResult<OrderState> {
        let mut query: Vec<(&str, String)> = vec![
            ("symbol", params.symbol),
            ("side", params.side.to_string()),
            ("quantity", params.quantity),
            ("price", params.price),
        ];
        match params.order {
            OrderRef::Id(id) => query.push(("orderId", id.to_string())),
            OrderRef::ClientId(id) => query.push(("origClientOrderId", id)),
        }
        if let Some(id) = params.new_client_order_id {
            query.push(("newClientOrderId", id));
        }
        self.signed_request(Method::PUT, "/fapi/v1/order", &query)
            .await
    }

    async fn cancel_order(&self, symbol: &str, order: &OrderRef) -> ConnectorResult<OrderState> {
        let mut query: Vec<(&str, String)> = vec![("symbol", symbol.to_string())];
        match order {
            OrderRef::Id(id) => query.push(("orderId", id.to_string())),
            OrderRef::ClientId(id) => query.push(("origClientOrderId", id.clone())),
        }
        self.signed_request(Method::DELETE, "/fapi/v1/order", &query)
            .await
    }

    async fn cancel_conditional_order(&self, algo_id: i64) -> ConnectorResult<()> {
        let query = [("algoId", algo_id.to_string())];
        let _: serde_json::Value = self
            .signed_request(Method::DELETE, "/fapi/v1/algoOrder", &query)
            .await?;
        Ok(())
    }

    async fn query_order(&self, symbol: &str, order: &OrderRef) -> ConnectorResult<OrderState> {
        let mut query: Vec<(&str, String)> = vec![("symbol", symbol.to_string())];
        match order {
            OrderRef::Id(id) => query.push(("orderId", id.to_string())),
            OrderRef::ClientId(id) => query.push(("origClientOrderId", id.clone())),
        }
        self.signed_request(Method::GET, "/fapi/v1/order", &query)
            .await
    }

    async fn fetch_account_snapshot(&self) -> ConnectorResult<AccountSnapshot> {
        self.signed_request(Method::GET, "/fapi/v2/account", &[])
            .await
    }

    async fn fetch_open_conditional_orders(
        &self,
        symbol: &str,
    ) -> ConnectorResult<Vec<AlgoOrder>> {
        let query = [("symbol", symbol.to_string())];
        self.signed_request(Method::GET, "/fapi/v1/openAlgoOrders", &query)
            .await
    }

    async fn fetch_instrument_metadata(&self) -> ConnectorResult<ExchangeInfo> {
        // Filters come from production even on testnet; the testnet copy
        // lags and has been observed missing instruments.
        self.public_request(PROD_API, "/fapi/v1/exchangeInfo", &[])
            .await
    }

    async fn fetch_last_price(&self, symbol: &str) -> ConnectorResult<f64> {
        let query = [("symbol", symbol.to_string())];
        let ticker: TickerResponse = self
            .public_request(self.api_base(), "/fapi/v1/ticker/24hr", &query)
            .await?;
        ticker
            .last_price
            .parse::<f64>()
            .map_err(|_| ConnectorError::Validation {
                reason: format!("unparseable last price {:?} for {symbol}", ticker.last_price),
            })
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> ConnectorResult<Vec<Candle>> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        // Klines arrive as positional arrays, not objects.
        let rows: Vec<Vec<serde_json::Value>> = self
            .public_request(self.api_base(), "/fapi/v1/klines", &query)
            .await?;
        rows.into_iter().map(candle_from_row).collect()
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ConnectorResult<()> {
        let query = [
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        let _: serde_json::Value = self
            .signed_request(Method::POST, "/fapi/v1/leverage", &query)
            .await?;
        Ok(())
    }

    async fn set_position_mode(&self, dual_side: bool) -> ConnectorResult<()> {
        let query = [("dualSidePosition", dual_side.to_string())];
        let _: serde_json::Value = self
            .signed_request(Method::POST, "/fapi/v1/positionSide/dual", &query)
            .await?;
        Ok(())
    }

    async fn open_market_stream(&self, streams: &[String]) -> ConnectorResult<StreamHandle> {
        let url = format!("{}/stream?streams={}", self.ws_base(), streams.join("/"));
        ws::open_stream(&url).await
    }

    async fn open_user_stream(&self, listen_key: &str) -> ConnectorResult<StreamHandle> {
        let url = format!("{}/ws/{listen_key}", self.ws_base());
        ws::open_stream(&url).await
    }
}

fn candle_from_row(row: Vec<serde_json::Value>) -> ConnectorResult<Candle> {
    fn time_at(row: &[serde_json::Value], index: usize) -> ConnectorResult<i64> {
        row.get(index)
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| anyhow!("kline row missing timestamp at index {index}").into())
    }
    fn price_at(row: &[serde_json::Value], index: usize) -> ConnectorResult<f64> {
        row.get(index)
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| anyhow!("kline row missing price at index {index}").into())
    }

    Ok(Candle {
        open_time: time_at(&row, 0)?,
        open: price_at(&row, 1)?,
        high: price_at(&row, 2)?,
        low: price_at(&row, 3)?,
        close: price_at(&row, 4)?,
        volume: price_at(&row, 5)?,
        close_time: time_at(&row, 6)?,
        quote_volume: price_at(&row, 7)?,
    })
}
