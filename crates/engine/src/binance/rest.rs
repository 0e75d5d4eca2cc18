use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::{
    AssetBalance, Balances, Error, ExchangeClient, Order, OrderResult, OrderSide, OrderSize,
    OrderStatus, Result,
};

const BASE_URL: &str = "https://api.binance.com";

/// REST API client for Binance. Used for order placement and balance queries.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    http: Client,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            http,
        })
    }

    fn sign(&self, query: &str) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Config(format!("invalid Binance secret: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, params: &str) -> Result<String> {
        let ts = Utc::now().timestamp_millis();
        let query = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let signature = self.sign(&query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn signed_get(&self, path: &str, params: &str) -> Result<String> {
        let url = format!("{BASE_URL}{path}?{}", self.signed_query(params)?);

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<String> {
        let body = self.signed_query(params)?;
        let url = format!("{BASE_URL}{path}");

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {text}")));
        }
        Ok(text)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn balances(&self) -> Result<Balances> {
        let body = self
            .signed_get("/api/v3/account", "omitZeroBalances=true")
            .await
            .map_err(|e| Error::BalanceFetch(e.to_string()))?;
        parse_account(&body)
    }

    async fn submit_order(&self, order: &Order) -> Result<OrderResult> {
        let params = order_params(order);
        debug!(symbol = %order.symbol, side = %order.side, "Submitting order to Binance");
        let body = self.signed_post("/api/v3/order", &params).await?;
        parse_order_response(&body, order.side)
    }
}

/// Form body for a market order. Buys spend quote (`quoteOrderQty`),
/// sells spend base (`quantity`).
fn order_params(order: &Order) -> String {
    let size = match order.size {
        OrderSize::Base(qty) => format!("quantity={}", qty.normalize()),
        OrderSize::Quote(qty) => format!("quoteOrderQty={}", qty.normalize()),
    };
    format!(
        "symbol={}&side={}&type=MARKET&{size}&newClientOrderId={}&newOrderRespType=RESULT",
        order.symbol, order.side, order.id
    )
}

fn parse_account(body: &str) -> Result<Balances> {
    let account: AccountResponse =
        serde_json::from_str(body).map_err(|e| Error::BalanceFetch(e.to_string()))?;
    Ok(Balances(
        account
            .balances
            .into_iter()
            .map(|b| (b.asset.to_uppercase(), AssetBalance { available: b.free }))
            .collect(),
    ))
}

fn parse_order_response(body: &str, side: OrderSide) -> Result<OrderResult> {
    let resp: OrderResponse =
        serde_json::from_str(body).map_err(|e| Error::Exchange(e.to_string()))?;
    Ok(OrderResult {
        order_id: resp.client_order_id,
        symbol: resp.symbol,
        side,
        status: resp.status,
        executed_qty: resp.executed_qty,
        quote_qty: resp.cummulative_quote_qty,
        timestamp: Utc::now(),
    })
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    client_order_id: String,
    status: OrderStatus,
    executed_qty: Decimal,
    cummulative_quote_qty: Decimal,
}

#[derive(Deserialize)]
struct AccountResponse {
    balances: Vec<Balance>,
}

#[derive(Deserialize)]
struct Balance {
    asset: String,
    free: Decimal,
}
