//! OKX Execution Service
//!
//! Order placement and account state on OKX swaps:
//! - Market orders with attached take-profit / stop-loss triggers
//! - Account equity and open positions
//! - HMAC-SHA256 request signing (timestamp + method + path + body)

use crate::domain::errors::TradingError;
use crate::domain::ports::ExecutionService;
use crate::domain::trade::{OrderDetails, OrderRequest, Position, PositionSide};
use crate::infrastructure::http_client_factory::HttpClientFactory;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone)]
pub struct OkxCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
}

pub struct OkxExecutionService {
    client: ClientWithMiddleware,
    base_url: String,
    credentials: OkxCredentials,
    /// Round-trip commission fraction, reserved out of the margin when
    /// sizing an order.
    commission: f64,
}

#[derive(Debug, Clone, Copy)]
struct ContractSpec {
    contract_value: f64,
    max_size: f64,
    min_size: f64,
    lot_size: f64,
}

/// Standard OKX response envelope; a non-zero `code` is a hard error.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    msg: String,
    data: Vec<T>,
}

impl<T> Envelope<T> {
    fn into_data(self, what: &str) -> Result<Vec<T>> {
        if self.code != "0" {
            anyhow::bail!("OKX {} failed: {} (code {})", what, self.msg, self.code);
        }
        Ok(self.data)
    }
}

impl OkxExecutionService {
    pub fn new(base_url: String, credentials: OkxCredentials, commission: f64) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
            credentials,
            commission,
        }
    }

    /// Generate the OKX API signature: base64(HMAC-SHA256(timestamp +
    /// method + path + body)) keyed with the API secret.
    fn sign_request(&self, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;

        let payload = format!("{}{}{}{}", timestamp, method, path, body);
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Vec<(&'static str, String)> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        let signature = self.sign_request(&timestamp, method, path, body);
        vec![
            ("OK-ACCESS-KEY", self.credentials.api_key.clone()),
            ("OK-ACCESS-SIGN", signature),
            ("OK-ACCESS-TIMESTAMP", timestamp),
            ("OK-ACCESS-PASSPHRASE", self.credentials.api_passphrase.clone()),
            ("Content-Type", "application/json".to_string()),
        ]
    }

    async fn signed_get<T: for<'de> Deserialize<'de>>(&self, path: &str, what: &str) -> Result<Vec<T>> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url);
        for (name, value) in self.auth_headers("GET", path, "") {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed OKX {} request", what))?;

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse OKX {} response", what))?;
        envelope.into_data(what)
    }

    async fn signed_post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &BTreeMap<&'static str, String>,
        what: &str,
    ) -> Result<Vec<T>> {
        let body_json = serde_json::to_string(body)?;
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.client.post(&url);
        for (name, value) in self.auth_headers("POST", path, &body_json) {
            request = request.header(name, value);
        }

        let response = request
            .body(body_json)
            .send()
            .await
            .with_context(|| format!("Failed OKX {} request", what))?;

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse OKX {} response", what))?;
        envelope.into_data(what)
    }

    async fn contract_spec(&self, instrument: &str) -> Result<ContractSpec> {
        #[derive(Debug, Deserialize)]
        struct Instrument {
            #[serde(rename = "ctVal")]
            contract_value: String,
            #[serde(rename = "maxMktSz")]
            max_market_size: String,
            #[serde(rename = "minSz")]
            min_size: String,
            #[serde(rename = "lotSz")]
            lot_size: String,
        }

        let url = format!(
            "{}/api/v5/public/instruments?instType=SWAP&instId={}",
            self.base_url, instrument
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch instrument data from OKX")?;

        let envelope: Envelope<Instrument> = response
            .json()
            .await
            .context("Failed to parse OKX instruments response")?;
        let data = envelope.into_data("instruments")?;
        let spec = data
            .first()
            .ok_or_else(|| anyhow::anyhow!("no instrument data for {}", instrument))?;

        Ok(ContractSpec {
            contract_value: spec.contract_value.parse().unwrap_or(1.0),
            max_size: spec.max_market_size.parse().unwrap_or(f64::MAX),
            min_size: spec.min_size.parse().unwrap_or(0.0),
            lot_size: spec.lot_size.parse().unwrap_or(1.0),
        })
    }
}

#[async_trait]
impl ExecutionService for OkxExecutionService {
    async fn current_price(&self, instrument: &str) -> Result<f64> {
        #[derive(Debug, Deserialize)]
        struct Ticker {
            last: String,
        }

        let url = format!("{}/api/v5/market/ticker?instId={}", self.base_url, instrument);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch ticker from OKX")?;

        let envelope: Envelope<Ticker> = response
            .json()
            .await
            .context("Failed to parse OKX ticker response")?;
        let data = envelope.into_data("ticker")?;
        let ticker = data
            .first()
            .ok_or_else(|| anyhow::anyhow!("no ticker data for {}", instrument))?;

        ticker
            .last
            .parse()
            .with_context(|| format!("bad last price: {}", ticker.last))
    }

    async fn equity(&self) -> Result<f64> {
        #[derive(Debug, Deserialize)]
        struct BalanceDetail {
            #[serde(rename = "ccy")]
            currency: String,
            #[serde(rename = "eq")]
            equity: String,
        }

        #[derive(Debug, Deserialize)]
        struct Balance {
            details: Vec<BalanceDetail>,
        }

        let balances: Vec<Balance> = self.signed_get("/api/v5/account/balance", "balance").await?;

        for balance in &balances {
            for detail in &balance.details {
                if detail.currency == "USDT" {
                    return detail
                        .equity
                        .parse()
                        .with_context(|| format!("bad equity: {}", detail.equity));
                }
            }
        }

        Ok(0.0)
    }

    async fn positions(&self, instrument: &str) -> Result<Vec<Position>> {
        #[derive(Debug, Deserialize)]
        struct ApiPosition {
            #[serde(rename = "instId")]
            instrument: String,
            #[serde(rename = "posSide")]
            position_side: String,
            #[serde(rename = "mgnMode")]
            margin_mode: String,
            #[serde(rename = "lever")]
            leverage: String,
            #[serde(rename = "pos")]
            contracts: String,
            #[serde(rename = "avgPx")]
            average_price: String,
            #[serde(rename = "upl")]
            unrealised_pnl: String,
        }

        let positions: Vec<ApiPosition> =
            self.signed_get("/api/v5/account/positions", "positions").await?;

        let out = positions
            .into_iter()
            .filter(|p| p.instrument == instrument)
            .filter_map(|p| {
                let side = match p.position_side.as_str() {
                    "long" => PositionSide::Long,
                    "short" => PositionSide::Short,
                    _ => return None,
                };
                Some(Position {
                    instrument: p.instrument,
                    side,
                    margin_mode: p.margin_mode,
                    leverage: p.leverage.parse().unwrap_or(0.0),
                    contracts: p.contracts.parse().unwrap_or(0.0),
                    average_price: p.average_price.parse().unwrap_or(0.0),
                    unrealised_pnl: p.unrealised_pnl.parse().unwrap_or(0.0),
                })
            })
            .collect();

        Ok(out)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderDetails> {
        #[derive(Debug, Deserialize)]
        struct PlacedOrder {
            #[serde(rename = "ordId")]
            order_id: String,
        }

        let entry_price = self.current_price(&order.instrument).await?;
        let spec = self.contract_spec(&order.instrument).await?;

        let (tp, sl) = if order.is_long {
            (
                entry_price * (1.0 + order.take_profit),
                entry_price * (1.0 - order.stop_loss),
            )
        } else {
            (
                entry_price * (1.0 - order.take_profit),
                entry_price * (1.0 + order.stop_loss),
            )
        };

        // Leveraged contract quantity, with fees reserved out of margin,
        // floored to the lot size and clamped to venue limits.
        let mut quantity = (order.leverage * (order.usdt * (1.0 - order.leverage * self.commission)))
            / (entry_price * spec.contract_value);
        quantity = (quantity / spec.lot_size).floor() * spec.lot_size;
        quantity = quantity.min(spec.max_size);

        if quantity < spec.min_size {
            return Err(TradingError::BelowMinimumSize {
                quantity,
                min_size: spec.min_size,
            }
            .into());
        }

        let (side, pos_side) = if order.is_long {
            ("buy", "long")
        } else {
            ("sell", "short")
        };

        let mut body = BTreeMap::new();
        body.insert("instId", order.instrument.clone());
        body.insert("tdMode", "isolated".to_string());
        body.insert("side", side.to_string());
        body.insert("posSide", pos_side.to_string());
        body.insert("ordType", "market".to_string());
        body.insert("lever", format!("{}", order.leverage));
        body.insert("sz", format!("{:.6}", quantity));
        body.insert("tpTriggerPx", format!("{:.6}", tp));
        body.insert("tpOrdPx", "-1".to_string());
        body.insert("slTriggerPx", format!("{:.6}", sl));
        body.insert("slOrdPx", "-1".to_string());

        info!(
            "placing market order {}: {:.6} at price {:.6} (TP {:.6} / SL {:.6})",
            order.instrument, quantity, entry_price, tp, sl
        );

        let placed: Vec<PlacedOrder> =
            self.signed_post("/api/v5/trade/order", &body, "order").await?;
        let placed = placed
            .first()
            .ok_or_else(|| anyhow::anyhow!("order response contained no data"))?;

        Ok(OrderDetails {
            instrument: order.instrument.clone(),
            order_id: placed.order_id.clone(),
        })
    }

    async fn close_position(
        &self,
        instrument: &str,
        margin_mode: &str,
        side: PositionSide,
    ) -> Result<()> {
        #[derive(Debug, Deserialize)]
        struct Closed {
            #[serde(rename = "instId")]
            _instrument: String,
        }

        let mut body = BTreeMap::new();
        body.insert("instId", instrument.to_string());
        body.insert("mgnMode", margin_mode.to_string());
        body.insert("posSide", side.to_string());

        let _: Vec<Closed> = self
            .signed_post("/api/v5/trade/close-position", &body, "close-position")
            .await?;

        info!("closed {} position on {}", side, instrument);
        Ok(())
    }
}
