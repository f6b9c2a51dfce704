//! Kite Connect REST client.
//!
//! Implements the `Broker` capability over the Kite HTTP API: batched
//! quotes, net positions, regular order placement, the order book, and the
//! per-exchange instruments dump (CSV). Every call carries a bounded
//! timeout; a timeout during order placement surfaces as
//! `AmbiguousOrderState` because the order may or may not have been
//! accepted, and blind retries of market orders risk duplicate fills.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use options_desk_core::config::BrokerConfig;
use options_desk_core::error::TradingError;
use options_desk_core::traits::Broker;
use options_desk_core::types::{
    Exchange, InstrumentRecord, LivePosition, OrderRequest, PlacedOrder, Quote,
};

use crate::token::{session_checksum, TokenStore};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct KiteConfig {
    pub api_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub request_timeout: Duration,
}

impl From<&BrokerConfig> for KiteConfig {
    fn from(cfg: &BrokerConfig) -> Self {
        Self {
            api_url: cfg.api_url.clone(),
            api_key: cfg.api_key.clone(),
            api_secret: cfg.api_secret.clone(),
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
        }
    }
}

/// Kite Connect REST client with an injected token store.
pub struct KiteClient {
    config: KiteConfig,
    http: reqwest::Client,
    tokens: Arc<TokenStore>,
}

/// Kite wraps every JSON response in a status envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    last_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct PositionsData {
    net: Vec<LivePosition>,
}

#[derive(Debug, Deserialize)]
struct OrderIdData {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    access_token: String,
}

/// One row of the instruments CSV dump. Columns not listed are ignored.
#[derive(Debug, Deserialize)]
struct InstrumentRow {
    instrument_token: i64,
    tradingsymbol: String,
    name: String,
    expiry: String,
    strike: Decimal,
    instrument_type: String,
}

impl KiteClient {
    /// Build a client. Fails only if the HTTP client cannot be constructed.
    pub fn new(config: KiteConfig, tokens: Arc<TokenStore>) -> Result<Self, TradingError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TradingError::BrokerUnavailable {
                endpoint: "client",
                reason: e.to_string(),
            })?;
        Ok(Self {
            config,
            http,
            tokens,
        })
    }

    /// The interactive login URL the operator opens to obtain a request token.
    #[must_use]
    pub fn login_url(&self) -> String {
        format!(
            "https://kite.zerodha.com/connect/login?v=3&api_key={}",
            self.config.api_key
        )
    }

    /// Exchange a login request token for an access token and store it.
    pub async fn generate_session(&self, request_token: &str) -> Result<(), TradingError> {
        let checksum = session_checksum(&self.config.api_key, request_token, &self.config.api_secret);
        let url = format!("{}/session/token", self.config.api_url);

        let response = self
            .http
            .post(&url)
            .form(&[
                ("api_key", self.config.api_key.as_str()),
                ("request_token", request_token),
                ("checksum", checksum.as_str()),
            ])
            .send()
            .await
            .map_err(|e| unavailable("session", &e))?;

        let data: SessionData = unwrap_envelope("session", response).await?;
        self.tokens.set(data.access_token);
        info!("Broker session established");
        Ok(())
    }

    fn auth_header(&self) -> Result<String, TradingError> {
        self.tokens
            .authorization(&self.config.api_key)
            .ok_or(TradingError::BrokerUnavailable {
                endpoint: "auth",
                reason: "no access token; complete the login flow first".to_string(),
            })
    }
}

fn unavailable(endpoint: &'static str, err: &reqwest::Error) -> TradingError {
    TradingError::BrokerUnavailable {
        endpoint,
        reason: err.to_string(),
    }
}

/// Read a Kite envelope, surfacing non-success envelopes as
/// `BrokerUnavailable` for the given endpoint.
async fn unwrap_envelope<T: serde::de::DeserializeOwned>(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<T, TradingError> {
    let status = response.status();
    let envelope: Envelope<T> = response.json().await.map_err(|e| unavailable(endpoint, &e))?;

    if status.is_success() && envelope.status == "success" {
        envelope.data.ok_or(TradingError::BrokerUnavailable {
            endpoint,
            reason: "success envelope with no data".to_string(),
        })
    } else {
        Err(TradingError::BrokerUnavailable {
            endpoint,
            reason: envelope
                .message
                .unwrap_or_else(|| format!("HTTP {status}")),
        })
    }
}

#[async_trait]
impl Broker for KiteClient {
    async fn quote(&self, keys: &[String]) -> Result<HashMap<String, Quote>, TradingError> {
        let auth = self.auth_header()?;
        let url = format!("{}/quote", self.config.api_url);
        let query: Vec<(&str, &str)> = keys.iter().map(|k| ("i", k.as_str())).collect();

        let response = self
            .http
            .get(&url)
            .header("Authorization", &auth)
            .query(&query)
            .send()
            .await
            .map_err(|e| {
                debug!(error = %e, "Quote request failed");
                TradingError::QuoteUnavailable {
                    symbol: keys.join(","),
                }
            })?;

        let data: HashMap<String, QuoteData> =
            unwrap_envelope("quote", response)
                .await
                .map_err(|_| TradingError::QuoteUnavailable {
                    symbol: keys.join(","),
                })?;

        Ok(data
            .into_iter()
            .map(|(k, v)| (k, Quote { last_price: v.last_price }))
            .collect())
    }

    async fn positions(&self) -> Result<Vec<LivePosition>, TradingError> {
        let auth = self.auth_header()?;
        let url = format!("{}/portfolio/positions", self.config.api_url);

        let response = self
            .http
            .get(&url)
            .header("Authorization", &auth)
            .send()
            .await
            .map_err(|e| unavailable("positions", &e))?;

        let data: PositionsData = unwrap_envelope("positions", response).await?;
        Ok(data.net)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String, TradingError> {
        let auth = self.auth_header()?;
        let url = format!(
            "{}/orders/{}",
            self.config.api_url,
            order.variety.as_str()
        );
        let quantity = order.quantity.to_string();
        let form = [
            ("tradingsymbol", order.trading_symbol.as_str()),
            ("exchange", order.exchange.as_str()),
            ("transaction_type", order.side.as_str()),
            ("quantity", quantity.as_str()),
            ("product", order.product.as_str()),
            ("order_type", order.order_kind.as_str()),
        ];

        info!(
            symbol = order.trading_symbol,
            exchange = %order.exchange,
            side = %order.side,
            quantity = order.quantity,
            "Placing order"
        );

        let response = self
            .http
            .post(&url)
            .header("Authorization", &auth)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!(symbol = order.trading_symbol, "Order placement timed out");
                    TradingError::AmbiguousOrderState
                } else {
                    TradingError::BrokerRejected {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        // Gateways answer 504 with arbitrary bodies; decide before parsing.
        if status == StatusCode::GATEWAY_TIMEOUT {
            warn!(symbol = order.trading_symbol, "Gateway timeout on order placement");
            return Err(TradingError::AmbiguousOrderState);
        }

        let envelope: Envelope<OrderIdData> = response
            .json()
            .await
            .map_err(|e| TradingError::BrokerRejected {
                reason: e.to_string(),
            })?;

        if status.is_success() && envelope.status == "success" {
            let data = envelope.data.ok_or(TradingError::BrokerRejected {
                reason: "success envelope with no order id".to_string(),
            })?;
            info!(order_id = data.order_id, "Order accepted");
            Ok(data.order_id)
        } else {
            Err(TradingError::BrokerRejected {
                reason: envelope
                    .message
                    .unwrap_or_else(|| format!("HTTP {status}")),
            })
        }
    }

    async fn orders(&self) -> Result<Vec<PlacedOrder>, TradingError> {
        let auth = self.auth_header()?;
        let url = format!("{}/orders", self.config.api_url);

        let response = self
            .http
            .get(&url)
            .header("Authorization", &auth)
            .send()
            .await
            .map_err(|e| unavailable("orders", &e))?;

        unwrap_envelope("orders", response).await
    }

    async fn instruments(&self, exchange: Exchange) -> Result<Vec<InstrumentRecord>, TradingError> {
        let auth = self.auth_header()?;
        let url = format!("{}/instruments/{}", self.config.api_url, exchange.as_str());

        let response = self
            .http
            .get(&url)
            .header("Authorization", &auth)
            .send()
            .await
            .map_err(|e| unavailable("instruments", &e))?;

        if !response.status().is_success() {
            return Err(TradingError::BrokerUnavailable {
                endpoint: "instruments",
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| unavailable("instruments", &e))?;

        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let mut records = Vec::new();
        for row in reader.deserialize::<InstrumentRow>() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    debug!(error = %e, "Skipping unparsable instrument row");
                    continue;
                }
            };
            // Non-derivative rows carry an empty expiry; they are not options.
            let Ok(expiry) = NaiveDate::parse_from_str(&row.expiry, "%Y-%m-%d") else {
                continue;
            };
            records.push(InstrumentRecord {
                name: row.name,
                instrument_type: row.instrument_type,
                expiry,
                strike: row.strike,
                instrument_token: row.instrument_token,
                trading_symbol: row.tradingsymbol,
            });
        }

        debug!(exchange = %exchange, count = records.len(), "Fetched instruments dump");
        Ok(records)
    }
}
