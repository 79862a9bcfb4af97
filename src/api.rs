use crate::config::AppConfig;
use crate::error::DashError;
use crate::normalize::coerce_number;
use crate::symbol::Symbol;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Remote endpoints the dashboard consumes.
#[async_trait]
pub trait MarketApi: Send + Sync {
    async fn quote(&self, symbol: &Symbol) -> Result<Quote, DashError>;
    /// Raw candlestick records, oldest first as sent by the backend.
    async fn kline(&self, symbol: &Symbol) -> Result<Vec<Value>, DashError>;
    async fn option_chain(&self, symbol: &Symbol) -> Result<Vec<OptionRow>, DashError>;
    async fn news(&self, symbol: &Symbol) -> Result<Vec<NewsItem>, DashError>;
    /// Body text of the diagnose call; may itself be a JSON-encoded string.
    async fn diagnose(&self, symbol: &Symbol) -> Result<String, DashError>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub current_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub open_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub high_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub low_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub pre_close: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub turnover: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub update_time: Option<String>,
}

impl Quote {
    /// Absolute and percent change against the previous close.
    pub fn change(&self) -> Option<(f64, f64)> {
        let current = self.current_price?;
        let pre_close = self.pre_close.filter(|p| *p != 0.0)?;
        let delta = current - pre_close;
        Some((delta, delta / pre_close * 100.0))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub publish_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
}

/// One strike of the option chain with its call and put legs side by side.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OptionRow {
    pub strike_time: Option<String>,
    pub strike_price: Option<f64>,
    pub call_code: Option<String>,
    pub call_name: Option<String>,
    pub put_code: Option<String>,
    pub put_name: Option<String>,
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(coerce_number))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_text))
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_at(value: Option<&Value>, path: &[&str]) -> Option<String> {
    let mut node = value?;
    for key in path {
        node = node.get(*key)?;
    }
    value_text(node)
}

/// Accepts a bare array or an object wrapping it under `data`/`kline`.
pub fn parse_kline_records(body: Value) -> Result<Vec<Value>, DashError> {
    match body {
        Value::Array(records) => Ok(records),
        Value::Object(mut map) => ["data", "kline", "klines"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(records)) => Some(records),
                _ => None,
            })
            .ok_or_else(|| DashError::network("malformed kline response: not an array")),
        other => Err(DashError::network(format!(
            "malformed kline response: {}",
            other
        ))),
    }
}

pub fn parse_quote(body: Value) -> Result<Quote, DashError> {
    if !body.is_object() {
        return Err(DashError::network("malformed quote response: not an object"));
    }
    serde_json::from_value(body)
        .map_err(|e| DashError::network(format!("malformed quote response: {}", e)))
}

/// Reads `{news: [...]}`; malformed entries are skipped.
pub fn parse_news(body: &Value) -> Vec<NewsItem> {
    let Some(items) = body.get("news").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<NewsItem>(item.clone()) {
            Ok(news) => Some(news),
            Err(e) => {
                warn!("Skipping malformed news item: {}", e);
                None
            }
        })
        .collect()
}

/// Flattens `{optionChain: [{strikeTime, option: [{call, put}]}]}` into rows.
pub fn parse_option_chain(body: &Value) -> Vec<OptionRow> {
    let chains: Vec<&Value> = match body {
        Value::Array(chains) => chains.iter().collect(),
        Value::Object(map) => match map.get("optionChain").or_else(|| map.get("option_chain")) {
            Some(Value::Array(chains)) => chains.iter().collect(),
            _ if map.contains_key("option") => vec![body],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let mut rows = Vec::new();
    for chain in chains {
        let Some(options) = chain.get("option").and_then(Value::as_array) else {
            continue;
        };
        for opt in options {
            let call = opt.get("call").filter(|v| !v.is_null());
            let put = opt.get("put").filter(|v| !v.is_null());
            if call.is_none() && put.is_none() {
                continue;
            }
            let strike_price = [call, put].into_iter().flatten().find_map(|leg| {
                leg.get("optionExData")
                    .and_then(|ex| ex.get("strikePrice"))
                    .and_then(coerce_number)
            });
            rows.push(OptionRow {
                strike_time: text_at(call, &["optionExData", "strikeTime"])
                    .or_else(|| text_at(put, &["optionExData", "strikeTime"]))
                    .or_else(|| text_at(Some(chain), &["strikeTime"])),
                strike_price,
                call_code: text_at(call, &["basic", "code"]),
                call_name: text_at(call, &["basic", "name"]),
                put_code: text_at(put, &["basic", "code"]),
                put_name: text_at(put, &["basic", "name"]),
            });
        }
    }
    rows
}

/// Server-provided message from an error body, if any.
pub fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error", "detail", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(value_text))
}

#[derive(Clone, Debug)]
pub struct HttpMarketApi {
    client: Client,
    base_url: String,
    diagnose_timeout: Duration,
}

impl HttpMarketApi {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            diagnose_timeout: config.diagnose_timeout,
        })
    }

    fn endpoint(&self, symbol: &Symbol, suffix: &str) -> String {
        format!("{}/api/stock/{}{}", self.base_url, symbol, suffix)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, DashError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(DashError::Network(server_message(&body).unwrap_or_else(|| {
            format!("request failed with HTTP {}", status)
        })))
    }

    async fn get_json(&self, symbol: &Symbol, suffix: &str) -> Result<Value, DashError> {
        let url = self.endpoint(symbol, suffix);
        debug!("GET {}", url);
        let resp = self.client.get(&url).send().await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait]
impl MarketApi for HttpMarketApi {
    async fn quote(&self, symbol: &Symbol) -> Result<Quote, DashError> {
        parse_quote(self.get_json(symbol, "").await?)
    }

    async fn kline(&self, symbol: &Symbol) -> Result<Vec<Value>, DashError> {
        parse_kline_records(self.get_json(symbol, "/kline").await?)
    }

    async fn option_chain(&self, symbol: &Symbol) -> Result<Vec<OptionRow>, DashError> {
        Ok(parse_option_chain(&self.get_json(symbol, "/option_chain").await?))
    }

    async fn news(&self, symbol: &Symbol) -> Result<Vec<NewsItem>, DashError> {
        Ok(parse_news(&self.get_json(symbol, "/news").await?))
    }

    async fn diagnose(&self, symbol: &Symbol) -> Result<String, DashError> {
        let url = self.endpoint(symbol, "/diagnose");
        debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .timeout(self.diagnose_timeout)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.text().await?)
    }
}
