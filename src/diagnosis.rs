use crate::api::MarketApi;
use crate::dashboard::LoadOutcome;
use crate::error::DashError;
use crate::normalize::{Extractor, NormalizedFrame, SeriesNormalizer, columns_to_records};
use crate::symbol::Symbol;
use chrono_tz::Tz;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// One loosely-typed payload field, classified once when the payload arrives.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Field {
    #[default]
    Absent,
    Text(String),
    Number(f64),
    List(Vec<Value>),
    Structured(Map<String, Value>),
}

impl Field {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Absent,
            Some(Value::String(s)) if s.trim().is_empty() => Self::Absent,
            Some(Value::String(s)) => Self::Text(s.clone()),
            Some(Value::Bool(b)) => Self::Text(b.to_string()),
            Some(Value::Number(n)) => n.as_f64().map_or(Self::Absent, Self::Number),
            Some(Value::Array(items)) => Self::List(items.clone()),
            Some(Value::Object(map)) => Self::Structured(map.clone()),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// The field as JSON again, for raw display.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Absent => Value::Null,
            Self::Text(s) => Value::String(s.clone()),
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Self::List(items) => Value::Array(items.clone()),
            Self::Structured(map) => Value::Object(map.clone()),
        }
    }
}

/// A score card entry. Either side of the `object | scalar` union fills it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Score {
    pub score: Option<String>,
    pub rating: Option<String>,
    pub rating_desc: Option<String>,
    pub evaluation: Option<String>,
}

impl Score {
    fn from_payload(root: &Map<String, Value>, key: &str, legacy_grade: &str) -> Self {
        match root.get(key) {
            Some(Value::Object(card)) => Self {
                score: card.get("score").and_then(scalar_text),
                rating: card.get("rating").and_then(scalar_text),
                rating_desc: card.get("rating_desc").and_then(scalar_text),
                evaluation: card.get("evaluation").and_then(scalar_text),
            },
            other => Self {
                score: other.and_then(scalar_text),
                rating: root
                    .get("score")
                    .and_then(|s| s.get(legacy_grade))
                    .and_then(scalar_text),
                ..Self::default()
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.score.is_none() && self.rating.is_none()
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiagnosisPayload {
    pub technical: Field,
    pub capital_flow: Field,
    pub capital_distribution: Field,
    pub investment_advice: Field,
    pub risk_warning: Field,
    pub markdown: Option<String>,
    pub overall_score: Score,
    pub technical_score: Score,
    pub capital_score: Score,
    /// `price` plus the EMA lines from `charts_data.technical`.
    pub technical_chart: NormalizedFrame,
    /// `in_flow` from `charts_data.capital_flow.historical`.
    pub capital_flow_chart: NormalizedFrame,
}

pub const TECHNICAL_CHART_SERIES: [(&str, &str); 5] = [
    ("price", "prices"),
    ("EMA5", "ema5"),
    ("EMA10", "ema10"),
    ("EMA20", "ema20"),
    ("EMA60", "ema60"),
];

impl DiagnosisPayload {
    /// Decodes a response body that is either a JSON object or a JSON string
    /// whose contents are an object.
    pub fn decode(body: &str, tz: Tz) -> Result<Self, DashError> {
        let root = decode_root(body)?;
        Ok(Self::from_root(&root, tz))
    }

    pub fn from_root(root: &Map<String, Value>, tz: Tz) -> Self {
        let charts = root.get("charts_data");
        Self {
            technical: Field::from_value(root.get("technical_analysis")),
            capital_flow: Field::from_value(root.get("capital_flow_analysis")),
            capital_distribution: Field::from_value(root.get("capital_distribution_analysis")),
            investment_advice: Field::from_value(root.get("investment_advice")),
            risk_warning: Field::from_value(root.get("risk_warning")),
            markdown: root
                .get("diagnosis_markdown")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            overall_score: Score::from_payload(root, "overall_score", "grade"),
            technical_score: Score::from_payload(root, "technical_score", "technical_grade"),
            capital_score: Score::from_payload(root, "capital_score", "capital_grade"),
            technical_chart: technical_chart(charts.and_then(|c| c.get("technical")), tz),
            capital_flow_chart: capital_flow_chart(
                charts
                    .and_then(|c| c.get("capital_flow"))
                    .and_then(|c| c.get("historical")),
                tz,
            ),
        }
    }
}

fn decode_root(body: &str) -> Result<Map<String, Value>, DashError> {
    let value = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(inner)) => {
            serde_json::from_str::<Value>(&inner).map_err(|e| DashError::Parse(e.to_string()))?
        }
        Ok(value) => value,
        Err(e) => return Err(DashError::Parse(e.to_string())),
    };
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DashError::Parse(format!(
            "expected an object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn technical_chart(table: Option<&Value>, tz: Tz) -> NormalizedFrame {
    let Some(table) = table else {
        return NormalizedFrame::default();
    };
    let columns: Vec<&str> = TECHNICAL_CHART_SERIES.iter().map(|(_, col)| *col).collect();
    let records = columns_to_records(table, "dates", &columns);
    let extractors: Vec<Extractor> = TECHNICAL_CHART_SERIES
        .iter()
        .map(|(name, col)| Extractor::first_of(name, &[*col]))
        .collect();
    SeriesNormalizer::new(tz, &["dates"]).normalize(&records, &extractors)
}

fn capital_flow_chart(historical: Option<&Value>, tz: Tz) -> NormalizedFrame {
    match historical {
        Some(Value::Array(records)) => {
            SeriesNormalizer::new(tz, &["date"]).normalize(records, &[Extractor::field("in_flow")])
        }
        Some(other) => {
            warn!(
                "capital_flow.historical is {}, not an array; chart left empty",
                json_kind(other)
            );
            NormalizedFrame::default()
        }
        None => NormalizedFrame::default(),
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiagnosisState {
    /// Symbol the displayed result belongs to.
    pub symbol: Option<Symbol>,
    pub result: Option<Arc<DiagnosisPayload>>,
    pub error: Option<String>,
    pub loading: bool,
    pub generation: u64,
}

#[derive(Default)]
struct Inner {
    state: DiagnosisState,
    next_ticket: u64,
    in_flight: Option<(u64, Symbol)>,
}

pub struct DiagnosisSession {
    api: Arc<dyn MarketApi>,
    market_tz: Tz,
    inner: Mutex<Inner>,
}

impl DiagnosisSession {
    pub fn new(api: Arc<dyn MarketApi>, market_tz: Tz) -> Self {
        Self {
            api,
            market_tz,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> DiagnosisState {
        self.lock().state.clone()
    }

    /// Requests a diagnosis for `input`. Network and format failures land in
    /// `DiagnosisState::error` and leave the previous result on screen.
    pub async fn run_diagnosis(&self, input: &str) -> Result<LoadOutcome, DashError> {
        let symbol = Symbol::parse(input)?;
        let ticket = {
            let mut inner = self.lock();
            inner.next_ticket += 1;
            let ticket = inner.next_ticket;
            inner.in_flight = Some((ticket, symbol.clone()));
            inner.state.loading = true;
            inner.state.error = None;
            ticket
        };
        info!("Requesting diagnosis for {}", symbol);

        let decoded = match self.api.diagnose(&symbol).await {
            Ok(body) => DiagnosisPayload::decode(&body, self.market_tz),
            Err(e) => Err(e),
        };

        let mut inner = self.lock();
        if !inner
            .in_flight
            .as_ref()
            .is_some_and(|(t, s)| *t == ticket && *s == symbol)
        {
            debug!("Discarding superseded diagnosis for {}", symbol);
            return Ok(LoadOutcome::Superseded);
        }
        inner.in_flight = None;

        let state = &mut inner.state;
        state.loading = false;
        state.generation += 1;
        match decoded {
            Ok(payload) => {
                state.symbol = Some(symbol);
                state.result = Some(Arc::new(payload));
                state.error = None;
            }
            Err(e) => {
                warn!("Diagnosis for {} failed: {}", symbol, e);
                state.error = Some(e.to_string());
            }
        }
        Ok(LoadOutcome::Committed)
    }
}
