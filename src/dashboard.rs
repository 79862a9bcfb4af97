use crate::api::{MarketApi, NewsItem, OptionRow, Quote};
use crate::error::DashError;
use crate::normalize::{Extractor, NormalizedFrame, SeriesNormalizer};
use crate::symbol::Symbol;
use chrono_tz::Tz;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Overlay series carried by every kline frame.
pub const EMA_OVERLAYS: [&str; 4] = ["EMA5", "EMA10", "EMA20", "EMA60"];

pub const KLINE_TIME_FIELDS: [&str; 3] = ["time", "time_key", "date"];

pub fn kline_extractors() -> Vec<Extractor> {
    let mut extractors = vec![
        Extractor::first_of("open", &["open", "open_price"]),
        Extractor::first_of("high", &["high", "high_price"]),
        Extractor::first_of("low", &["low", "low_price"]),
        Extractor::first_of("close", &["close", "close_price"]),
        Extractor::field("volume"),
    ];
    extractors.extend(EMA_OVERLAYS.iter().map(|name| Extractor::field(name)));
    extractors
}

/// Everything the dashboard shows for one symbol.
#[derive(Clone, Debug, Default)]
pub struct ViewState {
    pub symbol: Option<Symbol>,
    pub quote: Option<Quote>,
    pub kline: Option<NormalizedFrame>,
    pub option_chain: Vec<OptionRow>,
    pub news: Vec<NewsItem>,
    pub error: Option<String>,
    pub loading: bool,
    /// Bumped on every commit so renderers can tell new data from old.
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Committed,
    /// A newer load started before this one settled; its results were discarded.
    Superseded,
}

#[derive(Default)]
struct Inner {
    view: ViewState,
    next_ticket: u64,
    in_flight: Option<(u64, Symbol)>,
}

pub struct DashboardController {
    api: Arc<dyn MarketApi>,
    normalizer: SeriesNormalizer,
    inner: Mutex<Inner>,
}

impl DashboardController {
    pub fn new(api: Arc<dyn MarketApi>, market_tz: Tz) -> Self {
        Self {
            api,
            normalizer: SeriesNormalizer::new(market_tz, &KLINE_TIME_FIELDS),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read-only snapshot of the committed state.
    pub fn view(&self) -> ViewState {
        self.lock().view.clone()
    }

    pub fn current_symbol(&self) -> Option<Symbol> {
        let inner = self.lock();
        inner
            .in_flight
            .as_ref()
            .map(|(_, s)| s.clone())
            .or_else(|| inner.view.symbol.clone())
    }

    /// Validates `input`, then fetches quote, kline, option chain and news
    /// concurrently and commits them together once all four have settled.
    pub async fn load_symbol(&self, input: &str) -> Result<LoadOutcome, DashError> {
        let symbol = Symbol::parse(input)?;

        let ticket = {
            let mut inner = self.lock();
            inner.next_ticket += 1;
            let ticket = inner.next_ticket;
            inner.in_flight = Some((ticket, symbol.clone()));
            inner.view.loading = true;
            ticket
        };
        info!("Loading {} (request #{})", symbol, ticket);

        let (quote, kline, option_chain, news) = tokio::join!(
            self.api.quote(&symbol),
            self.api.kline(&symbol),
            self.api.option_chain(&symbol),
            self.api.news(&symbol),
        );

        let kline = kline.map(|records| {
            let frame = self.normalizer.normalize(&records, &kline_extractors());
            debug!(
                "Normalized {} kline points for {} ({} dropped)",
                frame.len(),
                symbol,
                frame.dropped
            );
            frame
        });

        let mut inner = self.lock();
        let is_current = inner
            .in_flight
            .as_ref()
            .is_some_and(|(t, s)| *t == ticket && *s == symbol);
        if !is_current {
            debug!("Discarding superseded results for {} (request #{})", symbol, ticket);
            return Ok(LoadOutcome::Superseded);
        }
        inner.in_flight = None;

        let mut failures: Vec<(&str, DashError)> = Vec::new();
        let view = &mut inner.view;
        view.symbol = Some(symbol.clone());
        view.quote = settle(quote, "quote", &mut failures);
        view.kline = settle(kline, "kline", &mut failures);
        view.option_chain = settle(option_chain, "option chain", &mut failures).unwrap_or_default();
        view.news = settle(news, "news", &mut failures).unwrap_or_default();
        view.error = failures.first().map(|(_, e)| e.to_string());
        view.loading = false;
        view.generation += 1;

        for (part, err) in &failures {
            warn!("{} request for {} failed: {}", part, symbol, err);
        }
        info!(
            "Committed {} ({} of 4 requests succeeded)",
            symbol,
            4 - failures.len()
        );
        Ok(LoadOutcome::Committed)
    }

    /// Reloads the most recently requested symbol.
    pub async fn refresh(&self) -> Result<LoadOutcome, DashError> {
        let symbol = self.current_symbol().ok_or_else(|| DashError::Validation {
            input: String::new(),
        })?;
        self.load_symbol(&symbol.to_string()).await
    }
}

fn settle<'a, T>(
    result: Result<T, DashError>,
    part: &'a str,
    failures: &mut Vec<(&'a str, DashError)>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            failures.push((part, err));
            None
        }
    }
}
