use crate::error::DashError;
use crate::normalize::{NormalizedFrame, Series};
use clap::ValueEnum;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum)]
pub enum ChartKind {
    Candlestick,
    Bar,
    Baseline,
    Histogram,
}

impl ChartKind {
    pub const ALL: [ChartKind; 4] = [Self::Candlestick, Self::Bar, Self::Baseline, Self::Histogram];

    pub fn label(self) -> &'static str {
        match self {
            Self::Candlestick => "Candlestick",
            Self::Bar => "Bar",
            Self::Baseline => "Baseline",
            Self::Histogram => "Histogram",
        }
    }

    pub fn requires_ohlc(self) -> bool {
        matches!(self, Self::Candlestick | Self::Bar)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    Up,
    Down,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MainPoint {
    Ohlc {
        time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
    Value {
        time: i64,
        value: f64,
        tone: Option<Tone>,
    },
}

impl MainPoint {
    pub fn time(&self) -> i64 {
        match self {
            Self::Ohlc { time, .. } | Self::Value { time, .. } => *time,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::Ohlc { .. } => "OHLC",
            Self::Value { .. } => "value",
        }
    }
}

/// Builds main-series points for `kind` from a kline frame carrying
/// `open`/`high`/`low`/`close` series. Rows missing a required field are skipped.
pub fn build_main_points(kind: ChartKind, frame: &NormalizedFrame) -> Vec<MainPoint> {
    frame
        .axis
        .iter()
        .enumerate()
        .filter_map(|(idx, &time)| {
            let open = frame.value("open", idx);
            let close = frame.value("close", idx);
            match kind {
                ChartKind::Candlestick | ChartKind::Bar => Some(MainPoint::Ohlc {
                    time,
                    open: open?,
                    high: frame.value("high", idx)?,
                    low: frame.value("low", idx)?,
                    close: close?,
                }),
                ChartKind::Baseline => Some(MainPoint::Value {
                    time,
                    value: close?,
                    tone: None,
                }),
                ChartKind::Histogram => {
                    let tone = match (open, close) {
                        (Some(o), Some(c)) if c >= o => Tone::Up,
                        _ => Tone::Down,
                    };
                    Some(MainPoint::Value {
                        time,
                        value: close?,
                        tone: Some(tone),
                    })
                }
            }
        })
        .collect()
}

/// Single-value points from series `name` of `frame`, gaps skipped.
/// Histogram bars are toned by sign, so inflows read up and outflows down.
pub fn build_value_points(kind: ChartKind, frame: &NormalizedFrame, name: &str) -> Vec<MainPoint> {
    let Some(series) = frame.get(name) else {
        return Vec::new();
    };
    let tone = |value: f64| match kind {
        ChartKind::Histogram if value >= 0.0 => Some(Tone::Up),
        ChartKind::Histogram => Some(Tone::Down),
        _ => None,
    };
    series
        .present()
        .map(|(time, value)| MainPoint::Value {
            time,
            value,
            tone: tone(value),
        })
        .collect()
}

fn validate_shape(kind: ChartKind, points: &[MainPoint]) -> Result<(), DashError> {
    let expected = if kind.requires_ohlc() { "OHLC" } else { "value" };
    match points.iter().find(|p| p.shape() != expected) {
        Some(bad) => Err(DashError::ShapeMismatch {
            kind: kind.label(),
            expected,
            got: bad.shape(),
        }),
        None => Ok(()),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChartOptions {
    pub title: String,
    pub time_visible: bool,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            title: String::new(),
            time_visible: true,
        }
    }
}

pub type ChartId = u64;
pub type SeriesId = u64;

/// The charting surface a session drives.
pub trait ChartBackend {
    fn create(&mut self, width: u16, height: u16, options: &ChartOptions) -> ChartId;
    fn apply_options(&mut self, chart: ChartId, options: &ChartOptions);
    fn add_main_series(&mut self, chart: ChartId, kind: ChartKind) -> SeriesId;
    fn add_overlay_series(&mut self, chart: ChartId, name: &str) -> SeriesId;
    fn set_main_data(&mut self, series: SeriesId, points: &[MainPoint]);
    fn set_overlay_data(&mut self, series: SeriesId, points: &[(i64, f64)]);
    fn remove_series(&mut self, chart: ChartId, series: SeriesId);
    fn resize(&mut self, chart: ChartId, width: u16, height: u16);
    fn fit_content(&mut self, chart: ChartId);
    fn destroy(&mut self, chart: ChartId);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unmounted,
    Constructing,
    Ready,
    Disposed,
}

/// Work received before the chart exists. Only the latest value per slot is kept.
#[derive(Default)]
struct Pending {
    main: Option<Vec<MainPoint>>,
    overlays: BTreeMap<String, Series>,
}

/// Sole owner of one chart surface and the series attached to it.
pub struct ChartSession<B: ChartBackend> {
    backend: B,
    state: SessionState,
    kind: ChartKind,
    options: ChartOptions,
    size: (u16, u16),
    chart: Option<ChartId>,
    main: Option<SeriesId>,
    main_data: Option<Vec<MainPoint>>,
    overlays: BTreeMap<String, SeriesId>,
    pending: Pending,
}

impl<B: ChartBackend> ChartSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: SessionState::Unmounted,
            kind: ChartKind::Candlestick,
            options: ChartOptions::default(),
            size: (0, 0),
            chart: None,
            main: None,
            main_data: None,
            overlays: BTreeMap::new(),
            pending: Pending::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn kind(&self) -> ChartKind {
        self.kind
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn main_handle_count(&self) -> usize {
        usize::from(self.main.is_some())
    }

    pub fn overlay_names(&self) -> impl Iterator<Item = &str> {
        self.overlays.keys().map(String::as_str)
    }

    pub fn configure(&mut self, kind: ChartKind, options: ChartOptions) -> Result<(), DashError> {
        match self.state {
            SessionState::Disposed => Err(DashError::Disposed),
            SessionState::Unmounted => {
                self.kind = kind;
                self.options = options;
                self.state = SessionState::Constructing;
                debug!("Chart session constructing ({})", kind.label());
                if has_area(self.size) {
                    self.construct();
                }
                Ok(())
            }
            SessionState::Constructing => {
                self.kind = kind;
                self.options = options;
                Ok(())
            }
            SessionState::Ready => {
                if options != self.options {
                    if let Some(chart) = self.chart {
                        self.backend.apply_options(chart, &options);
                    }
                    self.options = options;
                }
                if kind != self.kind {
                    self.switch_main(kind);
                }
                Ok(())
            }
        }
    }

    pub fn set_main_data(&mut self, points: Vec<MainPoint>) -> Result<(), DashError> {
        if self.state == SessionState::Disposed {
            return Err(DashError::Disposed);
        }
        validate_shape(self.kind, &points)?;

        match (self.state, self.main) {
            (SessionState::Ready, Some(main)) => {
                self.backend.set_main_data(main, &points);
                if let Some(chart) = self.chart {
                    self.backend.fit_content(chart);
                }
                self.main_data = Some(points);
            }
            _ => self.pending.main = Some(points),
        }
        Ok(())
    }

    pub fn set_overlay(&mut self, name: &str, series: Series) -> Result<(), DashError> {
        match self.state {
            SessionState::Disposed => Err(DashError::Disposed),
            SessionState::Ready => {
                self.attach_overlay(name, &series);
                Ok(())
            }
            SessionState::Unmounted | SessionState::Constructing => {
                self.pending.overlays.insert(name.to_string(), series);
                Ok(())
            }
        }
    }

    pub fn remove_overlay(&mut self, name: &str) -> Result<(), DashError> {
        if self.state == SessionState::Disposed {
            return Err(DashError::Disposed);
        }
        self.pending.overlays.remove(name);
        if let (Some(chart), Some(handle)) = (self.chart, self.overlays.remove(name)) {
            self.backend.remove_series(chart, handle);
        }
        Ok(())
    }

    /// Zero-area and unchanged sizes are ignored. The first non-zero size
    /// after `configure` builds the chart and flushes pending work.
    pub fn resize(&mut self, width: u16, height: u16) {
        if self.state == SessionState::Disposed || !has_area((width, height)) {
            return;
        }
        if self.size == (width, height) && self.state != SessionState::Constructing {
            return;
        }
        self.size = (width, height);

        match self.state {
            SessionState::Constructing => self.construct(),
            SessionState::Ready => {
                if let Some(chart) = self.chart {
                    self.backend.resize(chart, width, height);
                }
            }
            SessionState::Unmounted | SessionState::Disposed => {}
        }
    }

    /// Destroys the chart once. Safe to repeat and safe before `configure`.
    pub fn dispose(&mut self) {
        if self.state == SessionState::Disposed {
            return;
        }
        if let Some(chart) = self.chart.take() {
            self.backend.destroy(chart);
            info!("Chart disposed");
        }
        self.main = None;
        self.main_data = None;
        self.overlays.clear();
        self.pending = Pending::default();
        self.state = SessionState::Disposed;
    }

    fn construct(&mut self) {
        let (width, height) = self.size;
        let chart = self.backend.create(width, height, &self.options);
        self.chart = Some(chart);
        self.main = Some(self.backend.add_main_series(chart, self.kind));
        self.state = SessionState::Ready;
        info!("Chart ready at {}x{} ({})", width, height, self.kind.label());

        let pending = std::mem::take(&mut self.pending);
        if let Some(points) = pending.main {
            if let Err(e) = self.set_main_data(points) {
                warn!("Dropping queued main data: {}", e);
            }
        }
        for (name, series) in pending.overlays {
            self.attach_overlay(&name, &series);
        }
    }

    fn switch_main(&mut self, kind: ChartKind) {
        let Some(chart) = self.chart else {
            self.kind = kind;
            return;
        };
        if let Some(old) = self.main.take() {
            self.backend.remove_series(chart, old);
        }
        self.kind = kind;
        let main = self.backend.add_main_series(chart, kind);
        self.main = Some(main);

        if let Some(points) = self.main_data.take() {
            if validate_shape(kind, &points).is_ok() {
                self.backend.set_main_data(main, &points);
                self.main_data = Some(points);
            } else {
                debug!("Previous main data does not fit {}; cleared", kind.label());
            }
        }
        self.backend.fit_content(chart);
    }

    fn attach_overlay(&mut self, name: &str, series: &Series) {
        let Some(chart) = self.chart else {
            return;
        };
        if let Some(old) = self.overlays.remove(name) {
            self.backend.remove_series(chart, old);
        }
        let handle = self.backend.add_overlay_series(chart, name);
        let points: Vec<(i64, f64)> = series.present().collect();
        self.backend.set_overlay_data(handle, &points);
        self.overlays.insert(name.to_string(), handle);
    }
}

impl<B: ChartBackend> Drop for ChartSession<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn has_area((width, height): (u16, u16)) -> bool {
    width > 0 && height > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{Extractor, SeriesNormalizer};
    use chrono_tz::Tz;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct CountingChart {
        next_id: u64,
        created: usize,
        destroyed: usize,
        resized: Vec<(u16, u16)>,
        live_mains: HashSet<SeriesId>,
        max_live_mains: usize,
        live_overlays: HashMap<SeriesId, String>,
        main_writes: Vec<Vec<MainPoint>>,
        overlay_writes: Vec<(String, usize)>,
    }

    impl CountingChart {
        fn id(&mut self) -> u64 {
            self.next_id += 1;
            self.next_id
        }
    }

    impl ChartBackend for CountingChart {
        fn create(&mut self, _width: u16, _height: u16, _options: &ChartOptions) -> ChartId {
            self.created += 1;
            self.id()
        }

        fn apply_options(&mut self, _chart: ChartId, _options: &ChartOptions) {}

        fn add_main_series(&mut self, _chart: ChartId, _kind: ChartKind) -> SeriesId {
            let id = self.id();
            self.live_mains.insert(id);
            self.max_live_mains = self.max_live_mains.max(self.live_mains.len());
            id
        }

        fn add_overlay_series(&mut self, _chart: ChartId, name: &str) -> SeriesId {
            let id = self.id();
            self.live_overlays.insert(id, name.to_string());
            id
        }

        fn set_main_data(&mut self, _series: SeriesId, points: &[MainPoint]) {
            self.main_writes.push(points.to_vec());
        }

        fn set_overlay_data(&mut self, series: SeriesId, points: &[(i64, f64)]) {
            let name = self.live_overlays.get(&series).cloned().unwrap_or_default();
            self.overlay_writes.push((name, points.len()));
        }

        fn remove_series(&mut self, _chart: ChartId, series: SeriesId) {
            self.live_mains.remove(&series);
            self.live_overlays.remove(&series);
        }

        fn resize(&mut self, _chart: ChartId, width: u16, height: u16) {
            self.resized.push((width, height));
        }

        fn fit_content(&mut self, _chart: ChartId) {}

        fn destroy(&mut self, _chart: ChartId) {
            self.destroyed += 1;
            self.live_mains.clear();
            self.live_overlays.clear();
        }
    }

    fn ohlc(time: i64, close: f64) -> MainPoint {
        MainPoint::Ohlc {
            time,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
        }
    }

    fn value(time: i64, value: f64) -> MainPoint {
        MainPoint::Value {
            time,
            value,
            tone: None,
        }
    }

    fn overlay(name: &str, len: usize) -> Series {
        Series {
            name: name.to_string(),
            points: (0..len as i64).map(|t| (t, Some(t as f64))).collect(),
        }
    }

    fn ready_session() -> ChartSession<CountingChart> {
        let mut session = ChartSession::new(CountingChart::default());
        session.configure(ChartKind::Candlestick, ChartOptions::default()).unwrap();
        session.resize(80, 24);
        session
    }

    #[test]
    fn test_dispose_before_configure_and_twice() {
        let mut session = ChartSession::new(CountingChart::default());
        session.dispose();
        session.dispose();
        assert_eq!(session.state(), SessionState::Disposed);
        assert_eq!(session.backend().created, 0);
        assert_eq!(session.backend().destroyed, 0);
    }

    #[test]
    fn test_dispose_destroys_exactly_once() {
        let mut session = ready_session();
        session.set_overlay("EMA5", overlay("EMA5", 3)).unwrap();
        session.dispose();
        session.dispose();
        assert_eq!(session.state(), SessionState::Disposed);
        assert_eq!(session.backend().destroyed, 1);
        assert_eq!(session.main_handle_count(), 0);
        assert_eq!(session.overlay_names().count(), 0);
        assert_eq!(
            session.set_main_data(vec![ohlc(1, 1.0)]),
            Err(DashError::Disposed)
        );
    }

    #[test]
    fn test_zero_area_defers_construction_and_flushes_latest() {
        let mut session = ChartSession::new(CountingChart::default());
        session.resize(0, 0);
        session.configure(ChartKind::Candlestick, ChartOptions::default()).unwrap();
        session.resize(120, 0);
        assert_eq!(session.state(), SessionState::Constructing);

        session.set_main_data(vec![ohlc(1, 1.0)]).unwrap();
        session.set_main_data(vec![ohlc(1, 1.0), ohlc(2, 2.0)]).unwrap();
        session.set_overlay("EMA5", overlay("EMA5", 1)).unwrap();
        session.set_overlay("EMA5", overlay("EMA5", 4)).unwrap();
        session.set_overlay("EMA20", overlay("EMA20", 2)).unwrap();
        assert_eq!(session.backend().created, 0);
        assert!(session.backend().main_writes.is_empty());

        session.resize(120, 40);
        assert_eq!(session.state(), SessionState::Ready);
        let backend = session.backend();
        assert_eq!(backend.created, 1);
        assert_eq!(backend.main_writes.len(), 1);
        assert_eq!(backend.main_writes[0].len(), 2);
        assert_eq!(
            backend.overlay_writes,
            vec![("EMA20".to_string(), 2), ("EMA5".to_string(), 4)]
        );
    }

    #[test]
    fn test_size_known_before_configure_builds_immediately() {
        let mut session = ChartSession::new(CountingChart::default());
        session.resize(100, 30);
        assert_eq!(session.state(), SessionState::Unmounted);
        session.configure(ChartKind::Bar, ChartOptions::default()).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.backend().created, 1);
    }

    #[test]
    fn test_kind_switch_never_holds_two_mains() {
        let mut session = ready_session();
        session.set_overlay("EMA5", overlay("EMA5", 3)).unwrap();
        session.set_main_data(vec![ohlc(1, 1.0)]).unwrap();

        session.configure(ChartKind::Histogram, ChartOptions::default()).unwrap();
        assert_eq!(session.main_handle_count(), 1);
        session.set_main_data(vec![value(1, 1.0)]).unwrap();
        session.configure(ChartKind::Candlestick, ChartOptions::default()).unwrap();
        session.configure(ChartKind::Bar, ChartOptions::default()).unwrap();

        let backend = session.backend();
        assert_eq!(backend.max_live_mains, 1);
        assert_eq!(backend.live_mains.len(), 1);
        assert_eq!(backend.live_overlays.len(), 1);
        assert_eq!(session.overlay_names().collect::<Vec<_>>(), vec!["EMA5"]);
    }

    #[test]
    fn test_kind_switch_reapplies_compatible_data() {
        let mut session = ready_session();
        session.set_main_data(vec![ohlc(1, 1.0)]).unwrap();
        session.configure(ChartKind::Bar, ChartOptions::default()).unwrap();
        assert_eq!(session.backend().main_writes.len(), 2);

        session.configure(ChartKind::Baseline, ChartOptions::default()).unwrap();
        assert_eq!(session.backend().main_writes.len(), 2);
    }

    #[test]
    fn test_shape_mismatch_rejected_before_backend() {
        let mut session = ready_session();
        let err = session.set_main_data(vec![ohlc(1, 1.0), value(2, 2.0)]).unwrap_err();
        assert!(matches!(err, DashError::ShapeMismatch { expected: "OHLC", got: "value", .. }));
        assert!(session.backend().main_writes.is_empty());

        session.configure(ChartKind::Baseline, ChartOptions::default()).unwrap();
        assert!(session.set_main_data(vec![ohlc(1, 1.0)]).is_err());
        assert!(session.set_main_data(vec![value(1, 1.0)]).is_ok());
    }

    #[test]
    fn test_resize_is_idempotent() {
        let mut session = ready_session();
        session.resize(80, 24);
        session.resize(80, 24);
        session.resize(0, 24);
        session.resize(90, 24);
        session.resize(90, 24);
        assert_eq!(session.backend().resized, vec![(90, 24)]);
        assert_eq!(session.backend().created, 1);
    }

    #[test]
    fn test_overlay_replace_detaches_previous_handle() {
        let mut session = ready_session();
        session.set_overlay("EMA5", overlay("EMA5", 3)).unwrap();
        session.set_overlay("EMA5", overlay("EMA5", 5)).unwrap();
        assert_eq!(session.backend().live_overlays.len(), 1);

        session.remove_overlay("EMA5").unwrap();
        session.remove_overlay("missing").unwrap();
        assert!(session.backend().live_overlays.is_empty());
    }

    #[test]
    fn test_removed_overlay_is_not_flushed() {
        let mut session = ChartSession::new(CountingChart::default());
        session.configure(ChartKind::Candlestick, ChartOptions::default()).unwrap();
        session.set_overlay("EMA60", overlay("EMA60", 2)).unwrap();
        session.remove_overlay("EMA60").unwrap();
        session.resize(10, 10);
        assert!(session.backend().overlay_writes.is_empty());
    }

    #[test]
    fn test_build_main_points_per_kind() {
        let records = vec![
            json!({"time": "2024-01-01", "open": 10.0, "high": 12.0, "low": 9.0, "close": 11.0}),
            json!({"time": "2024-01-02", "open": 11.0, "high": 11.5, "low": 9.5, "close": 10.0}),
            json!({"time": "2024-01-03", "close": 10.5}),
        ];
        let extractors = ["open", "high", "low", "close"].map(Extractor::field);
        let frame = SeriesNormalizer::new(Tz::UTC, &["time"]).normalize(&records, &extractors);

        assert_eq!(build_main_points(ChartKind::Candlestick, &frame).len(), 2);
        assert_eq!(build_main_points(ChartKind::Baseline, &frame).len(), 3);

        let tones: Vec<Option<Tone>> = build_main_points(ChartKind::Histogram, &frame)
            .into_iter()
            .map(|p| match p {
                MainPoint::Value { tone, .. } => tone,
                MainPoint::Ohlc { .. } => None,
            })
            .collect();
        assert_eq!(tones, vec![Some(Tone::Up), Some(Tone::Down), Some(Tone::Down)]);
    }

    #[test]
    fn test_build_value_points_tones_by_sign() {
        let records = vec![
            json!({"date": "2024-01-02", "in_flow": 1200.5}),
            json!({"date": "2024-01-03", "in_flow": "-300"}),
            json!({"date": "2024-01-04", "in_flow": null}),
        ];
        let frame = SeriesNormalizer::new(Tz::UTC, &["date"])
            .normalize(&records, &[Extractor::field("in_flow")]);

        let bars = build_value_points(ChartKind::Histogram, &frame, "in_flow");
        assert_eq!(
            bars,
            vec![
                MainPoint::Value { time: 1_704_153_600, value: 1200.5, tone: Some(Tone::Up) },
                MainPoint::Value { time: 1_704_240_000, value: -300.0, tone: Some(Tone::Down) },
            ]
        );
        let line = build_value_points(ChartKind::Baseline, &frame, "in_flow");
        assert!(line.iter().all(|p| matches!(p, MainPoint::Value { tone: None, .. })));
        assert!(build_value_points(ChartKind::Baseline, &frame, "price").is_empty());
    }
}
