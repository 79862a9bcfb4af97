use crate::chart::{ChartBackend, ChartId, ChartKind, ChartOptions, MainPoint, SeriesId};
use tracing::debug;

pub struct OverlayLine {
    pub id: SeriesId,
    pub name: String,
    pub points: Vec<(i64, f64)>,
}

pub struct MainLayer {
    pub id: SeriesId,
    pub kind: ChartKind,
    pub points: Vec<MainPoint>,
}

/// In-memory chart that the terminal UI paints every frame.
#[derive(Default)]
pub struct TerminalChart {
    next_id: u64,
    chart: Option<ChartId>,
    size: (u16, u16),
    options: Option<ChartOptions>,
    main: Option<MainLayer>,
    overlays: Vec<OverlayLine>,
}

impl TerminalChart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        self.chart.is_some()
    }

    pub fn size(&self) -> (u16, u16) {
        self.size
    }

    pub fn time_visible(&self) -> bool {
        self.options.as_ref().is_some_and(|o| o.time_visible)
    }

    pub fn title(&self) -> &str {
        self.options.as_ref().map(|o| o.title.as_str()).unwrap_or("")
    }

    pub fn main(&self) -> Option<&MainLayer> {
        self.main.as_ref()
    }

    pub fn overlays(&self) -> &[OverlayLine] {
        &self.overlays
    }

    /// Time and price extent over every layer, for axis bounds.
    pub fn bounds(&self) -> Option<((i64, i64), (f64, f64))> {
        let mut times: Option<(i64, i64)> = None;
        let mut prices: Option<(f64, f64)> = None;
        let mut push = |t: i64, lo: f64, hi: f64| {
            times = Some(times.map_or((t, t), |(a, b)| (a.min(t), b.max(t))));
            prices = Some(prices.map_or((lo, hi), |(a, b)| (a.min(lo), b.max(hi))));
        };

        if let Some(main) = &self.main {
            for point in &main.points {
                match point {
                    MainPoint::Ohlc { time, high, low, .. } => push(*time, *low, *high),
                    MainPoint::Value { time, value, .. } => push(*time, *value, *value),
                }
            }
        }
        for line in &self.overlays {
            for (t, v) in &line.points {
                push(*t, *v, *v);
            }
        }
        Some((times?, prices?))
    }

    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl ChartBackend for TerminalChart {
    fn create(&mut self, width: u16, height: u16, options: &ChartOptions) -> ChartId {
        let id = self.id();
        self.chart = Some(id);
        self.size = (width, height);
        self.options = Some(options.clone());
        debug!("Terminal chart {} created at {}x{}", id, width, height);
        id
    }

    fn apply_options(&mut self, chart: ChartId, options: &ChartOptions) {
        if self.chart == Some(chart) {
            self.options = Some(options.clone());
        }
    }

    fn add_main_series(&mut self, _chart: ChartId, kind: ChartKind) -> SeriesId {
        let id = self.id();
        self.main = Some(MainLayer {
            id,
            kind,
            points: Vec::new(),
        });
        id
    }

    fn add_overlay_series(&mut self, _chart: ChartId, name: &str) -> SeriesId {
        let id = self.id();
        self.overlays.push(OverlayLine {
            id,
            name: name.to_string(),
            points: Vec::new(),
        });
        id
    }

    fn set_main_data(&mut self, series: SeriesId, points: &[MainPoint]) {
        if let Some(main) = self.main.as_mut().filter(|m| m.id == series) {
            main.points = points.to_vec();
        }
    }

    fn set_overlay_data(&mut self, series: SeriesId, points: &[(i64, f64)]) {
        if let Some(line) = self.overlays.iter_mut().find(|l| l.id == series) {
            line.points = points.to_vec();
        }
    }

    fn remove_series(&mut self, _chart: ChartId, series: SeriesId) {
        if self.main.as_ref().is_some_and(|m| m.id == series) {
            self.main = None;
        }
        self.overlays.retain(|l| l.id != series);
    }

    fn resize(&mut self, _chart: ChartId, width: u16, height: u16) {
        self.size = (width, height);
    }

    // The terminal view always spans the full data range.
    fn fit_content(&mut self, _chart: ChartId) {}

    fn destroy(&mut self, chart: ChartId) {
        if self.chart == Some(chart) {
            self.chart = None;
            self.main = None;
            self.overlays.clear();
            self.size = (0, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartSession, SessionState};
    use crate::normalize::Series;

    #[test]
    fn test_session_drives_terminal_chart() {
        let mut session = ChartSession::new(TerminalChart::new());
        session
            .configure(
                ChartKind::Candlestick,
                ChartOptions {
                    title: "00700.HK".into(),
                    time_visible: true,
                },
            )
            .unwrap();
        session
            .set_main_data(vec![MainPoint::Ohlc {
                time: 10,
                open: 1.0,
                high: 4.0,
                low: 0.5,
                close: 3.0,
            }])
            .unwrap();
        session
            .set_overlay(
                "EMA5",
                Series {
                    name: "EMA5".into(),
                    points: vec![(10, Some(2.0)), (20, None), (30, Some(5.0))],
                },
            )
            .unwrap();
        assert!(!session.backend().is_live());

        session.resize(60, 20);
        assert_eq!(session.state(), SessionState::Ready);
        let chart = session.backend();
        assert_eq!(chart.title(), "00700.HK");
        assert_eq!(chart.size(), (60, 20));
        assert!(chart.time_visible());
        assert_eq!(chart.main().map(|m| m.points.len()), Some(1));
        assert_eq!(chart.overlays()[0].points, vec![(10, 2.0), (30, 5.0)]);
        assert_eq!(chart.bounds(), Some(((10, 30), (0.5, 5.0))));

        session.resize(80, 24);
        assert_eq!(session.backend().size(), (80, 24));
        session
            .configure(
                ChartKind::Baseline,
                ChartOptions {
                    title: "00700.HK".into(),
                    time_visible: false,
                },
            )
            .unwrap();
        assert!(!session.backend().time_visible());
        assert_eq!(session.backend().main().map(|m| m.kind), Some(ChartKind::Baseline));
        assert_eq!(session.backend().overlays().len(), 1);

        session.dispose();
        assert!(!session.backend().is_live());
        assert!(session.backend().main().is_none());
    }

    #[test]
    fn test_empty_chart_has_no_bounds() {
        assert!(TerminalChart::new().bounds().is_none());
    }
}
