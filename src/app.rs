use crate::api::{MarketApi, NewsItem};
use crate::chart::{ChartKind, ChartOptions, ChartSession, build_main_points, build_value_points};
use crate::config::{AppConfig, Theme};
use crate::dashboard::{DashboardController, EMA_OVERLAYS, ViewState};
use crate::diagnosis::{DiagnosisSession, DiagnosisState};
use crate::error::DashError;
use crate::surface::TerminalChart;
use crate::symbol::{Symbol, sanitize_input};
use chrono_tz::Tz;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::layout::Rect;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Option chain rows per page when the panel is tall enough.
pub const OPTION_PAGE_SIZE: usize = 10;
/// Lines moved by PgUp/PgDn.
const SCROLL_PAGE: i32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LowerPanel {
    News,
    Options,
    Diagnosis,
}

impl LowerPanel {
    pub fn next(self) -> Self {
        match self {
            Self::News => Self::Options,
            Self::Options => Self::Diagnosis,
            Self::Diagnosis => Self::News,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::News => "News",
            Self::Options => "Option Chain",
            Self::Diagnosis => "Diagnosis",
        }
    }
}

pub struct App {
    pub should_quit: bool,
    pub mode: InputMode,
    pub input: String,
    /// Inline message for rejected input or chart errors.
    pub notice: Option<String>,
    pub panel: LowerPanel,
    pub chart_kind: ChartKind,
    pub theme: Theme,
    pub market_tz: Tz,
    pub view: ViewState,
    pub diagnosis: DiagnosisState,
    pub chart: ChartSession<TerminalChart>,
    /// Price and EMA lines from the latest diagnosis.
    pub technical_chart: ChartSession<TerminalChart>,
    /// Daily net capital inflow from the latest diagnosis.
    pub flow_chart: ChartSession<TerminalChart>,
    pub news_selected: usize,
    pub news_open: bool,
    pub detail_scroll: u16,
    pub option_page: usize,
    pub diagnosis_scroll: u16,
    screen: Rect,
    dashboard: Arc<DashboardController>,
    diagnosis_session: Arc<DiagnosisSession>,
    seen_generation: Option<u64>,
    synced_generation: Option<u64>,
    synced_diagnosis: Option<u64>,
}

impl App {
    pub fn new(api: Arc<dyn MarketApi>, config: &AppConfig, chart_kind: ChartKind) -> Self {
        Self {
            should_quit: false,
            mode: InputMode::Normal,
            input: config.default_symbol.clone(),
            notice: None,
            panel: LowerPanel::News,
            chart_kind,
            theme: Theme::dark(),
            market_tz: config.market_tz,
            view: ViewState::default(),
            diagnosis: DiagnosisState::default(),
            chart: ChartSession::new(TerminalChart::new()),
            technical_chart: ChartSession::new(TerminalChart::new()),
            flow_chart: ChartSession::new(TerminalChart::new()),
            news_selected: 0,
            news_open: false,
            detail_scroll: 0,
            option_page: 0,
            diagnosis_scroll: 0,
            screen: Rect::default(),
            dashboard: Arc::new(DashboardController::new(api.clone(), config.market_tz)),
            diagnosis_session: Arc::new(DiagnosisSession::new(api, config.market_tz)),
            seen_generation: None,
            synced_generation: None,
            synced_diagnosis: None,
        }
    }

    pub async fn run(&mut self, terminal: &mut crate::tui::Tui) -> io::Result<()> {
        let size = terminal.size()?;
        self.resize_chart(size.width, size.height);
        self.submit_symbol();

        while !self.should_quit {
            self.refresh_state();
            terminal.draw(|f| crate::ui::render(f, self))?;

            if event::poll(Duration::from_millis(16))? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key.code),
                    Event::Resize(width, height) => self.resize_chart(width, height),
                    _ => {}
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    pub fn handle_key(&mut self, code: KeyCode) {
        match self.mode {
            InputMode::Editing => match code {
                KeyCode::Char(c) => {
                    self.input.push(c);
                    self.input = sanitize_input(&self.input);
                }
                KeyCode::Backspace => {
                    self.input.pop();
                }
                KeyCode::Enter => {
                    self.mode = InputMode::Normal;
                    self.submit_symbol();
                }
                KeyCode::Esc => self.mode = InputMode::Normal,
                _ => {}
            },
            InputMode::Normal => match code {
                KeyCode::Esc if self.news_open => self.news_open = false,
                KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
                KeyCode::Char('/') | KeyCode::Char('e') => {
                    self.mode = InputMode::Editing;
                    self.notice = None;
                }
                KeyCode::Enter => self.submit_symbol(),
                KeyCode::Char('r') => self.refresh(),
                KeyCode::Char('d') => self.diagnose(),
                KeyCode::Tab => self.panel = self.panel.next(),
                KeyCode::Char('o') | KeyCode::Char(' ') => self.toggle_news(),
                KeyCode::Char('j') | KeyCode::Down => self.scroll_by(1),
                KeyCode::Char('k') | KeyCode::Up => self.scroll_by(-1),
                KeyCode::PageDown => self.scroll_by(SCROLL_PAGE),
                KeyCode::PageUp => self.scroll_by(-SCROLL_PAGE),
                KeyCode::Char(c @ '1'..='4') => {
                    let idx = c as usize - '1' as usize;
                    self.set_chart_kind(ChartKind::ALL[idx]);
                }
                _ => {}
            },
        }
    }

    /// Pulls the latest committed state and rebuilds the charts when the
    /// kline data, chart kind or diagnosis changed since the last sync.
    pub fn refresh_state(&mut self) {
        self.view = self.dashboard.view();
        self.diagnosis = self.diagnosis_session.state();
        if self.seen_generation != Some(self.view.generation) {
            self.seen_generation = Some(self.view.generation);
            self.news_selected = 0;
            self.news_open = false;
            self.detail_scroll = 0;
            self.option_page = 0;
        }
        if self.synced_generation != Some(self.view.generation) {
            self.sync_chart();
        }
        if self.synced_diagnosis != Some(self.diagnosis.generation) {
            self.sync_diagnosis_charts();
        }
    }

    pub fn resize_chart(&mut self, width: u16, height: u16) {
        self.screen = Rect::new(0, 0, width, height);
        let area = crate::ui::chart_area(self.screen);
        self.chart.resize(area.width, area.height);
        let (technical, flow) = crate::ui::diagnosis_chart_areas(self.screen);
        self.technical_chart.resize(technical.width, technical.height);
        self.flow_chart.resize(flow.width, flow.height);
    }

    pub fn shutdown(&mut self) {
        self.chart.dispose();
        self.technical_chart.dispose();
        self.flow_chart.dispose();
        info!("Dashboard closed");
    }

    /// The news item shown in full, if the detail view is open.
    pub fn open_news(&self) -> Option<&NewsItem> {
        self.news_open
            .then(|| self.view.news.get(self.news_selected))
            .flatten()
    }

    pub fn option_page_size(&self) -> usize {
        crate::ui::option_page_size(self.screen)
    }

    pub fn option_pages(&self) -> usize {
        self.view.option_chain.len().div_ceil(self.option_page_size()).max(1)
    }

    fn toggle_news(&mut self) {
        if self.panel == LowerPanel::News && !self.view.news.is_empty() {
            self.news_open = !self.news_open;
            self.detail_scroll = 0;
        }
    }

    fn scroll_by(&mut self, delta: i32) {
        match self.panel {
            LowerPanel::News if self.news_open => {
                let limit = crate::ui::scroll_limit(self, self.screen);
                self.detail_scroll = scrolled(self.detail_scroll, delta, limit);
            }
            LowerPanel::News => {
                let last = self.view.news.len().saturating_sub(1);
                self.news_selected = moved(self.news_selected, delta, last);
            }
            LowerPanel::Options => {
                self.option_page = moved(self.option_page, delta.signum(), self.option_pages() - 1);
            }
            LowerPanel::Diagnosis => {
                let limit = crate::ui::scroll_limit(self, self.screen);
                self.diagnosis_scroll = scrolled(self.diagnosis_scroll, delta, limit);
            }
        }
    }

    fn submit_symbol(&mut self) {
        let symbol = match Symbol::parse(&self.input) {
            Ok(symbol) => symbol,
            Err(e) => {
                self.notice = Some(e.to_string());
                return;
            }
        };
        self.notice = None;
        self.input = symbol.to_string();

        let dashboard = self.dashboard.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard.load_symbol(&symbol.to_string()).await {
                warn!("Load of {} rejected: {}", symbol, e);
            }
        });
    }

    fn refresh(&mut self) {
        let dashboard = self.dashboard.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard.refresh().await {
                warn!("Refresh skipped: {}", e);
            }
        });
    }

    fn diagnose(&mut self) {
        let target = self
            .view
            .symbol
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.input.clone());
        if let Err(e) = Symbol::parse(&target) {
            self.notice = Some(e.to_string());
            return;
        }
        self.panel = LowerPanel::Diagnosis;

        let session = self.diagnosis_session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.run_diagnosis(&target).await {
                warn!("Diagnosis of {} rejected: {}", target, e);
            }
        });
    }

    fn set_chart_kind(&mut self, kind: ChartKind) {
        if kind != self.chart_kind {
            self.chart_kind = kind;
            self.synced_generation = None;
        }
    }

    fn sync_chart(&mut self) {
        if let Err(e) = self.apply_view_to_chart() {
            warn!("Chart update failed: {}", e);
            self.notice = Some(e.to_string());
        }
        self.synced_generation = Some(self.view.generation);
    }

    fn sync_diagnosis_charts(&mut self) {
        if let Err(e) = self.apply_diagnosis_to_charts() {
            warn!("Diagnosis chart update failed: {}", e);
            self.notice = Some(e.to_string());
        }
        self.synced_diagnosis = Some(self.diagnosis.generation);
        self.diagnosis_scroll = 0;
    }

    fn apply_diagnosis_to_charts(&mut self) -> Result<(), DashError> {
        let options = |title: &str| ChartOptions {
            title: title.to_string(),
            time_visible: true,
        };
        self.technical_chart
            .configure(ChartKind::Baseline, options("Price & EMA"))?;
        self.flow_chart
            .configure(ChartKind::Histogram, options("Net inflow"))?;

        let Some(payload) = self.diagnosis.result.clone() else {
            return Ok(());
        };
        let technical = &payload.technical_chart;
        self.technical_chart
            .set_main_data(build_value_points(ChartKind::Baseline, technical, "price"))?;
        for name in EMA_OVERLAYS {
            match technical.get(name).filter(|s| s.present().next().is_some()) {
                Some(series) => self.technical_chart.set_overlay(name, series.clone())?,
                None => self.technical_chart.remove_overlay(name)?,
            }
        }
        self.flow_chart.set_main_data(build_value_points(
            ChartKind::Histogram,
            &payload.capital_flow_chart,
            "in_flow",
        ))?;
        Ok(())
    }

    fn apply_view_to_chart(&mut self) -> Result<(), DashError> {
        let title = self
            .view
            .symbol
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_default();
        self.chart.configure(
            self.chart_kind,
            ChartOptions {
                title,
                time_visible: true,
            },
        )?;

        let Some(frame) = &self.view.kline else {
            self.chart.set_main_data(Vec::new())?;
            for name in EMA_OVERLAYS {
                self.chart.remove_overlay(name)?;
            }
            return Ok(());
        };

        self.chart
            .set_main_data(build_main_points(self.chart_kind, frame))?;
        for name in EMA_OVERLAYS {
            match frame.get(name).filter(|s| s.present().next().is_some()) {
                Some(series) => self.chart.set_overlay(name, series.clone())?,
                None => self.chart.remove_overlay(name)?,
            }
        }
        Ok(())
    }
}

fn scrolled(current: u16, delta: i32, limit: u16) -> u16 {
    let next = (i64::from(current) + i64::from(delta)).clamp(0, i64::from(limit));
    u16::try_from(next).unwrap_or(limit)
}

fn moved(current: usize, delta: i32, last: usize) -> usize {
    let step = delta.unsigned_abs() as usize;
    let next = if delta < 0 {
        current.saturating_sub(step)
    } else {
        current.saturating_add(step)
    };
    next.min(last)
}
