use crate::api::NewsItem;
use crate::app::{App, InputMode, LowerPanel, OPTION_PAGE_SIZE};
use crate::chart::{ChartKind, MainPoint, Tone};
use crate::config::Theme;
use crate::report::{self, Block as ReportBlock};
use crate::surface::TerminalChart;
use chrono::DateTime;
use chrono_tz::Tz;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        Block, Borders, Cell, Paragraph, Row, Table, Wrap,
        canvas::{Canvas, Line as CanvasLine, Rectangle},
    },
};

/// Narrowest chart that still fits a start and an end date under it.
const TIME_LABEL_MIN_WIDTH: u16 = 24;

struct Areas {
    header: Rect,
    chart: Rect,
    details: Rect,
    lower: Rect,
    footer: Rect,
}

fn split(area: Rect) -> Areas {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Percentage(60),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area);
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(75), Constraint::Percentage(25)])
        .split(rows[1]);

    Areas {
        header: rows[0],
        chart: top[0],
        details: top[1],
        lower: rows[2],
        footer: rows[3],
    }
}

struct DiagnosisAreas {
    report: Rect,
    technical: Rect,
    flow: Rect,
}

fn split_diagnosis(area: Rect) -> DiagnosisAreas {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(50),
            Constraint::Percentage(30),
            Constraint::Percentage(20),
        ])
        .split(area);
    DiagnosisAreas {
        report: cols[0],
        technical: cols[1],
        flow: cols[2],
    }
}

fn inner(area: Rect) -> Rect {
    Block::default().borders(Borders::ALL).inner(area)
}

/// Drawable chart area (inside the border) for a terminal of `area`.
pub fn chart_area(area: Rect) -> Rect {
    inner(split(area).chart)
}

/// Drawable areas of the technical and capital-flow charts in the diagnosis panel.
pub fn diagnosis_chart_areas(area: Rect) -> (Rect, Rect) {
    let areas = split_diagnosis(split(area).lower);
    (inner(areas.technical), inner(areas.flow))
}

/// Option rows that fit under the table header, at most one full page.
pub fn option_page_size(screen: Rect) -> usize {
    let rows = usize::from(inner(split(screen).lower).height).saturating_sub(1);
    rows.clamp(1, OPTION_PAGE_SIZE)
}

/// Largest useful scroll offset of the text in the active lower panel.
pub fn scroll_limit(app: &App, screen: Rect) -> u16 {
    let lower = split(screen).lower;
    let (lines, area) = match app.panel {
        LowerPanel::Diagnosis => (diagnosis_lines(app), split_diagnosis(lower).report),
        LowerPanel::News => match app.open_news() {
            Some(item) => (news_detail_lines(item, &app.theme), lower),
            None => return 0,
        },
        LowerPanel::Options => return 0,
    };
    let area = inner(area);
    let overflow = wrapped_height(&lines, area.width).saturating_sub(usize::from(area.height));
    u16::try_from(overflow).unwrap_or(u16::MAX)
}

// Word wrapping can spill a wrapped line onto one more row than its width suggests.
fn wrapped_height(lines: &[Line], width: u16) -> usize {
    let width = usize::from(width);
    if width == 0 {
        return 0;
    }
    lines
        .iter()
        .map(|line| match line.width() {
            w if w <= width => 1,
            w => w.div_ceil(width) + 1,
        })
        .sum()
}

pub fn render(f: &mut Frame, app: &App) {
    let areas = split(f.area());
    render_header(f, app, areas.header);
    render_main_chart(f, app, areas.chart);
    render_details(f, app, areas.details);
    match app.panel {
        LowerPanel::News => render_news(f, app, areas.lower),
        LowerPanel::Options => render_options(f, app, areas.lower),
        LowerPanel::Diagnosis => render_diagnosis(f, app, areas.lower),
    }
    render_footer(f, app, areas.footer);
}

fn bordered<'a>(title: impl Into<Line<'a>>, theme: &Theme) -> Block<'a> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .title(title)
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let theme = &app.theme;
    let input_style = match app.mode {
        InputMode::Editing => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        InputMode::Normal => Style::default().fg(theme.text),
    };
    let mut spans = vec![
        Span::styled(
            " StockDash ",
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(format!("[{}]", app.input), input_style),
    ];

    if let Some(quote) = &app.view.quote {
        if let Some(name) = &quote.name {
            spans.push(Span::raw(" | "));
            spans.push(Span::styled(name.clone(), Style::default().fg(theme.text_secondary)));
        }
        if let Some(price) = quote.current_price {
            spans.push(Span::raw(" "));
            spans.push(Span::styled(
                format!("{:.2}", price),
                Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
            ));
        }
        if let Some((delta, pct)) = quote.change() {
            let color = if delta >= 0.0 { theme.up } else { theme.down };
            spans.push(Span::raw(" "));
            spans.push(Span::styled(
                format!("({:+.2}, {:+.2}%)", delta, pct),
                Style::default().fg(color),
            ));
        }
    }

    if app.view.loading {
        spans.push(Span::styled("  loading...", Style::default().fg(Color::Yellow)));
    }
    if app.diagnosis.loading {
        spans.push(Span::styled("  diagnosing...", Style::default().fg(Color::Yellow)));
    }

    let header = Paragraph::new(Line::from(spans)).block(bordered("", theme));
    f.render_widget(header, area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let theme = &app.theme;
    let banner = app
        .notice
        .as_deref()
        .or(app.view.error.as_deref())
        .map(|msg| Span::styled(format!(" {} ", msg), Style::default().fg(theme.down)));

    let hint = match app.mode {
        InputMode::Editing => "Enter: load | Esc: cancel",
        InputMode::Normal if app.news_open => "j/k: scroll | o/Esc: back to list | q: quit",
        InputMode::Normal => {
            "/: symbol | Enter: load | r: refresh | d: diagnose | 1-4: chart | Tab: panel | j/k PgUp/PgDn: scroll | o: open news | q: quit"
        }
    };
    let mut spans = vec![
        Span::styled(" Controls: ", Style::default().fg(theme.text_secondary)),
        Span::styled(hint, Style::default().fg(theme.text)),
    ];
    if let Some(banner) = banner {
        spans.push(Span::raw(" |"));
        spans.push(banner);
    }

    f.render_widget(Paragraph::new(Line::from(spans)).block(bordered("", theme)), area);
}

fn format_day(ts: i64, tz: Tz) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.with_timezone(&tz).format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn render_main_chart(f: &mut Frame, app: &App, area: Rect) {
    let chart = app.chart.backend();
    let label = format!("{} - {}", chart.title(), app.chart_kind.label());
    let empty = if app.view.loading { "Loading kline..." } else { "No kline data" };
    draw_chart(f, chart, label, empty, &app.theme, app.market_tz, area);
}

fn draw_chart(
    f: &mut Frame,
    chart: &TerminalChart,
    label: String,
    empty: &str,
    theme: &Theme,
    tz: Tz,
    area: Rect,
) {
    let mut title = vec![Span::styled(
        format!(" {} ", label),
        Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
    )];
    for line in chart.overlays() {
        title.push(Span::styled(
            format!("{} ", line.name),
            Style::default().fg(theme.overlay_color(&line.name)),
        ));
    }
    let mut block = bordered(Line::from(title), theme);

    let Some(((first, last), (low, high))) = chart.bounds() else {
        f.render_widget(Paragraph::new(empty.to_string()).block(block), area);
        return;
    };
    if chart.time_visible() && chart.size().0 >= TIME_LABEL_MIN_WIDTH {
        let label_style = Style::default().fg(theme.text_secondary);
        block = block
            .title_bottom(Line::styled(format!(" {} ", format_day(first, tz)), label_style).left_aligned())
            .title_bottom(Line::styled(format!(" {} ", format_day(last, tz)), label_style).right_aligned());
    }

    // Points are spaced by index so non-trading days leave no holes.
    let mut times: Vec<i64> = chart
        .main()
        .map(|m| m.points.iter().map(MainPoint::time).collect())
        .unwrap_or_default();
    for line in chart.overlays() {
        times.extend(line.points.iter().map(|(t, _)| *t));
    }
    times.sort_unstable();
    times.dedup();
    let x_of = |t: i64| times.binary_search(&t).unwrap_or_else(|i| i) as f64;

    let pad = ((high - low) * 0.05).max(f64::EPSILON);
    let floor = low - pad;
    let ceiling = high + pad;
    // Histogram bars grow from zero when zero is on screen.
    let bar_base = 0f64.clamp(floor, ceiling);
    let up = theme.up;
    let down = theme.down;

    let canvas = Canvas::default()
        .block(block)
        .marker(Marker::Braille)
        .x_bounds([-1.0, times.len() as f64])
        .y_bounds([floor, ceiling])
        .paint(|ctx| {
            if let Some(main) = chart.main() {
                let baseline = main.points.first().map(|p| match p {
                    MainPoint::Ohlc { close, .. } => *close,
                    MainPoint::Value { value, .. } => *value,
                });
                let mut prev: Option<(f64, f64)> = None;
                for point in &main.points {
                    let x = x_of(point.time());
                    match (main.kind, point) {
                        (kind, MainPoint::Ohlc { open, high, low, close, .. }) => {
                            let color = if close >= open { up } else { down };
                            ctx.draw(&CanvasLine::new(x, *low, x, *high, color));
                            if kind == ChartKind::Candlestick {
                                ctx.draw(&Rectangle {
                                    x: x - 0.3,
                                    y: open.min(*close),
                                    width: 0.6,
                                    height: (close - open).abs(),
                                    color,
                                });
                            } else {
                                ctx.draw(&CanvasLine::new(x - 0.3, *open, x, *open, color));
                                ctx.draw(&CanvasLine::new(x, *close, x + 0.3, *close, color));
                            }
                        }
                        (ChartKind::Histogram, MainPoint::Value { value, tone, .. }) => {
                            let color = match tone {
                                Some(Tone::Up) => up,
                                _ => down,
                            };
                            ctx.draw(&CanvasLine::new(x, bar_base, x, *value, color));
                        }
                        (_, MainPoint::Value { value, .. }) => {
                            let color = match baseline {
                                Some(base) if *value < base => down,
                                _ => up,
                            };
                            if let Some((px, py)) = prev {
                                ctx.draw(&CanvasLine::new(px, py, x, *value, color));
                            }
                            prev = Some((x, *value));
                        }
                    }
                }
            }
            ctx.layer();
            for line in chart.overlays() {
                let color = theme.overlay_color(&line.name);
                for pair in line.points.windows(2) {
                    let (t0, v0) = pair[0];
                    let (t1, v1) = pair[1];
                    ctx.draw(&CanvasLine::new(x_of(t0), v0, x_of(t1), v1, color));
                }
            }
        });

    f.render_widget(canvas, area);
}

fn render_details(f: &mut Frame, app: &App, area: Rect) {
    let theme = &app.theme;
    let label = |text: &str| Span::styled(format!("{:<8}", text), Style::default().fg(theme.text_secondary));
    let number = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v));

    let mut lines = vec![Line::from(Span::styled(
        "Quote",
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    ))];
    match &app.view.quote {
        Some(q) => {
            lines.push(Line::from(vec![label("Open"), Span::raw(number(q.open_price))]));
            lines.push(Line::from(vec![
                label("High"),
                Span::styled(number(q.high_price), Style::default().fg(theme.up)),
            ]));
            lines.push(Line::from(vec![
                label("Low"),
                Span::styled(number(q.low_price), Style::default().fg(theme.down)),
            ]));
            lines.push(Line::from(vec![label("Prev"), Span::raw(number(q.pre_close))]));
            lines.push(Line::from(vec![label("Volume"), Span::raw(number(q.volume))]));
            lines.push(Line::from(vec![label("Turnover"), Span::raw(number(q.turnover))]));
            if let Some(updated) = &q.update_time {
                lines.push(Line::from(vec![label("Updated"), Span::raw(updated.clone())]));
            }
        }
        None => lines.push(Line::from("No quote")),
    }

    if let Some(kline) = app.view.kline.as_ref().filter(|k| !k.is_empty()) {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Kline",
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
        )));
        if let (Some(first), Some(last)) = (kline.axis.first(), kline.axis.last()) {
            lines.push(Line::from(vec![label("From"), Span::raw(format_day(*first, app.market_tz))]));
            lines.push(Line::from(vec![label("To"), Span::raw(format_day(*last, app.market_tz))]));
        }
        lines.push(Line::from(vec![label("Bars"), Span::raw(kline.len().to_string())]));
        let low = kline.get("low").and_then(|s| s.bounds());
        let high = kline.get("high").and_then(|s| s.bounds());
        if let (Some((lo, _)), Some((_, hi))) = (low, high) {
            lines.push(Line::from(vec![
                label("Range"),
                Span::raw(format!("{:.2} - {:.2}", lo, hi)),
            ]));
        }
    }

    let details = Paragraph::new(lines)
        .block(bordered(" Details ", theme))
        .style(Style::default().fg(theme.text));
    f.render_widget(details, area);
}

fn panel_title(app: &App) -> String {
    let tabs: Vec<String> = [LowerPanel::News, LowerPanel::Options, LowerPanel::Diagnosis]
        .into_iter()
        .map(|p| {
            if p == app.panel {
                format!("[{}]", p.title())
            } else {
                p.title().to_string()
            }
        })
        .collect();
    format!(" {} ", tabs.join(" "))
}

fn news_meta(item: &NewsItem) -> String {
    [item.source.as_deref(), item.publish_time.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" · ")
}

fn news_detail_lines(item: &NewsItem, theme: &Theme) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled(
        item.title.clone().unwrap_or_else(|| "(untitled)".into()),
        Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
    ))];
    let meta = news_meta(item);
    if !meta.is_empty() {
        lines.push(Line::from(Span::styled(meta, Style::default().fg(theme.text_secondary))));
    }
    lines.push(Line::from(""));
    match &item.content {
        Some(content) => lines.extend(content.lines().map(|l| Line::from(l.to_string()))),
        None => lines.push(Line::from(Span::styled(
            "(no content)",
            Style::default().fg(theme.text_secondary),
        ))),
    }
    if let Some(url) = &item.url {
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::styled("Link: ", Style::default().fg(theme.text_secondary)),
            Span::styled(url.clone(), Style::default().fg(theme.accent).add_modifier(Modifier::UNDERLINED)),
        ]));
    }
    lines
}

fn render_news(f: &mut Frame, app: &App, area: Rect) {
    let theme = &app.theme;
    if let Some(item) = app.open_news() {
        let scroll = app.detail_scroll.min(scroll_limit(app, f.area()));
        let detail = Paragraph::new(news_detail_lines(item, theme))
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0))
            .block(bordered(format!("{}- o/Esc: back ", panel_title(app)), theme));
        f.render_widget(detail, area);
        return;
    }

    let news = &app.view.news;
    if news.is_empty() {
        f.render_widget(Paragraph::new("No news").block(bordered(panel_title(app), theme)), area);
        return;
    }

    // Two rows per item; keep the selection on screen.
    let visible = (usize::from(inner(area).height) / 2).max(1);
    let first = app.news_selected.saturating_sub(visible - 1);
    let mut lines = Vec::new();
    for (idx, item) in news.iter().enumerate().skip(first).take(visible) {
        let selected = idx == app.news_selected;
        let title_style = if selected {
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD | Modifier::REVERSED)
        } else {
            Style::default().fg(theme.text).add_modifier(Modifier::BOLD)
        };
        lines.push(Line::from(vec![
            Span::raw(if selected { "> " } else { "  " }),
            Span::styled(item.title.clone().unwrap_or_else(|| "(untitled)".into()), title_style),
        ]));
        lines.push(Line::from(Span::styled(
            format!("  {}", news_meta(item)),
            Style::default().fg(theme.text_secondary),
        )));
    }

    let title = format!("{}{}/{} ", panel_title(app), app.news_selected + 1, news.len());
    f.render_widget(Paragraph::new(lines).block(bordered(title, theme)), area);
}

fn render_options(f: &mut Frame, app: &App, area: Rect) {
    let theme = &app.theme;
    if app.view.option_chain.is_empty() {
        f.render_widget(
            Paragraph::new("No option chain").block(bordered(panel_title(app), theme)),
            area,
        );
        return;
    }

    let pages = app.option_pages();
    let page = app.option_page.min(pages - 1);
    let page_size = app.option_page_size();
    let block = bordered(format!("{}page {}/{} ", panel_title(app), page + 1, pages), theme);

    let text = |v: &Option<String>| Cell::from(v.clone().unwrap_or_else(|| "-".into()));
    let rows = app
        .view
        .option_chain
        .iter()
        .skip(page * page_size)
        .take(page_size)
        .map(|row| {
            Row::new(vec![
                text(&row.strike_time),
                Cell::from(row.strike_price.map_or_else(|| "-".into(), |p| format!("{:.2}", p))),
                text(&row.call_code),
                text(&row.call_name),
                text(&row.put_code),
                text(&row.put_name),
            ])
        });
    let header = Row::new(["Expiry", "Strike", "Call", "Call name", "Put", "Put name"])
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(9),
            Constraint::Percentage(18),
            Constraint::Percentage(22),
            Constraint::Percentage(18),
            Constraint::Percentage(22),
        ],
    )
    .header(header)
    .block(block);
    f.render_widget(table, area);
}

fn diagnosis_lines(app: &App) -> Vec<Line<'static>> {
    let theme = &app.theme;
    let mut lines = Vec::new();
    if let Some(err) = &app.diagnosis.error {
        lines.push(Line::from(Span::styled(err.clone(), Style::default().fg(theme.down))));
    }
    match &app.diagnosis.result {
        Some(payload) => {
            if let Some(symbol) = &app.diagnosis.symbol {
                lines.push(Line::from(Span::styled(
                    format!("Diagnosis for {}", symbol),
                    Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
                )));
            }
            lines.extend(report_lines(&report::full_report(payload), theme));
        }
        None if app.diagnosis.loading => lines.push(Line::from("Analysing...")),
        None => lines.push(Line::from("No diagnosis yet. Press d to run one.")),
    }
    lines
}

fn render_diagnosis(f: &mut Frame, app: &App, area: Rect) {
    let theme = &app.theme;
    let areas = split_diagnosis(area);

    let scroll = app.diagnosis_scroll.min(scroll_limit(app, f.area()));
    let panel = Paragraph::new(diagnosis_lines(app))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0))
        .block(bordered(panel_title(app), theme));
    f.render_widget(panel, areas.report);

    let technical = app.technical_chart.backend();
    draw_chart(
        f,
        technical,
        technical.title().to_string(),
        "No technical chart data",
        theme,
        app.market_tz,
        areas.technical,
    );
    let flow = app.flow_chart.backend();
    draw_chart(
        f,
        flow,
        flow.title().to_string(),
        "No capital flow data",
        theme,
        app.market_tz,
        areas.flow,
    );
}

fn report_lines(blocks: &[ReportBlock], theme: &Theme) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for block in blocks {
        match block {
            ReportBlock::Heading { level, text } => {
                let color = if *level <= 1 { theme.accent } else { Color::Yellow };
                lines.push(Line::from(Span::styled(
                    text.clone(),
                    Style::default().fg(color).add_modifier(Modifier::BOLD),
                )));
            }
            ReportBlock::Text(text) => {
                lines.extend(text.lines().map(|l| Line::from(l.to_string())));
            }
            ReportBlock::Highlight(text) => lines.push(Line::from(Span::styled(
                text.clone(),
                Style::default().fg(theme.warning),
            ))),
            ReportBlock::Bullets(items) => {
                lines.extend(items.iter().map(|i| Line::from(format!("  • {}", i))));
            }
            ReportBlock::Numbered(items) => lines.extend(
                items
                    .iter()
                    .enumerate()
                    .map(|(n, i)| Line::from(format!("  {}. {}", n + 1, i))),
            ),
            ReportBlock::Pre(text) => lines.extend(text.lines().map(|l| {
                Line::from(Span::styled(l.to_string(), Style::default().fg(theme.text_secondary)))
            })),
            ReportBlock::Note(text) => lines.push(Line::from(Span::styled(
                text.clone(),
                Style::default()
                    .fg(theme.text_secondary)
                    .add_modifier(Modifier::ITALIC),
            ))),
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartOptions, ChartSession};
    use ratatui::{Terminal, backend::TestBackend};

    fn draw_chart_text(chart: &TerminalChart, width: u16, height: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal
            .draw(|f| {
                let area = f.area();
                draw_chart(f, chart, "T".into(), "empty", &Theme::dark(), Tz::UTC, area);
            })
            .unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    fn options(time_visible: bool) -> ChartOptions {
        ChartOptions {
            title: "T".into(),
            time_visible,
        }
    }

    #[test]
    fn test_chart_area_tracks_terminal_size() {
        let small = chart_area(Rect::new(0, 0, 80, 24));
        let large = chart_area(Rect::new(0, 0, 200, 60));
        assert!(small.width > 0 && small.height > 0);
        assert!(large.width > small.width && large.height > small.height);
        assert_eq!(chart_area(Rect::new(0, 0, 0, 0)).area(), 0);

        let (technical, flow) = diagnosis_chart_areas(Rect::new(0, 0, 120, 40));
        assert!(technical.area() > 0 && flow.area() > 0);
        assert!(technical.width > flow.width);
    }

    #[test]
    fn test_option_page_size_fits_panel() {
        assert_eq!(option_page_size(Rect::new(0, 0, 120, 40)), 7);
        assert_eq!(option_page_size(Rect::new(0, 0, 120, 80)), OPTION_PAGE_SIZE);
        assert_eq!(option_page_size(Rect::default()), 1);
    }

    #[test]
    fn test_time_labels_follow_options_and_width() {
        let mut session = ChartSession::new(TerminalChart::new());
        session.configure(ChartKind::Baseline, options(true)).unwrap();
        session
            .set_main_data(vec![
                MainPoint::Value { time: 1_704_153_600, value: 1.0, tone: None },
                MainPoint::Value { time: 1_704_240_000, value: 2.0, tone: None },
            ])
            .unwrap();
        session.resize(40, 10);
        let text = draw_chart_text(session.backend(), 42, 12);
        assert!(text.contains("2024-01-02") && text.contains("2024-01-03"));

        session.configure(ChartKind::Baseline, options(false)).unwrap();
        assert!(!draw_chart_text(session.backend(), 42, 12).contains("2024-01-02"));

        session.configure(ChartKind::Baseline, options(true)).unwrap();
        session.resize(20, 10);
        assert!(!draw_chart_text(session.backend(), 22, 12).contains("2024-01-02"));
    }

    #[test]
    fn test_empty_chart_shows_placeholder() {
        let text = draw_chart_text(&TerminalChart::new(), 30, 5);
        assert!(text.contains("empty"));
    }

    #[test]
    fn test_wrapped_height_counts_overflow_rows() {
        let lines = vec![Line::from("short"), Line::from("x".repeat(25)), Line::from("")];
        assert_eq!(wrapped_height(&lines, 10), 1 + 4 + 1);
        assert_eq!(wrapped_height(&lines, 0), 0);
    }

    #[test]
    fn test_report_lines_style_warnings() {
        let theme = Theme::dark();
        let lines = report_lines(
            &[
                ReportBlock::Highlight("single".into()),
                ReportBlock::Numbered(vec!["A".into(), "B".into()]),
            ],
            &theme,
        );
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].spans[0].style.fg, Some(theme.warning));
        assert_eq!(lines[2].to_string(), "  2. B");
    }

    #[test]
    fn test_news_detail_shows_content_and_link() {
        let item = NewsItem {
            title: Some("Buyback".into()),
            content: Some("Line one\nLine two".into()),
            source: Some("Wire".into()),
            url: Some("https://news.example/1".into()),
            ..NewsItem::default()
        };
        let text: Vec<String> = news_detail_lines(&item, &Theme::dark())
            .iter()
            .map(|l| l.to_string())
            .collect();
        assert_eq!(text[0], "Buyback");
        assert_eq!(text[1], "Wire");
        assert!(text.contains(&"Line two".to_string()));
        assert_eq!(text.last().map(String::as_str), Some("Link: https://news.example/1"));
    }
}
