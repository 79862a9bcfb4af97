mod api;
mod app;
mod chart;
mod config;
mod dashboard;
mod diagnosis;
mod error;
mod normalize;
mod report;
mod surface;
mod symbol;
mod tui;
mod ui;

use anyhow::Context;
use api::{HttpMarketApi, MarketApi};
use app::App;
use chart::ChartKind;
use clap::Parser;
use config::AppConfig;
use dashboard::{DashboardController, ViewState};
use diagnosis::DiagnosisSession;
use std::fs::File;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "StockDash-TUI: terminal dashboard for quotes, klines, option chains, news and AI diagnosis",
    after_help = "EXAMPLES:
    # Interactive dashboard against a local backend
    cargo run --release

    # Print a one-shot summary for a symbol
    cargo run --release -- --snapshot --symbol 600300.SH

    # Run a diagnosis and print the report
    cargo run --release -- --diagnose --symbol 00700.HK --api-url http://10.0.0.5:5001"
)]
struct Args {
    /// API base URL (overrides STOCKDASH_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Symbol to load, e.g. 00700.HK (defaults to STOCKDASH_DEFAULT_SYMBOL)
    #[arg(long)]
    symbol: Option<String>,

    /// Load the symbol once, print a summary and exit
    #[arg(long, conflicts_with = "diagnose")]
    snapshot: bool,

    /// Run one diagnosis, print the report and exit
    #[arg(long)]
    diagnose: bool,

    /// Initial main chart kind
    #[arg(long, value_enum, default_value_t = ChartKind::Candlestick)]
    chart_kind: ChartKind,
}

fn init_logging(to_file: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stockdash_tui=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    if to_file {
        let file = File::create(config::TUI_LOG_FILE)
            .with_context(|| format!("creating log file {}", config::TUI_LOG_FILE))?;
        builder.with_ansi(false).with_writer(Mutex::new(file)).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let dotenv = dotenvy::dotenv();
    init_logging(!(args.snapshot || args.diagnose))?;

    if let Err(e) = dotenv {
        if !e.not_found() {
            error!("Failed to read .env: {}", e);
        }
    }

    let config = AppConfig::from_env().with_api_url(args.api_url.as_deref());
    let api: Arc<dyn MarketApi> = Arc::new(HttpMarketApi::new(&config)?);
    let symbol = args
        .symbol
        .clone()
        .unwrap_or_else(|| config.default_symbol.clone());

    if args.snapshot {
        return run_snapshot(api, &config, &symbol).await;
    }

    if args.diagnose {
        return run_diagnose(api, &config, &symbol).await;
    }

    let mut config = config;
    config.default_symbol = symbol;
    let mut terminal = tui::init()?;
    let mut app = App::new(api, &config, args.chart_kind);
    let res = app.run(&mut terminal).await;

    tui::restore()?;

    if let Err(e) = &res {
        error!("Error: {:?}", e);
    }
    res.map_err(Into::into)
}

async fn run_snapshot(
    api: Arc<dyn MarketApi>,
    config: &AppConfig,
    symbol: &str,
) -> anyhow::Result<()> {
    let controller = DashboardController::new(api, config.market_tz);
    controller.load_symbol(symbol).await?;
    let view = controller.view();
    println!("{}", snapshot_text(&view));
    if let Some(err) = &view.error {
        error!("Snapshot incomplete: {}", err);
    }
    Ok(())
}

fn snapshot_text(view: &ViewState) -> String {
    let mut out = Vec::new();
    let symbol = view.symbol.as_ref().map(|s| s.to_string()).unwrap_or_default();
    out.push(format!("== {} ==", symbol));

    match &view.quote {
        Some(q) => {
            let price = q.current_price.map_or("-".to_string(), |p| format!("{:.2}", p));
            let change = q
                .change()
                .map_or(String::new(), |(d, pct)| format!(" ({:+.2}, {:+.2}%)", d, pct));
            out.push(format!(
                "Quote: {} {}{}",
                q.name.as_deref().unwrap_or(""),
                price,
                change
            ));
        }
        None => out.push("Quote: unavailable".to_string()),
    }

    match &view.kline {
        Some(frame) => {
            let last = frame.len().checked_sub(1);
            let close = last.and_then(|idx| frame.value("close", idx));
            out.push(format!(
                "Kline: {} bars ({} dropped), last close {}",
                frame.len(),
                frame.dropped,
                close.map_or("-".to_string(), |c| format!("{:.2}", c))
            ));
            for name in dashboard::EMA_OVERLAYS {
                if let Some(v) = last.and_then(|idx| frame.value(name, idx)) {
                    out.push(format!("  {}: {:.2}", name, v));
                }
            }
        }
        None => out.push("Kline: unavailable".to_string()),
    }

    out.push(format!("Option chain: {} strikes", view.option_chain.len()));
    out.push(format!("News: {} items", view.news.len()));
    for item in view.news.iter().take(5) {
        out.push(format!("  - {}", item.title.as_deref().unwrap_or("(untitled)")));
    }
    if let Some(err) = &view.error {
        out.push(format!("Error: {}", err));
    }
    out.join("\n")
}

async fn run_diagnose(
    api: Arc<dyn MarketApi>,
    config: &AppConfig,
    symbol: &str,
) -> anyhow::Result<()> {
    let session = DiagnosisSession::new(api, config.market_tz);
    session.run_diagnosis(symbol).await?;
    let state = session.state();

    if let Some(err) = state.error {
        anyhow::bail!("diagnosis failed: {}", err);
    }
    if let Some(payload) = state.result {
        info!(
            "Diagnosis charts: {} technical points, {} capital flow points",
            payload.technical_chart.len(),
            payload.capital_flow_chart.len()
        );
        println!("{}", report::to_plain_text(&report::full_report(&payload)));
    }
    Ok(())
}
