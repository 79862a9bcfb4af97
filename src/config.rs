use chrono_tz::Tz;
use ratatui::style::Color;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_API_URL: &str = "http://localhost:5001";
pub const DEFAULT_SYMBOL: &str = "00700.HK";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Diagnosis runs an LLM on the server and routinely takes minutes.
pub const DEFAULT_DIAGNOSE_TIMEOUT_SECS: u64 = 600;
/// Log file used while the terminal UI owns stdout.
pub const TUI_LOG_FILE: &str = "stockdash.log";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub diagnose_timeout: Duration,
    pub market_tz: Tz,
    pub default_symbol: String,
}

impl AppConfig {
    /// Reads `STOCKDASH_*` variables (after `.env` has been loaded).
    pub fn from_env() -> Self {
        let api_base_url = std::env::var("STOCKDASH_API_URL")
            .ok()
            .map(|v| normalize_base_url(&v))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let request_secs = timeout_secs(
            std::env::var("STOCKDASH_HTTP_TIMEOUT_SECS").ok().as_deref(),
            DEFAULT_TIMEOUT_SECS,
            300,
        );
        let diagnose_secs = timeout_secs(
            std::env::var("STOCKDASH_DIAGNOSE_TIMEOUT_SECS").ok().as_deref(),
            DEFAULT_DIAGNOSE_TIMEOUT_SECS,
            3600,
        );

        let market_tz = match std::env::var("STOCKDASH_MARKET_TZ") {
            Ok(name) if !name.trim().is_empty() => match name.trim().parse::<Tz>() {
                Ok(tz) => tz,
                Err(_) => {
                    warn!(
                        "Unknown STOCKDASH_MARKET_TZ={} ; interpreting naive timestamps as UTC",
                        name
                    );
                    Tz::UTC
                }
            },
            _ => Tz::UTC,
        };

        let default_symbol = std::env::var("STOCKDASH_DEFAULT_SYMBOL")
            .ok()
            .map(|v| v.trim().to_ascii_uppercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_SYMBOL.to_string());

        let config = Self {
            api_base_url,
            request_timeout: Duration::from_secs(request_secs),
            diagnose_timeout: Duration::from_secs(diagnose_secs),
            market_tz,
            default_symbol,
        };
        info!(
            "API base URL: {}, timeout: {}s (diagnose {}s), market tz: {}",
            config.api_base_url, request_secs, diagnose_secs, config.market_tz
        );
        config
    }

    pub fn with_api_url(mut self, url: Option<&str>) -> Self {
        if let Some(url) = url.map(normalize_base_url).filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            diagnose_timeout: Duration::from_secs(DEFAULT_DIAGNOSE_TIMEOUT_SECS),
            market_tz: Tz::UTC,
            default_symbol: DEFAULT_SYMBOL.to_string(),
        }
    }
}

fn timeout_secs(raw: Option<&str>, default: u64, max: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .map(|v| v.clamp(1, max))
        .unwrap_or(default)
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

/// Styling tokens shared by every panel. Built once, passed by reference.
#[derive(Clone, Debug)]
pub struct Theme {
    pub text: Color,
    pub text_secondary: Color,
    pub border: Color,
    pub accent: Color,
    pub up: Color,
    pub down: Color,
    pub warning: Color,
    pub ema5: Color,
    pub ema10: Color,
    pub ema20: Color,
    pub ema60: Color,
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            text: Color::White,
            text_secondary: Color::Gray,
            border: Color::DarkGray,
            accent: Color::Cyan,
            up: Color::Rgb(0x00, 0xb5, 0x78),
            down: Color::Rgb(0xff, 0x4d, 0x4f),
            warning: Color::Rgb(0xcf, 0x13, 0x22),
            ema5: Color::Rgb(0xff, 0xd7, 0x00),
            ema10: Color::Rgb(0xff, 0xa5, 0x00),
            ema20: Color::Rgb(0x87, 0xce, 0xeb),
            ema60: Color::Rgb(0xff, 0x69, 0xb4),
        }
    }

    pub fn overlay_color(&self, name: &str) -> Color {
        match name {
            "EMA5" => self.ema5,
            "EMA10" => self.ema10,
            "EMA20" => self.ema20,
            "EMA60" => self.ema60,
            _ => self.text_secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_api_url_trims_trailing_slash() {
        let config = AppConfig::default().with_api_url(Some("http://example.test:8000/ "));
        assert_eq!(config.api_base_url, "http://example.test:8000");
    }

    #[test]
    fn test_with_api_url_ignores_blank_override() {
        let config = AppConfig::default().with_api_url(Some("   "));
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        let config = AppConfig::default().with_api_url(None);
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_timeouts_clamp_and_default() {
        assert_eq!(timeout_secs(Some(" 45 "), DEFAULT_TIMEOUT_SECS, 300), 45);
        assert_eq!(timeout_secs(Some("0"), DEFAULT_TIMEOUT_SECS, 300), 1);
        assert_eq!(timeout_secs(Some("9000"), DEFAULT_DIAGNOSE_TIMEOUT_SECS, 3600), 3600);
        assert_eq!(timeout_secs(Some("soon"), DEFAULT_TIMEOUT_SECS, 300), DEFAULT_TIMEOUT_SECS);
        assert_eq!(timeout_secs(None, DEFAULT_DIAGNOSE_TIMEOUT_SECS, 3600), 600);

        let config = AppConfig::default();
        assert!(config.diagnose_timeout > config.request_timeout);
    }

    #[test]
    fn test_overlay_colors_fall_back_to_secondary() {
        let theme = Theme::dark();
        assert_eq!(theme.overlay_color("EMA20"), theme.ema20);
        assert_eq!(theme.overlay_color("in_flow"), theme.text_secondary);
    }
}
