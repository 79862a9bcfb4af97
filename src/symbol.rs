use crate::error::DashError;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)\.(HK|SH|SZ|BJ|US)$").expect("regex symbol")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Market {
    Hk,
    Sh,
    Sz,
    Bj,
    Us,
}

impl Market {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hk => "HK",
            Self::Sh => "SH",
            Self::Sz => "SZ",
            Self::Bj => "BJ",
            Self::Us => "US",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "HK" => Some(Self::Hk),
            "SH" => Some(Self::Sh),
            "SZ" => Some(Self::Sz),
            "BJ" => Some(Self::Bj),
            "US" => Some(Self::Us),
            _ => None,
        }
    }
}

/// A validated `DIGITS.MARKET` stock code.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Symbol {
    code: String,
    market: Market,
}

impl Symbol {
    pub fn parse(input: &str) -> Result<Self, DashError> {
        let normalized = input.trim().to_ascii_uppercase();
        let invalid = || DashError::Validation {
            input: input.trim().to_string(),
        };

        let caps = SYMBOL_RE.captures(&normalized).ok_or_else(invalid)?;
        let market = Market::from_code(&caps[2]).ok_or_else(invalid)?;

        Ok(Self {
            code: caps[1].to_string(),
            market,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn market(&self) -> Market {
        self.market
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.code, self.market.as_str())
    }
}

/// Filters raw keystrokes down to characters that can appear in a symbol.
pub fn sanitize_input(raw: &str) -> String {
    raw.to_ascii_uppercase()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || "HKSZBJU".contains(*c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_every_market() {
        for input in ["00700.HK", "600300.SH", "000001.SZ", "430047.BJ", "1.US"] {
            let symbol = Symbol::parse(input).unwrap();
            assert_eq!(symbol.to_string(), input);
        }
    }

    #[test]
    fn test_normalizes_case_and_whitespace() {
        let symbol = Symbol::parse("  700.hk ").unwrap();
        assert_eq!(symbol.code(), "700");
        assert_eq!(symbol.market(), Market::Hk);
        assert_eq!(symbol.to_string(), "700.HK");
    }

    #[test]
    fn test_rejects_malformed_symbols() {
        for input in ["700HK", "700.XX", ".HK", "70a.HK", "700.HK.HK", "", "AAPL.US", "٠٧.HK"] {
            let err = Symbol::parse(input).unwrap_err();
            assert!(err.is_validation(), "{} should fail validation", input);
        }
    }

    #[test]
    fn test_sanitize_input_drops_foreign_characters() {
        assert_eq!(sanitize_input("00700.hk"), "00700.HK");
        assert_eq!(sanitize_input("6003a00-.sh!"), "600300.SH");
        assert_eq!(sanitize_input("xyz"), "Z");
    }
}
