use crate::diagnosis::{DiagnosisPayload, Field, Score};
use serde_json::{Map, Value};

/// Display-agnostic report element. The TUI styles these; the headless
/// printer flattens them to plain text.
#[derive(Clone, Debug, PartialEq)]
pub enum Block {
    Heading { level: u8, text: String },
    Text(String),
    /// Text drawn in the warning colour.
    Highlight(String),
    Bullets(Vec<String>),
    Numbered(Vec<String>),
    /// Preformatted, usually pretty-printed JSON.
    Pre(String),
    /// Placeholder for missing data.
    Note(String),
}

fn heading(level: u8, text: &str) -> Block {
    Block::Heading {
        level,
        text: text.to_string(),
    }
}

/// Strings pass through, objects and arrays are pretty-printed.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn raw(field: &Field) -> Block {
    Block::Pre(display_value(&field.to_value()))
}

fn scalar(field: &Field) -> Option<Block> {
    match field {
        Field::Text(s) => Some(Block::Text(s.clone())),
        Field::Number(n) => Some(Block::Text(n.to_string())),
        _ => None,
    }
}

enum Layout {
    /// String as text, non-empty object as `key: value` bullets.
    KeyValues,
    /// Anything, as display text.
    Free,
}

/// Renders the known sub-keys of a structured section, each under its own
/// heading. An object carrying none of them falls back to the raw dump.
fn keyed_sections(map: &Map<String, Value>, sections: &[(&str, &str, Layout)]) -> Vec<Block> {
    let present: Vec<_> = sections
        .iter()
        .filter_map(|(key, title, layout)| {
            map.get(*key)
                .filter(|v| truthy(v))
                .map(|v| (*title, layout, v))
        })
        .collect();
    if present.is_empty() {
        return vec![Block::Pre(display_value(&Value::Object(map.clone())))];
    }

    let mut blocks = Vec::new();
    for (title, layout, value) in present {
        blocks.push(heading(2, title));
        blocks.push(match (layout, value) {
            (_, Value::String(s)) => Block::Text(s.clone()),
            (Layout::KeyValues, Value::Object(entries)) if !entries.is_empty() => Block::Bullets(
                entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, display_value(v)))
                    .collect(),
            ),
            (Layout::KeyValues, Value::Array(items)) if !items.is_empty() => {
                Block::Bullets(items.iter().map(display_value).collect())
            }
            (Layout::KeyValues, Value::Object(_) | Value::Array(_)) => Block::Note("No data.".into()),
            (_, value @ (Value::Object(_) | Value::Array(_))) => Block::Pre(display_value(value)),
            (_, value) => Block::Text(display_value(value)),
        });
    }
    blocks
}

pub fn technical_analysis(field: &Field) -> Vec<Block> {
    match field {
        Field::Absent => vec![Block::Note("No technical analysis data.".into())],
        Field::Structured(map) => keyed_sections(
            map,
            &[
                ("ema_crosses", "EMA crosses", Layout::KeyValues),
                ("ema_trends", "EMA trends", Layout::KeyValues),
                ("price_ema_relation", "Price vs EMA", Layout::KeyValues),
                ("trend_judgment", "Trend judgment", Layout::Free),
            ],
        ),
        other => vec![scalar(other).unwrap_or_else(|| raw(other))],
    }
}

pub fn capital_flow_analysis(field: &Field) -> Vec<Block> {
    match field {
        Field::Absent => vec![Block::Note("No capital flow data.".into())],
        Field::Structured(map) => keyed_sections(
            map,
            &[
                ("30d_trend", "30-day flow trend", Layout::KeyValues),
                ("main_capital", "Main capital", Layout::KeyValues),
                ("strength_assessment", "Strength assessment", Layout::Free),
            ],
        ),
        other => vec![scalar(other).unwrap_or_else(|| raw(other))],
    }
}

const DISTRIBUTION_SECTIONS: [(&str, &str); 3] = [
    ("main_capital_distribution", "Main capital distribution"),
    ("retail_capital_distribution", "Retail capital distribution"),
    ("capital_structure", "Capital structure"),
];

pub fn capital_distribution_analysis(field: &Field) -> Vec<Block> {
    let map = match field {
        Field::Absent => return vec![Block::Note("No capital distribution data.".into())],
        Field::Structured(map) => map,
        other => return vec![scalar(other).unwrap_or_else(|| raw(other))],
    };
    if !DISTRIBUTION_SECTIONS.iter().all(|(key, _)| map.contains_key(*key)) {
        return vec![raw(field)];
    }

    let mut blocks = Vec::new();
    for (key, title) in DISTRIBUTION_SECTIONS {
        let Some(value) = map.get(key).filter(|v| truthy(v)) else {
            continue;
        };
        blocks.push(heading(2, title));
        blocks.push(match value {
            Value::String(s) => Block::Text(s.clone()),
            other => Block::Pre(display_value(other)),
        });
    }
    blocks
}

pub fn investment_advice(field: &Field) -> Vec<Block> {
    match field {
        Field::Absent => vec![Block::Note("No investment advice.".into())],
        other => vec![scalar(other).unwrap_or_else(|| raw(other))],
    }
}

pub fn risk_warning(field: &Field) -> Vec<Block> {
    match field {
        Field::Absent => vec![Block::Note("No risk warnings.".into())],
        Field::List(items) if items.is_empty() => vec![Block::Note("No risk warnings.".into())],
        Field::Text(s) => vec![Block::Highlight(s.clone())],
        Field::List(items) => vec![Block::Numbered(items.iter().map(display_value).collect())],
        other => vec![raw(other)],
    }
}

fn score_line(label: &str, score: &Score) -> Option<String> {
    if score.is_empty() {
        return None;
    }
    let mut line = format!("{}: {}", label, score.score.as_deref().unwrap_or("N/A"));
    if let Some(rating) = &score.rating {
        line.push_str(&format!(" ({})", rating));
    }
    if let Some(desc) = &score.rating_desc {
        line.push_str(&format!(" {}", desc));
    }
    Some(line)
}

pub fn scores(payload: &DiagnosisPayload) -> Vec<Block> {
    let lines: Vec<String> = [
        ("Overall", &payload.overall_score),
        ("Technical", &payload.technical_score),
        ("Capital", &payload.capital_score),
    ]
    .into_iter()
    .filter_map(|(label, score)| score_line(label, score))
    .collect();

    if lines.is_empty() {
        return vec![Block::Note("No scores.".into())];
    }
    let mut blocks = vec![Block::Bullets(lines)];
    if let Some(evaluation) = &payload.overall_score.evaluation {
        blocks.push(Block::Text(evaluation.clone()));
    }
    blocks
}

/// Light markdown: headings, lists, fenced code and paragraphs.
/// Inline emphasis markers are dropped.
pub fn markdown(source: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut lines = source.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("```") {
            let mut code = Vec::new();
            for inner in lines.by_ref() {
                if inner.trim_start().starts_with("```") {
                    break;
                }
                code.push(inner);
            }
            blocks.push(Block::Pre(code.join("\n")));
            continue;
        }

        if trimmed.starts_with('#') {
            let level = trimmed.chars().take_while(|c| *c == '#').count().min(6) as u8;
            let text = strip_inline(trimmed.trim_start_matches('#').trim());
            blocks.push(Block::Heading { level, text });
            continue;
        }

        if let Some(item) = bullet_item(trimmed) {
            let mut items = vec![strip_inline(item)];
            while let Some(item) = lines.peek().and_then(|l| bullet_item(l.trim())) {
                items.push(strip_inline(item));
                lines.next();
            }
            blocks.push(Block::Bullets(items));
            continue;
        }

        if let Some(item) = numbered_item(trimmed) {
            let mut items = vec![strip_inline(item)];
            while let Some(item) = lines.peek().and_then(|l| numbered_item(l.trim())) {
                items.push(strip_inline(item));
                lines.next();
            }
            blocks.push(Block::Numbered(items));
            continue;
        }

        blocks.push(Block::Text(strip_inline(trimmed)));
    }
    blocks
}

fn bullet_item(line: &str) -> Option<&str> {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("+ "))
}

fn numbered_item(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    line[digits..]
        .strip_prefix(". ")
        .or_else(|| line[digits..].strip_prefix(") "))
}

fn strip_inline(text: &str) -> String {
    text.replace("**", "").replace("__", "").replace('`', "")
}

/// Every section of a diagnosis, in display order.
pub fn full_report(payload: &DiagnosisPayload) -> Vec<Block> {
    let mut blocks = vec![heading(1, "Scores")];
    blocks.extend(scores(payload));
    blocks.push(heading(1, "Technical analysis"));
    blocks.extend(technical_analysis(&payload.technical));
    blocks.push(heading(1, "Capital flow"));
    blocks.extend(capital_flow_analysis(&payload.capital_flow));
    blocks.push(heading(1, "Capital distribution"));
    blocks.extend(capital_distribution_analysis(&payload.capital_distribution));
    blocks.push(heading(1, "Investment advice"));
    blocks.extend(investment_advice(&payload.investment_advice));
    blocks.push(heading(1, "Risk warning"));
    blocks.extend(risk_warning(&payload.risk_warning));
    if let Some(source) = &payload.markdown {
        blocks.push(heading(1, "Diagnosis"));
        blocks.extend(markdown(source));
    }
    blocks
}

/// Flattens blocks for non-interactive output.
pub fn to_plain_text(blocks: &[Block]) -> String {
    let mut out = Vec::new();
    for block in blocks {
        match block {
            Block::Heading { level: 1, text } => {
                out.push(String::new());
                out.push(format!("== {} ==", text));
            }
            Block::Heading { text, .. } => out.push(format!("-- {}", text)),
            Block::Text(text) | Block::Pre(text) => out.push(text.clone()),
            Block::Highlight(text) => out.push(format!("! {}", text)),
            Block::Note(text) => out.push(format!("({})", text)),
            Block::Bullets(items) => out.extend(items.iter().map(|i| format!("  - {}", i))),
            Block::Numbered(items) => out.extend(
                items
                    .iter()
                    .enumerate()
                    .map(|(n, i)| format!("  {}. {}", n + 1, i)),
            ),
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(value: Value) -> Field {
        Field::from_value(Some(&value))
    }

    #[test]
    fn test_technical_object_lists_key_values() {
        let blocks = technical_analysis(&field(json!({"ema_trends": {"ma5": "up"}})));
        assert_eq!(
            blocks,
            vec![
                heading(2, "EMA trends"),
                Block::Bullets(vec!["ma5: up".into()]),
            ]
        );
    }

    #[test]
    fn test_technical_variants() {
        assert_eq!(technical_analysis(&field(json!("ok"))), vec![Block::Text("ok".into())]);
        assert_eq!(
            technical_analysis(&Field::Absent),
            vec![Block::Note("No technical analysis data.".into())]
        );

        let blocks = technical_analysis(&field(json!({
            "ema_crosses": {},
            "trend_judgment": {"short": "bullish"},
        })));
        assert_eq!(blocks[1], Block::Note("No data.".into()));
        assert_eq!(blocks[2], heading(2, "Trend judgment"));
        assert!(matches!(&blocks[3], Block::Pre(text) if text.contains("\"short\": \"bullish\"")));
    }

    #[test]
    fn test_unexpected_keys_fall_back_to_raw() {
        let unexpected = field(json!({"macd": "flat"}));
        for blocks in [
            technical_analysis(&unexpected),
            capital_flow_analysis(&unexpected),
            capital_distribution_analysis(&unexpected),
            investment_advice(&unexpected),
        ] {
            assert!(matches!(&blocks[..], [Block::Pre(text)] if text.contains("\"macd\"")));
        }
    }

    #[test]
    fn test_capital_distribution_requires_all_keys() {
        let partial = field(json!({
            "main_capital_distribution": "concentrated",
            "capital_structure": "balanced",
        }));
        assert!(matches!(&capital_distribution_analysis(&partial)[..], [Block::Pre(_)]));

        let complete = field(json!({
            "main_capital_distribution": "concentrated",
            "retail_capital_distribution": {"share": 0.3},
            "capital_structure": "",
        }));
        let blocks = capital_distribution_analysis(&complete);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[1], Block::Text("concentrated".into()));
        assert!(matches!(&blocks[3], Block::Pre(text) if text.contains("0.3")));
    }

    #[test]
    fn test_capital_flow_sections() {
        let blocks = capital_flow_analysis(&field(json!({
            "30d_trend": "net inflow",
            "main_capital": {"today": "+1.2B"},
            "strength_assessment": "strong",
        })));
        assert_eq!(blocks.len(), 6);
        assert_eq!(blocks[0], heading(2, "30-day flow trend"));
        assert_eq!(blocks[3], Block::Bullets(vec!["today: +1.2B".into()]));
        assert_eq!(blocks[5], Block::Text("strong".into()));
    }

    #[test]
    fn test_risk_warning_shapes() {
        assert_eq!(
            risk_warning(&field(json!([]))),
            vec![Block::Note("No risk warnings.".into())]
        );
        assert_eq!(
            risk_warning(&field(json!(["A", "B"]))),
            vec![Block::Numbered(vec!["A".into(), "B".into()])]
        );
        assert_eq!(
            risk_warning(&field(json!("single"))),
            vec![Block::Highlight("single".into())]
        );
        assert!(matches!(&risk_warning(&field(json!({"x": 1})))[..], [Block::Pre(_)]));
    }

    #[test]
    fn test_investment_advice_text_or_raw() {
        assert_eq!(
            investment_advice(&field(json!("accumulate"))),
            vec![Block::Text("accumulate".into())]
        );
        assert!(matches!(&investment_advice(&field(json!(["a"])))[..], [Block::Pre(_)]));
    }

    #[test]
    fn test_scores_block() {
        let payload = DiagnosisPayload {
            overall_score: Score {
                score: Some("78".into()),
                rating: Some("B".into()),
                rating_desc: Some("Good".into()),
                evaluation: Some("Steady uptrend".into()),
            },
            capital_score: Score {
                score: Some("60".into()),
                ..Score::default()
            },
            ..DiagnosisPayload::default()
        };
        assert_eq!(
            scores(&payload),
            vec![
                Block::Bullets(vec!["Overall: 78 (B) Good".into(), "Capital: 60".into()]),
                Block::Text("Steady uptrend".into()),
            ]
        );
        assert_eq!(
            scores(&DiagnosisPayload::default()),
            vec![Block::Note("No scores.".into())]
        );
    }

    #[test]
    fn test_markdown_blocks() {
        let source = "## Summary\n\n**Bullish** bias\n- one\n- two\n1. first\n2. second\n```\nraw\n```";
        assert_eq!(
            markdown(source),
            vec![
                heading(2, "Summary"),
                Block::Text("Bullish bias".into()),
                Block::Bullets(vec!["one".into(), "two".into()]),
                Block::Numbered(vec!["first".into(), "second".into()]),
                Block::Pre("raw".into()),
            ]
        );
    }

    #[test]
    fn test_plain_text_flattening() {
        let text = to_plain_text(&[
            heading(1, "Risk warning"),
            Block::Numbered(vec!["A".into(), "B".into()]),
        ]);
        assert_eq!(text, "\n== Risk warning ==\n  1. A\n  2. B");
    }
}
