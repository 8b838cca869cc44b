//! Turns free-text completions into structured product fields.
//!
//! The prose parsers are heuristics over blank-line separated blocks. In
//! [`ParseMode::Lenient`] they degrade to empty fields; [`ParseMode::Strict`]
//! reports the same situations as [`ParseError`]s. The structured path parses a
//! JSON payload and validates it instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("review body is empty")]
    EmptyReview,
    #[error("expected 3 SEO blocks separated by blank lines, found {0}")]
    SeoSegments(usize),
    #[error("no pros found in pros/cons block")]
    NoPros,
    #[error("no JSON object found in response")]
    NoJson,
    #[error("invalid JSON payload: {0}")]
    Json(String),
    #[error("invalid field {field}: {reason}")]
    Field { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewText {
    pub description: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeoMeta {
    pub meta_title: String,
    pub meta_description: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProsCons {
    pub pros: Vec<String>,
    pub cons: Vec<String>,
}

/// Blocks of text separated by one or more whitespace-only lines.
pub fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !cur.is_empty() {
                out.push(cur.join("\n").trim().to_string());
                cur.clear();
            }
        } else {
            cur.push(line.trim_end());
        }
    }
    if !cur.is_empty() {
        out.push(cur.join("\n").trim().to_string());
    }
    out
}

pub fn parse_review(text: &str, mode: ParseMode) -> Result<ReviewText, ParseError> {
    let content = text.trim().replace("\r\n", "\n");
    if content.is_empty() && mode == ParseMode::Strict {
        return Err(ParseError::EmptyReview);
    }
    let description = paragraphs(&content).into_iter().next().unwrap_or_default();
    Ok(ReviewText { description, content })
}

pub fn parse_seo(text: &str, mode: ParseMode) -> Result<SeoMeta, ParseError> {
    let blocks = paragraphs(text);
    if blocks.len() != 3 {
        if mode == ParseMode::Strict {
            return Err(ParseError::SeoSegments(blocks.len()));
        }
        tracing::warn!(found = blocks.len(), "SEO block does not have 3 segments; fields may be misplaced");
    }
    let block = |i: usize| blocks.get(i).map(String::as_str).unwrap_or("");

    let keywords = strip_label(block(2), &["focus keywords", "keywords"])
        .split([',', '\n'])
        .map(|k| strip_bullet(k).trim_matches(|c: char| c == '*' || c.is_whitespace()).to_string())
        .filter(|k| !k.is_empty())
        .collect();

    Ok(SeoMeta {
        meta_title: strip_label(block(0), &["meta title", "title"]),
        meta_description: strip_label(block(1), &["meta description", "description"]),
        keywords,
    })
}

/// Splits on the literal `Cons:` marker. Without the marker everything is a pro.
pub fn parse_pros_cons(text: &str, mode: ParseMode) -> Result<ProsCons, ParseError> {
    let (pros_text, cons_text) = match text.split_once("Cons:") {
        Some((p, c)) => (p, c),
        None => {
            tracing::warn!("pros/cons block has no \"Cons:\" marker; treating all lines as pros");
            (text, "")
        }
    };
    let pros = bullet_lines(&pros_text.replacen("Pros:", "", 1));
    let cons = bullet_lines(cons_text);
    if pros.is_empty() && mode == ParseMode::Strict {
        return Err(ParseError::NoPros);
    }
    Ok(ProsCons { pros, cons })
}

fn bullet_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| strip_bullet(l.trim()).trim_matches(|c: char| c == '*' || c.is_whitespace()).to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

fn strip_bullet(s: &str) -> &str {
    let s = s.trim_start();
    for b in ["- ", "* ", "• ", "-", "•"] {
        if let Some(rest) = s.strip_prefix(b) {
            return rest.trim_start();
        }
    }
    strip_numbering(s)
}

/// `1. foo` / `2) foo` -> `foo`
fn strip_numbering(s: &str) -> &str {
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &s[digits..];
        if let Some(r) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return r.trim_start();
        }
    }
    s
}

fn strip_label(block: &str, labels: &[&str]) -> String {
    let s = strip_numbering(block.trim()).trim_start_matches('*').trim_start();
    for label in labels {
        if s.get(..label.len()).is_some_and(|head| head.eq_ignore_ascii_case(label)) {
            let rest = &s[label.len()..];
            let rest = rest.trim_start_matches('*').trim_start();
            if let Some(after) = rest.strip_prefix(':') {
                return after.trim_start_matches('*').trim().to_string();
            }
        }
    }
    s.trim().to_string()
}

/// Shape of the single-call JSON payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub specifications: BTreeMap<String, serde_json::Value>,
    pub price: f64,
    pub rating: f64,
}

impl GeneratedProduct {
    /// Specification values as display strings; the model sometimes emits numbers.
    pub fn spec_strings(&self) -> BTreeMap<String, String> {
        self.specifications
            .iter()
            .map(|(k, v)| {
                let s = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), s)
            })
            .collect()
    }
}

pub fn parse_structured(raw: &str) -> Result<GeneratedProduct, ParseError> {
    let text = strip_fences(raw);
    let parsed = match serde_json::from_str::<GeneratedProduct>(&text) {
        Ok(p) => p,
        Err(_) => {
            let fragment = extract_first_json_object(&text).ok_or(ParseError::NoJson)?;
            serde_json::from_str(fragment).map_err(|e| ParseError::Json(e.to_string()))?
        }
    };

    if parsed.name.trim().is_empty() {
        return Err(ParseError::Field { field: "name", reason: "empty".into() });
    }
    if !parsed.price.is_finite() || parsed.price < 0.0 {
        return Err(ParseError::Field { field: "price", reason: format!("{} is negative", parsed.price) });
    }
    if !(0.0..=5.0).contains(&parsed.rating) {
        return Err(ParseError::Field { field: "rating", reason: format!("{} is outside 0..=5", parsed.rating) });
    }
    Ok(parsed)
}

fn strip_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !(trimmed.starts_with("```") && trimmed.ends_with("```")) {
        return trimmed.to_string();
    }
    let mut out = String::new();
    for line in trimmed.lines().skip(1) {
        if line.trim() == "```" {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

fn extract_first_json_object(raw: &str) -> Option<&str> {
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| &raw[s..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_description_is_first_paragraph() {
        let text = "The Pixel 9 is excellent.\nReally.\n\n  \nCamera section.\n\nVerdict.";
        let r = parse_review(text, ParseMode::Strict).unwrap();
        assert_eq!(r.description, "The Pixel 9 is excellent.\nReally.");
        assert_eq!(r.content, text);
    }

    #[test]
    fn empty_review_only_fails_in_strict_mode() {
        assert_eq!(parse_review("  \n", ParseMode::Strict), Err(ParseError::EmptyReview));
        assert_eq!(parse_review("", ParseMode::Lenient).unwrap().description, "");
    }

    #[test]
    fn seo_labels_are_stripped() {
        let text = "1. **Meta title:** Pixel 9 Review: Google's Best\r\n\r\n2. Meta description: Everything about it.\n\n3. Focus keywords: pixel 9, google phone,\n- android camera";
        let seo = parse_seo(text, ParseMode::Strict).unwrap();
        assert_eq!(seo.meta_title, "Pixel 9 Review: Google's Best");
        assert_eq!(seo.meta_description, "Everything about it.");
        assert_eq!(seo.keywords, vec!["pixel 9", "google phone", "android camera"]);
    }

    #[test]
    fn seo_segment_mismatch() {
        let text = "Meta title: Only a title\nMeta description: glued on";
        assert_eq!(parse_seo(text, ParseMode::Strict), Err(ParseError::SeoSegments(1)));

        let lenient = parse_seo(text, ParseMode::Lenient).unwrap();
        assert_eq!(lenient.meta_title, "Only a title\nMeta description: glued on");
        assert_eq!(lenient.meta_description, "");
        assert!(lenient.keywords.is_empty());
    }

    #[test]
    fn pros_cons_split_on_marker() {
        let text = "Pros:\n- Fast charging\n- Bright display\n\nCons:\n- No headphone jack\n*  Heavy";
        let pc = parse_pros_cons(text, ParseMode::Strict).unwrap();
        assert_eq!(pc.pros, vec!["Fast charging", "Bright display"]);
        assert_eq!(pc.cons, vec!["No headphone jack", "Heavy"]);
    }

    #[test]
    fn missing_cons_marker_makes_everything_pros() {
        let text = "Pros:\n- Fast\n- Quiet\nDrawbacks: loud fan";
        for mode in [ParseMode::Lenient, ParseMode::Strict] {
            let pc = parse_pros_cons(text, mode).unwrap();
            assert_eq!(pc.pros, vec!["Fast", "Quiet", "Drawbacks: loud fan"]);
            assert!(pc.cons.is_empty());
        }
    }

    #[test]
    fn no_pros_is_strict_error() {
        assert_eq!(parse_pros_cons("Cons:\n- Slow", ParseMode::Strict), Err(ParseError::NoPros));
        assert_eq!(parse_pros_cons("Cons:\n- Slow", ParseMode::Lenient).unwrap().cons, vec!["Slow"]);
    }

    #[test]
    fn structured_payload_inside_prose_and_fences() {
        let raw = "Sure! Here it is:\n{\"name\":\"Xbox Series X\",\"description\":\"4K {console}\",\"features\":[],\"pros\":[\"Fast\"],\"cons\":[],\"specifications\":{\"Storage\":\"1TB\",\"FPS\":120},\"price\":499.99,\"rating\":4.6}\nEnjoy.";
        let p = parse_structured(raw).unwrap();
        assert_eq!(p.name, "Xbox Series X");
        assert_eq!(p.description, "4K {console}");
        assert_eq!(p.spec_strings()["FPS"], "120");

        let fenced = "```json\n{\"name\":\"Echo Dot\",\"price\":49.0,\"rating\":4.1}\n```";
        assert_eq!(parse_structured(fenced).unwrap().name, "Echo Dot");
    }

    #[test]
    fn structured_payload_is_validated() {
        assert_eq!(parse_structured("no json here"), Err(ParseError::NoJson));
        let bad = r#"{"name":"Thing","price":10,"rating":7}"#;
        assert!(matches!(parse_structured(bad), Err(ParseError::Field { field: "rating", .. })));
        let bad = r#"{"name":" ","price":10,"rating":3}"#;
        assert!(matches!(parse_structured(bad), Err(ParseError::Field { field: "name", .. })));
    }
}
