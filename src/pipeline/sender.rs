//! Sender-name extraction and plain-text email helpers.
//!
//! The model is asked first; when every provider fails, a set of header
//! patterns is tried instead. The pattern fallback never errors.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::llm::{FallbackInvoker, GenerateRequest};

pub const SENDER_SYSTEM_PROMPT: &str = "You are an expert email parser. Extract the sender's name from the email content. Return only the name, nothing else. If no clear name is found, return 'Unknown'.";

const SENDER_MAX_TOKENS: u32 = 50;
const SENDER_TEMPERATURE: f32 = 0.1;

/// Header shapes tried in order.
static SENDER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?im)From:\s*([^<\n]+)",
        r"(?im)Sender:\s*([^<\n]+)",
        r"(?im)^([^<\n]+)\s*<[^>]+>",
        r"(?im)^([^@\n]+)@",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static QUOTES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"["']"#).unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static EMAIL_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());
static QUOTE_MARKERS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*>+ ?").unwrap());
static REPLY_ATTRIBUTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)On .+ wrote:").unwrap());

/// Ask the model for the sender's name, falling back to header patterns.
///
/// A model answer of "Unknown" means no name was found.
pub async fn extract_sender_name(
    invoker: &FallbackInvoker,
    content: &str,
    preferred: Option<String>,
) -> Option<String> {
    let request = GenerateRequest::new(format!(
        "Extract the sender's name from this email:\n\n{content}"
    ))
    .with_system(SENDER_SYSTEM_PROMPT)
    .with_max_tokens(SENDER_MAX_TOKENS)
    .with_temperature(SENDER_TEMPERATURE)
    .prefer(preferred);

    match invoker.generate(request).await.into_text() {
        Some(answer) => {
            let name = answer.trim().trim_matches(|c| c == '"' || c == '\'').trim();
            if name.is_empty() || name.eq_ignore_ascii_case("unknown") {
                None
            } else {
                Some(name.to_string())
            }
        }
        None => {
            debug!("Model extraction failed, using header patterns");
            extract_sender_name_fallback(content)
        }
    }
}

/// Match common header shapes (`From:`, `Sender:`, `Name <addr>`, `name@`).
pub fn extract_sender_name_fallback(content: &str) -> Option<String> {
    SENDER_PATTERNS.iter().find_map(|pattern| {
        let raw = pattern.captures(content)?.get(1)?.as_str();
        let name = QUOTES.replace_all(raw.trim(), "");
        let name = WHITESPACE.replace_all(name.trim(), " ").into_owned();
        (name.chars().count() > 1).then_some(name)
    })
}

/// First email address in the text.
pub fn extract_email_address(content: &str) -> Option<String> {
    EMAIL_ADDRESS.find(content).map(|m| m.as_str().to_string())
}

/// Common headers found in pasted email text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmailHeaders {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

pub fn parse_email_headers(content: &str) -> EmailHeaders {
    let header = |name: &str| {
        let pattern = Regex::new(&format!(r"(?im)^\s*{name}:\s*([^\n]+)")).ok()?;
        pattern
            .captures(content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    };
    EmailHeaders {
        from: header("From"),
        to: header("To"),
        subject: header("Subject"),
        date: header("Date"),
        reply_to: header("Reply-To"),
    }
}

/// Strip quote markers and reply attributions, then collapse whitespace.
pub fn clean_email_content(content: &str) -> String {
    let without_quotes = QUOTE_MARKERS.replace_all(content, "");
    let without_attribution = REPLY_ATTRIBUTION.replace_all(&without_quotes, "");
    WHITESPACE
        .replace_all(&without_attribution, " ")
        .trim()
        .to_string()
}

/// Body after the first header/body separator, or the whole text.
pub fn extract_message_body(content: &str) -> String {
    ["\n\n", "---", "___"]
        .iter()
        .find_map(|sep| content.split_once(sep).map(|(_, body)| body.trim().to_string()))
        .unwrap_or_else(|| content.trim().to_string())
}
