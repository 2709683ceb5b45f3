//! Intent classification: model JSON first, keyword scoring as fallback.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::json::parse_model_json;
use super::types::{AnalysisSource, Intent, IntentAnalysis, Urgency};
use crate::llm::{FallbackInvoker, GenerateRequest};

pub const INTENT_SYSTEM_PROMPT: &str =
    "You are an expert email parser. Extract intent and key information accurately.";

const INTENT_MAX_TOKENS: u32 = 300;
const INTENT_TEMPERATURE: f32 = 0.1;

/// Keyword fallback confidence when at least one keyword matched.
const KEYWORD_CONFIDENCE: f32 = 0.6;
/// Keyword fallback confidence when nothing matched.
const DEFAULT_CONFIDENCE: f32 = 0.3;

fn keywords(intent: Intent) -> &'static [&'static str] {
    match intent {
        Intent::Sales => &[
            "demo", "pricing", "buy", "purchase", "cost", "price", "interested", "product", "quote",
        ],
        Intent::Support => &[
            "help", "issue", "problem", "bug", "error", "not working", "support", "assistance",
        ],
        Intent::Partnership => &[
            "partnership", "collaborate", "partner", "business", "deal", "collaboration",
        ],
        Intent::General => &["hello", "hi", "information", "question", "inquiry", "contact"],
    }
}

/// Per-intent keyword matchers; a keyword must start a word.
static KEYWORD_PATTERNS: LazyLock<Vec<(Intent, Vec<Regex>)>> = LazyLock::new(|| {
    Intent::ALL
        .iter()
        .map(|&intent| {
            let patterns = keywords(intent)
                .iter()
                .map(|k| Regex::new(&format!(r"(?i)\b{}", regex::escape(k))).unwrap())
                .collect();
            (intent, patterns)
        })
        .collect()
});

/// Shape the model is asked to return.
#[derive(Debug, Deserialize)]
struct IntentResponse {
    #[serde(default)]
    intent: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    key_requests: Vec<String>,
    #[serde(default)]
    urgency: String,
}

/// Classifies emails into sales / support / partnership / general.
pub struct IntentClassifier {
    invoker: Arc<FallbackInvoker>,
}

impl IntentClassifier {
    pub fn new(invoker: Arc<FallbackInvoker>) -> Self {
        Self { invoker }
    }

    /// Ask the model; on call or parse failure, score keywords.
    pub async fn classify(&self, subject: &str, body: &str, preferred: Option<String>) -> IntentAnalysis {
        let request = GenerateRequest::new(build_intent_prompt(subject, body))
            .with_system(INTENT_SYSTEM_PROMPT)
            .with_max_tokens(INTENT_MAX_TOKENS)
            .with_temperature(INTENT_TEMPERATURE)
            .prefer(preferred);

        let Some(raw) = self.invoker.generate(request).await.into_text() else {
            debug!("Intent model call failed, scoring keywords");
            return classify_by_keywords(subject, body);
        };

        match parse_intent_response(&raw) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(error = %e, "Unparsable intent response, scoring keywords");
                classify_by_keywords(subject, body)
            }
        }
    }
}

fn build_intent_prompt(subject: &str, body: &str) -> String {
    format!(
        "Analyze this email and determine the primary intent.\n\n\
         Subject: {subject}\n\
         Content: {body}\n\n\
         Classify the intent as one of: sales, support, partnership, general.\n\
         Rate urgency as low, medium or high and list the sender's concrete requests.\n\n\
         Return ONLY a JSON object:\n\
         {{\"intent\": \"sales|support|partnership|general\", \"confidence\": 0.0-1.0, \
         \"key_requests\": [\"...\"], \"urgency\": \"low|medium|high\"}}"
    )
}

fn parse_intent_response(raw: &str) -> Result<IntentAnalysis, String> {
    let parsed: IntentResponse = parse_model_json(raw)?;
    if parsed.intent.trim().is_empty() {
        return Err("missing intent".to_string());
    }
    Ok(IntentAnalysis {
        intent: Intent::from_label(&parsed.intent),
        confidence: parsed.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        key_requests: parsed.key_requests,
        urgency: Urgency::from_label(&parsed.urgency),
        source: AnalysisSource::Model,
    })
}

/// Pick the category with the most keyword hits; `general` when none hit.
pub fn classify_by_keywords(subject: &str, body: &str) -> IntentAnalysis {
    let text = format!("{subject} {body}");

    let mut best = (Intent::General, 0usize);
    for (intent, patterns) in KEYWORD_PATTERNS.iter() {
        let hits = patterns.iter().filter(|p| p.is_match(&text)).count();
        if hits > best.1 {
            best = (*intent, hits);
        }
    }

    let matched = best.1 > 0;
    IntentAnalysis {
        intent: best.0,
        confidence: if matched { KEYWORD_CONFIDENCE } else { DEFAULT_CONFIDENCE },
        key_requests: Vec::new(),
        urgency: if matched { Urgency::Medium } else { Urgency::Low },
        source: AnalysisSource::Keywords,
    }
}
