//! Pull a JSON object out of model output.

/// Extract the JSON object from an LLM response that may be wrapped in
/// markdown fences or surrounded by prose.
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Try to find object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

/// Parse model output into `T`, tolerating fences and prose.
pub fn parse_model_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, String> {
    let json = extract_json_object(raw);
    serde_json::from_str(&json).map_err(|e| format!("{e}: {}", truncate(&json, 200)))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object() {
        assert_eq!(extract_json_object(r#" {"a":1} "#), r#"{"a":1}"#);
    }

    #[test]
    fn fenced_json_block() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks";
        assert_eq!(extract_json_object(text), "{\"a\": 1}");
    }

    #[test]
    fn bare_fence() {
        let text = "```\n{\"a\": 2}\n```";
        assert_eq!(extract_json_object(text), "{\"a\": 2}");
    }

    #[test]
    fn object_inside_prose() {
        let text = "Sure! {\"a\": 3} Hope that helps.";
        assert_eq!(extract_json_object(text), "{\"a\": 3}");
    }

    #[test]
    fn parse_failure_reports_snippet() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Shape {
            a: u32,
        }
        let err = parse_model_json::<Shape>("no json here").unwrap_err();
        assert!(err.contains("no json here"));
        let ok: Shape = parse_model_json("```json\n{\"a\": 5}\n```").unwrap();
        assert_eq!(ok.a, 5);
    }
}
