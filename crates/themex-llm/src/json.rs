//! Lenient JSON extraction from model output.

use serde::de::DeserializeOwned;

use crate::errors::AssistantError;

/// Parse the first JSON object or array embedded in `text`.
///
/// Models wrap JSON in prose or Markdown fences; this strips fences and
/// scans from the first `{`/`[` to the matching last `}`/`]`.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, AssistantError> {
    let trimmed = strip_fences(text.trim());
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }

    let candidate = json_span(trimmed)
        .ok_or_else(|| AssistantError::InvalidResponse("no JSON found in completion".into()))?;
    serde_json::from_str(candidate)
        .map_err(|e| AssistantError::InvalidResponse(format!("malformed JSON: {e}")))
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (`json`) on the opening fence line.
    let body = rest.split_once('\n').map_or(rest, |(_, b)| b);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn json_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Labels {
        labels: Vec<String>,
    }

    #[test]
    fn plain_object() {
        let l: Labels = extract_json(r#"{"labels": ["a", "b"]}"#).unwrap();
        assert_eq!(l.labels, vec!["a", "b"]);
    }

    #[test]
    fn fenced_object() {
        let text = "```json\n{\"labels\": [\"x\"]}\n```";
        let l: Labels = extract_json(text).unwrap();
        assert_eq!(l.labels, vec!["x"]);
    }

    #[test]
    fn object_in_prose() {
        let text = "Sure! Here you go: {\"labels\": [\"y\"]} Hope that helps.";
        let l: Labels = extract_json(text).unwrap();
        assert_eq!(l.labels, vec!["y"]);
    }

    #[test]
    fn bare_array() {
        let v: Vec<u32> = extract_json("result: [1, 2, 3]").unwrap();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    fn no_json_is_error() {
        assert_matches!(
            extract_json::<Labels>("nothing here"),
            Err(AssistantError::InvalidResponse(_))
        );
    }
}
