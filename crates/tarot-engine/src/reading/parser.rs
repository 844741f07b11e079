//! Extracts and validates JSON from noisy LLM output. Fenced code blocks
//! win over bare braces; a parse failure that looks like the output budget
//! ran out is tagged as truncated so the engines can retry with a larger
//! `max_tokens`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::schemas::ReadingResponse;
use crate::error::EngineError;
use crate::llm::FinishReason;

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:json)?\s*(.*?)```").expect("fenced block regex is valid")
});

pub struct ResponseParser;

impl ResponseParser {
    /// Pull the JSON payload out of the raw response text. A fenced
    /// ` ```json ` or bare ` ``` ` block takes priority; otherwise the
    /// substring from the first `{` to the last `}` is used.
    pub fn extract_json(content: &str) -> Result<String, EngineError> {
        if content.trim().is_empty() {
            return Err(EngineError::JsonExtraction {
                message: "response content is empty".into(),
                truncated: true,
            });
        }

        if let Some(captures) = FENCED_BLOCK_RE.captures(content) {
            let inner = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if !inner.is_empty() {
                return Ok(inner.to_string());
            }
        }

        let start = content.find('{');
        let end = content.rfind('}');
        match (start, end) {
            (Some(start), Some(end)) if end > start => Ok(content[start..=end].to_string()),
            (Some(_), _) => Err(EngineError::JsonExtraction {
                // An opening brace without its closing partner is the
                // classic shape of a cut-off response.
                message: "unterminated JSON object in response".into(),
                truncated: true,
            }),
            _ => Err(EngineError::JsonExtraction {
                message: "no JSON object found in response".into(),
                truncated: false,
            }),
        }
    }

    /// Extract and deserialize any JSON section type. `finish_reason` from
    /// the producing call upgrades parse failures to truncated when the
    /// model ran out of output budget.
    pub fn parse_value<T: serde::de::DeserializeOwned>(
        content: &str,
        finish_reason: Option<FinishReason>,
    ) -> Result<T, EngineError> {
        let budget_exhausted = finish_reason.is_some_and(|r| r.is_truncated());

        let json = Self::extract_json(content).map_err(|e| match e {
            EngineError::JsonExtraction { message, truncated } => EngineError::JsonExtraction {
                message,
                truncated: truncated || budget_exhausted,
            },
            other => other,
        })?;

        serde_json::from_str(&json).map_err(|e| EngineError::JsonExtraction {
            message: format!("JSON parse failed: {e}"),
            truncated: budget_exhausted || e.is_eof(),
        })
    }

    /// Extract, deserialize, and schema-check a full reading.
    pub fn parse(
        content: &str,
        finish_reason: Option<FinishReason>,
    ) -> Result<ReadingResponse, EngineError> {
        let reading: ReadingResponse = Self::parse_value(content, finish_reason)?;
        Self::check_schema(&reading)?;
        Ok(reading)
    }

    fn check_schema(reading: &ReadingResponse) -> Result<(), EngineError> {
        if reading.cards.is_empty() {
            return Err(EngineError::Validation("cards list is empty".into()));
        }
        let mut seen = HashSet::new();
        for card in &reading.cards {
            if !seen.insert(card.position.as_str()) {
                return Err(EngineError::Validation(format!(
                    "duplicate card position: {}",
                    card.position
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::schemas::{Advice, CardInterpretation};

    fn sample_reading() -> ReadingResponse {
        ReadingResponse {
            cards: vec![CardInterpretation {
                card_id: "0".into(),
                position: "present".into(),
                interpretation: "해석".into(),
                key_message: "메시지".into(),
            }],
            card_relationships: "관계".into(),
            overall_reading: "종합".into(),
            advice: Advice {
                immediate_action: "행동".into(),
                short_term: "단기".into(),
                long_term: Some("장기".into()),
                mindset: None,
                cautions: None,
            },
            summary: "요약".into(),
        }
    }

    #[test]
    fn identical_json_parses_in_all_wrappings() {
        let json = sample_reading().to_json();
        let bare = ResponseParser::parse(&json, None).unwrap();
        let fenced_json =
            ResponseParser::parse(&format!("```json\n{json}\n```"), None).unwrap();
        let fenced_plain = ResponseParser::parse(&format!("```\n{json}\n```"), None).unwrap();
        let upper = ResponseParser::parse(&format!("```JSON\n{json}\n```"), None).unwrap();
        assert_eq!(bare, fenced_json);
        assert_eq!(bare, fenced_plain);
        assert_eq!(bare, upper);
    }

    #[test]
    fn round_trips_through_to_json() {
        let reading = sample_reading();
        let parsed = ResponseParser::parse(&reading.to_json(), None).unwrap();
        assert_eq!(parsed, reading);
    }

    #[test]
    fn extracts_braces_from_surrounding_prose() {
        let json = sample_reading().to_json();
        let noisy = format!("물론입니다! 리딩 결과입니다:\n{json}\n도움이 되셨길 바랍니다.");
        let parsed = ResponseParser::parse(&noisy, None).unwrap();
        assert_eq!(parsed.summary, "요약");
    }

    #[test]
    fn empty_content_is_truncated_error() {
        let err = ResponseParser::extract_json("   ").unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn missing_json_is_not_truncated() {
        let err = ResponseParser::extract_json("no json here at all").unwrap_err();
        assert!(!err.is_truncation());
    }

    #[test]
    fn unterminated_object_is_truncated() {
        let err = ResponseParser::extract_json(r#"{"cards": [{"card_id": "0""#).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn finish_reason_max_tokens_tags_truncation() {
        // Structurally valid JSON that fails deserialization mid-schema.
        let cut = r#"{"cards": []}"#;
        let err = ResponseParser::parse(cut, Some(FinishReason::MaxTokens));
        // Missing required fields with max_tokens finish: tagged truncated.
        assert!(err.unwrap_err().is_truncation());

        let err = ResponseParser::parse(cut, Some(FinishReason::Stop)).unwrap_err();
        assert!(!err.is_truncation());
    }

    #[test]
    fn empty_cards_rejected() {
        let mut reading = sample_reading();
        reading.cards.clear();
        let err = ResponseParser::parse(&reading.to_json(), None).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn duplicate_positions_rejected() {
        let mut reading = sample_reading();
        let duplicate = reading.cards[0].clone();
        reading.cards.push(duplicate);
        let err = ResponseParser::parse(&reading.to_json(), None).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
