//! Typed schema for the LLM's structured reading output.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardInterpretation {
    pub card_id: String,
    pub position: String,
    pub interpretation: String,
    pub key_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Advice {
    pub immediate_action: String,
    pub short_term: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mindset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cautions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadingResponse {
    pub cards: Vec<CardInterpretation>,
    #[serde(default)]
    pub card_relationships: String,
    pub overall_reading: String,
    pub advice: Advice,
    pub summary: String,
}

impl ReadingResponse {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("reading response is serializable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_advice_fields_default_to_none() {
        let raw = r#"{"immediate_action": "act", "short_term": "plan"}"#;
        let advice: Advice = serde_json::from_str(raw).unwrap();
        assert_eq!(advice.immediate_action, "act");
        assert!(advice.long_term.is_none());
    }

    #[test]
    fn card_relationships_defaults_to_empty() {
        let raw = r#"{
            "cards": [{"card_id": "0", "position": "present", "interpretation": "x", "key_message": "y"}],
            "overall_reading": "overall",
            "advice": {"immediate_action": "a", "short_term": "b"},
            "summary": "s"
        }"#;
        let reading: ReadingResponse = serde_json::from_str(raw).unwrap();
        assert!(reading.card_relationships.is_empty());
    }
}
