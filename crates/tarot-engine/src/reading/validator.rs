//! Quality validation of a parsed reading: required content, card count,
//! Korean-content ratio, and minimum lengths. Thresholds come from the
//! spread configuration.

use std::sync::LazyLock;

use regex::Regex;

use super::schemas::ReadingResponse;
use super::spread_config::SpreadConfig;
use crate::error::EngineError;

static KOREAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[가-힣]").expect("korean range regex is valid"));

const MIN_KEY_MESSAGE_CHARS: usize = 5;
const MIN_ADVICE_FIELD_CHARS: usize = 30;
const MIN_SUMMARY_CHARS: usize = 10;

pub struct ReadingValidator;

impl ReadingValidator {
    /// Full quality check: required fields, card count, Korean ratio, and
    /// minimum lengths. Fails with the first violated rule.
    pub fn validate_reading_quality(
        reading: &ReadingResponse,
        expected_card_count: usize,
        config: &SpreadConfig,
    ) -> Result<(), EngineError> {
        tracing::info!(
            expected_card_count,
            spread = config.spread_type.as_str(),
            "validating reading quality"
        );
        Self::validate_required_fields(reading)?;
        Self::validate_card_count(reading, expected_card_count)?;
        Self::validate_korean_content(reading, config.min_korean_ratio)?;
        Self::validate_minimum_lengths(
            reading,
            config.min_interpretation_chars,
            config.min_overall_chars,
        )?;
        tracing::info!("reading quality validation passed");
        Ok(())
    }

    fn validate_required_fields(reading: &ReadingResponse) -> Result<(), EngineError> {
        if reading.cards.is_empty() {
            return Err(EngineError::Validation("cards list is empty".into()));
        }
        if reading.overall_reading.is_empty() {
            return Err(EngineError::Validation("overall_reading is empty".into()));
        }
        if reading.summary.is_empty() {
            return Err(EngineError::Validation("summary is empty".into()));
        }
        if reading.advice.immediate_action.is_empty() {
            return Err(EngineError::Validation(
                "advice.immediate_action is empty".into(),
            ));
        }
        if reading.advice.short_term.is_empty() {
            return Err(EngineError::Validation("advice.short_term is empty".into()));
        }
        Ok(())
    }

    pub fn validate_card_count(
        reading: &ReadingResponse,
        expected: usize,
    ) -> Result<(), EngineError> {
        let actual = reading.cards.len();
        if actual != expected {
            return Err(EngineError::Validation(format!(
                "card count mismatch: expected {expected}, got {actual}"
            )));
        }
        Ok(())
    }

    /// Ratio of Hangul syllables (가-힣) over non-whitespace characters
    /// across every text field.
    pub fn validate_korean_content(
        reading: &ReadingResponse,
        min_ratio: f64,
    ) -> Result<(), EngineError> {
        let mut texts: Vec<&str> = Vec::new();
        for card in &reading.cards {
            texts.push(&card.interpretation);
            texts.push(&card.key_message);
        }
        texts.push(&reading.overall_reading);
        texts.push(&reading.advice.immediate_action);
        texts.push(&reading.advice.short_term);
        if let Some(mindset) = &reading.advice.mindset {
            texts.push(mindset);
        }
        texts.push(&reading.summary);

        let full_text = texts.join(" ");
        let total_chars = full_text.chars().filter(|c| !c.is_whitespace()).count();
        if total_chars == 0 {
            return Err(EngineError::Validation("response text is empty".into()));
        }

        let korean_chars = KOREAN_RE.find_iter(&full_text).count();
        let ratio = korean_chars as f64 / total_chars as f64;
        tracing::debug!(
            korean_chars,
            total_chars,
            ratio,
            min_ratio,
            "korean content check"
        );

        if ratio < min_ratio {
            return Err(EngineError::Validation(format!(
                "response is not sufficiently Korean: ratio {ratio:.2} below minimum {min_ratio:.2}"
            )));
        }
        Ok(())
    }

    pub fn validate_minimum_lengths(
        reading: &ReadingResponse,
        min_interpretation: usize,
        min_overall: usize,
    ) -> Result<(), EngineError> {
        for (i, card) in reading.cards.iter().enumerate() {
            let interp_len = card.interpretation.chars().count();
            if interp_len < min_interpretation {
                return Err(EngineError::Validation(format!(
                    "card {} interpretation too short: {interp_len} chars, minimum {min_interpretation}",
                    i + 1
                )));
            }
            let key_len = card.key_message.chars().count();
            if key_len < MIN_KEY_MESSAGE_CHARS {
                return Err(EngineError::Validation(format!(
                    "card {} key message too short: {key_len} chars, minimum {MIN_KEY_MESSAGE_CHARS}",
                    i + 1
                )));
            }
        }

        let overall_len = reading.overall_reading.chars().count();
        if overall_len < min_overall {
            return Err(EngineError::Validation(format!(
                "overall reading too short: {overall_len} chars, minimum {min_overall}"
            )));
        }

        for (name, value) in [
            ("immediate_action", &reading.advice.immediate_action),
            ("short_term", &reading.advice.short_term),
        ] {
            let len = value.chars().count();
            if len < MIN_ADVICE_FIELD_CHARS {
                return Err(EngineError::Validation(format!(
                    "advice.{name} too short: {len} chars, minimum {MIN_ADVICE_FIELD_CHARS}"
                )));
            }
        }

        let summary_len = reading.summary.chars().count();
        if summary_len < MIN_SUMMARY_CHARS {
            return Err(EngineError::Validation(format!(
                "summary too short: {summary_len} chars, minimum {MIN_SUMMARY_CHARS}"
            )));
        }
        Ok(())
    }
}
