//! Spread definitions: position layouts, parallel-processing parameters,
//! and per-spread validation thresholds.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadType {
    OneCard,
    ThreeCardPastPresentFuture,
    ThreeCardSituationActionOutcome,
    CelticCross,
}

impl SpreadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneCard => "one_card",
            Self::ThreeCardPastPresentFuture => "three_card_past_present_future",
            Self::ThreeCardSituationActionOutcome => "three_card_situation_action_outcome",
            Self::CelticCross => "celtic_cross",
        }
    }

    pub fn from_str(value: &str) -> Result<Self, EngineError> {
        match value {
            "one_card" => Ok(Self::OneCard),
            "three_card_past_present_future" => Ok(Self::ThreeCardPastPresentFuture),
            "three_card_situation_action_outcome" => Ok(Self::ThreeCardSituationActionOutcome),
            "celtic_cross" => Ok(Self::CelticCross),
            other => Err(EngineError::InvalidInput(format!(
                "unknown spread type: {other}"
            ))),
        }
    }

    pub fn card_count(&self) -> usize {
        spread_config(*self).card_count
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SpreadPosition {
    pub index: usize,
    /// Stable position key used in the structured response.
    pub position: &'static str,
    /// Display name, used in prompts and citations.
    pub name: &'static str,
    pub meaning: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct SpreadConfig {
    pub spread_type: SpreadType,
    pub card_count: usize,
    pub positions: &'static [SpreadPosition],
    pub supports_parallel: bool,
    /// Cards per phase-1 batch in the parallel engine.
    pub batch_size: usize,
    /// Cap on concurrent LLM calls across both parallel phases.
    pub max_concurrent_calls: usize,
    /// Output budget for the single-call engine.
    pub max_tokens: u32,
    /// Quality thresholds. The celtic cross runs with a laxer korean ratio
    /// and shorter per-card interpretations but a longer overall reading.
    pub min_korean_ratio: f64,
    pub min_interpretation_chars: usize,
    pub min_overall_chars: usize,
}

impl SpreadConfig {
    pub fn position_index(&self, position: &str) -> Option<usize> {
        self.positions
            .iter()
            .find(|p| p.position == position)
            .map(|p| p.index)
    }

    pub fn position_name(&self, position: &str) -> Option<&'static str> {
        self.positions
            .iter()
            .find(|p| p.position == position)
            .map(|p| p.name)
    }
}

const ONE_CARD_POSITIONS: &[SpreadPosition] = &[SpreadPosition {
    index: 0,
    position: "present",
    name: "현재",
    meaning: "질문에 대한 지금의 핵심 메시지",
}];

const THREE_CARD_PPF_POSITIONS: &[SpreadPosition] = &[
    SpreadPosition {
        index: 0,
        position: "past",
        name: "과거",
        meaning: "질문의 뿌리가 된 과거의 영향",
    },
    SpreadPosition {
        index: 1,
        position: "present",
        name: "현재",
        meaning: "현재의 상황과 에너지",
    },
    SpreadPosition {
        index: 2,
        position: "future",
        name: "미래",
        meaning: "지금의 흐름이 이어질 때의 미래",
    },
];

const THREE_CARD_SAO_POSITIONS: &[SpreadPosition] = &[
    SpreadPosition {
        index: 0,
        position: "situation",
        name: "상황",
        meaning: "현재 상황의 본질",
    },
    SpreadPosition {
        index: 1,
        position: "action",
        name: "행동",
        meaning: "취해야 할 행동이나 태도",
    },
    SpreadPosition {
        index: 2,
        position: "outcome",
        name: "결과",
        meaning: "그 행동이 가져올 결과",
    },
];

const CELTIC_CROSS_POSITIONS: &[SpreadPosition] = &[
    SpreadPosition {
        index: 0,
        position: "present_situation",
        name: "현재 상황",
        meaning: "질문을 둘러싼 현재의 핵심 에너지",
    },
    SpreadPosition {
        index: 1,
        position: "challenge",
        name: "도전 과제",
        meaning: "현재 상황을 가로지르는 장애물 또는 과제",
    },
    SpreadPosition {
        index: 2,
        position: "foundation",
        name: "기반",
        meaning: "상황의 뿌리, 무의식적 기반",
    },
    SpreadPosition {
        index: 3,
        position: "recent_past",
        name: "가까운 과거",
        meaning: "지나가고 있는 최근의 영향",
    },
    SpreadPosition {
        index: 4,
        position: "crown",
        name: "가능성",
        meaning: "의식적인 목표, 도달할 수 있는 최선",
    },
    SpreadPosition {
        index: 5,
        position: "near_future",
        name: "가까운 미래",
        meaning: "곧 다가올 흐름",
    },
    SpreadPosition {
        index: 6,
        position: "self_attitude",
        name: "자신의 태도",
        meaning: "질문자가 상황을 대하는 태도",
    },
    SpreadPosition {
        index: 7,
        position: "external_influences",
        name: "주변 환경",
        meaning: "주변 사람들과 환경의 영향",
    },
    SpreadPosition {
        index: 8,
        position: "hopes_fears",
        name: "희망과 두려움",
        meaning: "내면의 희망 또는 두려움",
    },
    SpreadPosition {
        index: 9,
        position: "final_outcome",
        name: "최종 결과",
        meaning: "흐름이 수렴하는 최종 결과",
    },
];

const ONE_CARD: SpreadConfig = SpreadConfig {
    spread_type: SpreadType::OneCard,
    card_count: 1,
    positions: ONE_CARD_POSITIONS,
    supports_parallel: false,
    batch_size: 1,
    max_concurrent_calls: 1,
    max_tokens: 2000,
    min_korean_ratio: 0.12,
    min_interpretation_chars: 100,
    min_overall_chars: 80,
};

const THREE_CARD_PPF: SpreadConfig = SpreadConfig {
    spread_type: SpreadType::ThreeCardPastPresentFuture,
    card_count: 3,
    positions: THREE_CARD_PPF_POSITIONS,
    supports_parallel: false,
    batch_size: 3,
    max_concurrent_calls: 1,
    max_tokens: 3500,
    min_korean_ratio: 0.12,
    min_interpretation_chars: 100,
    min_overall_chars: 100,
};

const THREE_CARD_SAO: SpreadConfig = SpreadConfig {
    spread_type: SpreadType::ThreeCardSituationActionOutcome,
    card_count: 3,
    positions: THREE_CARD_SAO_POSITIONS,
    supports_parallel: false,
    batch_size: 3,
    max_concurrent_calls: 1,
    max_tokens: 3500,
    min_korean_ratio: 0.12,
    min_interpretation_chars: 100,
    min_overall_chars: 100,
};

const CELTIC_CROSS: SpreadConfig = SpreadConfig {
    spread_type: SpreadType::CelticCross,
    card_count: 10,
    positions: CELTIC_CROSS_POSITIONS,
    supports_parallel: true,
    batch_size: 3,
    max_concurrent_calls: 5,
    max_tokens: 3500,
    min_korean_ratio: 0.10,
    min_interpretation_chars: 80,
    min_overall_chars: 300,
};

pub fn spread_config(spread_type: SpreadType) -> &'static SpreadConfig {
    match spread_type {
        SpreadType::OneCard => &ONE_CARD,
        SpreadType::ThreeCardPastPresentFuture => &THREE_CARD_PPF,
        SpreadType::ThreeCardSituationActionOutcome => &THREE_CARD_SAO,
        SpreadType::CelticCross => &CELTIC_CROSS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_counts_per_spread() {
        assert_eq!(SpreadType::OneCard.card_count(), 1);
        assert_eq!(SpreadType::ThreeCardPastPresentFuture.card_count(), 3);
        assert_eq!(SpreadType::CelticCross.card_count(), 10);
    }

    #[test]
    fn celtic_cross_layout() {
        let config = spread_config(SpreadType::CelticCross);
        assert_eq!(config.positions.len(), 10);
        assert!(config.supports_parallel);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.max_concurrent_calls, 5);
        assert_eq!(config.position_index("final_outcome"), Some(9));
        assert_eq!(config.position_name("challenge"), Some("도전 과제"));
        // Position keys are pairwise distinct.
        let mut keys: Vec<&str> = config.positions.iter().map(|p| p.position).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 10);
    }

    #[test]
    fn thresholds_differ_for_celtic() {
        assert_eq!(spread_config(SpreadType::OneCard).min_korean_ratio, 0.12);
        assert_eq!(spread_config(SpreadType::CelticCross).min_korean_ratio, 0.10);
        assert_eq!(spread_config(SpreadType::CelticCross).min_overall_chars, 300);
        assert_eq!(spread_config(SpreadType::OneCard).min_overall_chars, 80);
    }

    #[test]
    fn spread_type_round_trips_through_strings() {
        for spread in [
            SpreadType::OneCard,
            SpreadType::ThreeCardPastPresentFuture,
            SpreadType::ThreeCardSituationActionOutcome,
            SpreadType::CelticCross,
        ] {
            assert_eq!(SpreadType::from_str(spread.as_str()).unwrap(), spread);
        }
        assert!(SpreadType::from_str("five_card").is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&SpreadType::CelticCross).unwrap(),
            "\"celtic_cross\""
        );
    }
}
