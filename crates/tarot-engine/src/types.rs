//! Core domain types: cards, draws, spreads, and persistence payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arcana {
    Major,
    Minor,
}

impl Arcana {
    pub fn korean(&self) -> &'static str {
        match self {
            Self::Major => "메이저 아르카나",
            Self::Minor => "마이너 아르카나",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suit {
    Wands,
    Cups,
    Swords,
    Pentacles,
}

impl Suit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wands => "wands",
            Self::Cups => "cups",
            Self::Swords => "swords",
            Self::Pentacles => "pentacles",
        }
    }

    pub fn korean(&self) -> &'static str {
        match self {
            Self::Wands => "완드",
            Self::Cups => "컵",
            Self::Swords => "소드",
            Self::Pentacles => "펜타클",
        }
    }
}

/// Orientation is fixed at draw time and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Upright,
    Reversed,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upright => "upright",
            Self::Reversed => "reversed",
        }
    }

    pub fn korean(&self) -> &'static str {
        match self {
            Self::Upright => "정방향",
            Self::Reversed => "역방향",
        }
    }
}

/// Read-only reference data for a single tarot card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: u32,
    pub name: String,
    pub name_ko: String,
    pub arcana: Arcana,
    #[serde(default)]
    pub suit: Option<Suit>,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub keywords_upright: Vec<String>,
    #[serde(default)]
    pub keywords_reversed: Vec<String>,
    #[serde(default)]
    pub meaning_upright: String,
    #[serde(default)]
    pub meaning_reversed: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub symbolism: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A card plus the orientation it was drawn with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawnCard {
    pub card: Card,
    pub orientation: Orientation,
}

impl DrawnCard {
    pub fn new(card: Card, orientation: Orientation) -> Self {
        Self { card, orientation }
    }

    pub fn is_reversed(&self) -> bool {
        self.orientation == Orientation::Reversed
    }
}

/// Inbound reading request as the HTTP collaborator hands it to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingRequest {
    pub question: String,
    pub spread_type: crate::reading::SpreadType,
    #[serde(default)]
    pub category: Option<String>,
    /// User-selection mode: interpret these cards instead of drawing.
    #[serde(default)]
    pub selected_card_ids: Option<Vec<u32>>,
    /// Optional per-card orientations for user-selection mode. Must match
    /// `selected_card_ids` in length when present.
    #[serde(default)]
    pub reversed_states: Option<Vec<bool>>,
}

/// Role a single LLM call played in producing a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsagePurpose {
    MainReading,
    Retry,
    ParseRetry,
    CardBatch,
    OverallReading,
    Relationships,
    Advice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmUsageLog {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
    pub latency_seconds: f64,
    pub purpose: UsagePurpose,
    pub created_at: DateTime<Utc>,
}

/// One interpreted card as persisted, with a snapshot of the card record so
/// the reading stays intact if reference data changes later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCard {
    pub card_id: u32,
    pub position: String,
    pub orientation: Orientation,
    pub interpretation: String,
    pub key_message: String,
    pub card_snapshot: Card,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedReading {
    pub id: String,
    pub user_id: String,
    pub spread_type: crate::reading::SpreadType,
    pub question: String,
    pub category: String,
    pub cards: Vec<PersistedCard>,
    pub card_relationships: String,
    pub overall_reading: String,
    pub advice: crate::reading::Advice,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub llm_usage: Vec<LlmUsageLog>,
}
