//! File-backed tarot knowledge: card records, spread patterns, card
//! combinations, and category guides. Missing records are warn-only.
//!
//! Addressing:
//! - major arcana, id 0..=20 → `cards/major_arcana/NN_*.json`
//! - id 21 → legacy alias of id 20 (the knowledge base has 21 major files)
//! - minor arcana, id 22..=77 → `cards/minor_arcana/<suit>/RR_*_of_<suit>.json`
//!   with 14 ranks per suit in wands, cups, swords, pentacles order

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::types::Suit;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CardKnowledge {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub name_ko: String,
    #[serde(default)]
    pub deep_meaning: String,
    #[serde(default)]
    pub upright_themes: Vec<String>,
    #[serde(default)]
    pub reversed_themes: Vec<String>,
    #[serde(default)]
    pub symbolism: HashMap<String, String>,
    #[serde(default)]
    pub astrological_association: Option<String>,
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub numerology: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpreadKnowledge {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub name_ko: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub positions: Vec<serde_json::Value>,
    #[serde(default)]
    pub interpretation_guide: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Combination {
    #[serde(default)]
    pub card_ids: Vec<u32>,
    #[serde(default)]
    pub cards: Vec<String>,
    #[serde(default)]
    pub meaning: String,
    #[serde(default)]
    pub meaning_ko: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CombinationSet {
    #[serde(default)]
    pub combinations: Vec<Combination>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CategoryCardMeaning {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub upright: String,
    #[serde(default)]
    pub reversed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CategoryKnowledge {
    pub category: String,
    #[serde(default)]
    pub name_ko: String,
    #[serde(default)]
    pub interpretation_focus: Vec<String>,
    #[serde(default)]
    pub card_specific_meanings: HashMap<String, CategoryCardMeaning>,
}

pub struct KnowledgeBase {
    root: PathBuf,
}

impl KnowledgeBase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if !root.exists() {
            tracing::warn!(path = %root.display(), "knowledge base path does not exist");
        }
        tracing::info!(path = %root.display(), "knowledge base initialized");
        Self { root }
    }

    /// Default location under the platform data directory.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tarot-engine")
            .join("knowledge_base")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_card(&self, card_id: u32) -> Option<CardKnowledge> {
        if card_id == 21 {
            // The knowledge base covers 21 major files; standard decks have
            // 22. TODO: drop this alias once 21_the_world.json is added.
            tracing::warn!("card id 21 not in knowledge base, falling back to id 20");
            return self.load_card(20);
        }

        let (dir, prefix) = if card_id <= 20 {
            (
                self.root.join("cards").join("major_arcana"),
                format!("{card_id:02}_"),
            )
        } else if (22..=77).contains(&card_id) {
            let minor_index = card_id - 22;
            let suit = match minor_index / 14 {
                0 => Suit::Wands,
                1 => Suit::Cups,
                2 => Suit::Swords,
                _ => Suit::Pentacles,
            };
            let rank = minor_index % 14 + 1;
            (
                self.root
                    .join("cards")
                    .join("minor_arcana")
                    .join(suit.as_str()),
                format!("{rank:02}_"),
            )
        } else {
            tracing::warn!(card_id, "card id out of range");
            return None;
        };

        let file = first_match(&dir, &prefix)?;
        match read_json(&file) {
            Ok(card) => {
                tracing::debug!(card_id, file = %file.display(), "loaded card knowledge");
                Some(card)
            }
            Err(e) => {
                tracing::error!(card_id, error = %e, "failed to load card knowledge");
                None
            }
        }
    }

    pub fn load_spread(&self, spread_key: &str) -> Option<SpreadKnowledge> {
        let file = self.root.join("spreads").join(format!("{spread_key}.json"));
        if !file.exists() {
            tracing::warn!(spread_key, "spread knowledge not found");
            return None;
        }
        match read_json(&file) {
            Ok(spread) => Some(spread),
            Err(e) => {
                tracing::error!(spread_key, error = %e, "failed to load spread knowledge");
                None
            }
        }
    }

    pub fn load_combinations(&self, file_name: &str) -> Option<CombinationSet> {
        let file = self.root.join("combinations").join(file_name);
        if !file.exists() {
            tracing::warn!(file_name, "combination knowledge not found");
            return None;
        }
        match read_json::<CombinationSet>(&file) {
            Ok(set) => {
                tracing::debug!(count = set.combinations.len(), "loaded card combinations");
                Some(set)
            }
            Err(e) => {
                tracing::error!(file_name, error = %e, "failed to load combinations");
                None
            }
        }
    }

    pub fn load_category(&self, category: &str) -> Option<CategoryKnowledge> {
        let file = self.root.join("categories").join(format!("{category}.json"));
        if !file.exists() {
            tracing::warn!(category, "category knowledge not found");
            return None;
        }
        match read_json(&file) {
            Ok(knowledge) => Some(knowledge),
            Err(e) => {
                tracing::error!(category, error = %e, "failed to load category knowledge");
                None
            }
        }
    }

    pub fn all_cards(&self) -> Vec<CardKnowledge> {
        let cards_dir = self.root.join("cards");
        let mut cards: Vec<CardKnowledge> = WalkDir::new(&cards_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|entry| read_json(entry.path()).ok())
            .collect();
        cards.sort_by_key(|c| c.id);
        tracing::info!(count = cards.len(), "loaded cards from knowledge base");
        cards
    }

    /// Category keys present on disk, sorted.
    pub fn all_categories(&self) -> Vec<String> {
        let categories_dir = self.root.join("categories");
        let mut keys: Vec<String> = WalkDir::new(&categories_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|entry| {
                entry
                    .path()
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .collect();
        keys.sort();
        keys
    }

    pub fn all_spreads(&self) -> Vec<SpreadKnowledge> {
        let spreads_dir = self.root.join("spreads");
        let spreads: Vec<SpreadKnowledge> = WalkDir::new(&spreads_dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|entry| read_json(entry.path()).ok())
            .collect();
        tracing::info!(count = spreads.len(), "loaded spreads from knowledge base");
        spreads
    }
}

fn first_match(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().is_some_and(|ext| ext == "json")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    matches.sort();
    if matches.is_empty() {
        tracing::warn!(dir = %dir.display(), prefix, "card knowledge not found");
    }
    matches.into_iter().next()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
