//! Card drawing: random draws through the database provider, or the
//! user-selection mode where the client picked specific cards.

use rand::Rng;

use crate::db::DatabaseProvider;
use crate::error::EngineError;
use crate::types::{DrawnCard, Orientation};

/// Chance that a drawn card lands reversed.
const REVERSED_PROBABILITY: f64 = 0.3;

pub struct CardShuffleService;

impl CardShuffleService {
    /// Draw `count` distinct random cards, each with a random orientation.
    pub async fn draw_cards(
        count: usize,
        provider: &dyn DatabaseProvider,
    ) -> Result<Vec<DrawnCard>, EngineError> {
        let cards = provider
            .get_random_cards(count)
            .await
            .map_err(|e| EngineError::Persistence(format!("failed to draw cards: {e}")))?;
        if cards.len() != count {
            return Err(EngineError::InvalidInput(format!(
                "deck returned {} cards, needed {count}",
                cards.len()
            )));
        }
        Ok(cards
            .into_iter()
            .map(|card| DrawnCard::new(card, Self::random_orientation()))
            .collect())
    }

    /// User-selection mode: fetch the chosen cards by id. Orientations come
    /// from `reversed_states` when supplied (must match in length),
    /// otherwise they are drawn randomly.
    pub async fn from_selection(
        selected_card_ids: &[u32],
        reversed_states: Option<&[bool]>,
        provider: &dyn DatabaseProvider,
    ) -> Result<Vec<DrawnCard>, EngineError> {
        if let Some(states) = reversed_states {
            if states.len() != selected_card_ids.len() {
                return Err(EngineError::InvalidInput(format!(
                    "reversed_states length {} does not match selected_card_ids length {}",
                    states.len(),
                    selected_card_ids.len()
                )));
            }
        }

        let mut drawn = Vec::with_capacity(selected_card_ids.len());
        for (index, &card_id) in selected_card_ids.iter().enumerate() {
            let card = provider
                .get_card_by_id(card_id)
                .await
                .map_err(|e| EngineError::Persistence(format!("failed to load card: {e}")))?
                .ok_or_else(|| {
                    EngineError::InvalidInput(format!("card id {card_id} not found"))
                })?;
            let orientation = match reversed_states.and_then(|s| s.get(index)) {
                Some(true) => Orientation::Reversed,
                Some(false) => Orientation::Upright,
                None => Self::random_orientation(),
            };
            drawn.push(DrawnCard::new(card, orientation));
        }
        Ok(drawn)
    }

    pub fn random_orientation() -> Orientation {
        if rand::thread_rng().gen_bool(REVERSED_PROBABILITY) {
            Orientation::Reversed
        } else {
            Orientation::Upright
        }
    }
}
