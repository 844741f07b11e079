//! Shapes a drawn card into the uniform context the prompt templates
//! consume: bilingual names, orientation in both languages, and the
//! keywords/meaning for the drawn orientation.

use serde_json::{json, Value};

use crate::types::{DrawnCard, Orientation};

pub fn build_card_context(drawn: &DrawnCard) -> Value {
    let card = &drawn.card;
    let keywords = match drawn.orientation {
        Orientation::Upright => &card.keywords_upright,
        Orientation::Reversed => &card.keywords_reversed,
    };

    json!({
        "id": card.id,
        "name": card.name,
        "name_ko": card.name_ko,
        "orientation": drawn.orientation.as_str(),
        "orientation_korean": drawn.orientation.korean(),
        "arcana": card.arcana,
        "arcana_korean": card.arcana.korean(),
        "suit": card.suit.map(|s| s.as_str()),
        "suit_korean": card.suit.map(|s| s.korean()),
        "number": card.number,
        "keywords": keywords,
        "upright_meaning": card.meaning_upright,
        "reversed_meaning": card.meaning_reversed,
    })
}
