//! Annotates the overall reading with position citations so the reader can
//! trace which card a statement came from.

#[derive(Debug, Clone)]
pub struct CardCitation {
    pub card_name: String,
    pub position_name: String,
}

pub struct CitationFormatter {
    citations: Vec<CardCitation>,
}

impl CitationFormatter {
    pub fn new(citations: Vec<CardCitation>) -> Self {
        Self { citations }
    }

    /// Append `(position-name)` after the first mention of each card name
    /// that is not already followed by a citation.
    pub fn add_citations(&self, text: &str) -> String {
        let mut result = text.to_string();
        for citation in &self.citations {
            if citation.card_name.is_empty() {
                continue;
            }
            let Some(found) = result.find(&citation.card_name) else {
                continue;
            };
            let after = found + citation.card_name.len();
            let already_cited = result[after..].trim_start().starts_with('(');
            if already_cited {
                continue;
            }
            result.insert_str(after, &format!("({})", citation.position_name));
        }
        result
    }
}
