//! Proposal presentation
//!
//! The tally is a plain ordered map from option token to weight. It is turned
//! into an [`EmbedSnapshot`] only when a message has to be posted or edited;
//! a snapshot is never modified, every update renders a new one.

use crate::types::{OptionToken, Weight};
use chrono::{DateTime, Utc};

pub const OPEN_FOOTER: &str = "React with an option to vote. Votes are weighted by token balance.";
pub const CLOSED_FOOTER: &str = "Voting is closed.";

/// Per-option weight totals, in proposal option order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tally {
    entries: Vec<(OptionToken, Weight)>,
}

impl Tally {
    pub fn new(options: &[OptionToken]) -> Self {
        Self {
            entries: options.iter().cloned().map(|o| (o, 0)).collect(),
        }
    }

    pub fn get(&self, token: &OptionToken) -> Option<Weight> {
        self.entries
            .iter()
            .find(|(o, _)| o == token)
            .map(|(_, w)| *w)
    }

    /// Add `weight` to `token`. Returns `false` for an unknown token.
    pub fn add(&mut self, token: &OptionToken, weight: Weight) -> bool {
        match self.entries.iter_mut().find(|(o, _)| o == token) {
            Some((_, w)) => {
                *w = w.saturating_add(weight);
                true
            }
            None => false,
        }
    }

    /// Subtract `weight` from `token`, never going below zero
    pub fn subtract(&mut self, token: &OptionToken, weight: Weight) -> bool {
        match self.entries.iter_mut().find(|(o, _)| o == token) {
            Some((_, w)) => {
                *w = w.saturating_sub(weight);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OptionToken, Weight)> {
        self.entries.iter().map(|(o, w)| (o, *w))
    }

    pub fn total(&self) -> Weight {
        self.entries
            .iter()
            .fold(0, |acc: Weight, (_, w)| acc.saturating_add(*w))
    }

    /// Option(s) with the highest weight; empty when nobody voted
    pub fn leaders(&self) -> Vec<&OptionToken> {
        let max = self.entries.iter().map(|(_, w)| *w).max().unwrap_or(0);
        if max == 0 {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|(_, w)| *w == max)
            .map(|(o, _)| o)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Immutable rendering of a proposal message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbedSnapshot {
    pub title: String,
    pub description: String,
    pub author: String,
    pub fields: Vec<EmbedField>,
    pub footer: String,
    pub timestamp: DateTime<Utc>,
}

impl EmbedSnapshot {
    /// Value of the field named `name`
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// Static parts of a proposal message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposalHeader {
    pub title: String,
    pub description: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

pub fn render(header: &ProposalHeader, tally: &Tally, closed: bool) -> EmbedSnapshot {
    let mut fields: Vec<EmbedField> = tally
        .iter()
        .map(|(token, weight)| EmbedField {
            name: token.to_string(),
            value: weight.to_string(),
            inline: true,
        })
        .collect();

    if closed {
        let result = match tally.leaders().as_slice() {
            [] => "No votes".to_string(),
            [winner] => winner.to_string(),
            tied => format!(
                "Tie: {}",
                tied.iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
        };
        fields.push(EmbedField {
            name: "Result".to_string(),
            value: result,
            inline: false,
        });
    }

    EmbedSnapshot {
        title: header.title.clone(),
        description: header.description.clone(),
        author: header.author.clone(),
        fields,
        footer: if closed { CLOSED_FOOTER } else { OPEN_FOOTER }.to_string(),
        timestamp: header.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<OptionToken> {
        vec!["👍".into(), "👎".into()]
    }

    fn header() -> ProposalHeader {
        ProposalHeader {
            title: "Treasury".into(),
            description: "Fund the mural?".into(),
            author: "alice".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_tally_deltas() {
        let mut tally = Tally::new(&options());
        assert!(tally.add(&"👍".into(), 5));
        assert!(tally.subtract(&"👍".into(), 2));
        assert!(tally.add(&"👎".into(), 1));
        assert!(!tally.add(&"🔥".into(), 1));

        assert_eq!(tally.get(&"👍".into()), Some(3));
        assert_eq!(tally.get(&"👎".into()), Some(1));
        assert_eq!(tally.total(), 4);
    }

    #[test]
    fn test_subtract_saturates() {
        let mut tally = Tally::new(&options());
        tally.subtract(&"👍".into(), 10);
        assert_eq!(tally.get(&"👍".into()), Some(0));
    }

    #[test]
    fn test_render_open_proposal() {
        let mut tally = Tally::new(&options());
        tally.add(&"👍".into(), 5);
        let embed = render(&header(), &tally, false);

        assert_eq!(embed.title, "Treasury");
        assert_eq!(embed.field("👍"), Some("5"));
        assert_eq!(embed.field("👎"), Some("0"));
        assert_eq!(embed.fields.len(), 2);
        assert_eq!(embed.footer, OPEN_FOOTER);
    }

    #[test]
    fn test_render_closed_proposal_names_result() {
        let mut tally = Tally::new(&options());
        assert_eq!(render(&header(), &tally, true).field("Result"), Some("No votes"));

        tally.add(&"👎".into(), 3);
        let embed = render(&header(), &tally, true);
        assert_eq!(embed.field("Result"), Some("👎"));
        assert_eq!(embed.footer, CLOSED_FOOTER);

        tally.add(&"👍".into(), 3);
        assert_eq!(render(&header(), &tally, true).field("Result"), Some("Tie: 👍 👎"));
    }
}
