//! Canonical JSON dumps and CSV export.
//!
//! A dump is `{ "deck": {..., "exportedAt", "version"}, "cards": [...] }` with
//! every instant as an ISO-8601 string. Reading one never trusts its ids or
//! cached counters: the deck and all cards get fresh ids and the counters are
//! recomputed.

use chrono::{DateTime, Utc};
use csv::{QuoteStyle, WriterBuilder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ExportError, ImportError, Result};
use super::records::Progress;
use crate::flashcards::{Card, Deck, DeckSettings};

pub const DUMP_VERSION: &str = "1.0";

pub const CSV_HEADER: [&str; 7] = ["Front", "Back", "Tags", "State", "Reps", "Due Date", "Created At"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeckDump<'a> {
    #[serde(flatten)]
    deck: &'a Deck,
    exported_at: DateTime<Utc>,
    version: &'static str,
}

#[derive(Serialize)]
struct Dump<'a> {
    deck: DeckDump<'a>,
    cards: &'a [Card],
}

/// Only what survives an import is read from the deck object.
#[derive(Deserialize)]
struct RawDeck {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    settings: DeckSettings,
}

#[derive(Deserialize)]
struct RawDump {
    deck: Option<RawDeck>,
    cards: Option<Vec<serde_json::Value>>,
}

/// A dump re-keyed for this store.
#[derive(Debug)]
pub struct DumpContents {
    pub deck: Deck,
    pub cards: Vec<Card>,
    pub warnings: Vec<String>,
    pub skipped: usize,
}

/// Read a dump. Cards that do not deserialize are skipped with a warning; a
/// dump without a deck object or card array is rejected.
pub fn parse_dump(text: &str, now: DateTime<Utc>, progress: &mut Progress<'_>) -> Result<DumpContents> {
    progress.report(0);
    let raw: RawDump = serde_json::from_str(text)?;
    let raw_deck = raw
        .deck
        .ok_or_else(|| ImportError::InvalidDump("missing \"deck\" object".to_string()))?;
    let raw_cards = raw
        .cards
        .ok_or_else(|| ImportError::InvalidDump("missing \"cards\" array".to_string()))?;
    progress.report(20);

    let mut deck = Deck::new(raw_deck.name);
    deck.description = raw_deck.description;
    deck.settings = raw_deck.settings;
    deck.created_at = now;
    deck.updated_at = now;

    let mut contents = DumpContents {
        deck,
        cards: Vec::with_capacity(raw_cards.len()),
        warnings: Vec::new(),
        skipped: 0,
    };

    let total = raw_cards.len();
    for (index, value) in raw_cards.into_iter().enumerate() {
        match serde_json::from_value::<Card>(value) {
            Ok(mut card) => {
                card.id = Uuid::new_v4();
                card.deck_id = contents.deck.id;
                contents.cards.push(card);
            }
            Err(e) => {
                let message = format!("Card {}: {}", index + 1, e);
                log::warn!("{}", message);
                contents.warnings.push(message);
                contents.skipped += 1;
            }
        }
        progress.report_span(20, 90, index + 1, total);
    }

    contents.deck.recount(&contents.cards, now);
    log::info!(
        "Read dump of deck {} with {} cards",
        contents.deck.name,
        contents.cards.len()
    );
    progress.report(90);
    Ok(contents)
}

/// Write a deck and its cards as a pretty-printed dump.
pub fn export_dump(deck: &Deck, cards: &[Card], now: DateTime<Utc>) -> std::result::Result<String, ExportError> {
    let dump = Dump {
        deck: DeckDump {
            deck,
            exported_at: now,
            version: DUMP_VERSION,
        },
        cards,
    };
    Ok(serde_json::to_string_pretty(&dump)?)
}

/// Write cards as CSV with a header row. Text columns are always quoted.
pub fn export_csv(cards: &[Card]) -> std::result::Result<String, ExportError> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::NonNumeric)
        .from_writer(Vec::new());

    writer.write_record(CSV_HEADER)?;
    for card in cards {
        let tags = card.tags.join(", ");
        let state = card.state.to_string();
        let reps = card.reps.to_string();
        let due = card.due.format("%Y-%m-%d").to_string();
        let created = card.created_at.format("%Y-%m-%d").to_string();
        writer.write_record([
            card.front.as_str(),
            card.back.as_str(),
            tags.as_str(),
            state.as_str(),
            reps.as_str(),
            due.as_str(),
            created.as_str(),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    String::from_utf8(bytes)
        .map_err(|e| ExportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}
