//! Storage for decks and cards
//!
//! [`Storage`] is the contract the rest of the crate persists through. Lookups
//! are total: a missing id yields `None` or an empty list, never an error.
//!
//! Directory structure of [`FileStorage`]:
//! ```text
//! {data-dir}/
//! ├── decks.json           # Array of all decks
//! └── cards/
//!     └── {card-id}.json   # Individual card files
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::*;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Data directory not found")]
    DataDirNotFound,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Persistence contract for decks and cards.
///
/// Cards reference their deck by id only; deleting a deck removes its cards
/// with an explicit filter pass.
pub trait Storage {
    fn get_decks(&self) -> Result<Vec<Deck>>;
    fn get_deck(&self, id: Uuid) -> Result<Option<Deck>>;
    /// Insert or replace by id
    fn save_deck(&mut self, deck: &Deck) -> Result<()>;
    /// Delete a deck and all its cards
    fn delete_deck(&mut self, id: Uuid) -> Result<()>;
    fn get_cards(&self, deck_id: Option<Uuid>) -> Result<Vec<Card>>;
    /// Insert or replace by id
    fn save_card(&mut self, card: &Card) -> Result<()>;
    fn delete_card(&mut self, id: Uuid) -> Result<()>;

    fn get_card(&self, id: Uuid) -> Result<Option<Card>> {
        Ok(self.get_cards(None)?.into_iter().find(|c| c.id == id))
    }

    fn save_cards(&mut self, cards: &[Card]) -> Result<()> {
        for card in cards {
            self.save_card(card)?;
        }
        Ok(())
    }

    /// Cards with `due <= now`, oldest first
    fn get_due_cards_at(&self, deck_id: Option<Uuid>, now: DateTime<Utc>) -> Result<Vec<Card>> {
        let mut due: Vec<Card> = self
            .get_cards(deck_id)?
            .into_iter()
            .filter(|c| c.due <= now)
            .collect();
        due.sort_by(|a, b| a.due.cmp(&b.due));
        Ok(due)
    }

    fn get_due_cards(&self, deck_id: Option<Uuid>) -> Result<Vec<Card>> {
        self.get_due_cards_at(deck_id, Utc::now())
    }

    fn get_new_cards(&self, deck_id: Option<Uuid>) -> Result<Vec<Card>> {
        Ok(self
            .get_cards(deck_id)?
            .into_iter()
            .filter(|c| c.state == CardStatus::New)
            .collect())
    }
}

/// Recompute a deck's derived counters from its cards and save it.
pub fn refresh_deck_counts<S: Storage + ?Sized>(
    storage: &mut S,
    deck_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Deck>> {
    let Some(mut deck) = storage.get_deck(deck_id)? else {
        return Ok(None);
    };
    let cards = storage.get_cards(Some(deck_id))?;
    deck.recount(&cards, now);
    deck.updated_at = now;
    storage.save_deck(&deck)?;
    Ok(Some(deck))
}

/// Review statistics over a set of cards
pub fn review_stats(cards: &[Card], now: DateTime<Utc>) -> ReviewStats {
    let mut stats = ReviewStats {
        total_cards: cards.len(),
        ..ReviewStats::default()
    };

    for card in cards {
        match card.state {
            CardStatus::New => stats.new_cards += 1,
            CardStatus::Learning | CardStatus::Relearning => stats.learning_cards += 1,
            CardStatus::Review => {
                stats.review_cards += 1;
                if card.stability > 21.0 {
                    stats.mature_cards += 1;
                }
            }
        }
        if card.due <= now {
            stats.due_cards += 1;
        }
    }

    stats
}

// ==================== In-memory ====================

/// Map-backed storage, preserving insertion order of decks.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    decks: Vec<Deck>,
    cards: HashMap<Uuid, Card>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_decks(&self) -> Result<Vec<Deck>> {
        Ok(self.decks.clone())
    }

    fn get_deck(&self, id: Uuid) -> Result<Option<Deck>> {
        Ok(self.decks.iter().find(|d| d.id == id).cloned())
    }

    fn save_deck(&mut self, deck: &Deck) -> Result<()> {
        match self.decks.iter_mut().find(|d| d.id == deck.id) {
            Some(existing) => *existing = deck.clone(),
            None => self.decks.push(deck.clone()),
        }
        Ok(())
    }

    fn delete_deck(&mut self, id: Uuid) -> Result<()> {
        self.decks.retain(|d| d.id != id);
        self.cards.retain(|_, c| c.deck_id != id);
        Ok(())
    }

    fn get_cards(&self, deck_id: Option<Uuid>) -> Result<Vec<Card>> {
        let mut cards: Vec<Card> = self
            .cards
            .values()
            .filter(|c| deck_id.map_or(true, |id| c.deck_id == id))
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(cards)
    }

    fn get_card(&self, id: Uuid) -> Result<Option<Card>> {
        Ok(self.cards.get(&id).cloned())
    }

    fn save_card(&mut self, card: &Card) -> Result<()> {
        self.cards.insert(card.id, card.clone());
        Ok(())
    }

    fn delete_card(&mut self, id: Uuid) -> Result<()> {
        self.cards.remove(&id);
        Ok(())
    }
}

// ==================== JSON files ====================

/// Storage manager backed by JSON files in a data directory
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|p| p.join("flashdeck"))
            .ok_or(StorageError::DataDirNotFound)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the cards directory
    fn cards_dir(&self) -> PathBuf {
        self.base_path.join("cards")
    }

    /// Get the decks.json path
    fn decks_path(&self) -> PathBuf {
        self.base_path.join("decks.json")
    }

    /// Get the path for a specific card
    fn card_path(&self, card_id: Uuid) -> PathBuf {
        self.cards_dir().join(format!("{}.json", card_id))
    }

    /// Initialize the directory layout
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.cards_dir())?;

        let decks_path = self.decks_path();
        if !decks_path.exists() {
            let empty_decks: Vec<Deck> = Vec::new();
            fs::write(&decks_path, serde_json::to_string_pretty(&empty_decks)?)?;
        }

        Ok(())
    }

    fn write_decks(&self, decks: &[Deck]) -> Result<()> {
        self.init()?;
        fs::write(self.decks_path(), serde_json::to_string_pretty(decks)?)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get_decks(&self) -> Result<Vec<Deck>> {
        let decks_path = self.decks_path();
        if !decks_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&decks_path)?;
        let decks: Vec<Deck> = serde_json::from_str(&content)?;
        Ok(decks)
    }

    fn get_deck(&self, id: Uuid) -> Result<Option<Deck>> {
        Ok(self.get_decks()?.into_iter().find(|d| d.id == id))
    }

    fn save_deck(&mut self, deck: &Deck) -> Result<()> {
        let mut decks = self.get_decks()?;
        match decks.iter().position(|d| d.id == deck.id) {
            Some(pos) => decks[pos] = deck.clone(),
            None => decks.push(deck.clone()),
        }
        self.write_decks(&decks)
    }

    fn delete_deck(&mut self, id: Uuid) -> Result<()> {
        for card in self.get_cards(Some(id))? {
            self.delete_card(card.id)?;
        }

        let mut decks = self.get_decks()?;
        decks.retain(|d| d.id != id);
        self.write_decks(&decks)
    }

    fn get_cards(&self, deck_id: Option<Uuid>) -> Result<Vec<Card>> {
        let cards_dir = self.cards_dir();
        if !cards_dir.exists() {
            return Ok(Vec::new());
        }

        let mut cards = Vec::new();
        for entry in fs::read_dir(&cards_dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                let content = fs::read_to_string(&path)?;
                let card: Card = serde_json::from_str(&content)?;
                if deck_id.map_or(true, |id| card.deck_id == id) {
                    cards.push(card);
                }
            }
        }

        cards.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(cards)
    }

    fn get_card(&self, id: Uuid) -> Result<Option<Card>> {
        let card_path = self.card_path(id);
        if !card_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&card_path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save_card(&mut self, card: &Card) -> Result<()> {
        self.init()?;
        fs::write(self.card_path(card.id), serde_json::to_string_pretty(card)?)?;
        Ok(())
    }

    fn delete_card(&mut self, id: Uuid) -> Result<()> {
        let card_path = self.card_path(id);
        if card_path.exists() {
            fs::remove_file(&card_path)?;
        }
        Ok(())
    }
}
