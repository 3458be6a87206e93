use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use uuid::Uuid;

use flashdeck_lib::config::Config;
use flashdeck_lib::flashcards::{refresh_deck_counts, Card, Deck, FileStorage, Scheduler, Storage};

/// Shared application state for CLI commands
pub struct App {
    pub config: Config,
    pub storage: FileStorage,
    pub scheduler: Scheduler,
}

impl App {
    /// Load config and open the data directory it points at
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load(config_path).context("Failed to load config")?;
        let data_dir = config.data_dir().context("Failed to get data directory")?;
        let scheduler = config.scheduler().context("Invalid scheduler settings")?;

        let storage = FileStorage::new(data_dir);
        storage.init().context("Failed to initialize storage")?;
        log::debug!("Using data directory {}", storage.base_path().display());

        Ok(Self {
            config,
            storage,
            scheduler,
        })
    }

    pub fn list_decks(&self) -> Result<Vec<Deck>> {
        self.storage.get_decks().context("Failed to list decks")
    }

    pub fn list_cards(&self, deck_id: Option<Uuid>) -> Result<Vec<Card>> {
        self.storage.get_cards(deck_id).context("Failed to list cards")
    }

    /// Find a deck by name (exact, then case-insensitive prefix) or id
    pub fn find_deck(&self, name: &str) -> Result<Deck> {
        let decks = self.list_decks()?;
        let name_lower = name.to_lowercase();

        // Exact match first
        if let Some(deck) = decks.iter().find(|d| d.name.to_lowercase() == name_lower) {
            return Ok(deck.clone());
        }

        // Prefix match
        let matches: Vec<&Deck> = decks
            .iter()
            .filter(|d| d.name.to_lowercase().starts_with(&name_lower))
            .collect();

        match matches.len() {
            1 => Ok(matches[0].clone()),
            0 => {
                if let Some(deck) = decks.iter().find(|d| d.id.to_string() == name_lower) {
                    return Ok(deck.clone());
                }
                bail!(
                    "No deck matching '{}'. Available decks:\n{}",
                    name,
                    decks.iter().map(|d| format!("  - {}", d.name)).collect::<Vec<_>>().join("\n")
                )
            }
            _ => bail!(
                "Ambiguous deck name '{}'. Matches:\n{}",
                name,
                matches.iter().map(|d| format!("  - {}", d.name)).collect::<Vec<_>>().join("\n")
            ),
        }
    }

    /// Find a card by id or unique id prefix
    pub fn find_card(&self, id: &str) -> Result<Card> {
        let id_lower = id.trim().to_lowercase();
        if let Ok(uuid) = Uuid::parse_str(&id_lower) {
            return self
                .storage
                .get_card(uuid)
                .context("Failed to read card")?
                .with_context(|| format!("No card with id {}", uuid));
        }

        let matches: Vec<Card> = self
            .list_cards(None)?
            .into_iter()
            .filter(|c| c.id.to_string().starts_with(&id_lower))
            .collect();

        match matches.len() {
            0 => bail!("No card matching '{}'", id),
            1 => Ok(matches.into_iter().next().context("No card")?),
            n => bail!("Ambiguous card id '{}' ({} matches)", id, n),
        }
    }

    /// Save a card and bring its deck's counters up to date
    pub fn save_card(&mut self, card: &Card) -> Result<()> {
        self.storage.save_card(card).context("Failed to save card")?;
        refresh_deck_counts(&mut self.storage, card.deck_id, Utc::now())
            .context("Failed to update deck")?;
        Ok(())
    }
}
