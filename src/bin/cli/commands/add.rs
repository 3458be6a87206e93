use anyhow::{Context, Result};

use flashdeck_lib::flashcards::{Deck, Storage};
use flashdeck_lib::interchange::normalize_content;

use crate::app::App;
use crate::OutputFormat;

pub fn run(
    app: &mut App,
    deck_name: &str,
    front: String,
    back: String,
    tags: Option<&str>,
    create: bool,
    format: &OutputFormat,
) -> Result<()> {
    let deck = match app.find_deck(deck_name) {
        Ok(deck) => deck,
        Err(_) if create => {
            let mut deck = Deck::new(deck_name.trim().to_string());
            deck.settings = app.config.deck.clone();
            app.storage.save_deck(&deck).context("Failed to create deck")?;
            deck
        }
        Err(e) => return Err(e),
    };

    let front = normalize_content(&front);
    let back = normalize_content(&back);
    anyhow::ensure!(!front.is_empty(), "Front is empty");

    let mut card = app.scheduler.create_card(front, back, deck.id, Vec::new());
    for tag in tags.unwrap_or("").split(',') {
        card.add_tag(tag);
    }
    app.save_card(&card)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&card)?);
        }
        OutputFormat::Plain => {
            println!("Added card to \"{}\"", deck.name);
            if !card.tags.is_empty() {
                println!("  Tags: {}", card.tags.iter().map(|t| format!("#{}", t)).collect::<Vec<_>>().join(" "));
            }
            println!("  ID: {}", card.id);
        }
    }

    Ok(())
}
