use anyhow::{Context, Result};

use flashdeck_lib::flashcards::Storage;

use crate::app::App;
use crate::OutputFormat;

pub fn run(app: &mut App, deck_name: &str, format: &OutputFormat) -> Result<()> {
    let deck = app.find_deck(deck_name)?;
    let card_count = app.list_cards(Some(deck.id))?.len();
    app.storage.delete_deck(deck.id).context("Failed to delete deck")?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "deletedDeckId": deck.id.to_string(),
                "deckName": deck.name,
                "deletedCards": card_count,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("Deleted deck \"{}\" and {} cards", deck.name, card_count);
        }
    }

    Ok(())
}
