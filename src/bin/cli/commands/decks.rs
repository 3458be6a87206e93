use anyhow::Result;
use chrono::Utc;

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub fn run(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let now = Utc::now();
    let cards = app.list_cards(None)?;
    let mut decks = app.list_decks()?;
    // Stored counters may be stale if due dates passed since the last save
    for deck in &mut decks {
        deck.recount(&cards, now);
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&decks)?);
        }
        OutputFormat::Plain => {
            if decks.is_empty() {
                println!("No decks yet. Import one with `flashdeck-cli import <file>`.");
                return Ok(());
            }

            let width = decks.iter().map(|d| d.name.chars().count()).max().unwrap_or(4).max(4);
            println!("{:<width$}  Cards    New    Due", "Deck", width = width);
            println!("{}  {}", "\u{2500}".repeat(width), "\u{2500}".repeat(20));
            for deck in &decks {
                let due = format!("{:>6}", deck.due_card_count);
                let due = if deck.due_card_count > 0 { paint(&due, Color::GREEN, use_color) } else { due };
                println!(
                    "{:<width$}  {:>5}  {:>5}  {}",
                    deck.name,
                    deck.card_count,
                    deck.new_card_count,
                    due,
                    width = width
                );
            }
            println!("\n{} decks, {} cards", decks.len(), cards.len());
        }
    }

    Ok(())
}
