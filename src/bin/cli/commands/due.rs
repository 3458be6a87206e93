use anyhow::Result;
use chrono::Utc;

use flashdeck_lib::flashcards::Storage;

use crate::app::App;
use crate::render::terminal::{local_time, paint, state_label, summary, Color};
use crate::OutputFormat;

pub fn run(
    app: &App,
    deck_name: Option<&str>,
    limit: usize,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let now = Utc::now();
    let decks = match deck_name {
        Some(name) => vec![app.find_deck(name)?],
        None => app.list_decks()?,
    };

    let mut cards = Vec::new();
    for deck in &decks {
        let due = app.storage.get_due_cards_at(Some(deck.id), now)?;
        cards.extend(app.scheduler.study_queue(deck, &due, now));
    }
    let total = cards.len();
    cards.truncate(limit);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&cards)?);
        }
        OutputFormat::Plain => {
            if cards.is_empty() {
                println!("Nothing due.");
                return Ok(());
            }
            for card in &cards {
                let id = card.id.to_string();
                println!(
                    "{}  {} {}  {}",
                    paint(&id[..8], Color::GRAY, use_color),
                    state_label(card.state, 10, use_color),
                    local_time(card.due),
                    summary(&card.front, 50)
                );
            }
            if total > cards.len() {
                println!("\n{} of {} due cards shown", cards.len(), total);
            } else {
                println!("\n{} due", total);
            }
        }
    }

    Ok(())
}
