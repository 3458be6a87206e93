use anyhow::Result;
use chrono::Utc;

use flashdeck_lib::flashcards::review_stats;

use crate::app::App;
use crate::OutputFormat;

pub fn run(app: &App, deck_name: Option<&str>, format: &OutputFormat) -> Result<()> {
    let deck = deck_name.map(|name| app.find_deck(name)).transpose()?;
    let cards = app.list_cards(deck.as_ref().map(|d| d.id))?;
    let stats = review_stats(&cards, Utc::now());

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        OutputFormat::Plain => {
            let scope = deck.as_ref().map_or("All decks", |d| d.name.as_str());
            println!("{}", scope);
            println!("  Total:    {}", stats.total_cards);
            println!("  New:      {}", stats.new_cards);
            println!("  Learning: {}", stats.learning_cards);
            println!("  Review:   {}", stats.review_cards);
            println!("  Mature:   {}", stats.mature_cards);
            println!("  Due now:  {}", stats.due_cards);
        }
    }

    Ok(())
}
