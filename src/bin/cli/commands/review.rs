use anyhow::Result;
use chrono::{DateTime, Utc};

use flashdeck_lib::flashcards::Grade;

use crate::app::App;
use crate::render::terminal::{local_time, render_face, state_label};
use crate::OutputFormat;

pub fn run(
    app: &mut App,
    card_id: &str,
    grade: Grade,
    at: Option<DateTime<Utc>>,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let card = app.find_card(card_id)?;
    let at = at.unwrap_or_else(Utc::now);
    let option = app.scheduler.get_next_review_options(&card, at).get(grade).clone();
    let updated = option.card;
    app.save_card(&updated)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        OutputFormat::Plain => {
            println!("{}", render_face(&updated.front, use_color, ""));
            println!(
                "{:?} \u{2192} {} next in {} ({})",
                grade,
                state_label(updated.state, 0, use_color),
                option.interval,
                local_time(updated.due)
            );
        }
    }

    Ok(())
}
