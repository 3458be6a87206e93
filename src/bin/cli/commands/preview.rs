use anyhow::Result;
use chrono::Utc;

use flashdeck_lib::flashcards::Grade;

use crate::app::App;
use crate::render::terminal::{local_time, paint, render_face, state_label, Color};
use crate::OutputFormat;

pub fn run(app: &App, card_id: &str, format: &OutputFormat, use_color: bool) -> Result<()> {
    let card = app.find_card(card_id)?;
    let now = Utc::now();
    let options = app.scheduler.get_next_review_options(&card, now);
    let retention = app.scheduler.calculate_retention(&card, now);

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "card": card,
                "retention": retention,
                "options": options,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("{}", render_face(&card.front, use_color, ""));
            println!("{}", paint(&"\u{2500}".repeat(40), Color::DIM, use_color));
            println!("{}", render_face(&card.back, false, ""));
            println!();
            println!(
                "State: {}  Reps: {}  Lapses: {}  Recall: {:.0}%",
                state_label(card.state, 0, use_color),
                card.reps,
                card.lapses,
                retention * 100.0
            );
            for grade in Grade::ALL {
                let option = options.get(grade);
                println!(
                    "  {} {:<6} {:>5}  {}",
                    grade.value(),
                    format!("{:?}", grade),
                    option.interval,
                    local_time(option.due)
                );
            }
        }
    }

    Ok(())
}
