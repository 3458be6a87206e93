use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use flashdeck_lib::interchange::{export_deck, export_file_name, ExportFormat};

use crate::app::App;
use crate::{ExportAs, OutputFormat};

pub fn run(
    app: &App,
    deck_name: &str,
    out: Option<PathBuf>,
    export_as: Option<ExportAs>,
    format: &OutputFormat,
) -> Result<()> {
    let deck = app.find_deck(deck_name)?;
    let cards = app.list_cards(Some(deck.id))?;

    let export_format = match export_as {
        Some(ExportAs::Json) => ExportFormat::Json,
        Some(ExportAs::Csv) => ExportFormat::Csv,
        Some(ExportAs::Apkg) => ExportFormat::Package,
        None => out
            .as_deref()
            .and_then(ExportFormat::from_path)
            .unwrap_or(ExportFormat::Json),
    };
    let out = out.unwrap_or_else(|| PathBuf::from(export_file_name(&deck, export_format)));

    let bytes = export_deck(&deck, &cards, export_format, Utc::now())
        .with_context(|| format!("Failed to export deck \"{}\"", deck.name))?;
    std::fs::write(&out, &bytes).with_context(|| format!("Failed to write {}", out.display()))?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "deckId": deck.id.to_string(),
                "deckName": deck.name,
                "path": out.to_string_lossy(),
                "format": export_format.extension(),
                "cardCount": cards.len(),
                "bytes": bytes.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("Exported {} cards from \"{}\" to {}", cards.len(), deck.name, out.display());
        }
    }

    Ok(())
}
