use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use flashdeck_lib::interchange::{commit_import, import_deck_with_progress, ImportOptions};

use crate::app::App;
use crate::OutputFormat;

/// Warnings printed in plain output before summarizing the rest
const MAX_WARNINGS_SHOWN: usize = 10;

pub fn run(
    app: &mut App,
    path: &Path,
    name: Option<String>,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let options = ImportOptions {
        deck_name: name,
        settings: app.config.deck.clone(),
    };

    let show_progress = use_color && matches!(format, OutputFormat::Plain);
    let mut on_progress = |percent: u8| {
        if show_progress {
            eprint!("\rImporting {}... {:>3}%", file_name, percent);
            std::io::stderr().flush().ok();
        }
    };

    let result = import_deck_with_progress(
        &file_name,
        &bytes,
        &app.scheduler,
        &options,
        Utc::now(),
        &mut on_progress,
    );
    if show_progress {
        eprintln!();
    }
    let result = result.with_context(|| format!("Failed to import {}", path.display()))?;

    commit_import(&mut app.storage, &result).context("Failed to save imported deck")?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "deck": result.deck,
                "format": result.format,
                "cardCount": result.cards.len(),
                "skippedLines": result.skipped_lines,
                "warnings": result.warnings,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!(
                "Imported {} cards into deck \"{}\" ({})",
                result.cards.len(),
                result.deck.name,
                result.format
            );
            if result.skipped_lines > 0 {
                println!("  Skipped: {}", result.skipped_lines);
            }
            for warning in result.warnings.iter().take(MAX_WARNINGS_SHOWN) {
                println!("  warning: {}", warning);
            }
            if result.warnings.len() > MAX_WARNINGS_SHOWN {
                println!("  ... and {} more warnings", result.warnings.len() - MAX_WARNINGS_SHOWN);
            }
            println!("  ID: {}", result.deck.id);
        }
    }

    Ok(())
}
