mod app;
mod commands;
mod render;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use flashdeck_lib::flashcards::Grade;

#[derive(Parser)]
#[command(name = "flashdeck-cli", about = "Spaced repetition flashcards from the terminal", version)]
struct Cli {
    /// Config file (default: <config dir>/flashdeck/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum ExportAs {
    Json,
    Csv,
    Apkg,
}

#[derive(Subcommand)]
enum Command {
    /// List decks with card counts
    Decks,

    /// Import a deck (.apkg, .csv, .tsv, .txt or .json)
    Import {
        file: PathBuf,
        /// Name for the new deck
        #[arg(long)]
        name: Option<String>,
    },

    /// Export a deck
    Export {
        /// Deck name (case-insensitive prefix match) or id
        deck: String,
        /// Output file (defaults to <deck>_flashcards.<ext>)
        out: Option<PathBuf>,
        /// Output format (defaults to the extension of OUT, then json)
        #[arg(long = "as")]
        export_as: Option<ExportAs>,
    },

    /// List cards due for review
    Due {
        /// Deck name or id
        deck: Option<String>,
        /// Maximum cards to list
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Grade a card
    Review {
        /// Card id or unique id prefix
        card: String,
        /// again, hard, good, easy or 1-4
        grade: Grade,
        /// Review time (RFC 3339, default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Show what each grade would do to a card
    Preview {
        /// Card id or unique id prefix
        card: String,
    },

    /// Review statistics
    Stats {
        /// Deck name or id
        deck: Option<String>,
    },

    /// Add a card to a deck
    Add {
        deck: String,
        front: String,
        back: String,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        /// Create the deck if no deck matches
        #[arg(long)]
        create: bool,
    },

    /// Delete a deck and all its cards
    DeleteDeck {
        deck: String,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && atty_check();
    let mut app = app::App::new(cli.config.as_deref())?;

    match cli.command {
        Command::Decks => {
            commands::decks::run(&app, &cli.format, use_color)?;
        }
        Command::Import { file, name } => {
            commands::import::run(&mut app, &file, name, &cli.format, use_color)?;
        }
        Command::Export { deck, out, export_as } => {
            commands::export::run(&app, &deck, out, export_as, &cli.format)?;
        }
        Command::Due { deck, limit } => {
            commands::due::run(&app, deck.as_deref(), limit, &cli.format, use_color)?;
        }
        Command::Review { card, grade, at } => {
            commands::review::run(&mut app, &card, grade, at, &cli.format, use_color)?;
        }
        Command::Preview { card } => {
            commands::preview::run(&app, &card, &cli.format, use_color)?;
        }
        Command::Stats { deck } => {
            commands::stats::run(&app, deck.as_deref(), &cli.format)?;
        }
        Command::Add { deck, front, back, tags, create } => {
            commands::add::run(&mut app, &deck, front, back, tags.as_deref(), create, &cli.format)?;
        }
        Command::DeleteDeck { deck } => {
            commands::delete::run(&mut app, &deck, &cli.format)?;
        }
    }

    Ok(())
}

/// Check if stdout is a terminal (for color support)
fn atty_check() -> bool {
    unsafe { libc_isatty(1) != 0 }
}

extern "C" {
    #[link_name = "isatty"]
    fn libc_isatty(fd: i32) -> i32;
}
