//! Deck interchange
//!
//! Import pipeline: detect the format, run its parser, embed packaged media,
//! normalize every face and create canonical cards through the scheduler.
//! Nothing touches storage until a complete [`ImportResult`] exists; callers
//! persist it with [`commit_import`].
//!
//! Supported formats:
//! - Container packages (`.apkg`, `.colpkg`)
//! - Comma or tab separated text (`.csv`, `.tsv`, most `.txt` exports)
//! - Plain text with alternating question/answer lines (`.txt`)
//! - Canonical JSON dumps (`.json`)

pub mod anki;
mod delimited;
pub mod error;
pub mod html;
mod json;
pub mod media;
mod plain_text;
pub mod records;

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::Serialize;

pub use error::{ExportError, ImportError, Result, TEXT_EXPORT_HINT};
pub use html::{normalize_content, to_plain_text};
pub use json::{export_csv, export_dump, DUMP_VERSION};
pub use records::Progress;

use crate::flashcards::{
    Card, CardStatus, Deck, DeckSettings, MediaFile, Scheduler, Storage, StorageError,
};
use records::{ParsedDeck, SourceHistory};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

static QUOTED_CSV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*"(?:[^"]|"")*"\s*,"#).unwrap());

/// Source formats the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceFormat {
    Container,
    DelimitedText,
    PlainText,
    CanonicalJson,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Container => "package",
            Self::DelimitedText => "delimited text",
            Self::PlainText => "plain text",
            Self::CanonicalJson => "JSON",
        };
        f.write_str(name)
    }
}

/// Pick a parser from the file name and the first bytes.
pub fn detect_format(file_name: &str, bytes: &[u8]) -> Result<SourceFormat> {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if matches!(ext.as_str(), "apkg" | "colpkg") || bytes.starts_with(ZIP_MAGIC) {
        return Ok(SourceFormat::Container);
    }

    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]);
    let head = head.trim_start_matches('\u{feff}');

    match ext.as_str() {
        "json" => Ok(SourceFormat::CanonicalJson),
        "csv" | "tsv" => Ok(SourceFormat::DelimitedText),
        "txt" | "text" => {
            let first_line = head.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            if first_line.contains('\t') || QUOTED_CSV_RE.is_match(first_line) {
                Ok(SourceFormat::DelimitedText)
            } else {
                Ok(SourceFormat::PlainText)
            }
        }
        _ if head.trim_start().starts_with('{') => Ok(SourceFormat::CanonicalJson),
        "" => Err(ImportError::UnsupportedFormat(file_name.to_string())),
        other => Err(ImportError::UnsupportedFormat(format!(
            "{} (.{} files are not supported)",
            file_name, other
        ))),
    }
}

/// Caller choices for an import.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Overrides the name found in the source
    pub deck_name: Option<String>,
    /// Settings for the new deck. Dumps keep their own.
    pub settings: DeckSettings,
}

/// A complete, not yet persisted import.
#[derive(Debug, Clone)]
pub struct ImportResult {
    pub deck: Deck,
    pub cards: Vec<Card>,
    pub warnings: Vec<String>,
    /// Lines or records that produced no card
    pub skipped_lines: usize,
    pub format: SourceFormat,
}

/// Import a file from disk.
pub fn import_file(
    path: &Path,
    scheduler: &Scheduler,
    options: &ImportOptions,
) -> Result<ImportResult> {
    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    import_deck(&file_name, &bytes, scheduler, options, Utc::now())
}

/// Import a source held in memory.
pub fn import_deck(
    file_name: &str,
    bytes: &[u8],
    scheduler: &Scheduler,
    options: &ImportOptions,
    now: DateTime<Utc>,
) -> Result<ImportResult> {
    import_deck_with_progress(file_name, bytes, scheduler, options, now, &mut |_: u8| {})
}

/// Import with progress reporting (0-100, never decreasing).
pub fn import_deck_with_progress(
    file_name: &str,
    bytes: &[u8],
    scheduler: &Scheduler,
    options: &ImportOptions,
    now: DateTime<Utc>,
    progress: &mut dyn FnMut(u8),
) -> Result<ImportResult> {
    let mut progress = Progress::new(Some(progress));
    let format = detect_format(file_name, bytes)?;
    log::info!("Importing {} as {}", file_name, format);

    let result = match format {
        SourceFormat::CanonicalJson => {
            let text = decode_text(file_name, bytes)?;
            import_dump(text, options, format, now, &mut progress)?
        }
        SourceFormat::Container => {
            let parsed = anki::parse_package(bytes, now, &mut progress)?;
            build_result(file_name, parsed, scheduler, options, format, now)
        }
        SourceFormat::DelimitedText => {
            let text = decode_text(file_name, bytes)?;
            let parsed = delimited::parse_delimited(text, &mut progress);
            build_result(file_name, parsed, scheduler, options, format, now)
        }
        SourceFormat::PlainText => {
            let text = decode_text(file_name, bytes)?;
            let parsed = plain_text::parse_plain_text(text, &mut progress);
            build_result(file_name, parsed, scheduler, options, format, now)
        }
    };

    if result.cards.is_empty() {
        return Err(ImportError::EmptyResult(file_name.to_string()));
    }

    log::info!(
        "Imported {} cards into deck {} ({} skipped, {} warnings)",
        result.cards.len(),
        result.deck.name,
        result.skipped_lines,
        result.warnings.len()
    );
    progress.report(100);
    Ok(result)
}

fn decode_text<'a>(file_name: &str, bytes: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(bytes)
        .map_err(|_| ImportError::UnsupportedFormat(format!("{} is not UTF-8 text", file_name)))
}

fn import_dump(
    text: &str,
    options: &ImportOptions,
    format: SourceFormat,
    now: DateTime<Utc>,
    progress: &mut Progress<'_>,
) -> Result<ImportResult> {
    let contents = json::parse_dump(text, now, progress)?;
    let mut deck = contents.deck;
    if let Some(name) = options.deck_name.as_ref().filter(|n| !n.trim().is_empty()) {
        deck.name = name.trim().to_string();
    }

    let cards = contents
        .cards
        .into_iter()
        .map(|mut card| {
            card.front = normalize_content(&card.front);
            card.back = normalize_content(&card.back);
            card
        })
        .collect();

    Ok(ImportResult {
        deck,
        cards,
        warnings: contents.warnings,
        skipped_lines: contents.skipped,
        format,
    })
}

fn build_result(
    file_name: &str,
    parsed: ParsedDeck,
    scheduler: &Scheduler,
    options: &ImportOptions,
    format: SourceFormat,
    now: DateTime<Utc>,
) -> ImportResult {
    let ParsedDeck {
        deck_name,
        records,
        mut warnings,
        mut skipped,
        media,
    } = parsed;

    let name = options
        .deck_name
        .as_deref()
        .or(deck_name.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| file_stem(file_name));

    let mut deck = Deck::new(name);
    deck.description = Some(format!(
        "Imported from {} on {}",
        file_name,
        now.format("%Y-%m-%d")
    ));
    deck.settings = options.settings.clone();
    deck.created_at = now;
    deck.updated_at = now;

    let mut cards = Vec::with_capacity(records.len());
    for record in records {
        let mut attached: Vec<MediaFile> = Vec::new();
        let mut face = |raw: &str| {
            let embedded = match &media {
                Some(library) if !library.is_empty() => {
                    let (content, files) = library.embed(raw);
                    for file in files {
                        if !attached.iter().any(|m| m.filename == file.filename) {
                            attached.push(file);
                        }
                    }
                    content
                }
                _ => raw.to_string(),
            };
            normalize_content(&embedded)
        };
        let front = face(&record.front);
        let back = face(&record.back);

        if front.is_empty() {
            let message = format!("Skipping card with empty question (answer {:?})", record.back);
            log::warn!("{}", message);
            warnings.push(message);
            skipped += 1;
            continue;
        }

        let mut card = scheduler.create_card_at(front, back, deck.id, Vec::new(), now);
        for tag in &record.tags {
            card.add_tag(tag);
        }
        card.media = attached;
        if let Some(history) = &record.history {
            apply_history(&mut card, history, scheduler.params().maximum_interval, now);
        }
        log::debug!("Created card {} ({})", card.id, card.state);
        cards.push(card);
    }

    deck.recount(&cards, now);
    ImportResult {
        deck,
        cards,
        warnings,
        skipped_lines: skipped,
        format,
    }
}

/// Carry counters and due date over from a source that tracked reviews.
///
/// The last interval doubles as the stability estimate, since it is the
/// spacing the source scheduler considered safe.
fn apply_history(card: &mut Card, history: &SourceHistory, maximum_interval: u32, now: DateTime<Utc>) {
    // max() maps NaN to zero
    let interval_days = history.interval_days.max(0.0).min(f64::from(maximum_interval));

    card.state = history.state;
    card.reps = history.reps;
    card.lapses = history.lapses;
    card.due = history.due;
    card.scheduled_days = interval_days;
    card.learning_steps = 0;

    if matches!(history.state, CardStatus::Review | CardStatus::Relearning) && interval_days > 0.0 {
        card.stability = card.stability.max(interval_days);
    }

    let last_review = TimeDelta::try_seconds((interval_days * 86_400.0).round() as i64)
        .and_then(|interval| history.due.checked_sub_signed(interval))
        .unwrap_or(now);
    card.last_review = Some(last_review.min(now));
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Imported Deck".to_string())
}

/// Persist a finished import: the deck first, then its cards.
pub fn commit_import<S: Storage + ?Sized>(
    storage: &mut S,
    result: &ImportResult,
) -> std::result::Result<(), StorageError> {
    storage.save_deck(&result.deck)?;
    storage.save_cards(&result.cards)?;
    log::info!(
        "Saved deck {} with {} cards",
        result.deck.name,
        result.cards.len()
    );
    Ok(())
}

/// Export targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Package,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Package => "apkg",
        }
    }

    /// Guess the format from an output path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "apkg" => Some(Self::Package),
            _ => None,
        }
    }
}

/// Serialize a deck and its cards.
pub fn export_deck(
    deck: &Deck,
    cards: &[Card],
    format: ExportFormat,
    now: DateTime<Utc>,
) -> std::result::Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Json => Ok(export_dump(deck, cards, now)?.into_bytes()),
        ExportFormat::Csv => Ok(export_csv(cards)?.into_bytes()),
        ExportFormat::Package => anki::export_package(deck, cards, now),
    }
}

/// Default file name for an exported deck, e.g. `spanish_verbs_flashcards.csv`.
pub fn export_file_name(deck: &Deck, format: ExportFormat) -> String {
    let stem: String = deck
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}_flashcards.{}", stem, format.extension())
}
