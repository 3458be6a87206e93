//! Intermediate records shared by the format parsers.

use chrono::{DateTime, Utc};

use super::media::MediaLibrary;
use crate::flashcards::CardStatus;

/// Scheduling history carried over from a source that tracks reviews.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceHistory {
    pub state: CardStatus,
    pub reps: u32,
    pub lapses: u32,
    pub due: DateTime<Utc>,
    /// Last interval in days
    pub interval_days: f64,
}

/// One front/back pair as read from a source, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRecord {
    pub front: String,
    pub back: String,
    pub tags: Vec<String>,
    pub history: Option<SourceHistory>,
}

/// Output of a record-level parser.
#[derive(Debug, Default)]
pub struct ParsedDeck {
    /// Deck name found in the source, if it carries one
    pub deck_name: Option<String>,
    pub records: Vec<ParsedRecord>,
    /// Everything worth telling the user, skipped lines included
    pub warnings: Vec<String>,
    /// Lines or records dropped
    pub skipped: usize,
    /// Media packaged with the source
    pub media: Option<MediaLibrary>,
}

impl ParsedDeck {
    pub fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.warnings.push(message);
    }

    /// Record a dropped line or record.
    pub fn skip(&mut self, message: String) {
        self.skipped += 1;
        self.warn(message);
    }
}

/// Advisory progress reporting (0-100). Never goes backwards.
pub struct Progress<'a> {
    sink: Option<&'a mut dyn FnMut(u8)>,
    last: Option<u8>,
}

impl<'a> Progress<'a> {
    pub fn new(sink: Option<&'a mut dyn FnMut(u8)>) -> Self {
        Self { sink, last: None }
    }

    pub fn silent() -> Self {
        Self::new(None)
    }

    pub fn report(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.last.is_some_and(|last| percent <= last) {
            return;
        }
        self.last = Some(percent);
        if let Some(sink) = self.sink.as_deref_mut() {
            sink(percent);
        }
    }

    /// Report `done / total` of the span between `from` and `to`.
    pub fn report_span(&mut self, from: u8, to: u8, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let span = f64::from(to.saturating_sub(from));
        let fraction = (done as f64 / total as f64).min(1.0);
        self.report(from + (span * fraction) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        let mut seen = Vec::new();
        {
            let mut sink = |p: u8| seen.push(p);
            let mut progress = Progress::new(Some(&mut sink));
            progress.report(0);
            progress.report(30);
            progress.report(20);
            progress.report(30);
            progress.report_span(30, 90, 5, 10);
            progress.report(250);
        }
        assert_eq!(seen, vec![0, 30, 60, 100]);
    }

    #[test]
    fn test_silent_progress() {
        let mut progress = Progress::silent();
        progress.report(50);
        progress.report_span(0, 100, 1, 0);
    }
}
