//! Plain text: non-empty lines alternate between front and back.

use super::records::{ParsedDeck, ParsedRecord, Progress};

pub fn parse_plain_text(text: &str, progress: &mut Progress<'_>) -> ParsedDeck {
    progress.report(0);
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut parsed = ParsedDeck::default();
    let pairs = lines.chunks(2);
    let total = pairs.len();

    for (index, pair) in pairs.enumerate() {
        match pair {
            [front, back] => parsed.records.push(ParsedRecord {
                front: front.to_string(),
                back: back.to_string(),
                ..Default::default()
            }),
            [front] => parsed.skip(format!("Discarding unpaired last line {:?}", front)),
            _ => {}
        }
        progress.report_span(5, 90, index + 1, total);
    }

    log::info!("Parsed {} records from plain text", parsed.records.len());
    progress.report(90);
    parsed
}
