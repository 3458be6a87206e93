use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Seek, Write};

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use zip::ZipArchive;

use super::schema::*;
use super::template::{render_answer, render_question, RenderContext};
use crate::interchange::error::{ImportError, Result};
use crate::interchange::media::MediaLibrary;
use crate::interchange::records::{ParsedDeck, ParsedRecord, Progress, SourceHistory};

/// Learning cards store their due time as epoch seconds, review cards as days
const EPOCH_SECONDS_THRESHOLD: i64 = 1_000_000_000;

/// Collection-level metadata from the `col` row.
#[derive(Debug, Default)]
struct Collection {
    /// Creation time, epoch seconds
    crt: Option<i64>,
    models: HashMap<String, AnkiModel>,
    decks: BTreeMap<String, AnkiDeckRecord>,
}

/// Parse a container package into records.
///
/// Media is loaded first and returned alongside the records; nothing is
/// rewritten here. A package whose collection cannot be opened fails as a
/// whole with [`ImportError::MalformedContainer`].
pub fn parse_package(bytes: &[u8], now: DateTime<Utc>, progress: &mut Progress<'_>) -> Result<ParsedDeck> {
    progress.report(0);
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let media = MediaLibrary::from_archive(&mut archive);
    progress.report(10);

    let collection_bytes = read_collection(&mut archive)?;
    if !collection_bytes.starts_with(SQLITE_MAGIC) {
        return Err(ImportError::MalformedContainer(
            "collection is not an SQLite database".to_string(),
        ));
    }

    // rusqlite opens databases by path
    let mut db_file = tempfile::NamedTempFile::new()?;
    db_file.write_all(&collection_bytes)?;
    db_file.flush()?;
    let conn = Connection::open_with_flags(db_file.path(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    progress.report(20);

    let mut parsed = ParsedDeck {
        media: Some(media),
        ..Default::default()
    };

    let collection = read_collection_row(&conn, &mut parsed)?;
    let notes = read_notes(&conn)?;
    let cards = read_cards(&conn)?;
    progress.report(30);

    log::info!(
        "Package holds {} notes, {} cards, {} models",
        notes.len(),
        cards.len(),
        collection.models.len()
    );

    for (index, card) in cards.iter().enumerate() {
        if let Some(record) = card_record(card, &notes, &collection, now, &mut parsed) {
            parsed.records.push(record);
        }
        progress.report_span(30, 90, index + 1, cards.len());
    }

    parsed.deck_name = deck_name(&cards, &collection);
    progress.report(90);
    Ok(parsed)
}

fn read_collection<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<u8>> {
    for member in COLLECTION_MEMBERS {
        let Ok(mut file) = archive.by_name(member) else {
            continue;
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        log::debug!("Using collection member {}", member);
        return Ok(data);
    }

    if archive.by_name(COMPRESSED_COLLECTION_MEMBER).is_ok() {
        return Err(ImportError::MalformedContainer(
            "only a compressed collection (collection.anki21b) is present, export with \"Support older Anki versions\" enabled"
                .to_string(),
        ));
    }
    Err(ImportError::MalformedContainer(
        "no collection database in archive".to_string(),
    ))
}

fn read_collection_row(conn: &Connection, parsed: &mut ParsedDeck) -> Result<Collection> {
    let row = conn
        .query_row("SELECT crt, models, decks FROM col LIMIT 1", [], |row| {
            Ok((
                row.get::<_, Option<i64>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })
        .optional()?;

    let Some((crt, models, decks)) = row else {
        parsed.warn("Collection has no metadata row; note types are unknown".to_string());
        return Ok(Collection::default());
    };

    let models = match serde_json::from_str(models.as_deref().unwrap_or("{}")) {
        Ok(models) => models,
        Err(e) => {
            parsed.warn(format!("Could not parse note types: {}", e));
            HashMap::new()
        }
    };
    let decks = match serde_json::from_str(decks.as_deref().unwrap_or("{}")) {
        Ok(decks) => decks,
        Err(e) => {
            parsed.warn(format!("Could not parse deck list: {}", e));
            BTreeMap::new()
        }
    };

    Ok(Collection {
        crt: crt.filter(|c| *c > 0),
        models,
        decks,
    })
}

fn read_notes(conn: &Connection) -> Result<HashMap<i64, AnkiNote>> {
    let mut stmt = conn.prepare("SELECT id, mid, tags, flds FROM notes")?;
    let notes = stmt
        .query_map([], |row| {
            Ok(AnkiNote {
                id: row.get(0)?,
                mid: row.get(1)?,
                tags: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                flds: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(notes.into_iter().map(|n| (n.id, n)).collect())
}

fn read_cards(conn: &Connection) -> Result<Vec<AnkiCard>> {
    let mut stmt = conn.prepare(
        "SELECT id, nid, did, ord, type, queue, due, ivl, factor, reps, lapses FROM cards ORDER BY nid, ord",
    )?;
    let cards = stmt
        .query_map([], |row| {
            Ok(AnkiCard {
                id: row.get(0)?,
                nid: row.get(1)?,
                did: row.get(2)?,
                ord: row.get(3)?,
                card_type: row.get(4)?,
                queue: row.get(5)?,
                due: row.get(6)?,
                ivl: row.get(7)?,
                factor: row.get(8)?,
                reps: row.get(9)?,
                lapses: row.get(10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(cards)
}

fn card_record(
    card: &AnkiCard,
    notes: &HashMap<i64, AnkiNote>,
    collection: &Collection,
    now: DateTime<Utc>,
    parsed: &mut ParsedDeck,
) -> Option<ParsedRecord> {
    let Some(note) = notes.get(&card.nid) else {
        parsed.skip(format!("Card {} references missing note {}", card.id, card.nid));
        return None;
    };
    let Some(model) = collection.models.get(&note.mid.to_string()) else {
        parsed.skip(format!("Note {} uses unknown note type {}", note.id, note.mid));
        return None;
    };
    let Some(template) = model.template(card.ord) else {
        parsed.skip(format!("Note type {} has no card templates", model.name));
        return None;
    };

    let note_fields = note.fields();
    let fields = model.field_values(&note_fields);
    let deck = collection
        .decks
        .get(&card.did.to_string())
        .map_or("", |d| d.name.as_str());
    let ctx = RenderContext {
        fields: &fields,
        tags: &note.tags,
        deck,
        cloze: model.is_cloze().then_some(card.ord + 1),
    };

    let front = render_question(&template.qfmt, &ctx);
    let back = render_answer(&template.afmt, &ctx, &front);
    if front.trim().is_empty() {
        parsed.skip(format!("Card {} renders an empty question", card.id));
        return None;
    }

    log::debug!("Card {} from note {} ({})", card.id, note.id, model.name);
    Some(ParsedRecord {
        front,
        back,
        tags: note.tag_list(),
        history: source_history(card, collection.crt, now, parsed),
    })
}

/// Review history worth carrying over, if the card has any. A due value
/// outside the representable range drops the history with a warning.
fn source_history(
    card: &AnkiCard,
    crt: Option<i64>,
    now: DateTime<Utc>,
    parsed: &mut ParsedDeck,
) -> Option<SourceHistory> {
    if !card.has_history() {
        return None;
    }
    let Some(due) = due_instant(card.due, crt, now) else {
        parsed.warn(format!(
            "Card {} has an out of range due value {}, importing it as new",
            card.id, card.due
        ));
        return None;
    };
    Some(SourceHistory {
        state: card.status(),
        reps: u32::try_from(card.reps).unwrap_or(0),
        lapses: u32::try_from(card.lapses).unwrap_or(0),
        due,
        interval_days: card.interval_days(),
    })
}

/// Convert a stored due value into an instant.
///
/// Values past [`EPOCH_SECONDS_THRESHOLD`] are epoch seconds (learning cards).
/// Smaller ones count days from collection creation and are placed relative
/// to the collection's "today" at import time. Without a creation time they
/// are taken as days since the epoch. `None` when the result is not a
/// representable instant.
fn due_instant(due: i64, crt: Option<i64>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if due > EPOCH_SECONDS_THRESHOLD {
        return DateTime::from_timestamp(due, 0);
    }
    match crt {
        Some(crt) => {
            let today = now.timestamp().checked_sub(crt)?.div_euclid(86_400);
            let offset = TimeDelta::try_days(due.checked_sub(today)?)?;
            now.checked_add_signed(offset)
        }
        None => DateTime::from_timestamp(due.checked_mul(86_400)?, 0),
    }
}

/// Name of the deck most cards live in, unless that is the built-in deck.
fn deck_name(cards: &[AnkiCard], collection: &Collection) -> Option<String> {
    let mut usage: BTreeMap<i64, usize> = BTreeMap::new();
    for card in cards {
        *usage.entry(card.did).or_default() += 1;
    }
    let busiest = usage
        .iter()
        .max_by_key(|(_, count)| **count)
        .and_then(|(did, _)| collection.decks.get(&did.to_string()));

    busiest
        .into_iter()
        .chain(collection.decks.values())
        .map(|d| d.name.trim())
        .find(|name| !name.is_empty() && *name != DEFAULT_DECK_NAME)
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;
    use crate::flashcards::CardStatus;

    /// Build a package the way the desktop client writes one.
    pub(crate) fn build_package(
        collection_member: &str,
        setup: impl FnOnce(&Connection),
        media: &[(&str, &[u8])],
    ) -> Vec<u8> {
        let db_file = tempfile::NamedTempFile::new().unwrap();
        {
            let conn = Connection::open(db_file.path()).unwrap();
            conn.execute_batch(SCHEMA_SQL).unwrap();
            setup(&conn);
        }
        let db_bytes = std::fs::read(db_file.path()).unwrap();

        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buf);
            let options = SimpleFileOptions::default();
            zip.start_file(collection_member, options).unwrap();
            zip.write_all(&db_bytes).unwrap();
            let mut map = serde_json::Map::new();
            for (i, (name, data)) in media.iter().enumerate() {
                zip.start_file(i.to_string(), options).unwrap();
                zip.write_all(data).unwrap();
                map.insert(i.to_string(), json!(name));
            }
            zip.start_file("media", options).unwrap();
            zip.write_all(serde_json::Value::Object(map).to_string().as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    fn insert_col(conn: &Connection, crt: i64) {
        let models = json!({
            "100": {
                "name": "Basic",
                "type": 0,
                "flds": [{"name": "Front", "ord": 0}, {"name": "Back", "ord": 1}],
                "tmpls": [{"name": "Card 1", "ord": 0, "qfmt": "{{Front}}",
                           "afmt": "{{FrontSide}}<hr id=answer>{{Back}}"}]
            },
            "200": {
                "name": "Cloze",
                "type": 1,
                "flds": [{"name": "Text", "ord": 0}, {"name": "Extra", "ord": 1}],
                "tmpls": [{"name": "Cloze", "ord": 0, "qfmt": "{{cloze:Text}}",
                           "afmt": "{{cloze:Text}}<br>{{Extra}}"}]
            }
        });
        let decks = json!({
            "1": {"id": 1, "name": "Default"},
            "42": {"id": 42, "name": "Geography"}
        });
        conn.execute(
            "INSERT INTO col VALUES (1, ?1, 0, 0, 11, 0, 0, 0, '{}', ?2, ?3, '{}', '{}')",
            rusqlite::params![crt, models.to_string(), decks.to_string()],
        )
        .unwrap();
    }

    fn insert_note(conn: &Connection, id: i64, mid: i64, tags: &str, fields: &[&str]) {
        conn.execute(
            "INSERT INTO notes VALUES (?1, ?2, ?3, 0, 0, ?4, ?5, '', 0, 0, '')",
            rusqlite::params![id, format!("g{}", id), mid, tags, fields.join("\x1f")],
        )
        .unwrap();
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_card(conn: &Connection, id: i64, nid: i64, ord: i64, card_type: i64, due: i64, ivl: i64, reps: i64, lapses: i64) {
        conn.execute(
            "INSERT INTO cards VALUES (?1, ?2, 42, ?3, 0, 0, ?4, ?4, ?5, ?6, 2500, ?7, ?8, 0, 0, 0, 0, '')",
            rusqlite::params![id, nid, ord, card_type, due, ivl, reps, lapses],
        )
        .unwrap();
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_basic_package() {
        let crt = now().timestamp() - 100 * 86_400;
        let bytes = build_package(
            "collection.anki2",
            |conn| {
                insert_col(conn, crt);
                insert_note(conn, 1, 100, " geo europe ", &["Capital of France?", "Paris [sound:paris.mp3]"]);
                insert_note(conn, 2, 100, "", &["Capital of Spain?", "Madrid"]);
                insert_card(conn, 11, 1, 0, 0, 1, 0, 0, 0);
                // Review card due five days after "today"
                insert_card(conn, 12, 2, 0, 2, 105, 12, 7, 1);
            },
            &[("paris.mp3", b"ID3")],
        );

        let mut seen = Vec::new();
        let mut sink = |p: u8| seen.push(p);
        let mut progress = Progress::new(Some(&mut sink));
        let parsed = parse_package(&bytes, now(), &mut progress).unwrap();

        assert_eq!(parsed.deck_name.as_deref(), Some("Geography"));
        assert_eq!(parsed.records.len(), 2);
        assert!(parsed.warnings.is_empty());
        assert_eq!(parsed.media.as_ref().unwrap().get("paris.mp3"), Some(&b"ID3"[..]));

        let first = &parsed.records[0];
        assert_eq!(first.front, "Capital of France?");
        assert_eq!(first.back, "Paris [sound:paris.mp3]");
        assert_eq!(first.tags, vec!["geo", "europe"]);
        assert!(first.history.is_none());

        let history = parsed.records[1].history.as_ref().unwrap();
        assert_eq!(history.state, CardStatus::Review);
        assert_eq!(history.reps, 7);
        assert_eq!(history.lapses, 1);
        assert_eq!(history.interval_days, 12.0);
        assert_eq!(history.due, now() + Duration::days(5));

        drop(progress);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.first(), Some(&0));
    }

    #[test]
    fn test_prefers_newer_collection_and_renders_cloze() {
        let bytes = build_package(
            "collection.anki21",
            |conn| {
                insert_col(conn, now().timestamp());
                insert_note(conn, 1, 200, "", &["{{c1::Paris}} is in {{c2::France}}", "extra"]);
                insert_card(conn, 11, 1, 0, 0, 1, 0, 0, 0);
                insert_card(conn, 12, 1, 1, 0, 2, 0, 0, 0);
            },
            &[],
        );
        let parsed = parse_package(&bytes, now(), &mut Progress::silent()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].front, "<b>[...]</b> is in France");
        assert_eq!(parsed.records[0].back, "<b>Paris</b> is in France<br>extra");
        assert_eq!(parsed.records[1].front, "Paris is in <b>[...]</b>");
    }

    #[test]
    fn test_missing_note_and_model_are_skipped() {
        let bytes = build_package(
            "collection.anki2",
            |conn| {
                insert_col(conn, now().timestamp());
                insert_note(conn, 1, 999, "", &["Orphan", "type"]);
                insert_note(conn, 2, 100, "", &["Good", "card"]);
                insert_card(conn, 11, 1, 0, 0, 1, 0, 0, 0);
                insert_card(conn, 12, 2, 0, 0, 2, 0, 0, 0);
                insert_card(conn, 13, 77, 0, 0, 3, 0, 0, 0);
            },
            &[],
        );
        let parsed = parse_package(&bytes, now(), &mut Progress::silent()).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].front, "Good");
        assert_eq!(parsed.warnings.len(), 2);
        assert_eq!(parsed.skipped, 2);
    }

    #[test]
    fn test_unreadable_collection() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buf);
            zip.start_file("collection.anki2", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"definitely not sqlite").unwrap();
            zip.finish().unwrap();
        }
        let err = parse_package(&buf.into_inner(), now(), &mut Progress::silent()).unwrap_err();
        assert!(matches!(err, ImportError::MalformedContainer(_)));

        let err = parse_package(b"PK\x03\x04 truncated", now(), &mut Progress::silent()).unwrap_err();
        assert!(matches!(err, ImportError::MalformedContainer(_)));

        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buf);
            zip.start_file("media", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"{}").unwrap();
            zip.finish().unwrap();
        }
        let err = parse_package(&buf.into_inner(), now(), &mut Progress::silent()).unwrap_err();
        assert!(err.to_string().contains("no collection database"));
    }

    #[test]
    fn test_due_instant() {
        let crt = now().timestamp() - 10 * 86_400;
        assert_eq!(due_instant(8, Some(crt), now()), Some(now() - Duration::days(2)));
        assert_eq!(
            due_instant(1_710_000_000, Some(crt), now()),
            DateTime::from_timestamp(1_710_000_000, 0)
        );
        assert_eq!(
            due_instant(19_000, None, now()),
            DateTime::from_timestamp(19_000 * 86_400, 0)
        );
    }

    #[test]
    fn test_due_instant_out_of_range() {
        let crt = now().timestamp() - 10 * 86_400;
        assert_eq!(due_instant(900_000_000, Some(crt), now()), None);
        assert_eq!(due_instant(-900_000_000, Some(crt), now()), None);
        assert_eq!(due_instant(900_000_000, None, now()), None);
        assert_eq!(due_instant(i64::MIN, Some(crt), now()), None);
    }

    #[test]
    fn test_out_of_range_due_imports_as_new() {
        let crt = now().timestamp() - 10 * 86_400;
        let bytes = build_package(
            "collection.anki2",
            |conn| {
                insert_col(conn, crt);
                insert_note(conn, 1, 100, "", &["Far future", "card"]);
                insert_card(conn, 11, 1, 0, 2, 900_000_000, 5, 3, 0);
            },
            &[],
        );
        let parsed = parse_package(&bytes, now(), &mut Progress::silent()).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert!(parsed.records[0].history.is_none());
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].contains("900000000"));
    }
}
