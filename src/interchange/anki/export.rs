use std::io::{Cursor, Write};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::json;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::schema::*;
use crate::flashcards::{Card, CardStatus, Deck, MediaFile};
use crate::interchange::error::ExportError;
use crate::interchange::html::to_plain_text;
use crate::interchange::media::{to_references, MEDIA_MAP_MEMBER};

/// Member the collection database is written to
const EXPORT_COLLECTION_MEMBER: &str = "collection.anki2";

const MODEL_NAME: &str = "Basic (flashdeck)";
const FRONT_TEMPLATE: &str = "{{Front}}";
const BACK_TEMPLATE: &str = "{{FrontSide}}\n\n<hr id=answer>\n\n{{Back}}";

/// Neutral ease written for studied cards, in permille
const DEFAULT_FACTOR: i64 = 2500;

/// Write a deck and its cards as a container package.
///
/// One Basic note and one card per canonical card. Embedded media goes back
/// into numbered archive members listed in the `media` map.
pub fn export_package(deck: &Deck, cards: &[Card], now: DateTime<Utc>) -> Result<Vec<u8>, ExportError> {
    let collection = write_collection(deck, cards, now)?;

    let mut buf = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(&mut buf);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(EXPORT_COLLECTION_MEMBER, options)?;
    zip.write_all(&collection)?;

    let media = collect_media(cards);
    let mut media_map = serde_json::Map::new();
    for (index, file) in media.iter().enumerate() {
        let member = index.to_string();
        zip.start_file(member.as_str(), options)?;
        zip.write_all(&file.data)?;
        media_map.insert(member, json!(file.filename));
    }
    zip.start_file(MEDIA_MAP_MEMBER, options)?;
    zip.write_all(serde_json::to_string(&media_map)?.as_bytes())?;

    zip.finish()?;
    log::info!(
        "Exported deck {} as package: {} cards, {} media files",
        deck.name,
        cards.len(),
        media.len()
    );
    Ok(buf.into_inner())
}

fn write_collection(deck: &Deck, cards: &[Card], now: DateTime<Utc>) -> Result<Vec<u8>, ExportError> {
    let db_file = tempfile::NamedTempFile::new()?;
    {
        let conn = Connection::open(db_file.path())?;
        conn.execute_batch(SCHEMA_SQL)?;

        let ids = IdBase::new(now);
        let crt = ids.crt;

        conn.execute(
            "INSERT INTO col VALUES (1, ?1, ?2, ?3, 11, 0, 0, 0, ?4, ?5, ?6, ?7, '{}')",
            params![
                crt,
                now.timestamp(),
                ids.millis,
                collection_conf(ids.deck).to_string(),
                models_json(&ids).to_string(),
                decks_json(deck, &ids).to_string(),
                deck_conf_json().to_string(),
            ],
        )?;

        let mut note_stmt = conn.prepare(
            "INSERT INTO notes VALUES (?1, ?2, ?3, ?4, -1, ?5, ?6, ?7, ?8, 0, '')",
        )?;
        let mut card_stmt = conn.prepare(
            "INSERT INTO cards VALUES (?1, ?2, ?3, 0, ?4, -1, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, 0, 0, 0, '')",
        )?;

        for (index, card) in cards.iter().enumerate() {
            let id = ids.millis + index as i64;
            let front = to_references(&card.front);
            let back = to_references(&card.back);
            let sort_field = to_plain_text(&front);
            let tags = if card.tags.is_empty() {
                String::new()
            } else {
                format!(" {} ", card.tags.iter().map(|t| t.replace(' ', "_")).collect::<Vec<_>>().join(" "))
            };

            note_stmt.execute(params![
                id,
                guid(card),
                ids.model,
                card.updated_at.timestamp(),
                tags,
                format!("{}{}{}", front, FIELD_SEPARATOR, back),
                sort_field,
                checksum(&sort_field),
            ])?;

            let scheduling = Scheduling::of(card, index, crt);
            card_stmt.execute(params![
                id,
                id,
                ids.deck,
                card.updated_at.timestamp(),
                scheduling.card_type,
                scheduling.queue,
                scheduling.due,
                scheduling.ivl,
                scheduling.factor,
                card.reps,
                card.lapses,
            ])?;
        }
    }
    Ok(std::fs::read(db_file.path())?)
}

/// Ids derived from the export time, the way the desktop client mints them.
struct IdBase {
    millis: i64,
    /// Collection creation, start of the current UTC day
    crt: i64,
    model: i64,
    deck: i64,
}

impl IdBase {
    fn new(now: DateTime<Utc>) -> Self {
        let millis = now.timestamp_millis();
        Self {
            millis,
            crt: now.timestamp() - now.timestamp().rem_euclid(86_400),
            model: millis + 1,
            deck: millis + 2,
        }
    }
}

/// Stored scheduling columns of one card.
struct Scheduling {
    card_type: i64,
    queue: i64,
    due: i64,
    ivl: i64,
    factor: i64,
}

impl Scheduling {
    fn of(card: &Card, position: usize, crt: i64) -> Self {
        let (card_type, queue) = type_and_queue(card.state);
        match card.state {
            CardStatus::New => Self {
                card_type,
                queue,
                due: position as i64 + 1,
                ivl: 0,
                factor: 0,
            },
            CardStatus::Learning | CardStatus::Relearning => Self {
                card_type,
                queue,
                due: card.due.timestamp(),
                ivl: 0,
                factor: DEFAULT_FACTOR,
            },
            CardStatus::Review => Self {
                card_type,
                queue,
                due: (card.due.timestamp() - crt).div_euclid(86_400),
                ivl: (card.scheduled_days.round() as i64).max(1),
                factor: DEFAULT_FACTOR,
            },
        }
    }
}

fn guid(card: &Card) -> String {
    card.id.simple().to_string()[..10].to_string()
}

/// First 32 bits of the sort field digest, used for duplicate checks
fn checksum(sort_field: &str) -> i64 {
    let digest = Sha256::digest(sort_field.as_bytes());
    i64::from(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
}

fn collect_media(cards: &[Card]) -> Vec<&MediaFile> {
    let mut media: Vec<&MediaFile> = Vec::new();
    for file in cards.iter().flat_map(|c| c.media.iter()) {
        if !media.iter().any(|m| m.filename == file.filename) {
            media.push(file);
        }
    }
    media
}

fn collection_conf(deck_id: i64) -> serde_json::Value {
    json!({
        "activeDecks": [deck_id],
        "curDeck": deck_id,
        "newSpread": 0,
        "collapseTime": 1200,
        "timeLim": 0,
        "estTimes": true,
        "dueCounts": true,
        "curModel": null,
        "nextPos": 1,
        "sortType": "noteFld",
        "sortBackwards": false,
        "addToCur": true
    })
}

fn models_json(ids: &IdBase) -> serde_json::Value {
    let field = |name: &str, ord: i64| {
        json!({"name": name, "ord": ord, "sticky": false, "rtl": false, "font": "Arial", "size": 20, "media": []})
    };
    json!({
        ids.model.to_string(): {
            "id": ids.model,
            "name": MODEL_NAME,
            "type": 0,
            "mod": ids.crt,
            "usn": -1,
            "sortf": 0,
            "did": ids.deck,
            "tmpls": [{
                "name": "Card 1",
                "ord": 0,
                "qfmt": FRONT_TEMPLATE,
                "afmt": BACK_TEMPLATE,
                "bqfmt": "",
                "bafmt": "",
                "did": null
            }],
            "flds": [field("Front", 0), field("Back", 1)],
            "css": ".card {\n font-family: arial;\n font-size: 20px;\n text-align: center;\n}\n",
            "latexPre": "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\begin{document}\n",
            "latexPost": "\\end{document}",
            "req": [[0, "any", [0]]],
            "tags": [],
            "vers": []
        }
    })
}

fn deck_record(id: i64, name: &str, desc: &str, mtime: i64) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "desc": desc,
        "mod": mtime,
        "usn": -1,
        "conf": 1,
        "dyn": 0,
        "collapsed": false,
        "extendNew": 10,
        "extendRev": 50,
        "newToday": [0, 0],
        "revToday": [0, 0],
        "lrnToday": [0, 0],
        "timeToday": [0, 0]
    })
}

fn decks_json(deck: &Deck, ids: &IdBase) -> serde_json::Value {
    json!({
        "1": deck_record(1, DEFAULT_DECK_NAME, "", ids.crt),
        ids.deck.to_string(): deck_record(
            ids.deck,
            &deck.name,
            deck.description.as_deref().unwrap_or_default(),
            deck.updated_at.timestamp(),
        ),
    })
}

fn deck_conf_json() -> serde_json::Value {
    json!({
        "1": {
            "id": 1,
            "name": "Default",
            "usn": -1,
            "maxTaken": 60,
            "autoplay": true,
            "timer": 0,
            "replayq": true,
            "dyn": false,
            "new": {"delays": [1, 10], "ints": [1, 4, 7], "initialFactor": DEFAULT_FACTOR, "order": 1, "perDay": 20},
            "rev": {"perDay": 200, "ease4": 1.3, "fuzz": 0.05, "maxIvl": 36500, "hardFactor": 1.2},
            "lapse": {"delays": [10], "mult": 0, "minInt": 1, "leechFails": 8, "leechAction": 0}
        }
    })
}
