//! Records of the container collection database.
//!
//! Only the columns and JSON keys the pipeline reads are modelled; everything
//! else in a real collection is ignored on import and filled with neutral
//! values on export.

use serde::Deserialize;

use crate::flashcards::CardStatus;

/// Separator between the fields of a note
pub const FIELD_SEPARATOR: char = '\x1f';

/// Every sqlite database starts with this header
pub const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

/// Collection members in order of preference
pub const COLLECTION_MEMBERS: [&str; 2] = ["collection.anki21", "collection.anki2"];

/// Zstd-compressed collection written by newer clients
pub const COMPRESSED_COLLECTION_MEMBER: &str = "collection.anki21b";

/// Name of the built-in deck every collection carries
pub const DEFAULT_DECK_NAME: &str = "Default";

/// Model type of cloze note types
pub const MODEL_TYPE_CLOZE: i64 = 1;

/// Row of the `notes` table
#[derive(Debug, Clone)]
pub struct AnkiNote {
    pub id: i64,
    /// Model id
    pub mid: i64,
    /// Space separated
    pub tags: String,
    /// Field values joined by [`FIELD_SEPARATOR`]
    pub flds: String,
}

impl AnkiNote {
    pub fn fields(&self) -> Vec<&str> {
        self.flds.split(FIELD_SEPARATOR).collect()
    }

    pub fn tag_list(&self) -> Vec<String> {
        self.tags.split_whitespace().map(str::to_string).collect()
    }
}

/// Row of the `cards` table
#[derive(Debug, Clone)]
pub struct AnkiCard {
    pub id: i64,
    pub nid: i64,
    pub did: i64,
    /// Template ordinal (cloze number - 1 for cloze models)
    pub ord: i64,
    /// 0 new, 1 learning, 2 review, 3 relearning
    pub card_type: i64,
    /// -1 suspended, -2/-3 buried, otherwise mirrors the type
    pub queue: i64,
    /// New: position. Learning: epoch seconds. Review: days since collection creation.
    pub due: i64,
    /// Days when positive, seconds when negative
    pub ivl: i64,
    /// Ease in permille
    pub factor: i64,
    pub reps: i64,
    pub lapses: i64,
}

impl AnkiCard {
    /// The card has been studied at least once.
    pub fn has_history(&self) -> bool {
        self.card_type > 0 || self.ivl > 0
    }

    pub fn status(&self) -> CardStatus {
        match self.card_type {
            1 => CardStatus::Learning,
            2 => CardStatus::Review,
            3 => CardStatus::Relearning,
            _ => CardStatus::New,
        }
    }

    /// Last interval in days
    pub fn interval_days(&self) -> f64 {
        if self.ivl < 0 {
            -self.ivl as f64 / 86_400.0
        } else {
            self.ivl as f64
        }
    }
}

/// Card type and queue for a canonical status
pub fn type_and_queue(status: CardStatus) -> (i64, i64) {
    match status {
        CardStatus::New => (0, 0),
        CardStatus::Learning => (1, 1),
        CardStatus::Review => (2, 2),
        CardStatus::Relearning => (3, 1),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnkiField {
    pub name: String,
    pub ord: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnkiTemplate {
    pub name: String,
    pub ord: i64,
    /// Question format
    pub qfmt: String,
    /// Answer format
    pub afmt: String,
}

/// Note type from the `models` JSON of the `col` row
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnkiModel {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: i64,
    pub flds: Vec<AnkiField>,
    pub tmpls: Vec<AnkiTemplate>,
}

impl AnkiModel {
    pub fn is_cloze(&self) -> bool {
        self.model_type == MODEL_TYPE_CLOZE
    }

    /// Template for a card ordinal. Cloze models have a single template.
    pub fn template(&self, ord: i64) -> Option<&AnkiTemplate> {
        if self.is_cloze() {
            return self.tmpls.first();
        }
        self.tmpls
            .iter()
            .find(|t| t.ord == ord)
            .or_else(|| self.tmpls.first())
    }

    /// Field names paired with the note's values, by field ordinal.
    pub fn field_values<'a>(&'a self, note_fields: &[&'a str]) -> Vec<(&'a str, &'a str)> {
        let mut fields: Vec<&AnkiField> = self.flds.iter().collect();
        fields.sort_by_key(|f| f.ord);
        fields
            .into_iter()
            .map(|f| {
                let value = usize::try_from(f.ord)
                    .ok()
                    .and_then(|i| note_fields.get(i))
                    .copied()
                    .unwrap_or("");
                (f.name.as_str(), value)
            })
            .collect()
    }
}

/// Deck from the `decks` JSON of the `col` row
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnkiDeckRecord {
    pub name: String,
    pub desc: String,
}

/// Tables written on export. Mirrors the classic (schema 11) collection.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE col (
    id      integer primary key,
    crt     integer not null,
    mod     integer not null,
    scm     integer not null,
    ver     integer not null,
    dty     integer not null,
    usn     integer not null,
    ls      integer not null,
    conf    text not null,
    models  text not null,
    decks   text not null,
    dconf   text not null,
    tags    text not null
);
CREATE TABLE notes (
    id      integer primary key,
    guid    text not null,
    mid     integer not null,
    mod     integer not null,
    usn     integer not null,
    tags    text not null,
    flds    text not null,
    sfld    integer not null,
    csum    integer not null,
    flags   integer not null,
    data    text not null
);
CREATE TABLE cards (
    id      integer primary key,
    nid     integer not null,
    did     integer not null,
    ord     integer not null,
    mod     integer not null,
    usn     integer not null,
    type    integer not null,
    queue   integer not null,
    due     integer not null,
    ivl     integer not null,
    factor  integer not null,
    reps    integer not null,
    lapses  integer not null,
    left    integer not null,
    odue    integer not null,
    odid    integer not null,
    flags   integer not null,
    data    text not null
);
CREATE TABLE revlog (
    id      integer primary key,
    cid     integer not null,
    usn     integer not null,
    ease    integer not null,
    ivl     integer not null,
    lastIvl integer not null,
    factor  integer not null,
    time    integer not null,
    type    integer not null
);
CREATE TABLE graves (
    usn     integer not null,
    oid     integer not null,
    type    integer not null
);
CREATE INDEX ix_notes_usn on notes (usn);
CREATE INDEX ix_cards_usn on cards (usn);
CREATE INDEX ix_revlog_usn on revlog (usn);
CREATE INDEX ix_cards_nid on cards (nid);
CREATE INDEX ix_cards_sched on cards (did, queue, due);
CREATE INDEX ix_revlog_cid on revlog (cid);
CREATE INDEX ix_notes_csum on notes (csum);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_json() {
        let json = r#"{
            "id": 1342697561419,
            "name": "Basic",
            "type": 0,
            "css": ".card {}",
            "flds": [{"name": "Back", "ord": 1, "sticky": false}, {"name": "Front", "ord": 0}],
            "tmpls": [{"name": "Card 1", "ord": 0, "qfmt": "{{Front}}", "afmt": "{{FrontSide}}<hr id=answer>{{Back}}"}]
        }"#;
        let model: AnkiModel = serde_json::from_str(json).unwrap();
        assert!(!model.is_cloze());
        assert_eq!(model.template(3).unwrap().qfmt, "{{Front}}");

        let note = AnkiNote {
            id: 1,
            mid: 1,
            tags: " geo  europe ".into(),
            flds: "Capital of France?\x1fParis".into(),
        };
        assert_eq!(
            model.field_values(&note.fields()),
            vec![("Front", "Capital of France?"), ("Back", "Paris")]
        );
        assert_eq!(note.tag_list(), vec!["geo", "europe"]);
    }

    #[test]
    fn test_card_history() {
        let mut card = AnkiCard {
            id: 1,
            nid: 1,
            did: 1,
            ord: 0,
            card_type: 0,
            queue: 0,
            due: 3,
            ivl: 0,
            factor: 0,
            reps: 0,
            lapses: 0,
        };
        assert!(!card.has_history());
        assert_eq!(card.status(), CardStatus::New);

        card.card_type = 1;
        card.ivl = -600;
        assert!(card.has_history());
        assert!((card.interval_days() - 600.0 / 86_400.0).abs() < 1e-9);

        assert_eq!(type_and_queue(CardStatus::Relearning), (3, 1));
    }
}
