//! Data models for the flashcard system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::algorithm::SchedulerError;

/// Per-deck study settings. Only `new_cards_per_day` and `max_reviews`
/// bound a study session; the rest is passed through for the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeckSettings {
    pub new_cards_per_day: u32,
    pub max_reviews: u32,
    pub show_answer_timer: bool,
    pub auto_advance: bool,
}

impl Default for DeckSettings {
    fn default() -> Self {
        Self {
            new_cards_per_day: 20,
            max_reviews: 200,
            show_answer_timer: true,
            auto_advance: false,
        }
    }
}

/// A named collection of cards.
///
/// The three counters are a cache: they can always be recomputed from the
/// member cards with [`Deck::recount`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub card_count: usize,
    #[serde(default)]
    pub new_card_count: usize,
    #[serde(default)]
    pub due_card_count: usize,
    #[serde(default)]
    pub settings: DeckSettings,
}

impl Deck {
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            description: None,
            created_at: now,
            updated_at: now,
            card_count: 0,
            new_card_count: 0,
            due_card_count: 0,
            settings: DeckSettings::default(),
        }
    }

    /// Recompute the derived counters from the cards that belong to this deck.
    /// Cards of other decks in `cards` are ignored.
    pub fn recount(&mut self, cards: &[Card], now: DateTime<Utc>) {
        let members = cards.iter().filter(|c| c.deck_id == self.id);
        let (mut total, mut new, mut due) = (0, 0, 0);
        for card in members {
            total += 1;
            if card.state == CardStatus::New {
                new += 1;
            }
            if card.due <= now {
                due += 1;
            }
        }
        self.card_count = total;
        self.new_card_count = new;
        self.due_card_count = due;
    }
}

/// Status of a card in the spaced repetition system.
///
/// Serialized as its numeric code (0-3) to stay compatible with existing
/// JSON dumps; the lowercase name is accepted when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "StatusRepr", into = "u8")]
pub enum CardStatus {
    /// Never reviewed
    #[default]
    New,
    /// In initial learning phase
    Learning,
    /// Regular spaced review
    Review,
    /// Failed and re-learning
    Relearning,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatusRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<StatusRepr> for CardStatus {
    type Error = String;

    fn try_from(repr: StatusRepr) -> Result<Self, Self::Error> {
        match repr {
            StatusRepr::Code(0) => Ok(Self::New),
            StatusRepr::Code(1) => Ok(Self::Learning),
            StatusRepr::Code(2) => Ok(Self::Review),
            StatusRepr::Code(3) => Ok(Self::Relearning),
            StatusRepr::Code(n) => Err(format!("unknown card state {}", n)),
            StatusRepr::Name(name) => match name.to_lowercase().as_str() {
                "new" => Ok(Self::New),
                "learning" => Ok(Self::Learning),
                "review" => Ok(Self::Review),
                "relearning" => Ok(Self::Relearning),
                other => Err(format!("unknown card state '{}'", other)),
            },
        }
    }
}

impl From<CardStatus> for u8 {
    fn from(status: CardStatus) -> Self {
        match status {
            CardStatus::New => 0,
            CardStatus::Learning => 1,
            CardStatus::Review => 2,
            CardStatus::Relearning => 3,
        }
    }
}

impl std::fmt::Display for CardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "New",
            Self::Learning => "Learning",
            Self::Review => "Review",
            Self::Relearning => "Relearning",
        };
        f.write_str(name)
    }
}

/// Self-reported recall quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Grade {
    pub const ALL: [Grade; 4] = [Grade::Again, Grade::Hard, Grade::Good, Grade::Easy];

    /// Ordinal value 1-4
    pub fn value(self) -> u8 {
        self as u8
    }

    fn index(self) -> usize {
        self as usize - 1
    }

    pub(crate) fn slot<T>(self, values: &[T; 4]) -> &T {
        &values[self.index()]
    }
}

impl TryFrom<i64> for Grade {
    type Error = SchedulerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Again),
            2 => Ok(Self::Hard),
            3 => Ok(Self::Good),
            4 => Ok(Self::Easy),
            other => Err(SchedulerError::InvalidGrade(other)),
        }
    }
}

impl std::str::FromStr for Grade {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "again" => Ok(Self::Again),
            "hard" => Ok(Self::Hard),
            "good" => Ok(Self::Good),
            "easy" => Ok(Self::Easy),
            other => other
                .parse::<i64>()
                .map_err(|_| SchedulerError::UnknownGrade(s.to_string()))
                .and_then(Self::try_from),
        }
    }
}

/// Kind of embedded media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Audio,
    Video,
}

impl MediaType {
    /// Guess the media type from a filename extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = filename.rsplit_once('.')?.1.to_lowercase();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "bmp" | "tif" | "tiff" | "avif" => {
                Some(Self::Image)
            }
            "mp3" | "ogg" | "oga" | "wav" | "m4a" | "aac" | "flac" | "opus" | "spx" => {
                Some(Self::Audio)
            }
            "mp4" | "webm" | "mov" | "mkv" | "ogv" | "avi" | "m4v" => Some(Self::Video),
            _ => None,
        }
    }
}

/// A binary asset referenced by a card. Lives and dies with its card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub filename: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "type")]
    pub media_type: MediaType,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// A flashcard with question (front), answer (back) and its scheduling state.
///
/// The scheduling fields are owned by [`Scheduler`](super::algorithm::Scheduler);
/// other code only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: Uuid,
    pub deck_id: Uuid,
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaFile>,

    #[serde(default)]
    pub state: CardStatus,
    pub due: DateTime<Utc>,
    /// Days until retention drops to 90%
    #[serde(default)]
    pub stability: f64,
    #[serde(default)]
    pub difficulty: f64,
    #[serde(default, rename = "elapsed_days")]
    pub elapsed_days: f64,
    #[serde(default, rename = "scheduled_days")]
    pub scheduled_days: f64,
    /// Index of the current (re)learning step
    #[serde(default, rename = "learning_steps")]
    pub learning_steps: u32,
    #[serde(default)]
    pub reps: u32,
    #[serde(default)]
    pub lapses: u32,
    #[serde(default, rename = "last_review", skip_serializing_if = "Option::is_none")]
    pub last_review: Option<DateTime<Utc>>,
}

impl Card {
    /// Add a tag unless an equal one (case-insensitive) is already present.
    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if tag.is_empty() || self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            return;
        }
        self.tags.push(tag.to_string());
    }
}

/// Statistics for a deck or all decks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    pub total_cards: usize,
    pub new_cards: usize,
    pub learning_cards: usize,
    pub review_cards: usize,
    pub due_cards: usize,
    /// Review cards with stability above three weeks
    pub mature_cards: usize,
}
