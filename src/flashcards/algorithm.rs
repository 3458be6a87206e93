//! FSRS spaced repetition scheduler
//!
//! Memory model with two numbers per card:
//! - stability: days until recall probability falls to 90%
//! - difficulty: 1-10, how hard it is to raise stability
//!
//! Retrievability follows `R(t, S) = 0.9^(t/S)`, so the next interval for
//! a target retention `r` is `S * ln(r) / ln(0.9)`.
//!
//! Grades (1-4):
//! - 1 Again: forgot
//! - 2 Hard: recalled with serious difficulty
//! - 3 Good: recalled after hesitation
//! - 4 Easy: perfect recall
//!
//! Every call is a pure function of its arguments. Interval fuzz is seeded
//! from the card id, its repetition count and the review instant.

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use super::models::{Card, CardStatus, Deck, Grade};

/// FSRS-5 default weights
pub const DEFAULT_WEIGHTS: [f64; 19] = [
    0.40255, 1.18385, 3.173, 15.69105, 7.1949, 0.5345, 1.4604, 0.0046, 1.54575, 0.1192, 1.01925,
    1.9395, 0.11, 0.29605, 2.2698, 0.2315, 2.9898, 0.51655, 0.6621,
];

/// Retention at `t == S`
const BASE_RETENTION: f64 = 0.9;
const MIN_STABILITY: f64 = 0.01;
const MIN_DIFFICULTY: f64 = 1.0;
const MAX_DIFFICULTY: f64 = 10.0;
const MINUTES_PER_DAY: f64 = 1440.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// (start, end, factor) bands for interval fuzz
const FUZZ_RANGES: [(f64, f64, f64); 3] = [
    (2.5, 7.0, 0.15),
    (7.0, 20.0, 0.1),
    (20.0, f64::INFINITY, 0.05),
];

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid grade: {0} (expected 1-4)")]
    InvalidGrade(i64),

    #[error("Unknown grade: {0}")]
    UnknownGrade(String),

    #[error("Invalid scheduler parameters: {0}")]
    InvalidParams(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Tunable parameters of the memory model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerParams {
    pub weights: [f64; 19],
    /// Target probability of recall at the due date
    pub request_retention: f64,
    /// Interval cap in days
    pub maximum_interval: u32,
    pub enable_fuzz: bool,
    /// Learning steps in minutes
    pub learning_steps: Vec<u32>,
    /// Relearning steps in minutes
    pub relearning_steps: Vec<u32>,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            weights: DEFAULT_WEIGHTS,
            request_retention: 0.9,
            maximum_interval: 36_500,
            enable_fuzz: true,
            learning_steps: vec![1, 10],
            relearning_steps: vec![10],
        }
    }
}

impl SchedulerParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.request_retention > 0.0 && self.request_retention < 1.0) {
            return Err(SchedulerError::InvalidParams(format!(
                "request_retention must be in (0, 1), got {}",
                self.request_retention
            )));
        }
        if self.maximum_interval == 0 {
            return Err(SchedulerError::InvalidParams(
                "maximum_interval must be positive".into(),
            ));
        }
        if let Some((i, w)) = self
            .weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(SchedulerError::InvalidParams(format!(
                "weight {} must be finite and non-negative, got {}",
                i, w
            )));
        }
        // These keep successful reviews growing stability.
        for i in [10, 17, 18] {
            if self.weights[i] <= 0.0 {
                return Err(SchedulerError::InvalidParams(format!(
                    "weight {} must be positive",
                    i
                )));
            }
        }
        for (name, steps) in [
            ("learning_steps", &self.learning_steps),
            ("relearning_steps", &self.relearning_steps),
        ] {
            if steps.is_empty() {
                return Err(SchedulerError::InvalidParams(format!("{} is empty", name)));
            }
            if steps.iter().any(|&m| m == 0 || f64::from(m) >= MINUTES_PER_DAY) {
                return Err(SchedulerError::InvalidParams(format!(
                    "{} must be between 1 minute and 1 day",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Projected outcome of one grade
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOption {
    /// Human-readable interval, e.g. "10m", "4d", "3mo"
    pub interval: String,
    pub due: DateTime<Utc>,
    pub card: Card,
}

/// Outcomes for all four grades at the same instant
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOptions {
    pub again: ReviewOption,
    pub hard: ReviewOption,
    pub good: ReviewOption,
    pub easy: ReviewOption,
}

impl ReviewOptions {
    pub fn get(&self, grade: Grade) -> &ReviewOption {
        match grade {
            Grade::Again => &self.again,
            Grade::Hard => &self.hard,
            Grade::Good => &self.good,
            Grade::Easy => &self.easy,
        }
    }

    pub fn into_card(self, grade: Grade) -> Card {
        match grade {
            Grade::Again => self.again.card,
            Grade::Hard => self.hard.card,
            Grade::Good => self.good.card,
            Grade::Easy => self.easy.card,
        }
    }
}

/// Cards partitioned by what a study session should do with them
#[derive(Debug, Clone, Default)]
pub struct DueBuckets {
    pub due: Vec<Card>,
    pub new: Vec<Card>,
    pub learning: Vec<Card>,
    /// Review cards that are not due yet
    pub review: Vec<Card>,
}

/// Memory state after a grade, before interval selection
#[derive(Debug, Clone, Copy)]
struct Memory {
    stability: f64,
    difficulty: f64,
}

/// Where a grade sends the card and for how long
#[derive(Debug, Clone, Copy)]
struct Step {
    state: CardStatus,
    learning_steps: u32,
    days: f64,
}

/// Stateless scheduler; holds only its parameters.
#[derive(Debug, Clone)]
pub struct Scheduler {
    params: SchedulerParams,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            params: SchedulerParams::default(),
        }
    }
}

impl Scheduler {
    pub fn new(params: SchedulerParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &SchedulerParams {
        &self.params
    }

    /// Create a fresh card: New, due now, no history.
    pub fn create_card(&self, front: String, back: String, deck_id: Uuid, tags: Vec<String>) -> Card {
        self.create_card_at(front, back, deck_id, tags, Utc::now())
    }

    pub fn create_card_at(
        &self,
        front: String,
        back: String,
        deck_id: Uuid,
        tags: Vec<String>,
        now: DateTime<Utc>,
    ) -> Card {
        Card {
            id: Uuid::new_v4(),
            deck_id,
            front,
            back,
            tags,
            created_at: now,
            updated_at: now,
            media: Vec::new(),
            state: CardStatus::New,
            due: now,
            stability: self.init_stability(Grade::Good),
            difficulty: self.init_difficulty(Grade::Good),
            elapsed_days: 0.0,
            scheduled_days: 0.0,
            learning_steps: 0,
            reps: 0,
            lapses: 0,
            last_review: None,
        }
    }

    /// Apply a grade and return the updated card.
    pub fn review_card(&self, card: &Card, grade: Grade, at: DateTime<Utc>) -> Card {
        self.get_next_review_options(card, at).into_card(grade)
    }

    /// Like [`Scheduler::review_card`] for an untyped 1-4 rating.
    pub fn review_card_with_rating(&self, card: &Card, rating: i64, at: DateTime<Utc>) -> Result<Card> {
        let grade = Grade::try_from(rating)?;
        Ok(self.review_card(card, grade, at))
    }

    /// Project all four grades without touching `card`.
    pub fn get_next_review_options(&self, card: &Card, at: DateTime<Utc>) -> ReviewOptions {
        let elapsed = elapsed_days(card, at);
        let memory = Grade::ALL.map(|g| self.next_memory(card, elapsed, g));
        let steps = self.next_steps(card, &memory, at);

        let option = |grade: Grade| {
            let mem = *grade.slot(&memory);
            let step = *grade.slot(&steps);
            let next = self.apply(card, grade, mem, step, elapsed, at);
            ReviewOption {
                interval: format_interval(step.days),
                due: next.due,
                card: next,
            }
        };

        ReviewOptions {
            again: option(Grade::Again),
            hard: option(Grade::Hard),
            good: option(Grade::Good),
            easy: option(Grade::Easy),
        }
    }

    /// Estimated probability of recall at `at`; 1.0 for never-reviewed cards.
    pub fn calculate_retention(&self, card: &Card, at: DateTime<Utc>) -> f64 {
        if card.state == CardStatus::New || card.last_review.is_none() {
            return 1.0;
        }
        forgetting_curve(elapsed_days(card, at), card.stability).clamp(0.0, 1.0)
    }

    pub fn is_card_due(&self, card: &Card, at: DateTime<Utc>) -> bool {
        card.due <= at
    }

    pub fn group_by_due_status(&self, cards: &[Card], at: DateTime<Utc>) -> DueBuckets {
        let mut buckets = DueBuckets::default();
        for card in cards {
            if self.is_card_due(card, at) {
                buckets.due.push(card.clone());
            }
            match card.state {
                CardStatus::New => buckets.new.push(card.clone()),
                CardStatus::Learning | CardStatus::Relearning => buckets.learning.push(card.clone()),
                CardStatus::Review if !self.is_card_due(card, at) => buckets.review.push(card.clone()),
                CardStatus::Review => {}
            }
        }
        buckets
    }

    /// The cards a study session on `deck` should show at `at`: due cards
    /// already in rotation, oldest first, then due new cards up to the
    /// deck's `new_cards_per_day`. The whole queue stops at `max_reviews`.
    pub fn study_queue(&self, deck: &Deck, cards: &[Card], at: DateTime<Utc>) -> Vec<Card> {
        let mut due: Vec<&Card> = cards
            .iter()
            .filter(|c| c.deck_id == deck.id && self.is_card_due(c, at))
            .collect();
        due.sort_by_key(|c| (c.due, c.created_at));

        let (new, seen): (Vec<&Card>, Vec<&Card>) =
            due.into_iter().partition(|c| c.state == CardStatus::New);
        let new_limit = deck.settings.new_cards_per_day as usize;

        seen.into_iter()
            .chain(new.into_iter().take(new_limit))
            .take(deck.settings.max_reviews as usize)
            .cloned()
            .collect()
    }

    fn apply(
        &self,
        card: &Card,
        grade: Grade,
        memory: Memory,
        step: Step,
        elapsed: f64,
        at: DateTime<Utc>,
    ) -> Card {
        let mut next = card.clone();
        next.stability = memory.stability;
        next.difficulty = memory.difficulty;
        next.state = step.state;
        next.learning_steps = step.learning_steps;
        next.scheduled_days = step.days;
        next.elapsed_days = elapsed;
        next.due = at + Duration::seconds((step.days * SECONDS_PER_DAY).round() as i64);
        next.last_review = Some(at);
        next.updated_at = at;
        next.reps = card.reps.saturating_add(1);
        if grade == Grade::Again && card.state == CardStatus::Review {
            next.lapses = card.lapses.saturating_add(1);
        }
        next
    }

    // ==================== Memory model ====================

    fn w(&self, i: usize) -> f64 {
        self.params.weights[i]
    }

    fn init_stability(&self, grade: Grade) -> f64 {
        self.w(grade.value() as usize - 1).max(MIN_STABILITY)
    }

    fn raw_init_difficulty(&self, grade: Grade) -> f64 {
        self.w(4) - (self.w(5) * (f64::from(grade.value()) - 1.0)).exp() + 1.0
    }

    fn init_difficulty(&self, grade: Grade) -> f64 {
        clamp_difficulty(self.raw_init_difficulty(grade))
    }

    fn next_difficulty(&self, difficulty: f64, grade: Grade) -> f64 {
        let delta = -self.w(6) * (f64::from(grade.value()) - 3.0);
        let damped = difficulty + delta * (MAX_DIFFICULTY - difficulty) / 9.0;
        // Mean reversion towards the Easy starting difficulty
        let reverted = self.w(7) * self.raw_init_difficulty(Grade::Easy) + (1.0 - self.w(7)) * damped;
        clamp_difficulty(reverted)
    }

    fn next_recall_stability(&self, d: f64, s: f64, r: f64, grade: Grade) -> f64 {
        let hard_penalty = if grade == Grade::Hard { self.w(15) } else { 1.0 };
        let easy_bonus = if grade == Grade::Easy { self.w(16) } else { 1.0 };
        s * (1.0
            + self.w(8).exp()
                * (11.0 - d)
                * s.powf(-self.w(9))
                * (((1.0 - r) * self.w(10)).exp() - 1.0)
                * hard_penalty
                * easy_bonus)
    }

    fn next_forget_stability(&self, d: f64, s: f64, r: f64) -> f64 {
        let forgotten = self.w(11)
            * d.powf(-self.w(12))
            * ((s + 1.0).powf(self.w(13)) - 1.0)
            * ((1.0 - r) * self.w(14)).exp();
        forgotten.min(s)
    }

    fn short_term_stability(&self, s: f64, grade: Grade) -> f64 {
        s * (self.w(17) * (f64::from(grade.value()) - 3.0 + self.w(18))).exp()
    }

    fn next_memory(&self, card: &Card, elapsed: f64, grade: Grade) -> Memory {
        let prior_s = sanitize(card.stability, 0.0);
        let prior_d = sanitize(card.difficulty, 0.0);

        let (stability, difficulty) = if card.state == CardStatus::New || prior_s <= 0.0 || prior_d <= 0.0 {
            (self.init_stability(grade), self.init_difficulty(grade))
        } else {
            let s = prior_s.max(MIN_STABILITY);
            let d = clamp_difficulty(prior_d);
            let stability = if elapsed < 1.0 {
                self.short_term_stability(s, grade)
            } else {
                let r = forgetting_curve(elapsed, s);
                match grade {
                    Grade::Again => self.next_forget_stability(d, s, r),
                    _ => self.next_recall_stability(d, s, r, grade),
                }
            };
            (stability, self.next_difficulty(d, grade))
        };

        let mut stability = sanitize(stability, self.init_stability(grade)).max(MIN_STABILITY);
        if grade == Grade::Again && prior_s > 0.0 {
            stability = stability.min(prior_s.max(MIN_STABILITY));
        }
        Memory {
            stability,
            difficulty: clamp_difficulty(sanitize(difficulty, self.init_difficulty(grade))),
        }
    }

    // ==================== Interval selection ====================

    /// Whole-day interval for a stability, before fuzz.
    fn next_interval(&self, stability: f64) -> f64 {
        let ideal = stability * self.params.request_retention.ln() / BASE_RETENTION.ln();
        ideal.round().clamp(1.0, f64::from(self.params.maximum_interval))
    }

    fn next_steps(&self, card: &Card, memory: &[Memory; 4], at: DateTime<Utc>) -> [Step; 4] {
        let [_, hard, good, easy] = memory.map(|m| m.stability);
        match card.state {
            CardStatus::New => self.first_steps(),
            CardStatus::Learning => self.learning_steps(card, &self.params.learning_steps, good, easy),
            CardStatus::Relearning => self.learning_steps(card, &self.params.relearning_steps, good, easy),
            CardStatus::Review => self.review_steps(card, hard, good, easy, at),
        }
    }

    /// A New card always enters Learning.
    fn first_steps(&self) -> [Step; 4] {
        let steps = &self.params.learning_steps;
        let last = steps.len() - 1;
        let learning = |index: usize, minutes: f64| Step {
            state: CardStatus::Learning,
            learning_steps: index as u32,
            days: minutes / MINUTES_PER_DAY,
        };
        [
            learning(0, f64::from(steps[0])),
            learning(0, hard_step(steps, 0)),
            learning(last.min(1), f64::from(steps[last.min(1)])),
            // Easy skips to the end so the next success graduates.
            learning(steps.len(), f64::from(steps[last])),
        ]
    }

    fn learning_steps(&self, card: &Card, steps: &[u32], good_s: f64, easy_s: f64) -> [Step; 4] {
        let state = card.state;
        let index = card.learning_steps as usize;
        let at_step = |index: usize, minutes: f64| Step {
            state,
            learning_steps: index as u32,
            days: minutes / MINUTES_PER_DAY,
        };

        let again = at_step(0, f64::from(steps[0]));
        let hard = at_step(index.min(steps.len()), hard_step(steps, index.min(steps.len() - 1)));

        let good_days = self.next_interval(good_s);
        let good = match steps.get(index + 1) {
            Some(&minutes) => at_step(index + 1, f64::from(minutes)),
            None => graduate(good_days),
        };
        let mut easy_days = self.next_interval(easy_s);
        if good.state == CardStatus::Review {
            easy_days = easy_days.max(good_days + 1.0);
        }
        let easy_days = easy_days.min(f64::from(self.params.maximum_interval));

        [again, hard, good, graduate(easy_days)]
    }

    fn review_steps(&self, card: &Card, hard_s: f64, good_s: f64, easy_s: f64, at: DateTime<Utc>) -> [Step; 4] {
        let relearn = &self.params.relearning_steps;
        let again = Step {
            state: CardStatus::Relearning,
            learning_steps: 0,
            days: f64::from(relearn[0]) / MINUTES_PER_DAY,
        };

        let max = f64::from(self.params.maximum_interval);
        let mut hard = self.next_interval(hard_s);
        let mut good = self.next_interval(good_s);
        let mut easy = self.next_interval(easy_s);

        if self.params.enable_fuzz {
            let factor = fuzz_factor(card, at);
            hard = self.fuzz(hard, factor);
            good = self.fuzz(good, factor);
            easy = self.fuzz(easy, factor);
        }

        hard = hard.min(good);
        good = good.max(hard + 1.0).min(max);
        easy = easy.max(good + 1.0).min(max);

        [again, graduate(hard), graduate(good), graduate(easy)]
    }

    /// Spread `interval` by a bounded fraction; short intervals are left alone.
    fn fuzz(&self, interval: f64, factor: f64) -> f64 {
        if interval < 2.5 {
            return interval;
        }
        let delta = FUZZ_RANGES.iter().fold(1.0, |acc, &(start, end, f)| {
            acc + f * (interval.min(end) - start).max(0.0)
        });
        let max = f64::from(self.params.maximum_interval);
        let lo = (interval - delta).round().max(2.0);
        let hi = (interval + delta).round().min(max);
        if hi <= lo {
            return lo.min(max);
        }
        (factor * (hi - lo + 1.0) + lo).floor().min(hi)
    }
}

fn graduate(days: f64) -> Step {
    Step {
        state: CardStatus::Review,
        learning_steps: 0,
        days,
    }
}

/// Hard repeats the current step at 1.5x, or halfway to the next one.
fn hard_step(steps: &[u32], index: usize) -> f64 {
    let current = f64::from(steps[index]);
    let minutes = match steps.get(index + 1) {
        Some(&next) if index == 0 => (current + f64::from(next)) / 2.0,
        _ => current * 1.5,
    };
    minutes.min(MINUTES_PER_DAY - 1.0)
}

fn forgetting_curve(elapsed_days: f64, stability: f64) -> f64 {
    BASE_RETENTION.powf(elapsed_days.max(0.0) / stability.max(MIN_STABILITY))
}

fn elapsed_days(card: &Card, at: DateTime<Utc>) -> f64 {
    card.last_review
        .map(|last| ((at - last).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0))
        .unwrap_or(0.0)
}

fn clamp_difficulty(d: f64) -> f64 {
    d.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

fn sanitize(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Uniform value in [0, 1) derived from the card and the review instant.
fn fuzz_factor(card: &Card, at: DateTime<Utc>) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(card.id.as_bytes());
    hasher.update(card.reps.to_le_bytes());
    hasher.update(at.timestamp_millis().to_le_bytes());
    let digest = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    StdRng::seed_from_u64(u64::from_le_bytes(seed)).gen::<f64>()
}

/// Format an interval in days to a human-readable string
pub fn format_interval(days: f64) -> String {
    if days < 1.0 {
        format!("{}m", (days * MINUTES_PER_DAY).round() as i64)
    } else if days < 30.0 {
        format!("{}d", days.round() as i64)
    } else if days < 365.0 {
        format!("{}mo", (days / 30.0).round() as i64)
    } else {
        format!("{}y", (days / 365.0).round() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn scheduler() -> Scheduler {
        Scheduler::default()
    }

    fn new_card() -> Card {
        scheduler().create_card_at("q".into(), "a".into(), Uuid::new_v4(), vec![], t0())
    }

    /// Drive a fresh card into Review with two Good grades.
    fn review_card() -> (Card, DateTime<Utc>) {
        let s = scheduler();
        let first = s.review_card(&new_card(), Grade::Good, t0());
        let at = first.due;
        let second = s.review_card(&first, Grade::Good, at);
        assert_eq!(second.state, CardStatus::Review);
        (second, at)
    }

    #[test]
    fn test_new_card_is_due_with_no_history() {
        let card = new_card();
        assert_eq!(card.state, CardStatus::New);
        assert_eq!(card.reps, 0);
        assert_eq!(card.lapses, 0);
        assert!(card.last_review.is_none());
        assert!(scheduler().is_card_due(&card, t0()));
        assert_eq!(scheduler().calculate_retention(&card, t0() + Duration::days(30)), 1.0);
    }

    #[test]
    fn test_first_review_enters_learning() {
        let s = scheduler();
        for grade in Grade::ALL {
            let card = s.review_card(&new_card(), grade, t0());
            assert_eq!(card.state, CardStatus::Learning, "{:?}", grade);
            assert_eq!(card.reps, 1);
            assert!(card.due > t0());
            assert!(card.scheduled_days < 1.0);
            assert_eq!(card.last_review, Some(t0()));
        }
    }

    #[test]
    fn test_second_good_graduates() {
        let (card, at) = review_card();
        assert_eq!(card.reps, 2);
        assert!(card.scheduled_days >= 1.0);
        assert_eq!(card.scheduled_days.fract(), 0.0);
        assert!(card.due >= at + Duration::days(1));
    }

    #[test]
    fn test_again_in_learning_restarts_steps() {
        let s = scheduler();
        let first = s.review_card(&new_card(), Grade::Good, t0());
        let again = s.review_card(&first, Grade::Again, first.due);
        assert_eq!(again.state, CardStatus::Learning);
        assert_eq!(again.learning_steps, 0);
        assert_eq!(again.lapses, 0);
        assert_eq!(again.due, first.due + Duration::minutes(1));
    }

    #[test]
    fn test_lapse_moves_to_relearning() {
        let s = scheduler();
        let (card, _) = review_card();
        let at = card.due + Duration::days(2);
        let lapsed = s.review_card(&card, Grade::Again, at);
        assert_eq!(lapsed.state, CardStatus::Relearning);
        assert_eq!(lapsed.lapses, card.lapses + 1);
        assert!(lapsed.stability <= card.stability);
        assert_eq!(lapsed.due, at + Duration::minutes(10));

        let regraduated = s.review_card(&lapsed, Grade::Good, lapsed.due);
        assert_eq!(regraduated.state, CardStatus::Review);
        assert_eq!(regraduated.lapses, lapsed.lapses);
    }

    #[test]
    fn test_success_in_review_grows_stability() {
        let s = scheduler();
        let (card, _) = review_card();
        for offset in [0, 1, 5, 40] {
            let at = card.due + Duration::days(offset);
            for grade in [Grade::Good, Grade::Easy] {
                let next = s.review_card(&card, grade, at);
                assert!(next.stability > card.stability, "{:?} at +{}d", grade, offset);
                assert_eq!(next.state, CardStatus::Review);
            }
        }
        // Same-day review uses the short-term rule
        let same_day = s.review_card(&card, Grade::Good, card.last_review.unwrap());
        assert!(same_day.stability > card.stability);
    }

    #[test]
    fn test_again_never_raises_stability() {
        let s = scheduler();
        let (review, _) = review_card();
        let cards = [new_card(), s.review_card(&new_card(), Grade::Easy, t0()), review];
        for card in cards {
            for offset in [0, 3, 90] {
                let next = s.review_card(&card, Grade::Again, t0() + Duration::days(offset));
                assert!(next.stability <= card.stability);
                assert!(next.difficulty <= MAX_DIFFICULTY);
            }
        }
    }

    #[test]
    fn test_difficulty_moves_with_grade_and_stays_clamped() {
        let s = scheduler();
        let (card, _) = review_card();
        let at = card.due;
        let again = s.review_card(&card, Grade::Again, at);
        let easy = s.review_card(&card, Grade::Easy, at);
        assert!(again.difficulty > card.difficulty);
        assert!(easy.difficulty < card.difficulty);

        let mut hammered = card.clone();
        for _ in 0..50 {
            let at = hammered.due;
            hammered = s.review_card(&hammered, Grade::Again, at);
            assert!(hammered.difficulty <= MAX_DIFFICULTY);
            assert!(hammered.stability >= MIN_STABILITY);
            assert!(hammered.stability.is_finite());
        }
    }

    #[test]
    fn test_options_match_review() {
        let s = scheduler();
        let (card, _) = review_card();
        for offset in [0, 2, 17, 400] {
            let at = card.due + Duration::days(offset);
            let options = s.get_next_review_options(&card, at);
            for grade in Grade::ALL {
                let reviewed = s.review_card(&card, grade, at);
                assert_eq!(options.get(grade).due, reviewed.due);
                assert_eq!(options.get(grade).card, reviewed);
            }
            // Idempotent
            let again = s.get_next_review_options(&card, at);
            assert_eq!(again.good.due, options.good.due);
        }
    }

    #[test]
    fn test_review_intervals_are_ordered_and_capped() {
        let s = scheduler();
        let (mut card, _) = review_card();
        card.stability = 1.0e9;
        let options = s.get_next_review_options(&card, card.due + Duration::days(10));
        let days = |o: &ReviewOption| o.card.scheduled_days;
        assert!(days(&options.hard) <= days(&options.good));
        assert!(days(&options.good) <= days(&options.easy));
        assert!(days(&options.easy) <= 36_500.0);
    }

    #[test]
    fn test_fuzz_is_deterministic_and_bounded() {
        let params = SchedulerParams {
            enable_fuzz: false,
            ..SchedulerParams::default()
        };
        let plain = Scheduler::new(params).unwrap();
        let fuzzy = scheduler();
        let (card, _) = review_card();
        let at = card.due + Duration::days(30);
        let base = plain.review_card(&card, Grade::Good, at).scheduled_days;
        let a = fuzzy.review_card(&card, Grade::Good, at).scheduled_days;
        let b = fuzzy.review_card(&card, Grade::Good, at).scheduled_days;
        assert_eq!(a, b);
        assert!((a - base).abs() <= 2.0 + 0.15 * base);
    }

    #[test]
    fn test_invalid_rating_fails_fast() {
        let s = scheduler();
        let card = new_card();
        assert!(matches!(
            s.review_card_with_rating(&card, 0, t0()),
            Err(SchedulerError::InvalidGrade(0))
        ));
        assert!(matches!(
            s.review_card_with_rating(&card, 5, t0()),
            Err(SchedulerError::InvalidGrade(5))
        ));
        assert!(s.review_card_with_rating(&card, 4, t0()).is_ok());
    }

    #[test]
    fn test_nan_state_is_repaired() {
        let s = scheduler();
        let (mut card, _) = review_card();
        card.stability = f64::NAN;
        card.difficulty = f64::INFINITY;
        let next = s.review_card(&card, Grade::Good, card.due);
        assert!(next.stability.is_finite() && next.stability > 0.0);
        assert!(next.difficulty.is_finite());
        assert!((MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&next.difficulty));
    }

    #[test]
    fn test_retention_decays() {
        let s = scheduler();
        let (card, _) = review_card();
        let last = card.last_review.unwrap();
        let r0 = s.calculate_retention(&card, last);
        let r_s = s.calculate_retention(&card, last + Duration::seconds((card.stability * SECONDS_PER_DAY) as i64));
        let r_late = s.calculate_retention(&card, last + Duration::days(365));
        assert!((r0 - 1.0).abs() < 1e-9);
        assert!((r_s - 0.9).abs() < 1e-3);
        assert!(r_late < r_s);
        assert!(r_late >= 0.0);
    }

    #[test]
    fn test_params_validation() {
        assert!(SchedulerParams::default().validate().is_ok());
        let bad_retention = SchedulerParams {
            request_retention: 1.0,
            ..SchedulerParams::default()
        };
        assert!(Scheduler::new(bad_retention).is_err());
        let mut weights = DEFAULT_WEIGHTS;
        weights[3] = f64::NAN;
        assert!(Scheduler::new(SchedulerParams { weights, ..SchedulerParams::default() }).is_err());
        let no_steps = SchedulerParams {
            relearning_steps: vec![],
            ..SchedulerParams::default()
        };
        assert!(Scheduler::new(no_steps).is_err());
    }

    #[test]
    fn test_group_by_due_status() {
        let s = scheduler();
        let fresh = new_card();
        let learning = s.review_card(&new_card(), Grade::Good, t0());
        let (review, _) = review_card();
        let at = t0() + Duration::minutes(5);
        let buckets = s.group_by_due_status(&[fresh, learning, review], at);
        assert_eq!(buckets.due.len(), 1);
        assert_eq!(buckets.new.len(), 1);
        assert_eq!(buckets.learning.len(), 1);
        assert_eq!(buckets.review.len(), 1);
    }

    fn deck_with_limits(new_cards_per_day: u32, max_reviews: u32) -> Deck {
        let mut deck = Deck::new("Limits".into());
        deck.settings.new_cards_per_day = new_cards_per_day;
        deck.settings.max_reviews = max_reviews;
        deck
    }

    fn card_in(deck: &Deck, created: DateTime<Utc>) -> Card {
        scheduler().create_card_at("q".into(), "a".into(), deck.id, vec![], created)
    }

    #[test]
    fn test_study_queue_caps_new_cards() {
        let s = scheduler();
        let deck = deck_with_limits(2, 200);
        let mut cards: Vec<Card> = (0..5).map(|i| card_in(&deck, t0() + Duration::minutes(i))).collect();
        let (mut review, _) = review_card();
        review.deck_id = deck.id;
        let review_due = review.due;
        cards.push(review.clone());
        cards.push(new_card());

        let queue = s.study_queue(&deck, &cards, review_due);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue[0].id, review.id);
        assert_eq!(queue[1].id, cards[0].id);
        assert_eq!(queue[2].id, cards[1].id);
        assert!(queue.iter().all(|c| c.deck_id == deck.id));

        let none_new = deck_with_limits(0, 200);
        let queue = s.study_queue(&none_new, &cards, review_due);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, review.id);
    }

    #[test]
    fn test_study_queue_caps_total() {
        let s = scheduler();
        let deck = deck_with_limits(20, 3);
        let cards: Vec<Card> = (0..6).map(|i| card_in(&deck, t0() + Duration::minutes(i))).collect();
        let later = t0() + Duration::hours(1);

        let queue = s.study_queue(&deck, &cards, later);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue[2].id, cards[2].id);

        // Not yet due
        assert!(s.study_queue(&deck, &cards, t0() - Duration::minutes(1)).is_empty());
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(1.0 / 1440.0), "1m");
        assert_eq!(format_interval(10.0 / 1440.0), "10m");
        assert_eq!(format_interval(1.0), "1d");
        assert_eq!(format_interval(5.0), "5d");
        assert_eq!(format_interval(29.0), "29d");
        assert_eq!(format_interval(30.0), "1mo");
        assert_eq!(format_interval(90.0), "3mo");
        assert_eq!(format_interval(365.0), "1y");
        assert_eq!(format_interval(730.0), "2y");
    }
}
