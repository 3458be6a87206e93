//! Flashcards and spaced repetition
//!
//! This module provides:
//! - Deck and card models
//! - FSRS memory model and review state machine
//! - Storage contract with in-memory and JSON file implementations

pub mod algorithm;
pub mod models;
pub mod storage;

pub use algorithm::{
    format_interval, DueBuckets, ReviewOption, ReviewOptions, Scheduler, SchedulerError,
    SchedulerParams,
};
pub use models::*;
pub use storage::{refresh_deck_counts, review_stats, FileStorage, MemoryStorage, Storage, StorageError};
