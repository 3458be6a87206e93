//! Flashcard scheduling and deck interchange.
//!
//! - [`flashcards`]: card and deck models, the FSRS scheduler and storage
//! - [`interchange`]: importing and exporting decks
//! - [`config`]: TOML settings shared by the CLI

pub mod config;
pub mod flashcards;
pub mod interchange;
