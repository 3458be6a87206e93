pub mod add;
pub mod decks;
pub mod delete;
pub mod due;
pub mod export;
pub mod import;
pub mod preview;
pub mod review;
pub mod stats;
