//! Container packages (`.apkg`): a zip archive holding an SQLite collection
//! plus numbered media members.

mod export;
mod import;
pub mod schema;
pub mod template;

pub use export::export_package;
pub use import::parse_package;
