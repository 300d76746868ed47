pub mod anki;
pub mod api;
pub mod archive;
pub mod cache;
pub mod config;
pub mod database;
pub mod deck;
pub mod entries;
pub mod errors;
pub mod flashcards;
pub mod logs;
pub mod markup;
pub mod models;
pub mod pages;
pub mod resolver;
pub mod server;

pub use cache::DictionaryCache;
pub use config::Config;
pub use errors::{DictionaryError, DictionaryResult};
pub use flashcards::FlashcardMaker;
pub use logs::RunLog;
pub use models::*;
pub use resolver::TranslationResolver;
