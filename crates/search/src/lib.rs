pub mod engine;
pub mod ignore_rules;
pub mod index;
pub mod updater;

pub use engine::{EngineError, SearchEngine};
pub use ignore_rules::IgnoreRules;
pub use updater::{UpdateCommand, Updater};
