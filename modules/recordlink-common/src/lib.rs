pub mod config;
pub mod matching;
pub mod types;

pub use config::Config;
pub use matching::{MatchProfile, NameMatcher};
pub use types::*;
