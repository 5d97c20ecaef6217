//! Element resolution under selector ambiguity.
//!
//! Rule authors describe a target as an ordered list of selector
//! strategies, most reliable first. [`resolver::resolve`] walks them
//! against the live DOM and settles multi-matches with disambiguation
//! hints instead of guessing.

mod errors;
mod resolver;
mod types;

pub use errors::LocatorError;
pub use resolver::resolve;
pub use types::{DisambiguationHints, Resolution, SelectorStrategy, StrategyKind};
