//! Declarative personalization rules and the engine that evaluates them.
//!
//! A [`Rule`] is a conjunction of [`Trigger`] conditions tied to a list of
//! actions. The [`RuleEngine`] consumes runtime signals, keeps per-page-view
//! firing state, arms time-on-page timers on navigation, and hands fired
//! actions to the action executor.

mod engine;
mod rule;
mod trigger;

pub use engine::{RuleEngine, RuleFiring};
pub use rule::Rule;
pub use trigger::{EvalContext, Trigger};
