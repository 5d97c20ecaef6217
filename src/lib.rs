//! Pagetailor: cookie-free on-page personalization.
//!
//! The runtime watches a visitor's journey through a site, scores purchase
//! intent, and rewrites the page when authored rules fire. Everything runs
//! client-side against host-provided ports; nothing here identifies a
//! person.

pub mod config;
pub mod context;
pub mod rules;
pub mod runtime;
pub mod scenario;

pub use config::RuntimeConfig;
pub use context::{HostEnvironment, RuntimeContext};
pub use rules::{load_rules, parse_rules, validate_rules};
pub use runtime::{PageRuntime, ScopeReport, StorageReport};
pub use scenario::{load_scenario, parse_scenario, run_scenario, Scenario, SimulationReport};

// Re-export the types embedders handle directly.
pub use pagetailor_event_bus::{PageNavigation, RuntimeSignalEvent};
pub use pagetailor_journey_recorder::{IntentLevel, JourneyAnalytics, PagePattern};
pub use pagetailor_trigger_engine::{Rule, RuleFiring, Trigger};
