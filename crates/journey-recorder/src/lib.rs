//! Journey recording, intent scoring and multi-page pattern matching.
//!
//! The recorder owns one [`model::Journey`] per browsing session: every
//! navigation and interaction lands here, the purchase-intent score is
//! recomputed on the spot, and the whole journey is persisted and
//! version-announced so sibling tabs converge on the same state.

pub mod intent;
pub mod model;
pub mod pattern;
mod recorder;

pub use intent::{compute_score, IntentWeights, ScoreInputs};
pub use model::{
    IntentLevel, IntentSignal, IntentSignalKind, InteractionEvent, Journey, JourneyAnalytics,
    PageSummary, PageVisit, UtmAttribution,
};
pub use pattern::{MatchMode, PagePattern};
pub use recorder::{JourneyRecorder, JourneySeed, RecorderConfig};
