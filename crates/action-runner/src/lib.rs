//! Action execution.
//!
//! Rule actions arrive as loosely-shaped configuration and leave as typed
//! [`model::ActionSpec`]s, validated before anything is scheduled. The
//! executor owns each scheduled action from `pending` until it fires or
//! the page view that armed it goes away.

mod executor;
mod model;

pub use executor::{ActionExecutor, CompletedAction};
pub use model::{
    ActionDescriptor, ActionKind, ActionSpec, ActionTarget, AnimationKind, ExecOutcome,
};
