//! Visitor and session identity.
//!
//! No cookies, no fingerprinting: a random visitor id parked in durable
//! storage, a session id that rotates after enough idle time, and a
//! deterministic "Adjective Animal" name so operators can talk about a
//! visitor without ever knowing who they are.

pub mod device;
mod local;
pub mod names;

pub use device::snapshot_from_user_agent;
pub use local::{LocalIdentityProvider, SessionRecord};

use async_trait::async_trait;

use pagetailor_core_types::{DeviceSnapshot, SessionId, VisitorId};

/// Read side of identity. Accessors are cheap and infallible; state was
/// settled when the provider was established for this page load.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn visitor_id(&self) -> VisitorId;

    fn session_id(&self) -> SessionId;

    /// Deterministic pseudonym for the visitor id.
    fn anonymous_name(&self) -> String;

    /// Lifetime session count for this visitor, including the current one.
    fn visit_count(&self) -> u32;

    fn days_since_first_visit(&self) -> u32;

    fn device(&self) -> DeviceSnapshot;

    /// True on the visitor's very first session.
    fn is_new_visitor(&self) -> bool {
        self.visit_count() <= 1
    }

    /// Record activity so the session does not idle out. Persistence is
    /// best-effort.
    async fn touch(&self);
}
