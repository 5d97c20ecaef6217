use thiserror::Error;

/// Resolution failures. These are reported as outcomes by callers, never
/// propagated into the host page.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocatorError {
    /// Every strategy yielded zero matches.
    #[error("element not found")]
    ElementNotFound,
    /// The rule supplied no selector strategies at all.
    #[error("no selector strategies supplied")]
    NoStrategies,
}
