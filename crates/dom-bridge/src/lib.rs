//! DOM access port.
//!
//! The engine never touches a real document; it talks to [`PageDom`].
//! Hosts bridge the trait to whatever renders the page. [`MemoryDom`]
//! implements it over a flat element list with a small selector engine,
//! which is what tests and the scenario simulator run against.

mod memory;

pub use memory::{DomMutation, ElementSpec, MemoryDom};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomError {
    /// The selector uses syntax the backend cannot evaluate.
    #[error("unsupported selector: {0}")]
    InvalidSelector(String),
    /// The referenced element no longer exists in the live document.
    #[error("element reference is stale")]
    StaleElement,
    #[error("dom backend: {0}")]
    Backend(String),
}

/// Handle to one element at resolution time. Never cached across
/// resolutions: the next lookup re-queries the live document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementRef {
    pub node_id: u64,
    pub tag: String,
}

/// Where an overlay attaches to the page.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayPosition {
    #[default]
    Center,
    Top,
    Bottom,
    BottomRight,
    BottomLeft,
}

/// Port over the live document. `query` returns matches in document
/// order; mutators answer [`DomError::StaleElement`] when the handle
/// outlived its node.
#[async_trait]
pub trait PageDom: Send + Sync {
    async fn query(&self, selector: &str) -> Result<Vec<ElementRef>, DomError>;

    async fn text(&self, element: &ElementRef) -> Result<String, DomError>;

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DomError>;

    async fn set_text(&self, element: &ElementRef, text: &str) -> Result<(), DomError>;

    async fn set_attribute(
        &self,
        element: &ElementRef,
        name: &str,
        value: &str,
    ) -> Result<(), DomError>;

    async fn add_class(&self, element: &ElementRef, class: &str) -> Result<(), DomError>;

    async fn remove_class(&self, element: &ElementRef, class: &str) -> Result<(), DomError>;

    async fn set_style(
        &self,
        element: &ElementRef,
        property: &str,
        value: &str,
    ) -> Result<(), DomError>;

    async fn set_visible(&self, element: &ElementRef, visible: bool) -> Result<(), DomError>;

    async fn insert_overlay(&self, html: &str, position: OverlayPosition)
        -> Result<(), DomError>;

    /// Leave the current page. Everything scheduled dies with it.
    async fn navigate(&self, url: &str) -> Result<(), DomError>;
}
