//! Flat-document DOM with a small selector engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{DomError, ElementRef, OverlayPosition, PageDom};

/// Declarative element description used to seed a [`MemoryDom`].
#[derive(Clone, Debug, Default)]
pub struct ElementSpec {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: HashMap<String, String>,
    pub text: String,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

#[derive(Clone, Debug)]
struct Node {
    id: u64,
    tag: String,
    html_id: Option<String>,
    classes: Vec<String>,
    attributes: HashMap<String, String>,
    text: String,
    styles: HashMap<String, String>,
    visible: bool,
}

/// Everything a [`MemoryDom`] was asked to change, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum DomMutation {
    TextSet { node: u64, text: String },
    AttributeSet { node: u64, name: String, value: String },
    ClassAdded { node: u64, class: String },
    ClassRemoved { node: u64, class: String },
    StyleSet { node: u64, property: String, value: String },
    VisibilitySet { node: u64, visible: bool },
    OverlayInserted { position: OverlayPosition },
    Navigated { url: String },
}

#[derive(Default)]
struct DomState {
    nodes: Vec<Node>,
    mutations: Vec<DomMutation>,
    overlays: Vec<(String, OverlayPosition)>,
    navigations: Vec<String>,
}

/// In-memory document: a flat node list in document order plus a log of
/// every mutation. Selector support covers what locator strategies emit:
/// `#id`, `[attr="value"]`, class combinations, tags and
/// `tag:nth-of-type(n)`, including compounds like `button.cta[type="submit"]`.
#[derive(Default)]
pub struct MemoryDom {
    state: RwLock<DomState>,
    next_id: AtomicU64,
}

impl MemoryDom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element to the document, returning its node id.
    pub fn insert(&self, spec: ElementSpec) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.write().nodes.push(Node {
            id,
            tag: spec.tag.to_ascii_lowercase(),
            html_id: spec.id,
            classes: spec.classes,
            attributes: spec.attributes,
            text: spec.text,
            styles: HashMap::new(),
            visible: true,
        });
        id
    }

    /// Remove an element, turning outstanding refs to it stale.
    pub fn remove_element(&self, node_id: u64) {
        self.state.write().nodes.retain(|node| node.id != node_id);
    }

    /// Swap in a new document, as a navigation does. The mutation log is
    /// an audit trail and survives; overlays belong to the old page and
    /// are dropped.
    pub fn replace_document(&self, specs: impl IntoIterator<Item = ElementSpec>) {
        {
            let mut state = self.state.write();
            state.nodes.clear();
            state.overlays.clear();
        }
        for spec in specs {
            self.insert(spec);
        }
    }

    pub fn mutations(&self) -> Vec<DomMutation> {
        self.state.read().mutations.clone()
    }

    pub fn overlays(&self) -> Vec<(String, OverlayPosition)> {
        self.state.read().overlays.clone()
    }

    pub fn last_navigation(&self) -> Option<String> {
        self.state.read().navigations.last().cloned()
    }

    pub fn text_of(&self, node_id: u64) -> Option<String> {
        self.read_node(node_id, |node| node.text.clone())
    }

    pub fn classes_of(&self, node_id: u64) -> Option<Vec<String>> {
        self.read_node(node_id, |node| node.classes.clone())
    }

    pub fn style_of(&self, node_id: u64, property: &str) -> Option<String> {
        self.read_node(node_id, |node| node.styles.get(property).cloned())
            .flatten()
    }

    pub fn is_visible(&self, node_id: u64) -> Option<bool> {
        self.read_node(node_id, |node| node.visible)
    }

    fn read_node<T>(&self, node_id: u64, f: impl FnOnce(&Node) -> T) -> Option<T> {
        self.state
            .read()
            .nodes
            .iter()
            .find(|node| node.id == node_id)
            .map(f)
    }

    fn mutate_node<T>(
        &self,
        element: &ElementRef,
        f: impl FnOnce(&mut Node) -> (T, DomMutation),
    ) -> Result<T, DomError> {
        let mut state = self.state.write();
        let Some(node) = state.nodes.iter_mut().find(|node| node.id == element.node_id) else {
            return Err(DomError::StaleElement);
        };
        let (value, mutation) = f(node);
        state.mutations.push(mutation);
        Ok(value)
    }
}

#[async_trait]
impl PageDom for MemoryDom {
    async fn query(&self, selector: &str) -> Result<Vec<ElementRef>, DomError> {
        let compiled = CompiledSelector::parse(selector)?;
        let state = self.state.read();
        let mut tag_counts: HashMap<&str, usize> = HashMap::new();
        let mut matches = Vec::new();
        for node in &state.nodes {
            let seen = tag_counts.entry(node.tag.as_str()).or_insert(0);
            *seen += 1;
            if compiled.matches(node, *seen) {
                matches.push(ElementRef {
                    node_id: node.id,
                    tag: node.tag.clone(),
                });
            }
        }
        Ok(matches)
    }

    async fn text(&self, element: &ElementRef) -> Result<String, DomError> {
        self.read_node(element.node_id, |node| node.text.clone())
            .ok_or(DomError::StaleElement)
    }

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DomError> {
        self.read_node(element.node_id, |node| node.attributes.get(name).cloned())
            .ok_or(DomError::StaleElement)
    }

    async fn set_text(&self, element: &ElementRef, text: &str) -> Result<(), DomError> {
        self.mutate_node(element, |node| {
            node.text = text.to_string();
            (
                (),
                DomMutation::TextSet {
                    node: node.id,
                    text: text.to_string(),
                },
            )
        })
    }

    async fn set_attribute(
        &self,
        element: &ElementRef,
        name: &str,
        value: &str,
    ) -> Result<(), DomError> {
        self.mutate_node(element, |node| {
            node.attributes.insert(name.to_string(), value.to_string());
            (
                (),
                DomMutation::AttributeSet {
                    node: node.id,
                    name: name.to_string(),
                    value: value.to_string(),
                },
            )
        })
    }

    async fn add_class(&self, element: &ElementRef, class: &str) -> Result<(), DomError> {
        self.mutate_node(element, |node| {
            if !node.classes.iter().any(|existing| existing == class) {
                node.classes.push(class.to_string());
            }
            (
                (),
                DomMutation::ClassAdded {
                    node: node.id,
                    class: class.to_string(),
                },
            )
        })
    }

    async fn remove_class(&self, element: &ElementRef, class: &str) -> Result<(), DomError> {
        self.mutate_node(element, |node| {
            node.classes.retain(|existing| existing != class);
            (
                (),
                DomMutation::ClassRemoved {
                    node: node.id,
                    class: class.to_string(),
                },
            )
        })
    }

    async fn set_style(
        &self,
        element: &ElementRef,
        property: &str,
        value: &str,
    ) -> Result<(), DomError> {
        self.mutate_node(element, |node| {
            node.styles.insert(property.to_string(), value.to_string());
            (
                (),
                DomMutation::StyleSet {
                    node: node.id,
                    property: property.to_string(),
                    value: value.to_string(),
                },
            )
        })
    }

    async fn set_visible(&self, element: &ElementRef, visible: bool) -> Result<(), DomError> {
        self.mutate_node(element, |node| {
            node.visible = visible;
            (
                (),
                DomMutation::VisibilitySet {
                    node: node.id,
                    visible,
                },
            )
        })
    }

    async fn insert_overlay(
        &self,
        html: &str,
        position: OverlayPosition,
    ) -> Result<(), DomError> {
        let mut state = self.state.write();
        state.overlays.push((html.to_string(), position));
        state.mutations.push(DomMutation::OverlayInserted { position });
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), DomError> {
        let mut state = self.state.write();
        state.navigations.push(url.to_string());
        state.mutations.push(DomMutation::Navigated {
            url: url.to_string(),
        });
        Ok(())
    }
}

/// One compound simple selector. No combinators: strategies never emit
/// descendant or sibling selectors.
#[derive(Debug, Default)]
struct CompiledSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
    nth_of_type: Option<usize>,
}

impl CompiledSelector {
    fn parse(selector: &str) -> Result<Self, DomError> {
        let trimmed = selector.trim();
        if trimmed.is_empty() {
            return Err(DomError::InvalidSelector("empty selector".into()));
        }
        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | '>' | '~' | '+'))
        {
            return Err(DomError::InvalidSelector(trimmed.to_string()));
        }

        let mut compiled = Self::default();
        let mut rest = trimmed;

        // Leading tag name.
        let head_len = rest
            .find(|c| matches!(c, '#' | '.' | '[' | ':'))
            .unwrap_or(rest.len());
        if head_len > 0 {
            compiled.tag = Some(rest[..head_len].to_ascii_lowercase());
            rest = &rest[head_len..];
        }

        while !rest.is_empty() {
            let marker = rest.chars().next().unwrap_or_default();
            rest = &rest[1..];
            match marker {
                '#' => {
                    let (token, tail) = take_token(rest);
                    if token.is_empty() {
                        return Err(DomError::InvalidSelector(trimmed.to_string()));
                    }
                    compiled.id = Some(token.to_string());
                    rest = tail;
                }
                '.' => {
                    let (token, tail) = take_token(rest);
                    if token.is_empty() {
                        return Err(DomError::InvalidSelector(trimmed.to_string()));
                    }
                    compiled.classes.push(token.to_string());
                    rest = tail;
                }
                '[' => {
                    let Some(end) = rest.find(']') else {
                        return Err(DomError::InvalidSelector(trimmed.to_string()));
                    };
                    let body = &rest[..end];
                    rest = &rest[end + 1..];
                    let (name, value) = match body.split_once('=') {
                        Some((name, value)) => {
                            (name, Some(value.trim_matches(&['"', '\''][..]).to_string()))
                        }
                        None => (body, None),
                    };
                    if name.is_empty() {
                        return Err(DomError::InvalidSelector(trimmed.to_string()));
                    }
                    compiled.attributes.push((name.to_string(), value));
                }
                ':' => {
                    let Some(body) = rest
                        .strip_prefix("nth-of-type(")
                        .and_then(|tail| tail.strip_suffix(')'))
                    else {
                        return Err(DomError::InvalidSelector(trimmed.to_string()));
                    };
                    let index: usize = body
                        .parse()
                        .map_err(|_| DomError::InvalidSelector(trimmed.to_string()))?;
                    if index == 0 || compiled.tag.is_none() {
                        return Err(DomError::InvalidSelector(trimmed.to_string()));
                    }
                    compiled.nth_of_type = Some(index);
                    rest = "";
                }
                _ => return Err(DomError::InvalidSelector(trimmed.to_string())),
            }
        }
        Ok(compiled)
    }

    /// `tag_occurrence` is this node's 1-based index among nodes of the
    /// same tag in document order.
    fn matches(&self, node: &Node, tag_occurrence: usize) -> bool {
        if let Some(tag) = &self.tag {
            if node.tag != *tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.html_id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if !self
            .classes
            .iter()
            .all(|class| node.classes.iter().any(|existing| existing == class))
        {
            return false;
        }
        for (name, expected) in &self.attributes {
            match (node.attributes.get(name), expected) {
                (None, _) => return false,
                (Some(actual), Some(expected)) if actual != expected => return false,
                _ => {}
            }
        }
        if let Some(nth) = self.nth_of_type {
            if tag_occurrence != nth {
                return false;
            }
        }
        true
    }
}

fn take_token(input: &str) -> (&str, &str) {
    let end = input
        .find(|c| matches!(c, '#' | '.' | '[' | ':'))
        .unwrap_or(input.len());
    (&input[..end], &input[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dom() -> MemoryDom {
        let dom = MemoryDom::new();
        dom.insert(ElementSpec::new("h1").with_id("headline").with_text("Welcome"));
        dom.insert(
            ElementSpec::new("button")
                .with_class("cta")
                .with_class("primary")
                .with_attribute("type", "submit")
                .with_text("Start trial"),
        );
        dom.insert(
            ElementSpec::new("button")
                .with_class("cta")
                .with_text("Talk to sales"),
        );
        dom.insert(ElementSpec::new("div").with_class("banner").with_text("Hello"));
        dom
    }

    #[tokio::test]
    async fn test_id_selector_matches_one() {
        let dom = sample_dom();
        let matches = dom.query("#headline").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].tag, "h1");
    }

    #[tokio::test]
    async fn test_class_combo_narrows() {
        let dom = sample_dom();
        assert_eq!(dom.query(".cta").await.unwrap().len(), 2);
        assert_eq!(dom.query(".cta.primary").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_attribute_selector() {
        let dom = sample_dom();
        let matches = dom.query("button[type=\"submit\"]").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert!(dom.query("[type]").await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn test_nth_of_type_is_positional() {
        let dom = sample_dom();
        let second = dom.query("button:nth-of-type(2)").await.unwrap();
        assert_eq!(second.len(), 1);
        let text = dom.text(&second[0]).await.unwrap();
        assert_eq!(text, "Talk to sales");
    }

    #[tokio::test]
    async fn test_combinators_are_rejected() {
        let dom = sample_dom();
        assert!(matches!(
            dom.query("div > button").await,
            Err(DomError::InvalidSelector(_))
        ));
        assert!(matches!(
            dom.query(".a, .b").await,
            Err(DomError::InvalidSelector(_))
        ));
    }

    #[tokio::test]
    async fn test_mutations_are_logged_and_applied() {
        let dom = sample_dom();
        let button = dom.query(".cta.primary").await.unwrap().remove(0);
        dom.set_text(&button, "Try it free").await.unwrap();
        dom.add_class(&button, "highlight").await.unwrap();
        dom.set_style(&button, "color", "red").await.unwrap();

        assert_eq!(dom.text_of(button.node_id).as_deref(), Some("Try it free"));
        assert!(dom
            .classes_of(button.node_id)
            .unwrap()
            .contains(&"highlight".to_string()));
        assert_eq!(dom.style_of(button.node_id, "color").as_deref(), Some("red"));
        assert_eq!(dom.mutations().len(), 3);
    }

    #[tokio::test]
    async fn test_removed_node_goes_stale() {
        let dom = sample_dom();
        let headline = dom.query("#headline").await.unwrap().remove(0);
        dom.remove_element(headline.node_id);

        assert!(matches!(
            dom.set_text(&headline, "x").await,
            Err(DomError::StaleElement)
        ));
        assert!(dom.query("#headline").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlay_and_navigation_recorded() {
        let dom = sample_dom();
        dom.insert_overlay("<div>offer</div>", OverlayPosition::BottomRight)
            .await
            .unwrap();
        dom.navigate("https://shop.test/pricing").await.unwrap();

        assert_eq!(dom.overlays().len(), 1);
        assert_eq!(
            dom.last_navigation().as_deref(),
            Some("https://shop.test/pricing")
        );
    }
}
