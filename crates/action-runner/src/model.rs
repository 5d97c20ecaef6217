//! Action descriptors and outcomes.

use serde::{Deserialize, Serialize};
use url::Url;

use pagetailor_dom_bridge::OverlayPosition;
use pagetailor_element_locator::{DisambiguationHints, SelectorStrategy};

/// What a rule does to the page once its trigger fires. One variant per
/// action kind; kind-specific parameters live inside the variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ActionKind {
    ReplaceText {
        new_text: String,
        /// The text the element carried at authoring time; doubles as the
        /// disambiguation hint when the selector matches several elements.
        #[serde(default)]
        original_text: Option<String>,
    },
    SetStyle {
        property: String,
        value: String,
    },
    AddClass {
        class: String,
    },
    RemoveClass {
        class: String,
    },
    Hide,
    Show,
    ShowOverlay {
        html: String,
        #[serde(default)]
        position: OverlayPosition,
    },
    Redirect {
        url: String,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::ReplaceText { .. } => "replace-text",
            ActionKind::SetStyle { .. } => "set-style",
            ActionKind::AddClass { .. } => "add-class",
            ActionKind::RemoveClass { .. } => "remove-class",
            ActionKind::Hide => "hide",
            ActionKind::Show => "show",
            ActionKind::ShowOverlay { .. } => "show-overlay",
            ActionKind::Redirect { .. } => "redirect",
        }
    }

    /// Text mutations never fan out to every match.
    pub fn mutates_text(&self) -> bool {
        matches!(self, ActionKind::ReplaceText { .. })
    }

    /// Overlay and redirect act on the page, not on a resolved element.
    pub fn needs_target(&self) -> bool {
        !matches!(self, ActionKind::ShowOverlay { .. } | ActionKind::Redirect { .. })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnimationKind {
    Fade,
    Slide,
}

impl AnimationKind {
    /// Transition the animation rides on; set on the element before the
    /// mutation lands.
    pub fn transition_css(&self) -> &'static str {
        match self {
            AnimationKind::Fade => "opacity 0.4s ease-in-out",
            AnimationKind::Slide => "transform 0.4s ease-in-out, opacity 0.4s ease-in-out",
        }
    }
}

/// An [`ActionKind`] plus the scheduling knobs shared by every kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionDescriptor {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<AnimationKind>,
    /// `None` keeps the kind's default multiplicity policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_to_all: Option<bool>,
}

impl ActionDescriptor {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            delay_ms: 0,
            animation: None,
            apply_to_all: None,
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_animation(mut self, animation: AnimationKind) -> Self {
        self.animation = Some(animation);
        self
    }

    pub fn apply_to_all(mut self, apply_to_all: bool) -> Self {
        self.apply_to_all = Some(apply_to_all);
        self
    }
}

/// Where an element-targeted action looks for its element.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionTarget {
    pub strategies: Vec<SelectorStrategy>,
    #[serde(default)]
    pub hints: DisambiguationHints,
}

impl ActionTarget {
    pub fn new(strategies: Vec<SelectorStrategy>) -> Self {
        Self {
            strategies,
            hints: DisambiguationHints::none(),
        }
    }

    pub fn with_hints(mut self, hints: DisambiguationHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn primary_selector(&self) -> Option<&str> {
        self.strategies.first().map(|strategy| strategy.selector.as_str())
    }
}

/// Authoring unit consumed by the executor: the action and, when the kind
/// needs one, its target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(flatten)]
    pub action: ActionDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ActionTarget>,
}

impl ActionSpec {
    pub fn new(action: ActionDescriptor) -> Self {
        Self {
            action,
            target: None,
        }
    }

    pub fn with_target(mut self, target: ActionTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Stable identity for dedup: declared primary selector (or the
    /// page-level parameter) plus the action kind.
    pub fn dedup_key(&self) -> String {
        let target = match &self.action.kind {
            ActionKind::Redirect { url } => url.as_str(),
            ActionKind::ShowOverlay { .. } => "overlay",
            _ => self
                .target
                .as_ref()
                .and_then(ActionTarget::primary_selector)
                .unwrap_or(""),
        };
        format!("{}::{}", self.action.kind.name(), target)
    }

    /// Boundary validation; malformed configurations never reach the
    /// scheduler.
    pub fn validate(&self) -> Result<(), String> {
        match &self.action.kind {
            ActionKind::SetStyle { property, .. } if property.trim().is_empty() => {
                return Err("style property is empty".into());
            }
            ActionKind::AddClass { class } | ActionKind::RemoveClass { class }
                if class.trim().is_empty() || class.contains(char::is_whitespace) =>
            {
                return Err(format!("invalid class name {class:?}"));
            }
            ActionKind::ShowOverlay { html, .. } if html.trim().is_empty() => {
                return Err("overlay html is empty".into());
            }
            ActionKind::Redirect { url } => {
                if url.trim().is_empty() {
                    return Err("redirect url is empty".into());
                }
                if !url.starts_with('/') && Url::parse(url).is_err() {
                    return Err(format!("redirect url {url:?} is neither absolute nor site-relative"));
                }
            }
            _ => {}
        }

        if self.action.kind.needs_target() {
            let usable = self.target.as_ref().is_some_and(|target| {
                !target.strategies.is_empty()
                    && target
                        .strategies
                        .iter()
                        .all(|strategy| !strategy.selector.trim().is_empty())
            });
            if !usable {
                return Err(format!(
                    "{} requires at least one non-empty selector strategy",
                    self.action.kind.name()
                ));
            }
        }
        Ok(())
    }
}

/// What happened to one action. Failures are data, not panics; the worst
/// case for the host page is a personalization that does not apply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ExecOutcome {
    Applied {
        mutated: usize,
        matched: usize,
    },
    PartialFailure {
        mutated: usize,
        failed: usize,
        matched: usize,
    },
    /// Every selector strategy came up empty.
    NotFound,
    /// Dedup key already consumed in this page view.
    Duplicate,
    /// Armed with a delay; the terminal outcome is recorded when the
    /// timer fires.
    Scheduled,
    /// Page view ended before the timer fired.
    Cancelled,
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagetailor_element_locator::StrategyKind;

    fn targeted(kind: ActionKind) -> ActionSpec {
        ActionSpec::new(ActionDescriptor::new(kind)).with_target(ActionTarget::new(vec![
            SelectorStrategy::new(".banner", StrategyKind::ClassCombo),
        ]))
    }

    #[test]
    fn test_tagged_json_shape() {
        let spec = targeted(ActionKind::ReplaceText {
            new_text: "Hello".into(),
            original_text: Some("Hi".into()),
        });
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "replace-text");
        assert_eq!(json["new_text"], "Hello");

        let parsed: ActionSpec = serde_json::from_value(json).unwrap();
        assert!(parsed.action.kind.mutates_text());
    }

    #[test]
    fn test_validate_rejects_missing_target() {
        let spec = ActionSpec::new(ActionDescriptor::new(ActionKind::Hide));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_redirect() {
        let spec = ActionSpec::new(ActionDescriptor::new(ActionKind::Redirect {
            url: "  ".into(),
        }));
        assert!(spec.validate().is_err());

        let relative = ActionSpec::new(ActionDescriptor::new(ActionKind::Redirect {
            url: "/pricing".into(),
        }));
        assert!(relative.validate().is_ok());

        let junk = ActionSpec::new(ActionDescriptor::new(ActionKind::Redirect {
            url: "not a url".into(),
        }));
        assert!(junk.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_whitespace_class() {
        let spec = targeted(ActionKind::AddClass {
            class: "two words".into(),
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_dedup_key_combines_kind_and_selector() {
        let hide = targeted(ActionKind::Hide);
        let show = targeted(ActionKind::Show);
        assert_ne!(hide.dedup_key(), show.dedup_key());
        assert_eq!(hide.dedup_key(), "hide::.banner");
    }
}
