//! Strategy and resolution types.

use serde::{Deserialize, Serialize};

use pagetailor_dom_bridge::ElementRef;

/// How a selector was derived, which implies how trustworthy it is.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// `#id` selectors.
    Id,
    /// Attribute selectors like `[data-testid="cta"]`.
    Attribute,
    /// Class combinations like `.cta.primary`.
    ClassCombo,
    /// Positional selectors like `button:nth-of-type(2)`.
    Positional,
    Other,
}

impl StrategyKind {
    /// Rank used when a strategy declares no explicit reliability.
    pub fn default_reliability(&self) -> u8 {
        match self {
            StrategyKind::Id => 100,
            StrategyKind::Attribute => 80,
            StrategyKind::ClassCombo => 60,
            StrategyKind::Positional => 40,
            StrategyKind::Other => 20,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Id => "id",
            StrategyKind::Attribute => "attribute",
            StrategyKind::ClassCombo => "class-combo",
            StrategyKind::Positional => "positional",
            StrategyKind::Other => "other",
        }
    }
}

/// One candidate way of locating the target element.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectorStrategy {
    pub selector: String,
    pub kind: StrategyKind,
    /// 0 means "use the kind's default rank".
    #[serde(default)]
    pub reliability: u8,
    /// Authoring marked this selector as pointing at exactly one element.
    #[serde(default)]
    pub unique_hint: bool,
}

impl SelectorStrategy {
    pub fn new(selector: impl Into<String>, kind: StrategyKind) -> Self {
        Self {
            selector: selector.into(),
            kind,
            reliability: 0,
            unique_hint: false,
        }
    }

    pub fn with_reliability(mut self, reliability: u8) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_unique_hint(mut self) -> Self {
        self.unique_hint = true;
        self
    }

    pub fn effective_reliability(&self) -> u8 {
        if self.reliability == 0 {
            self.kind.default_reliability()
        } else {
            self.reliability
        }
    }
}

/// Extra knowledge used to pick between several matches.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DisambiguationHints {
    /// Text the intended element contained when the rule was authored.
    #[serde(default)]
    pub original_text: Option<String>,
    /// Zero-based index into the match list.
    #[serde(default)]
    pub position: Option<usize>,
}

impl DisambiguationHints {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn text(original_text: impl Into<String>) -> Self {
        Self {
            original_text: Some(original_text.into()),
            position: None,
        }
    }

    pub fn position(position: usize) -> Self {
        Self {
            original_text: None,
            position: Some(position),
        }
    }
}

/// Outcome of a successful resolution. `matches` is the winning
/// strategy's full match list in document order.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub matches: Vec<ElementRef>,
    /// Index of the element disambiguation picked.
    pub preferred: usize,
    /// The winning strategy matched exactly one element.
    pub unique: bool,
    /// The winning strategy carried a uniqueness hint.
    pub strategy_unique_hint: bool,
    /// Selector that produced the matches.
    pub selector: String,
    pub kind: StrategyKind,
}

impl Resolution {
    pub fn preferred_element(&self) -> &ElementRef {
        &self.matches[self.preferred]
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }
}
