//! Rules: trigger conjunctions bound to actions.

use serde::{Deserialize, Serialize};

use pagetailor_action_runner::ActionSpec;
use pagetailor_event_bus::SignalKind;

use crate::trigger::{EvalContext, Trigger};

/// One personalization rule from the authoring side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// All triggers must hold at the same evaluation for the rule to fire.
    pub triggers: Vec<Trigger>,
    pub actions: Vec<ActionSpec>,
    /// Fire again on later qualifying events instead of only once per
    /// page view.
    #[serde(default)]
    pub refire: bool,
}

impl Rule {
    pub fn interested_in(&self, kind: SignalKind) -> bool {
        self.triggers
            .iter()
            .any(|trigger| trigger.interests().contains(&kind))
    }

    /// Conjunction over all triggers. A rule with no triggers never fires.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        !self.triggers.is_empty() && self.triggers.iter().all(|trigger| trigger.evaluate(ctx))
    }

    /// Authoring-boundary validation, run before the rule is installed.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("rule id is empty".into());
        }
        if self.triggers.is_empty() {
            return Err(format!("rule {:?} has no triggers", self.id));
        }
        if self.actions.is_empty() {
            return Err(format!("rule {:?} has no actions", self.id));
        }
        for action in &self.actions {
            action
                .validate()
                .map_err(|reason| format!("rule {:?}: {reason}", self.id))?;
        }
        Ok(())
    }
}
