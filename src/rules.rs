//! Loading and validating rule documents.
//!
//! Rules arrive from the authoring side as YAML or JSON. Everything is
//! checked at this boundary so the engine can assume installed rules are
//! well formed.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use pagetailor_trigger_engine::Rule;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RulesDocument {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Parse and validate a rules document. JSON documents parse too since
/// the YAML reader accepts flow syntax; explicit extensions are handled
/// in [`load_rules`].
pub fn parse_rules(content: &str) -> Result<Vec<Rule>> {
    let document: RulesDocument =
        serde_yaml::from_str(content).context("failed to parse rules document")?;
    validate_rules(&document.rules)?;
    Ok(document.rules)
}

/// Every problem in the document is reported, not just the first.
pub fn validate_rules(rules: &[Rule]) -> Result<()> {
    let mut problems = Vec::new();
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.id.as_str()) {
            problems.push(format!("duplicate rule id {:?}", rule.id));
        }
        if let Err(reason) = rule.validate() {
            problems.push(reason);
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        bail!("invalid rules document: {}", problems.join("; "))
    }
}

pub async fn load_rules(path: &Path) -> Result<Vec<Rule>> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read rules file {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase());

    let document: RulesDocument = match ext.as_deref() {
        Some("json") => serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse JSON rules {}", path.display()))?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse YAML rules {}", path.display()))?,
        _ => match serde_yaml::from_str(&raw) {
            Ok(value) => value,
            Err(yaml_err) => serde_json::from_str(&raw).map_err(|json_err| {
                anyhow!(
                    "failed to parse rules {} as yaml ({}) or json ({})",
                    path.display(),
                    yaml_err,
                    json_err
                )
            })?,
        },
    };
    validate_rules(&document.rules)?;
    debug!(path = %path.display(), rules = document.rules.len(), "rules loaded");
    Ok(document.rules)
}
