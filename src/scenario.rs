//! Scripted visitor scenarios.
//!
//! A scenario file describes a small site (pages with their elements) and a
//! timed event script. Running one drives the full runtime against a
//! [`MemoryDom`], which makes rule behavior reproducible without a browser.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use pagetailor_core_types::{ManualClock, Viewport};
use pagetailor_dom_bridge::{DomMutation, ElementSpec, MemoryDom};
use pagetailor_event_bus::{PageNavigation, RuntimeSignalEvent};
use pagetailor_geo_cache::{CountryInfo, FixedGeoLookup};
use pagetailor_journey_recorder::JourneyAnalytics;
use pagetailor_action_runner::ExecOutcome;
use pagetailor_beacon_sink::MemoryBeaconSink;
use pagetailor_trigger_engine::Rule;
use pagetailor_web_store::MemoryStore;

use crate::config::RuntimeConfig;
use crate::context::{HostEnvironment, RuntimeContext};
use crate::runtime::{PageRuntime, StorageReport};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_viewport() -> Viewport {
    Viewport::new(1280, 800)
}

fn default_origin() -> String {
    "https://example.test".to_string()
}

fn default_filled() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_viewport")]
    pub viewport: Viewport,
    /// Two-letter country the simulated visitor resolves to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub pages: Vec<PageSpec>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PageSpec {
    pub path: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub elements: Vec<ElementDef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ElementDef {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub text: String,
}

impl ElementDef {
    fn to_spec(&self) -> ElementSpec {
        let mut spec = ElementSpec::new(&self.tag).with_text(&self.text);
        if let Some(id) = &self.id {
            spec = spec.with_id(id);
        }
        for class in &self.classes {
            spec = spec.with_class(class);
        }
        for (name, value) in &self.attributes {
            spec = spec.with_attribute(name, value);
        }
        spec
    }
}

/// One scripted visitor action.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "do", rename_all = "kebab-case")]
pub enum Step {
    Navigate {
        path: String,
        #[serde(default)]
        query: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        referrer: Option<String>,
    },
    Scroll {
        percent: u8,
    },
    Click {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Form {
        field: String,
        #[serde(default = "default_filled")]
        filled: bool,
    },
    Wait {
        ms: u64,
    },
    ExitIntent,
    Visibility {
        hidden: bool,
    },
    Unload,
}

impl Step {
    fn describe(&self) -> String {
        match self {
            Step::Navigate { path, .. } => format!("navigate {path}"),
            Step::Scroll { percent } => format!("scroll {percent}%"),
            Step::Click { selector, .. } => format!("click {selector}"),
            Step::Form { field, .. } => format!("form {field}"),
            Step::Wait { ms } => format!("wait {ms}ms"),
            Step::ExitIntent => "exit-intent".to_string(),
            Step::Visibility { hidden: true } => "visibility hidden".to_string(),
            Step::Visibility { hidden: false } => "visibility visible".to_string(),
            Step::Unload => "unload".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FiringSummary {
    pub rule_id: String,
    pub outcomes: Vec<ExecOutcome>,
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub step: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fired: Vec<FiringSummary>,
}

/// Everything a scenario run produced.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub steps: Vec<StepReport>,
    pub analytics: JourneyAnalytics,
    pub dom_mutations: Vec<String>,
    pub overlays_shown: usize,
    pub redirects: Vec<String>,
    pub page_view_beacons: usize,
    pub journey_beacons: usize,
    pub storage: StorageReport,
}

pub fn parse_scenario(content: &str) -> Result<Scenario> {
    let scenario: Scenario =
        serde_yaml::from_str(content).context("failed to parse scenario document")?;
    validate_scenario(&scenario)?;
    Ok(scenario)
}

pub async fn load_scenario(path: &Path) -> Result<Scenario> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read scenario file {}", path.display()))?;
    parse_scenario(&raw)
}

fn validate_scenario(scenario: &Scenario) -> Result<()> {
    if scenario.pages.is_empty() {
        bail!("scenario {:?} defines no pages", scenario.name);
    }
    if scenario.steps.is_empty() {
        bail!("scenario {:?} defines no steps", scenario.name);
    }
    for step in &scenario.steps {
        if let Step::Navigate { path, .. } = step {
            if !scenario.pages.iter().any(|page| &page.path == path) {
                bail!("scenario step navigates to undeclared page {path:?}");
            }
        }
    }
    match &scenario.steps[0] {
        Step::Navigate { .. } => Ok(()),
        other => bail!(
            "scenario must start with a navigate step, found {:?}",
            other.describe()
        ),
    }
}

/// Run a scenario end to end. The visit always ends: a missing final
/// unload step is dispatched implicitly so pending work settles.
pub async fn run_scenario(
    scenario: &Scenario,
    rules: Vec<Rule>,
    config: RuntimeConfig,
) -> Result<SimulationReport> {
    let dom = Arc::new(MemoryDom::new());
    let store = Arc::new(MemoryStore::new());
    let sink = MemoryBeaconSink::new();
    let clock = Arc::new(ManualClock::starting_at(1_700_000_000_000));
    let country = match &scenario.country {
        Some(code) => CountryInfo::new(code.to_ascii_uppercase(), code.to_ascii_uppercase()),
        None => CountryInfo::unknown(),
    };

    let host = HostEnvironment::new(dom.clone(), store)
        .with_user_agent(&scenario.user_agent)
        .with_viewport(scenario.viewport)
        .with_clock(clock.clone())
        .with_geo_lookup(Arc::new(FixedGeoLookup::returning(country)))
        .with_beacon_sink(sink.clone());

    let ctx = RuntimeContext::initialize(config, rules, host).await;
    let runtime = PageRuntime::start(ctx);

    info!(scenario = %scenario.name, steps = scenario.steps.len(), "simulation started");

    let mut reports = Vec::with_capacity(scenario.steps.len());
    let mut on_page_ms: u64 = 0;
    let mut unloaded = false;

    for step in &scenario.steps {
        let event = match step {
            Step::Navigate {
                path,
                query,
                referrer,
            } => {
                let page = scenario
                    .pages
                    .iter()
                    .find(|page| &page.path == path)
                    .context("navigate step lost its page")?;
                dom.replace_document(page.elements.iter().map(ElementDef::to_spec));
                on_page_ms = 0;

                let mut nav = PageNavigation::new(
                    path,
                    format!("{}{}", scenario.origin.trim_end_matches('/'), path),
                    &page.title,
                );
                if let Some(referrer) = referrer {
                    nav = nav.with_referrer(referrer);
                }
                for (key, value) in query {
                    nav = nav.with_query(key, value);
                }
                RuntimeSignalEvent::PageLoad(nav)
            }
            Step::Scroll { percent } => RuntimeSignalEvent::ScrollTick {
                depth_percent: *percent,
            },
            Step::Click { selector, text } => RuntimeSignalEvent::Click {
                selector: selector.clone(),
                text: text.clone(),
            },
            Step::Form { field, filled } => RuntimeSignalEvent::FormInput {
                field: field.clone(),
                value_present: *filled,
            },
            Step::Wait { ms } => {
                clock.advance_ms(*ms as i64);
                on_page_ms += ms;
                RuntimeSignalEvent::TimerTick {
                    elapsed_on_page_ms: on_page_ms,
                }
            }
            Step::ExitIntent => RuntimeSignalEvent::ExitIntent,
            Step::Visibility { hidden } => RuntimeSignalEvent::VisibilityChange { hidden: *hidden },
            Step::Unload => {
                unloaded = true;
                RuntimeSignalEvent::Unload
            }
        };

        let firings = runtime.handle(event).await;
        reports.push(StepReport {
            step: step.describe(),
            fired: firings
                .into_iter()
                .map(|firing| FiringSummary {
                    rule_id: firing.rule_id,
                    outcomes: firing.outcomes,
                })
                .collect(),
        });
    }

    if !unloaded {
        runtime.handle(RuntimeSignalEvent::Unload).await;
    }
    // Unload cancelled every armed delay, so this settles promptly.
    runtime.context().executor().wait_idle().await;
    // Beacon emission is detached; give those tasks room to land before
    // counting them.
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }

    let mutations = dom.mutations();
    let overlays_shown = mutations
        .iter()
        .filter(|mutation| matches!(mutation, DomMutation::OverlayInserted { .. }))
        .count();
    let redirects = mutations
        .iter()
        .filter_map(|mutation| match mutation {
            DomMutation::Navigated { url } => Some(url.clone()),
            _ => None,
        })
        .collect();

    let report = SimulationReport {
        scenario: scenario.name.clone(),
        steps: reports,
        analytics: runtime.analytics_snapshot(),
        dom_mutations: mutations.iter().map(describe_mutation).collect(),
        overlays_shown,
        redirects,
        page_view_beacons: sink.page_views().len(),
        journey_beacons: sink.journey_updates().len(),
        storage: runtime.storage_usage().await,
    };
    runtime.shutdown();
    Ok(report)
}

fn describe_mutation(mutation: &DomMutation) -> String {
    match mutation {
        DomMutation::TextSet { node, text } => format!("node {node}: text set to {text:?}"),
        DomMutation::AttributeSet { node, name, value } => {
            format!("node {node}: attribute {name}={value:?}")
        }
        DomMutation::ClassAdded { node, class } => format!("node {node}: class {class:?} added"),
        DomMutation::ClassRemoved { node, class } => {
            format!("node {node}: class {class:?} removed")
        }
        DomMutation::StyleSet {
            node,
            property,
            value,
        } => format!("node {node}: style {property}={value:?}"),
        DomMutation::VisibilitySet { node, visible: true } => format!("node {node}: shown"),
        DomMutation::VisibilitySet {
            node,
            visible: false,
        } => format!("node {node}: hidden"),
        DomMutation::OverlayInserted { position } => {
            format!("overlay inserted ({position:?})")
        }
        DomMutation::Navigated { url } => format!("redirected to {url}"),
    }
}
