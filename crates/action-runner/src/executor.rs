//! Scheduling and execution against the live page.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pagetailor_dom_bridge::{DomError, ElementRef, PageDom};
use pagetailor_element_locator::{resolve, DisambiguationHints, LocatorError, Resolution};

use crate::model::{ActionDescriptor, ActionKind, ActionSpec, ActionTarget, ExecOutcome};

/// Terminal record for one executed (or cancelled) action.
#[derive(Clone, Debug)]
pub struct CompletedAction {
    pub key: String,
    pub outcome: ExecOutcome,
}

struct Inner {
    dom: Arc<dyn PageDom>,
    /// Cancelled on unload; swapped for a fresh token on navigation.
    page_token: RwLock<CancellationToken>,
    fired_keys: Mutex<HashSet<String>>,
    pending: AtomicUsize,
    completions: Mutex<Vec<CompletedAction>>,
    idle: Notify,
}

impl Inner {
    fn record(&self, key: String, outcome: ExecOutcome) {
        self.completions.lock().push(CompletedAction { key, outcome });
    }

    async fn apply(&self, spec: &ActionSpec) -> ExecOutcome {
        match &spec.action.kind {
            ActionKind::ShowOverlay { html, position } => {
                match self.dom.insert_overlay(html, *position).await {
                    Ok(()) => ExecOutcome::Applied {
                        mutated: 1,
                        matched: 1,
                    },
                    Err(err) => {
                        warn!(%err, "overlay insertion failed");
                        ExecOutcome::PartialFailure {
                            mutated: 0,
                            failed: 1,
                            matched: 1,
                        }
                    }
                }
            }
            ActionKind::Redirect { url } => match self.dom.navigate(url).await {
                Ok(()) => ExecOutcome::Applied {
                    mutated: 1,
                    matched: 1,
                },
                Err(err) => {
                    warn!(%err, url, "redirect failed");
                    ExecOutcome::PartialFailure {
                        mutated: 0,
                        failed: 1,
                        matched: 1,
                    }
                }
            },
            _ => self.apply_to_elements(spec).await,
        }
    }

    async fn apply_to_elements(&self, spec: &ActionSpec) -> ExecOutcome {
        let Some(target) = spec.target.as_ref() else {
            return ExecOutcome::Invalid("action has no target".into());
        };
        let hints = effective_hints(&spec.action.kind, target);
        let resolution = match resolve(self.dom.as_ref(), &target.strategies, &hints).await {
            Ok(resolution) => resolution,
            Err(LocatorError::ElementNotFound) => {
                debug!(key = %spec.dedup_key(), "target not found");
                return ExecOutcome::NotFound;
            }
            Err(err @ LocatorError::NoStrategies) => {
                return ExecOutcome::Invalid(err.to_string());
            }
        };

        let matched = resolution.match_count();
        let selected = select_elements(&spec.action, &resolution);
        let mut mutated = 0;
        let mut failed = 0;
        for element in &selected {
            match apply_one(self.dom.as_ref(), &spec.action, element).await {
                Ok(()) => mutated += 1,
                Err(err) => {
                    // Keep going: mutating the remaining matches is better
                    // than aborting the whole batch.
                    debug!(%err, node = element.node_id, "element mutation failed");
                    failed += 1;
                }
            }
        }

        if failed == 0 {
            ExecOutcome::Applied { mutated, matched }
        } else {
            ExecOutcome::PartialFailure {
                mutated,
                failed,
                matched,
            }
        }
    }
}

/// Target-multiplicity policy. Text mutations always narrow to the
/// disambiguated element; other kinds fan out to every match unless the
/// author restricted them.
fn select_elements(action: &ActionDescriptor, resolution: &Resolution) -> Vec<ElementRef> {
    if action.kind.mutates_text() {
        return vec![resolution.preferred_element().clone()];
    }
    match action.apply_to_all {
        Some(true) => resolution.matches.clone(),
        Some(false) => vec![resolution.preferred_element().clone()],
        None if resolution.strategy_unique_hint => {
            vec![resolution.preferred_element().clone()]
        }
        None => resolution.matches.clone(),
    }
}

/// Text-replacing actions reuse their authored original text as the
/// disambiguation hint unless the target supplied its own.
fn effective_hints(kind: &ActionKind, target: &ActionTarget) -> DisambiguationHints {
    let mut hints = target.hints.clone();
    if hints.original_text.is_none() {
        if let ActionKind::ReplaceText {
            original_text: Some(text),
            ..
        } = kind
        {
            hints.original_text = Some(text.clone());
        }
    }
    hints
}

async fn apply_one(
    dom: &dyn PageDom,
    action: &ActionDescriptor,
    element: &ElementRef,
) -> Result<(), DomError> {
    if let Some(animation) = action.animation {
        dom.set_style(element, "transition", animation.transition_css())
            .await?;
    }
    match &action.kind {
        ActionKind::ReplaceText { new_text, .. } => dom.set_text(element, new_text).await,
        ActionKind::SetStyle { property, value } => dom.set_style(element, property, value).await,
        ActionKind::AddClass { class } => dom.add_class(element, class).await,
        ActionKind::RemoveClass { class } => dom.remove_class(element, class).await,
        ActionKind::Hide => dom.set_visible(element, false).await,
        ActionKind::Show => dom.set_visible(element, true).await,
        ActionKind::ShowOverlay { .. } | ActionKind::Redirect { .. } => Ok(()),
    }
}

/// Executes rule actions: validates at the boundary, dedups per page
/// view, arms an independent timer per delayed action and cancels
/// everything still pending when the page goes away.
pub struct ActionExecutor {
    inner: Arc<Inner>,
}

impl ActionExecutor {
    pub fn new(dom: Arc<dyn PageDom>) -> Self {
        Self {
            inner: Arc::new(Inner {
                dom,
                page_token: RwLock::new(CancellationToken::new()),
                fired_keys: Mutex::new(HashSet::new()),
                pending: AtomicUsize::new(0),
                completions: Mutex::new(Vec::new()),
                idle: Notify::new(),
            }),
        }
    }

    /// Run (or arm) one action. Returns the immediate outcome; a delayed
    /// action answers [`ExecOutcome::Scheduled`] and lands its terminal
    /// outcome in [`completions`](Self::completions) when the timer fires.
    pub async fn execute(&self, spec: &ActionSpec) -> ExecOutcome {
        if let Err(reason) = spec.validate() {
            warn!(reason, "action rejected");
            return ExecOutcome::Invalid(reason);
        }

        let key = spec.dedup_key();
        if !self.inner.fired_keys.lock().insert(key.clone()) {
            debug!(key, "action suppressed as duplicate");
            return ExecOutcome::Duplicate;
        }

        if spec.action.delay_ms == 0 {
            let outcome = self.inner.apply(spec).await;
            self.inner.record(key, outcome.clone());
            return outcome;
        }

        let inner = self.inner.clone();
        let token = self.inner.page_token.read().clone();
        let spec = spec.clone();
        let delay = Duration::from_millis(spec.action.delay_ms);
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => ExecOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => inner.apply(&spec).await,
            };
            inner.record(spec.dedup_key(), outcome);
            inner.pending.fetch_sub(1, Ordering::SeqCst);
            inner.idle.notify_waiters();
        });
        ExecOutcome::Scheduled
    }

    /// Navigation boundary: pending timers die with the old page view and
    /// the dedup set starts over.
    pub fn reset_page_view(&self) {
        let fresh = CancellationToken::new();
        let old = {
            let mut token = self.inner.page_token.write();
            std::mem::replace(&mut *token, fresh)
        };
        old.cancel();
        self.inner.fired_keys.lock().clear();
    }

    /// Unload: cancel whatever is still pending.
    pub fn cancel_all(&self) {
        self.inner.page_token.read().cancel();
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> Vec<CompletedAction> {
        self.inner.completions.lock().clone()
    }

    /// Wait until no timers remain armed. Test and simulation helper.
    pub async fn wait_idle(&self) {
        loop {
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.inner.idle.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
