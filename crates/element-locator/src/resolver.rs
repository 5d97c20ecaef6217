//! Strategy walk and disambiguation.

use tracing::debug;

use pagetailor_dom_bridge::PageDom;

use crate::errors::LocatorError;
use crate::types::{DisambiguationHints, Resolution, SelectorStrategy};

/// Resolve a target element from its candidate strategies.
///
/// Strategies run in descending reliability order against the live DOM.
/// The first one matching exactly one element wins outright. A
/// multi-match is settled by hints (original text, then position) and a
/// hint-settled pick also wins outright; a hint-less multi-match is only
/// remembered, so a later strategy can still produce a unique match
/// before we fall back to "first in document order".
pub async fn resolve(
    dom: &dyn PageDom,
    strategies: &[SelectorStrategy],
    hints: &DisambiguationHints,
) -> Result<Resolution, LocatorError> {
    if strategies.is_empty() {
        return Err(LocatorError::NoStrategies);
    }

    let mut ordered: Vec<&SelectorStrategy> = strategies.iter().collect();
    ordered.sort_by(|a, b| b.effective_reliability().cmp(&a.effective_reliability()));

    let mut fallback: Option<Resolution> = None;

    for strategy in ordered {
        let matches = match dom.query(&strategy.selector).await {
            Ok(matches) => matches,
            Err(err) => {
                debug!(selector = %strategy.selector, %err, "strategy skipped");
                continue;
            }
        };

        match matches.len() {
            0 => continue,
            1 => {
                return Ok(Resolution {
                    matches,
                    preferred: 0,
                    unique: true,
                    strategy_unique_hint: strategy.unique_hint,
                    selector: strategy.selector.clone(),
                    kind: strategy.kind,
                });
            }
            count => {
                debug!(
                    selector = %strategy.selector,
                    count,
                    "strategy matched multiple elements"
                );
                if let Some(wanted) = &hints.original_text {
                    for (index, element) in matches.iter().enumerate() {
                        let contains = dom
                            .text(element)
                            .await
                            .map(|text| text.contains(wanted.as_str()))
                            .unwrap_or(false);
                        if contains {
                            return Ok(Resolution {
                                matches,
                                preferred: index,
                                unique: false,
                                strategy_unique_hint: strategy.unique_hint,
                                selector: strategy.selector.clone(),
                                kind: strategy.kind,
                            });
                        }
                    }
                }
                if let Some(position) = hints.position {
                    if position < matches.len() {
                        return Ok(Resolution {
                            preferred: position,
                            unique: false,
                            strategy_unique_hint: strategy.unique_hint,
                            selector: strategy.selector.clone(),
                            kind: strategy.kind,
                            matches,
                        });
                    }
                }
                if fallback.is_none() {
                    fallback = Some(Resolution {
                        matches,
                        preferred: 0,
                        unique: false,
                        strategy_unique_hint: strategy.unique_hint,
                        selector: strategy.selector.clone(),
                        kind: strategy.kind,
                    });
                }
            }
        }
    }

    fallback.ok_or(LocatorError::ElementNotFound)
}
