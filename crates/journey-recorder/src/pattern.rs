//! Multi-page pattern matching.
//!
//! Pure functions over the ordered list of visited paths. Comparison is
//! substring-based and case-insensitive, so a declared `/pricing` matches
//! `/pricing?utm_source=x` and `/en/pricing/plans`.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    /// Targets must be hit in order; unrelated pages in between are fine.
    #[default]
    Sequence,
    /// Every target must be hit at least once, order irrelevant.
    AnyOrder,
}

/// Declared multi-page pattern. Immutable once evaluated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PagePattern {
    pub pages: Vec<String>,
    #[serde(default)]
    pub mode: MatchMode,
}

impl PagePattern {
    pub fn sequence<S: Into<String>>(pages: impl IntoIterator<Item = S>) -> Self {
        Self {
            pages: pages.into_iter().map(Into::into).collect(),
            mode: MatchMode::Sequence,
        }
    }

    pub fn any_order<S: Into<String>>(pages: impl IntoIterator<Item = S>) -> Self {
        Self {
            pages: pages.into_iter().map(Into::into).collect(),
            mode: MatchMode::AnyOrder,
        }
    }

    /// Evaluate against visited paths, oldest first. An empty target list
    /// matches vacuously.
    pub fn matches<S: AsRef<str>>(&self, visited: &[S]) -> bool {
        match self.mode {
            MatchMode::Sequence => {
                let mut next_target = 0;
                for path in visited {
                    if next_target == self.pages.len() {
                        break;
                    }
                    if path_matches(path.as_ref(), &self.pages[next_target]) {
                        next_target += 1;
                    }
                }
                next_target == self.pages.len()
            }
            MatchMode::AnyOrder => self.pages.iter().all(|target| {
                visited
                    .iter()
                    .any(|path| path_matches(path.as_ref(), target))
            }),
        }
    }
}

/// Substring-or-prefix comparison between a visited path and a declared
/// target fragment.
pub fn path_matches(visited: &str, target: &str) -> bool {
    if target.is_empty() {
        return false;
    }
    visited
        .to_ascii_lowercase()
        .contains(&target.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_match_ignores_query_and_case() {
        assert!(path_matches("/Pricing?utm_source=x", "/pricing"));
        assert!(path_matches("/en/pricing/plans", "/pricing"));
        assert!(!path_matches("/blog", "/pricing"));
    }

    #[test]
    fn test_sequence_allows_gaps() {
        let pattern = PagePattern::sequence(["/products", "/pricing", "/checkout"]);
        let visited = ["/", "/products", "/blog/post", "/pricing", "/about", "/checkout"];
        assert!(pattern.matches(&visited));
    }

    #[test]
    fn test_sequence_rejects_out_of_order() {
        let pattern = PagePattern::sequence(["/pricing", "/products"]);
        let visited = ["/products", "/pricing"];
        assert!(!pattern.matches(&visited));
    }

    #[test]
    fn test_sequence_incomplete() {
        let pattern = PagePattern::sequence(["/products", "/checkout"]);
        assert!(!pattern.matches(&["/products", "/pricing"]));
    }

    #[test]
    fn test_any_order_matches_regardless_of_order() {
        let pattern = PagePattern::any_order(["/pricing", "/products"]);
        assert!(pattern.matches(&["/products", "/blog", "/pricing"]));
        assert!(pattern.matches(&["/pricing", "/products"]));
        assert!(!pattern.matches(&["/pricing", "/blog"]));
    }

    #[test]
    fn test_one_visit_can_satisfy_repeated_target_in_any_order() {
        let pattern = PagePattern::any_order(["/pricing", "/pricing"]);
        assert!(pattern.matches(&["/pricing"]));
    }

    #[test]
    fn test_sequence_requires_repeats_separately() {
        let pattern = PagePattern::sequence(["/pricing", "/pricing"]);
        assert!(!pattern.matches(&["/pricing"]));
        assert!(pattern.matches(&["/pricing", "/docs", "/pricing"]));
    }

    #[test]
    fn test_empty_pattern_matches_vacuously() {
        let pattern = PagePattern::sequence(Vec::<String>::new());
        assert!(pattern.matches(&["/anything"]));
        assert!(pattern.matches(&[] as &[&str]));
    }
}
