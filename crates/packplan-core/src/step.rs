#![forbid(unsafe_code)]

//! Minimum split increments by package size.
//!
//! Units ship in cases, so a split must move whole cases: a gallon unit
//! steps by 4, quarts by 12, 8oz bottles by 60. Everything else steps by 1.

use serde::{Deserialize, Serialize};

/// One size-class rule. Sizes are matched case-insensitively with all
/// whitespace removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRule {
    /// Any of these substrings selects the rule.
    pub patterns: Vec<String>,
    /// None of these substrings may be present.
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Patterns must not directly follow an ASCII digit ("8oz" vs "128oz").
    #[serde(default)]
    pub standalone: bool,
    /// Increment for matching units.
    pub step: u32,
}

impl StepRule {
    fn matches(&self, normalized: &str) -> bool {
        if self.excludes.iter().any(|ex| normalized.contains(ex.as_str())) {
            return false;
        }
        self.patterns.iter().any(|pattern| {
            normalized.match_indices(pattern.as_str()).any(|(at, _)| {
                !self.standalone
                    || normalized[..at]
                        .chars()
                        .next_back()
                        .is_none_or(|c| !c.is_ascii_digit())
            })
        })
    }
}

/// Ordered rule list; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepRules(pub Vec<StepRule>);

impl Default for StepRules {
    fn default() -> Self {
        Self(vec![
            StepRule {
                patterns: vec!["gallon".into()],
                excludes: vec!["5gal".into()],
                standalone: false,
                step: 4,
            },
            StepRule {
                patterns: vec!["quart".into(), "32oz".into()],
                excludes: Vec::new(),
                standalone: false,
                step: 12,
            },
            StepRule {
                patterns: vec!["8oz".into()],
                excludes: Vec::new(),
                standalone: true,
                step: 60,
            },
        ])
    }
}

impl StepRules {
    /// Increment for a unit of the given size. Never zero.
    #[must_use]
    pub fn step_for(&self, size: &str) -> u32 {
        let normalized = normalize(size);
        self.0
            .iter()
            .find(|rule| rule.matches(&normalized))
            .map_or(1, |rule| rule.step.max(1))
    }
}

fn normalize(size: &str) -> String {
    size.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Round `requested` to the nearest multiple of `step`; halves round up.
#[must_use]
pub fn round_to_step(requested: u32, step: u32) -> u32 {
    let step = step.max(1);
    let rounded = (u64::from(requested) + u64::from(step) / 2) / u64::from(step) * u64::from(step);
    u32::try_from(rounded).unwrap_or(u32::MAX / step * step)
}
