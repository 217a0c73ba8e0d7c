//! Setup matrices: changeover duration and cost between resource setups.
//!
//! A matrix is a priority-ordered list of rules. Rule lookup walks the
//! rules in ascending priority and returns the first one whose
//! from-pattern matches the current setup and whose to-pattern matches
//! the requested setup. Patterns support the `*` and `?` wildcards; an
//! empty pattern matches anything. Priorities are unique within a
//! matrix, enforced when the rule is inserted.

use crate::error::{PlanError, PlanResult};
use chrono::Duration;
use tracing::warn;

/// A single changeover rule.
#[derive(Debug, Clone)]
pub struct SetupRule {
    /// Key field: unique within the owning matrix, lower is evaluated first.
    pub priority: i32,
    /// Pattern matched against the original setup. Empty matches all.
    pub from_setup: String,
    /// Pattern matched against the new setup. Empty matches all.
    pub to_setup: String,
    /// Changeover time.
    pub duration: Duration,
    /// Changeover cost.
    pub cost: f64,
}

impl SetupRule {
    pub fn new(priority: i32) -> Self {
        SetupRule {
            priority,
            from_setup: String::new(),
            to_setup: String::new(),
            duration: Duration::zero(),
            cost: 0.0,
        }
    }

    pub fn from(mut self, pattern: impl Into<String>) -> Self {
        self.from_setup = pattern.into();
        self
    }

    pub fn to(mut self, pattern: impl Into<String>) -> Self {
        self.to_setup = pattern.into();
        self
    }

    pub fn taking(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn costing(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }
}

/// A table of setup-to-setup conversion rules for a resource.
#[derive(Debug, Clone, Default)]
pub struct SetupMatrix {
    pub name: String,
    /// Rules in ascending priority order.
    rules: Vec<SetupRule>,
}

impl SetupMatrix {
    pub fn new(name: impl Into<String>) -> Self {
        SetupMatrix {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// Insert a rule in priority order. A duplicate priority is a data
    /// error and leaves the matrix unchanged.
    pub fn add_rule(&mut self, rule: SetupRule) -> PlanResult<()> {
        match self.rules.binary_search_by_key(&rule.priority, |r| r.priority) {
            Ok(_) => Err(PlanError::data(format!(
                "Duplicate priority {} in setup matrix '{}'",
                rule.priority, self.name
            ))),
            Err(pos) => {
                self.rules.insert(pos, rule);
                Ok(())
            }
        }
    }

    /// Drop the rule with the given priority.
    pub fn remove_rule(&mut self, priority: i32) -> bool {
        match self.rules.binary_search_by_key(&priority, |r| r.priority) {
            Ok(pos) => {
                self.rules.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = &SetupRule> {
        self.rules.iter()
    }

    /// Find the rule governing the changeover between two setup values.
    ///
    /// Returns None when the two setups are equal (no conversion needed)
    /// and also when no rule matches; in the latter case the conversion
    /// is undefined, which callers treat as infeasible.
    pub fn find_rule(&self, from: &str, to: &str) -> Option<&SetupRule> {
        if from == to {
            return None;
        }
        for rule in &self.rules {
            if !rule.from_setup.is_empty() && !match_wildcard(&rule.from_setup, from) {
                continue;
            }
            if !rule.to_setup.is_empty() && !match_wildcard(&rule.to_setup, to) {
                continue;
            }
            return Some(rule);
        }
        warn!(
            matrix = %self.name,
            from, to,
            "conversion undefined in setup matrix"
        );
        None
    }
}

/// Glob-style matching with `*` (any run) and `?` (any single byte).
pub fn match_wildcard(pattern: &str, value: &str) -> bool {
    let pat: &[u8] = pattern.as_bytes();
    let val: &[u8] = value.as_bytes();
    let (mut p, mut v) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_v = 0usize;

    while v < val.len() {
        if p < pat.len() && (pat[p] == val[v] || pat[p] == b'?') {
            p += 1;
            v += 1;
        } else if p < pat.len() && pat[p] == b'*' {
            star = Some(p);
            star_v = v;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            star_v += 1;
            v = star_v;
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == b'*' {
        p += 1;
    }
    p == pat.len()
}
