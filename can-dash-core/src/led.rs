//! LED rule engine
//!
//! Maps a decoded value to a colour through an ordered list of rules:
//!
//! | Rule          | Matches when            |
//! |---------------|-------------------------|
//! | `==V:COLOR`   | value == V (exact)      |
//! | `>=V:COLOR`   | value >= V              |
//! | `<=V:COLOR`   | value <= V              |
//! | `>V:COLOR`    | value > V               |
//! | `<V:COLOR`    | value < V               |
//! | `A-B:COLOR`   | A <= value <= B         |
//!
//! The first matching rule wins. Lines that do not parse are skipped.

use crate::types::DashError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LedCondition {
    Eq(f64),
    Ge(f64),
    Le(f64),
    Gt(f64),
    Lt(f64),
    /// Inclusive range
    Range(f64, f64),
}

impl LedCondition {
    pub fn matches(&self, value: f64) -> bool {
        match *self {
            // Exact comparison; no tolerance is applied to noisy signals
            LedCondition::Eq(v) => value == v,
            LedCondition::Ge(v) => value >= v,
            LedCondition::Le(v) => value <= v,
            LedCondition::Gt(v) => value > v,
            LedCondition::Lt(v) => value < v,
            LedCondition::Range(low, high) => low <= value && value <= high,
        }
    }
}

impl fmt::Display for LedCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedCondition::Eq(v) => write!(f, "=={}", v),
            LedCondition::Ge(v) => write!(f, ">={}", v),
            LedCondition::Le(v) => write!(f, "<={}", v),
            LedCondition::Gt(v) => write!(f, ">{}", v),
            LedCondition::Lt(v) => write!(f, "<{}", v),
            LedCondition::Range(a, b) => write!(f, "{}-{}", a, b),
        }
    }
}

impl FromStr for LedCondition {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let number = |text: &str| {
            text.trim()
                .parse::<f64>()
                .map_err(|_| DashError::ConfigError(format!("invalid number '{}' in LED rule", text.trim())))
        };

        // Two-character operators must be tried before their one-character prefixes
        if let Some(rest) = s.strip_prefix("==") {
            return Ok(LedCondition::Eq(number(rest)?));
        }
        if let Some(rest) = s.strip_prefix(">=") {
            return Ok(LedCondition::Ge(number(rest)?));
        }
        if let Some(rest) = s.strip_prefix("<=") {
            return Ok(LedCondition::Le(number(rest)?));
        }
        if let Some(rest) = s.strip_prefix('>') {
            return Ok(LedCondition::Gt(number(rest)?));
        }
        if let Some(rest) = s.strip_prefix('<') {
            return Ok(LedCondition::Lt(number(rest)?));
        }

        let split = range_separator(s)
            .ok_or_else(|| DashError::ConfigError(format!("unrecognized LED condition '{}'", s)))?;
        Ok(LedCondition::Range(number(&s[..split])?, number(&s[split + 1..])?))
    }
}

/// Index of the '-' separating a range's bounds.
///
/// Skips a leading sign on the lower bound and exponent signs like `1e-3`.
fn range_separator(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    (1..bytes.len()).find(|&i| bytes[i] == b'-' && !matches!(bytes[i - 1], b'e' | b'E'))
}

/// One condition with its colour
#[derive(Debug, Clone, PartialEq)]
pub struct LedRule {
    pub condition: LedCondition,
    pub color: String,
}

impl FromStr for LedRule {
    type Err = DashError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (condition, color) = line
            .split_once(':')
            .ok_or_else(|| DashError::ConfigError(format!("LED rule '{}' has no colour", line)))?;

        let color = color.trim();
        if color.is_empty() {
            return Err(DashError::ConfigError(format!("LED rule '{}' has an empty colour", line)));
        }

        Ok(Self {
            condition: condition.parse()?,
            color: color.to_string(),
        })
    }
}

impl fmt::Display for LedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.condition, self.color)
    }
}

/// Ordered rule list, first match wins
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedRuleSet {
    rules: Vec<LedRule>,
}

impl LedRuleSet {
    /// Parse rule lines, skipping any that are malformed
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Self {
        let rules = lines
            .iter()
            .filter_map(|line| match line.as_ref().parse::<LedRule>() {
                Ok(rule) => Some(rule),
                Err(e) => {
                    log::debug!("Skipping LED rule: {}", e);
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Colour of the first rule matching `value`; None means neutral
    pub fn color_for(&self, value: f64) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.condition.matches(value))
            .map(|rule| rule.color.as_str())
    }

    pub fn rules(&self) -> &[LedRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
