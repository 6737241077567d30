//! Quantified comparisons shared by all rule checkers.
//!
//! A rule fires when `value <op> limit` holds; the caller decides what
//! firing means (FAILED for constant-value rules, CHANGED for
//! change-detection rules). Percent values are compared in the scaled
//! integer space (value × 10) so one decimal place is exact.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Comparison operator of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
}

impl Operator {
    /// Returns true when the comparison matches the alert condition,
    /// i.e. the rule fires.
    pub fn matches(self, value: i64, limit: i64) -> bool {
        match self {
            Operator::Equal => value == limit,
            Operator::NotEqual => value != limit,
            Operator::Greater => value > limit,
            Operator::Less => value < limit,
            Operator::GreaterOrEqual => value >= limit,
            Operator::LessOrEqual => value <= limit,
        }
    }

    /// Short name used in report strings, e.g. `"cpu usage > 90.0%"`.
    pub fn short_name(self) -> &'static str {
        match self {
            Operator::Equal => " = ",
            Operator::NotEqual => " != ",
            Operator::Greater => " > ",
            Operator::Less => " < ",
            Operator::GreaterOrEqual => " >= ",
            Operator::LessOrEqual => " <= ",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "=" | "==" | "eq" => Ok(Operator::Equal),
            "!=" | "ne" => Ok(Operator::NotEqual),
            ">" | "gt" => Ok(Operator::Greater),
            "<" | "lt" => Ok(Operator::Less),
            ">=" | "ge" => Ok(Operator::GreaterOrEqual),
            "<=" | "le" => Ok(Operator::LessOrEqual),
            other => Err(format!("unknown operator '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_matches() {
        assert!(Operator::Equal.matches(5, 5));
        assert!(!Operator::Equal.matches(5, 6));
        assert!(Operator::NotEqual.matches(5, 6));
        assert!(Operator::Greater.matches(7, 5));
        assert!(!Operator::Greater.matches(5, 5));
        assert!(Operator::Less.matches(-3, 0));
        assert!(Operator::GreaterOrEqual.matches(5, 5));
        assert!(Operator::LessOrEqual.matches(4, 5));
    }

    #[test]
    fn test_scaled_percent_comparison() {
        // 90.0% stored as 900; an observed 90.1% (901) exceeds it
        assert!(Operator::Greater.matches(901, 900));
        assert!(!Operator::Greater.matches(900, 900));
    }

    #[test]
    fn test_operator_from_str() {
        assert_eq!("=".parse::<Operator>().unwrap(), Operator::Equal);
        assert_eq!("!=".parse::<Operator>().unwrap(), Operator::NotEqual);
        assert_eq!(">=".parse::<Operator>().unwrap(), Operator::GreaterOrEqual);
        assert!("~".parse::<Operator>().is_err());
    }
}
