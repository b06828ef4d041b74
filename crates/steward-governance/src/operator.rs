// Copyright 2025 Steward Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! String match operators used by request matchers.
//!
//! A raw operator map such as `{"prefix": "/orders", "suffix": ".json"}` is
//! compiled once at load time into an [`OperatorSet`]; a value matches the
//! set when it satisfies every operator in it.

use steward_common::{ConfigError, OperatorMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
}

impl Comparison {
    /// Splits `">=10"` into the comparison and the remaining operand.
    fn split(operand: &str) -> Option<(Self, &str)> {
        let operand = operand.trim();
        // two-character comparators first
        for (prefix, comparison) in [
            (">=", Comparison::GreaterOrEqual),
            ("<=", Comparison::LessOrEqual),
            ("!=", Comparison::NotEqual),
            (">", Comparison::Greater),
            ("<", Comparison::Less),
            ("=", Comparison::Equal),
        ] {
            if let Some(rest) = operand.strip_prefix(prefix) {
                return Some((comparison, rest.trim()));
            }
        }
        None
    }

    fn holds(&self, value: f64, bound: f64) -> bool {
        match self {
            Comparison::Greater => value > bound,
            Comparison::GreaterOrEqual => value >= bound,
            Comparison::Less => value < bound,
            Comparison::LessOrEqual => value <= bound,
            Comparison::Equal => value == bound,
            Comparison::NotEqual => value != bound,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOperator {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    /// Numeric comparison; values that are not numbers never match.
    Compare(Comparison, f64),
}

impl MatchOperator {
    /// Parses one operator entry, returning a reason on failure.
    pub fn parse(name: &str, operand: &str) -> Result<Self, OperatorError> {
        match name {
            "exact" => Ok(MatchOperator::Exact(operand.to_string())),
            "prefix" => Ok(MatchOperator::Prefix(operand.to_string())),
            "suffix" => Ok(MatchOperator::Suffix(operand.to_string())),
            "contains" => Ok(MatchOperator::Contains(operand.to_string())),
            "compare" => {
                let (comparison, bound) = Comparison::split(operand)
                    .ok_or_else(|| OperatorError::InvalidOperand(operand.to_string()))?;
                let bound: f64 = bound
                    .parse()
                    .map_err(|_| OperatorError::InvalidOperand(operand.to_string()))?;
                Ok(MatchOperator::Compare(comparison, bound))
            }
            other => Err(OperatorError::Unsupported(other.to_string())),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            MatchOperator::Exact(expected) => value == expected,
            MatchOperator::Prefix(prefix) => value.starts_with(prefix.as_str()),
            MatchOperator::Suffix(suffix) => value.ends_with(suffix.as_str()),
            MatchOperator::Contains(needle) => value.contains(needle.as_str()),
            MatchOperator::Compare(comparison, bound) => value
                .trim()
                .parse::<f64>()
                .map(|number| comparison.holds(number, *bound))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorError {
    Unsupported(String),
    InvalidOperand(String),
}

/// Conjunction of operators compiled from one raw operator map.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorSet {
    operators: Vec<MatchOperator>,
}

impl OperatorSet {
    /// Compiles `raw` for `policy`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnsupportedOperator`] for an unknown operator name and
    /// [`ConfigError::InvalidParameter`] for an unparsable compare operand.
    pub fn compile(policy: &str, raw: &OperatorMap) -> Result<Self, ConfigError> {
        let mut operators = Vec::with_capacity(raw.len());
        for (name, operand) in raw {
            let operator = MatchOperator::parse(name, operand).map_err(|e| match e {
                OperatorError::Unsupported(operator) => ConfigError::UnsupportedOperator {
                    policy: policy.to_string(),
                    operator,
                },
                OperatorError::InvalidOperand(operand) => ConfigError::InvalidParameter {
                    policy: policy.to_string(),
                    reason: format!("invalid compare operand {:?}", operand),
                },
            })?;
            operators.push(operator);
        }
        Ok(Self { operators })
    }

    /// An empty set never matches.
    pub fn matches(&self, value: &str) -> bool {
        !self.operators.is_empty() && self.operators.iter().all(|op| op.matches(value))
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(entries: &[(&str, &str)]) -> OperatorSet {
        let raw: OperatorMap = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OperatorSet::compile("p", &raw).unwrap()
    }

    #[test]
    fn test_string_operators() {
        assert!(set(&[("exact", "/bulkhead")]).matches("/bulkhead"));
        assert!(!set(&[("exact", "/bulkhead")]).matches("/bulkhead/"));
        assert!(set(&[("prefix", "/bulkhead")]).matches("/bulkhead/hello"));
        assert!(set(&[("suffix", "/bulkhead")]).matches("/api/bulkhead"));
        assert!(set(&[("contains", "bulk")]).matches("/api/bulkhead"));
        assert!(!set(&[("contains", "retry")]).matches("/api/bulkhead"));
    }

    #[test]
    fn test_all_operators_must_hold() {
        let both = set(&[("prefix", "/api"), ("suffix", ".json")]);
        assert!(both.matches("/api/orders.json"));
        assert!(!both.matches("/api/orders.xml"));
    }

    #[test]
    fn test_empty_set_never_matches() {
        let empty = set(&[]);
        assert!(empty.is_empty());
        assert!(!empty.matches(""));
        assert!(!empty.matches("/anything"));
    }

    #[test]
    fn test_compare_operator() {
        assert!(set(&[("compare", ">10")]).matches("11"));
        assert!(!set(&[("compare", ">10")]).matches("10"));
        assert!(set(&[("compare", ">=10")]).matches("10"));
        assert!(set(&[("compare", "<2.5")]).matches("2"));
        assert!(set(&[("compare", "<=2")]).matches("2"));
        assert!(set(&[("compare", "=3")]).matches("3.0"));
        assert!(set(&[("compare", "!=3")]).matches("4"));
        assert!(!set(&[("compare", ">1")]).matches("abc"));
    }

    #[test]
    fn test_unknown_operator_is_config_error() {
        let raw: OperatorMap = [("regex".to_string(), ".*".to_string())].into_iter().collect();
        assert_eq!(
            OperatorSet::compile("p", &raw),
            Err(ConfigError::UnsupportedOperator {
                policy: "p".to_string(),
                operator: "regex".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_compare_operand() {
        for operand in ["10", "~10", ">ten"] {
            let raw: OperatorMap = [("compare".to_string(), operand.to_string())]
                .into_iter()
                .collect();
            assert!(matches!(
                OperatorSet::compile("p", &raw),
                Err(ConfigError::InvalidParameter { .. })
            ));
        }
    }
}
