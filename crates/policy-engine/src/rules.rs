//! Compiled rules and their extra `param.` / `context.` predicates.

use regex::Regex;
use serde_json::Value;

use crate::decision::Action;
use crate::error::PolicyError;
use crate::schema::Rule;

/// Where a rule condition reads its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionTarget {
    Param(String),
    Context(String),
}

/// One predicate applied to the target value.
#[derive(Debug, Clone)]
pub enum ValueCheck {
    Equals(Value),
    /// Anchored at the start of the stringified value.
    Regex(Regex),
    /// Inclusive bounds; the value must be a JSON number.
    Range { min: Option<f64>, max: Option<f64> },
    OneOf(Vec<Value>),
}

impl ValueCheck {
    /// A missing value fails every check.
    fn passes(&self, actual: Option<&Value>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match self {
            Self::Equals(expected) => json_eq(actual, expected),
            Self::Regex(re) => match actual {
                Value::String(s) => re.is_match(s),
                other => re.is_match(&other.to_string()),
            },
            Self::Range { min, max } => match actual.as_f64() {
                Some(n) => min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m),
                None => false,
            },
            Self::OneOf(values) => values.iter().any(|v| json_eq(actual, v)),
        }
    }
}

/// JSON equality with numbers compared by value, so `5` equals `5.0`.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| json_eq(x, y)))
        }
        _ => a == b,
    }
}

#[derive(Debug, Clone)]
pub struct RuleCondition {
    pub target: ConditionTarget,
    pub checks: Vec<ValueCheck>,
}

impl RuleCondition {
    pub fn compile(rule: &str, key: &str, expected: &Value) -> Result<Self, PolicyError> {
        let invalid = |reason: String| PolicyError::InvalidCondition {
            rule: rule.to_string(),
            key: key.to_string(),
            reason,
        };

        let target = if let Some(name) = key.strip_prefix("param.") {
            ConditionTarget::Param(name.to_string())
        } else if let Some(name) = key.strip_prefix("context.") {
            ConditionTarget::Context(name.to_string())
        } else {
            return Err(invalid(
                "key must start with 'param.' or 'context.'".to_string(),
            ));
        };

        let Value::Object(map) = expected else {
            return Ok(Self {
                target,
                checks: vec![ValueCheck::Equals(expected.clone())],
            });
        };

        if map.is_empty() {
            return Err(invalid("compound condition has no checks".to_string()));
        }

        let bound = |name: &str| -> Result<Option<f64>, PolicyError> {
            match map.get(name) {
                None => Ok(None),
                Some(v) => v
                    .as_f64()
                    .map(Some)
                    .ok_or_else(|| invalid(format!("'{name}' must be a number, got {v}"))),
            }
        };

        let mut checks = Vec::new();
        for k in map.keys() {
            if !matches!(k.as_str(), "regex" | "min" | "max" | "in") {
                return Err(invalid(format!("unknown check '{k}'")));
            }
        }
        if let Some(pattern) = map.get("regex") {
            let Value::String(pattern) = pattern else {
                return Err(invalid(format!("'regex' must be a string, got {pattern}")));
            };
            let re = Regex::new(&format!("^(?:{pattern})"))
                .map_err(|e| invalid(format!("invalid regex '{pattern}': {e}")))?;
            checks.push(ValueCheck::Regex(re));
        }
        let (min, max) = (bound("min")?, bound("max")?);
        if min.is_some() || max.is_some() {
            checks.push(ValueCheck::Range { min, max });
        }
        if let Some(values) = map.get("in") {
            let Value::Array(values) = values else {
                return Err(invalid(format!("'in' must be a list, got {values}")));
            };
            checks.push(ValueCheck::OneOf(values.clone()));
        }

        Ok(Self { target, checks })
    }

    fn passes(&self, params: &Value, context: &Value) -> bool {
        let actual = match &self.target {
            ConditionTarget::Param(name) => params.get(name),
            ConditionTarget::Context(name) => context.get(name),
        };
        self.checks.iter().all(|check| check.passes(actual))
    }
}

/// A [`Rule`] with its pattern and conditions compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    pattern: Regex,
    conditions: Vec<RuleCondition>,
}

impl CompiledRule {
    pub fn compile(rule: &Rule) -> Result<Self, PolicyError> {
        let pattern = Regex::new(&format!("^(?:{})", rule.capability_pattern)).map_err(|source| {
            PolicyError::InvalidRulePattern {
                rule: rule.name.clone(),
                pattern: rule.capability_pattern.clone(),
                source,
            }
        })?;
        let conditions = rule
            .conditions
            .iter()
            .map(|(key, expected)| RuleCondition::compile(&rule.name, key, expected))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            rule: rule.clone(),
            pattern,
            conditions,
        })
    }

    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn action(&self) -> Action {
        self.rule.action
    }

    pub fn priority(&self) -> i64 {
        self.rule.priority
    }

    pub fn enabled(&self) -> bool {
        self.rule.enabled
    }

    /// True when the capability pattern matches from the start of `name`.
    pub fn matches_capability(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    /// True when every extra condition holds. `params` and `context` that
    /// are not JSON objects behave as empty.
    pub fn conditions_met(&self, params: &Value, context: &Value) -> bool {
        self.conditions.iter().all(|c| c.passes(params, context))
    }
}
