//! Semantic rules checked by `is_valid()`.
//!
//! Rules run on converted values. Built-in rules derive from a
//! definition's bounds and kind; user rules come after them.

use crate::core::definition::{Kind, PatternSpec, RegexFlavor, ValidatorDefinition};
use crate::core::error::{FieldError, HookError};
use crate::core::types::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// User-supplied check.
pub type CustomCheck = Arc<dyn Fn(&Value) -> Result<(), HookError> + Send + Sync>;

/// What a length rule counts. Selects the message ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Characters,
    Elements,
}

/// A constraint on a converted value.
#[derive(Clone)]
pub enum Rule {
    /// Length within `[min, max]`.
    Length {
        min: Option<usize>,
        max: Option<usize>,
        unit: LengthUnit,
    },
    /// Value within `[min, max]`.
    Range { min: Option<Value>, max: Option<Value> },
    /// String matches an anchored pattern.
    Pattern(PatternSpec),
    /// Value is one of the options.
    OneOf(Vec<Value>),
    /// Every element is one of the options.
    SubsetOf(Vec<Value>),
    /// ISBN-10 or ISBN-13 whose last character is its check digit.
    IsbnChecksum,
    Custom { name: String, check: CustomCheck },
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Length { min, max, unit } => f
                .debug_struct("Length")
                .field("min", min)
                .field("max", max)
                .field("unit", unit)
                .finish(),
            Rule::Range { min, max } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .finish(),
            Rule::Pattern(spec) => f.debug_tuple("Pattern").field(&spec.pattern).finish(),
            Rule::OneOf(v) => f.debug_tuple("OneOf").field(v).finish(),
            Rule::SubsetOf(v) => f.debug_tuple("SubsetOf").field(v).finish(),
            Rule::IsbnChecksum => write!(f, "IsbnChecksum"),
            Rule::Custom { name, .. } => f
                .debug_struct("Custom")
                .field("name", name)
                .field("check", &"<closure>")
                .finish(),
        }
    }
}

impl Rule {
    /// Wrap a closure as a custom rule.
    pub fn custom<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Rule::Custom {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Check a value. The returned error is not rendered yet.
    pub fn validate(&self, value: &Value) -> Result<(), FieldError> {
        match self {
            Rule::Length { min, max, unit } => {
                let Some(len) = value.length() else {
                    return Ok(());
                };
                let (short, long, both) = match unit {
                    LengthUnit::Characters => {
                        ("value_too_short", "value_too_long", "value_length_out_of_range")
                    }
                    LengthUnit::Elements => ("too_short", "too_long", "length_out_of_range"),
                };
                let below = min.is_some_and(|m| len < m);
                let above = max.is_some_and(|m| len > m);
                if !below && !above {
                    return Ok(());
                }
                let id = match (min, max) {
                    (Some(_), Some(_)) => both,
                    _ if below => short,
                    _ => long,
                };
                let mut error = FieldError::validation(id);
                if let Some(m) = min {
                    error = error.with_param("min_length", *m as i64);
                }
                if let Some(m) = max {
                    error = error.with_param("max_length", *m as i64);
                }
                Err(error)
            }

            Rule::Range { min, max } => {
                let below = min
                    .as_ref()
                    .is_some_and(|m| value.compare(m) == Some(Ordering::Less));
                let above = max
                    .as_ref()
                    .is_some_and(|m| value.compare(m) == Some(Ordering::Greater));
                if !below && !above {
                    return Ok(());
                }
                let id = match (min, max) {
                    (Some(_), Some(_)) => "value_out_of_range",
                    _ if below => "value_too_low",
                    _ => "value_too_high",
                };
                let mut error = FieldError::validation(id);
                if let Some(m) = min {
                    error = error.with_param("min_value", m.clone());
                }
                if let Some(m) = max {
                    error = error.with_param("max_value", m.clone());
                }
                Err(error)
            }

            Rule::Pattern(spec) => match value {
                Value::String(s) if !spec.compiled.is_match(s) => Err(FieldError::validation(
                    "pattern_mismatch",
                )
                .with_param("pattern", spec.pattern.clone())),
                _ => Ok(()),
            },

            Rule::OneOf(options) => {
                if options.contains(value) {
                    Ok(())
                } else {
                    Err(FieldError::validation("invalid_option").with_param("key", value.clone()))
                }
            }

            Rule::SubsetOf(options) => {
                let Some(items) = value.as_list() else {
                    return Ok(());
                };
                let unknown: Vec<Value> = items
                    .iter()
                    .filter(|item| !options.contains(item))
                    .cloned()
                    .collect();
                if unknown.is_empty() {
                    Ok(())
                } else {
                    Err(FieldError::validation("invalid_options")
                        .with_param("keys", Value::List(unknown)))
                }
            }

            Rule::IsbnChecksum => match value {
                Value::String(s) => verify_isbn(s),
                _ => Ok(()),
            },

            Rule::Custom { check, .. } => check(value).map_err(|e| FieldError {
                params: e.params,
                ..FieldError::validation(e.message_id)
            }),
        }
    }

    /// Get a human-readable description of this rule.
    pub fn description(&self) -> String {
        match self {
            Rule::Length { min, max, unit } => {
                let what = match unit {
                    LengthUnit::Characters => "characters",
                    LengthUnit::Elements => "elements",
                };
                match (min, max) {
                    (Some(a), Some(b)) => format!("Between {} and {} {}", a, b, what),
                    (Some(a), None) => format!("At least {} {}", a, what),
                    (None, Some(b)) => format!("At most {} {}", b, what),
                    (None, None) => format!("Any number of {}", what),
                }
            }
            Rule::Range { min, max } => match (min, max) {
                (Some(a), Some(b)) => format!("Must be between {} and {}", a, b),
                (Some(a), None) => format!("Must be at least {}", a),
                (None, Some(b)) => format!("Must be at most {}", b),
                (None, None) => "Any value".to_string(),
            },
            Rule::Pattern(spec) => format!("Must match {}", spec.pattern),
            Rule::OneOf(options) => format!("One of {}", Value::List(options.clone())),
            Rule::SubsetOf(options) => format!("Any of {}", Value::List(options.clone())),
            Rule::IsbnChecksum => "Valid ISBN check digit".to_string(),
            Rule::Custom { name, .. } => format!("Custom: {}", name),
        }
    }
}

/// ISBN-10 weights digits by position, modulo 11 with `X` for ten.
/// ISBN-13 weights odd positions by three, modulo 10.
fn verify_isbn(isbn: &str) -> Result<(), FieldError> {
    let chars: Vec<char> = isbn.chars().collect();
    if chars.len() != 10 && chars.len() != 13 {
        return Err(FieldError::validation("isbn_length").with_param("length", chars.len() as i64));
    }
    let checksum_error = || FieldError::validation("isbn_checksum");
    let digit = |c: &char| if *c == 'X' { Some(10) } else { c.to_digit(10) };

    let (last, body) = chars.split_last().ok_or_else(checksum_error)?;
    let body: Vec<u32> = body
        .iter()
        .map(|c| c.to_digit(10))
        .collect::<Option<_>>()
        .ok_or_else(checksum_error)?;
    let expected = if chars.len() == 10 {
        let sum: u32 = body.iter().enumerate().map(|(i, d)| (i as u32 + 1) * d).sum();
        sum % 11
    } else {
        let sum: u32 = body
            .iter()
            .enumerate()
            .map(|(i, d)| if i % 2 == 1 { d * 3 } else { *d })
            .sum();
        (10 - sum % 10) % 10
    };
    if digit(last) == Some(expected) {
        Ok(())
    } else {
        Err(checksum_error())
    }
}

/// Length rule for a definition's bounds, if any apply to its kind.
pub fn length_rule(def: &ValidatorDefinition) -> Option<Rule> {
    let unit = match def.kind {
        Kind::String | Kind::Regex(_) | Kind::Password(_) => LengthUnit::Characters,
        Kind::List { .. } => LengthUnit::Elements,
        _ => return None,
    };
    if def.bounds.min_length.is_none() && def.bounds.max_length.is_none() {
        return None;
    }
    Some(Rule::Length {
        min: def.bounds.min_length,
        max: def.bounds.max_length,
        unit,
    })
}

/// Every rule `is_valid()` runs for a definition, in order.
///
/// Password lengths are checked on the plaintext before hashing, so
/// passwords carry no length rule here.
pub fn effective_rules(def: &ValidatorDefinition) -> Vec<Rule> {
    let mut rules = Vec::new();
    match &def.kind {
        Kind::Password(_) => {}
        Kind::Integer | Kind::Float | Kind::Decimal | Kind::DateTime { .. } => {
            if def.bounds.min_value.is_some() || def.bounds.max_value.is_some() {
                rules.push(Rule::Range {
                    min: def.bounds.min_value.clone(),
                    max: def.bounds.max_value.clone(),
                });
            }
        }
        _ => rules.extend(length_rule(def)),
    }
    match &def.kind {
        Kind::Regex(spec) => {
            rules.push(Rule::Pattern(spec.clone()));
            if spec.flavor == RegexFlavor::Isbn {
                rules.push(Rule::IsbnChecksum);
            }
        }
        Kind::Choice(spec) => rules.push(Rule::OneOf(spec.keys())),
        Kind::MultiChoice(spec) => rules.push(Rule::SubsetOf(spec.keys())),
        _ => {}
    }
    rules.extend(def.rules.iter().cloned());
    rules
}

/// First rule violation for a converted value.
pub fn check(def: &ValidatorDefinition, value: &Value) -> Result<(), FieldError> {
    effective_rules(def)
        .iter()
        .try_for_each(|rule| rule.validate(value))
}
