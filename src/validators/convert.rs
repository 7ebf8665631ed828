//! Type conversion of raw input.
//!
//! Conversion errors are returned unrendered; the caller renders them with
//! the message vocabulary of whichever definition they belong to.

use crate::core::definition::{BooleanLiterals, HashAlgorithm, Kind, ValidatorDefinition};
use crate::core::error::FieldError;
use crate::core::types::{parse_decimal, Decimal, Value, ValueType};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use sha2::{Digest, Sha256, Sha512};

// Whole floats at or beyond this magnitude do not fit an i64.
const I64_FLOAT_LIMIT: f64 = 9.2e18;

fn conversion_error(value: &Value, target: &ValueType) -> FieldError {
    FieldError::conversion("conversion_error")
        .with_param("value", value.clone())
        .with_param("target", target.display_name())
}

/// Convert raw input for a scalar kind.
///
/// Input already of the target type is returned unchanged. Composite and
/// cross-field kinds are converted by the binding tree and are rejected here.
pub fn convert(def: &ValidatorDefinition, value: &Value) -> Result<Value, Vec<FieldError>> {
    match &def.kind {
        Kind::Boolean(literals) => {
            let defaults = BooleanLiterals::default();
            to_boolean(value, literals.as_ref().unwrap_or(&defaults)).map_err(|e| vec![e])
        }
        Kind::DateTime { format } => to_datetime(value, format).map_err(|e| vec![e]),
        Kind::MultiChoice(spec) => to_key_set(value, &spec.key_type),
        Kind::Choice(spec) => convert_scalar(&spec.key_type, value).map_err(|e| vec![e]),
        kind => match kind.target_type() {
            Some(target) if !kind.is_composite() => {
                convert_scalar(&target, value).map_err(|e| vec![e])
            }
            _ => Err(vec![FieldError::conversion("conversion_error")
                .with_param("value", value.clone())
                .with_param("target", kind.tag().to_string())]),
        },
    }
}

/// Convert to a plain scalar type.
pub fn convert_scalar(target: &ValueType, value: &Value) -> Result<Value, FieldError> {
    if target.matches(value) {
        return Ok(value.clone());
    }
    let fail = || conversion_error(value, target);
    match target {
        ValueType::String => match value {
            Value::List(_) | Value::Map(_) | Value::Undefined | Value::Null => Err(fail()),
            other => Ok(Value::String(other.to_string())),
        },
        ValueType::Integer => match value {
            Value::String(s) => s.trim().parse().map(Value::Integer).map_err(|_| fail()),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < I64_FLOAT_LIMIT => {
                Ok(Value::Integer(*f as i64))
            }
            Value::Decimal(d) if d.fract().is_zero() => {
                d.to_i64().map(Value::Integer).ok_or_else(fail)
            }
            Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
            _ => Err(fail()),
        },
        ValueType::Float => match value {
            Value::String(s) => s.trim().parse().map(Value::Float).map_err(|_| fail()),
            Value::Integer(i) => Ok(Value::Float(*i as f64)),
            Value::Decimal(d) => d.to_f64().map(Value::Float).ok_or_else(fail),
            Value::Boolean(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            _ => Err(fail()),
        },
        ValueType::Decimal => match value {
            Value::String(s) => parse_decimal(s).map(Value::Decimal).ok_or_else(fail),
            Value::Integer(i) => Ok(Value::Decimal(Decimal::from(*i))),
            Value::Float(f) if f.is_finite() => {
                parse_decimal(&f.to_string()).map(Value::Decimal).ok_or_else(fail)
            }
            _ => Err(fail()),
        },
        ValueType::Boolean => to_boolean(value, &BooleanLiterals::default()),
        ValueType::DateTime => Err(fail()),
        ValueType::List(_) | ValueType::Map | ValueType::Any => Err(fail()),
    }
}

/// Strings are matched case-insensitively against the literal sets; the
/// empty string is `false`. Other scalars convert by truthiness.
pub fn to_boolean(value: &Value, literals: &BooleanLiterals) -> Result<Value, FieldError> {
    match value {
        Value::Boolean(b) => Ok(Value::Boolean(*b)),
        Value::String(s) => {
            let needle = s.trim().to_lowercase();
            if needle.is_empty() {
                return Ok(Value::Boolean(false));
            }
            let found = |set: &[String]| set.iter().any(|l| l.to_lowercase() == needle);
            if found(&literals.trues) {
                Ok(Value::Boolean(true))
            } else if found(&literals.falses) {
                Ok(Value::Boolean(false))
            } else {
                Err(conversion_error(value, &ValueType::Boolean))
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Decimal(_) => {
            Ok(Value::Boolean(value.is_truthy()))
        }
        _ => Err(conversion_error(value, &ValueType::Boolean)),
    }
}

/// Only strings are parsed. A format without a time part yields midnight.
pub fn to_datetime(value: &Value, format: &str) -> Result<Value, FieldError> {
    let s = match value {
        Value::DateTime(dt) => return Ok(Value::DateTime(*dt)),
        Value::String(s) => s,
        _ => return Err(FieldError::conversion("invalid_input")),
    };
    NaiveDateTime::parse_from_str(s, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(Value::DateTime)
        .ok_or_else(|| {
            conversion_error(value, &ValueType::DateTime).with_param("fmt", format.to_string())
        })
}

/// A list (or a single scalar) of keys, deduplicated in input order.
fn to_key_set(value: &Value, key_type: &ValueType) -> Result<Value, Vec<FieldError>> {
    let items = match value {
        Value::List(items) => items.clone(),
        Value::Map(_) => {
            return Err(vec![conversion_error(
                value,
                &ValueType::List(Box::new(key_type.clone())),
            )])
        }
        scalar => vec![scalar.clone()],
    };
    let mut keys: Vec<Value> = Vec::with_capacity(items.len());
    let mut errors = Vec::new();
    for item in &items {
        match convert_scalar(key_type, item) {
            Ok(key) if !keys.contains(&key) => keys.push(key),
            Ok(_) => {}
            Err(_) => errors.push(
                FieldError::conversion("key_conversion_error")
                    .with_param("key", item.clone())
                    .with_param("key_type", key_type.display_name()),
            ),
        }
    }
    if errors.is_empty() {
        Ok(Value::List(keys))
    } else {
        Err(errors)
    }
}

/// Hex digest of a password.
pub fn hash_password(plain: &str, algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(plain.as_bytes())),
        HashAlgorithm::Sha512 => hex::encode(Sha512::digest(plain.as_bytes())),
        HashAlgorithm::Plain => plain.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ok(def: &ValidatorDefinition, input: impl Into<Value>) -> Value {
        convert(def, &input.into()).unwrap()
    }

    fn fails_with(def: &ValidatorDefinition, input: impl Into<Value>) -> String {
        convert(def, &input.into()).unwrap_err()[0].message_id.clone()
    }

    #[test]
    fn test_integer_conversion() {
        let def = ValidatorDefinition::integer();
        assert_eq!(ok(&def, " 42 "), Value::Integer(42));
        assert_eq!(ok(&def, 3.0), Value::Integer(3));
        assert_eq!(fails_with(&def, 3.5), "conversion_error");
        assert_eq!(fails_with(&def, "abc"), "conversion_error");
    }

    #[test]
    fn test_integer_rejects_out_of_range_floats() {
        let def = ValidatorDefinition::integer();
        assert_eq!(fails_with(&def, 1e300), "conversion_error");
        assert_eq!(fails_with(&def, -1e19), "conversion_error");
        assert_eq!(fails_with(&def, f64::INFINITY), "conversion_error");
        assert_eq!(ok(&def, -9.0e18), Value::Integer(-9_000_000_000_000_000_000));
    }

    #[test]
    fn test_conversion_error_params() {
        let err = &convert(&ValidatorDefinition::integer(), &Value::from("abc")).unwrap_err()[0];
        assert_eq!(err.params["value"], Value::from("abc"));
        assert_eq!(err.params["target"], Value::from("integer"));
    }

    #[test]
    fn test_decimal_keeps_scale() {
        let def = ValidatorDefinition::decimal();
        assert_eq!(ok(&def, "1.50").to_string(), "1.50");
        assert_eq!(ok(&def, 2i64), Value::Decimal(Decimal::from(2)));
        assert_eq!(ok(&def, "1E+3"), Value::Decimal(Decimal::from(1000)));
        assert_eq!(fails_with(&def, "abc"), "conversion_error");
        assert_eq!(ok(&ValidatorDefinition::integer(), Decimal::from(7)), Value::Integer(7));
        assert_eq!(
            fails_with(&ValidatorDefinition::integer(), Decimal::new(75, 1)),
            "conversion_error"
        );
    }

    #[test]
    fn test_boolean_literals() {
        let def = ValidatorDefinition::boolean();
        for t in ["1", "y", "YES", "on", "True"] {
            assert_eq!(ok(&def, t), Value::Boolean(true), "{}", t);
        }
        for f in ["0", "n", "no", "OFF", "false", ""] {
            assert_eq!(ok(&def, f), Value::Boolean(false), "{}", f);
        }
        assert_eq!(fails_with(&def, "maybe"), "conversion_error");
        assert_eq!(ok(&def, 0i64), Value::Boolean(false));

        let custom = ValidatorDefinition::boolean_with(["ja"], ["nein"]);
        assert_eq!(ok(&custom, "ja"), Value::Boolean(true));
        assert_eq!(fails_with(&custom, "yes"), "conversion_error");
    }

    #[test]
    fn test_datetime_accepts_strings_only() {
        let def = ValidatorDefinition::datetime("%Y-%m-%d");
        let value = ok(&def, "2024-02-29");
        assert_eq!(value.to_string(), "2024-02-29 00:00:00");
        assert_eq!(fails_with(&def, 20240229i64), "invalid_input");

        let err = &convert(&def, &Value::from("29.02.2024")).unwrap_err()[0];
        assert_eq!(err.message_id, "conversion_error");
        assert_eq!(err.params["fmt"], Value::from("%Y-%m-%d"));
    }

    #[test]
    fn test_multi_choice_keys() {
        let def = ValidatorDefinition::multi_choice([(1i64, "one"), (2, "two")], ValueType::Integer);
        assert_eq!(ok(&def, vec!["1", "2", "1"]), Value::from(vec![1i64, 2]));
        assert_eq!(ok(&def, "2"), Value::from(vec![2i64]));

        let errors = convert(&def, &Value::from(vec!["1", "x", "y"])).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message_id, "key_conversion_error");
        assert_eq!(errors[0].params["key"], Value::from("x"));
    }

    #[test]
    fn test_password_digests() {
        assert_eq!(
            hash_password("abc", HashAlgorithm::Sha256),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_password("abc", HashAlgorithm::Sha512).len(), 128);
        assert_eq!(hash_password("abc", HashAlgorithm::Plain), "abc");
    }

    proptest! {
        #[test]
        fn prop_integer_string_round_trip(n in any::<i64>()) {
            let def = ValidatorDefinition::integer();
            prop_assert_eq!(convert(&def, &Value::String(n.to_string())).unwrap(), Value::Integer(n));
        }

        #[test]
        fn prop_float_string_round_trip(f in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
            let def = ValidatorDefinition::float();
            prop_assert_eq!(convert(&def, &Value::String(f.to_string())).unwrap(), Value::Float(f));
        }

        #[test]
        fn prop_decimal_string_round_trip(m in -1_000_000_000_000i64..1_000_000_000_000i64, s in 0u32..8) {
            let d = Decimal::new(m, s);
            let def = ValidatorDefinition::decimal();
            let out = convert(&def, &Value::String(d.to_string())).unwrap();
            prop_assert_eq!(out.to_string(), d.to_string());
        }
    }
}
