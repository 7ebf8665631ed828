//! Message templates and rendering.
//!
//! Templates use `{name}` placeholders filled from error parameters.
//! Lookup order for a message id: custom formatter on the definition, the
//! built-in date formatter, the definition's override, the kind's default
//! table, the shared base table, and finally the id itself.

use crate::core::definition::{Kind, RegexFlavor, ValidatorDefinition};
use crate::core::error::FieldError;
use crate::core::types::Value;
use indexmap::IndexMap;

/// Templates shared by every kind.
const BASE: &[(&str, &str)] = &[
    ("conversion_error", "Unable to convert '{value}' to {target} object"),
    ("required_error", "This field is required"),
    ("unknown_key", "Unexpected key '{key}'"),
];

const STRING: &[(&str, &str)] = &[
    ("value_too_short", "Expecting at least {min_length} characters"),
    ("value_too_long", "Expecting at most {max_length} characters"),
    (
        "value_length_out_of_range",
        "Expected number of characters is between {min_length} and {max_length}",
    ),
];

const REGEX: &[(&str, &str)] = &[("pattern_mismatch", "Value does not match pattern {pattern}")];
const EMAIL: &[(&str, &str)] = &[("pattern_mismatch", "Invalid e-mail address")];
const URL: &[(&str, &str)] = &[("pattern_mismatch", "Invalid URL address")];
const ISBN: &[(&str, &str)] = &[
    ("pattern_mismatch", "Invalid ISBN number"),
    ("isbn_length", "ISBN number is expected to have either 10 or 13 digits"),
    ("isbn_checksum", "ISBN checksum verification failed"),
];

const NUMERIC: &[(&str, &str)] = &[
    ("value_too_low", "Expecting value greater or equal to {min_value}"),
    ("value_too_high", "Expecting value less or equal to {max_value}"),
    ("value_out_of_range", "Expecting value between {min_value} and {max_value}"),
];

const DATETIME: &[(&str, &str)] = &[
    ("conversion_error", "Input date/time does not match format {fmt}"),
    ("invalid_input", "Can only parse strings"),
    ("value_too_low", "Minimal date is {min_value}"),
    ("value_too_high", "Maximal date is {max_value}"),
    ("value_out_of_range", "Expecting date between {min_value} and {max_value}"),
];

const CHOICE: &[(&str, &str)] = &[("invalid_option", "Invalid option: {key}")];

const MULTI_CHOICE: &[(&str, &str)] = &[
    ("invalid_options", "Invalid options: {keys}"),
    ("key_conversion_error", "Unable to convert '{key}' to {key_type} object"),
];

const EQUAL_TO: &[(&str, &str)] = &[
    ("not_equal", "Values are not equal"),
    ("unknown_sibling", "No field '{key}' to compare with"),
];

const LIST: &[(&str, &str)] = &[
    ("too_short", "Expecting at least {min_length} elements"),
    ("too_long", "Expecting at most {max_length} elements"),
    (
        "length_out_of_range",
        "Expected number of elements is between {min_length} and {max_length}",
    ),
    ("inner_validator_error", "At least one inner validator has failed"),
];

const MAP: &[(&str, &str)] = &[("inner_validator_error", "Inner validator has failed")];

const ANY_OF: &[(&str, &str)] = &[
    ("no_matching_option", "Unable to convert '{value}' with any of the alternatives"),
    ("inner_validator_error", "Value is not valid for any of the alternatives"),
];

/// Message ids the built-in date formatter renders.
const DATE_BOUND_IDS: &[&str] = &["value_too_low", "value_too_high", "value_out_of_range"];

fn kind_table(kind: &Kind) -> &'static [(&'static str, &'static str)] {
    match kind {
        Kind::String | Kind::Password(_) => STRING,
        Kind::Regex(spec) => match spec.flavor {
            RegexFlavor::Custom => REGEX,
            RegexFlavor::Email => EMAIL,
            RegexFlavor::Url => URL,
            RegexFlavor::Isbn => ISBN,
        },
        Kind::Integer | Kind::Float | Kind::Decimal => NUMERIC,
        Kind::Boolean(_) => &[],
        Kind::DateTime { .. } => DATETIME,
        Kind::Choice(_) => CHOICE,
        Kind::MultiChoice(_) => MULTI_CHOICE,
        Kind::EqualTo { .. } => EQUAL_TO,
        Kind::List { .. } => LIST,
        Kind::Map { .. } => MAP,
        Kind::AnyOf { .. } => ANY_OF,
    }
}

fn lookup(table: &[(&str, &'static str)], message_id: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(id, _)| *id == message_id)
        .map(|(_, template)| *template)
}

/// Template a definition uses for `message_id`.
pub fn template_for(def: &ValidatorDefinition, message_id: &str) -> String {
    if let Some(template) = def.messages.get(message_id) {
        return template.clone();
    }
    // String-derived kinds also know the string length messages.
    let inherited: &[(&str, &str)] = match &def.kind {
        Kind::Regex(_) => STRING,
        _ => &[],
    };
    lookup(kind_table(&def.kind), message_id)
        .or_else(|| lookup(inherited, message_id))
        .or_else(|| lookup(BASE, message_id))
        .unwrap_or(message_id)
        .to_string()
}

/// Render a message for a definition.
pub fn format_message(
    def: &ValidatorDefinition,
    message_id: &str,
    params: &IndexMap<String, Value>,
) -> String {
    if let Some(formatter) = def.formatters.get(message_id) {
        return formatter(params);
    }
    let template = template_for(def, message_id);
    if let Kind::DateTime { format } = &def.kind {
        if DATE_BOUND_IDS.contains(&message_id) {
            let dated: IndexMap<String, Value> = params
                .iter()
                .map(|(k, v)| match v {
                    Value::DateTime(dt) => (k.clone(), Value::String(dt.format(format).to_string())),
                    other => (k.clone(), other.clone()),
                })
                .collect();
            return render(&template, &dated);
        }
    }
    render(&template, params)
}

/// Fill in the rendered message of an error.
pub fn render_error(def: &ValidatorDefinition, error: FieldError) -> FieldError {
    let message = format_message(def, &error.message_id, &error.params);
    error.with_message(message)
}

/// Substitute `{name}` placeholders. Unknown placeholders are kept as-is.
pub fn render(template: &str, params: &IndexMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match params.get(name) {
                    Some(value) => out.push_str(&value.to_string()),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn params(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_and_keeps_unknown() {
        let p = params(&[("min_value", Value::Integer(3))]);
        assert_eq!(render("at least {min_value}", &p), "at least 3");
        assert_eq!(render("{missing} stays", &p), "{missing} stays");
        assert_eq!(render("open { brace", &p), "open { brace");
    }

    #[test]
    fn test_kind_tables_and_base() {
        let def = ValidatorDefinition::integer();
        assert_eq!(
            template_for(&def, "value_out_of_range"),
            "Expecting value between {min_value} and {max_value}"
        );
        assert_eq!(template_for(&def, "required_error"), "This field is required");
        assert_eq!(template_for(&def, "no_such_id"), "no_such_id");
        assert_eq!(
            template_for(&ValidatorDefinition::email(), "pattern_mismatch"),
            "Invalid e-mail address"
        );
        assert_eq!(
            template_for(&ValidatorDefinition::email(), "value_too_long"),
            "Expecting at most {max_length} characters"
        );
        assert_eq!(
            template_for(&ValidatorDefinition::isbn(), "isbn_checksum"),
            "ISBN checksum verification failed"
        );
    }

    #[test]
    fn test_override_and_formatter_precedence() {
        let def = ValidatorDefinition::integer()
            .with_message("value_too_low", "Too small: {min_value}")
            .with_formatter("value_too_high", |p| format!("custom {}", p["max_value"]));
        let p = params(&[("min_value", Value::Integer(1)), ("max_value", Value::Integer(9))]);
        assert_eq!(format_message(&def, "value_too_low", &p), "Too small: 1");
        assert_eq!(format_message(&def, "value_too_high", &p), "custom 9");
    }

    #[test]
    fn test_datetime_bounds_use_own_format() {
        let def = ValidatorDefinition::datetime("%d/%m/%Y");
        let min = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let p = params(&[("min_value", Value::DateTime(min))]);
        assert_eq!(format_message(&def, "value_too_low", &p), "Minimal date is 01/03/2024");
    }
}
