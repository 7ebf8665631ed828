//! Conversion and rule checking for individual validator kinds.

pub mod convert;
pub mod rules;

pub use convert::{convert, convert_scalar, hash_password};
pub use rules::{check, effective_rules, length_rule, CustomCheck, LengthUnit, Rule};
