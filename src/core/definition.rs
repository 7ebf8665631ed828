//! Validator definitions (prototypes).
//!
//! A definition is declared once and shared behind an [`Arc`]. Binding
//! copies it, so options changed on a bound copy never leak back into the
//! prototype or into sibling bindings.

use crate::core::error::{DefinitionError, NodeId};
use crate::core::types::{Value, ValueType};
use crate::event::{EventTarget, Listeners};
use crate::validators::rules::Rule;
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a declared definition.
pub type ValidatorRef = Arc<ValidatorDefinition>;

/// Zero-argument default producer.
pub type DefaultProducer = Arc<dyn Fn() -> Value + Send + Sync>;

/// Custom renderer for one message id.
pub type MessageFormatter = Arc<dyn Fn(&IndexMap<String, Value>) -> String + Send + Sync>;

const EMAIL_PATTERN: &str = r"^[\w\-\.]+@([\w\-]+\.)+[\w\-]{2,4}$";
const URL_PATTERN: &str = r"^((http|https|ftp)://)?([a-zA-Z0-9\-]+\.)+[a-zA-Z]{2,3}(/\S*)?$";
const ISBN_PATTERN: &str = r"[0-9]+X?$";

/// Default value of a definition.
#[derive(Clone)]
pub enum DefaultValue {
    None,
    Literal(Value),
    Producer(DefaultProducer),
}

impl DefaultValue {
    /// Produce the default, `Undefined` when there is none.
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::None => Value::Undefined,
            DefaultValue::Literal(value) => value.clone(),
            DefaultValue::Producer(producer) => producer(),
        }
    }

    pub fn is_some(&self) -> bool {
        !matches!(self, DefaultValue::None)
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::None => write!(f, "None"),
            DefaultValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            DefaultValue::Producer(_) => write!(f, "Producer(<closure>)"),
        }
    }
}

/// Preset flavour of a regex validator. Selects the message vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexFlavor {
    Custom,
    Email,
    Url,
    /// Digits with an optional trailing `X`, verified by check digit.
    Isbn,
}

/// Compiled pattern of a regex validator.
#[derive(Debug, Clone)]
pub struct PatternSpec {
    pub pattern: String,
    pub compiled: Regex,
    pub flavor: RegexFlavor,
}

impl PatternSpec {
    /// Compile a pattern. Matching is anchored at the start of the input.
    pub fn compile(pattern: &str, flavor: RegexFlavor) -> Result<Self, DefinitionError> {
        let compiled = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
            DefinitionError::InvalidPattern {
                pattern: pattern.to_string(),
                error: e.to_string(),
            }
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            compiled,
            flavor,
        })
    }
}

/// String literals recognised by boolean validators.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BooleanLiterals {
    pub trues: Vec<String>,
    pub falses: Vec<String>,
}

impl Default for BooleanLiterals {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            trues: owned(&["1", "y", "yes", "on", "true"]),
            falses: owned(&["0", "n", "no", "off", "false"]),
        }
    }
}

/// Digest applied by password validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    /// Store the plaintext unchanged.
    Plain,
}

/// Options of a choice validator.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceSpec {
    /// Allowed keys with their display labels, in order.
    pub options: Vec<(Value, String)>,
    /// Type input keys are converted to.
    pub key_type: ValueType,
}

impl ChoiceSpec {
    pub fn keys(&self) -> Vec<Value> {
        self.options.iter().map(|(k, _)| k.clone()).collect()
    }
}

/// Kind-specific configuration.
#[derive(Debug, Clone)]
pub enum Kind {
    String,
    Regex(PatternSpec),
    Integer,
    Float,
    Decimal,
    /// `None` literals resolve to the engine configuration.
    Boolean(Option<BooleanLiterals>),
    DateTime { format: String },
    Password(HashAlgorithm),
    Choice(ChoiceSpec),
    MultiChoice(ChoiceSpec),
    /// Compares with the sibling bound under `target`.
    EqualTo { target: String },
    List { element: ValidatorRef },
    /// First option that converts the input holds the value; validation
    /// falls back to later options.
    AnyOf { options: Vec<ValidatorRef> },
    /// `strict: None` resolves to the engine configuration, then to strict.
    Map {
        fields: IndexMap<String, ValidatorRef>,
        strict: Option<bool>,
    },
}

/// Kind discriminant, used by selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindTag {
    String,
    Regex,
    Email,
    Url,
    Isbn,
    Integer,
    Float,
    Decimal,
    Boolean,
    DateTime,
    Password,
    Choice,
    MultiChoice,
    EqualTo,
    List,
    AnyOf,
    Map,
}

impl fmt::Display for KindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Kind {
    pub fn tag(&self) -> KindTag {
        match self {
            Kind::String => KindTag::String,
            Kind::Regex(spec) => match spec.flavor {
                RegexFlavor::Custom => KindTag::Regex,
                RegexFlavor::Email => KindTag::Email,
                RegexFlavor::Url => KindTag::Url,
                RegexFlavor::Isbn => KindTag::Isbn,
            },
            Kind::Integer => KindTag::Integer,
            Kind::Float => KindTag::Float,
            Kind::Decimal => KindTag::Decimal,
            Kind::Boolean(_) => KindTag::Boolean,
            Kind::DateTime { .. } => KindTag::DateTime,
            Kind::Password(_) => KindTag::Password,
            Kind::Choice(_) => KindTag::Choice,
            Kind::MultiChoice(_) => KindTag::MultiChoice,
            Kind::EqualTo { .. } => KindTag::EqualTo,
            Kind::List { .. } => KindTag::List,
            Kind::AnyOf { .. } => KindTag::AnyOf,
            Kind::Map { .. } => KindTag::Map,
        }
    }

    /// Type produced by conversion. `None` when it depends on a sibling.
    pub fn target_type(&self) -> Option<ValueType> {
        match self {
            Kind::String | Kind::Regex(_) | Kind::Password(_) => Some(ValueType::String),
            Kind::Integer => Some(ValueType::Integer),
            Kind::Float => Some(ValueType::Float),
            Kind::Decimal => Some(ValueType::Decimal),
            Kind::Boolean(_) => Some(ValueType::Boolean),
            Kind::DateTime { .. } => Some(ValueType::DateTime),
            Kind::Choice(spec) => Some(spec.key_type.clone()),
            Kind::MultiChoice(spec) => Some(ValueType::List(Box::new(spec.key_type.clone()))),
            Kind::EqualTo { .. } | Kind::AnyOf { .. } => None,
            Kind::List { .. } => Some(ValueType::List(Box::new(ValueType::Any))),
            Kind::Map { .. } => Some(ValueType::Map),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Kind::List { .. } | Kind::Map { .. } | Kind::AnyOf { .. })
    }
}

/// Length and value bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bounds {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min_value: Option<Value>,
    pub max_value: Option<Value>,
}

/// Declaration of a field: shared, immutable once declared.
#[derive(Clone)]
pub struct ValidatorDefinition {
    /// Filled in by the owning schema or composite when absent.
    pub key: Option<String>,
    pub optional: bool,
    pub default: DefaultValue,
    pub label: Option<String>,
    pub description: Option<String>,
    pub kind: Kind,
    pub bounds: Bounds,
    /// Extra rules checked after the built-in ones.
    pub rules: Vec<Rule>,
    /// Per-definition message template overrides.
    pub messages: IndexMap<String, String>,
    pub formatters: IndexMap<String, MessageFormatter>,
    pub listeners: Listeners,
    /// Declaration order stamp; 0 until declared.
    pub order: u64,
}

impl fmt::Debug for ValidatorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorDefinition")
            .field("key", &self.key)
            .field("optional", &self.optional)
            .field("default", &self.default)
            .field("kind", &self.kind)
            .field("bounds", &self.bounds)
            .field("rules", &self.rules)
            .field("messages", &self.messages)
            .field("formatters", &self.formatters.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners)
            .field("order", &self.order)
            .finish()
    }
}

// ============================================================================
// Builder Pattern
// ============================================================================

impl ValidatorDefinition {
    /// Create a definition of the given kind with no options.
    pub fn new(kind: Kind) -> Self {
        Self {
            key: None,
            optional: false,
            default: DefaultValue::None,
            label: None,
            description: None,
            kind,
            bounds: Bounds::default(),
            rules: Vec::new(),
            messages: IndexMap::new(),
            formatters: IndexMap::new(),
            listeners: Listeners::new(),
            order: 0,
        }
    }

    pub fn string() -> Self {
        Self::new(Kind::String)
    }

    /// String matching `pattern` from its first character.
    pub fn regex(pattern: &str) -> Result<Self, DefinitionError> {
        Ok(Self::new(Kind::Regex(PatternSpec::compile(
            pattern,
            RegexFlavor::Custom,
        )?)))
    }

    pub fn email() -> Self {
        Self::preset(EMAIL_PATTERN, RegexFlavor::Email)
    }

    pub fn url() -> Self {
        Self::preset(URL_PATTERN, RegexFlavor::Url)
    }

    /// ISBN-10 or ISBN-13 number, checked by its last digit.
    pub fn isbn() -> Self {
        Self::preset(ISBN_PATTERN, RegexFlavor::Isbn)
    }

    fn preset(pattern: &str, flavor: RegexFlavor) -> Self {
        match PatternSpec::compile(pattern, flavor) {
            Ok(spec) => Self::new(Kind::Regex(spec)),
            // Preset patterns are constants known to compile.
            Err(_) => Self::string(),
        }
    }

    pub fn integer() -> Self {
        Self::new(Kind::Integer)
    }

    pub fn float() -> Self {
        Self::new(Kind::Float)
    }

    pub fn decimal() -> Self {
        Self::new(Kind::Decimal)
    }

    /// Boolean validator. Defaults to `false`.
    pub fn boolean() -> Self {
        Self::new(Kind::Boolean(None)).with_default(false)
    }

    /// Boolean validator with explicit literal sets.
    pub fn boolean_with<T, F>(trues: T, falses: F) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        let literals = BooleanLiterals {
            trues: trues.into_iter().map(Into::into).collect(),
            falses: falses.into_iter().map(Into::into).collect(),
        };
        Self::new(Kind::Boolean(Some(literals))).with_default(false)
    }

    /// Date/time parsed with a `chrono` format string.
    pub fn datetime(format: impl Into<String>) -> Self {
        Self::new(Kind::DateTime {
            format: format.into(),
        })
    }

    pub fn password() -> Self {
        Self::new(Kind::Password(HashAlgorithm::default()))
    }

    pub fn password_with(algorithm: HashAlgorithm) -> Self {
        Self::new(Kind::Password(algorithm))
    }

    /// Single choice among `(key, label)` options.
    pub fn choice<K, L>(options: impl IntoIterator<Item = (K, L)>, key_type: ValueType) -> Self
    where
        K: Into<Value>,
        L: Into<String>,
    {
        Self::new(Kind::Choice(Self::choice_spec(options, key_type)))
    }

    /// Any subset of `(key, label)` options.
    pub fn multi_choice<K, L>(
        options: impl IntoIterator<Item = (K, L)>,
        key_type: ValueType,
    ) -> Self
    where
        K: Into<Value>,
        L: Into<String>,
    {
        Self::new(Kind::MultiChoice(Self::choice_spec(options, key_type)))
    }

    fn choice_spec<K, L>(options: impl IntoIterator<Item = (K, L)>, key_type: ValueType) -> ChoiceSpec
    where
        K: Into<Value>,
        L: Into<String>,
    {
        ChoiceSpec {
            options: options
                .into_iter()
                .map(|(k, l)| (k.into(), l.into()))
                .collect(),
            key_type,
        }
    }

    /// Must equal the sibling bound under `target`. Needs an owner.
    pub fn equal_to(target: impl Into<String>) -> Self {
        Self::new(Kind::EqualTo {
            target: target.into(),
        })
    }

    /// List whose every element is processed by `element`.
    pub fn list(element: ValidatorDefinition) -> Self {
        Self::new(Kind::List {
            element: Arc::new(element),
        })
    }

    /// Value accepted by any of `options`, tried in order.
    pub fn any_of(options: impl IntoIterator<Item = ValidatorDefinition>) -> Self {
        Self::new(Kind::AnyOf {
            options: options.into_iter().map(Arc::new).collect(),
        })
    }

    /// Map of named children. Each child's key defaults to its name.
    pub fn map<K: Into<String>>(fields: impl IntoIterator<Item = (K, ValidatorDefinition)>) -> Self {
        let fields = fields
            .into_iter()
            .map(|(name, mut def)| {
                let name = name.into();
                if def.key.is_none() {
                    def.key = Some(name.clone());
                }
                (name, Arc::new(def))
            })
            .collect();
        Self::new(Kind::Map {
            fields,
            strict: None,
        })
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Mark as optional: absent input is valid.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = DefaultValue::Literal(value.into());
        self
    }

    /// Default computed on every bind.
    pub fn with_default_fn<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = DefaultValue::Producer(Arc::new(producer));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.bounds.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.bounds.max_length = Some(max);
        self
    }

    pub fn min_value(mut self, min: impl Into<Value>) -> Self {
        self.bounds.min_value = Some(min.into());
        self
    }

    pub fn max_value(mut self, max: impl Into<Value>) -> Self {
        self.bounds.max_value = Some(max.into());
        self
    }

    /// Set strict (`true`) or lenient handling of unknown map keys.
    /// No effect on other kinds.
    pub fn strict(mut self, strict: bool) -> Self {
        if let Kind::Map { strict: mode, .. } = &mut self.kind {
            *mode = Some(strict);
        }
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Override the template of one message id.
    pub fn with_message(mut self, message_id: impl Into<String>, template: impl Into<String>) -> Self {
        self.messages.insert(message_id.into(), template.into());
        self
    }

    /// Render one message id with a custom function.
    pub fn with_formatter<F>(mut self, message_id: impl Into<String>, formatter: F) -> Self
    where
        F: Fn(&IndexMap<String, Value>) -> String + Send + Sync + 'static,
    {
        self.formatters.insert(message_id.into(), Arc::new(formatter));
        self
    }

    /// Human-readable label: the explicit one, else the key humanised.
    pub fn label(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        self.key.as_deref().map(humanize).unwrap_or_default()
    }

    /// Key for messages and logs.
    pub fn display_key(&self, id: NodeId) -> String {
        self.key.clone().unwrap_or_else(|| id.to_string())
    }

    /// Whether unknown keys are rejected. Only meaningful for maps.
    pub fn is_strict(&self) -> bool {
        match &self.kind {
            Kind::Map { strict, .. } => strict.unwrap_or(true),
            _ => true,
        }
    }
}

impl EventTarget for ValidatorDefinition {
    fn storage(&self) -> Option<&Listeners> {
        Some(&self.listeners)
    }
}

/// `"foo_bar_baz"` to `"Foo bar baz"`.
pub fn humanize(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}
