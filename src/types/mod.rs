//! Context and evaluation types carried by analytics events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The default context kind. Its canonical key is the bare context key.
pub const DEFAULT_KIND: &str = "user";

/// Kind name reserved for multi-kind contexts.
pub const MULTI_KIND: &str = "multi";

/// A reference to a context attribute, possibly nested.
///
/// A reference that starts with `/` is a path whose components are separated by `/`,
/// with `~1` standing for `/` and `~0` for `~`. Anything else names a single top-level
/// attribute literally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeRef {
    raw: String,
    components: Vec<String>,
    valid: bool,
}

impl AttributeRef {
    /// Parses a reference in path syntax.
    pub fn from_path(path: impl Into<String>) -> Self {
        let raw = path.into();
        if raw.is_empty() || raw == "/" {
            return Self::invalid(raw);
        }
        if !raw.starts_with('/') {
            return Self {
                components: vec![raw.clone()],
                raw,
                valid: true,
            };
        }

        let mut components = Vec::new();
        for part in raw[1..].split('/') {
            if part.is_empty() {
                return Self::invalid(raw);
            }
            match unescape_component(part) {
                Some(component) => components.push(component),
                None => return Self::invalid(raw),
            }
        }
        Self {
            raw,
            components,
            valid: true,
        }
    }

    /// A reference to a top-level attribute whose name is taken literally.
    pub fn from_literal(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            return Self::invalid(name);
        }
        let raw = if name.starts_with('/') {
            format!("/{}", name.replace('~', "~0").replace('/', "~1"))
        } else {
            name.clone()
        };
        Self {
            raw,
            components: vec![name],
            valid: true,
        }
    }

    fn invalid(raw: String) -> Self {
        Self {
            raw,
            components: Vec::new(),
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn unescape_component(part: &str) -> Option<String> {
    if !part.contains('~') {
        return Some(part.to_string());
    }
    let mut out = String::with_capacity(part.len());
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

impl std::fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for AttributeRef {
    fn from(value: &str) -> Self {
        AttributeRef::from_path(value)
    }
}

/// A context of a single kind.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleContext {
    pub kind: String,
    pub key: String,
    pub anonymous: bool,
    /// Custom attributes, including `name` when set.
    pub attributes: Map<String, Value>,
    pub private_attributes: Vec<AttributeRef>,
}

impl SingleContext {
    pub fn name(&self) -> Option<&str> {
        self.attributes.get("name").and_then(Value::as_str)
    }

    fn canonical_key(&self) -> String {
        if self.kind == DEFAULT_KIND {
            self.key.clone()
        } else {
            format!("{}:{}", self.kind, escape_key(&self.key))
        }
    }

    fn is_valid(&self) -> bool {
        is_valid_kind(&self.kind) && !self.key.is_empty()
    }
}

fn escape_key(key: &str) -> String {
    key.replace('%', "%25").replace(':', "%3A")
}

fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty()
        && kind != "kind"
        && kind != MULTI_KIND
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

/// The identity an event is attributed to.
#[derive(Debug, Clone, PartialEq)]
pub enum Context {
    Single(SingleContext),
    Multi(Vec<SingleContext>),
}

impl Context {
    /// A context of the default kind with the given key.
    pub fn new(key: impl Into<String>) -> Self {
        Self::builder(key).build()
    }

    pub fn builder(key: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(DEFAULT_KIND, key)
    }

    pub fn builder_with_kind(kind: impl Into<String>, key: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(kind, key)
    }

    /// Combines contexts of different kinds. Nested multi contexts are flattened.
    pub fn multi(contexts: impl IntoIterator<Item = Context>) -> Self {
        let mut members = Vec::new();
        for context in contexts {
            match context {
                Context::Single(single) => members.push(single),
                Context::Multi(inner) => members.extend(inner),
            }
        }
        if members.len() == 1 {
            return Context::Single(members.remove(0));
        }
        members.sort_by(|a, b| a.kind.cmp(&b.kind));
        Context::Multi(members)
    }

    pub fn kind(&self) -> &str {
        match self {
            Context::Single(single) => &single.kind,
            Context::Multi(_) => MULTI_KIND,
        }
    }

    /// The individual contexts, sorted by kind for multi contexts.
    pub fn individual_contexts(&self) -> &[SingleContext] {
        match self {
            Context::Single(single) => std::slice::from_ref(single),
            Context::Multi(members) => members,
        }
    }

    /// Canonical identity used to decide whether a context has been seen before.
    pub fn fully_qualified_key(&self) -> String {
        match self {
            Context::Single(single) => single.canonical_key(),
            Context::Multi(members) => members
                .iter()
                .map(|m| format!("{}:{}", m.kind, escape_key(&m.key)))
                .collect::<Vec<_>>()
                .join(":"),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Context::Single(single) => single.is_valid(),
            Context::Multi(members) => {
                if members.is_empty() || !members.iter().all(SingleContext::is_valid) {
                    return false;
                }
                let mut kinds: Vec<&str> = members.iter().map(|m| m.kind.as_str()).collect();
                kinds.sort_unstable();
                kinds.windows(2).all(|w| w[0] != w[1])
            }
        }
    }
}

/// Builder for single-kind contexts.
#[derive(Debug)]
pub struct ContextBuilder {
    kind: String,
    key: String,
    anonymous: bool,
    attributes: Map<String, Value>,
    private_attributes: Vec<AttributeRef>,
}

impl ContextBuilder {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
            anonymous: false,
            attributes: Map::new(),
            private_attributes: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.attributes
            .insert("name".to_string(), Value::String(name.into()));
        self
    }

    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    /// Sets a custom attribute. `kind`, `key`, `anonymous` and `_meta` are reserved and ignored.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if matches!(name.as_str(), "kind" | "key" | "anonymous" | "_meta") {
            return self;
        }
        self.attributes.insert(name, value.into());
        self
    }

    /// Marks an attribute reference as private for this context only.
    pub fn private(mut self, reference: impl Into<AttributeRef>) -> Self {
        self.private_attributes.push(reference.into());
        self
    }

    pub fn build(self) -> Context {
        Context::Single(SingleContext {
            kind: self.kind,
            key: self.key,
            anonymous: self.anonymous,
            attributes: self.attributes,
            private_attributes: self.private_attributes,
        })
    }
}

/// Why a flag evaluated to the value it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
    Off,
    Fallthrough {
        #[serde(rename = "inExperiment", default, skip_serializing_if = "is_false")]
        in_experiment: bool,
    },
    TargetMatch,
    RuleMatch {
        #[serde(rename = "ruleIndex")]
        rule_index: u32,
        #[serde(rename = "ruleId", skip_serializing_if = "Option::is_none")]
        rule_id: Option<String>,
        #[serde(rename = "inExperiment", default, skip_serializing_if = "is_false")]
        in_experiment: bool,
    },
    PrerequisiteFailed {
        #[serde(rename = "prerequisiteKey")]
        prerequisite_key: String,
    },
    Error {
        #[serde(rename = "errorKind")]
        error_kind: String,
    },
}

fn is_false(value: &bool) -> bool {
    !*value
}
