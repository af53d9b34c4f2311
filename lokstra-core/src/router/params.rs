//! Parameter binding and validation (spec §4.5 step 4-5).
//!
//! Rust has no runtime reflection over struct tags, so per the design note
//! in spec §9 ("accept an explicit per-route descriptor built at
//! registration time"), a params struct declares its own binding sources by
//! implementing [`BindableParams`] instead of being inspected via tags.

use std::collections::HashMap;

use axum::http::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::formatter::FieldError;

/// Where a single field's value comes from (spec §4.5 step 5: `path:"…"`,
/// `query:"…"`, `header:"…"`, `json:"…"`, and the `json:"*"` wildcard).
#[derive(Debug, Clone)]
pub enum ParamSource {
    Path(&'static str),
    Query(&'static str),
    Header(&'static str),
    JsonField(&'static str),
    /// `json:"*"` — captures the entire request body as the field's value.
    JsonBody,
}

/// A field-level validator (spec §4.5 step 5).
#[derive(Debug, Clone)]
pub enum Validator {
    Required,
    Min(f64),
    Max(f64),
    Email,
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    OneOf(Vec<String>),
}

impl Validator {
    pub fn check(&self, field: &str, value: &Value) -> Result<(), FieldError> {
        let fail = |code: &str, message: String| Err(FieldError::new(field, code, message));
        match self {
            Validator::Required => {
                if value.is_null() || value.as_str().is_some_and(str::is_empty) {
                    fail("required", format!("{field} is required"))
                } else {
                    Ok(())
                }
            }
            Validator::Min(min) => match number_len(value) {
                Some(n) if n < *min => fail("min", format!("{field} must be >= {min}")),
                _ => Ok(()),
            },
            Validator::Max(max) => match number_len(value) {
                Some(n) if n > *max => fail("max", format!("{field} must be <= {max}")),
                _ => Ok(()),
            },
            Validator::Email => match value.as_str() {
                Some(s) if garde::rules::email::validate(s).is_err() => {
                    fail("email", format!("{field} must be a valid email"))
                }
                _ => Ok(()),
            },
            Validator::Gt(bound) => match as_f64(value) {
                Some(n) if !(n > *bound) => fail("gt", format!("{field} must be > {bound}")),
                _ => Ok(()),
            },
            Validator::Gte(bound) => match as_f64(value) {
                Some(n) if !(n >= *bound) => fail("gte", format!("{field} must be >= {bound}")),
                _ => Ok(()),
            },
            Validator::Lt(bound) => match as_f64(value) {
                Some(n) if !(n < *bound) => fail("lt", format!("{field} must be < {bound}")),
                _ => Ok(()),
            },
            Validator::Lte(bound) => match as_f64(value) {
                Some(n) if !(n <= *bound) => fail("lte", format!("{field} must be <= {bound}")),
                _ => Ok(()),
            },
            Validator::OneOf(options) => match value.as_str() {
                Some(s) if !options.iter().any(|o| o == s) => {
                    fail("oneof", format!("{field} must be one of {options:?}"))
                }
                _ => Ok(()),
            },
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn number_len(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().map(|s| s.chars().count() as f64))
}

/// One field's binding source plus the validators that run against it.
pub struct ParamSpec {
    pub field: &'static str,
    pub source: ParamSource,
    pub validators: Vec<Validator>,
}

impl ParamSpec {
    pub fn new(field: &'static str, source: ParamSource) -> Self {
        Self { field, source, validators: Vec::new() }
    }

    pub fn validate(mut self, validators: impl IntoIterator<Item = Validator>) -> Self {
        self.validators.extend(validators);
        self
    }
}

/// A request parameter struct with an explicit, registration-time binding
/// descriptor (spec §9's reflection substitute).
pub trait BindableParams: DeserializeOwned + Send + Sync + 'static {
    fn specs() -> Vec<ParamSpec>;
}

/// Empty parameter set for handlers with a `()`/`Context`-only signature
/// category (spec §4.5 step 4).
impl BindableParams for () {
    fn specs() -> Vec<ParamSpec> {
        Vec::new()
    }
}

/// Raw request material available for binding a [`BindableParams`] type.
pub struct BindSource<'a> {
    pub path_params: &'a HashMap<String, String>,
    pub query: &'a HashMap<String, String>,
    pub headers: &'a HeaderMap,
    pub body: &'a Value,
}

/// Bind and validate a [`BindableParams`] value out of a request (spec §4.5
/// steps 4-5). Binding failures produce field errors directly; validators
/// then run against the assembled JSON before final deserialization.
pub fn bind<P: BindableParams>(source: &BindSource<'_>) -> Result<P, Vec<FieldError>> {
    let mut object = serde_json::Map::new();
    let mut errors = Vec::new();

    for spec in P::specs() {
        let raw_value = match &spec.source {
            ParamSource::Path(name) => source.path_params.get(*name).map(|v| Value::String(v.clone())),
            ParamSource::Query(name) => source.query.get(*name).map(|v| Value::String(v.clone())),
            ParamSource::Header(name) => source
                .headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(|v| Value::String(v.to_string())),
            ParamSource::JsonField(name) => source.body.get(name).cloned(),
            ParamSource::JsonBody => Some(source.body.clone()),
        };

        let value = raw_value.unwrap_or(Value::Null);
        for validator in &spec.validators {
            if let Err(e) = validator.check(spec.field, &value) {
                errors.push(e);
            }
        }
        object.insert(spec.field.to_string(), value);
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value(Value::Object(object))
        .map_err(|e| vec![FieldError::new("<root>", "bind_failed", e.to_string())])
}
