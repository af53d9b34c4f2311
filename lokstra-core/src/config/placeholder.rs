//! Two-phase `${…}` placeholder substitution (spec C1, §4.1).
//!
//! Phase 1 substitutes every non-`@cfg` token left-to-right against the
//! resolver chain (CLI flags, then environment, then named resolvers).
//! Phase 2 substitutes `@cfg:KEY` tokens against the caller-supplied
//! `configs` map; a string that is *exactly* one such token returns the
//! config value's original type instead of its stringified form.

use std::collections::HashMap;
use std::sync::Arc;

use super::value::ConfigValue;
use super::ConfigError;

/// A named resolver consulted for `@name:key[:default]` tokens.
///
/// `@cfg` is reserved and never dispatched here — it always reads from the
/// `configs` map passed to [`PlaceholderResolver::resolve`].
pub trait Resolver: Send + Sync {
    fn resolve(&self, key: &str) -> Option<String>;
}

impl<F> Resolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve(&self, key: &str) -> Option<String> {
        (self)(key)
    }
}

enum Token<'a> {
    /// `NAME` or `NAME:default`, resolved against flags/env.
    Bare { name: &'a str, default: Option<&'a str> },
    /// `@name:key` or `@name:key:default`, `name` may be `cfg`.
    Named { name: &'a str, key: &'a str, default: Option<&'a str> },
}

/// Resolves `${…}` placeholders against CLI flags, environment variables,
/// and any number of named resolvers registered by the host application.
#[derive(Clone, Default)]
pub struct PlaceholderResolver {
    flags: HashMap<String, String>,
    named: HashMap<String, Arc<dyn Resolver>>,
}

impl PlaceholderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the CLI-flag side of the bare-`NAME` resolver chain (spec §4.1:
    /// "command-line flags… win over environment variables").
    pub fn with_flags(mut self, flags: HashMap<String, String>) -> Self {
        self.flags = flags;
        self
    }

    /// Register a named resolver addressed as `${@name:key}`.
    pub fn register_resolver(&mut self, name: impl Into<String>, resolver: Arc<dyn Resolver>) {
        self.named.insert(name.into(), resolver);
    }

    fn resolve_bare(&self, name: &str) -> Option<String> {
        self.flags
            .get(&name.to_uppercase())
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }

    /// Resolve every placeholder in `input`, returning a typed
    /// [`ConfigValue`] (spec §4.1).
    pub fn resolve(&self, input: &str, configs: &HashMap<String, ConfigValue>) -> Result<ConfigValue, ConfigError> {
        if !input.contains("${") {
            return Ok(ConfigValue::String(input.to_string()));
        }

        let phase1 = self.substitute_non_cfg(input)?;

        // Whole-string single `@cfg` token preserves the original type.
        if let Some(content) = whole_token(&phase1) {
            let token = parse_token(content)?;
            if let Token::Named { name, key, default } = token {
                if name == "cfg" {
                    return self.lookup_cfg(key, default, configs);
                }
            }
        }

        Ok(ConfigValue::String(self.substitute_cfg(&phase1, configs)?))
    }

    fn substitute_non_cfg(&self, input: &str) -> Result<String, ConfigError> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        loop {
            match next_span(rest)? {
                None => {
                    out.push_str(rest);
                    break;
                }
                Some((start, end, content)) => {
                    out.push_str(&rest[..start]);
                    let token = parse_token(content)?;
                    match token {
                        Token::Named { name, .. } if name == "cfg" => {
                            // Leave @cfg tokens untouched for phase 2.
                            out.push_str(&rest[start..end]);
                        }
                        Token::Named { name, key, default } => {
                            let resolver = self
                                .named
                                .get(name)
                                .ok_or_else(|| ConfigError::UnknownResolver { name: name.to_string() })?;
                            let value = resolver.resolve(key).or_else(|| default.map(str::to_string));
                            let value = value.ok_or_else(|| ConfigError::KeyNotFound { key: key.to_string() })?;
                            out.push_str(&value);
                        }
                        Token::Bare { name, default } => {
                            let value = self.resolve_bare(name).or_else(|| default.map(str::to_string));
                            let value = value.ok_or_else(|| ConfigError::KeyNotFound { key: name.to_string() })?;
                            out.push_str(&value);
                        }
                    }
                    rest = &rest[end..];
                }
            }
        }
        Ok(out)
    }

    fn substitute_cfg(&self, input: &str, configs: &HashMap<String, ConfigValue>) -> Result<String, ConfigError> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        loop {
            match next_span(rest)? {
                None => {
                    out.push_str(rest);
                    break;
                }
                Some((start, end, content)) => {
                    out.push_str(&rest[..start]);
                    let token = parse_token(content)?;
                    match token {
                        Token::Named { name, key, default } if name == "cfg" => {
                            let value = self.lookup_cfg(key, default, configs)?;
                            out.push_str(&value.interpolate());
                        }
                        _ => {
                            // Already substituted in phase 1; shouldn't recur, but
                            // stay defensive and pass through verbatim.
                            out.push_str(&rest[start..end]);
                        }
                    }
                    rest = &rest[end..];
                }
            }
        }
        Ok(out)
    }

    fn lookup_cfg(
        &self,
        key: &str,
        default: Option<&str>,
        configs: &HashMap<String, ConfigValue>,
    ) -> Result<ConfigValue, ConfigError> {
        match configs.get(key) {
            Some(value) => Ok(value.clone()),
            None => match default {
                Some(d) => Ok(ConfigValue::String(d.to_string())),
                None => Err(ConfigError::CfgKeyMissing { key: key.to_string() }),
            },
        }
    }
}

/// If `input` is exactly one `${…}` token with nothing before or after,
/// return its inner content.
fn whole_token(input: &str) -> Option<&str> {
    let stripped = input.strip_prefix("${")?;
    let inner = stripped.strip_suffix('}')?;
    if inner.contains("${") {
        None
    } else {
        Some(inner)
    }
}

/// Find the next `${…}` span in `input`, returning `(start, end, content)`
/// with `end` exclusive of the closing brace. `None` if there's no `${` at
/// all. An `UnclosedPlaceholder` error if `${` appears with no matching `}`.
fn next_span(input: &str) -> Result<Option<(usize, usize, &str)>, ConfigError> {
    let Some(start) = input.find("${") else {
        return Ok(None);
    };
    let after = start + 2;
    match input[after..].find('}') {
        Some(rel_end) => {
            let end = after + rel_end + 1;
            Ok(Some((start, end, &input[after..after + rel_end])))
        }
        None => Err(ConfigError::UnclosedPlaceholder { input: input.to_string() }),
    }
}

fn parse_token(content: &str) -> Result<Token<'_>, ConfigError> {
    if let Some(rest) = content.strip_prefix('@') {
        let mut parts = rest.splitn(3, ':');
        let name = parts.next().unwrap_or("");
        let key = parts.next();
        let default = parts.next();
        let key = key.ok_or_else(|| ConfigError::MalformedResolverToken { token: content.to_string() })?;
        Ok(Token::Named { name, key, default })
    } else if let Some((name, default)) = content.split_once(':') {
        Ok(Token::Bare { name, default: Some(default) })
    } else {
        Ok(Token::Bare { name: content, default: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn configs() -> HashMap<String, ConfigValue> {
        let mut m = HashMap::new();
        m.insert("DB_NAME".to_string(), ConfigValue::String("mydb".to_string()));
        m.insert("DB_MAX_CONNS".to_string(), ConfigValue::Integer(20));
        m
    }

    #[test]
    #[serial]
    fn dsn_example_from_spec() {
        std::env::set_var("DB_HOST", "localhost");
        std::env::set_var("DB_PORT", "5432");
        let resolver = PlaceholderResolver::new();
        let result = resolver
            .resolve("postgres://${DB_HOST}:${DB_PORT}/${@cfg:DB_NAME}", &configs())
            .unwrap();
        assert_eq!(result, ConfigValue::String("postgres://localhost:5432/mydb".to_string()));
        std::env::remove_var("DB_HOST");
        std::env::remove_var("DB_PORT");
    }

    #[test]
    fn typed_cfg_preserves_integer() {
        let resolver = PlaceholderResolver::new();
        let result = resolver.resolve("${@cfg:DB_MAX_CONNS}", &configs()).unwrap();
        assert_eq!(result, ConfigValue::Integer(20));
    }

    #[test]
    #[serial]
    fn flags_win_over_env() {
        std::env::set_var("PORT", "9999");
        let mut flags = HashMap::new();
        flags.insert("PORT".to_string(), "8080".to_string());
        let resolver = PlaceholderResolver::new().with_flags(flags);
        let result = resolver.resolve("${PORT}", &HashMap::new()).unwrap();
        assert_eq!(result, ConfigValue::String("8080".to_string()));
        std::env::remove_var("PORT");
    }

    #[test]
    fn missing_key_without_default_errors() {
        let resolver = PlaceholderResolver::new();
        let err = resolver.resolve("${DEFINITELY_NOT_SET_XYZ}", &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::KeyNotFound { .. }));
    }

    #[test]
    fn default_used_when_key_missing() {
        let resolver = PlaceholderResolver::new();
        let result = resolver.resolve("${DEFINITELY_NOT_SET_XYZ:fallback}", &HashMap::new()).unwrap();
        assert_eq!(result, ConfigValue::String("fallback".to_string()));
    }

    #[test]
    fn unclosed_placeholder_errors() {
        let resolver = PlaceholderResolver::new();
        let err = resolver.resolve("postgres://${DB_HOST", &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnclosedPlaceholder { .. }));
    }

    #[test]
    fn malformed_resolver_token_errors() {
        let resolver = PlaceholderResolver::new();
        let err = resolver.resolve("${@vault}", &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedResolverToken { .. }));
    }

    #[test]
    fn cfg_key_missing_without_default_errors() {
        let resolver = PlaceholderResolver::new();
        let err = resolver.resolve("${@cfg:NOT_THERE}", &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::CfgKeyMissing { .. }));
    }

    #[test]
    fn named_resolver_is_dispatched() {
        let mut resolver = PlaceholderResolver::new();
        resolver.register_resolver(
            "vault",
            Arc::new(|key: &str| if key == "secret" { Some("s3cr3t".to_string()) } else { None }),
        );
        let result = resolver.resolve("${@vault:secret}", &HashMap::new()).unwrap();
        assert_eq!(result, ConfigValue::String("s3cr3t".to_string()));
    }

    #[test]
    fn idempotent_on_already_resolved_input() {
        let resolver = PlaceholderResolver::new();
        let once = resolver.resolve("plain-value", &HashMap::new()).unwrap();
        let twice = resolver.resolve(&once.interpolate(), &HashMap::new()).unwrap();
        assert_eq!(once, twice);
    }
}
