//! Convention Engine (C4, §4.4): maps method names to `(verb, path
//! template)` per named convention.

use std::collections::HashMap;
use std::sync::RwLock;

use axum::http::Method;

/// A single resolved mapping for a method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionMatch {
    pub verb: Method,
    pub path_template: String,
}

/// A named rule mapping method names to `(verb, path)` (GLOSSARY).
///
/// Implementations receive the method name plus the service type's resolved
/// singular/plural resource names and either produce a match or decline
/// (spec §4.4: "if not found -> skip silently").
pub trait Convention: Send + Sync {
    fn resolve(&self, method: &str, resource: &str, resource_plural: &str) -> Option<ConventionMatch>;
}

/// The default REST convention (spec §4.4: "typical CRUD names").
#[derive(Debug, Default, Clone, Copy)]
pub struct RestConvention;

impl Convention for RestConvention {
    fn resolve(&self, method: &str, resource: &str, resource_plural: &str) -> Option<ConventionMatch> {
        let (verb, path) = match method {
            "List" => (Method::GET, format!("/{resource_plural}")),
            "Get" => (Method::GET, format!("/{resource_plural}/{{id}}")),
            "Create" => (Method::POST, format!("/{resource_plural}")),
            "Update" => (Method::PUT, format!("/{resource_plural}/{{id}}")),
            "Delete" => (Method::DELETE, format!("/{resource_plural}/{{id}}")),
            _ => return None,
        };
        let _ = resource;
        Some(ConventionMatch { verb, path_template: path })
    }
}

/// Global, name-addressed registry of conventions (spec §4.4: "Conventions
/// are registered globally and addressed by name"; spec §9: "process-wide
/// named registries with an 'init before serve' contract").
#[derive(Default)]
pub struct ConventionRegistry {
    conventions: RwLock<HashMap<String, std::sync::Arc<dyn Convention>>>,
}

impl ConventionRegistry {
    pub fn new() -> Self {
        let registry = Self::default();
        registry.register("rest", std::sync::Arc::new(RestConvention));
        registry
    }

    pub fn register(&self, name: impl Into<String>, convention: std::sync::Arc<dyn Convention>) {
        self.conventions.write().expect("convention registry poisoned").insert(name.into(), convention);
    }

    pub fn resolve(
        &self,
        convention_name: &str,
        method: &str,
        resource: &str,
        resource_plural: &str,
    ) -> Option<ConventionMatch> {
        let conventions = self.conventions.read().expect("convention registry poisoned");
        conventions.get(convention_name)?.resolve(method, resource, resource_plural)
    }
}

/// Compute the plural resource name, defaulting to `resource + "s"` absent
/// an explicit override (spec §4.4).
pub fn default_plural(resource: &str) -> String {
    format!("{resource}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_convention_covers_crud() {
        let rest = RestConvention;
        assert_eq!(
            rest.resolve("List", "user", "users").unwrap(),
            ConventionMatch { verb: Method::GET, path_template: "/users".to_string() }
        );
        assert_eq!(
            rest.resolve("Get", "user", "users").unwrap(),
            ConventionMatch { verb: Method::GET, path_template: "/users/{id}".to_string() }
        );
        assert_eq!(
            rest.resolve("Create", "user", "users").unwrap(),
            ConventionMatch { verb: Method::POST, path_template: "/users".to_string() }
        );
        assert_eq!(
            rest.resolve("Update", "user", "users").unwrap(),
            ConventionMatch { verb: Method::PUT, path_template: "/users/{id}".to_string() }
        );
        assert_eq!(
            rest.resolve("Delete", "user", "users").unwrap(),
            ConventionMatch { verb: Method::DELETE, path_template: "/users/{id}".to_string() }
        );
    }

    #[test]
    fn unmatched_method_is_none() {
        let rest = RestConvention;
        assert!(rest.resolve("Refund", "order", "orders").is_none());
    }

    #[test]
    fn registry_resolves_by_name() {
        let registry = ConventionRegistry::new();
        let m = registry.resolve("rest", "List", "user", "users").unwrap();
        assert_eq!(m.path_template, "/users");
    }

    #[test]
    fn default_plural_appends_s() {
        assert_eq!(default_plural("user"), "users");
    }
}
