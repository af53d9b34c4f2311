//! Startup config validation: every service definition must supply the
//! config keys its type declares as required, checked before the service
//! graph is built so a missing key fails fast with a structured error
//! rather than panicking deep inside a factory.

use std::fmt;

use crate::deployment::Deployment;
use crate::registry::ServiceRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingConfigKey {
    pub service_name: String,
    pub type_name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    pub missing: Vec<MissingConfigKey>,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} service definition(s) missing required config keys: ", self.missing.len())?;
        for (i, m) in self.missing.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{} ({}) missing '{}'", m.service_name, m.type_name, m.key)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}

/// Check every service definition in `deployment` against its registered
/// type's `required_config_keys` (spec.md §9 design-note extension:
/// *Config/Registration* errors are fatal at startup, same kind as a
/// missing type or unresolved dependency).
pub fn validate_keys(registry: &ServiceRegistry, deployment: &Deployment) -> Result<(), ConfigValidationError> {
    let mut missing = Vec::new();

    for (service_name, type_name) in registry.definitions() {
        let Some(service_type) = registry.service_type(&type_name) else { continue };
        if service_type.required_config_keys.is_empty() {
            continue;
        }
        let Some(def) = deployment.service_definitions.get(&service_name) else { continue };
        for key in &service_type.required_config_keys {
            if !def.config.contains_key(key) {
                missing.push(MissingConfigKey {
                    service_name: service_name.clone(),
                    type_name: type_name.clone(),
                    key: key.clone(),
                });
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigValidationError { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigValue;
    use crate::deployment::ServiceDefinition;
    use crate::registry::ServiceType;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn registry_with_required_keys() -> ServiceRegistry {
        let registry = ServiceRegistry::new();
        registry
            .register_type(
                ServiceType::builder("db-pool")
                    .local_factory(Arc::new(|_deps, _config| {
                        Ok(Arc::new(()) as crate::registry::ServiceInstance)
                    }))
                    .required_config_keys(["dsn", "max_conns"])
                    .build(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn reports_missing_required_key() {
        let registry = registry_with_required_keys();
        registry.define_service(ServiceDefinition {
            name: "primary-db".to_string(),
            type_name: "db-pool".to_string(),
            config: {
                let mut m = HashMap::new();
                m.insert("dsn".to_string(), ConfigValue::String("postgres://x".to_string()));
                m
            },
            depends_on: Vec::new(),
        });

        let mut deployment = Deployment::default();
        deployment.service_definitions.insert(
            "primary-db".to_string(),
            ServiceDefinition {
                name: "primary-db".to_string(),
                type_name: "db-pool".to_string(),
                config: {
                    let mut m = HashMap::new();
                    m.insert("dsn".to_string(), ConfigValue::String("postgres://x".to_string()));
                    m
                },
                depends_on: Vec::new(),
            },
        );

        let err = validate_keys(&registry, &deployment).unwrap_err();
        assert_eq!(err.missing.len(), 1);
        assert_eq!(err.missing[0].key, "max_conns");
    }

    #[test]
    fn passes_when_all_keys_present() {
        let registry = registry_with_required_keys();
        registry.define_service(ServiceDefinition {
            name: "primary-db".to_string(),
            type_name: "db-pool".to_string(),
            config: HashMap::new(),
            depends_on: Vec::new(),
        });

        let mut deployment = Deployment::default();
        let mut config = HashMap::new();
        config.insert("dsn".to_string(), ConfigValue::String("postgres://x".to_string()));
        config.insert("max_conns".to_string(), ConfigValue::Integer(10));
        deployment.service_definitions.insert(
            "primary-db".to_string(),
            ServiceDefinition { name: "primary-db".to_string(), type_name: "db-pool".to_string(), config, depends_on: Vec::new() },
        );

        validate_keys(&registry, &deployment).unwrap();
    }
}
