//! Service Registry (C3, §4.3): registers service types, resolves
//! dependency graphs, lazily instantiates, and classifies each dependency
//! as local or remote for the current process.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::http::Method;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::config::ConfigValue;
use crate::convention::ConventionRegistry;
use crate::deployment::{Deployment, ExternalServiceDefinition, ServiceDefinition};
use crate::proxy::ProxyService;

/// A type-erased service instance, downcast by the auto-router/proxy at the
/// point where the concrete type is known (spec §9: "share only the
/// interface").
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Dependencies already resolved for the service currently being built,
/// keyed by dependency name (spec §4.3 step 3).
pub type ResolvedDeps = HashMap<String, ServiceInstance>;

pub type LocalFactory =
    Arc<dyn Fn(&ResolvedDeps, &HashMap<String, ConfigValue>) -> Result<ServiceInstance, RegistryError> + Send + Sync>;

pub type RemoteFactory = Arc<
    dyn Fn(&ResolvedDeps, &HashMap<String, ConfigValue>, Arc<ProxyService>) -> Result<ServiceInstance, RegistryError>
        + Send
        + Sync,
>;

/// A registered *kind* (spec §3): factories plus routing metadata shared by
/// every instance of the type.
#[derive(Clone)]
pub struct ServiceType {
    pub name: String,
    pub local_factory: Option<LocalFactory>,
    pub remote_factory: Option<RemoteFactory>,
    pub prefix: String,
    pub convention: String,
    pub resource: String,
    pub resource_plural: Option<String>,
    pub hidden: Vec<String>,
    pub overrides: HashMap<String, (Method, String)>,
    pub middleware: Vec<String>,
    pub allow_override: bool,
    /// Config keys every instance of this type must supply (spec.md
    /// Non-goals exclude "YAML parsing" as external, but fast-failing on a
    /// missing key before a factory runs is still the registry's job).
    pub required_config_keys: Vec<String>,
}

impl ServiceType {
    pub fn builder(name: impl Into<String>) -> ServiceTypeBuilder {
        ServiceTypeBuilder::new(name)
    }

    pub fn resource_plural(&self) -> String {
        self.resource_plural.clone().unwrap_or_else(|| crate::convention::default_plural(&self.resource))
    }
}

/// Fluent builder mirroring the `register_type(name, localFactory?,
/// remoteFactory?, options…)` contract (spec §4.3).
pub struct ServiceTypeBuilder {
    inner: ServiceType,
}

impl ServiceTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            inner: ServiceType {
                resource: name.to_lowercase(),
                name,
                local_factory: None,
                remote_factory: None,
                prefix: String::new(),
                convention: "rest".to_string(),
                resource_plural: None,
                hidden: Vec::new(),
                overrides: HashMap::new(),
                middleware: Vec::new(),
                allow_override: false,
                required_config_keys: Vec::new(),
            },
        }
    }

    pub fn local_factory(mut self, factory: LocalFactory) -> Self {
        self.inner.local_factory = Some(factory);
        self
    }

    pub fn remote_factory(mut self, factory: RemoteFactory) -> Self {
        self.inner.remote_factory = Some(factory);
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.inner.prefix = prefix.into();
        self
    }

    pub fn convention(mut self, convention: impl Into<String>) -> Self {
        self.inner.convention = convention.into();
        self
    }

    pub fn resource(mut self, resource: impl Into<String>, plural: Option<String>) -> Self {
        self.inner.resource = resource.into();
        self.inner.resource_plural = plural;
        self
    }

    pub fn hidden(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner.hidden = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn override_route(mut self, method: impl Into<String>, verb: Method, path: impl Into<String>) -> Self {
        self.inner.overrides.insert(method.into(), (verb, path.into()));
        self
    }

    pub fn middleware(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner.middleware = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_override(mut self, allow: bool) -> Self {
        self.inner.allow_override = allow;
        self
    }

    pub fn required_config_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner.required_config_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> ServiceType {
        self.inner
    }
}

/// Whether a resolved node is built locally or reached through a proxy
/// (spec §3 ServiceGraph).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Local,
    Remote { target: String },
}

/// A fully resolved graph node: name, classification, and the instance
/// (spec §3).
#[derive(Clone)]
pub struct Classified {
    pub name: String,
    pub classification: Classification,
    pub instance: ServiceInstance,
}

/// A graph node surfaced by [`ServiceRegistry::graph_for_server`], without
/// forcing instantiation.
#[derive(Clone)]
pub struct GraphEntry {
    pub name: String,
    pub classification: Classification,
    pub service_type: Option<Arc<ServiceType>>,
}

#[derive(Debug, Clone)]
pub enum RegistryError {
    MissingType { type_name: String },
    UnknownDependency { name: String },
    Cycle { path: Vec<String> },
    NoLocalFactory { type_name: String },
    NoRemoteFactory { type_name: String },
    FactoryFailed { name: String, message: String },
    DuplicateRoute { verb: Method, path: String },
    TypeAlreadyRegistered { type_name: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::MissingType { type_name } => write!(f, "no service type registered: {type_name}"),
            RegistryError::UnknownDependency { name } => write!(f, "unknown dependency: {name}"),
            RegistryError::Cycle { path } => write!(f, "dependency cycle: {}", path.join(" -> ")),
            RegistryError::NoLocalFactory { type_name } => {
                write!(f, "service type {type_name} has no local factory")
            }
            RegistryError::NoRemoteFactory { type_name } => {
                write!(f, "service type {type_name} has no remote factory")
            }
            RegistryError::FactoryFailed { name, message } => write!(f, "factory for {name} failed: {message}"),
            RegistryError::DuplicateRoute { verb, path } => write!(f, "duplicate route: {verb} {path}"),
            RegistryError::TypeAlreadyRegistered { type_name } => {
                write!(f, "service type already registered: {type_name}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Registers factories and definitions; resolves dependencies;
/// lazy-instantiates; classifies local vs remote (spec §4.3).
pub struct ServiceRegistry {
    types: DashMap<String, Arc<ServiceType>>,
    definitions: DashMap<String, ServiceDefinition>,
    externals: DashMap<String, ExternalServiceDefinition>,
    cells: DashMap<String, Arc<OnceCell<Result<Classified, RegistryError>>>>,
    /// Conventions used to build remote proxies (spec §8 "proxy <-> local
    /// parity": a non-REST convention must resolve the same way for a
    /// remote service as it would locally).
    conventions: Arc<ConventionRegistry>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self {
            types: DashMap::new(),
            definitions: DashMap::new(),
            externals: DashMap::new(),
            cells: DashMap::new(),
            conventions: Arc::new(ConventionRegistry::new()),
        }
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry that resolves remote proxies against a caller-supplied
    /// convention set instead of the REST-only default.
    pub fn with_conventions(conventions: Arc<ConventionRegistry>) -> Self {
        Self { conventions, ..Self::default() }
    }

    pub fn register_type(&self, service_type: ServiceType) -> Result<(), RegistryError> {
        let name = service_type.name.clone();
        if let Some(existing) = self.types.get(&name) {
            if !service_type.allow_override && !existing.allow_override {
                return Err(RegistryError::TypeAlreadyRegistered { type_name: name });
            }
        }
        self.types.insert(name, Arc::new(service_type));
        Ok(())
    }

    pub fn define_service(&self, def: ServiceDefinition) {
        self.definitions.insert(def.name.clone(), def);
    }

    pub fn define_external(&self, def: ExternalServiceDefinition) {
        self.externals.insert(def.name.clone(), def);
    }

    pub fn service_type(&self, name: &str) -> Option<Arc<ServiceType>> {
        self.types.get(name).map(|t| t.clone())
    }

    /// Every defined service name paired with its declared type name (spec
    /// §4.2: used by config validation to check declared keys before the
    /// graph is built).
    pub fn definitions(&self) -> Vec<(String, String)> {
        self.definitions.iter().map(|entry| (entry.key().clone(), entry.value().type_name.clone())).collect()
    }

    /// Resolve `name` to a built, classified instance (spec §4.3). Lazy and
    /// idempotent: concurrent callers for the same name await one
    /// initialization (spec §5 "one-shot latch per service name").
    pub async fn resolve(
        &self,
        name: &str,
        deployment: &Deployment,
        current_server: &str,
    ) -> Result<Classified, RegistryError> {
        let mut stack = Vec::new();
        self.resolve_inner(name, deployment, current_server, &mut stack).await
    }

    fn resolve_inner<'a>(
        &'a self,
        name: &'a str,
        deployment: &'a Deployment,
        current_server: &'a str,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<Classified, RegistryError>> {
        Box::pin(async move {
            let cell = self
                .cells
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();

            if let Some(cached) = cell.get() {
                return cached.clone();
            }

            if stack.iter().any(|n| n == name) {
                let mut path = stack.clone();
                path.push(name.to_string());
                return Err(RegistryError::Cycle { path });
            }

            stack.push(name.to_string());
            let result = cell
                .get_or_init(|| async { self.build(name, deployment, current_server, stack).await })
                .await
                .clone();
            stack.pop();
            result
        })
    }

    async fn build(
        &self,
        name: &str,
        deployment: &Deployment,
        current_server: &str,
        stack: &mut Vec<String>,
    ) -> Result<Classified, RegistryError> {
        let classification = self.classify(name, deployment, current_server)?;

        let (type_name, config, depends_on) = self.definition_parts(name)?;
        let service_type = self
            .types
            .get(&type_name)
            .map(|t| t.clone())
            .ok_or_else(|| RegistryError::MissingType { type_name: type_name.clone() })?;

        let mut deps = ResolvedDeps::new();
        for dep_name in &depends_on {
            let resolved = self.resolve_inner(dep_name, deployment, current_server, stack).await?;
            deps.insert(dep_name.clone(), resolved.instance);
        }

        let instance = match &classification {
            Classification::Local => {
                let factory = service_type
                    .local_factory
                    .clone()
                    .ok_or_else(|| RegistryError::NoLocalFactory { type_name: type_name.clone() })?;
                factory(&deps, &config)?
            }
            Classification::Remote { target } => {
                let factory = service_type
                    .remote_factory
                    .clone()
                    .ok_or_else(|| RegistryError::NoRemoteFactory { type_name: type_name.clone() })?;
                let proxy =
                    Arc::new(ProxyService::new(target.clone(), service_type.clone(), self.conventions.clone()));
                factory(&deps, &config, proxy)?
            }
        };

        Ok(Classified { name: name.to_string(), classification, instance })
    }

    fn definition_parts(&self, name: &str) -> Result<(String, HashMap<String, ConfigValue>, Vec<String>), RegistryError> {
        if let Some(def) = self.definitions.get(name) {
            return Ok((def.type_name.clone(), def.config.clone(), def.depends_on.clone()));
        }
        if let Some(ext) = self.externals.get(name) {
            return Ok((ext.type_name.clone(), HashMap::new(), Vec::new()));
        }
        Err(RegistryError::UnknownDependency { name: name.to_string() })
    }

    /// Classify `name` for `current_server` without instantiating anything
    /// (spec §4.3 "Classification precedence").
    pub fn classify(
        &self,
        name: &str,
        deployment: &Deployment,
        current_server: &str,
    ) -> Result<Classification, RegistryError> {
        if let Some(server) = deployment.server(current_server) {
            if server.publishes(name) {
                return Ok(Classification::Local);
            }
        }
        if let Some(other) = deployment.publisher_of(name) {
            let addr = other.apps.first().map(|a| a.addr.as_str()).unwrap_or("");
            return Ok(Classification::Remote { target: format!("{}{}", other.base_url, addr) });
        }
        if let Some(ext) = self.externals.get(name) {
            return Ok(Classification::Remote { target: ext.url.clone() });
        }
        Err(RegistryError::UnknownDependency { name: name.to_string() })
    }

    /// The transitive closure of dependencies a server must instantiate,
    /// with classification but no instantiation (spec §4.3).
    pub fn graph_for_server(
        &self,
        server_name: &str,
        deployment: &Deployment,
    ) -> Result<Vec<GraphEntry>, RegistryError> {
        let server = deployment
            .server(server_name)
            .ok_or_else(|| RegistryError::UnknownDependency { name: server_name.to_string() })?;

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut queue: Vec<String> = server.published_services.clone();

        while let Some(name) = queue.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let classification = self.classify(&name, deployment, server_name)?;
            let (type_name, _config, depends_on) = self.definition_parts(&name)?;
            let service_type = self.types.get(&type_name).map(|t| t.clone());
            queue.extend(depends_on);
            out.push(GraphEntry { name, classification, service_type });
        }

        Ok(out)
    }
}

/// Downcast a type-erased [`ServiceInstance`] back to its concrete type.
pub fn downcast<T: Send + Sync + 'static>(instance: &ServiceInstance) -> Option<Arc<T>> {
    instance.clone().downcast::<T>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{App, Server};

    struct Greeter {
        greeting: String,
    }

    fn registry_with_chain() -> (ServiceRegistry, Deployment) {
        let registry = ServiceRegistry::new();
        registry
            .register_type(
                ServiceType::builder("greeter")
                    .local_factory(Arc::new(|_deps, config| {
                        let greeting = config
                            .get("greeting")
                            .map(ConfigValue::interpolate)
                            .unwrap_or_else(|| "hi".to_string());
                        Ok(Arc::new(Greeter { greeting }) as ServiceInstance)
                    }))
                    .build(),
            )
            .unwrap();

        registry.define_service(ServiceDefinition {
            name: "greeter-svc".to_string(),
            type_name: "greeter".to_string(),
            config: {
                let mut m = HashMap::new();
                m.insert("greeting".to_string(), ConfigValue::String("hello".to_string()));
                m
            },
            depends_on: Vec::new(),
        });

        let deployment = Deployment {
            name: "test".to_string(),
            servers: vec![Server {
                name: "A".to_string(),
                base_url: "http://a".to_string(),
                apps: vec![App { addr: ":8080".to_string(), ..Default::default() }],
                published_services: vec!["greeter-svc".to_string()],
            }],
            ..Default::default()
        };

        (registry, deployment)
    }

    #[tokio::test]
    async fn resolves_local_service() {
        let (registry, deployment) = registry_with_chain();
        let resolved = registry.resolve("greeter-svc", &deployment, "A").await.unwrap();
        assert_eq!(resolved.classification, Classification::Local);
        let greeter = downcast::<Greeter>(&resolved.instance).unwrap();
        assert_eq!(greeter.greeting, "hello");
    }

    #[tokio::test]
    async fn concurrent_resolve_returns_same_instance() {
        let (registry, deployment) = registry_with_chain();
        let registry = Arc::new(registry);
        let deployment = Arc::new(deployment);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let deployment = deployment.clone();
            handles.push(tokio::spawn(async move {
                registry.resolve("greeter-svc", &deployment, "A").await.unwrap().instance
            }));
        }

        let mut instances = Vec::new();
        for handle in handles {
            instances.push(handle.await.unwrap());
        }
        let first = Arc::as_ptr(&instances[0]);
        assert!(instances.iter().all(|i| Arc::as_ptr(i) == first));
    }

    #[tokio::test]
    async fn cycle_is_detected() {
        let registry = ServiceRegistry::new();
        registry
            .register_type(
                ServiceType::builder("noop")
                    .local_factory(Arc::new(|_deps, _config| Ok(Arc::new(()) as ServiceInstance)))
                    .build(),
            )
            .unwrap();
        registry.define_service(ServiceDefinition {
            name: "a".to_string(),
            type_name: "noop".to_string(),
            config: HashMap::new(),
            depends_on: vec!["b".to_string()],
        });
        registry.define_service(ServiceDefinition {
            name: "b".to_string(),
            type_name: "noop".to_string(),
            config: HashMap::new(),
            depends_on: vec!["a".to_string()],
        });

        let deployment = Deployment {
            servers: vec![Server {
                name: "A".to_string(),
                published_services: vec!["a".to_string(), "b".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };

        let err = registry.resolve("a", &deployment, "A").await.unwrap_err();
        assert!(matches!(err, RegistryError::Cycle { .. }));
    }

    #[tokio::test]
    async fn unknown_dependency_errors() {
        let (registry, deployment) = registry_with_chain();
        let err = registry.resolve("does-not-exist", &deployment, "A").await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownDependency { .. }));
    }
}
