//! Loads one file or a directory of YAML documents into a structured
//! [`Deployment`] (spec C2, §4.2, §6).

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use super::placeholder::PlaceholderResolver;
use super::value::ConfigValue;
use super::ConfigError;
use crate::deployment::{
    App, Deployment, ExternalServiceDefinition, ListenerType, ReverseProxyConfig, Server,
    ServiceDefinition, SpaMount, StaticMount, TlsOptions,
};

#[derive(Debug)]
pub enum ConfigLoadError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Placeholder(ConfigError),
    /// The document didn't carry a field required to build the model, e.g.
    /// a service definition with no `type`.
    MissingField { path: String },
    UnknownListenerType { app: String, value: String },
}

impl fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLoadError::Io(e) => write!(f, "io error reading config: {e}"),
            ConfigLoadError::Yaml(e) => write!(f, "invalid yaml: {e}"),
            ConfigLoadError::Placeholder(e) => write!(f, "placeholder resolution failed: {e}"),
            ConfigLoadError::MissingField { path } => write!(f, "missing required field: {path}"),
            ConfigLoadError::UnknownListenerType { app, value } => {
                write!(f, "app {app} has unknown listener-type: {value}")
            }
        }
    }
}

impl std::error::Error for ConfigLoadError {}

impl From<std::io::Error> for ConfigLoadError {
    fn from(e: std::io::Error) -> Self {
        ConfigLoadError::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigLoadError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigLoadError::Yaml(e)
    }
}

impl From<ConfigError> for ConfigLoadError {
    fn from(e: ConfigError) -> Self {
        ConfigLoadError::Placeholder(e)
    }
}

/// Load `path` (a single file, or a directory whose `*.yml`/`*.yaml` files
/// are merged in sorted order) into a [`Deployment`].
///
/// `configs` feeds `@cfg:KEY` placeholders (spec §4.1); `resolver` supplies
/// the `NAME`/`@resolver:key` chain.
pub fn load_deployment(
    path: &Path,
    resolver: &PlaceholderResolver,
    configs: &HashMap<String, ConfigValue>,
) -> Result<Deployment, ConfigLoadError> {
    let merged = read_and_merge(path)?;
    let resolved = resolve_tree(&merged, resolver, configs)?;
    build_deployment(&resolved)
}

fn read_and_merge(path: &Path) -> Result<serde_yaml::Mapping, ConfigLoadError> {
    let mut files = Vec::new();
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let p = entry.path();
            if matches!(p.extension().and_then(|e| e.to_str()), Some("yml") | Some("yaml")) {
                files.push(p);
            }
        }
        files.sort();
    } else {
        files.push(path.to_path_buf());
    }

    let mut merged = serde_yaml::Mapping::new();
    for file in files {
        let text = std::fs::read_to_string(&file)?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&text)?;
        if let serde_yaml::Value::Mapping(map) = doc {
            merge_mapping(&mut merged, map);
        }
    }
    Ok(merged)
}

/// Shallow-merge `src` into `dst`: mapping values merge recursively,
/// sequence values concatenate, everything else is overwritten.
fn merge_mapping(dst: &mut serde_yaml::Mapping, src: serde_yaml::Mapping) {
    for (key, value) in src {
        match dst.get_mut(&key) {
            Some(serde_yaml::Value::Mapping(existing)) => {
                if let serde_yaml::Value::Mapping(incoming) = value {
                    merge_mapping(existing, incoming);
                    continue;
                }
                dst.insert(key, value);
            }
            Some(serde_yaml::Value::Sequence(existing)) => {
                if let serde_yaml::Value::Sequence(mut incoming) = value {
                    existing.append(&mut incoming);
                    continue;
                }
                dst.insert(key, value);
            }
            _ => {
                dst.insert(key, value);
            }
        }
    }
}

fn resolve_tree(
    map: &serde_yaml::Mapping,
    resolver: &PlaceholderResolver,
    configs: &HashMap<String, ConfigValue>,
) -> Result<ConfigValue, ConfigError> {
    resolve_value(&serde_yaml::Value::Mapping(map.clone()), resolver, configs)
}

fn resolve_value(
    value: &serde_yaml::Value,
    resolver: &PlaceholderResolver,
    configs: &HashMap<String, ConfigValue>,
) -> Result<ConfigValue, ConfigError> {
    match value {
        serde_yaml::Value::String(s) => resolver.resolve(s, configs),
        serde_yaml::Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for item in seq {
                out.push(resolve_value(item, resolver, configs)?);
            }
            Ok(ConfigValue::List(out))
        }
        serde_yaml::Value::Mapping(map) => {
            let mut out = HashMap::with_capacity(map.len());
            for (k, v) in map {
                let key = match k {
                    serde_yaml::Value::String(s) => s.clone(),
                    other => format!("{other:?}"),
                };
                out.insert(key, resolve_value(v, resolver, configs)?);
            }
            Ok(ConfigValue::Map(out))
        }
        other => Ok(ConfigValue::from_yaml(other)),
    }
}

// --- Deployment extraction -------------------------------------------------

fn as_map(value: &ConfigValue) -> Option<&HashMap<String, ConfigValue>> {
    match value {
        ConfigValue::Map(m) => Some(m),
        _ => None,
    }
}

fn as_list(value: &ConfigValue) -> Vec<ConfigValue> {
    match value {
        ConfigValue::List(l) => l.clone(),
        other => vec![other.clone()],
    }
}

fn get_str(map: &HashMap<String, ConfigValue>, key: &str) -> Option<String> {
    map.get(key).map(ConfigValue::interpolate)
}

fn get_str_list(map: &HashMap<String, ConfigValue>, key: &str) -> Vec<String> {
    map.get(key).map(as_list).unwrap_or_default().iter().map(ConfigValue::interpolate).collect()
}

fn build_deployment(root: &ConfigValue) -> Result<Deployment, ConfigLoadError> {
    let root_map = as_map(root).ok_or_else(|| ConfigLoadError::MissingField { path: "<root>".to_string() })?;

    let mut deployment = Deployment {
        name: get_str(root_map, "name").unwrap_or_else(|| "default".to_string()),
        ..Default::default()
    };

    if let Some(servers) = root_map.get("servers") {
        for server_val in as_list(servers) {
            let server_map = as_map(&server_val)
                .ok_or_else(|| ConfigLoadError::MissingField { path: "servers[].<map>".to_string() })?;
            deployment.servers.push(build_server(server_map)?);
        }
    }

    if let Some(defs) = root_map.get("service-definitions").and_then(as_map) {
        for (name, def_val) in defs {
            deployment
                .service_definitions
                .insert(name.clone(), build_service_definition(name, def_val)?);
        }
    }

    if let Some(defs) = root_map.get("external-service-definitions").and_then(as_map) {
        for (name, def_val) in defs {
            let def_map = as_map(def_val)
                .ok_or_else(|| ConfigLoadError::MissingField { path: format!("external-service-definitions.{name}") })?;
            let type_name = get_str(def_map, "type")
                .ok_or_else(|| ConfigLoadError::MissingField { path: format!("external-service-definitions.{name}.type") })?;
            let url = get_str(def_map, "url")
                .ok_or_else(|| ConfigLoadError::MissingField { path: format!("external-service-definitions.{name}.url") })?;
            deployment
                .external_service_definitions
                .insert(name.clone(), ExternalServiceDefinition { name: name.clone(), type_name, url });
        }
    }

    Ok(deployment)
}

fn build_server(map: &HashMap<String, ConfigValue>) -> Result<Server, ConfigLoadError> {
    let name = get_str(map, "name").unwrap_or_default();
    let base_url = get_str(map, "base-url").or_else(|| get_str(map, "base_url")).unwrap_or_default();
    let published_services = get_str_list(map, "published-services");

    let mut apps = Vec::new();
    if let Some(app_list) = map.get("apps") {
        for app_val in as_list(app_list) {
            let app_map = as_map(&app_val)
                .ok_or_else(|| ConfigLoadError::MissingField { path: "servers[].apps[].<map>".to_string() })?;
            apps.push(build_app(app_map)?);
        }
    }

    Ok(Server { name, base_url, apps, published_services })
}

fn build_app(map: &HashMap<String, ConfigValue>) -> Result<App, ConfigLoadError> {
    let name = get_str(map, "name").unwrap_or_default();
    let addr = get_str(map, "addr").unwrap_or_default();
    let listener_raw = get_str(map, "listener-type").unwrap_or_default();
    let listener_type = ListenerType::parse(&listener_raw)
        .ok_or_else(|| ConfigLoadError::UnknownListenerType { app: name.clone(), value: listener_raw.clone() })?;

    let tls = map.get("tls").and_then(as_map).map(|tls_map| TlsOptions {
        cert_file: get_str(tls_map, "cert_file").unwrap_or_default(),
        key_file: get_str(tls_map, "key_file").unwrap_or_default(),
        ca_file: get_str(tls_map, "ca_file"),
    });

    let mount_static = map
        .get("mount-static")
        .map(as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(as_map)
        .map(|m| StaticMount { prefix: get_str(m, "prefix").unwrap_or_default(), dir: get_str(m, "dir").unwrap_or_default() })
        .collect();

    let mount_spa = map
        .get("mount-spa")
        .map(as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(as_map)
        .map(|m| {
            let mut spa = SpaMount::new(get_str(m, "prefix").unwrap_or_default(), get_str(m, "dir").unwrap_or_default());
            if let Some(index) = get_str(m, "index-file") {
                spa.index_file = index;
            }
            spa
        })
        .collect();

    let reverse_proxies = map
        .get("reverse-proxies")
        .map(as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(as_map)
        .map(|m| {
            let rewrite = m.get("rewrite").and_then(as_map).map(|r| {
                (get_str(r, "from").unwrap_or_default(), get_str(r, "to").unwrap_or_default())
            });
            ReverseProxyConfig {
                prefix: get_str(m, "prefix").unwrap_or_default(),
                target: get_str(m, "target").unwrap_or_default(),
                strip_prefix: matches!(m.get("strip-prefix"), Some(ConfigValue::Bool(true))),
                rewrite,
            }
        })
        .collect();

    Ok(App {
        name,
        addr,
        listener_type,
        tls,
        published_services: get_str_list(map, "published-services"),
        routers: get_str_list(map, "routers"),
        middlewares: get_str_list(map, "middlewares"),
        mount_static,
        mount_spa,
        reverse_proxies,
    })
}

/// Expand the shorthand where a service definition's `type` is the whole
/// value, e.g. `worker: "worker-type"` becomes `{type: "worker-type"}`
/// (spec §4.2).
fn build_service_definition(name: &str, value: &ConfigValue) -> Result<ServiceDefinition, ConfigLoadError> {
    let map: HashMap<String, ConfigValue> = match value {
        ConfigValue::String(type_name) => {
            let mut m = HashMap::new();
            m.insert("type".to_string(), ConfigValue::String(type_name.clone()));
            m
        }
        ConfigValue::Map(m) => m.clone(),
        _ => return Err(ConfigLoadError::MissingField { path: format!("service-definitions.{name}") }),
    };

    let type_name = get_str(&map, "type")
        .ok_or_else(|| ConfigLoadError::MissingField { path: format!("service-definitions.{name}.type") })?;
    let depends_on = get_str_list(&map, "depends-on");
    let config = match map.get("config") {
        Some(ConfigValue::Map(c)) => c.clone(),
        _ => HashMap::new(),
    };

    Ok(ServiceDefinition { name: name.to_string(), type_name, config, depends_on })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_servers_and_apps() {
        let file = write_temp(
            r#"
name: demo
servers:
  - name: A
    base-url: "http://localhost"
    published-services: ["user-svc"]
    apps:
      - name: http
        addr: ":8080"
        listener-type: nethttp
        published-services: ["user-svc"]
"#,
        );
        let resolver = PlaceholderResolver::new();
        let deployment = load_deployment(file.path(), &resolver, &HashMap::new()).unwrap();
        assert_eq!(deployment.name, "demo");
        assert_eq!(deployment.servers.len(), 1);
        assert_eq!(deployment.servers[0].apps.len(), 1);
        assert_eq!(deployment.servers[0].apps[0].addr, ":8080");
        assert!(deployment.servers[0].publishes("user-svc"));
    }

    #[test]
    fn expands_shorthand_service_definition() {
        let file = write_temp(
            r#"
service-definitions:
  cache: redis-cache
"#,
        );
        let resolver = PlaceholderResolver::new();
        let deployment = load_deployment(file.path(), &resolver, &HashMap::new()).unwrap();
        let def = deployment.service_definitions.get("cache").unwrap();
        assert_eq!(def.type_name, "redis-cache");
    }

    #[test]
    fn resolves_placeholders_in_scalars() {
        std::env::set_var("LOKSTRA_TEST_ADDR", ":9090");
        let file = write_temp(
            r#"
servers:
  - name: A
    apps:
      - name: http
        addr: "${LOKSTRA_TEST_ADDR}"
        listener-type: nethttp
"#,
        );
        let resolver = PlaceholderResolver::new();
        let deployment = load_deployment(file.path(), &resolver, &HashMap::new()).unwrap();
        assert_eq!(deployment.servers[0].apps[0].addr, ":9090");
        std::env::remove_var("LOKSTRA_TEST_ADDR");
    }

    #[test]
    fn unknown_listener_type_fails() {
        let file = write_temp(
            r#"
servers:
  - name: A
    apps:
      - name: http
        addr: ":8080"
        listener-type: carrier-pigeon
"#,
        );
        let resolver = PlaceholderResolver::new();
        let err = load_deployment(file.path(), &resolver, &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::UnknownListenerType { .. }));
    }
}
