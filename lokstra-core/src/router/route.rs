//! Route metadata and path-template helpers shared by the router kernel
//! (C9) and the proxy's client-side path substitution (C6).
//!
//! Path syntax (spec §4.5): `{name}` captures a single segment; a trailing
//! `*name` captures the remainder. Axum 0.8 (the kernel's dispatch engine)
//! already uses `{name}`/`{*name}`, so the only translation needed is the
//! bare-`*name` wildcard form this spec uses at the template's tail.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;

use crate::formatter::Formatter;

/// Convert a spec-style template (`/files/*rest`) into axum 0.8's own
/// syntax (`/files/{*rest}`). Templates already in `{param}`/`{*param}`
/// form pass through unchanged.
pub fn to_axum_path(template: &str) -> String {
    let mut segments: Vec<String> = template.split('/').map(str::to_string).collect();
    if let Some(last) = segments.last_mut() {
        if let Some(name) = last.strip_prefix('*') {
            *last = format!("{{*{name}}}");
        }
    }
    segments.join("/")
}

/// Priority class for route ordering: exact segments outrank `{param}`,
/// which outrank a trailing wildcard (spec §4.5: "Route priority: exact >
/// `{param}` > `*`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathSpecificity {
    Wildcard = 0,
    Param = 1,
    Exact = 2,
}

/// Score a template by its least-specific segment, used to order candidate
/// routes when more than one could otherwise match (spec §4.5).
pub fn specificity(template: &str) -> Vec<PathSpecificity> {
    template
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|seg| {
            if seg.starts_with('*') || seg.starts_with("{*") {
                PathSpecificity::Wildcard
            } else if seg.starts_with('{') {
                PathSpecificity::Param
            } else {
                PathSpecificity::Exact
            }
        })
        .collect()
}

/// Render a template by substituting `{name}`/`*name` segments from
/// `values`. Used by the proxy to build a concrete request path
/// (spec §4.6 step 2).
pub fn render(template: &str, values: &HashMap<String, String>) -> Result<String, String> {
    let segments: Vec<String> = template
        .split('/')
        .map(|seg| {
            if let Some(name) = seg.strip_prefix('*') {
                values.get(name).cloned().ok_or_else(|| name.to_string())
            } else if let Some(name) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                let name = name.strip_prefix('*').unwrap_or(name);
                values.get(name).cloned().ok_or_else(|| name.to_string())
            } else {
                Ok(seg.to_string())
            }
        })
        .collect::<Result<_, _>>()?;
    Ok(segments.join("/"))
}

/// Every `{name}`/`*name` segment a template references, in order.
pub fn param_names(template: &str) -> Vec<String> {
    template
        .split('/')
        .filter_map(|seg| {
            if let Some(name) = seg.strip_prefix('*') {
                Some(name.to_string())
            } else {
                seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')).map(|name| {
                    name.strip_prefix('*').unwrap_or(name).to_string()
                })
            }
        })
        .collect()
}

/// A registered route's metadata (spec §3 Route).
#[derive(Clone)]
pub struct RouteMeta {
    pub verb: Method,
    pub path_template: String,
    pub route_name: Option<String>,
    pub middleware: Vec<String>,
    pub skip_parent_middleware: bool,
    pub formatter: Option<Arc<dyn Formatter>>,
}

impl RouteMeta {
    pub fn new(verb: Method, path_template: impl Into<String>) -> Self {
        Self {
            verb,
            path_template: path_template.into(),
            route_name: None,
            middleware: Vec::new(),
            skip_parent_middleware: false,
            formatter: None,
        }
    }

    pub fn canonical_key(&self) -> (Method, String) {
        (self.verb.clone(), self.path_template.clone())
    }
}
