//! Convention-based routing for controller actions.
//!
//! Every action gets exactly one route. Hints in the action signature win;
//! otherwise the names decide:
//! - `index` of the root controller → `/`
//! - `index` of any other controller → `/{controller}`
//! - any other action → `/{controller}/{action}`
//!
//! Routes without a method hint accept every method.

pub mod hint;

use std::fmt;
use std::str::FromStr;

use hyper::Method;
use serde_json::{Map, Value};
use tracing::info;

use crate::config::Settings;
use crate::context::RouteInfo;
use crate::controller::{Action, ControllerRegistry};
use crate::error::{Error, Result};

pub use hint::{parse_hints, Hints};

/// HTTP method accepted by a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMethod {
    All,
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl RouteMethod {
    pub fn matches(self, method: &Method) -> bool {
        match self {
            RouteMethod::All => true,
            RouteMethod::Get => method == Method::GET,
            RouteMethod::Post => method == Method::POST,
            RouteMethod::Put => method == Method::PUT,
            RouteMethod::Patch => method == Method::PATCH,
            RouteMethod::Delete => method == Method::DELETE,
            RouteMethod::Head => method == Method::HEAD,
            RouteMethod::Options => method == Method::OPTIONS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RouteMethod::All => "all",
            RouteMethod::Get => "get",
            RouteMethod::Post => "post",
            RouteMethod::Put => "put",
            RouteMethod::Patch => "patch",
            RouteMethod::Delete => "delete",
            RouteMethod::Head => "head",
            RouteMethod::Options => "options",
        }
    }
}

impl FromStr for RouteMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(RouteMethod::All),
            "get" => Ok(RouteMethod::Get),
            "post" => Ok(RouteMethod::Post),
            "put" => Ok(RouteMethod::Put),
            "patch" => Ok(RouteMethod::Patch),
            "delete" => Ok(RouteMethod::Delete),
            "head" => Ok(RouteMethod::Head),
            "options" => Ok(RouteMethod::Options),
            other => Err(format!("unsupported method '{}'", other)),
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method and path derived for one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub method: RouteMethod,
    pub path: String,
}

/// Derive the route of `controller#action` from its hints and the naming
/// conventions.
pub fn derive_route(
    controller: &str,
    action: &str,
    hints: &Hints,
    root_controller: &str,
) -> Result<RouteSpec> {
    let mut method = hints.method().unwrap_or("all").to_string();

    let path = match hints.url() {
        Some(url) => match url.split_once(char::is_whitespace) {
            Some((url_method, path)) => {
                method = url_method.to_string();
                path.trim().to_string()
            }
            None => url.to_string(),
        },
        None if action == "index" && controller == root_controller => "/".to_string(),
        None if action == "index" => format!("/{}", controller),
        None => format!("/{}/{}", controller, action),
    };

    let method = method
        .parse::<RouteMethod>()
        .map_err(|message| Error::invalid_route(controller, action, message))?;

    if path.is_empty() {
        return Err(Error::invalid_route(controller, action, "empty url"));
    }
    let path = if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    };

    Ok(RouteSpec { method, path })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    /// Trailing `*name`; captures the rest of the path.
    Splat(String),
}

fn compile_pattern(path: &str) -> Vec<Segment> {
    path.split('/')
        .filter(|part| !part.is_empty())
        .map(|part| {
            if let Some(name) = part.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else if let Some(name) = part.strip_prefix('*') {
                Segment::Splat(name.to_string())
            } else {
                Segment::Static(part.to_string())
            }
        })
        .collect()
}

/// A registered route.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: RouteMethod,
    pub pattern: String,
    segments: Vec<Segment>,
    pub info: RouteInfo,
    pub action: Action,
}

impl Route {
    pub fn new(method: RouteMethod, pattern: &str, info: RouteInfo, action: Action) -> Self {
        Self {
            method,
            pattern: pattern.to_string(),
            segments: compile_pattern(pattern),
            info,
            action,
        }
    }

    /// Match a request path, returning captured parameters.
    fn match_path(&self, path: &str) -> Option<Map<String, Value>> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let mut params = Map::new();

        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Splat(name) => {
                    let rest = parts.get(idx..).unwrap_or_default();
                    params.insert(name.clone(), Value::String(decode(&rest.join("/"))));
                    return Some(params);
                }
                Segment::Static(expected) => {
                    if parts.get(idx) != Some(&expected.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let actual = parts.get(idx)?;
                    params.insert(name.clone(), Value::String(decode(actual)));
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// A successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: Map<String, Value>,
}

/// All routes of the application, in registration order.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive one route per action of every registered controller.
    pub fn build(registry: &ControllerRegistry, settings: &Settings) -> Result<Self> {
        let mut table = Self::new();

        for controller in registry.iter() {
            for action in controller.actions() {
                let hints = parse_hints(action.signature(), &settings.hint_sign);
                let spec = derive_route(
                    controller.name(),
                    action.name(),
                    &hints,
                    &settings.root_controller,
                )?;

                info!(
                    method = %spec.method,
                    path = %spec.path,
                    target = %format!("{}#{}", controller.name(), action.name()),
                    "route"
                );
                table.add(Route::new(
                    spec.method,
                    &spec.path,
                    RouteInfo::new(controller.name(), action.name()),
                    action.clone(),
                ));
            }
        }

        Ok(table)
    }

    pub fn add(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// First route, in registration order, accepting `method` and `path`.
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.routes
            .iter()
            .filter(|route| route.method.matches(method))
            .find_map(|route| {
                route
                    .match_path(path)
                    .map(|params| RouteMatch { route, params })
            })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
