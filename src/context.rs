//! Per-request context handed to controller actions.
//!
//! A context carries the route identity, merged request parameters, the
//! injected services, template globals (`state`), the render instructions
//! recorded by [`Context::render`] and the response being built.

use std::any::Any;
use std::sync::Arc;

use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::{Method, StatusCode};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Identity of the controller action handling the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub controller: String,
    pub action: String,
}

impl RouteInfo {
    pub fn new(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            action: action.into(),
        }
    }

    /// Conventional view for this action: `{controller}/{action}`.
    pub fn view_path(&self) -> String {
        format!("{}/{}", self.controller, self.action)
    }
}

/// What [`Context::render`] asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderInfo {
    pub view: String,
    pub data: Map<String, Value>,
    /// Chosen by the first `render()` call of a request.
    pub layout: Option<String>,
}

/// Optional overrides for [`Context::render`].
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// View to render instead of `{controller}/{action}`.
    pub name: Option<String>,
    /// Layout to wrap the view in instead of the default one.
    pub layout: Option<String>,
}

impl RenderOptions {
    pub fn view(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            layout: None,
        }
    }

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }
}

/// Named, shared values injected into every request context.
#[derive(Clone, Default)]
pub struct Services {
    entries: IndexMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, service: T) {
        self.entries.insert(name.into(), Arc::new(service));
    }

    /// Fetch a service by name, if it exists and has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name).cloned()?.downcast::<T>().ok()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

/// Response under construction.
#[derive(Debug, Clone)]
pub struct ResponseParts {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl Default for ResponseParts {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// Per-request mutable state.
#[derive(Debug)]
pub struct Context {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    /// Decoded query string.
    pub query: Map<String, Value>,
    /// Parsed request body (JSON or form), if any.
    pub body: Option<Value>,
    /// Query and body parameters merged; body wins on conflicts.
    pub params: Map<String, Value>,
    /// Values captured by `:name` segments of the matched route.
    pub path_params: Map<String, Value>,
    pub route: Option<RouteInfo>,
    /// Template globals, visible to every view rendered in this request.
    pub state: Map<String, Value>,
    pub response: ResponseParts,
    services: Services,
    render_info: Option<RenderInfo>,
    /// True until the first `render()` call of the request.
    main: bool,
    default_layout: String,
}

impl Context {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Map::new(),
            body: None,
            params: Map::new(),
            path_params: Map::new(),
            route: None,
            state: Map::new(),
            response: ResponseParts::default(),
            services: Services::default(),
            render_info: None,
            main: true,
            default_layout: "layout/index".to_string(),
        }
    }

    pub fn with_default_layout(mut self, layout: impl Into<String>) -> Self {
        self.default_layout = layout.into();
        self
    }

    /// Record the view to render once the action returns.
    ///
    /// The view defaults to `{controller}/{action}`. Only the first call in a
    /// request picks the layout; later calls replace the view and data but
    /// keep that layout.
    pub fn render(&mut self, data: Value, options: Option<RenderOptions>) {
        let options = options.unwrap_or_default();
        let view = options.name.unwrap_or_else(|| {
            self.route
                .as_ref()
                .map(RouteInfo::view_path)
                .unwrap_or_default()
        });

        let layout = if self.main {
            self.main = false;
            Some(options.layout.unwrap_or_else(|| self.default_layout.clone()))
        } else {
            self.render_info.as_ref().and_then(|info| info.layout.clone())
        };

        self.render_info = Some(RenderInfo {
            view,
            data: into_object(data),
            layout,
        });
    }

    pub fn render_info(&self) -> Option<&RenderInfo> {
        self.render_info.as_ref()
    }

    pub(crate) fn take_render_info(&mut self) -> Option<RenderInfo> {
        self.render_info.take()
    }

    pub(crate) fn replace_render_info(&mut self, info: Option<RenderInfo>) -> Option<RenderInfo> {
        std::mem::replace(&mut self.render_info, info)
    }

    pub(crate) fn set_services(&mut self, services: Services) {
        self.services = services;
    }

    /// Injected service `name`, if registered with type `T`.
    pub fn service<T: std::any::Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.services.get(name)
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Parameter from the merged query/body map, falling back to path params.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name).or_else(|| self.path_params.get(name))
    }

    /// String form of [`Context::param`].
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(Value::as_str)
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.status = status;
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response.headers.insert(name, value);
    }

    /// Set the response body as HTML.
    pub fn html(&mut self, body: impl Into<String>) {
        self.set_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        self.response.body = Some(body.into());
    }

    /// Set the response body as JSON.
    pub fn json(&mut self, value: &Value) {
        self.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.response.body = Some(value.to_string());
    }

    /// Redirect with 302 Found. Invalid header values are ignored.
    pub fn redirect(&mut self, location: &str) {
        if let Ok(value) = HeaderValue::from_str(location) {
            self.set_status(StatusCode::FOUND);
            self.set_header(LOCATION, value);
            self.response.body.get_or_insert_with(String::new);
        }
    }
}

/// Render data is always an object; `null` becomes `{}` and any other value
/// is kept under a `value` key.
pub(crate) fn into_object(data: Value) -> Map<String, Value> {
    match data {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Shallow merge: keys of `overlay` replace keys of `base`.
pub(crate) fn merge(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        base.insert(key, value);
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx() -> Context {
        let mut ctx = Context::new(Method::GET, "/users");
        ctx.route = Some(RouteInfo::new("users", "index"));
        ctx
    }

    #[test]
    fn test_render_defaults_to_convention_view_and_layout() {
        let mut ctx = ctx();
        ctx.render(json!({"title": "Users"}), None);
        assert_eq!(
            ctx.render_info(),
            Some(&RenderInfo {
                view: "users/index".to_string(),
                data: json!({"title": "Users"}).as_object().unwrap().clone(),
                layout: Some("layout/index".to_string()),
            })
        );
    }

    #[test]
    fn test_only_first_render_sets_layout() {
        let mut ctx = ctx();
        ctx.render(Value::Null, Some(RenderOptions::default().with_layout("layout/admin")));
        assert_eq!(ctx.render_info().unwrap().layout.as_deref(), Some("layout/admin"));

        ctx.render(Value::Null, Some(RenderOptions::view("users/list").with_layout("layout/other")));
        let info = ctx.render_info().unwrap();
        assert_eq!(info.view, "users/list");
        assert_eq!(info.layout.as_deref(), Some("layout/admin"));
        assert!(info.data.is_empty());
    }

    #[test]
    fn test_custom_default_layout() {
        let mut ctx = ctx().with_default_layout("layouts/app");
        ctx.render(json!({}), None);
        assert_eq!(ctx.render_info().unwrap().layout.as_deref(), Some("layouts/app"));
    }

    #[test]
    fn test_non_object_data_is_wrapped() {
        let mut ctx = ctx();
        ctx.render(json!([1, 2]), None);
        assert_eq!(ctx.render_info().unwrap().data.get("value"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_services_downcast() {
        let mut services = Services::new();
        services.insert("greeting", String::from("hello"));
        services.insert("count", 3usize);

        let mut ctx = ctx();
        ctx.set_services(services);
        assert_eq!(ctx.service::<String>("greeting").as_deref().map(String::as_str), Some("hello"));
        assert_eq!(ctx.service::<usize>("count").as_deref(), Some(&3));
        assert!(ctx.service::<usize>("greeting").is_none());
        assert!(ctx.service::<String>("missing").is_none());
        assert_eq!(ctx.services().names().collect::<Vec<_>>(), vec!["greeting", "count"]);
    }

    #[test]
    fn test_param_lookup_order() {
        let mut ctx = ctx();
        ctx.params.insert("id".to_string(), json!("from-query"));
        ctx.path_params.insert("id".to_string(), json!("from-path"));
        ctx.path_params.insert("slug".to_string(), json!("hello"));
        assert_eq!(ctx.param_str("id"), Some("from-query"));
        assert_eq!(ctx.param_str("slug"), Some("hello"));
        assert_eq!(ctx.param("nope"), None);
    }

    #[test]
    fn test_merge_overlay_wins() {
        let base = json!({"a": 1, "b": 1}).as_object().unwrap().clone();
        let overlay = json!({"b": 2, "c": 3}).as_object().unwrap().clone();
        assert_eq!(Value::Object(merge(base, overlay)), json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn test_response_helpers() {
        let mut ctx = ctx();
        ctx.json(&json!({"ok": true}));
        assert_eq!(ctx.response.body.as_deref(), Some(r#"{"ok":true}"#));
        assert_eq!(ctx.response.headers[CONTENT_TYPE], "application/json");

        ctx.redirect("/login");
        assert_eq!(ctx.response.status, StatusCode::FOUND);
        assert_eq!(ctx.response.headers[LOCATION], "/login");
    }
}
