//! Template renderer that executes template AST with a data scope.
//!
//! Evaluates pre-compiled expressions against `serde_json` values. Rendering
//! is async because the `render` tag hands control back to the application
//! through a [`PartialRenderer`], which may run controller actions.

use std::fmt::Write;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::template::parser::{CompareOp, Expr, TemplateNode};

/// Variable a layout receives the main view's output under.
pub const VIEW_VAR: &str = "view";

/// Resolves `render 'controller:action'` tags.
pub trait PartialRenderer: Send {
    /// Render `target` with the caller-supplied `data` and return raw HTML.
    fn render_partial<'a>(&'a mut self, target: &'a str, data: Value)
        -> BoxFuture<'a, Result<String>>;
}

/// Partial renderer for contexts where the `render` tag is not available.
pub struct NoPartials;

impl PartialRenderer for NoPartials {
    fn render_partial<'a>(
        &'a mut self,
        target: &'a str,
        _data: Value,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            Err(Error::template(format!(
                "Partial rendering not available for '{}'",
                target
            )))
        })
    }
}

/// Engine switches that change how output is produced.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Escape `<%= %>` output.
    pub autoescape: bool,
    /// Fail on lookups of undefined variables instead of rendering nothing.
    pub throw_on_undefined: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            autoescape: true,
            throw_on_undefined: false,
        }
    }
}

/// Variables visible to a template, plus the names whose string values are
/// already HTML and must never be escaped.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: Map<String, Value>,
    safe: Vec<String>,
}

impl Scope {
    pub fn new(vars: Map<String, Value>) -> Self {
        Self {
            vars,
            safe: Vec::new(),
        }
    }

    /// Build a scope from a JSON object. Non-object values give an empty scope.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(vars) => Self::new(vars),
            _ => Self::default(),
        }
    }

    /// Insert a variable whose content is trusted HTML.
    pub fn insert_safe(&mut self, name: &str, html: String) {
        self.vars.insert(name.to_string(), Value::String(html));
        if !self.is_safe(name) {
            self.safe.push(name.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn is_safe(&self, name: &str) -> bool {
        self.safe.iter().any(|s| s == name)
    }

    /// Copy of this scope with one extra variable; shadowing drops safety.
    fn with_variable(&self, name: &str, value: Value) -> Scope {
        let mut scope = self.clone();
        scope.vars.insert(name.to_string(), value);
        scope.safe.retain(|s| s != name);
        scope
    }
}

/// Render a template AST into `out`.
///
/// `path` is only used to decorate errors with the template location.
pub fn render_nodes<'a, 'p: 'a>(
    nodes: &'a [TemplateNode],
    scope: &'a Scope,
    options: EngineOptions,
    partials: &'a mut (dyn PartialRenderer + 'p),
    path: &'a str,
    out: &'a mut String,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        for node in nodes {
            render_node(node, scope, options, &mut *partials, path, out)
                .await
                .map_err(|e| e.at(path, node.line()))?;
        }
        Ok(())
    })
}

async fn render_node(
    node: &TemplateNode,
    scope: &Scope,
    options: EngineOptions,
    partials: &mut (dyn PartialRenderer + '_),
    path: &str,
    out: &mut String,
) -> Result<()> {
    match node {
        TemplateNode::Literal(s) => out.push_str(s),
        TemplateNode::Output { expr, escaped, .. } => {
            let value = evaluate_expr(expr, scope, options)?;
            let trusted = matches!(expr, Expr::Var(name) if scope.is_safe(name));
            write_value_to_output(&value, *escaped && options.autoescape && !trusted, out);
        }
        TemplateNode::If {
            condition,
            body,
            else_body,
            ..
        } => {
            if is_truthy(&evaluate_expr(condition, scope, options)?) {
                render_nodes(body, scope, options, partials, path, out).await?;
            } else if let Some(else_nodes) = else_body {
                render_nodes(else_nodes, scope, options, partials, path, out).await?;
            }
        }
        TemplateNode::For {
            var,
            index_var,
            iterable,
            body,
            ..
        } => match evaluate_expr(iterable, scope, options)? {
            Value::Array(items) => {
                for (i, item) in items.into_iter().enumerate() {
                    let mut loop_scope = scope.with_variable(var, item);
                    if let Some(idx_var) = index_var {
                        loop_scope = loop_scope.with_variable(idx_var, Value::from(i));
                    }
                    render_nodes(body, &loop_scope, options, &mut *partials, path, out).await?;
                }
            }
            Value::Object(map) => {
                // Iterate over object entries as [key, value] pairs
                for (i, (k, v)) in map.into_iter().enumerate() {
                    let pair = Value::Array(vec![Value::String(k), v]);
                    let mut loop_scope = scope.with_variable(var, pair);
                    if let Some(idx_var) = index_var {
                        loop_scope = loop_scope.with_variable(idx_var, Value::from(i));
                    }
                    render_nodes(body, &loop_scope, options, &mut *partials, path, out).await?;
                }
            }
            Value::Null if !options.throw_on_undefined => {}
            other => {
                return Err(Error::template(format!(
                    "Cannot iterate over {}: expected array or object",
                    type_name(&other)
                )));
            }
        },
        TemplateNode::Yield => match scope.get(VIEW_VAR) {
            Some(Value::String(content)) => out.push_str(content),
            _ => {
                return Err(Error::template(
                    "yield encountered outside of layout context",
                ))
            }
        },
        TemplateNode::Partial { target, data, .. } => {
            let data = match data {
                Some(expr) => match evaluate_expr(expr, scope, options)? {
                    Value::Null => Value::Object(Map::new()),
                    obj @ Value::Object(_) => obj,
                    other => {
                        return Err(Error::template(format!(
                            "Data for render '{}' must be an object, got {}",
                            target,
                            type_name(&other)
                        )))
                    }
                },
                None => Value::Object(Map::new()),
            };
            // Partial output is inlined verbatim, never escaped.
            let html = partials.render_partial(target, data).await?;
            out.push_str(&html);
        }
    }
    Ok(())
}

/// Evaluate a pre-compiled expression against the scope.
fn evaluate_expr(expr: &Expr, scope: &Scope, options: EngineOptions) -> Result<Value> {
    match expr {
        Expr::StringLit(s) => Ok(Value::String(s.clone())),
        Expr::IntLit(n) => Ok(Value::from(*n)),
        Expr::FloatLit(n) => Ok(Value::from(*n)),
        Expr::BoolLit(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Json(value) => Ok(value.clone()),

        Expr::Var(name) => match scope.get(name) {
            Some(value) => Ok(value.clone()),
            None if options.throw_on_undefined => Err(Error::template(format!(
                "Undefined variable '{}'",
                name
            ))),
            None => Ok(Value::Null),
        },

        Expr::Field(base, field) => {
            let base_value = evaluate_expr(base, scope, options)?;
            lookup(&base_value, &Value::String(field.clone()), options)
        }

        Expr::Index(base, key) => {
            let base_value = evaluate_expr(base, scope, options)?;
            let key_value = evaluate_expr(key, scope, options)?;
            lookup(&base_value, &key_value, options)
        }

        Expr::Compare(left, op, right) => {
            let left_val = evaluate_expr(left, scope, options)?;
            let right_val = evaluate_expr(right, scope, options)?;
            let result = match op {
                CompareOp::Eq => values_equal(&left_val, &right_val),
                CompareOp::Ne => !values_equal(&left_val, &right_val),
                CompareOp::Gt => compare_values(&left_val, &right_val)?.is_gt(),
                CompareOp::Lt => compare_values(&left_val, &right_val)?.is_lt(),
                CompareOp::Ge => compare_values(&left_val, &right_val)?.is_ge(),
                CompareOp::Le => compare_values(&left_val, &right_val)?.is_le(),
            };
            Ok(Value::Bool(result))
        }

        Expr::And(left, right) => {
            let left_val = evaluate_expr(left, scope, options)?;
            if !is_truthy(&left_val) {
                return Ok(Value::Bool(false));
            }
            let right_val = evaluate_expr(right, scope, options)?;
            Ok(Value::Bool(is_truthy(&right_val)))
        }

        Expr::Or(left, right) => {
            let left_val = evaluate_expr(left, scope, options)?;
            if is_truthy(&left_val) {
                return Ok(Value::Bool(true));
            }
            let right_val = evaluate_expr(right, scope, options)?;
            Ok(Value::Bool(is_truthy(&right_val)))
        }

        Expr::Not(inner) => {
            let inner_val = evaluate_expr(inner, scope, options)?;
            Ok(Value::Bool(!is_truthy(&inner_val)))
        }

        Expr::Method(base, method) => {
            let base_value = evaluate_expr(base, scope, options)?;
            match &base_value {
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::String(s) => Ok(Value::from(s.chars().count())),
                Value::Object(map) => Ok(Value::from(map.len())),
                Value::Null if !options.throw_on_undefined => Ok(Value::from(0)),
                _ => Err(Error::template(format!(
                    "Cannot call method '{}' on {}",
                    method,
                    type_name(&base_value)
                ))),
            }
        }
    }
}

/// Index into a value (array or object access)
fn lookup(base: &Value, key: &Value, options: EngineOptions) -> Result<Value> {
    let found = match (base, key) {
        (Value::Object(map), Value::String(k)) => map.get(k).cloned(),
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned(),
        (Value::Null, _) if !options.throw_on_undefined => return Ok(Value::Null),
        _ => {
            return Err(Error::template(format!(
                "Cannot index {} with {}",
                type_name(base),
                type_name(key)
            )))
        }
    };

    match found {
        Some(value) => Ok(value),
        None if options.throw_on_undefined => Err(Error::template(format!(
            "Undefined key {} on {}",
            key,
            type_name(base)
        ))),
        None => Ok(Value::Null),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare_values(left: &Value, right: &Value) -> Result<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b)
                .ok_or_else(|| Error::template("Cannot compare NaN"))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(Error::template(format!(
            "Cannot compare {} with {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

/// Write a value to the output buffer, applying HTML escaping if needed.
fn write_value_to_output(value: &Value, escaped: bool, output: &mut String) {
    match value {
        Value::String(s) => {
            if escaped {
                output.push_str(&html_escape(s));
            } else {
                output.push_str(s);
            }
        }
        Value::Number(n) => {
            let _ = write!(output, "{}", n);
        }
        Value::Bool(b) => {
            let _ = write!(output, "{}", b);
        }
        Value::Null => {}
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    output.push_str(", ");
                }
                write_value_to_output(item, escaped, output);
            }
        }
        Value::Object(_) => {
            let json = value.to_string();
            if escaped {
                output.push_str(&html_escape(&json));
            } else {
                output.push_str(&json);
            }
        }
    }
}

/// Escape HTML special characters.
pub fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#x27;"),
            _ => result.push(c),
        }
    }
    result
}

/// Check if a value is truthy
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parser::parse_template;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Echoes the partial target and its data so tests can see what was passed.
    struct EchoPartials {
        calls: Vec<String>,
    }

    impl PartialRenderer for EchoPartials {
        fn render_partial<'a>(
            &'a mut self,
            target: &'a str,
            data: Value,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                self.calls.push(target.to_string());
                Ok(format!("<b data-target=\"{}\">{}</b>", target, data))
            })
        }
    }

    async fn render_with(source: &str, data: Value, options: EngineOptions) -> Result<String> {
        let nodes = parse_template(source).map_err(Error::template)?;
        let scope = Scope::from_value(data);
        let mut out = String::new();
        render_nodes(&nodes, &scope, options, &mut NoPartials, "test.html", &mut out).await?;
        Ok(out)
    }

    async fn render(source: &str, data: Value) -> String {
        render_with(source, data, EngineOptions::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_escaped_and_raw_output() {
        let data = json!({"html": "<i>x</i>"});
        assert_eq!(render("<%= html %>|<%- html %>", data).await, "&lt;i&gt;x&lt;/i&gt;|<i>x</i>");
    }

    #[tokio::test]
    async fn test_autoescape_off() {
        let options = EngineOptions {
            autoescape: false,
            ..EngineOptions::default()
        };
        let out = render_with("<%= html %>", json!({"html": "<p>"}), options).await.unwrap();
        assert_eq!(out, "<p>");
    }

    #[tokio::test]
    async fn test_if_else_and_comparisons() {
        let source = "<% if count > 2 && name == 'ann' %>many<% else %>few<% end %>";
        assert_eq!(render(source, json!({"count": 3, "name": "ann"})).await, "many");
        assert_eq!(render(source, json!({"count": 3.0, "name": "bob"})).await, "few");
    }

    #[tokio::test]
    async fn test_for_over_array_and_object() {
        let data = json!({"items": ["a", "b"], "meta": {"k": 1}});
        assert_eq!(
            render("<% for x, i in items %><%= i %>=<%= x %>;<% end %>", data.clone()).await,
            "0=a;1=b;"
        );
        assert_eq!(
            render("<% for pair in meta %><%= pair[0] %>:<%= pair[1] %><% end %>", data).await,
            "k:1"
        );
    }

    #[tokio::test]
    async fn test_nested_lookup_and_length() {
        let data = json!({"user": {"posts": [{"title": "First"}]}});
        assert_eq!(
            render("<%= user.posts[0].title %> (<%= user.posts.length %>)", data).await,
            "First (1)"
        );
    }

    #[tokio::test]
    async fn test_undefined_renders_empty() {
        assert_eq!(render("[<%= missing.deep %>]", json!({})).await, "[]");
    }

    #[tokio::test]
    async fn test_throw_on_undefined() {
        let options = EngineOptions {
            throw_on_undefined: true,
            ..EngineOptions::default()
        };
        let err = render_with("a\n<%= missing %>", json!({}), options).await.unwrap_err();
        assert_eq!(err.to_string(), "Undefined variable 'missing' at test.html:2");
    }

    #[tokio::test]
    async fn test_safe_variable_is_not_escaped() {
        let nodes = parse_template("<main><%= view %></main><%= yield %>").unwrap();
        let mut scope = Scope::default();
        scope.insert_safe(VIEW_VAR, "<h1>Hi</h1>".to_string());
        let mut out = String::new();
        render_nodes(&nodes, &scope, EngineOptions::default(), &mut NoPartials, "l.html", &mut out)
            .await
            .unwrap();
        assert_eq!(out, "<main><h1>Hi</h1></main><h1>Hi</h1>");
    }

    #[tokio::test]
    async fn test_shadowed_safe_variable_is_escaped() {
        let nodes = parse_template("<% for view in items %><%= view %><% end %>").unwrap();
        let mut scope = Scope::new(json!({"items": ["<b>"]}).as_object().unwrap().clone());
        scope.insert_safe(VIEW_VAR, "ignored".to_string());
        let mut out = String::new();
        render_nodes(&nodes, &scope, EngineOptions::default(), &mut NoPartials, "l.html", &mut out)
            .await
            .unwrap();
        assert_eq!(out, "&lt;b&gt;");
    }

    #[tokio::test]
    async fn test_yield_outside_layout() {
        let err = render_with("<%= yield %>", json!({}), EngineOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("yield encountered outside of layout context"));
    }

    #[tokio::test]
    async fn test_partial_output_is_never_escaped() {
        let nodes =
            parse_template(r#"<%= render 'users:card', {"id": 1} %><%= render 'menu' %>"#).unwrap();
        let mut partials = EchoPartials { calls: Vec::new() };
        let mut out = String::new();
        render_nodes(
            &nodes,
            &Scope::default(),
            EngineOptions::default(),
            &mut partials,
            "p.html",
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            r#"<b data-target="users:card">{"id":1}</b><b data-target="menu">{}</b>"#
        );
        assert_eq!(partials.calls, vec!["users:card", "menu"]);
    }

    #[tokio::test]
    async fn test_partial_without_renderer_fails() {
        let err = render_with("<%= render 'menu' %>", json!({}), EngineOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Partial rendering not available for 'menu' at test.html:1"
        );
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<a href=\"x\">&'</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;&lt;/a&gt;");
    }

    #[test]
    fn test_truthiness() {
        for falsy in [json!(false), json!(null), json!(0), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&falsy), "{} should be falsy", falsy);
        }
        for truthy in [json!(true), json!(1), json!("a"), json!([0]), json!({"a": 1})] {
            assert!(is_truthy(&truthy), "{} should be truthy", truthy);
        }
    }
}
