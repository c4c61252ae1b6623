//! Two-phase view rendering.
//!
//! After an action ran, [`start`] renders the view it asked for, then wraps
//! the output in the layout. Templates can inline other actions through the
//! `render 'controller:action'` tag, which [`ActionPartials`] resolves by
//! running the action against the current request context.

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use crate::app::App;
use crate::context::{into_object, merge, Context, RouteInfo};
use crate::error::{Error, Result};
use crate::template::renderer::{PartialRenderer, Scope, VIEW_VAR};

/// Deepest allowed chain of nested `render` tags.
pub const MAX_PARTIAL_DEPTH: usize = 16;

/// Runs controller actions for `render` tags found while rendering.
pub struct ActionPartials<'c> {
    app: &'c App,
    ctx: &'c mut Context,
    depth: usize,
}

impl<'c> ActionPartials<'c> {
    pub fn new(app: &'c App, ctx: &'c mut Context) -> Self {
        Self { app, ctx, depth: 0 }
    }
}

impl PartialRenderer for ActionPartials<'_> {
    fn render_partial<'a>(
        &'a mut self,
        target: &'a str,
        data: Value,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            if self.depth >= MAX_PARTIAL_DEPTH {
                return Err(Error::template(format!(
                    "render '{}' nested deeper than {} levels",
                    target, MAX_PARTIAL_DEPTH
                )));
            }
            let route = parse_target(target);
            debug!(partial = %route.view_path(), depth = self.depth, "rendering partial");

            let saved_route = self.ctx.route.replace(route.clone());
            let saved_render = self.ctx.replace_render_info(None);

            let result = render_action(self.app, self.ctx, &route, data, self.depth + 1).await;

            self.ctx.route = saved_route;
            self.ctx.replace_render_info(saved_render);
            result
        })
    }
}

/// `controller:action`, or a bare `controller` meaning its `index` action.
fn parse_target(target: &str) -> RouteInfo {
    match target.split_once(':') {
        Some((controller, action)) => RouteInfo::new(controller.trim(), action.trim()),
        None => RouteInfo::new(target.trim(), "index"),
    }
}

async fn render_action(
    app: &App,
    ctx: &mut Context,
    route: &RouteInfo,
    data: Value,
    depth: usize,
) -> Result<String> {
    run_action(app, ctx, route).await?;

    // Data produced by the action wins over the caller's. The view is always
    // the action's own.
    let mut data = into_object(data);
    if let Some(info) = ctx.take_render_info() {
        data = merge(data, info.data);
    }

    try_render(app, ctx, &route.view_path(), data, depth).await
}

/// Invoke `controller#action` against `ctx`.
pub async fn run_action(app: &App, ctx: &mut Context, route: &RouteInfo) -> Result<()> {
    let action = app.registry().action(&route.controller, &route.action)?.clone();
    action.invoke(ctx).await
}

/// Render the view `name` with `data` layered over the request's `state`.
///
/// Every template also sees a `ctx` object describing the request.
pub async fn try_render(
    app: &App,
    ctx: &mut Context,
    name: &str,
    data: Map<String, Value>,
    depth: usize,
) -> Result<String> {
    let scope = Scope::new(render_vars(ctx, data));
    render_scope(app, ctx, name, &scope, depth).await
}

async fn render_scope(
    app: &App,
    ctx: &mut Context,
    name: &str,
    scope: &Scope,
    depth: usize,
) -> Result<String> {
    let mut partials = ActionPartials { app, ctx, depth };
    app.templates().render(name, scope, &mut partials).await
}

fn render_vars(ctx: &Context, data: Map<String, Value>) -> Map<String, Value> {
    let mut vars = merge(ctx.state.clone(), data);

    let (controller, action) = ctx
        .route
        .as_ref()
        .map(|r| (r.controller.as_str(), r.action.as_str()))
        .unwrap_or_default();
    let params = merge(ctx.path_params.clone(), ctx.params.clone());

    let mut request = Map::new();
    request.insert("controller".to_string(), Value::from(controller));
    request.insert("action".to_string(), Value::from(action));
    request.insert("method".to_string(), Value::from(ctx.method.as_str()));
    request.insert("path".to_string(), Value::from(ctx.path.as_str()));
    request.insert("params".to_string(), Value::Object(params));
    vars.insert("ctx".to_string(), Value::Object(request));
    vars
}

/// Render the requested view and its layout into the response body.
///
/// Does nothing when the action never called [`Context::render`].
pub async fn start(app: &App, ctx: &mut Context) -> Result<()> {
    let Some(info) = ctx.take_render_info() else {
        return Ok(());
    };
    let main_data = info.data.clone();

    let content = try_render(app, ctx, &info.view, info.data, 0).await?;

    let layout_data = run_layout_action(app, ctx).await?;
    let mut scope = Scope::new(render_vars(ctx, merge(layout_data, main_data)));
    scope.insert_safe(VIEW_VAR, content);

    let layout = info
        .layout
        .unwrap_or_else(|| app.settings().default_layout.clone());
    debug!(view = %info.view, layout = %layout, "rendering layout");

    let body = render_scope(app, ctx, &layout, &scope, 0).await?;
    ctx.html(body);
    Ok(())
}

/// Run the layout controller's `index` action, if registered, and return the
/// data it rendered with.
///
/// `ctx.route` still names the page being wrapped while the action runs.
async fn run_layout_action(app: &App, ctx: &mut Context) -> Result<Map<String, Value>> {
    let layout = RouteInfo::new(app.settings().layout_controller.as_str(), "index");
    if app.registry().action(&layout.controller, &layout.action).is_err() {
        return Ok(Map::new());
    }

    run_action(app, ctx, &layout).await?;

    Ok(ctx.take_render_info().map(|info| info.data).unwrap_or_default())
}
