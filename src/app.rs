//! Application bootstrap and request dispatch.

use std::path::Path;

use hyper::Method;
use tracing::{debug, info};

use crate::config::Settings;
use crate::context::{Context, RouteInfo, Services};
use crate::controller::ControllerRegistry;
use crate::error::Result;
use crate::render;
use crate::router::{RouteMatch, RouteTable};
use crate::serve::request::merge_params;
use crate::template::TemplateCache;

/// Everything a request needs, built once at startup and shared read-only.
pub struct App {
    settings: Settings,
    registry: ControllerRegistry,
    routes: RouteTable,
    templates: TemplateCache,
    services: Services,
}

impl App {
    /// Derive the route table and set up the template cache.
    pub fn new(settings: Settings, registry: ControllerRegistry) -> Result<Self> {
        let routes = RouteTable::build(&registry, &settings)?;
        let templates = TemplateCache::from_settings(&settings);
        info!(
            controllers = registry.len(),
            routes = routes.len(),
            views = %templates.views_dir().display(),
            "application ready"
        );
        Ok(Self {
            settings,
            registry,
            routes,
            templates,
            services: Services::new(),
        })
    }

    /// Load settings from `folder` and start the application.
    pub fn load(folder: &Path, registry: ControllerRegistry) -> Result<Self> {
        let settings = Settings::load(folder)?;
        Self::new(settings, registry)
    }

    /// Services injected into every request context.
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Fresh request context carrying the configured default layout.
    pub fn context(&self, method: Method, path: impl Into<String>) -> Context {
        Context::new(method, path).with_default_layout(self.settings.default_layout.clone())
    }

    /// Route `ctx` and run the matched action plus rendering.
    ///
    /// Returns `Ok(false)` when no route matches.
    pub async fn dispatch(&self, ctx: &mut Context) -> Result<bool> {
        let Some(RouteMatch { route, params }) = self.routes.find(&ctx.method, &ctx.path) else {
            debug!(method = %ctx.method, path = %ctx.path, "no route");
            return Ok(false);
        };

        ctx.params = merge_params(&ctx.query, ctx.body.as_ref());
        ctx.path_params = params;
        ctx.route = Some(RouteInfo::new(
            route.info.controller.as_str(),
            route.info.action.as_str(),
        ));
        ctx.set_services(self.services.clone());

        route.action.invoke(ctx).await?;
        render::start(self, ctx).await?;
        Ok(true)
    }
}
