//! Controllers and their actions.
//!
//! A controller is a named set of async actions. Each action carries the
//! text of its declared signature, which the router reads for routing hints:
//!
//! ```ignore
//! fn show(ctx: &mut Context) -> ActionFuture<'_> {
//!     Box::pin(async move {
//!         ctx.render(json!({ "id": ctx.param("id") }), None);
//!         Ok(())
//!     })
//! }
//!
//! Controller::new("users")
//!     .action("index", "(ctx)", index)
//!     .action("show", "(ctx, $url = 'GET /users/:id')", show)
//! ```

use std::sync::Arc;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};

/// Future returned by an action.
pub type ActionFuture<'a> = BoxFuture<'a, Result<()>>;

/// Type-erased action handler.
pub type ActionHandler = Arc<dyn for<'a> Fn(&'a mut Context) -> ActionFuture<'a> + Send + Sync>;

/// A single request-handling function of a controller.
#[derive(Clone)]
pub struct Action {
    name: String,
    signature: String,
    handler: ActionHandler,
}

impl Action {
    pub fn new<F>(name: impl Into<String>, signature: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> ActionFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature: signature.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter list, e.g. `(ctx, $url = '/')`.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Run the action against a request context.
    pub fn invoke<'a>(&self, ctx: &'a mut Context) -> ActionFuture<'a> {
        (self.handler)(ctx)
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// A named collection of actions, kept in declaration order.
#[derive(Debug, Clone)]
pub struct Controller {
    name: String,
    actions: IndexMap<String, Action>,
}

impl Controller {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: IndexMap::new(),
        }
    }

    /// Add an action. Redeclaring a name replaces the earlier action in place.
    pub fn action<F>(mut self, name: &str, signature: &str, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> ActionFuture<'a> + Send + Sync + 'static,
    {
        self.actions
            .insert(name.to_string(), Action::new(name, signature, handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, action: &str) -> Option<&Action> {
        self.actions.get(action)
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }
}

/// All controllers of an application, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ControllerRegistry {
    controllers: IndexMap<String, Controller>,
}

impl ControllerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_controllers(controllers: impl IntoIterator<Item = Controller>) -> Result<Self> {
        let mut registry = Self::new();
        for controller in controllers {
            registry.register(controller)?;
        }
        Ok(registry)
    }

    /// Register a controller. Names must be unique.
    pub fn register(&mut self, controller: Controller) -> Result<()> {
        if self.controllers.contains_key(controller.name()) {
            return Err(Error::DuplicateController(controller.name().to_string()));
        }
        debug!(
            controller = controller.name(),
            actions = ?controller.actions().map(Action::name).collect::<Vec<_>>(),
            "registered controller"
        );
        self.controllers
            .insert(controller.name().to_string(), controller);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Controller> {
        self.controllers.get(name)
    }

    /// Look up `controller#action`.
    pub fn action(&self, controller: &str, action: &str) -> Result<&Action> {
        let found = self
            .controllers
            .get(controller)
            .ok_or_else(|| Error::UnknownController(controller.to_string()))?;
        found.get(action).ok_or_else(|| Error::UnknownAction {
            controller: controller.to_string(),
            action: action.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Controller> {
        self.controllers.values()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;
    use serde_json::json;

    fn mark(ctx: &mut Context) -> ActionFuture<'_> {
        Box::pin(async move {
            ctx.state.insert("marked".to_string(), json!(true));
            Ok(())
        })
    }

    fn fail(_ctx: &mut Context) -> ActionFuture<'_> {
        Box::pin(async move { Err(Error::action("nope")) })
    }

    #[tokio::test]
    async fn test_invoke_action() {
        let controller = Controller::new("users").action("index", "(ctx)", mark);
        let mut ctx = Context::new(Method::GET, "/users");
        controller.get("index").unwrap().invoke(&mut ctx).await.unwrap();
        assert_eq!(ctx.state.get("marked"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_action_error_propagates() {
        let registry =
            ControllerRegistry::from_controllers([Controller::new("a").action("x", "", fail)])
                .unwrap();
        let mut ctx = Context::new(Method::GET, "/a/x");
        let err = registry.action("a", "x").unwrap().invoke(&mut ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "Action failed: nope");
    }

    #[test]
    fn test_declaration_order_is_kept() {
        let controller = Controller::new("users")
            .action("show", "", mark)
            .action("index", "", mark)
            .action("_card", "", mark);
        let names: Vec<_> = controller.actions().map(Action::name).collect();
        assert_eq!(names, vec!["show", "index", "_card"]);
        assert!(controller.get("_card").is_some());
    }

    #[test]
    fn test_duplicate_controller_rejected() {
        let err = ControllerRegistry::from_controllers([
            Controller::new("users"),
            Controller::new("users"),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateController(name) if name == "users"));
    }

    #[test]
    fn test_unknown_lookups() {
        let registry =
            ControllerRegistry::from_controllers([Controller::new("users").action("index", "", mark)])
                .unwrap();
        assert!(matches!(registry.action("posts", "index"), Err(Error::UnknownController(_))));
        assert!(matches!(
            registry.action("users", "show"),
            Err(Error::UnknownAction { .. })
        ));
    }
}
