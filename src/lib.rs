//! Conductor: convention routing and two-phase view rendering for small MVC
//! web applications.
//!
//! Controllers are registered in code. Each action gets a route from the
//! hints in its declared signature or from its name, and the views it
//! renders are wrapped in a layout. Templates can inline other actions with
//! `<%= render 'controller:action' %>`.

#![allow(clippy::new_without_default)]
#![allow(clippy::type_complexity)]

pub mod app;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod render;
pub mod router;
pub mod serve;
pub mod template;

pub use app::App;
pub use config::Settings;
pub use context::{Context, RenderOptions, RouteInfo, Services};
pub use controller::{Action, ActionFuture, Controller, ControllerRegistry};
pub use error::{Error, Location, Result};
