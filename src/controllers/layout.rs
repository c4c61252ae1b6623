//! Supplies data for `views/layout/index.html` on every page.

use conductor::{ActionFuture, Context, Controller};
use serde_json::json;

pub fn controller() -> Controller {
    Controller::new("layout").action("index", "(ctx)", index)
}

fn index(ctx: &mut Context) -> ActionFuture<'_> {
    Box::pin(async move {
        let site_name = ctx
            .service::<String>("site_name")
            .map(|name| name.to_string())
            .unwrap_or_else(|| "Conductor".to_string());
        ctx.render(
            json!({
                "title": site_name,
                "site_name": site_name,
                "nav": [
                    {"href": "/", "label": "Home"},
                    {"href": "/users", "label": "Users"},
                    {"href": "/about", "label": "About"},
                ],
            }),
            None,
        );
        Ok(())
    })
}
