use conductor::{ActionFuture, Context, Controller};
use serde_json::json;

pub fn controller() -> Controller {
    Controller::new("index")
        .action("index", "(ctx)", index)
        .action("about", "(ctx, $url = 'GET /about')", about)
}

fn index(ctx: &mut Context) -> ActionFuture<'_> {
    Box::pin(async move {
        ctx.render(
            json!({
                "title": "Welcome",
                "intro": "Routes come from controller names; layouts wrap every page.",
            }),
            None,
        );
        Ok(())
    })
}

fn about(ctx: &mut Context) -> ActionFuture<'_> {
    Box::pin(async move {
        ctx.state.insert("section".to_string(), json!("about"));
        ctx.render(json!({ "title": "About" }), None);
        Ok(())
    })
}
