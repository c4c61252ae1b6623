//! Snippets shared across views through the `render` tag.

use conductor::{ActionFuture, Context, Controller};

pub fn controller() -> Controller {
    Controller::new("shared").action("_notice", "(ctx)", notice)
}

/// Renders `shared/_notice` with whatever data the caller passed.
fn notice(_ctx: &mut Context) -> ActionFuture<'_> {
    Box::pin(async { Ok(()) })
}
