use conductor::{ActionFuture, Context, Controller, Error, RenderOptions};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;

pub const SERVICE: &str = "users";

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
}

/// In-memory user list shared across requests.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<Vec<User>>,
}

impl UserDirectory {
    pub fn seeded() -> Self {
        let users = [("Ada", "ada@example.com"), ("Linus", "linus@example.com")]
            .into_iter()
            .enumerate()
            .map(|(i, (name, email))| User {
                id: i as u64 + 1,
                name: name.to_string(),
                email: email.to_string(),
            })
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    pub async fn list(&self) -> Vec<User> {
        self.users.read().await.clone()
    }

    pub async fn find(&self, id: u64) -> Option<User> {
        self.users.read().await.iter().find(|u| u.id == id).cloned()
    }

    pub async fn add(&self, name: &str, email: &str) -> User {
        let mut users = self.users.write().await;
        let user = User {
            id: users.iter().map(|u| u.id).max().unwrap_or(0) + 1,
            name: name.to_string(),
            email: email.to_string(),
        };
        users.push(user.clone());
        user
    }
}

pub fn controller() -> Controller {
    Controller::new("users")
        .action("index", "(ctx, $method = 'get')", index)
        .action("new", "(ctx, $url = 'GET /users/new')", new)
        .action("show", "(ctx, $url = 'GET /users/:id')", show)
        .action("create", "(ctx, $url = '/users', $method = 'post')", create)
        .action("_card", "(ctx)", card)
}

fn directory(ctx: &Context) -> Result<std::sync::Arc<UserDirectory>, Error> {
    ctx.service::<UserDirectory>(SERVICE)
        .ok_or_else(|| Error::action("user directory service is not configured"))
}

fn index(ctx: &mut Context) -> ActionFuture<'_> {
    Box::pin(async move {
        let users = directory(ctx)?.list().await;
        ctx.render(json!({ "title": "Users", "users": users }), None);
        Ok(())
    })
}

fn new(ctx: &mut Context) -> ActionFuture<'_> {
    Box::pin(async move {
        ctx.render(
            json!({ "title": "New user" }),
            Some(RenderOptions::view("users/form")),
        );
        Ok(())
    })
}

fn show(ctx: &mut Context) -> ActionFuture<'_> {
    Box::pin(async move {
        let id = ctx
            .param_str("id")
            .and_then(|id| id.parse::<u64>().ok())
            .ok_or_else(|| Error::action("user id must be a number"))?;
        let Some(user) = directory(ctx)?.find(id).await else {
            ctx.set_status(hyper::StatusCode::NOT_FOUND);
            ctx.render(
                json!({ "title": "Not found", "id": id }),
                Some(RenderOptions::view("users/missing")),
            );
            return Ok(());
        };
        ctx.render(json!({ "title": user.name.clone(), "user": user }), None);
        Ok(())
    })
}

fn create(ctx: &mut Context) -> ActionFuture<'_> {
    Box::pin(async move {
        let name = ctx.param_str("name").unwrap_or_default().trim().to_string();
        let email = ctx.param_str("email").unwrap_or_default().trim().to_string();
        if name.is_empty() {
            ctx.set_status(hyper::StatusCode::UNPROCESSABLE_ENTITY);
            ctx.render(
                json!({ "title": "New user", "error": "Name is required", "email": email }),
                Some(RenderOptions::view("users/form")),
            );
            return Ok(());
        }

        let user = directory(ctx)?.add(&name, &email).await;
        ctx.redirect(&format!("/users/{}", user.id));
        Ok(())
    })
}

/// Helper rendered from templates with `<%= render 'users:_card', user %>`.
fn card(ctx: &mut Context) -> ActionFuture<'_> {
    Box::pin(async move {
        let count = directory(ctx)?.list().await.len();
        ctx.render(json!({ "total": count }), None);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_assigns_ids() {
        let directory = UserDirectory::seeded();
        let user = directory.add("Grace", "grace@example.com").await;
        assert_eq!(user.id, 3);
        assert_eq!(directory.find(3).await.map(|u| u.name), Some("Grace".to_string()));
        assert!(directory.find(9).await.is_none());
    }
}
