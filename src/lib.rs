use spin_sdk::http::{Method, Request, Response};
use tracing::error;

pub mod auth;
pub mod config;
pub mod core;
pub mod feed;
pub mod follow;
pub mod mail;
pub mod models;
pub mod posts;
pub mod templates;
pub mod users;

use crate::config::Config;
use crate::core::db::KvStore;
use crate::core::errors::ApiError;
use crate::mail::{notify_admins, MailTransport};

/// Collaborators a request handler works with.
pub struct AppContext<'a> {
    pub store: &'a dyn KvStore,
    pub mailer: &'a dyn MailTransport,
    pub config: &'a Config,
}

fn method_name(method: &Method) -> &'static str {
    match method {
        Method::Get => "GET",
        Method::Post => "POST",
        Method::Put => "PUT",
        Method::Delete => "DELETE",
        Method::Head => "HEAD",
        Method::Options => "OPTIONS",
        Method::Patch => "PATCH",
        _ => "OTHER",
    }
}

/// Dispatches a request to its handler. Handler failures become a 500 and
/// are reported to the admins.
pub fn route(ctx: &AppContext, req: Request) -> Response {
    let path = req.path().to_string();
    let method = method_name(req.method());

    let result = match (method, path.as_str()) {
        ("POST", "/users") => users::create_user(ctx, &req),
        ("POST", "/login") => auth::login_user(ctx, &req),
        ("POST", "/logout") => auth::logout_user(ctx, &req),
        ("POST", "/reset_password_request") => auth::request_password_reset(ctx, &req),
        ("POST", "/reset_password") => auth::reset_password(ctx, &req),
        ("GET", "/profile") => users::get_profile(ctx, &req),
        ("PUT", "/profile") => users::update_profile(ctx, &req),
        ("POST", "/posts") => posts::create_post(ctx, &req),
        ("GET", "/posts") => posts::list_posts(ctx, &req),
        ("GET", "/feed") => posts::get_feed(ctx, &req),
        ("POST", "/follow") => follow::handle_follow(ctx, &req),
        ("POST", "/unfollow") => follow::handle_unfollow(ctx, &req),
        ("DELETE", p) if p.starts_with("/posts/") => posts::delete_post(ctx, &req),
        ("GET", p) if p.starts_with("/followings/") => follow::get_followings_list(ctx, p),
        ("GET", p) if p.starts_with("/followers/") => follow::get_followers_list(ctx, p),
        ("GET", p) if p.starts_with("/users/") && p.len() > 7 => users::get_user_details(ctx, &req),
        ("GET", p) if !p.contains('.') && p.len() > 1 && p != "/index" => {
            templates::render_user_profile(ctx.store, p)
        }
        ("GET", p) => crate::core::static_server::serve_static(p),
        _ => Ok(ApiError::NotFound("No route found".to_string()).into()),
    };

    match result {
        Ok(resp) => resp,
        Err(e) => {
            error!("{} {} failed: {:#}", method, path, e);
            notify_admins(ctx.mailer, ctx.config, method, &path, &format!("{e:#}"));
            ApiError::InternalError("Internal server error".to_string()).into()
        }
    }
}

#[cfg(target_arch = "wasm32")]
mod component {
    use spin_sdk::http::{IntoResponse, Request};
    use spin_sdk::http_component;
    use spin_sdk::key_value::Store;

    use crate::config::Config;
    use crate::core::db::seed_demo_data;
    use crate::mail::LogTransport;
    use crate::AppContext;

    #[http_component]
    fn handle(req: Request) -> anyhow::Result<impl IntoResponse> {
        let store = Store::open_default()
            .map_err(|e| anyhow::anyhow!("KV store must exist: {e:?}"))?;
        let config = Config::load();
        if config.seed_demo_data {
            seed_demo_data(&store)?;
        }

        let ctx = AppContext {
            store: &store,
            mailer: &LogTransport,
            config: &config,
        };
        Ok(crate::route(&ctx, req))
    }
}
