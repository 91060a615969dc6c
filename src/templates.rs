use regex::{Captures, Regex};
use spin_sdk::http::Response;
use rust_embed::RustEmbed;

use crate::config::AVATAR_SIZE;
use crate::core::db::KvStore;
use crate::core::errors::ApiError;
use crate::core::helpers::avatar_url;
use crate::follow::{get_followers, get_followings};
use crate::posts::get_user_post_refs;
use crate::users::find_user_by_username;

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

/// Loads an embedded template and substitutes each placeholder in one pass,
/// so substituted values are never scanned again.
/// Values are HTML-escaped when the template is an `.html` file.
pub fn render_template(name: &str, vars: &[(&str, &str)]) -> anyhow::Result<String> {
    let template = Templates::get(name)
        .ok_or_else(|| anyhow::anyhow!("Template {} not found", name))?
        .data
        .to_vec();

    let template = String::from_utf8(template)?;
    if vars.is_empty() {
        return Ok(template);
    }
    let escape = name.ends_with(".html");

    // Longest first so a placeholder never matches as the prefix of another.
    let mut placeholders: Vec<&str> = vars.iter().map(|(placeholder, _)| *placeholder).collect();
    placeholders.sort_by_key(|p| std::cmp::Reverse(p.len()));
    let pattern = placeholders
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    let placeholder_regex = Regex::new(&pattern)?;

    let rendered = placeholder_regex.replace_all(&template, |caps: &Captures| {
        let value = vars
            .iter()
            .find(|(placeholder, _)| *placeholder == &caps[0])
            .map(|(_, value)| *value)
            .unwrap_or_default();
        if escape {
            html_escape::encode_text(value).into_owned()
        } else {
            value.to_string()
        }
    });

    Ok(rendered.into_owned())
}

pub fn render_user_profile(store: &dyn KvStore, path: &str) -> anyhow::Result<Response> {
    let username = path.trim_start_matches('/');

    let user = match find_user_by_username(store, username)? {
        Some(user) => user,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    let followers = get_followers(store, &user.id)?.len().to_string();
    let following = get_followings(store, &user.id)?.len().to_string();
    let posts = get_user_post_refs(store, &user.id)?.len().to_string();
    let avatar = avatar_url(&user.email, AVATAR_SIZE);
    let last_seen = user
        .last_seen
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_default();

    let html = render_template(
        "profile.html",
        &[
            ("PROFILE_USERNAME", user.username.as_str()),
            ("PROFILE_USER_ID", user.id.as_str()),
            ("PROFILE_AVATAR", avatar.as_str()),
            ("PROFILE_ABOUT", user.about_me.as_deref().unwrap_or_default()),
            ("PROFILE_LAST_SEEN", last_seen.as_str()),
            ("PROFILE_FOLLOWERS", followers.as_str()),
            ("PROFILE_FOLLOWING", following.as_str()),
            ("PROFILE_POSTS", posts.as_str()),
        ],
    )?;

    Ok(Response::builder()
        .status(200)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.into_bytes())
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;
    use crate::users::insert_user;

    #[test]
    fn html_templates_escape_values() {
        let html = render_template(
            "email/reset_password.html",
            &[("RESET_USERNAME", "<script>"), ("RESET_TOKEN", "t"), ("RESET_EXPIRES_MINUTES", "10")],
        )
        .unwrap();
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn text_templates_are_verbatim() {
        let text = render_template(
            "email/reset_password.txt",
            &[("RESET_USERNAME", "a&b"), ("RESET_TOKEN", "t"), ("RESET_EXPIRES_MINUTES", "10")],
        )
        .unwrap();
        assert!(text.contains("a&b"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        assert!(render_template("missing.html", &[]).is_err());
    }

    #[test]
    fn profile_page_renders_user() {
        let store = MemoryStore::new();
        insert_user(&store, "susan", "susan@example.com", "pw1", Some("I <3 Rust".to_string())).unwrap();

        let resp = render_user_profile(&store, "/susan").unwrap();
        assert_eq!(*resp.status(), 200);

        let html = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(html.contains("susan"));
        assert!(html.contains("I &lt;3 Rust"));
        assert!(!html.contains("PROFILE_"));

        let missing = render_user_profile(&store, "/nobody").unwrap();
        assert_eq!(*missing.status(), 404);
    }

    #[test]
    fn placeholder_names_in_values_are_kept() {
        let store = MemoryStore::new();
        let about = "my id is PROFILE_USER_ID and PROFILE_FOLLOWERS";
        insert_user(&store, "susan", "susan@example.com", "pw1", Some(about.to_string())).unwrap();

        let resp = render_user_profile(&store, "/susan").unwrap();
        let html = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(html.contains(about));
    }

    #[test]
    fn values_are_not_rendered_twice() {
        let text = render_template(
            "email/reset_password.txt",
            &[("RESET_USERNAME", "RESET_TOKEN"), ("RESET_TOKEN", "t0k3n"), ("RESET_EXPIRES_MINUTES", "10")],
        )
        .unwrap();
        assert!(text.contains("RESET_TOKEN"));
        assert!(text.contains("t0k3n"));
    }
}
