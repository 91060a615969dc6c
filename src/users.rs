use std::sync::OnceLock;

use regex::Regex;
use spin_sdk::http::{Request, Response};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{issue_token, revoke_user_tokens, validate_token};
use crate::config::*;
use crate::core::db::{KvStore, StoreExt};
use crate::core::errors::ApiError;
use crate::core::helpers::{
    avatar_url, hash_password, json_body, json_response, now, sanitize_text, validate_email,
    verify_password,
};
use crate::core::query_params::{get_page, parse_query_params};
use crate::follow::{get_followers, get_followings};
use crate::models::models::User;
use crate::posts::user_posts_page;
use crate::AppContext;

pub fn get_user(store: &dyn KvStore, user_id: &str) -> anyhow::Result<Option<User>> {
    store.get_json(&user_key(user_id))
}

pub fn find_user_by_username(store: &dyn KvStore, username: &str) -> anyhow::Result<Option<User>> {
    match store.get_json::<String>(&username_key(username))? {
        Some(id) => get_user(store, &id),
        None => Ok(None),
    }
}

pub fn find_user_by_email(store: &dyn KvStore, email: &str) -> anyhow::Result<Option<User>> {
    match store.get_json::<String>(&email_key(email))? {
        Some(id) => get_user(store, &id),
        None => Ok(None),
    }
}

/// Stores a new account and its username/email index entries.
/// Uniqueness is the caller's check.
pub fn insert_user(
    store: &dyn KvStore,
    username: &str,
    email: &str,
    password: &str,
    about_me: Option<String>,
) -> anyhow::Result<User> {
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        email: email.trim().to_string(),
        password_hash: hash_password(password)?,
        about_me,
        last_seen: None,
        created_at: now(),
    };

    store.set_json(&user_key(&user.id), &user)?;
    store.set_json(&username_key(&user.username), &user.id)?;
    store.set_json(&email_key(&user.email), &user.id)?;

    let mut users: Vec<String> = store.get_json(USERS_LIST_KEY)?.unwrap_or_default();
    users.push(user.id.clone());
    store.set_json(USERS_LIST_KEY, &users)?;

    Ok(user)
}

pub fn touch_last_seen(store: &dyn KvStore, user_id: &str) -> anyhow::Result<()> {
    if let Some(mut user) = get_user(store, user_id)? {
        user.last_seen = Some(now());
        store.set_json(&user_key(user_id), &user)?;
    }
    Ok(())
}

pub fn set_password(store: &dyn KvStore, user: &mut User, password: &str) -> anyhow::Result<()> {
    user.password_hash = hash_password(password)?;
    store.set_json(&user_key(&user.id), user)
}

/// Public view of an account. The email is only shown to its owner.
pub fn build_user_json(user: &User, include_email: bool) -> serde_json::Value {
    let mut json = serde_json::json!({
        "id": user.id,
        "username": user.username,
        "about_me": user.about_me.as_deref().unwrap_or_default(),
        "last_seen": user.last_seen,
        "avatar": avatar_url(&user.email, AVATAR_SIZE),
        "created_at": user.created_at,
    });
    if include_email {
        json["email"] = serde_json::Value::String(user.email.clone());
    }
    json
}

// Top-level paths that a profile page at `/{username}` would shadow.
const RESERVED_USERNAMES: [&str; 12] = [
    "index", "users", "login", "logout", "profile", "posts", "feed", "follow", "unfollow",
    "followers", "followings", "reset_password",
];

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Regex should compile"))
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }
    let chars = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&chars) {
        return Err(ApiError::BadRequest(format!(
            "Username must be {}-{} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }
    if !username_regex().is_match(username) {
        return Err(ApiError::BadRequest(
            "Username may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }
    if RESERVED_USERNAMES.contains(&username) || username.starts_with("reset_password") {
        return Err(ApiError::BadRequest("Please use a different username.".to_string()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.is_empty() {
        return Err(ApiError::BadRequest("Password is required".to_string()));
    }
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

pub fn create_user(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let store = ctx.store;
    let new_user = match json_body(req) {
        Ok(v) => v,
        Err(e) => return Ok(e.into()),
    };
    let username = new_user["username"].as_str().unwrap_or("").trim();
    let email = new_user["email"].as_str().unwrap_or("").trim();
    let password = new_user["password"].as_str().unwrap_or("");

    if let Err(e) = validate_username(username) {
        return Ok(e.into());
    }
    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH || !validate_email(email) {
        return Ok(ApiError::BadRequest("A valid email is required".to_string()).into());
    }
    if let Err(e) = validate_password(password) {
        return Ok(e.into());
    }

    if store.exists(&username_key(username))? {
        return Ok(ApiError::Conflict("Please use a different username.".to_string()).into());
    }
    if store.exists(&email_key(email))? {
        return Ok(ApiError::Conflict("Please use a different email address.".to_string()).into());
    }

    let user = insert_user(store, username, email, password, None)?;
    info!("Registered user {}", user.username);

    json_response(201, &build_user_json(&user, true))
}

pub fn get_profile(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(ctx, req)? {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    match get_user(ctx.store, &user_id)? {
        Some(user) => json_response(200, &build_user_json(&user, true)),
        None => Ok(ApiError::NotFound("User not found".to_string()).into()),
    }
}

/// Public profile: the account, its follow counts and one page of its posts.
pub fn get_user_details(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let username = req.path().trim_start_matches("/users/");
    let params = parse_query_params(req.uri());

    let user = match find_user_by_username(ctx.store, username)? {
        Some(user) => user,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    let posts = user_posts_page(ctx.store, &user.id, get_page(&params), ctx.config.posts_per_page)?;
    let mut body = build_user_json(&user, false);
    body["followers_count"] = get_followers(ctx.store, &user.id)?.len().into();
    body["following_count"] = get_followings(ctx.store, &user.id)?.len().into();
    body["posts"] = serde_json::to_value(&posts)?;

    json_response(200, &body)
}

pub fn update_profile(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(ctx, req)? {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let store = ctx.store;
    let mut user = match get_user(store, &user_id)? {
        Some(user) => user,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };
    let value = match json_body(req) {
        Ok(v) => v,
        Err(e) => return Ok(e.into()),
    };

    // Validate everything first so a rejected update writes nothing.
    let new_username = match value["username"].as_str() {
        Some(raw) => {
            let username = raw.trim().to_string();
            if let Err(e) = validate_username(&username) {
                return Ok(e.into());
            }
            if username != user.username && store.exists(&username_key(&username))? {
                return Ok(ApiError::Conflict("Please use a different username.".to_string()).into());
            }
            Some(username)
        }
        None => None,
    };

    if let Some(about_me) = value["about_me"].as_str() {
        // The limit applies to the stored text, entity escapes included.
        let sanitized = sanitize_text(about_me.trim());
        if sanitized.chars().count() > MAX_ABOUT_ME_LENGTH {
            return Ok(ApiError::BadRequest(format!(
                "About me too long (max {} chars)",
                MAX_ABOUT_ME_LENGTH
            ))
            .into());
        }
        user.about_me = if sanitized.is_empty() { None } else { Some(sanitized) };
    }

    let new_password = value["new_password"].as_str();
    if let Some(new_password) = new_password {
        if let Err(e) = validate_password(new_password) {
            return Ok(e.into());
        }
        let old_password = match value["old_password"].as_str() {
            Some(p) => p,
            None => return Ok(ApiError::BadRequest("Current password required".to_string()).into()),
        };
        if !verify_password(old_password, &user.password_hash) {
            warn!("Rejected password change for {}", user.username);
            return Ok(ApiError::Unauthorized.into());
        }
        user.password_hash = hash_password(new_password)?;
    }

    if let Some(username) = new_username.filter(|u| *u != user.username) {
        store.set_json(&username_key(&username), &user.id)?;
        store.delete(&username_key(&user.username))?;
        info!("User {} renamed to {}", user.username, username);
        user.username = username;
    }

    store.set_json(&user_key(&user.id), &user)?;

    let mut response_data = build_user_json(&user, true);
    if new_password.is_some() {
        revoke_user_tokens(store, ctx.config, &user.id)?;
        let token = issue_token(store, ctx.config, &user.id)?;
        response_data["token"] = serde_json::Value::String(token);
        info!("Password changed for {}", user.username);
    }

    json_response(200, &response_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;

    #[test]
    fn lookups_follow_the_indexes() {
        let store = MemoryStore::new();
        let user = insert_user(&store, "susan", "Susan@Example.com", "cat", None).unwrap();

        assert_eq!(find_user_by_username(&store, "susan").unwrap().unwrap().id, user.id);
        assert_eq!(find_user_by_email(&store, "susan@example.com").unwrap().unwrap().id, user.id);
        assert!(find_user_by_username(&store, "john").unwrap().is_none());
        assert!(verify_password("cat", &user.password_hash));
    }

    #[test]
    fn touch_updates_last_seen() {
        let store = MemoryStore::new();
        let user = insert_user(&store, "susan", "susan@example.com", "cat", None).unwrap();
        assert!(user.last_seen.is_none());

        touch_last_seen(&store, &user.id).unwrap();
        assert!(get_user(&store, &user.id).unwrap().unwrap().last_seen.is_some());
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("susan").is_ok());
        assert!(validate_username("su").is_err());
        assert!(validate_username("su san").is_err());
        assert!(validate_username("style.css").is_err());
        assert!(validate_username("feed").is_err());
        assert!(validate_username("tom&jerry").is_err());
        assert!(validate_username("<b>bob</b>").is_err());
        assert!(validate_username("mary_ann-2").is_ok());
        assert!(validate_username(&"x".repeat(MAX_USERNAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn public_json_hides_email_and_hash() {
        let store = MemoryStore::new();
        let user = insert_user(&store, "susan", "susan@example.com", "cat", None).unwrap();

        let public = build_user_json(&user, false);
        assert!(public.get("email").is_none());
        assert!(public.get("password_hash").is_none());
        assert_eq!(build_user_json(&user, true)["email"], "susan@example.com");
    }
}
