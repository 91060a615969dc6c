use spin_sdk::http::{Request, Response};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::*;
use crate::core::db::{KvStore, StoreExt};
use crate::core::errors::ApiError;
use crate::core::helpers::{json_body, json_response, now, unauthorized, verify_password};
use crate::mail::send_password_reset_email;
use crate::models::models::TokenData;
use crate::users::{find_user_by_email, find_user_by_username, get_user, set_password, touch_last_seen};
use crate::AppContext;

fn bearer_token(req: &Request) -> Option<&str> {
    req.header("Authorization")
        .and_then(|h| h.as_str())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

fn session_expired(data: &TokenData, config: &Config) -> bool {
    (now() - data.created_at).num_hours() > config.token_expiration_hours
}

fn reset_expired(data: &TokenData, config: &Config) -> bool {
    (now() - data.created_at).num_minutes() >= config.reset_token_expiration_minutes
}

/// Walks a token list, deleting every entry `keep` rejects and dropping
/// entries whose record is already gone. Returns the survivors.
fn sweep_tokens(
    store: &dyn KvStore,
    list_key: &str,
    record_key: fn(&str) -> String,
    keep: impl Fn(&TokenData) -> bool,
) -> anyhow::Result<Vec<String>> {
    let listed: Vec<String> = store.get_json(list_key)?.unwrap_or_default();
    let mut kept = Vec::with_capacity(listed.len());

    for token in listed {
        let key = record_key(&token);
        match store.get_json::<TokenData>(&key)? {
            Some(data) if keep(&data) => kept.push(token),
            Some(_) => store.delete(&key)?,
            None => {}
        }
    }

    Ok(kept)
}

fn forget_token(store: &dyn KvStore, list_key: &str, record_key: &str, token: &str) -> anyhow::Result<()> {
    store.delete(record_key)?;
    let mut tokens: Vec<String> = store.get_json(list_key)?.unwrap_or_default();
    tokens.retain(|t| t != token);
    store.set_json(list_key, &tokens)
}

/// Creates a session token for `user_id` and records it in the token list.
/// Expired sessions are reclaimed on the way.
pub fn issue_token(store: &dyn KvStore, config: &Config, user_id: &str) -> anyhow::Result<String> {
    let token = Uuid::new_v4().to_string();
    let data = TokenData {
        user_id: user_id.to_string(),
        created_at: now(),
    };
    store.set_json(&token_key(&token), &data)?;

    let mut tokens = sweep_tokens(store, TOKENS_LIST_KEY, token_key, |d| !session_expired(d, config))?;
    tokens.push(token.clone());
    store.set_json(TOKENS_LIST_KEY, &tokens)?;

    Ok(token)
}

/// Deletes every session belonging to `user_id`, along with any expired ones.
pub fn revoke_user_tokens(store: &dyn KvStore, config: &Config, user_id: &str) -> anyhow::Result<()> {
    let kept = sweep_tokens(store, TOKENS_LIST_KEY, token_key, |d| {
        d.user_id != user_id && !session_expired(d, config)
    })?;
    store.set_json(TOKENS_LIST_KEY, &kept)
}

/// Resolves the bearer token to a user id. Expired tokens are deleted and
/// tokens of vanished users are rejected. A successful check refreshes
/// `last_seen`. Store failures are errors, not a missing session.
pub fn validate_token(ctx: &AppContext, req: &Request) -> anyhow::Result<Option<String>> {
    let store = ctx.store;
    let Some(token) = bearer_token(req) else {
        return Ok(None);
    };
    let key = token_key(token);
    let Some(data) = store.get_json::<TokenData>(&key)? else {
        return Ok(None);
    };

    if session_expired(&data, ctx.config) {
        forget_token(store, TOKENS_LIST_KEY, &key, token)?;
        return Ok(None);
    }

    // Check if user still exists
    if !store.exists(&user_key(&data.user_id))? {
        return Ok(None);
    }

    if let Err(e) = touch_last_seen(store, &data.user_id) {
        warn!("Failed to update last_seen for {}: {:#}", data.user_id, e);
    }

    Ok(Some(data.user_id))
}

pub fn login_user(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let creds = match json_body(req) {
        Ok(v) => v,
        Err(e) => return Ok(e.into()),
    };
    let username = creds["username"].as_str().unwrap_or_default();
    let password = creds["password"].as_str().unwrap_or_default();

    let user = match find_user_by_username(ctx.store, username)? {
        Some(u) if verify_password(password, &u.password_hash) => u,
        _ => {
            warn!("Invalid login attempt for {:?}", username);
            return Ok(unauthorized());
        }
    };

    let token = issue_token(ctx.store, ctx.config, &user.id)?;
    info!("User {} logged in", user.username);

    json_response(
        200,
        &serde_json::json!({
            "token": token,
            "user_id": user.id
        }),
    )
}

pub fn logout_user(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let token = match bearer_token(req) {
        Some(t) => t,
        None => return Ok(unauthorized()),
    };

    forget_token(ctx.store, TOKENS_LIST_KEY, &token_key(token), token)?;

    json_response(200, &serde_json::json!({ "message": "Logged out successfully" }))
}

/// Always answers 200 so the response does not reveal which addresses are
/// registered.
pub fn request_password_reset(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let value = match json_body(req) {
        Ok(v) => v,
        Err(e) => return Ok(e.into()),
    };
    let email = value["email"].as_str().unwrap_or_default().trim();

    if email.is_empty() {
        return Ok(ApiError::BadRequest("Email is required".to_string()).into());
    }

    if let Some(user) = find_user_by_email(ctx.store, email)? {
        let token = Uuid::new_v4().to_string();
        let data = TokenData {
            user_id: user.id.clone(),
            created_at: now(),
        };
        ctx.store.set_json(&reset_key(&token), &data)?;

        let mut resets = sweep_tokens(ctx.store, RESETS_LIST_KEY, reset_key, |d| {
            !reset_expired(d, ctx.config)
        })?;
        resets.push(token.clone());
        ctx.store.set_json(RESETS_LIST_KEY, &resets)?;

        send_password_reset_email(ctx.mailer, ctx.config, &user, &token)?;
        info!("Password reset requested for {}", user.username);
    }

    json_response(
        200,
        &serde_json::json!({ "message": "Check your email for the instructions to reset your password" }),
    )
}

pub fn reset_password(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let store = ctx.store;
    let value = match json_body(req) {
        Ok(v) => v,
        Err(e) => return Ok(e.into()),
    };
    let token = value["token"].as_str().unwrap_or_default();
    let password = value["password"].as_str().unwrap_or_default();

    let invalid = || -> Response { ApiError::BadRequest("Invalid or expired token".to_string()).into() };

    if token.is_empty() {
        return Ok(invalid());
    }
    if password.len() < MIN_PASSWORD_LENGTH {
        return Ok(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ))
        .into());
    }

    let key = reset_key(token);
    let data = match store.get_json::<TokenData>(&key)? {
        Some(data) => data,
        None => return Ok(invalid()),
    };

    // Single use: the token goes away whatever the outcome.
    forget_token(store, RESETS_LIST_KEY, &key, token)?;
    if reset_expired(&data, ctx.config) {
        return Ok(invalid());
    }

    let mut user = match get_user(store, &data.user_id)? {
        Some(user) => user,
        None => return Ok(invalid()),
    };

    set_password(store, &mut user, password)?;
    revoke_user_tokens(store, ctx.config, &user.id)?;
    info!("Password reset for {}", user.username);

    json_response(200, &serde_json::json!({ "message": "Your password has been reset." }))
}
