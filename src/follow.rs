use spin_sdk::http::{Request, Response};
use tracing::info;

use crate::auth::validate_token;
use crate::config::*;
use crate::core::db::{KvStore, StoreExt};
use crate::core::errors::ApiError;
use crate::core::helpers::{json_body, json_response};
use crate::models::models::{Followers, Followings};
use crate::users::{find_user_by_username, get_user};
use crate::AppContext;

/// Adds the edge `follower_id -> following_id`. Existing edges are left as is.
pub fn follow_user(store: &dyn KvStore, follower_id: &str, following_id: &str) -> anyhow::Result<()> {
    let mut followings = get_followings(store, follower_id)?;
    if followings.insert(following_id.to_string()) {
        store.set_json(&followings_key(follower_id), &followings)?;
    }

    let mut followers = get_followers(store, following_id)?;
    if followers.insert(follower_id.to_string()) {
        store.set_json(&followers_key(following_id), &followers)?;
    }

    Ok(())
}

/// Removes the edge `follower_id -> following_id` if present.
pub fn unfollow_user(store: &dyn KvStore, follower_id: &str, following_id: &str) -> anyhow::Result<()> {
    let mut followings = get_followings(store, follower_id)?;
    if followings.remove(following_id) {
        store.set_json(&followings_key(follower_id), &followings)?;
    }

    let mut followers = get_followers(store, following_id)?;
    if followers.remove(follower_id) {
        store.set_json(&followers_key(following_id), &followers)?;
    }

    Ok(())
}

pub fn is_following(store: &dyn KvStore, follower_id: &str, following_id: &str) -> anyhow::Result<bool> {
    Ok(get_followings(store, follower_id)?.contains(following_id))
}

pub fn get_followings(store: &dyn KvStore, user_id: &str) -> anyhow::Result<Followings> {
    Ok(store.get_json(&followings_key(user_id))?.unwrap_or_default())
}

pub fn get_followers(store: &dyn KvStore, user_id: &str) -> anyhow::Result<Followers> {
    Ok(store.get_json(&followers_key(user_id))?.unwrap_or_default())
}

fn usernames(store: &dyn KvStore, ids: impl IntoIterator<Item = String>) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for id in ids {
        if let Some(user) = get_user(store, &id)? {
            names.push(user.username);
        }
    }
    names.sort();
    Ok(names)
}

// === HTTP Handlers ===

enum FollowAction {
    Follow,
    Unfollow,
}

fn handle_edge_change(ctx: &AppContext, req: &Request, action: FollowAction) -> anyhow::Result<Response> {
    let user_id = match validate_token(ctx, req)? {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let value = match json_body(req) {
        Ok(v) => v,
        Err(e) => return Ok(e.into()),
    };
    let username = value["username"].as_str().unwrap_or_default();
    if username.is_empty() {
        return Ok(ApiError::BadRequest("Username required".to_string()).into());
    }

    let target = match find_user_by_username(ctx.store, username)? {
        Some(user) => user,
        None => return Ok(ApiError::NotFound(format!("User {} not found.", username)).into()),
    };

    let status = match action {
        FollowAction::Follow => {
            if target.id == user_id {
                return Ok(ApiError::BadRequest("You cannot follow yourself!".to_string()).into());
            }
            follow_user(ctx.store, &user_id, &target.id)?;
            "followed"
        }
        FollowAction::Unfollow => {
            unfollow_user(ctx.store, &user_id, &target.id)?;
            "unfollowed"
        }
    };
    info!("{} {} {}", user_id, status, target.username);

    json_response(200, &serde_json::json!({ "status": status, "username": target.username }))
}

pub fn handle_follow(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    handle_edge_change(ctx, req, FollowAction::Follow)
}

pub fn handle_unfollow(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    handle_edge_change(ctx, req, FollowAction::Unfollow)
}

pub fn get_followings_list(ctx: &AppContext, path: &str) -> anyhow::Result<Response> {
    let username = path.trim_start_matches("/followings/");

    let user = match find_user_by_username(ctx.store, username)? {
        Some(user) => user,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    let followings = usernames(ctx.store, get_followings(ctx.store, &user.id)?)?;
    json_response(200, &followings)
}

pub fn get_followers_list(ctx: &AppContext, path: &str) -> anyhow::Result<Response> {
    let username = path.trim_start_matches("/followers/");

    let user = match find_user_by_username(ctx.store, username)? {
        Some(user) => user,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    let followers = usernames(ctx.store, get_followers(ctx.store, &user.id)?)?;
    json_response(200, &followers)
}
