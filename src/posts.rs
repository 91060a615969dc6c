use spin_sdk::http::{Request, Response};
use uuid::Uuid;
use regex::Regex;
use html_escape::{decode_html_entities, encode_double_quoted_attribute};
use std::sync::OnceLock;
use tracing::info;

use crate::auth::validate_token;
use crate::config::*;
use crate::core::db::{KvStore, StoreExt};
use crate::core::errors::ApiError;
use crate::core::helpers::{json_body, json_response, now, sanitize_text, validate_uuid};
use crate::core::query_params::{get_page, get_string, parse_query_params};
use crate::feed::{followed_posts, timeline_order};
use crate::models::models::{Page, Post, PostRef};
use crate::users::find_user_by_username;
use crate::AppContext;

pub fn get_post(store: &dyn KvStore, post_id: &str) -> anyhow::Result<Option<Post>> {
    store.get_json(&post_key(post_id))
}

pub fn get_user_post_refs(store: &dyn KvStore, user_id: &str) -> anyhow::Result<Vec<PostRef>> {
    Ok(store.get_json(&user_posts_key(user_id))?.unwrap_or_default())
}

pub fn get_all_post_refs(store: &dyn KvStore) -> anyhow::Result<Vec<PostRef>> {
    Ok(store.get_json(POSTS_LIST_KEY)?.unwrap_or_default())
}

/// Fetches the posts behind `refs`, in order. Entries whose post is gone are skipped.
pub fn load_posts(store: &dyn KvStore, refs: &[PostRef]) -> anyhow::Result<Vec<Post>> {
    let mut posts = Vec::with_capacity(refs.len());
    for r in refs {
        if let Some(post) = get_post(store, &r.id)? {
            posts.push(post);
        }
    }
    Ok(posts)
}

/// Writes `post` and prepends it to the global and per-author indexes.
pub fn save_post(store: &dyn KvStore, post: &Post) -> anyhow::Result<()> {
    store.set_json(&post_key(&post.id), post)?;

    let entry = PostRef::from(post);
    for key in [POSTS_LIST_KEY.to_string(), user_posts_key(&post.user_id)] {
        let mut refs: Vec<PostRef> = store.get_json(&key)?.unwrap_or_default();
        refs.insert(0, entry.clone());
        store.set_json(&key, &refs)?;
    }

    Ok(())
}

pub fn insert_post(store: &dyn KvStore, user_id: &str, body: &str) -> anyhow::Result<Post> {
    let post = Post {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        body: body.to_string(),
        created_at: now(),
    };
    save_post(store, &post)?;
    Ok(post)
}

pub fn remove_post(store: &dyn KvStore, post: &Post) -> anyhow::Result<()> {
    store.delete(&post_key(&post.id))?;

    for key in [POSTS_LIST_KEY.to_string(), user_posts_key(&post.user_id)] {
        let mut refs: Vec<PostRef> = store.get_json(&key)?.unwrap_or_default();
        refs.retain(|r| r.id != post.id);
        store.set_json(&key, &refs)?;
    }

    Ok(())
}

fn page_of(store: &dyn KvStore, mut refs: Vec<PostRef>, page: usize, per_page: usize) -> anyhow::Result<Page<Post>> {
    refs.sort_by(timeline_order);
    let refs = Page::paginate(refs, page, per_page);

    Ok(Page {
        items: load_posts(store, &refs.items)?,
        page: refs.page,
        has_next: refs.has_next,
        has_prev: refs.has_prev,
    })
}

pub fn user_posts_page(store: &dyn KvStore, user_id: &str, page: usize, per_page: usize) -> anyhow::Result<Page<Post>> {
    page_of(store, get_user_post_refs(store, user_id)?, page, per_page)
}

pub fn explore_page(store: &dyn KvStore, page: usize, per_page: usize) -> anyhow::Result<Page<Post>> {
    page_of(store, get_all_post_refs(store)?, page, per_page)
}

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"]+"#).expect("Regex should compile")
    })
}

/// Posts are plain text: markup is stripped, then URLs become links.
fn filter_post_content(content: &str) -> String {
    let clean = sanitize_text(content);

    url_regex().replace_all(&clean, |caps: &regex::Captures| {
        let url = &caps[0];
        let href = encode_double_quoted_attribute(&decode_html_entities(url)).to_string();
        format!(r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#, href, url)
    }).to_string()
}

// === HTTP Handlers ===

pub fn create_post(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(ctx, req)? {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let value = match json_body(req) {
        Ok(v) => v,
        Err(e) => return Ok(e.into()),
    };
    let body = value["body"].as_str().unwrap_or_default().trim();

    if body.is_empty() || body.chars().count() > MAX_POST_LENGTH {
        return Ok(ApiError::BadRequest(format!(
            "Post must be 1-{} characters",
            MAX_POST_LENGTH
        ))
        .into());
    }

    let post = insert_post(ctx.store, &user_id, &filter_post_content(body))?;
    info!("User {} published post {}", user_id, post.id);

    json_response(201, &post)
}

pub fn delete_post(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(ctx, req)? {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let post_id = req.path().trim_start_matches("/posts/");
    if post_id.is_empty() || !validate_uuid(post_id) {
        return Ok(ApiError::BadRequest("Post ID required".to_string()).into());
    }

    let post = match get_post(ctx.store, post_id)? {
        Some(post) => post,
        None => return Ok(ApiError::NotFound("Post not found".to_string()).into()),
    };
    if post.user_id != user_id {
        return Ok(ApiError::Forbidden.into());
    }

    remove_post(ctx.store, &post)?;
    info!("User {} deleted post {}", user_id, post.id);

    Ok(Response::builder().status(204).build())
}

/// `GET /posts`: every post (explore), or one author's with `?user=`.
pub fn list_posts(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let params = parse_query_params(req.uri());
    let page = get_page(&params);
    let per_page = ctx.config.posts_per_page;

    let posts = match get_string(&params, "user") {
        Some(username) => match find_user_by_username(ctx.store, &username)? {
            Some(user) => user_posts_page(ctx.store, &user.id, page, per_page)?,
            None => return Ok(ApiError::NotFound(format!("User {} not found.", username)).into()),
        },
        None => explore_page(ctx.store, page, per_page)?,
    };

    json_response(200, &posts)
}

pub fn get_feed(ctx: &AppContext, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(ctx, req)? {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let params = parse_query_params(req.uri());
    match followed_posts(ctx.store, &user_id, get_page(&params), ctx.config.posts_per_page) {
        Ok(page) => json_response(200, &page),
        Err(ApiError::InternalError(msg)) => Err(anyhow::anyhow!(msg)),
        Err(e) => Ok(e.into()),
    }
}
