//! The personal timeline.
//!
//! A user's feed is the union of two sets of posts: the join of the post
//! index with the user's follow edges (posts by anyone they follow) and the
//! user's own posts. The union is keyed by post id, so a post that matches
//! both sides (for example through a self-follow edge) appears once. The
//! result is ordered newest first, ties broken by post id descending so page
//! boundaries stay put between requests.
//!
//! Everything here runs on [`PostRef`] index entries; post bodies are only
//! loaded for the page that is returned.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::POSTS_LIST_KEY;
use crate::core::db::{KvStore, StoreExt};
use crate::core::errors::ApiError;
use crate::follow::get_followings;
use crate::models::models::{Page, Post, PostRef};
use crate::posts::{get_user_post_refs, load_posts};
use crate::users::get_user;

/// Newest first, then higher id first.
pub fn timeline_order(a: &PostRef, b: &PostRef) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Joins `index` against the followed author set, unions the result with
/// `own`, and sorts it by [`timeline_order`].
pub fn merge_timeline(followed: &BTreeSet<String>, index: &[PostRef], own: &[PostRef]) -> Vec<PostRef> {
    let joined = index.iter().filter(|r| followed.contains(&r.user_id));

    let mut union: BTreeMap<&str, &PostRef> = BTreeMap::new();
    for post in joined.chain(own.iter()) {
        union.entry(post.id.as_str()).or_insert(post);
    }

    let mut timeline: Vec<PostRef> = union.into_values().cloned().collect();
    timeline.sort_by(timeline_order);
    timeline
}

/// The full ordered feed of `user_id` as index entries.
pub fn followed_post_refs(store: &dyn KvStore, user_id: &str) -> Result<Vec<PostRef>, ApiError> {
    if get_user(store, user_id)?.is_none() {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let followed = get_followings(store, user_id)?;
    let own = get_user_post_refs(store, user_id)?;
    let index: Vec<PostRef> = if followed.is_empty() {
        Vec::new()
    } else {
        store.get_json(POSTS_LIST_KEY)?.unwrap_or_default()
    };

    Ok(merge_timeline(&followed, &index, &own))
}

/// One page of the feed of `user_id`.
pub fn followed_posts(
    store: &dyn KvStore,
    user_id: &str,
    page: usize,
    per_page: usize,
) -> Result<Page<Post>, ApiError> {
    let refs = Page::paginate(followed_post_refs(store, user_id)?, page, per_page);

    Ok(Page {
        items: load_posts(store, &refs.items)?,
        page: refs.page,
        has_next: refs.has_next,
        has_prev: refs.has_prev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;
    use crate::follow::{follow_user, unfollow_user};
    use crate::posts::save_post;
    use crate::users::insert_user;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn post(store: &MemoryStore, id: &str, user_id: &str, secs: i64) -> Post {
        let post = Post {
            id: id.to_string(),
            user_id: user_id.to_string(),
            body: format!("post {}", id),
            created_at: at(secs),
        };
        save_post(store, &post).unwrap();
        post
    }

    fn ids(posts: &[Post]) -> Vec<&str> {
        posts.iter().map(|p| p.id.as_str()).collect()
    }

    fn feed(store: &MemoryStore, user_id: &str) -> Vec<Post> {
        followed_posts(store, user_id, 1, 100).unwrap().items
    }

    #[test]
    fn own_and_followed_posts_interleave_by_time() {
        let store = MemoryStore::new();
        let u = insert_user(&store, "susan", "susan@example.com", "pw1", None).unwrap();
        let v = insert_user(&store, "john", "john@example.com", "pw1", None).unwrap();

        post(&store, "p1", &u.id, 10);
        post(&store, "p2", &u.id, 20);
        post(&store, "p3", &v.id, 15);
        follow_user(&store, &u.id, &v.id).unwrap();

        assert_eq!(ids(&feed(&store, &u.id)), vec!["p2", "p3", "p1"]);
    }

    #[test]
    fn lone_user_sees_own_post() {
        let store = MemoryStore::new();
        let u = insert_user(&store, "susan", "susan@example.com", "pw1", None).unwrap();
        post(&store, "p1", &u.id, 10);

        assert_eq!(ids(&feed(&store, &u.id)), vec!["p1"]);
    }

    #[test]
    fn empty_user_has_empty_feed() {
        let store = MemoryStore::new();
        let u = insert_user(&store, "susan", "susan@example.com", "pw1", None).unwrap();
        let v = insert_user(&store, "john", "john@example.com", "pw1", None).unwrap();
        post(&store, "p1", &v.id, 10);

        let page = followed_posts(&store, &u.id, 1, 10).unwrap();
        assert!(page.items.is_empty());
        assert!(!page.has_next);
    }

    #[test]
    fn unknown_user_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            followed_posts(&store, "ghost", 1, 10),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn self_follow_does_not_duplicate() {
        let store = MemoryStore::new();
        let u = insert_user(&store, "susan", "susan@example.com", "pw1", None).unwrap();
        post(&store, "p1", &u.id, 10);
        post(&store, "p2", &u.id, 20);
        follow_user(&store, &u.id, &u.id).unwrap();

        assert_eq!(ids(&feed(&store, &u.id)), vec!["p2", "p1"]);
    }

    #[test]
    fn unfollow_drops_later_posts_only_from_later_reads() {
        let store = MemoryStore::new();
        let u = insert_user(&store, "susan", "susan@example.com", "pw1", None).unwrap();
        let v = insert_user(&store, "john", "john@example.com", "pw1", None).unwrap();

        follow_user(&store, &u.id, &v.id).unwrap();
        post(&store, "p1", &v.id, 10);
        let before = feed(&store, &u.id);
        assert_eq!(ids(&before), vec!["p1"]);

        unfollow_user(&store, &u.id, &v.id).unwrap();
        post(&store, "p2", &v.id, 20);

        assert!(feed(&store, &u.id).is_empty());
        assert_eq!(ids(&before), vec!["p1"]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let store = MemoryStore::new();
        let u = insert_user(&store, "susan", "susan@example.com", "pw1", None).unwrap();
        let v = insert_user(&store, "john", "john@example.com", "pw1", None).unwrap();
        follow_user(&store, &u.id, &v.id).unwrap();

        post(&store, "a", &u.id, 10);
        post(&store, "c", &v.id, 10);
        post(&store, "b", &u.id, 10);

        assert_eq!(ids(&feed(&store, &u.id)), vec!["c", "b", "a"]);
    }

    #[test]
    fn merge_dedups_and_sorts() {
        let r = |id: &str, user: &str, secs| PostRef {
            id: id.to_string(),
            user_id: user.to_string(),
            created_at: at(secs),
        };
        let followed: BTreeSet<String> = ["v".to_string(), "u".to_string()].into();
        let index = vec![r("x", "v", 5), r("y", "u", 7), r("z", "w", 9), r("x", "v", 5)];
        let own = vec![r("y", "u", 7)];

        let timeline = merge_timeline(&followed, &index, &own);
        let order: Vec<&str> = timeline.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, vec!["y", "x"]);
        assert!(timeline.windows(2).all(|w| timeline_order(&w[0], &w[1]) != Ordering::Greater));
    }

    #[test]
    fn pages_are_stable_slices() {
        let store = MemoryStore::new();
        let u = insert_user(&store, "susan", "susan@example.com", "pw1", None).unwrap();
        for i in 0..5 {
            post(&store, &format!("p{}", i), &u.id, i);
        }

        let first = followed_posts(&store, &u.id, 1, 2).unwrap();
        let second = followed_posts(&store, &u.id, 2, 2).unwrap();
        let third = followed_posts(&store, &u.id, 3, 2).unwrap();

        assert_eq!(ids(&first.items), vec!["p4", "p3"]);
        assert_eq!(ids(&second.items), vec!["p2", "p1"]);
        assert_eq!(ids(&third.items), vec!["p0"]);
        assert!(first.has_next && second.has_next && !third.has_next);
        assert!(second.has_prev);
    }
}
