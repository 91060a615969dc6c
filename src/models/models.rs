use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub about_me: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Index entry for a post: enough to filter by author and order by time
/// without loading the body.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PostRef {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Post> for PostRef {
    fn from(post: &Post) -> Self {
        PostRef {
            id: post.id.clone(),
            user_id: post.user_id.clone(),
            created_at: post.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TokenData {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// One page of a longer listing.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    /// Slices `items` to the requested 1-based page.
    pub fn paginate(items: Vec<T>, page: usize, per_page: usize) -> Self {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let total = items.len();
        let start = (page - 1).saturating_mul(per_page);

        Page {
            has_next: start.saturating_add(per_page) < total,
            has_prev: page > 1,
            items: items.into_iter().skip(start).take(per_page).collect(),
            page,
        }
    }
}

pub type Followings = std::collections::BTreeSet<String>;
pub type Followers = std::collections::BTreeSet<String>;
