use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 64;
pub const MAX_EMAIL_LENGTH: usize = 120;
pub const MIN_PASSWORD_LENGTH: usize = 3;
pub const MAX_POST_LENGTH: usize = 140;
pub const MAX_ABOUT_ME_LENGTH: usize = 140;
pub const AVATAR_SIZE: u32 = 128;

pub const USERS_LIST_KEY: &str = "users_list";
pub const POSTS_LIST_KEY: &str = "posts_list";
pub const TOKENS_LIST_KEY: &str = "tokens_list";
pub const RESETS_LIST_KEY: &str = "resets_list";

pub fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}

pub fn username_key(username: &str) -> String {
    format!("username:{}", username)
}

pub fn email_key(email: &str) -> String {
    format!("email:{}", email.trim().to_lowercase())
}

pub fn post_key(post_id: &str) -> String {
    format!("post:{}", post_id)
}

pub fn user_posts_key(user_id: &str) -> String {
    format!("user_posts:{}", user_id)
}

pub fn followings_key(user_id: &str) -> String {
    format!("followings:{}", user_id)
}

pub fn followers_key(user_id: &str) -> String {
    format!("followers:{}", user_id)
}

pub fn token_key(token: &str) -> String {
    format!("token:{}", token)
}

pub fn reset_key(token: &str) -> String {
    format!("reset:{}", token)
}

/// Runtime settings, read from `MICROBLOG_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub token_expiration_hours: i64,
    pub reset_token_expiration_minutes: i64,
    pub posts_per_page: usize,
    /// Recipients of failure notifications. Empty disables them.
    pub admins: Vec<String>,
    pub mail_sender: String,
    pub seed_demo_data: bool,
    pub bind_address: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_expiration_hours: 24,
            reset_token_expiration_minutes: 10,
            posts_per_page: 25,
            admins: Vec::new(),
            mail_sender: "no-reply@microblog.local".to_string(),
            seed_demo_data: false,
            bind_address: "127.0.0.1:3000".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let defaults = Self::default();

        Self {
            token_expiration_hours: try_load(
                "MICROBLOG_TOKEN_EXPIRATION_HOURS",
                defaults.token_expiration_hours,
            ),
            reset_token_expiration_minutes: try_load(
                "MICROBLOG_RESET_TOKEN_EXPIRATION_MINUTES",
                defaults.reset_token_expiration_minutes,
            ),
            posts_per_page: try_load("MICROBLOG_POSTS_PER_PAGE", defaults.posts_per_page).max(1),
            admins: var("MICROBLOG_ADMINS")
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.admins),
            mail_sender: var("MICROBLOG_MAIL_SENDER").unwrap_or(defaults.mail_sender),
            seed_demo_data: try_load("MICROBLOG_SEED_DEMO", defaults.seed_demo_data),
            bind_address: var("MICROBLOG_BIND").unwrap_or(defaults.bind_address),
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
