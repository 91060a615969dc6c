//! Load tests against a running server (`MICROBLOG_BIND=127.0.0.1:3000`).
//! Run with `cargo test --test perf -- --ignored --nocapture`.

use serde_json::json;
use std::time::Instant;

const BASE_URL: &str = "http://127.0.0.1:3000";
const NUM_USERS: usize = 100;
const POSTS_PER_USER: usize = 2;
const FOLLOWS_PER_USER: usize = 20;

struct Account {
    username: String,
    token: String,
}

async fn register_and_login(client: &reqwest::Client, username: &str, password: &str) -> Option<Account> {
    let create_resp = client
        .post(&format!("{}/users", BASE_URL))
        .json(&json!({
            "username": username,
            "email": format!("{}@perf.local", username),
            "password": password
        }))
        .send()
        .await
        .ok()?;
    if create_resp.status() != 201 {
        return None;
    }

    let login_resp = client
        .post(&format!("{}/login", BASE_URL))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .ok()?;
    let token_data = login_resp.json::<serde_json::Value>().await.ok()?;

    Some(Account {
        username: username.to_string(),
        token: token_data["token"].as_str()?.to_string(),
    })
}

#[ignore]
#[tokio::test(flavor = "multi_thread")]
async fn perf_test_users_with_posts() {
    let client = reqwest::Client::new();
    let start = Instant::now();

    println!("\n=== Performance Test ===");
    println!("Creating {} users with {} posts each...", NUM_USERS, POSTS_PER_USER);

    let run_id = uuid::Uuid::new_v4().simple().to_string()[0..8].to_string();
    let mut accounts = Vec::new();

    let user_creation_start = Instant::now();
    for i in 0..NUM_USERS {
        let username = format!("perf_{}_{}", run_id, i);
        if let Some(account) = register_and_login(&client, &username, "password123").await {
            accounts.push(account);
        }
    }
    let user_creation_time = user_creation_start.elapsed();
    println!(
        "User creation done: {} users in {:.2}s",
        accounts.len(),
        user_creation_time.as_secs_f64()
    );

    let post_creation_start = Instant::now();
    let mut posts_created = 0;
    let mut posts_failed = 0;
    for (idx, account) in accounts.iter().enumerate() {
        for post_num in 0..POSTS_PER_USER {
            let post_resp = client
                .post(&format!("{}/posts", BASE_URL))
                .header("Authorization", format!("Bearer {}", account.token))
                .json(&json!({ "body": format!("Post {} from user {}", post_num + 1, idx) }))
                .send()
                .await;

            match post_resp {
                Ok(resp) if resp.status() == 201 => posts_created += 1,
                _ => posts_failed += 1,
            }
        }
    }
    let post_creation_time = post_creation_start.elapsed();

    let total_time = start.elapsed();
    let total_requests = accounts.len() * 2 + posts_created + posts_failed;

    println!("\n=== Results ===");
    println!("Total time: {:.2}s", total_time.as_secs_f64());
    println!("Post creation: {:.2}s", post_creation_time.as_secs_f64());
    println!("Posts created: {}", posts_created);
    println!("Posts failed: {}", posts_failed);
    println!(
        "Throughput: {:.0} requests/sec",
        total_requests as f64 / total_time.as_secs_f64()
    );
}

#[ignore]
#[tokio::test(flavor = "multi_thread")]
async fn perf_test_feed_with_many_followings() {
    let client = reqwest::Client::new();

    println!("\n=== Feed Performance Test ===");

    let run_id = uuid::Uuid::new_v4().simple().to_string()[0..8].to_string();
    let reader = match register_and_login(&client, &format!("reader_{}", run_id), "password123").await {
        Some(account) => account,
        None => {
            println!("Failed to create reader account");
            return;
        }
    };

    for i in 0..FOLLOWS_PER_USER {
        let Some(author) = register_and_login(&client, &format!("author_{}_{}", run_id, i), "password123").await
        else {
            continue;
        };

        for post_num in 0..POSTS_PER_USER {
            let _ = client
                .post(&format!("{}/posts", BASE_URL))
                .header("Authorization", format!("Bearer {}", author.token))
                .json(&json!({ "body": format!("Post {} by {}", post_num + 1, author.username) }))
                .send()
                .await;
        }

        let _ = client
            .post(&format!("{}/follow", BASE_URL))
            .header("Authorization", format!("Bearer {}", reader.token))
            .json(&json!({ "username": author.username }))
            .send()
            .await;
    }

    let fetch_start = Instant::now();
    let feed_resp = client
        .get(&format!("{}/feed", BASE_URL))
        .header("Authorization", format!("Bearer {}", reader.token))
        .send()
        .await;
    let fetch_time = fetch_start.elapsed();

    println!("Feed fetch time: {:.2}ms", fetch_time.as_secs_f64() * 1000.0);
    if let Ok(resp) = feed_resp {
        println!("Feed status: {}", resp.status());
        if let Ok(page) = resp.json::<serde_json::Value>().await {
            println!(
                "Feed page size: {}",
                page["items"].as_array().map(|a| a.len()).unwrap_or(0)
            );
        }
    }
}
