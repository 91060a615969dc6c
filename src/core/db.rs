use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::follow::follow_user;
use crate::posts::insert_post;
use crate::users::{find_user_by_username, insert_user};

/// Byte-oriented key-value storage the application runs on.
pub trait KvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
    fn exists(&self, key: &str) -> anyhow::Result<bool>;
}

/// JSON accessors over any [`KvStore`], trait objects included.
pub trait StoreExt {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>>;
    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()>;
}

impl<S: KvStore + ?Sized> StoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.set(key, &serde_json::to_vec(value)?)
    }
}

impl KvStore for spin_sdk::key_value::Store {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        spin_sdk::key_value::Store::get(self, key)
            .map_err(|e| anyhow::anyhow!("key-value get {key}: {e:?}"))
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        spin_sdk::key_value::Store::set(self, key, value)
            .map_err(|e| anyhow::anyhow!("key-value set {key}: {e:?}"))
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        spin_sdk::key_value::Store::delete(self, key)
            .map_err(|e| anyhow::anyhow!("key-value delete {key}: {e:?}"))
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        spin_sdk::key_value::Store::exists(self, key)
            .map_err(|e| anyhow::anyhow!("key-value exists {key}: {e:?}"))
    }
}

/// Process-local store used by the native server and the tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.read().contains_key(key))
    }
}

const DEMO_USERS: [(&str, &str, &str, &[&str]); 3] = [
    (
        "test",
        "test@microblog.local",
        "Test user bio",
        &["This is my first post on Microblog!"],
    ),
    (
        "alice",
        "alice@microblog.local",
        "Hello, I'm Alice!",
        &[
            "Welcome to my blog! Excited to share thoughts here.",
            "Just finished an amazing project. Feeling productive today!",
        ],
    ),
    (
        "bob",
        "bob@microblog.local",
        "Bob's corner of the internet",
        &["Hey everyone! Just joined, looking forward to connecting with you all."],
    ),
];

/// Creates the demo accounts (password = username) and makes `test` follow `bob`.
/// Accounts that already exist are left alone.
pub fn seed_demo_data(store: &dyn KvStore) -> anyhow::Result<()> {
    for (username, email, about_me, posts) in DEMO_USERS {
        if find_user_by_username(store, username)?.is_some() {
            continue;
        }

        let user = insert_user(store, username, email, username, Some(about_me.to_string()))?;
        for body in posts {
            insert_post(store, &user.id, body)?;
        }
        info!("Seeded demo user {}", username);
    }

    let test = find_user_by_username(store, "test")?;
    let bob = find_user_by_username(store, "bob")?;
    if let (Some(test), Some(bob)) = (test, bob) {
        follow_user(store, &test.id, &bob.id)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::follow::get_followings;

    #[test]
    fn json_roundtrip_through_trait_object() {
        let store = MemoryStore::new();
        let dyn_store: &dyn KvStore = &store;

        dyn_store.set_json("k", &vec!["a".to_string()]).unwrap();
        let value: Option<Vec<String>> = dyn_store.get_json("k").unwrap();
        assert_eq!(value, Some(vec!["a".to_string()]));

        dyn_store.delete("k").unwrap();
        assert!(!dyn_store.exists("k").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        seed_demo_data(&store).unwrap();
        let entries = store.len();

        seed_demo_data(&store).unwrap();
        assert_eq!(store.len(), entries);

        let users: Vec<String> = store.get_json(USERS_LIST_KEY).unwrap().unwrap();
        assert_eq!(users.len(), 3);

        let test = find_user_by_username(&store, "test").unwrap().unwrap();
        let bob = find_user_by_username(&store, "bob").unwrap().unwrap();
        assert!(get_followings(&store, &test.id).unwrap().contains(&bob.id));
    }
}
