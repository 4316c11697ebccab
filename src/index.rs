//! In-memory key/value indices rebuilt at daemon start.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Error};

use convoy_api_types::volume_bail;

/// A string map where a key can only ever map to one value.
#[derive(Default)]
pub struct Index {
    data: Mutex<HashMap<String, String>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adding a key again with the same value is fine, a different value is not.
    pub fn add(&self, key: &str, value: &str) -> Result<(), Error> {
        if key.is_empty() || value.is_empty() {
            bail!("BUG: invalid empty index entry {:?} -> {:?}", key, value);
        }
        let mut data = self.data.lock().unwrap();
        if let Some(existing) = data.get(key) {
            if existing != value {
                volume_bail!(
                    AlreadyExists,
                    "{} already exists and is associated with {}",
                    key,
                    existing
                );
            }
            return Ok(());
        }
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), Error> {
        match self.data.lock().unwrap().remove(key) {
            Some(_) => Ok(()),
            None => bail!("BUG: removing {} which is not in the index", key),
        }
    }

    /// Value of `key`, empty if absent.
    pub fn get(&self, key: &str) -> String {
        self.data.lock().unwrap().get(key).cloned().unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
