// src/common/locks.rs

use std::{collections::HashMap, hash::Hash, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Um mutex assíncrono por chave (ex.: um por owner).
/// As entradas são criadas sob demanda e nunca removidas; a quantidade de
/// chaves é limitada pela quantidade de owners.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: std::sync::Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self { locks: std::sync::Mutex::new(HashMap::new()) }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &K) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.clone()).or_default().clone()
    }

    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }
}
