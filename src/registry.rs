//! # Registry
//!
//! One [Pusher] per destination, created on first use and kept for the life of the exporter

use super::error::PushError;
use super::pusher::Pusher;
use super::resolver::DestinationKey;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub type ArcPusher = Arc<dyn Pusher>;

#[derive(Clone)]
pub struct PusherEntry {
    pub key: DestinationKey,
    pub pusher: ArcPusher,
    pub created_at: SystemTime,
}

/// Keyed pool of pushers
///
/// The mutex only guards the lookup and insert, sends happen on the returned pusher outside of it
#[derive(Default)]
pub struct PusherRegistry {
    entries: Mutex<HashMap<DestinationKey, PusherEntry>>,
}

impl PusherRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Return the pusher for `key`, calling `create` only if there is none yet
    pub fn get_or_create(&self, key: &DestinationKey, create: impl FnOnce() -> ArcPusher) -> ArcPusher {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            return entry.pusher.clone();
        }

        debug!(destination = %key, "Creating pusher");
        let pusher = create();
        entries.insert(
            key.clone(),
            PusherEntry {
                key: key.clone(),
                pusher: pusher.clone(),
                created_at: SystemTime::now(),
            },
        );
        pusher
    }

    pub fn get(&self, key: &DestinationKey) -> Option<ArcPusher> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).map(|entry| entry.pusher.clone())
    }

    /// Register `pusher` for `key`, replacing any existing one
    pub fn insert(&self, key: DestinationKey, pusher: ArcPusher) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.clone(),
            PusherEntry {
                key,
                pusher,
                created_at: SystemTime::now(),
            },
        );
    }

    pub fn contains(&self, key: &DestinationKey) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<DestinationKey> {
        let entries = self.entries.lock().unwrap();
        let mut keys: Vec<DestinationKey> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Visit a copy of the entries, `f` runs without the lock held and may use the registry
    pub fn for_each(&self, f: impl FnMut(&PusherEntry)) {
        self.snapshot().iter().for_each(f);
    }

    fn snapshot(&self) -> Vec<PusherEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    /// Force flush every pusher and wait for all of them
    ///
    /// Every pusher is flushed even when others fail, all errors are returned
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Vec<PushError> {
        let flushes = self.snapshot().into_iter().map(|entry| async move {
            let result = entry.pusher.force_flush(cancel).await;
            if let Err(err) = &result {
                error!(destination = %entry.key, "Failed to flush pusher on shutdown: {err}");
            }
            result
        });

        join_all(flushes)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }
}
