//! Resource cache reconciler.
//!
//! Holds the latest snapshot of every observed resource, grouped into
//! collections keyed by `(patient_id, resource_type)`. Upserts replace the
//! whole record; deletes remove unconditionally. Re-applying an identical
//! snapshot leaves the cache untouched and reports [`CacheOutcome::Unchanged`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use octofhir_core::{ResourceUpdateEvent, UpdateAction, resource_id_of};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Identifies one cached collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionKey {
    pub patient_id: Option<String>,
    pub resource_type: String,
}

impl CollectionKey {
    pub fn new(patient_id: Option<String>, resource_type: impl Into<String>) -> Self {
        Self {
            patient_id,
            resource_type: resource_type.into(),
        }
    }

    pub fn patient(patient_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self::new(Some(patient_id.into()), resource_type)
    }

    /// Collection for resources not tied to a patient.
    pub fn unscoped(resource_type: impl Into<String>) -> Self {
        Self::new(None, resource_type)
    }

    pub fn of(event: &ResourceUpdateEvent) -> Self {
        Self::new(event.patient_id.clone(), event.resource_type.clone())
    }
}

impl std::fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.patient_id {
            Some(p) => write!(f, "Patient/{p}/{}", self.resource_type),
            None => f.write_str(&self.resource_type),
        }
    }
}

/// How the cache treats updates authored by this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoPolicy {
    /// Apply every update, including echoes of our own writes.
    #[default]
    Apply,
    /// Skip created/updated events whose origin is this session's client id.
    /// Deletes are always applied.
    SuppressOwn,
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Inserted,
    Replaced,
    /// Identical snapshot was already cached.
    Unchanged,
    Removed,
    /// Delete for a resource that was not cached.
    Absent,
    SuppressedEcho,
}

impl CacheOutcome {
    /// Whether observable cache state changed.
    pub fn changed(&self) -> bool {
        matches!(
            self,
            CacheOutcome::Inserted | CacheOutcome::Replaced | CacheOutcome::Removed
        )
    }
}

type Collection = BTreeMap<String, Arc<Value>>;

/// Authoritative in-memory cache of resource snapshots.
///
/// Only the reconciler applies pushed updates. Returned snapshots are shared
/// `Arc<Value>`s and must be treated as immutable.
#[derive(Debug, Default)]
pub struct ResourceCache {
    collections: RwLock<HashMap<CollectionKey, Collection>>,
    echo_policy: EchoPolicy,
}

impl ResourceCache {
    pub fn new(echo_policy: EchoPolicy) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            echo_policy,
        }
    }

    pub fn echo_policy(&self) -> EchoPolicy {
        self.echo_policy
    }

    /// Apply an update in arrival order.
    ///
    /// `local_client_id` is this session's id from `welcome`; it is only
    /// consulted under [`EchoPolicy::SuppressOwn`].
    pub(crate) fn apply(
        &self,
        event: &ResourceUpdateEvent,
        local_client_id: Option<&str>,
    ) -> CacheOutcome {
        if self.echo_policy == EchoPolicy::SuppressOwn
            && event.action.is_upsert()
            && local_client_id.is_some_and(|id| event.is_from(id))
        {
            debug!(reference = %event.reference(), "Suppressed echo of own write");
            return CacheOutcome::SuppressedEcho;
        }

        let key = CollectionKey::of(event);
        match event.action {
            UpdateAction::Created | UpdateAction::Updated => {
                let Some(resource) = event.resource.as_ref() else {
                    warn!(reference = %event.reference(), "Upsert without snapshot ignored");
                    return CacheOutcome::Unchanged;
                };
                self.upsert(key, &event.resource_id, resource)
            }
            UpdateAction::Deleted => self.remove(&key, &event.resource_id),
        }
    }

    fn upsert(&self, key: CollectionKey, resource_id: &str, resource: &Value) -> CacheOutcome {
        let mut collections = self.collections.write();
        let collection = collections.entry(key).or_default();
        match collection.get(resource_id) {
            Some(existing) if existing.as_ref() == resource => CacheOutcome::Unchanged,
            Some(_) => {
                collection.insert(resource_id.to_string(), Arc::new(resource.clone()));
                CacheOutcome::Replaced
            }
            None => {
                collection.insert(resource_id.to_string(), Arc::new(resource.clone()));
                CacheOutcome::Inserted
            }
        }
    }

    fn remove(&self, key: &CollectionKey, resource_id: &str) -> CacheOutcome {
        let mut collections = self.collections.write();
        match collections.get_mut(key).and_then(|c| c.remove(resource_id)) {
            Some(_) => CacheOutcome::Removed,
            None => CacheOutcome::Absent,
        }
    }

    pub fn get(&self, key: &CollectionKey, resource_id: &str) -> Option<Arc<Value>> {
        self.collections
            .read()
            .get(key)
            .and_then(|c| c.get(resource_id))
            .cloned()
    }

    pub fn contains(&self, key: &CollectionKey, resource_id: &str) -> bool {
        self.collections
            .read()
            .get(key)
            .is_some_and(|c| c.contains_key(resource_id))
    }

    /// Snapshots in one collection, ordered by resource id.
    pub fn collection(&self, key: &CollectionKey) -> Vec<Arc<Value>> {
        self.collections
            .read()
            .get(key)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn collection_keys(&self) -> Vec<CollectionKey> {
        let mut keys: Vec<_> = self.collections.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Total number of cached resources.
    pub fn len(&self) -> usize {
        self.collections.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace one collection with a freshly fetched set.
    ///
    /// Resources without a string `id` are skipped. Returns the number stored.
    pub fn refresh(&self, key: CollectionKey, resources: impl IntoIterator<Item = Value>) -> usize {
        let mut collection = Collection::new();
        for resource in resources {
            match resource_id_of(&resource).map(str::to_string) {
                Some(id) => {
                    collection.insert(id, Arc::new(resource));
                }
                None => warn!(collection = %key, "Skipping refreshed resource without id"),
            }
        }
        let count = collection.len();
        debug!(collection = %key, count, "Collection refreshed");
        self.collections.write().insert(key, collection);
        count
    }

    /// Drop one collection. Returns whether it existed.
    pub fn invalidate(&self, key: &CollectionKey) -> bool {
        self.collections.write().remove(key).is_some()
    }

    /// Drop every collection of a patient. Returns how many were dropped.
    pub fn invalidate_patient(&self, patient_id: &str) -> usize {
        let mut collections = self.collections.write();
        let before = collections.len();
        collections.retain(|k, _| k.patient_id.as_deref() != Some(patient_id));
        before - collections.len()
    }

    pub fn clear(&self) {
        self.collections.write().clear();
    }
}
