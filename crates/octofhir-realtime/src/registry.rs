//! Subscription registry.
//!
//! Logical subscriptions are keyed by a stable [`SubscriptionId`] and a
//! structural [`SubscriptionFilter`]. The registry remembers in which session
//! each entry was last announced to the server so that every active entry is
//! (re)issued exactly once per session.

use std::sync::Arc;

use indexmap::IndexMap;
use octofhir_core::{ResourceUpdateEvent, generate_id};
use serde::{Deserialize, Serialize};

/// Stable subscription identifier, reused verbatim on resubscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn generate() -> Self {
        Self(generate_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Predicate selecting which updates reach a subscription's handler.
///
/// Empty `patient_ids` or `resource_types` act as wildcards. Lists are kept
/// sorted and deduplicated so that equal filters compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionFilter {
    Resources {
        patient_ids: Vec<String>,
        resource_types: Vec<String>,
    },
    Room {
        name: String,
    },
    All,
}

impl SubscriptionFilter {
    pub fn resources<P, T>(
        patient_ids: impl IntoIterator<Item = P>,
        resource_types: impl IntoIterator<Item = T>,
    ) -> Self
    where
        P: Into<String>,
        T: Into<String>,
    {
        let patient_ids = normalize(patient_ids);
        let resource_types = normalize(resource_types);
        if patient_ids.is_empty() && resource_types.is_empty() {
            return SubscriptionFilter::All;
        }
        SubscriptionFilter::Resources {
            patient_ids,
            resource_types,
        }
    }

    pub fn patient<T: Into<String>>(
        patient_id: impl Into<String>,
        resource_types: impl IntoIterator<Item = T>,
    ) -> Self {
        Self::resources([patient_id.into()], resource_types)
    }

    /// Filter on resource type only, for every patient.
    pub fn resource_types<T: Into<String>>(resource_types: impl IntoIterator<Item = T>) -> Self {
        Self::resources(Vec::<String>::new(), resource_types)
    }

    pub fn room(name: impl Into<String>) -> Self {
        SubscriptionFilter::Room { name: name.into() }
    }

    pub fn matches(&self, event: &ResourceUpdateEvent) -> bool {
        match self {
            SubscriptionFilter::Resources {
                patient_ids,
                resource_types,
            } => {
                let patient_ok = patient_ids.is_empty()
                    || event
                        .patient_id
                        .as_ref()
                        .is_some_and(|p| patient_ids.contains(p));
                let type_ok =
                    resource_types.is_empty() || resource_types.contains(&event.resource_type);
                patient_ok && type_ok
            }
            SubscriptionFilter::Room { name } => event.room.as_deref() == Some(name.as_str()),
            SubscriptionFilter::All => true,
        }
    }
}

fn normalize<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Vec<String> {
    let mut out: Vec<String> = items.into_iter().map(Into::into).collect();
    out.sort();
    out.dedup();
    out
}

/// Callback receiving updates that match a subscription.
pub trait UpdateHandler: Send + Sync + 'static {
    fn handle(&self, event: &ResourceUpdateEvent);
}

impl<F> UpdateHandler for F
where
    F: Fn(&ResourceUpdateEvent) + Send + Sync + 'static,
{
    fn handle(&self, event: &ResourceUpdateEvent) {
        self(event)
    }
}

/// Public view of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub filter: SubscriptionFilter,
}

struct Entry {
    filter: SubscriptionFilter,
    handler: Arc<dyn UpdateHandler>,
    /// Session in which the subscribe frame was last sent.
    sent_in: Option<u64>,
}

/// Active subscriptions in registration order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: IndexMap<SubscriptionId, Entry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        filter: SubscriptionFilter,
        handler: Arc<dyn UpdateHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId::generate();
        self.entries.insert(
            id.clone(),
            Entry {
                filter,
                handler,
                sent_in: None,
            },
        );
        id
    }

    pub fn remove(&mut self, id: &SubscriptionId) -> bool {
        self.entries.shift_remove(id).is_some()
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handlers whose filter matches `event`, in registration order.
    pub fn matching(&self, event: &ResourceUpdateEvent) -> Vec<(SubscriptionId, Arc<dyn UpdateHandler>)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.filter.matches(event))
            .map(|(id, e)| (id.clone(), Arc::clone(&e.handler)))
            .collect()
    }

    /// Entries not yet announced in `session`.
    pub fn pending_for(&self, session: u64) -> Vec<SubscriptionInfo> {
        self.entries
            .iter()
            .filter(|(_, e)| e.sent_in != Some(session))
            .map(|(id, e)| SubscriptionInfo {
                id: id.clone(),
                filter: e.filter.clone(),
            })
            .collect()
    }

    /// Filter of `id` if it still needs announcing in `session`.
    pub fn pending_entry(&self, id: &SubscriptionId, session: u64) -> Option<SubscriptionFilter> {
        self.entries
            .get(id)
            .filter(|e| e.sent_in != Some(session))
            .map(|e| e.filter.clone())
    }

    pub fn mark_sent(&mut self, id: &SubscriptionId, session: u64) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.sent_in = Some(session);
        }
    }

    pub fn infos(&self) -> Vec<SubscriptionInfo> {
        self.entries
            .iter()
            .map(|(id, e)| SubscriptionInfo {
                id: id.clone(),
                filter: e.filter.clone(),
            })
            .collect()
    }

    /// Ids of entries whose filter is structurally equal to `filter`.
    pub fn find_by_filter(&self, filter: &SubscriptionFilter) -> Vec<SubscriptionId> {
        self.entries
            .iter()
            .filter(|(_, e)| &e.filter == filter)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> Arc<dyn UpdateHandler> {
        Arc::new(|_: &ResourceUpdateEvent| {})
    }

    fn condition(patient: &str) -> ResourceUpdateEvent {
        ResourceUpdateEvent::created("Condition", "c1", json!({"id": "c1"})).with_patient(patient)
    }

    #[test]
    fn test_filter_normalization() {
        let a = SubscriptionFilter::patient("p1", ["Observation", "Condition", "Condition"]);
        let b = SubscriptionFilter::resources(["p1"], ["Condition", "Observation"]);
        assert_eq!(a, b);
        assert_eq!(
            SubscriptionFilter::resources(Vec::<String>::new(), Vec::<String>::new()),
            SubscriptionFilter::All
        );
    }

    #[test]
    fn test_empty_patient_id_does_not_widen_filter() {
        let filter = SubscriptionFilter::patient("", ["Condition"]);
        assert_eq!(
            filter,
            SubscriptionFilter::Resources {
                patient_ids: vec![String::new()],
                resource_types: vec!["Condition".into()],
            }
        );
        assert!(!filter.matches(&condition("p1")));
        assert!(!filter.matches(&ResourceUpdateEvent::deleted("Condition", "c1")));
    }

    #[test]
    fn test_filter_matching() {
        let event = condition("p1");
        assert!(SubscriptionFilter::patient("p1", ["Condition"]).matches(&event));
        assert!(SubscriptionFilter::patient("p1", Vec::<String>::new()).matches(&event));
        assert!(SubscriptionFilter::resource_types(["Condition"]).matches(&event));
        assert!(!SubscriptionFilter::patient("p2", ["Condition"]).matches(&event));
        assert!(!SubscriptionFilter::patient("p1", ["Observation"]).matches(&event));
        assert!(SubscriptionFilter::All.matches(&event));
        assert!(!SubscriptionFilter::room("icu").matches(&event));
        assert!(SubscriptionFilter::room("icu").matches(&event.clone().with_room("icu")));
    }

    #[test]
    fn test_overlapping_subscriptions_each_match() {
        let mut reg = SubscriptionRegistry::new();
        let a = reg.insert(SubscriptionFilter::patient("p1", ["Condition"]), noop());
        let b = reg.insert(SubscriptionFilter::All, noop());
        let _c = reg.insert(SubscriptionFilter::patient("p2", ["Condition"]), noop());
        let ids: Vec<_> = reg.matching(&condition("p1")).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_pending_tracks_sessions() {
        let mut reg = SubscriptionRegistry::new();
        let a = reg.insert(SubscriptionFilter::room("icu"), noop());
        assert_eq!(reg.pending_for(1).len(), 1);
        reg.mark_sent(&a, 1);
        assert!(reg.pending_for(1).is_empty());
        assert!(reg.pending_entry(&a, 1).is_none());

        let pending = reg.pending_for(2);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a);
        assert_eq!(pending[0].filter, SubscriptionFilter::room("icu"));
    }

    #[test]
    fn test_remove_and_find() {
        let mut reg = SubscriptionRegistry::new();
        let filter = SubscriptionFilter::patient("p1", ["Condition"]);
        let a = reg.insert(filter.clone(), noop());
        let b = reg.insert(filter.clone(), noop());
        assert_ne!(a, b);
        assert_eq!(reg.find_by_filter(&filter), vec![a.clone(), b.clone()]);
        assert!(reg.remove(&a));
        assert!(!reg.remove(&a));
        assert_eq!(reg.find_by_filter(&filter), vec![b]);
        assert_eq!(reg.len(), 1);
    }
}
