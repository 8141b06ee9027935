use ahash::AHashMap;
use mesh_controller_core::{EventHandler, Object};
use mesh_controller_k8s_api::ResourceExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Projects a resource into the entries it contributes to a canonical map.
pub trait Projection: Send + Sync + 'static {
    type Resource: ResourceExt;
    type Key: Clone + Ord + Send;
    type Value: Clone + PartialEq + Send;

    const ORDER: ApplyOrder;

    fn project(&self, resource: &Self::Resource) -> BTreeMap<Self::Key, Self::Value>;

    /// Extracts the resource from an informer payload.
    fn cast(obj: &Object) -> Option<&Self::Resource>;
}

/// How a change is folded into a canonical map.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ApplyOrder {
    /// Merge the current entries, then remove the previous keys that are no
    /// longer present.
    MergeThenFilter,
    /// Remove all previous keys, then merge the current entries.
    UnmergeThenMerge,
}

/// Accumulates the projected changes of resources between syncs.
pub struct ChangeTracker<P: Projection> {
    projection: P,
    items: Mutex<AHashMap<ResourceId, Change<P::Key, P::Value>>>,
    /// The last recorded projection of every live resource.
    held: Mutex<AHashMap<ResourceId, BTreeMap<P::Key, P::Value>>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ResourceId {
    namespace: String,
    name: String,
}

/// The projected state of one resource when first and last observed since the
/// previous checkout.
#[derive(Clone, Debug, PartialEq)]
pub struct Change<K, V> {
    pub previous: BTreeMap<K, V>,
    pub current: BTreeMap<K, V>,
}

/// A map maintained only by applying tracked changes.
#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalMap<K, V>(BTreeMap<K, V>);

// === impl ChangeTracker ===

impl<P: Projection> ChangeTracker<P> {
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            items: Mutex::default(),
            held: Mutex::default(),
        }
    }

    /// Records a transition from `previous` to `current`. Returns true if
    /// any change is pending.
    ///
    /// The previous state is what the tracker last recorded for the resource;
    /// `previous` is projected only for resources it has not seen.
    pub fn update(&self, previous: Option<&P::Resource>, current: Option<&P::Resource>) -> bool {
        let Some(resource) = current.or(previous) else {
            return false;
        };
        let id = ResourceId {
            namespace: resource.namespace().unwrap_or_default(),
            name: resource.name_any(),
        };
        let unseen = previous.map(|r| self.projection.project(r));
        let after = current
            .map(|r| self.projection.project(r))
            .unwrap_or_default();

        let mut items = self.items.lock();
        let mut held = self.held.lock();
        let before = match current {
            Some(_) => held.insert(id.clone(), after.clone()),
            None => held.remove(&id),
        };
        drop(held);
        let change = items.entry(id.clone()).or_insert_with(|| Change {
            previous: before.or(unseen).unwrap_or_default(),
            current: BTreeMap::new(),
        });
        change.current = after;
        if change.previous == change.current {
            items.remove(&id);
        }
        !items.is_empty()
    }

    /// Returns and clears the pending changes.
    pub fn checkout_changes(&self) -> Vec<Change<P::Key, P::Value>> {
        std::mem::take(&mut *self.items.lock())
            .into_values()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    fn observe(&self, previous: Option<&Object>, current: Option<&Object>) {
        fn cast<P: Projection>(obj: &Object) -> Option<&P::Resource> {
            let resource = P::cast(obj);
            if resource.is_none() {
                tracing::error!(observed = obj.type_name(), "Unexpected payload type");
            }
            resource
        }
        let previous = match previous {
            Some(obj) => match cast::<P>(obj) {
                Some(r) => Some(r),
                None => return,
            },
            None => None,
        };
        let current = match current {
            Some(obj) => match cast::<P>(obj) {
                Some(r) => Some(r),
                None => return,
            },
            None => None,
        };
        self.update(previous, current);
    }
}

impl<P: Projection> EventHandler for ChangeTracker<P> {
    fn on_add(&self, obj: &Object) {
        self.observe(None, Some(obj));
    }

    fn on_update(&self, old: &Object, new: &Object) {
        self.observe(Some(old), Some(new));
    }

    fn on_delete(&self, obj: &Object) {
        self.observe(Some(obj), None);
    }
}

impl<P: Projection> std::fmt::Debug for ChangeTracker<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("pending", &self.items.lock().len())
            .finish()
    }
}

// === impl CanonicalMap ===

impl<K: Ord + Clone, V: Clone> CanonicalMap<K, V> {
    /// Folds every pending change of `tracker` into the map, emptying the
    /// tracker.
    pub fn apply<P>(&mut self, tracker: &ChangeTracker<P>)
    where
        P: Projection<Key = K, Value = V>,
    {
        for change in tracker.checkout_changes() {
            self.apply_change(P::ORDER, change);
        }
    }

    fn apply_change(&mut self, order: ApplyOrder, Change { previous, current }: Change<K, V>) {
        match order {
            ApplyOrder::MergeThenFilter => {
                for key in previous.keys() {
                    if !current.contains_key(key) {
                        self.0.remove(key);
                    }
                }
                self.0.extend(current);
            }
            ApplyOrder::UnmergeThenMerge => {
                for key in previous.keys() {
                    self.0.remove(key);
                }
                self.0.extend(current);
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> Default for CanonicalMap<K, V> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}
