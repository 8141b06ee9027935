use crate::{Kind, Object};
use std::hash::{Hash, Hasher};

/// An observation event: what changed, with the before and after snapshots.
///
/// `old` is absent on creation and `new` is absent on deletion.
///
/// Equality is by identity: two messages are equal when they carry the same
/// kind and the same payload allocations. Re-enqueuing one delivery
/// therefore collapses, while two deliveries of equal content do not.
#[derive(Clone, Debug)]
pub struct PubSubMessage {
    pub kind: Kind,
    pub old: Option<Object>,
    pub new: Option<Object>,
}

// === impl PubSubMessage ===

impl PubSubMessage {
    pub fn new(kind: Kind, old: Option<Object>, new: Option<Object>) -> Self {
        Self { kind, old, new }
    }

    /// A message that carries no payload, as used for coarse refresh kinds.
    pub fn signal(kind: Kind) -> Self {
        Self {
            kind,
            old: None,
            new: None,
        }
    }

    /// The newest snapshot available: `new` if present, else `old`.
    pub fn latest(&self) -> Option<&Object> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

impl PartialEq for PubSubMessage {
    fn eq(&self, other: &Self) -> bool {
        fn same(a: &Option<Object>, b: &Option<Object>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => a.ptr_eq(b),
                _ => false,
            }
        }
        self.kind == other.kind && same(&self.old, &other.old) && same(&self.new, &other.new)
    }
}

impl Eq for PubSubMessage {}

impl Hash for PubSubMessage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.old.as_ref().map(Object::identity).hash(state);
        self.new.as_ref().map(Object::identity).hash(state);
    }
}
