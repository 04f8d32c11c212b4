use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Runtime key of an event type.
///
/// Events are routed by exact type: `String` and `&'static str` are two
/// different keys, and there is no dispatch over supertypes or traits.
/// Equality and hashing only look at the `TypeId`; the name is kept for logs.
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
}

impl EventType {
    /// The key for events of type `E`.
    pub fn of<E: 'static>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: type_name::<E>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Human-readable type name, as reported by `std::any::type_name`.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventType({})", self.name)
    }
}
