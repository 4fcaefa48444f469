use crate::ids::{ContainerId, EntryId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Whether a key may still reach its entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Binding {
    Bound(ContainerId),
    Tombstoned,
}

/// A typed handle to one value stored in one [`Container`](crate::Container).
///
/// Keys are only created by [`Container::store`](crate::Container::store). The
/// type parameter records what was stored so that fetches are checked against
/// it; at runtime a key is just the container identity and the entry id.
///
/// [`Container::remove`](crate::Container::remove) tombstones the key it is
/// given. A tombstoned key is rejected by every operation, forever.
///
/// # Examples
///
/// ```
/// use sovran_thc::{Container, ThcError};
///
/// let container = Container::new();
/// let mut key = container.store(String::from("hello"))?;
///
/// assert_eq!(key.container_id(), Some(container.identity()));
/// assert!(!key.is_tombstoned());
///
/// container.remove(&mut key)?;
/// assert!(key.is_tombstoned());
/// assert_eq!(key.container_id(), None);
/// # Ok::<(), ThcError>(())
/// ```
pub struct Key<T> {
    binding: Binding,
    entry: EntryId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub(crate) fn new(container: ContainerId, entry: EntryId) -> Self {
        Self {
            binding: Binding::Bound(container),
            entry,
            _marker: PhantomData,
        }
    }

    pub(crate) fn binding(&self) -> Binding {
        self.binding
    }

    pub(crate) fn tombstone(&mut self) {
        self.binding = Binding::Tombstoned;
    }

    /// Returns true once the key has been removed
    pub fn is_tombstoned(&self) -> bool {
        self.binding == Binding::Tombstoned
    }

    /// The identity of the container this key is bound to, or `None` if tombstoned
    pub fn container_id(&self) -> Option<ContainerId> {
        match self.binding {
            Binding::Bound(id) => Some(id),
            Binding::Tombstoned => None,
        }
    }

    /// The id of the entry this key points at
    pub fn entry_id(&self) -> EntryId {
        self.entry
    }
}

// Manual impls so that none of them require bounds on T.

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding,
            entry: self.entry,
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.binding == other.binding && self.entry == other.entry
    }
}

impl<T> Eq for Key<T> {}

impl<T> Hash for Key<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.binding.hash(state);
        self.entry.hash(state);
    }
}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Key")
            .field("type", &std::any::type_name::<T>())
            .field("binding", &self.binding)
            .field("entry", &self.entry)
            .finish()
    }
}
