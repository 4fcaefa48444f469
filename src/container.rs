use crate::entry::Entry;
use crate::error::{Result, ThcError};
use crate::ids::{ContainerId, EntryId};
use crate::key::{Binding, Key};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace, warn};

type Entries = HashMap<EntryId, Entry>;

/// A thread-safe container for values of unrelated types, addressed by typed keys.
///
/// Every value stored yields a [`Key<T>`] that remembers both the container it
/// came from and the type that was stored. Presenting a key to any other
/// container, or asking for a different type, fails with an error instead of
/// returning the wrong data.
///
/// `Container` is a handle: cloning it gives another handle to the same
/// container, with the same identity and the same entries. Reads (`fetch`,
/// `with`, `len`, ...) share the lock; writes (`store`, `update`, `with_mut`,
/// `remove`) take it exclusively.
///
/// A closure passed to [`with_mut`](Self::with_mut) that panics does not break
/// the container: later operations keep working, and the entry holds whatever
/// the closure wrote before it panicked.
///
/// A container refuses to store itself. Indirect cycles (A holds B, B holds A)
/// are not detected and will leak both containers; don't build them.
///
/// # Examples
///
/// ```
/// use sovran_thc::{Container, ThcError};
///
/// let container = Container::new();
///
/// let mut number = container.store(42i32)?;
/// let name = container.store(String::from("answer"))?;
///
/// assert_eq!(container.fetch(&number)?, 42);
/// assert_eq!(container.fetch(&name)?, "answer");
///
/// container.update(&number, 43)?;
/// assert_eq!(container.fetch(&number)?, 43);
///
/// container.remove(&mut number)?;
/// assert_eq!(container.fetch(&number), Err(ThcError::Tombstoned));
/// assert_eq!(container.len(), 1);
/// # Ok::<(), ThcError>(())
/// ```
#[derive(Clone)]
pub struct Container {
    identity: ContainerId,
    entries: Arc<RwLock<Entries>>,
}

impl Container {
    /// Creates a new, empty container with a fresh identity
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a new, empty container with room for at least `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            identity: ContainerId::generate(),
            entries: Arc::new(RwLock::new(HashMap::with_capacity(capacity))),
        }
    }

    /// The identity of this container, shared by all of its clones
    pub fn identity(&self) -> ContainerId {
        self.identity
    }

    /// Stores a value and returns the key that reaches it
    ///
    /// # Errors
    ///
    /// Returns `ThcError::SelfContainment` if `value` is this container
    /// (or an `Arc` of it).
    pub fn store<T>(&self, value: T) -> Result<Key<T>>
    where
        T: Any + Send + Sync,
    {
        self.reject_self(&value)?;

        let entry_id = EntryId::generate();
        self.write().insert(entry_id, Entry::new(value));

        trace!(
            target: "sovran_thc",
            container = %self.identity,
            entry = %entry_id,
            type_name = std::any::type_name::<T>(),
            "stored value"
        );
        Ok(Key::new(self.identity, entry_id))
    }

    /// Retrieves a clone of the value behind `key`
    ///
    /// # Errors
    ///
    /// - Returns `ThcError::Tombstoned` if the key was removed
    /// - Returns `ThcError::IdentityMismatch` if the key belongs to another container
    /// - Returns `ThcError::NotFound` if the entry no longer exists
    /// - Returns `ThcError::TypeMismatch` if the stored value is not a `T`
    pub fn fetch<T>(&self, key: &Key<T>) -> Result<T>
    where
        T: Any + Clone,
    {
        self.with(key, T::clone)
    }

    /// Runs a closure with read access to the value behind `key`
    ///
    /// Useful for values that are expensive to clone or don't implement `Clone`.
    /// The closure runs under the shared lock and must not call back into this container.
    ///
    /// # Examples
    ///
    /// ```
    /// use sovran_thc::{Container, ThcError};
    ///
    /// let container = Container::new();
    /// let key = container.store(vec![1, 2, 3])?;
    ///
    /// let total = container.with(&key, |v| v.iter().sum::<i32>())?;
    /// assert_eq!(total, 6);
    /// # Ok::<(), ThcError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    pub fn with<T, F, R>(&self, key: &Key<T>, f: F) -> Result<R>
    where
        T: Any,
        F: FnOnce(&T) -> R,
    {
        let entry_id = self.check_key(key)?;
        let entries = self.read();
        let entry = entries
            .get(&entry_id)
            .ok_or(ThcError::NotFound(entry_id))?;

        match entry.downcast_ref::<T>() {
            Some(value) => Ok(f(value)),
            None => Err(self.type_mismatch::<T>(entry.type_name())),
        }
    }

    /// Runs a closure with write access to the value behind `key`
    ///
    /// The entry's modification time is refreshed. The closure runs under the
    /// exclusive lock and must not call back into this container.
    ///
    /// A closure that leaves this container stored inside itself is undone: the
    /// previous value is put back and `ThcError::SelfContainment` is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use sovran_thc::{Container, ThcError};
    ///
    /// let container = Container::new();
    /// let key = container.store(vec![1, 2, 3])?;
    ///
    /// let len = container.with_mut(&key, |v| {
    ///     v.push(4);
    ///     v.len()
    /// })?;
    /// assert_eq!(len, 4);
    /// # Ok::<(), ThcError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch), plus `ThcError::SelfContainment`.
    pub fn with_mut<T, F, R>(&self, key: &Key<T>, f: F) -> Result<R>
    where
        T: Any,
        F: FnOnce(&mut T) -> R,
    {
        let entry_id = self.check_key(key)?;
        let mut entries = self.write();
        let entry = entries
            .get_mut(&entry_id)
            .ok_or(ThcError::NotFound(entry_id))?;

        let found = entry.type_name();
        let Some(value) = entry.downcast_mut::<T>() else {
            return Err(self.type_mismatch::<T>(found));
        };

        let previous = Handle::capture(&*value);
        let result = f(&mut *value);
        if let Err(e) = self.reject_self(&*value) {
            if let Some(previous) = previous {
                previous.restore(value);
            }
            return Err(e);
        }
        entry.touch();
        Ok(result)
    }

    /// Replaces the value behind `key`
    ///
    /// # Errors
    ///
    /// - Returns `ThcError::SelfContainment` if `value` is this container
    /// - Returns `ThcError::Tombstoned` if the key was removed
    /// - Returns `ThcError::IdentityMismatch` if the key belongs to another container
    /// - Returns `ThcError::NotFound` if the entry no longer exists
    pub fn update<T>(&self, key: &Key<T>, value: T) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        self.reject_self(&value)?;
        let entry_id = self.check_key(key)?;

        let mut entries = self.write();
        let entry = entries
            .get_mut(&entry_id)
            .ok_or(ThcError::NotFound(entry_id))?;
        *entry = Entry::new(value);
        drop(entries);

        trace!(
            target: "sovran_thc",
            container = %self.identity,
            entry = %entry_id,
            "updated value"
        );
        Ok(())
    }

    /// Deletes the value behind `key` and tombstones the key
    ///
    /// After a successful remove the key is rejected by every operation on every
    /// container. Clones of the key taken beforehand are not tombstoned, but the
    /// entry they point at is gone.
    ///
    /// # Errors
    ///
    /// - Returns `ThcError::Tombstoned` if the key was already removed
    /// - Returns `ThcError::IdentityMismatch` if the key belongs to another container
    /// - Returns `ThcError::NotFound` if the entry no longer exists
    ///
    /// The key is left untouched when an error is returned.
    pub fn remove<T>(&self, key: &mut Key<T>) -> Result<()> {
        let entry_id = self.check_key(key)?;

        self.write()
            .remove(&entry_id)
            .ok_or(ThcError::NotFound(entry_id))?;
        key.tombstone();

        trace!(
            target: "sovran_thc",
            container = %self.identity,
            entry = %entry_id,
            "removed value"
        );
        Ok(())
    }

    /// Returns true if `key` is bound to this container and its entry exists
    ///
    /// The stored type is not checked.
    pub fn contains<T>(&self, key: &Key<T>) -> bool {
        match key.binding() {
            Binding::Bound(id) if id == self.identity => self.read().contains_key(&key.entry_id()),
            _ => false,
        }
    }

    /// Returns when the value behind `key` was last stored or modified
    ///
    /// # Errors
    ///
    /// Same as [`remove`](Self::remove).
    pub fn last_modified<T>(&self, key: &Key<T>) -> Result<DateTime<Utc>> {
        let entry_id = self.check_key(key)?;
        self.read()
            .get(&entry_id)
            .map(Entry::last_modified)
            .ok_or(ThcError::NotFound(entry_id))
    }

    /// Returns the number of entries
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if the container holds no entries
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns a short description of the form `Length: <n>`
    pub fn describe(&self) -> String {
        format!("Length: {}", self.len())
    }

    // A poisoned lock only means a `with_mut` closure panicked. The map itself
    // is intact, so take the guard back and clear the flag.

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|poisoned| {
            self.recover();
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|poisoned| {
            self.recover();
            poisoned.into_inner()
        })
    }

    fn recover(&self) {
        warn!(
            target: "sovran_thc",
            container = %self.identity,
            "recovering container lock poisoned by a panicking closure"
        );
        self.entries.clear_poison();
    }

    /// Resolves a key to its entry id, rejecting removed and foreign keys
    fn check_key<T>(&self, key: &Key<T>) -> Result<EntryId> {
        match key.binding() {
            Binding::Tombstoned => {
                debug!(target: "sovran_thc", container = %self.identity, "rejected removed key");
                Err(ThcError::Tombstoned)
            }
            Binding::Bound(id) if id != self.identity => {
                debug!(
                    target: "sovran_thc",
                    container = %self.identity,
                    key_container = %id,
                    "rejected key from another container"
                );
                Err(ThcError::IdentityMismatch {
                    key: id,
                    container: self.identity,
                })
            }
            Binding::Bound(_) => Ok(key.entry_id()),
        }
    }

    fn reject_self<T: Any>(&self, value: &T) -> Result<()> {
        let value = value as &dyn Any;
        let other = value
            .downcast_ref::<Container>()
            .or_else(|| value.downcast_ref::<Arc<Container>>().map(|c| &**c));

        match other {
            Some(other) if other.identity == self.identity => {
                debug!(target: "sovran_thc", container = %self.identity, "rejected self-containment");
                Err(ThcError::SelfContainment)
            }
            _ => Ok(()),
        }
    }

    fn type_mismatch<T>(&self, found: &'static str) -> ThcError {
        let expected = std::any::type_name::<T>();
        debug!(
            target: "sovran_thc",
            container = %self.identity,
            expected,
            found,
            "rejected access with wrong type"
        );
        ThcError::TypeMismatch { expected, found }
    }
}

/// A copy of a stored container handle, kept so `with_mut` can undo a write
/// that would make a container hold itself
enum Handle {
    Owned(Container),
    Shared(Arc<Container>),
}

impl Handle {
    fn capture<T: Any>(value: &T) -> Option<Self> {
        let value = value as &dyn Any;
        if let Some(container) = value.downcast_ref::<Container>() {
            return Some(Handle::Owned(container.clone()));
        }
        value
            .downcast_ref::<Arc<Container>>()
            .map(|container| Handle::Shared(Arc::clone(container)))
    }

    fn restore<T: Any>(self, value: &mut T) {
        let value = value as &mut dyn Any;
        match self {
            Handle::Owned(container) => {
                if let Some(slot) = value.downcast_mut::<Container>() {
                    *slot = container;
                }
            }
            Handle::Shared(container) => {
                if let Some(slot) = value.downcast_mut::<Arc<Container>>() {
                    *slot = container;
                }
            }
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Container")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_store_fetch_update_remove() -> Result<()> {
        let container = Container::new();

        let mut key = container.store(42)?;
        assert_eq!(container.fetch(&key)?, 42);

        container.update(&key, 43)?;
        assert_eq!(container.fetch(&key)?, 43);

        container.remove(&mut key)?;
        assert_eq!(container.fetch(&key), Err(ThcError::Tombstoned));
        assert_eq!(container.len(), 0);
        Ok(())
    }

    #[test]
    fn test_heterogeneous_values() -> Result<()> {
        let container = Container::new();

        let int_key = container.store(7u64)?;
        let text_key = container.store("seven".to_string())?;
        let point_key = container.store(Point { x: 1, y: 2 })?;

        assert_eq!(container.fetch(&int_key)?, 7);
        assert_eq!(container.fetch(&text_key)?, "seven");
        assert_eq!(container.fetch(&point_key)?, Point { x: 1, y: 2 });
        assert_eq!(container.len(), 3);
        Ok(())
    }

    #[test]
    fn test_self_containment_is_rejected() -> Result<()> {
        let container = Container::new();

        assert_eq!(
            container.store(container.clone()).unwrap_err(),
            ThcError::SelfContainment
        );
        assert_eq!(
            container.store(Arc::new(container.clone())).unwrap_err(),
            ThcError::SelfContainment
        );
        assert!(container.is_empty());

        let key = container.store(Container::new())?;
        assert_eq!(
            container.update(&key, container.clone()),
            Err(ThcError::SelfContainment)
        );
        assert_eq!(container.len(), 1);
        assert_ne!(container.fetch(&key)?.identity(), container.identity());
        Ok(())
    }

    #[test]
    fn test_with_mut_cannot_store_container_in_itself() -> Result<()> {
        let outer = Container::new();
        let inner = Container::new();

        let key = outer.store(inner.clone())?;
        let stamped = outer.last_modified(&key)?;
        let own = outer.clone();
        assert_eq!(
            outer.with_mut(&key, move |slot| *slot = own),
            Err(ThcError::SelfContainment)
        );
        assert_eq!(outer.fetch(&key)?.identity(), inner.identity());
        assert_eq!(outer.last_modified(&key)?, stamped);

        let shared = outer.store(Arc::new(inner.clone()))?;
        let own = Arc::new(outer.clone());
        assert_eq!(
            outer.with_mut(&shared, move |slot| *slot = own),
            Err(ThcError::SelfContainment)
        );
        assert_eq!(outer.fetch(&shared)?.identity(), inner.identity());

        // Swapping in a different container is still allowed
        let replacement = Container::new();
        let id = replacement.identity();
        outer.with_mut(&key, move |slot| *slot = replacement)?;
        assert_eq!(outer.fetch(&key)?.identity(), id);
        assert_eq!(outer.len(), 2);
        Ok(())
    }

    #[test]
    fn test_nested_container() -> Result<()> {
        let outer = Container::new();
        let inner = Container::new();
        let inner_value = inner.store(5i8)?;

        let inner_key = outer.store(inner.clone())?;
        let fetched = outer.fetch(&inner_key)?;

        // Same identity, same entries
        assert_eq!(fetched.identity(), inner.identity());
        assert_eq!(fetched.fetch(&inner_value)?, 5);
        Ok(())
    }

    #[test]
    fn test_identity_mismatch() -> Result<()> {
        let first = Container::new();
        let second = Container::new();
        let mut key = first.store(1)?;
        second.store(1)?;

        let expected = ThcError::IdentityMismatch {
            key: first.identity(),
            container: second.identity(),
        };
        assert_eq!(second.fetch(&key), Err(expected.clone()));
        assert_eq!(second.update(&key, 2), Err(expected.clone()));
        assert_eq!(second.remove(&mut key), Err(expected));
        assert!(!second.contains(&key));

        // Failed removal leaves the key bound
        assert!(!key.is_tombstoned());
        assert_eq!(first.fetch(&key)?, 1);
        Ok(())
    }

    #[test]
    fn test_tombstone_is_final() -> Result<()> {
        let container = Container::new();
        let mut key = container.store("gone".to_string())?;
        container.remove(&mut key)?;

        container.store("new".to_string())?;

        assert_eq!(container.fetch(&key), Err(ThcError::Tombstoned));
        assert_eq!(
            container.update(&key, "back".to_string()),
            Err(ThcError::Tombstoned)
        );
        assert_eq!(container.remove(&mut key), Err(ThcError::Tombstoned));
        assert_eq!(container.last_modified(&key), Err(ThcError::Tombstoned));
        assert!(!container.contains(&key));

        // Tombstoned keys are rejected by other containers too
        assert_eq!(Container::new().fetch(&key), Err(ThcError::Tombstoned));
        Ok(())
    }

    #[test]
    fn test_stale_clone_after_remove() -> Result<()> {
        let container = Container::new();
        let mut key = container.store(10)?;
        let stale = key.clone();

        container.remove(&mut key)?;

        let missing = ThcError::NotFound(stale.entry_id());
        assert_eq!(container.fetch(&stale), Err(missing.clone()));
        assert_eq!(container.update(&stale, 11), Err(missing));
        assert_eq!(container.len(), 0);
        Ok(())
    }

    #[test]
    fn test_type_mismatch() -> Result<()> {
        let container = Container::new();
        let key = container.store(3.5f64)?;

        // Keys can only be built by store, so reach a mismatch by forging one
        let forged: Key<String> = Key::new(container.identity(), key.entry_id());

        match container.fetch(&forged) {
            Err(ThcError::TypeMismatch { expected, found }) => {
                assert_eq!(expected, std::any::type_name::<String>());
                assert_eq!(found, std::any::type_name::<f64>());
            }
            other => panic!("expected type mismatch, got {:?}", other),
        }
        assert!(matches!(
            container.with_mut(&forged, |_| panic!("should not run")),
            Err(ThcError::TypeMismatch { .. })
        ));
        assert_eq!(container.fetch(&key)?, 3.5);
        Ok(())
    }

    #[test]
    fn test_with_and_with_mut() -> Result<()> {
        let container = Container::new();
        let key = container.store(vec![Point { x: 0, y: 0 }])?;

        container.with_mut(&key, |points| points.push(Point { x: 3, y: 4 }))?;
        let count = container.with(&key, |points| points.len())?;
        assert_eq!(count, 2);
        Ok(())
    }

    #[test]
    fn test_last_modified_tracks_writes() -> Result<()> {
        let container = Container::new();
        let key = container.store(1)?;
        let stored = container.last_modified(&key)?;

        thread::sleep(Duration::from_millis(2));
        container.update(&key, 2)?;
        let updated = container.last_modified(&key)?;
        assert!(updated > stored);

        thread::sleep(Duration::from_millis(2));
        container.fetch(&key)?;
        assert_eq!(container.last_modified(&key)?, updated);

        container.with_mut(&key, |v| *v += 1)?;
        assert!(container.last_modified(&key)? > updated);
        Ok(())
    }

    #[test]
    fn test_describe_and_display() -> Result<()> {
        let container = Container::with_capacity(4);
        assert_eq!(container.describe(), "Length: 0");

        container.store(1)?;
        container.store('x')?;
        assert_eq!(container.describe(), "Length: 2");
        assert_eq!(container.to_string(), "Length: 2");
        Ok(())
    }

    #[test]
    fn test_clones_share_state() -> Result<()> {
        let container = Container::default();
        let handle = container.clone();

        let key = handle.store(99)?;
        assert_eq!(container.identity(), handle.identity());
        assert_eq!(container.fetch(&key)?, 99);
        assert!(container.contains(&key));
        Ok(())
    }

    #[test]
    fn test_container_survives_panicking_closure() -> Result<()> {
        let container = Container::new();
        let key = container.store(vec![1, 2])?;

        let handle = container.clone();
        let panicking = key.clone();
        let joined = thread::spawn(move || {
            let _ = handle.with_mut(&panicking, |v: &mut Vec<i32>| {
                v.push(3);
                panic!("closure failed");
            });
        })
        .join();
        assert!(joined.is_err());

        // The write made before the panic is kept; everything keeps working
        assert_eq!(container.fetch(&key)?, vec![1, 2, 3]);
        container.update(&key, vec![4])?;
        let other = container.store("after".to_string())?;
        assert_eq!(container.fetch(&other)?, "after");
        assert_eq!(container.len(), 2);
        assert_eq!(container.describe(), "Length: 2");
        Ok(())
    }
}
