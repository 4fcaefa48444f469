use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;

/// A type-erased stored value plus the time it was last written
pub(crate) struct Entry {
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
    last_modified: DateTime<Utc>,
}

impl Entry {
    /// Create a new Entry stamped with the current time
    pub(crate) fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
            last_modified: Utc::now(),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Marks the entry as modified now
    pub(crate) fn touch(&mut self) {
        self.last_modified = Utc::now();
    }

    /// Get a reference to the contained value if it is of type T
    pub(crate) fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Get a mutable reference to the contained value if it is of type T
    pub(crate) fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut::<T>()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Entry")
            .field("type_name", &self.type_name)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}
