//! Opaque handle table.
//!
//! Remote callers never hold references to in-memory resources. Instead the
//! service stores each resource in a [`HandleTable`] and hands out a small
//! integer [`Handle`], tagged at the type level with the resource kind.
//!
//! A single `RwLock` guards both the id counter and the entries, so create,
//! lookup and close are each atomic with respect to one another. Every entry
//! remembers its concrete type; presenting a handle of the wrong kind is
//! indistinguishable from presenting an unknown one.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::bundle::SourceBundle;
use crate::cache::ProviderCache;
use crate::lockfile::LockSet;

/// A resource type that can live in a [`HandleTable`].
pub trait HandleKind: Any + Send + Sync {
    /// Human-readable kind, used in error messages.
    const NAME: &'static str;
}

impl HandleKind for SourceBundle {
    const NAME: &'static str = "source bundle";
}

impl HandleKind for LockSet {
    const NAME: &'static str = "dependency locks";
}

impl HandleKind for ProviderCache {
    const NAME: &'static str = "provider plugin cache";
}

/// Returned when a handle is unknown, already closed, or of another kind.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid {kind} handle")]
pub struct InvalidHandle {
    /// The kind the caller expected.
    pub kind: &'static str,
}

/// Opaque reference to a `T` stored in a [`HandleTable`].
///
/// The wire form is a plain `i64`; zero never refers to a resource.
pub struct Handle<T> {
    id: i64,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Reinterpret a wire value as a handle of this kind.
    ///
    /// No validation happens here; the table rejects unknown ids on use.
    pub fn from_wire(id: i64) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }

    /// The wire value.
    pub fn to_wire(self) -> i64 {
        self.id
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: HandleKind> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({})", T::NAME, self.id)
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

struct Inner {
    next: i64,
    entries: HashMap<i64, Entry>,
}

/// Process-wide registry mapping handles to live resources.
pub struct HandleTable {
    inner: RwLock<Inner>,
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("open", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    /// An empty table. The first handle issued is `1`.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next: 1,
                entries: HashMap::new(),
            }),
        }
    }

    /// Store `resource` and return a fresh handle for it.
    pub fn create<T: HandleKind>(&self, resource: Arc<T>) -> Handle<T> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next;
        inner.next += 1;
        inner.entries.insert(id, resource);
        Handle::from_wire(id)
    }

    /// Look up the resource behind `handle`, if it is open and of kind `T`.
    pub fn get<T: HandleKind>(&self, handle: Handle<T>) -> Option<Arc<T>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let entry = inner.entries.get(&handle.id)?.clone();
        drop(inner);
        entry.downcast::<T>().ok()
    }

    /// Close `handle`. Succeeds at most once per handle.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidHandle`] if the handle is unknown, already closed, or
    /// refers to a resource of another kind. The table is unchanged in that
    /// case.
    pub fn close<T: HandleKind>(&self, handle: Handle<T>) -> Result<(), InvalidHandle> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.entries.get(&handle.id) {
            Some(entry) if entry.is::<T>() => {
                inner.entries.remove(&handle.id);
                Ok(())
            }
            _ => Err(InvalidHandle { kind: T::NAME }),
        }
    }

    /// Number of open handles across all kinds.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Returns `true` if no handles are open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn new_source_bundle(&self, bundle: SourceBundle) -> Handle<SourceBundle> {
        self.create(Arc::new(bundle))
    }

    pub fn source_bundle(&self, handle: Handle<SourceBundle>) -> Option<Arc<SourceBundle>> {
        self.get(handle)
    }

    pub fn close_source_bundle(&self, handle: Handle<SourceBundle>) -> Result<(), InvalidHandle> {
        self.close(handle)
    }

    pub fn new_dependency_locks(&self, locks: LockSet) -> Handle<LockSet> {
        self.create(Arc::new(locks))
    }

    pub fn dependency_locks(&self, handle: Handle<LockSet>) -> Option<Arc<LockSet>> {
        self.get(handle)
    }

    pub fn close_dependency_locks(&self, handle: Handle<LockSet>) -> Result<(), InvalidHandle> {
        self.close(handle)
    }

    pub fn new_provider_plugin_cache(&self, cache: ProviderCache) -> Handle<ProviderCache> {
        self.create(Arc::new(cache))
    }

    pub fn provider_plugin_cache(&self, handle: Handle<ProviderCache>) -> Option<Arc<ProviderCache>> {
        self.get(handle)
    }

    pub fn close_provider_plugin_cache(
        &self,
        handle: Handle<ProviderCache>,
    ) -> Result<(), InvalidHandle> {
        self.close(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug, PartialEq)]
    struct Alpha(u32);
    impl HandleKind for Alpha {
        const NAME: &'static str = "alpha";
    }

    #[derive(Debug, PartialEq)]
    struct Beta(&'static str);
    impl HandleKind for Beta {
        const NAME: &'static str = "beta";
    }

    #[test]
    fn create_lookup_close() {
        let table = HandleTable::new();
        let h = table.create(Arc::new(Alpha(7)));
        assert_ne!(h.to_wire(), 0);
        assert_eq!(*table.get(h).unwrap(), Alpha(7));

        table.close(h).unwrap();
        assert!(table.get(h).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn close_succeeds_exactly_once() {
        let table = HandleTable::new();
        let h = table.create(Arc::new(Alpha(1)));
        assert!(table.close(h).is_ok());
        assert_eq!(table.close(h), Err(InvalidHandle { kind: "alpha" }));
    }

    #[test]
    fn foreign_kind_is_rejected_without_side_effects() {
        let table = HandleTable::new();
        let a = table.create(Arc::new(Alpha(3)));

        let forged: Handle<Beta> = Handle::from_wire(a.to_wire());
        assert!(table.get(forged).is_none());
        assert_eq!(table.close(forged), Err(InvalidHandle { kind: "beta" }));

        // The alpha resource is untouched.
        assert_eq!(*table.get(a).unwrap(), Alpha(3));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_and_zero_handles() {
        let table = HandleTable::new();
        assert!(table.get(Handle::<Alpha>::from_wire(0)).is_none());
        assert!(table.close(Handle::<Alpha>::from_wire(42)).is_err());
    }

    #[test]
    fn ids_are_unique_across_kinds() {
        let table = HandleTable::new();
        let a = table.create(Arc::new(Alpha(1)));
        let b = table.create(Arc::new(Beta("x")));
        assert_ne!(a.to_wire(), b.to_wire());
    }

    #[test]
    fn concurrent_create_and_close() {
        let table = Arc::new(HandleTable::new());
        let workers: Vec<_> = (0..8)
            .map(|w| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..200 {
                        let h = table.create(Arc::new(Alpha(w * 1000 + i)));
                        assert_eq!(table.get(h).unwrap().0, w * 1000 + i);
                        table.close(h).unwrap();
                        assert!(table.close(h).is_err());
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert!(table.is_empty());
    }
}
