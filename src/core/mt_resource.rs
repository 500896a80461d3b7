use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A thread-safe, reference-counted resource container with read-write locking.
///
/// `MtResource` is how data that is *mutated on the tick thread* but *read from
/// worker threads* is shared: the voxel world (read by off-thread detection),
/// a vessel's voxel set (read by persistence or network code while the tick
/// thread edits it).
///
/// # Examples
///
/// ```
/// use vessel_engine::core::MtResource;
///
/// let counter = MtResource::new(0);
/// let worker_view = counter.clone();
///
/// let handle = std::thread::spawn(move || *worker_view.get());
/// *counter.get_mut() += 1;
/// let seen = handle.join().unwrap();
/// assert!(seen == 0 || seen == 1);
/// ```
///
/// # Locking
/// - Read guards (`get()`) can be held concurrently by any number of threads
/// - The write guard (`get_mut()`) is exclusive; keep tick-thread writes short
/// - A poisoned lock is recovered rather than propagated: the protected data is
///   plain state with no cross-field invariant a panicking writer could break
///   half-way
pub struct MtResource<T: Send + Sync> {
    pub resource: Arc<RwLock<T>>,
}

impl<T: Send + Sync + 'static> MtResource<T> {
    /// Creates a new `MtResource` containing the given value.
    pub fn new(resource: T) -> Self {
        Self {
            resource: Arc::new(RwLock::new(resource)),
        }
    }

    /// Returns a read-only guard over the contained value.
    pub fn get(&self) -> RwLockReadGuard<'_, T> {
        self.resource.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns an exclusive guard over the contained value.
    pub fn get_mut(&self) -> RwLockWriteGuard<'_, T> {
        self.resource.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if both handles point at the same shared value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
    }
}

impl<T: Send + Sync> Clone for MtResource<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
        }
    }
}
