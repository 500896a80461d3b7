use std::{
    cell::{Ref, RefCell, RefMut},
    rc::Rc,
};

/// A single-threaded, reference-counted resource with interior mutability.
///
/// `StResource` backs state that must only ever be touched from the tick
/// thread, such as the queue of tick-boundary continuations. Because it is
/// built on `Rc` it is neither `Send` nor `Sync`: anything holding one is
/// pinned to the thread that created it, which is exactly the affinity the
/// tick queue needs.
///
/// # Examples
/// ```
/// use vessel_engine::core::StResource;
///
/// let queue = StResource::new(Vec::new());
/// let producer = queue.clone();
/// producer.get_mut().push("continuation");
/// assert_eq!(queue.get().len(), 1);
/// ```
///
/// # Panics
/// Panics if a guard is requested while an incompatible guard is alive on the
/// same thread (a re-entrant borrow). Callers drain the queue into a local
/// buffer before running anything that could re-enter.
pub struct StResource<T> {
    pub resource: Rc<RefCell<T>>,
}

impl<T> StResource<T> {
    /// Creates a new `StResource` containing the given value.
    pub fn new(resource: T) -> Self {
        Self {
            resource: Rc::new(RefCell::new(resource)),
        }
    }

    /// Returns a read-only guard over the contained value.
    pub fn get(&self) -> Ref<'_, T> {
        self.resource.borrow()
    }

    /// Returns a mutable guard over the contained value.
    pub fn get_mut(&self) -> RefMut<'_, T> {
        self.resource.borrow_mut()
    }
}

impl<T> Clone for StResource<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
        }
    }
}
