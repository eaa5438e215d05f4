//! Reference counted deferred destruction of opaque resources.
//!
//! The [`Disposer`] is the handoff primitive between components that produce resources (the
//! staging pool, upload paths) and the command buffers that consume them. A resource is
//! registered once with a destructor closure, reference counted while command buffers hold on
//! to it, and moved to a graveyard when the count reaches zero. The destructor only runs when
//! [`gc`](Disposer::gc) is called, which the owning driver does once it knows no submitted GPU
//! work references the resource anymore. Dropping the count to zero is cheap and synchronous;
//! destruction is batched and deferred.
//!
//! This is explicitly not a lock: the whole crate is single threaded with respect to command
//! recording, and the refcount only expresses ownership handoff, not synchronization.

use std::collections::{HashMap, HashSet};

use ash::vk::Handle;

/// Identity of a disposable resource. Any stable 64 bit identity works; Vulkan handles
/// convert directly.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct DisposerKey(u64);

impl DisposerKey {
    /// The "no resource" sentinel. [`Disposer::acquire`] treats it as a no-op.
    pub const NULL: DisposerKey = DisposerKey(0);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn from_handle<H: Handle>(handle: H) -> Self {
        Self(handle.as_raw())
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Set of disposables referenced by one command buffer. Populated through
/// [`Disposer::acquire`] and emptied through [`Disposer::release`] when the buffer's
/// execution has completed.
pub type ResourceSet = HashSet<DisposerKey>;

struct Disposable {
    ref_count: u32,
    destructor: Option<Box<dyn FnOnce()>>,
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("ref_count", &self.ref_count)
            .finish()
    }
}

/// Registry of refcounted resources with deferred, batched destruction.
#[derive(Debug, Default)]
pub struct Disposer {
    live: HashMap<DisposerKey, Disposable>,
    graveyard: Vec<Disposable>,
}

impl Disposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` with a reference count of 1 and the given destructor.
    ///
    /// Panics if `key` is already registered; registering the same identity twice is a bug in
    /// the calling driver.
    pub fn create_disposable<F: FnOnce() + 'static>(&mut self, key: DisposerKey, destructor: F) {
        let previous = self.live.insert(
            key,
            Disposable {
                ref_count: 1,
                destructor: Some(Box::new(destructor)),
            },
        );
        assert!(previous.is_none(), "disposable registered twice: {key:?}");
    }

    /// Increment the reference count of a registered resource.
    pub fn add_reference(&mut self, key: DisposerKey) {
        let disposable = self
            .live
            .get_mut(&key)
            .unwrap_or_else(|| panic!("add_reference on unknown disposable {key:?}"));
        assert!(disposable.ref_count > 0);
        disposable.ref_count += 1;
    }

    /// Decrement the reference count; at zero the resource moves to the graveyard, awaiting
    /// the next [`gc`](Self::gc).
    pub fn remove_reference(&mut self, key: DisposerKey) {
        let disposable = self
            .live
            .get_mut(&key)
            .unwrap_or_else(|| panic!("remove_reference on unknown disposable {key:?}"));
        assert!(disposable.ref_count > 0);
        disposable.ref_count -= 1;
        if disposable.ref_count == 0 {
            let disposable = self.live.remove(&key).unwrap();
            self.graveyard.push(disposable);
        }
    }

    /// Make `set` hold a reference to `key`. No-op when the set already holds one, and no-op
    /// for [`DisposerKey::NULL`] ("no resource"). This is how a command buffer tracks every
    /// resource it references.
    pub fn acquire(&mut self, key: DisposerKey, set: &mut ResourceSet) {
        if key.is_null() {
            return;
        }
        if set.insert(key) {
            self.add_reference(key);
        }
    }

    /// Drop every reference held by `set` and empty it. Called when the owning command
    /// buffer's execution has completed.
    pub fn release(&mut self, set: &mut ResourceSet) {
        for key in set.drain() {
            let disposable = self
                .live
                .get_mut(&key)
                .unwrap_or_else(|| panic!("release of unknown disposable {key:?}"));
            assert!(disposable.ref_count > 0);
            disposable.ref_count -= 1;
            if disposable.ref_count == 0 {
                let disposable = self.live.remove(&key).unwrap();
                self.graveyard.push(disposable);
            }
        }
    }

    /// Invoke every graveyard entry's destructor and clear the graveyard.
    ///
    /// The caller guarantees no outstanding GPU work references the condemned resources; the
    /// disposer has no way to verify this itself.
    pub fn gc(&mut self) {
        for mut disposable in self.graveyard.drain(..) {
            if let Some(destructor) = disposable.destructor.take() {
                destructor();
            }
        }
    }

    /// Flush the graveyard, then assert every call site has released its references.
    ///
    /// Panics if resources are still live; that means a command buffer's resource set was
    /// never released.
    pub fn reset(&mut self) {
        self.gc();
        assert!(
            self.live.is_empty(),
            "disposer reset with {} live resources",
            self.live.len()
        );
    }

    /// Shutdown variant of [`reset`](Self::reset): force-destroys still-live entries instead
    /// of asserting. Logs how many references were dropped on the floor.
    pub fn reset_force(&mut self) {
        if !self.live.is_empty() {
            warn!(
                "disposer shutdown with {} live resources, force destroying",
                self.live.len()
            );
        }
        for (_, disposable) in self.live.drain() {
            self.graveyard.push(disposable);
        }
        self.gc();
    }

    #[cfg(test)]
    fn graveyard_len(&self) -> usize {
        self.graveyard.len()
    }
}
