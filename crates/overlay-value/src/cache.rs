//! Singleton-per-address cache of aliasing handles.
//!
//! An address may hold one entry per unrelated class, since a class and its
//! first embedded member share an address. An entry stays while anything
//! outside the cache holds its handle. A sweep that finds the cache holding
//! the only reference starts the entry's idle clock; once that clock reaches
//! the configured delay, a later sweep drops it.
use crate::{layout::ClassLayout, object::ObjectRef};
use overlay_utils::{Clock, NativeAddress};
use std::{
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::trace;

struct CacheEntry {
    handle: ObjectRef,
    unreferenced_since: Option<Instant>,
}

impl CacheEntry {
    fn new(handle: ObjectRef) -> Self {
        Self {
            handle,
            unreferenced_since: None,
        }
    }

    /// Advances the idle clock and reports whether the entry has expired.
    fn expired(&mut self, now: Instant, delay: Duration) -> bool {
        if Rc::strong_count(&self.handle) > 1 {
            self.unreferenced_since = None;
            return false;
        }
        let since = *self.unreferenced_since.get_or_insert(now);
        now.saturating_duration_since(since) >= delay
    }
}

/// Result of [`AddressCache::get_or_insert_with`].
#[derive(Debug)]
pub struct CacheLookup {
    pub handle: ObjectRef,
    pub hit: bool,
    /// Entries evicted by the sweep that ran before the lookup.
    pub evicted: usize,
}

pub struct AddressCache {
    entries: RefCell<HashMap<NativeAddress, Vec<CacheEntry>>>,
    delay: Duration,
    clock: Arc<dyn Clock>,
}

impl AddressCache {
    pub fn new(delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            delay,
            clock,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of cached handles across all addresses.
    pub fn len(&self) -> usize {
        self.entries.borrow().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn contains(&self, address: NativeAddress) -> bool {
        self.entries.borrow().contains_key(&address)
    }

    /// Drops every entry that has been unreferenced for at least the delay.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let delay = self.delay;
        let mut evicted = 0;
        self.entries.borrow_mut().retain(|address, slot| {
            slot.retain_mut(|entry| {
                let expired = entry.expired(now, delay);
                if expired {
                    trace!(%address, class = entry.handle.layout().name(), "evicting cached handle");
                    evicted += 1;
                }
                !expired
            });
            !slot.is_empty()
        });
        evicted
    }

    /// Returns the handle cached for `address` whose class is `declared` or
    /// derives from it, or caches the one built by `make`.
    pub fn get_or_insert_with<E>(
        &self,
        address: NativeAddress,
        declared: &ClassLayout,
        make: impl FnOnce() -> Result<ObjectRef, E>,
    ) -> Result<CacheLookup, E> {
        let evicted = self.sweep();

        if let Some(slot) = self.entries.borrow_mut().get_mut(&address) {
            if let Some(entry) = slot
                .iter_mut()
                .find(|e| e.handle.layout().is_subclass_of(declared))
            {
                entry.unreferenced_since = None;
                return Ok(CacheLookup {
                    handle: entry.handle.clone(),
                    hit: true,
                    evicted,
                });
            }
        }

        // `make` may wrap other addresses (e.g. while resolving a subclass),
        // so no borrow is held across it.
        let handle = make()?;
        self.entries
            .borrow_mut()
            .entry(address)
            .or_default()
            .push(CacheEntry::new(handle.clone()));
        Ok(CacheLookup {
            handle,
            hit: false,
            evicted,
        })
    }

    /// Forgets `address`; outstanding handles stay valid.
    pub fn invalidate(&self, address: NativeAddress) -> bool {
        self.entries.borrow_mut().remove(&address).is_some()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}
