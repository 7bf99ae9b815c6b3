//! Frame-tag based deferred free lists
//!
//! A resource handed back by its owner may still be referenced by command
//! lists that are in flight. It is parked here with the frame tag at which
//! it was released and only handed out for destruction once every frame
//! that could have referenced it has been confirmed complete.

use std::time::{Duration, Instant};

/// Frame tag from which a resource released at `release_tag` may be freed
pub const fn retirement_deadline(release_tag: u64, ring_size: u64) -> u64 {
    release_tag + ring_size + 1
}

/// True once a resource released at `release_tag` can no longer be in flight
pub const fn is_retired(release_tag: u64, frame_tag: u64, ring_size: u64) -> bool {
    frame_tag >= retirement_deadline(release_tag, ring_size)
}

/// True once a binding table set last submitted at `fence_tag` may be rewritten
pub const fn is_reusable(fence_tag: u64, frame_tag: u64, ring_size: u64) -> bool {
    frame_tag > retirement_deadline(fence_tag, ring_size)
}

/// A released resource awaiting destruction or reuse
#[derive(Debug)]
pub struct Retired<T> {
    /// The resource
    pub resource: T,
    /// Frame tag at release
    pub release_tag: u64,
    /// Wall-clock time at release, for resources with an idle threshold
    pub release_time: Option<Instant>,
}

/// Deferred free list
#[derive(Debug)]
pub struct RetirementList<T> {
    entries: Vec<Retired<T>>,
}

impl<T> Default for RetirementList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RetirementList<T> {
    /// Create an empty list
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Park a released resource
    pub fn push(&mut self, resource: T, release_tag: u64, release_time: Option<Instant>) {
        self.entries.push(Retired {
            resource,
            release_tag,
            release_time,
        });
    }

    /// Remove and return the first resource matching `predicate`, regardless of age
    pub fn take_first(&mut self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        let index = self.entries.iter().position(|entry| predicate(&entry.resource))?;
        Some(self.entries.swap_remove(index).resource)
    }

    /// Remove every entry whose deadline has passed
    ///
    /// With `min_idle`, an entry must also have been released at least that
    /// long before `now`.
    pub fn drain_expired(
        &mut self,
        frame_tag: u64,
        ring_size: u64,
        now: Instant,
        min_idle: Option<Duration>,
    ) -> Vec<Retired<T>> {
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| {
                let idle_enough = match (min_idle, entry.release_time) {
                    (Some(min_idle), Some(released)) => now.saturating_duration_since(released) >= min_idle,
                    _ => true,
                };
                is_retired(entry.release_tag, frame_tag, ring_size) && idle_enough
            });
        self.entries = kept;
        expired
    }

    /// Remove every entry regardless of deadline
    pub fn drain_all(&mut self) -> Vec<Retired<T>> {
        std::mem::take(&mut self.entries)
    }

    /// Number of parked resources
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is parked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over parked entries
    pub fn iter(&self) -> impl Iterator<Item = &Retired<T>> {
        self.entries.iter()
    }
}
