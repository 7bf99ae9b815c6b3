//! Binding table pool
//!
//! Binding tables come from fixed-capacity arenas (descriptor pools). The
//! pool tries every arena in turn and grows by one arena when all of them
//! are exhausted. Each allocation is recorded in a side map so its tables
//! can be returned to the arena they came from once the reclaimer proves
//! they are no longer in flight.

use std::collections::HashMap;

use crate::config::ArenaConfig;
use crate::render::backend::GpuBackend;
use crate::render::error::{RenderError, RenderResult};
use crate::render::resources::retirement::RetirementList;

/// Identity of one arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaId(u32);

/// Identity of one table allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationId(u64);

/// Tables allocated together for one shader stage
#[derive(Debug)]
pub struct BindingTableArray<B: GpuBackend> {
    id: AllocationId,
    tables: Vec<B::BindingTable>,
}

impl<B: GpuBackend> BindingTableArray<B> {
    /// Allocation identity
    pub const fn id(&self) -> AllocationId {
        self.id
    }

    /// Tables in set order
    pub fn tables(&self) -> &[B::BindingTable] {
        &self.tables
    }
}

#[derive(Debug)]
struct Arena<B: GpuBackend> {
    id: ArenaId,
    raw: B::Arena,
}

/// Growable collection of descriptor arenas with deferred frees
#[derive(Debug)]
pub struct BindingTablePool<B: GpuBackend> {
    capacity: ArenaConfig,
    arenas: Vec<Arena<B>>,
    owners: HashMap<AllocationId, ArenaId>,
    retired: RetirementList<BindingTableArray<B>>,
    next_arena: u32,
    next_allocation: u64,
}

impl<B: GpuBackend> BindingTablePool<B> {
    /// Create a pool whose arenas have `capacity`
    pub fn new(capacity: ArenaConfig) -> Self {
        Self {
            capacity,
            arenas: Vec::new(),
            owners: HashMap::new(),
            retired: RetirementList::new(),
            next_arena: 0,
            next_allocation: 0,
        }
    }

    /// Allocate one table per layout from the first arena with room
    pub fn allocate(&mut self, backend: &mut B, layouts: &[B::SetLayout]) -> RenderResult<BindingTableArray<B>> {
        if layouts.is_empty() {
            return Err(RenderError::invalid("binding table allocation without layouts"));
        }

        let found = self.arenas.iter_mut().find_map(|arena| {
            backend
                .allocate_tables(&mut arena.raw, layouts)
                .map(|tables| (arena.id, tables))
        });
        if let Some((arena_id, tables)) = found {
            return Ok(self.record(arena_id, tables));
        }

        let raw = backend
            .create_arena(&self.capacity)
            .map_err(|e| RenderError::exhausted(format!("failed to create arena: {e}")))?;
        let id = ArenaId(self.next_arena);
        self.next_arena += 1;
        log::debug!(
            "Created binding arena {:?} ({} tables), {} arenas total",
            id,
            self.capacity.max_tables,
            self.arenas.len() + 1
        );

        // Newest arena first, it is the one most likely to have room
        self.arenas.insert(0, Arena { id, raw });
        let tables = backend
            .allocate_tables(&mut self.arenas[0].raw, layouts)
            .ok_or_else(|| RenderError::exhausted(format!("fresh arena cannot hold {} tables", layouts.len())))?;
        Ok(self.record(id, tables))
    }

    fn record(&mut self, arena: ArenaId, tables: Vec<B::BindingTable>) -> BindingTableArray<B> {
        let id = AllocationId(self.next_allocation);
        self.next_allocation += 1;
        self.owners.insert(id, arena);
        BindingTableArray { id, tables }
    }

    /// Hand tables to the reclaimer
    pub fn release(&mut self, array: BindingTableArray<B>, frame_tag: u64) {
        self.retired.push(array, frame_tag, None);
    }

    /// Free retired tables that can no longer be referenced by in-flight frames
    ///
    /// Tables whose arena record is missing are dropped without a free.
    pub fn collect(&mut self, backend: &mut B, frame_tag: u64, ring_size: u64) -> usize {
        let expired = self
            .retired
            .drain_expired(frame_tag, ring_size, std::time::Instant::now(), None);
        let count = expired.len();

        for entry in expired {
            let array = entry.resource;
            let Some(arena_id) = self.owners.remove(&array.id) else {
                log::warn!("Binding tables {:?} have no arena record, dropping", array.id);
                continue;
            };
            match self.arenas.iter_mut().find(|arena| arena.id == arena_id) {
                Some(arena) => {
                    backend.free_tables(&mut arena.raw, &array.tables);
                    log::trace!("Freed binding tables {:?} to arena {:?}", array.id, arena_id);
                }
                None => log::warn!("Arena {:?} of binding tables {:?} is gone", arena_id, array.id),
            }
        }
        count
    }

    /// Number of arenas
    pub fn arena_count(&self) -> usize {
        self.arenas.len()
    }

    /// Number of allocations not yet returned to an arena
    pub fn live_allocations(&self) -> usize {
        self.owners.len()
    }

    /// Number of allocations waiting in the reclaimer
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Arena capacity
    pub const fn capacity(&self) -> &ArenaConfig {
        &self.capacity
    }

    /// Destroy every arena; only valid once the device is idle
    pub fn destroy_all(&mut self, backend: &mut B) {
        self.retired.drain_all();
        self.owners.clear();
        for arena in self.arenas.drain(..) {
            backend.destroy_arena(arena.raw);
        }
    }

    #[cfg(test)]
    pub(crate) fn forget_owner(&mut self, id: AllocationId) {
        self.owners.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::ShaderSource;
    use crate::render::backends::headless::{HeadlessBackend, HeadlessConfig};
    use crate::render::types::{BindingDecl, BindingKind, ShaderStage, CONTENT_BINDING};

    fn content_layouts(backend: &mut HeadlessBackend) -> Vec<<HeadlessBackend as GpuBackend>::SetLayout> {
        let bindings = [
            BindingDecl::new(CONTENT_BINDING, BindingKind::SampledImage, 0, 0),
            BindingDecl::new("pointSampler", BindingKind::Sampler, 0, 1),
        ];
        let source = ShaderSource {
            name: "test_fragment.spv",
            stage: ShaderStage::Fragment,
            code: &[0x0723_0203],
            bindings: &bindings,
        };
        backend.create_shader(&source).unwrap().1
    }

    fn small_arena() -> ArenaConfig {
        ArenaConfig {
            max_tables: 2,
            samplers: 2,
            sampled_images: 2,
        }
    }

    #[test]
    fn test_grows_when_exhausted() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let layouts = content_layouts(&mut backend);
        let mut pool = BindingTablePool::new(small_arena());

        let arrays: Vec<_> = (0..5).map(|_| pool.allocate(&mut backend, &layouts).unwrap()).collect();

        assert_eq!(pool.arena_count(), 3);
        assert_eq!(pool.live_allocations(), 5);
        assert_eq!(backend.stats().arenas_created, 3);
        assert_eq!(arrays[0].tables().len(), 1);
    }

    #[test]
    fn test_release_defers_free() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let layouts = content_layouts(&mut backend);
        let mut pool = BindingTablePool::new(small_arena());

        let array = pool.allocate(&mut backend, &layouts).unwrap();
        pool.release(array, 4);

        assert_eq!(pool.collect(&mut backend, 7, 3), 0);
        assert_eq!(backend.stats().tables_freed, 0);
        assert_eq!(pool.collect(&mut backend, 8, 3), 1);
        assert_eq!(backend.stats().tables_freed, 1);
        assert_eq!(pool.live_allocations(), 0);
        assert_eq!(pool.retired_count(), 0);
    }

    #[test]
    fn test_freed_tables_are_reused_by_arena() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let layouts = content_layouts(&mut backend);
        let mut pool = BindingTablePool::new(small_arena());

        let first = pool.allocate(&mut backend, &layouts).unwrap();
        let _second = pool.allocate(&mut backend, &layouts).unwrap();
        pool.release(first, 0);
        pool.collect(&mut backend, 4, 3);

        let _third = pool.allocate(&mut backend, &layouts).unwrap();
        assert_eq!(pool.arena_count(), 1);
    }

    #[test]
    fn test_missing_arena_record_drops_entry() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let layouts = content_layouts(&mut backend);
        let mut pool = BindingTablePool::new(small_arena());

        let array = pool.allocate(&mut backend, &layouts).unwrap();
        pool.forget_owner(array.id());
        pool.release(array, 0);

        assert_eq!(pool.collect(&mut backend, 10, 3), 1);
        assert_eq!(pool.retired_count(), 0);
        assert_eq!(backend.stats().tables_freed, 0);
    }

    #[test]
    fn test_arena_creation_failure_is_exhaustion() {
        let mut backend = HeadlessBackend::new(HeadlessConfig {
            fail_arena_creation: true,
            ..HeadlessConfig::default()
        });
        let layouts = content_layouts(&mut backend);
        let mut pool = BindingTablePool::new(small_arena());

        let result = pool.allocate(&mut backend, &layouts);
        assert!(matches!(result, Err(RenderError::AllocationExhausted { .. })));
    }

    #[test]
    fn test_oversized_request_on_fresh_arena() {
        let mut backend = HeadlessBackend::new(HeadlessConfig::default());
        let layouts = content_layouts(&mut backend);
        let mut pool = BindingTablePool::new(ArenaConfig {
            max_tables: 1,
            samplers: 1,
            sampled_images: 1,
        });

        let too_many = [layouts[0], layouts[0]];
        let result = pool.allocate(&mut backend, &too_many);
        assert!(matches!(result, Err(RenderError::AllocationExhausted { .. })));
    }
}
