//! Frame pacing
//!
//! One [`FrameSlot`] per presentation image holds the fence, semaphores and
//! command lists of that slot. A frame starts with a non-blocking poll of
//! the slot's fence: if the GPU has not finished the frame that last used
//! the slot, the whole cycle is deferred. Once the fence is signaled the
//! reclaimer frees everything retired long enough ago, then the frame is
//! recorded, submitted along the semaphore chain and presented.
//!
//! Per slot the chain is `image_available` → capture submission →
//! `capture_ready` → copy and draw submission → `render_finished` → present,
//! with the slot fence signaled by the second submission.
//!
//! The fence is only reset right before the submission that signals it. A
//! frame that fails after its image was acquired is abandoned: an empty
//! fenced submission consumes `image_available` and re-arms the fence, so the
//! slot is usable on the next call.

use std::time::Instant;

use crate::config::SyncStrategy;
use crate::render::backend::{GpuBackend, Submission, WaitStage};
use crate::render::context::RenderContext;
use crate::render::error::RenderResult;

/// Outcome of one call to the frame loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and presented
    Presented {
        /// Tag of the presented frame
        frame_tag: u64,
        /// Presentation image used
        image_index: u32,
    },
    /// The slot's previous frame is still executing; nothing was done
    Deferred,
}

impl FrameStatus {
    /// True if a frame was presented
    pub const fn is_presented(&self) -> bool {
        matches!(self, Self::Presented { .. })
    }
}

/// Command lists of one slot
#[derive(Debug, Clone, Copy)]
pub struct FrameCommands<C> {
    /// Content capture into staging, run by the capture stage
    pub capture: C,
    /// Background copy
    pub copy: C,
    /// Output render pass
    pub draw: C,
}

/// Synchronization primitives and command lists of one ring slot
#[derive(Debug)]
pub struct FrameSlot<B: GpuBackend> {
    in_flight: B::Fence,
    image_available: B::Semaphore,
    capture_ready: B::Semaphore,
    render_finished: B::Semaphore,
    commands: FrameCommands<B::CommandList>,
    // False once the fence was reset without a signaling submission
    armed: bool,
    // Frame whose work the fence tracks
    submitted_tag: Option<u64>,
}

impl<B: GpuBackend> FrameSlot<B> {
    fn new(backend: &mut B) -> RenderResult<Self> {
        Ok(Self {
            // Signaled so the first use of each slot does not wait
            in_flight: backend.create_fence(true)?,
            image_available: backend.create_semaphore(false)?,
            capture_ready: backend.create_semaphore(true)?,
            render_finished: backend.create_semaphore(false)?,
            commands: FrameCommands {
                capture: backend.allocate_command_list()?,
                copy: backend.allocate_command_list()?,
                draw: backend.allocate_command_list()?,
            },
            armed: true,
            submitted_tag: None,
        })
    }

    /// Command lists of the slot
    pub const fn commands(&self) -> FrameCommands<B::CommandList> {
        self.commands
    }

    /// Semaphore the capture stage signals when its writes are done
    pub const fn capture_ready(&self) -> &B::Semaphore {
        &self.capture_ready
    }

    /// Fence signaled when the slot's frame completes
    pub const fn in_flight(&self) -> &B::Fence {
        &self.in_flight
    }

    fn destroy(self, backend: &mut B) {
        backend.destroy_fence(self.in_flight);
        backend.destroy_semaphore(self.image_available);
        backend.destroy_semaphore(self.capture_ready);
        backend.destroy_semaphore(self.render_finished);
        backend.free_command_list(self.commands.capture);
        backend.free_command_list(self.commands.copy);
        backend.free_command_list(self.commands.draw);
    }
}

/// Ring of frames in flight
#[derive(Debug)]
pub struct FramePacer<B: GpuBackend> {
    slots: Vec<FrameSlot<B>>,
    current: usize,
    strategy: SyncStrategy,
    deferred: u64,
    abandoned: u64,
}

impl<B: GpuBackend> FramePacer<B> {
    /// Create one slot per presentation image
    pub fn new(backend: &mut B, strategy: SyncStrategy) -> RenderResult<Self> {
        let count = backend.image_count().max(1);
        let slots = (0..count)
            .map(|_| FrameSlot::new(backend))
            .collect::<RenderResult<Vec<_>>>()?;
        log::debug!("Frame pacer: {} slots, {:?}", count, strategy);
        Ok(Self {
            slots,
            current: 0,
            strategy,
            deferred: 0,
            abandoned: 0,
        })
    }

    /// Poll the current slot and, if it is free, reclaim and acquire an image
    ///
    /// Returns `None` when the slot's previous frame is still executing.
    pub fn begin_frame(&mut self, ctx: &mut RenderContext<B>) -> RenderResult<Option<u32>> {
        let slot = &self.slots[self.current];
        if slot.armed && !ctx.backend.poll_fence(&slot.in_flight)? {
            self.deferred += 1;
            log::trace!("Slot {} still in flight, deferring frame {}", self.current, ctx.frame_tag);
            return Ok(None);
        }
        if slot.submitted_tag > ctx.completed_frame {
            ctx.completed_frame = slot.submitted_tag;
        }

        let now = Instant::now();
        let textures = ctx.textures.sweep(&mut ctx.backend, ctx.frame_tag, ctx.ring_size, now);
        let tables = ctx.tables.collect(&mut ctx.backend, ctx.frame_tag, ctx.ring_size);
        if textures + tables > 0 {
            log::debug!(
                "Frame {}: reclaimed {} textures and {} binding table arrays",
                ctx.frame_tag,
                textures,
                tables
            );
        }

        ctx.frame_time = now;
        let image_index = ctx.backend.acquire_image(&slot.image_available)?;
        Ok(Some(image_index))
    }

    /// Submit the recorded frame along the semaphore chain and present it
    ///
    /// A failed submission abandons the frame. Once the fenced submission
    /// went through the frame counts as issued, so the ring and the frame tag
    /// advance even if presenting fails.
    pub fn submit_and_present(&mut self, ctx: &mut RenderContext<B>, image_index: u32) -> RenderResult<FrameStatus> {
        let mut image_consumed = false;
        if let Err(err) = self.submit_frame(ctx, &mut image_consumed) {
            if let Err(rearm) = self.rearm(ctx, !image_consumed) {
                log::error!("Could not abandon frame {}: {}", ctx.frame_tag, rearm);
            }
            return Err(err);
        }

        let presented = ctx
            .backend
            .present(image_index, &self.slots[self.current].render_finished);

        let frame_tag = ctx.frame_tag;
        self.current = (self.current + 1) % self.slots.len();
        ctx.frame_tag += 1;
        presented?;

        if self.strategy == SyncStrategy::WaitIdle {
            ctx.backend.wait_idle()?;
            ctx.completed_frame = Some(frame_tag);
        }

        Ok(FrameStatus::Presented {
            frame_tag,
            image_index,
        })
    }

    fn submit_frame(&mut self, ctx: &mut RenderContext<B>, image_consumed: &mut bool) -> RenderResult<()> {
        let slot = &self.slots[self.current];
        let commands = slot.commands;

        ctx.backend.submit(&Submission {
            commands: &[commands.capture],
            waits: &[(&slot.image_available, WaitStage::ColorOutput)],
            signals: &[&slot.capture_ready],
            fence: None,
        })?;
        *image_consumed = true;

        if self.strategy == SyncStrategy::WaitIdle {
            ctx.backend.wait_idle()?;
        }

        ctx.backend.reset_fence(&slot.in_flight)?;
        self.slots[self.current].armed = false;

        let slot = &self.slots[self.current];
        ctx.backend.submit(&Submission {
            commands: &[commands.copy, commands.draw],
            waits: &[(&slot.capture_ready, WaitStage::AllCommands)],
            signals: &[&slot.render_finished],
            fence: Some(&slot.in_flight),
        })?;

        let slot = &mut self.slots[self.current];
        slot.armed = true;
        slot.submitted_tag = Some(ctx.frame_tag);
        Ok(())
    }

    /// Give up on a frame whose image was acquired but not presented
    ///
    /// Consumes the slot's `image_available` signal with an empty submission
    /// that also re-arms the fence. The frame tag and the current slot stay
    /// put, so the next call records the same frame again.
    pub fn abandon_frame(&mut self, ctx: &mut RenderContext<B>) -> RenderResult<()> {
        self.rearm(ctx, true)
    }

    // Empty fenced submission, waiting on `image_available` unless the capture
    // submission already consumed it
    fn rearm(&mut self, ctx: &mut RenderContext<B>, wait_image: bool) -> RenderResult<()> {
        let slot = &self.slots[self.current];
        ctx.backend.reset_fence(&slot.in_flight)?;
        self.slots[self.current].armed = false;

        let slot = &self.slots[self.current];
        let image_wait = [(&slot.image_available, WaitStage::ColorOutput)];
        let waits: &[_] = if wait_image { &image_wait } else { &[] };
        ctx.backend.submit(&Submission {
            commands: &[],
            waits,
            signals: &[],
            fence: Some(&slot.in_flight),
        })?;
        self.slots[self.current].armed = true;
        self.abandoned += 1;
        log::warn!("Abandoned frame {} on slot {}", ctx.frame_tag, self.current);
        Ok(())
    }

    pub(crate) fn abandon_or_log(&mut self, ctx: &mut RenderContext<B>) {
        if let Err(err) = self.abandon_frame(ctx) {
            log::error!("Could not abandon frame {}: {}", ctx.frame_tag, err);
        }
    }

    /// Slot being recorded
    pub fn current_slot(&self) -> &FrameSlot<B> {
        &self.slots[self.current]
    }

    /// Index of the slot being recorded
    pub const fn current_index(&self) -> usize {
        self.current
    }

    /// All slots
    pub fn slots(&self) -> &[FrameSlot<B>] {
        &self.slots
    }

    /// Synchronization strategy
    pub const fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    /// Number of deferred cycles so far
    pub const fn deferred_frames(&self) -> u64 {
        self.deferred
    }

    /// Number of frames given up after their image was acquired
    pub const fn abandoned_frames(&self) -> u64 {
        self.abandoned
    }

    /// Destroy every slot; only valid once the device is idle
    pub fn destroy(&mut self, backend: &mut B) {
        for slot in self.slots.drain(..) {
            slot.destroy(backend);
        }
    }
}
