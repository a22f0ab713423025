// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight.
//!
//! A fixed ring of [`MAX_FRAMES_IN_FLIGHT`] slots, each with an
//! image-available semaphore, a render-finished semaphore and a fence. A slot
//! is reused only after its fence has signalled, so the CPU never runs more
//! than `MAX_FRAMES_IN_FLIGHT` frames ahead of the GPU.
use crate::commands::CommandRecorder;
use crate::device::LogicalDevice;
use crate::error::{RenderError, Result, StageExt};
use crate::swapchain::Swapchain;
use ash::vk;
use tracing::trace;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Never submitted.
    Idle,
    /// Submitted and its fence not yet waited on.
    Submitted,
    /// Fence waited on; the slot's resources are free.
    Complete,
}

/// Host-side bookkeeping for the slot ring. Mirrors what the fences say.
#[derive(Clone, Debug)]
pub struct FrameRing {
    states: Vec<SlotState>,
    current: usize,
}

impl FrameRing {
    pub fn new(slots: usize) -> Self {
        FrameRing {
            states: vec![SlotState::Idle; slots.max(1)],
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// The current slot's fence has been waited on.
    pub fn mark_complete(&mut self) {
        if self.states[self.current] == SlotState::Submitted {
            self.states[self.current] = SlotState::Complete;
        }
    }

    /// The current slot's work went to the queue. Only legal once its
    /// previous submission (if any) is complete.
    pub fn mark_submitted(&mut self) -> bool {
        if self.states[self.current] == SlotState::Submitted {
            return false;
        }
        self.states[self.current] = SlotState::Submitted;
        true
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.states.len();
    }

    pub fn in_flight(&self) -> usize {
        self.states
            .iter()
            .filter(|&&s| s == SlotState::Submitted)
            .count()
    }
}

/// Semaphores and fence of one ring slot.
pub struct FrameSlot {
    device: ash::Device,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let sem_info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        // Signalled so the first wait on this slot returns immediately.
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let mut slot = FrameSlot {
            device: device.clone(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };
        slot.image_available = device
            .create_semaphore(&sem_info, None)
            .stage("create semaphore")?;
        slot.render_finished = device
            .create_semaphore(&sem_info, None)
            .stage("create semaphore")?;
        slot.in_flight = device
            .create_fence(&fence_info, None)
            .stage("create fence")?;
        Ok(slot)
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        unsafe {
            if self.in_flight != vk::Fence::null() {
                self.device.destroy_fence(self.in_flight, None);
            }
            if self.render_finished != vk::Semaphore::null() {
                self.device.destroy_semaphore(self.render_finished, None);
            }
            if self.image_available != vk::Semaphore::null() {
                self.device.destroy_semaphore(self.image_available, None);
            }
        }
    }
}

pub struct FrameSynchronizer {
    slots: Vec<FrameSlot>,
    ring: FrameRing,
}

impl FrameSynchronizer {
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSlot::new(device))
            .collect::<Result<Vec<_>>>()?;
        Ok(FrameSynchronizer {
            slots,
            ring: FrameRing::new(MAX_FRAMES_IN_FLIGHT),
        })
    }

    /// Wait, acquire, update, submit, present, advance.
    ///
    /// `update` runs after the image is known and before its command buffer
    /// is submitted; it receives the acquired image index.
    pub unsafe fn draw_frame(
        &mut self,
        device: &LogicalDevice,
        swapchain: &Swapchain,
        commands: &CommandRecorder,
        update: impl FnOnce(usize) -> Result<()>,
    ) -> Result<()> {
        let d = device.raw();
        let slot_index = self.ring.current();
        let slot = &self.slots[slot_index];

        d.wait_for_fences(std::slice::from_ref(&slot.in_flight), true, u64::MAX)
            .stage("wait for frame fence")?;
        self.ring.mark_complete();
        d.reset_fences(std::slice::from_ref(&slot.in_flight))
            .stage("reset frame fence")?;

        let (image_index, suboptimal) = swapchain
            .loader()
            .acquire_next_image(
                swapchain.handle(),
                u64::MAX,
                slot.image_available,
                vk::Fence::null(),
            )
            .stage("acquire next image")?;
        if suboptimal {
            trace!("acquired suboptimal image {image_index}");
        }

        update(image_index as usize)?;

        let cmd = commands.buffer(image_index as usize).ok_or(RenderError::failed(
            "submit draw",
            vk::Result::ERROR_UNKNOWN,
        ))?;
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &slot.render_finished,
            ..Default::default()
        };
        d.queue_submit(
            device.graphics_queue(),
            std::slice::from_ref(&submit),
            slot.in_flight,
        )
        .stage("submit draw")?;
        let accepted = self.ring.mark_submitted();
        debug_assert!(accepted, "slot {slot_index} submitted before its fence was waited on");

        let handle = swapchain.handle();
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.render_finished,
            swapchain_count: 1,
            p_swapchains: &handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        swapchain
            .loader()
            .queue_present(device.present_queue(), &present)
            .stage("present")?;

        self.ring.advance();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives the ring the way `draw_frame` does.
    fn frame(ring: &mut FrameRing) {
        ring.mark_complete();
        assert!(ring.mark_submitted());
        ring.advance();
    }

    #[test]
    fn slots_start_idle() {
        let ring = FrameRing::new(MAX_FRAMES_IN_FLIGHT);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.current(), 0);
        assert_eq!(ring.in_flight(), 0);
        assert!((0..ring.len()).all(|s| ring.state(s) == SlotState::Idle));
    }

    #[test]
    fn ring_wraps_and_bounds_in_flight() {
        let mut ring = FrameRing::new(MAX_FRAMES_IN_FLIGHT);
        let mut visited = Vec::new();
        for _ in 0..7 {
            visited.push(ring.current());
            frame(&mut ring);
            assert!(ring.in_flight() <= MAX_FRAMES_IN_FLIGHT);
        }
        assert_eq!(visited, vec![0, 1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn waiting_completes_only_the_current_slot() {
        let mut ring = FrameRing::new(2);
        frame(&mut ring);
        frame(&mut ring);
        assert_eq!(ring.in_flight(), 2);

        ring.mark_complete();
        assert_eq!(ring.state(0), SlotState::Complete);
        assert_eq!(ring.state(1), SlotState::Submitted);
        assert_eq!(ring.in_flight(), 1);
    }

    #[test]
    fn resubmitting_without_wait_is_refused() {
        let mut ring = FrameRing::new(2);
        assert!(ring.mark_submitted());
        assert!(!ring.mark_submitted());
        assert_eq!(ring.in_flight(), 1);
    }

    #[test]
    fn every_slot_accepts_a_submit_after_its_wait() {
        let mut ring = FrameRing::new(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..2 * MAX_FRAMES_IN_FLIGHT {
            assert!(ring.mark_submitted());
            ring.advance();
            if ring.state(ring.current()) == SlotState::Submitted {
                assert!(!ring.mark_submitted());
                ring.mark_complete();
            }
        }
        assert_eq!(ring.in_flight(), 1);
    }

    #[test]
    fn zero_slots_is_clamped_to_one() {
        let mut ring = FrameRing::new(0);
        assert_eq!(ring.len(), 1);
        ring.advance();
        assert_eq!(ring.current(), 0);
    }
}
