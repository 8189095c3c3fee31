// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// One set per frame in flight

use anyhow::{Context, Result};
use ash::vk;
use super::{create_or_unwind, VulkanDevice};

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default()
            .flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        let semaphores = create_or_unwind(
            2,
            |_| {
                unsafe { device.device.create_semaphore(&semaphore_info, None) }
                    .context("Failed to create a semaphore")
            },
            |semaphore| unsafe { device.device.destroy_semaphore(semaphore, None) },
        )?;

        let in_flight_fence = match unsafe { device.device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                for &semaphore in &semaphores {
                    unsafe { device.device.destroy_semaphore(semaphore, None) };
                }
                return Err(e).context("Failed to create a fence");
            }
        };

        Ok(Self {
            image_available: semaphores[0],
            render_finished: semaphores[1],
            in_flight_fence,
        })
    }

    /// Block until the GPU has finished the frame that last used this slot
    pub fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX) }
            .context("Failed to wait for frame fence")
    }

    /// Unsignal the fence. Only call once work that signals it is about to be submitted.
    pub fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }
            .context("Failed to reset frame fence")
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
