// One-time command buffers for uploads and layout transitions
//
// Transfers run on the graphics queue and are waited on immediately, which
// keeps asset loading simple at the cost of stalling the queue.

use anyhow::{Context, Result};
use ash::vk;
use super::VulkanDevice;

/// Queue + pool used for one-off transfer work
#[derive(Clone, Copy)]
pub struct TransferContext {
    pub queue: vk::Queue,
    pub command_pool: vk::CommandPool,
}

/// Allocate a primary command buffer and start recording a one-time submit
pub fn begin_single_time(device: &VulkanDevice, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffer = unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate transfer command buffer")?[0];

    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    unsafe { device.device.begin_command_buffer(command_buffer, &begin_info) }
        .context("Failed to begin transfer command buffer")?;

    Ok(command_buffer)
}

/// Finish recording, submit, wait for the queue and free the buffer
pub fn end_and_submit(
    device: &VulkanDevice,
    transfer: TransferContext,
    command_buffer: vk::CommandBuffer,
) -> Result<()> {
    let command_buffers = [command_buffer];
    let result = unsafe {
        device
            .device
            .end_command_buffer(command_buffer)
            .context("Failed to end transfer command buffer")
            .and_then(|_| {
                let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
                device
                    .device
                    .queue_submit(transfer.queue, &[submit_info], vk::Fence::null())
                    .context("Failed to submit transfer command buffer")
            })
            .and_then(|_| {
                device
                    .device
                    .queue_wait_idle(transfer.queue)
                    .context("Failed waiting for transfer queue")
            })
    };

    // Free even if submission failed
    unsafe {
        device
            .device
            .free_command_buffers(transfer.command_pool, &command_buffers);
    }

    result
}

/// Record commands with `record` and run them to completion
pub fn submit_one_time<F>(device: &VulkanDevice, transfer: TransferContext, record: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let command_buffer = begin_single_time(device, transfer.command_pool)?;
    if let Err(e) = record(command_buffer) {
        unsafe {
            device
                .device
                .free_command_buffers(transfer.command_pool, &[command_buffer]);
        }
        return Err(e);
    }
    end_and_submit(device, transfer, command_buffer)
}
