// Buffer utilities for vertex, index, and uniform buffers
//
// Memory comes from the device's gpu-allocator instance. Buffers free
// their allocation when dropped.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use super::commands::{submit_one_time, TransferContext};
use super::VulkanDevice;

/// A Vulkan buffer and the memory bound to it
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    /// Create a GPU buffer with specified usage and memory location
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            device.free_allocation(allocation, "buffer");
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e).context("Failed to bind buffer memory");
        }

        Ok(Self {
            buffer,
            size,
            allocation: Some(allocation),
            device: device.clone(),
        })
    }

    /// Create a host-visible buffer and fill it with data
    pub fn with_data<T: bytemuck::Pod>(
        device: &Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(
            device,
            name,
            bytes.len() as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write_bytes(0, bytes)?;
        Ok(buffer)
    }

    /// Upload data into a device-local buffer through a staging buffer
    pub fn device_local_with_data<T: bytemuck::Pod>(
        device: &Arc<VulkanDevice>,
        transfer: TransferContext,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let staging = Self::with_data(
            device,
            &format!("{} (staging)", name),
            vk::BufferUsageFlags::TRANSFER_SRC,
            data,
        )?;

        let buffer = Self::new(
            device,
            name,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;

        copy_buffer(device, transfer, &staging, &buffer, staging.size)?;

        Ok(buffer)
    }

    /// Copy bytes into a host-visible buffer at `offset`
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer memory is not host visible")?;

        let end = offset + bytes.len();
        if end > mapped.len() {
            anyhow::bail!(
                "Write of {} bytes at offset {} exceeds buffer size {}",
                bytes.len(),
                offset,
                mapped.len()
            );
        }

        mapped[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy a single plain-old-data value to the start of the buffer
    pub fn write<T: bytemuck::Pod>(&mut self, value: &T) -> Result<()> {
        self.write_bytes(0, bytemuck::bytes_of(value))
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.device.free_allocation(allocation, "buffer");
        }
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Record and run a full buffer-to-buffer copy
pub fn copy_buffer(
    device: &VulkanDevice,
    transfer: TransferContext,
    src: &GpuBuffer,
    dst: &GpuBuffer,
    size: vk::DeviceSize,
) -> Result<()> {
    submit_one_time(device, transfer, |cmd| {
        let region = vk::BufferCopy::default().src_offset(0).dst_offset(0).size(size);
        unsafe {
            device.device.cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]);
        }
        Ok(())
    })
}
