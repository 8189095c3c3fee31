// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Objects that own GPU memory hold an
// Arc<VulkanDevice> and free themselves on drop; plain handles (passes,
// pipelines, layouts) are destroyed by the renderer.

pub mod buffer;
pub mod commands;
pub mod descriptors;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;

use anyhow::Result;

/// Create handles in order. On the first failure, everything created so far
/// is handed to `destroy` before the error is returned.
pub fn create_or_unwind<T, C, D>(count: usize, mut create: C, mut destroy: D) -> Result<Vec<T>>
where
    C: FnMut(usize) -> Result<T>,
    D: FnMut(T),
{
    let mut created = Vec::with_capacity(count);
    for index in 0..count {
        match create(index) {
            Ok(handle) => created.push(handle),
            Err(e) => {
                created.into_iter().rev().for_each(&mut destroy);
                return Err(e);
            }
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[test]
    fn failed_creation_destroys_earlier_handles() {
        let mut destroyed = Vec::new();
        let result = create_or_unwind(
            4,
            |i| if i == 2 { bail!("no more") } else { Ok(i * 10) },
            |handle| destroyed.push(handle),
        );
        assert!(result.is_err());
        assert_eq!(destroyed, vec![10, 0]);
    }

    #[test]
    fn successful_creation_keeps_everything() {
        let mut destroyed = 0;
        let handles = create_or_unwind(3, |i| Ok(i), |_| destroyed += 1).unwrap();
        assert_eq!(handles, vec![0, 1, 2]);
        assert_eq!(destroyed, 0);
    }
}
