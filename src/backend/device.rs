// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Window surface creation
// - Physical device selection (prefer discrete GPU)
// - Logical device + graphics/present queue creation
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::{vk, Entry};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions every candidate GPU must support
const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Indices of the queue families we render and present with
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct families, so a shared graphics/present family only gets one queue
    pub fn unique(&self) -> Vec<u32> {
        self.graphics
            .iter()
            .chain(self.present.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Vulkan handles (order matters for drop!)
    pub allocator: ManuallyDrop<Mutex<gpu_allocator::vulkan::Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue: vk::Queue,
    pub present_queue_family: u32,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached for performance)
    pub properties: vk::PhysicalDeviceProperties,
    pub max_msaa_samples: vk::SampleCountFlags,
}

impl VulkanDevice {
    /// Create Vulkan device for rendering into `window`
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `window` - Window to create the presentation surface for
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    pub fn new<W>(app_name: &str, window: &W, enable_validation: bool) -> Result<Arc<Self>>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let instance = Self::create_instance(&entry, app_name, display_handle, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Create the window surface (needed to check present support)
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create surface")?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        // Step 5: Pick physical device (GPU)
        let (physical_device, families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;
        let graphics_queue_family = families.graphics.context("Graphics queue family missing")?;
        let present_queue_family = families.present.context("Present queue family missing")?;

        // Step 6: Create logical device
        let device = Self::create_logical_device(&instance, physical_device, &families)?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        // Step 7: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let max_msaa_samples = max_usable_sample_count(&properties.limits);

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Min uniform buffer offset alignment: {}, max MSAA: {:?}",
            properties.limits.min_uniform_buffer_offset_alignment,
            max_msaa_samples
        );

        // Step 8: Create memory allocator
        let allocator = Self::create_allocator(&instance, physical_device, &device)?;

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            surface,
            surface_loader,
            instance,
            _entry: entry,
            graphics_queue,
            graphics_queue_family,
            present_queue,
            present_queue_family,
            debug_utils,
            properties,
            max_msaa_samples,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display_handle: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"Scene Renderer";

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        // Surface extensions required by the windowing platform
        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle)
                .context("Failed to query required surface extensions")?
                .to_vec();

        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("Failed to enumerate instance extensions")?;
        let available_names: Vec<&CStr> = available
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();
        for &ext in &extensions {
            let name = unsafe { CStr::from_ptr(ext) };
            if !available_names.contains(&name) {
                anyhow::bail!(
                    "VkInstance does not support required extension {}",
                    name.to_string_lossy()
                );
            }
        }

        // Validation layers
        let layer_names = if enable_validation {
            if !Self::check_validation_layer_support(entry)? {
                anyhow::bail!("Validation layers requested, but not available");
            }
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn check_validation_layer_support(entry: &Entry) -> Result<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .context("Failed to enumerate instance layers")?;

        Ok(layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().ok() == Some(VALIDATION_LAYER)))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to setup debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("Can't find GPUs that support Vulkan");
        }

        // Score each device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let features = unsafe { instance.get_physical_device_features(device) };

            if features.sampler_anisotropy != vk::TRUE {
                continue;
            }

            let families = Self::find_queue_families(instance, surface_loader, surface, device)?;
            if !families.is_complete() {
                continue;
            }

            if !Self::check_device_extension_support(instance, device)? {
                continue;
            }

            // No point checking the swapchain if the extension is missing
            let formats = unsafe {
                surface_loader.get_physical_device_surface_formats(device, surface)
            }?;
            let present_modes = unsafe {
                surface_loader.get_physical_device_surface_present_modes(device, surface)
            }?;
            if formats.is_empty() || present_modes.is_empty() {
                continue;
            }

            // Score device (prefer discrete GPU)
            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                _ => 1,
            };

            if score > best_score {
                best_score = score;
                best_device = Some((device, families));
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    fn find_queue_families(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Result<QueueFamilyIndices> {
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut indices = QueueFamilyIndices::default();
        for (i, family) in queue_families.iter().enumerate() {
            let i = i as u32;
            if family.queue_count == 0 {
                continue;
            }

            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(i);
            }

            let present_support = unsafe {
                surface_loader.get_physical_device_surface_support(device, i, surface)
            }?;
            if present_support {
                indices.present = Some(i);
            }

            if indices.is_complete() {
                break;
            }
        }

        Ok(indices)
    }

    fn check_device_extension_support(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
    ) -> Result<bool> {
        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }?;

        Ok(DEVICE_EXTENSIONS.iter().all(|required| {
            extensions
                .iter()
                .any(|ext| ext.extension_name_as_c_str().ok() == Some(*required))
        }))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilyIndices,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions: Vec<*const c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create a logical device")?;

        Ok(device)
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<gpu_allocator::vulkan::Allocator> {
        let allocator =
            gpu_allocator::vulkan::Allocator::new(&gpu_allocator::vulkan::AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: gpu_allocator::AllocatorDebugSettings {
                    log_leaks_on_shutdown: true,
                    ..Default::default()
                },
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .context("Failed to create GPU memory allocator")?;

        Ok(allocator)
    }

    /// Minimum alignment of dynamic uniform buffer offsets
    pub fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }

    /// Whether the graphics and present queues live in different families
    pub fn has_separate_present_queue(&self) -> bool {
        self.graphics_queue_family != self.present_queue_family
    }

    /// Return an allocation to the allocator, logging any failure
    pub fn free_allocation(&self, allocation: gpu_allocator::vulkan::Allocation, what: &str) {
        report_free(self.allocator.lock().free(allocation), what);
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

/// Log a failed free. Returns whether the free succeeded.
pub fn report_free(result: gpu_allocator::Result<()>, what: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to free {} memory: {}", what, e);
            false
        }
    }
}

/// Highest sample count usable for both colour and depth attachments
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts =
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;

    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            // The allocator frees its memory blocks, so it goes before the device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::trace!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_family_creates_one_queue() {
        let indices = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
        };
        assert!(indices.is_complete());
        assert_eq!(indices.unique(), vec![0]);

        let split = QueueFamilyIndices {
            graphics: Some(2),
            present: Some(1),
        };
        assert_eq!(split.unique(), vec![1, 2]);
        assert!(!QueueFamilyIndices::default().is_complete());
    }

    #[test]
    fn usable_sample_count_is_common_to_colour_and_depth() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);

        let single = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&single), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn failed_free_is_reported() {
        assert!(report_free(Ok(()), "buffer"));
        assert!(!report_free(Err(gpu_allocator::AllocationError::OutOfMemory), "image"));
    }
}
