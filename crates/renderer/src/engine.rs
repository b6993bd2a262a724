//! Engine context.
//!
//! [`Engine`] owns every GPU object the frame loop touches and drives
//! [`FrameScheduler`] against the Vulkan implementation of [`FrameBackend`].
//!
//! # Resource Destruction Order
//!
//! Teardown waits for the device to go idle, then destroys:
//! 1. Frame slot semaphores and fences
//! 2. Drawables (uniform buffers, shared pipelines) and their descriptor pool
//! 3. Descriptor set layout
//! 4. Swapchain resources (command buffers, framebuffers, render pass, live
//!    and retired chains)
//! 5. Command pool
//! 6. Logical device (and its allocator)
//! 7. Surface
//! 8. Instance

use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use turt_core::{EngineConfig, Timer};
use turt_platform::{Surface, Window};
use turt_rhi::command::CommandPool;
use turt_rhi::descriptor::{DescriptorSetLayout, uniform_buffer_binding};
use turt_rhi::device::Device;
use turt_rhi::instance::{Instance, InstanceDesc};
use turt_rhi::physical_device::select_physical_device;
use turt_rhi::sync::FrameSync;
use turt_rhi::{RhiError, RhiResult};

use crate::drawable::{Drawable, DrawableRegistry};
use crate::frame_scheduler::{
    AcquireOutcome, FrameBackend, FrameOutcome, FrameScheduler, PresentOutcome,
};
use crate::swapchain_manager::SwapchainManager;
use crate::ubo::{Projection, View};

/// Vulkan side of the frame loop.
pub struct GpuContext {
    config: EngineConfig,
    timer: Timer,
    /// Latest framebuffer size reported by the window. May be zero.
    framebuffer_size: (u32, u32),
    resize_requested: bool,

    registry: ManuallyDrop<DrawableRegistry>,
    descriptor_layout: ManuallyDrop<DescriptorSetLayout>,
    swapchain: ManuallyDrop<SwapchainManager>,
    command_pool: ManuallyDrop<CommandPool>,
    device: ManuallyDrop<Arc<Device>>,
    surface: ManuallyDrop<Surface>,
    instance: ManuallyDrop<Instance>,
}

impl GpuContext {
    fn new(window: &Window, config: &EngineConfig, drawables: Vec<Drawable>) -> RhiResult<Self> {
        let (width, height) = window.framebuffer_size();
        info!("Initializing Vulkan engine ({}x{})", width, height);

        let surface_extensions = window
            .required_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let application_name = CString::new(config.window.title.as_str())
            .unwrap_or_else(|_| CString::from(c"turt"));

        let instance = Instance::new(&InstanceDesc {
            application_name: &application_name,
            enable_validation: config.validation,
            surface_extensions,
        })?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device_info)?;

        let (graphics_family, _) = device.queue_families().resolved()?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;

        let swapchain = SwapchainManager::create(
            &instance,
            device.clone(),
            surface.handle(),
            &command_pool,
            width,
            height,
        )?;

        let descriptor_layout = DescriptorSetLayout::new(
            device.clone(),
            &[uniform_buffer_binding(0, vk::ShaderStageFlags::VERTEX)],
        )?;

        let mut registry = DrawableRegistry::new(device.clone(), drawables);
        registry.rebuild_descriptors(&descriptor_layout, swapchain.image_count())?;
        registry.setup_pipelines(config, swapchain.render_pass(), &descriptor_layout)?;
        swapchain.record(&registry, config.clear_color)?;

        Ok(Self {
            config: config.clone(),
            timer: Timer::new(),
            framebuffer_size: (width, height),
            resize_requested: false,
            registry: ManuallyDrop::new(registry),
            descriptor_layout: ManuallyDrop::new(descriptor_layout),
            swapchain: ManuallyDrop::new(swapchain),
            command_pool: ManuallyDrop::new(command_pool),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            instance: ManuallyDrop::new(instance),
        })
    }

    fn wait_idle(&self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle: {}", e);
        }
    }
}

impl FrameBackend for GpuContext {
    type SlotSync = FrameSync;

    fn create_slot_sync(&mut self) -> RhiResult<FrameSync> {
        FrameSync::new(Arc::clone(&self.device))
    }

    fn wait_for_slot(&mut self, sync: &FrameSync) -> RhiResult<()> {
        sync.in_flight_fence().wait(u64::MAX)
    }

    fn acquire_next_image(&mut self, sync: &FrameSync) -> RhiResult<AcquireOutcome> {
        match self
            .swapchain
            .swapchain()
            .acquire_next_image(sync.image_available())
        {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn update_uniforms(&mut self, image_index: u32) -> RhiResult<()> {
        let time = self.timer.elapsed_secs();
        self.registry
            .update_uniforms(image_index, time, self.swapchain.extent())
    }

    fn submit(&mut self, sync: &FrameSync, image_index: u32) -> RhiResult<()> {
        let command_buffer = self.swapchain.command_buffer(image_index)?.handle();

        let wait_semaphores = [sync.image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [sync.render_finished()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let fence = sync.in_flight_fence();
        fence.reset()?;

        // SAFETY: the command buffer was fully recorded after the last
        // swapchain (re)creation and the fence was just reset.
        unsafe {
            self.device
                .submit_graphics(std::slice::from_ref(&submit_info), fence.handle())
        }
    }

    fn present(&mut self, sync: &FrameSync, image_index: u32) -> RhiResult<PresentOutcome> {
        match self.swapchain.swapchain().present(
            self.device.present_queue(),
            image_index,
            sync.render_finished(),
        ) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn framebuffer_extent(&self) -> (u32, u32) {
        self.framebuffer_size
    }

    fn take_resize_request(&mut self) -> bool {
        std::mem::take(&mut self.resize_requested)
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> RhiResult<()> {
        self.resize_requested = false;
        self.swapchain.recreate(
            &self.instance,
            self.surface.handle(),
            &self.command_pool,
            width,
            height,
        )?;

        self.registry
            .rebuild_descriptors(&self.descriptor_layout, self.swapchain.image_count())?;
        self.registry.setup_pipelines(
            &self.config,
            self.swapchain.render_pass(),
            &self.descriptor_layout,
        )?;
        self.swapchain
            .record(&self.registry, self.config.clear_color)
    }

    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        self.wait_idle();

        // SAFETY: each field is dropped exactly once, here, and never used
        // afterwards. The device is idle.
        unsafe {
            ManuallyDrop::drop(&mut self.registry);
            ManuallyDrop::drop(&mut self.descriptor_layout);
            ManuallyDrop::take(&mut self.swapchain).destroy(&self.command_pool);
            ManuallyDrop::drop(&mut self.command_pool);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("GPU context destroyed");
    }
}

/// The renderer's single context object.
///
/// Created once the window exists and dropped before the window closes.
pub struct Engine {
    // Dropped before `gpu`: frame slot sync objects need the device.
    scheduler: FrameScheduler<FrameSync>,
    gpu: GpuContext,
}

impl Engine {
    /// Creates every Vulkan object for `window` and prepares `drawables`.
    ///
    /// # Errors
    ///
    /// Any creation failure is fatal and returned as is. Window-system
    /// failures are mapped to [`RhiError::SurfaceError`].
    pub fn new(window: &Window, config: &EngineConfig, drawables: Vec<Drawable>) -> RhiResult<Self> {
        let mut gpu = GpuContext::new(window, config, drawables)?;
        let scheduler = FrameScheduler::new(&mut gpu, config.frames_in_flight)?;

        info!(
            "Engine ready: {} drawables, {} swapchain images",
            gpu.registry.len(),
            gpu.swapchain.image_count()
        );

        Ok(Self { scheduler, gpu })
    }

    /// Renders one frame. See [`FrameScheduler::draw_frame`].
    pub fn draw_frame(&mut self) -> RhiResult<FrameOutcome> {
        self.scheduler.draw_frame(&mut self.gpu)
    }

    /// Records a new framebuffer size and asks for swapchain recreation after
    /// the next present. A zero size is stored as is.
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        debug!("Resize notification: {}x{}", width, height);
        self.gpu.framebuffer_size = (width, height);
        self.gpu.resize_requested = true;
    }

    pub fn set_view(&mut self, view: View) {
        self.gpu.registry.set_view(view);
    }

    pub fn set_projection(&mut self, projection: Projection) {
        self.gpu.registry.set_projection(projection);
    }

    /// `true` while the window is minimized and no frames are produced.
    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.scheduler.is_recreate_pending()
    }

    pub fn wait_idle(&self) {
        self.gpu.wait_idle();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.gpu.wait_idle();
        info!("Shutting down engine");
    }
}
