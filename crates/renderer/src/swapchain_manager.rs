//! Swapchain lifecycle.
//!
//! [`SwapchainManager`] owns everything whose size or count follows the
//! swapchain: the image chain itself, the render pass, one framebuffer per
//! image and one pre-recorded command buffer per image.
//!
//! Recreation hands the live chain to the driver as `old_swapchain` and keeps
//! it as the *retired* chain until the next recreation or teardown, so an
//! in-flight present never references a destroyed swapchain.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use turt_rhi::command::{CommandBuffer, CommandPool};
use turt_rhi::device::Device;
use turt_rhi::framebuffer::Framebuffer;
use turt_rhi::instance::Instance;
use turt_rhi::render_pass::RenderPass;
use turt_rhi::swapchain::Swapchain;
use turt_rhi::{RhiError, RhiResult};

use crate::drawable::DrawableRegistry;

pub struct SwapchainManager {
    device: Arc<Device>,
    // Field order is destruction order: framebuffers reference the render
    // pass and the chain's image views.
    command_buffers: Vec<CommandBuffer>,
    framebuffers: Vec<Framebuffer>,
    render_pass: RenderPass,
    swapchain: Swapchain,
    retired: Option<Swapchain>,
}

impl SwapchainManager {
    /// Builds the chain, its render pass, framebuffers and one command buffer
    /// per image. Command buffers are allocated but not recorded.
    pub fn create(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        command_pool: &CommandPool,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let swapchain = Swapchain::new(instance, device.clone(), surface, width, height)?;
        let render_pass = RenderPass::new(device.clone(), swapchain.format())?;
        let framebuffers = Framebuffer::for_views(
            &device,
            &render_pass,
            swapchain.image_views(),
            swapchain.extent(),
        )?;
        let command_buffers = command_pool.allocate_command_buffers(image_count_u32(&swapchain)?)?;

        info!(
            "Swapchain resources ready: {} images at {}x{}",
            swapchain.image_count(),
            swapchain.extent().width,
            swapchain.extent().height
        );

        Ok(Self {
            device,
            command_buffers,
            framebuffers,
            render_pass,
            swapchain,
            retired: None,
        })
    }

    /// Waits for the device to go idle, then replaces the chain and every
    /// resource derived from it.
    ///
    /// The previously retired chain is destroyed here. The chain that was
    /// live until now becomes the retired one.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        command_pool: &CommandPool,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        self.device.wait_idle()?;

        command_pool.free_command_buffers(&self.command_buffers);
        self.command_buffers.clear();
        self.framebuffers.clear();

        let replacement = self
            .swapchain
            .create_replacement(instance, surface, width, height)?;
        let previous = std::mem::replace(&mut self.swapchain, replacement);
        if self.retired.replace(previous).is_some() {
            debug!("Destroyed retired swapchain");
        }

        self.render_pass = RenderPass::new(self.device.clone(), self.swapchain.format())?;
        self.framebuffers = Framebuffer::for_views(
            &self.device,
            &self.render_pass,
            self.swapchain.image_views(),
            self.swapchain.extent(),
        )?;
        self.command_buffers =
            command_pool.allocate_command_buffers(image_count_u32(&self.swapchain)?)?;

        info!(
            "Swapchain recreated: {} images at {}x{}",
            self.swapchain.image_count(),
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(())
    }

    /// Re-records every image's command buffer: one render pass clearing to
    /// `clear_color`, then each drawable's pipeline, descriptor set and draw.
    pub fn record(&self, registry: &DrawableRegistry, clear_color: [f32; 4]) -> RhiResult<()> {
        let extent = self.swapchain.extent();

        for (image_index, (cmd, framebuffer)) in self
            .command_buffers
            .iter()
            .zip(&self.framebuffers)
            .enumerate()
        {
            cmd.reset()?;
            cmd.begin_reusable()?;
            cmd.begin_render_pass(&self.render_pass, framebuffer, clear_color);
            cmd.set_full_viewport(extent);
            registry.record_draws(cmd, image_index)?;
            cmd.end_render_pass();
            cmd.end()?;
        }

        debug!(
            "Recorded {} command buffers with {} drawables",
            self.command_buffers.len(),
            registry.len()
        );
        Ok(())
    }

    /// Releases the command buffers back to `command_pool` and destroys the
    /// framebuffers, render pass, live chain and retired chain in that order.
    pub fn destroy(mut self, command_pool: &CommandPool) {
        command_pool.free_command_buffers(&self.command_buffers);
        self.command_buffers.clear();
        info!("Destroying swapchain resources");
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.swapchain.format()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Pre-recorded command buffer for `image_index`.
    pub fn command_buffer(&self, image_index: u32) -> RhiResult<&CommandBuffer> {
        self.command_buffers
            .get(image_index as usize)
            .ok_or_else(|| {
                RhiError::SwapchainError(format!("no command buffer for image {image_index}"))
            })
    }
}

fn image_count_u32(swapchain: &Swapchain) -> RhiResult<u32> {
    u32::try_from(swapchain.image_count()).map_err(|_| {
        RhiError::SwapchainError(format!(
            "image count {} does not fit in u32",
            swapchain.image_count()
        ))
    })
}
