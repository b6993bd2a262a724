//! Renderable objects and their per-image GPU resources.
//!
//! A [`Drawable`] names a shader, carries a base model transform and an
//! [`UpdateBehavior`], and owns one [`ImageSlot`] (uniform buffer plus
//! descriptor set) per swapchain image. The [`DrawableRegistry`] owns every
//! drawable together with the descriptor pool their sets come from.
//!
//! # Resource Lifetime
//!
//! - Image slots are rebuilt by [`DrawableRegistry::rebuild_descriptors`]
//!   whenever the swapchain image count may have changed.
//! - Pipelines are rebuilt by [`DrawableRegistry::setup_pipelines`] whenever
//!   the render pass is recreated. Drawables with the same shader share one
//!   [`ShaderPipeline`].

use std::fmt;
use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec2, Vec3};
use tracing::{debug, info};

use turt_core::EngineConfig;
use turt_rhi::{RhiError, RhiResult};
use turt_rhi::buffer::Buffer;
use turt_rhi::command::CommandBuffer;
use turt_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, uniform_pool_sizes, write_uniform_buffer,
};
use turt_rhi::device::Device;
use turt_rhi::pipeline::{CullMode, GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use turt_rhi::render_pass::RenderPass;
use turt_rhi::shader::{Shader, ShaderStage};

use crate::pipeline_cache::{PipelineCache, assign_pipelines, group_by_shader};
use crate::ubo::{Projection, UniformBufferObject, View, aspect_ratio};

/// How a drawable's model matrix changes over time.
#[derive(Default)]
pub enum UpdateBehavior {
    /// The base model matrix is used as is.
    #[default]
    Static,
    /// Circles the origin in the XZ plane: `translate(r·cos(st), 0, r·sin(st))`
    /// applied on top of the base transform.
    Orbit { radius: f32, speed: f32 },
    /// Rotates about `axis` in model space.
    Spin { radians_per_second: f32, axis: Vec3 },
    /// Arbitrary transform of elapsed seconds, applied on top of the base.
    Custom(Box<dyn FnMut(f32) -> Mat4 + Send>),
}

impl UpdateBehavior {
    /// Model matrix at `time` seconds for a drawable whose base transform is
    /// `base`.
    pub fn model_at(&mut self, base: Mat4, time: f32) -> Mat4 {
        match self {
            UpdateBehavior::Static => base,
            UpdateBehavior::Orbit { radius, speed } => {
                let angle = *speed * time;
                let offset = Vec3::new(*radius * angle.cos(), 0.0, *radius * angle.sin());
                Mat4::from_translation(offset) * base
            }
            UpdateBehavior::Spin {
                radians_per_second,
                axis,
            } => {
                let axis = axis.try_normalize().unwrap_or(Vec3::Z);
                base * Mat4::from_axis_angle(axis, *radians_per_second * time)
            }
            UpdateBehavior::Custom(update) => update(time) * base,
        }
    }
}

impl fmt::Debug for UpdateBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateBehavior::Static => f.write_str("Static"),
            UpdateBehavior::Orbit { radius, speed } => f
                .debug_struct("Orbit")
                .field("radius", radius)
                .field("speed", speed)
                .finish(),
            UpdateBehavior::Spin {
                radians_per_second,
                axis,
            } => f
                .debug_struct("Spin")
                .field("radians_per_second", radians_per_second)
                .field("axis", axis)
                .finish(),
            UpdateBehavior::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A graphics pipeline and the layout it was built with.
///
/// Shared between drawables through `Arc`; the Vulkan objects are destroyed
/// when the last holder drops.
pub struct ShaderPipeline {
    // Declared before `layout` so the pipeline is destroyed first.
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl ShaderPipeline {
    /// Loads `<shader_dir>/<name>.vert.spv` and `<name>.frag.spv` and builds a
    /// pipeline for `render_pass` whose only descriptor set uses
    /// `descriptor_layout`.
    pub fn new(
        device: &Arc<Device>,
        config: &EngineConfig,
        render_pass: &RenderPass,
        descriptor_layout: &DescriptorSetLayout,
        name: &str,
    ) -> RhiResult<Self> {
        let vertex_shader = load_stage(device, config, name, ShaderStage::Vertex)?;
        let fragment_shader = load_stage(device, config, name, ShaderStage::Fragment)?;

        let layout = PipelineLayout::new(device.clone(), &[descriptor_layout.handle()])?;

        // Geometry comes from gl_VertexIndex, so winding is shader-defined.
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .render_pass(render_pass)
            .cull_mode(CullMode::None)
            .build(device.clone(), &layout)?;

        info!("Built pipeline for shader '{}'", name);

        Ok(Self { pipeline, layout })
    }

    #[inline]
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }
}

fn load_stage(
    device: &Arc<Device>,
    config: &EngineConfig,
    name: &str,
    stage: ShaderStage,
) -> RhiResult<Shader> {
    let path = config.shader_path(name, stage.file_extension());
    Shader::from_spirv_file(device.clone(), &path, stage, "main")
}

/// Uniform buffer and descriptor set for one swapchain image.
pub struct ImageSlot {
    uniform_buffer: Buffer,
    descriptor_set: vk::DescriptorSet,
}

impl ImageSlot {
    #[inline]
    pub fn uniform_buffer(&self) -> &Buffer {
        &self.uniform_buffer
    }

    #[inline]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }
}

/// One renderable object.
pub struct Drawable {
    shader: String,
    behavior: UpdateBehavior,
    model: Mat4,
    vertex_count: u32,
    pipeline: Option<Arc<ShaderPipeline>>,
    slots: Vec<ImageSlot>,
}

impl Drawable {
    /// A static drawable at the origin that draws `vertex_count` vertices
    /// with `shader`.
    pub fn new(shader: impl Into<String>, vertex_count: u32) -> Self {
        Self {
            shader: shader.into(),
            behavior: UpdateBehavior::Static,
            model: Mat4::IDENTITY,
            vertex_count,
            pipeline: None,
            slots: Vec::new(),
        }
    }

    pub fn with_behavior(mut self, behavior: UpdateBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_model(mut self, model: Mat4) -> Self {
        self.model = model;
        self
    }

    /// Places the drawable at `position` on the z = 0 plane.
    pub fn with_position(self, position: Vec2) -> Self {
        self.with_model(Mat4::from_translation(position.extend(0.0)))
    }

    #[inline]
    pub fn shader(&self) -> &str {
        &self.shader
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    #[inline]
    pub fn model(&self) -> Mat4 {
        self.model
    }

    #[inline]
    pub fn pipeline(&self) -> Option<&Arc<ShaderPipeline>> {
        self.pipeline.as_ref()
    }

    #[inline]
    pub fn slots(&self) -> &[ImageSlot] {
        &self.slots
    }

    /// Uniform block for `time` seconds on a `width` x `height` target.
    pub fn uniforms(
        &mut self,
        time: f32,
        (width, height): (u32, u32),
        view: &View,
        projection: &Projection,
    ) -> UniformBufferObject {
        UniformBufferObject::new(
            self.behavior.model_at(self.model, time),
            view.matrix(),
            projection.matrix(aspect_ratio(width, height)),
        )
    }

    /// Records this drawable's draw into `cmd` for `image_index`.
    fn record(&self, cmd: &CommandBuffer, image_index: usize) -> RhiResult<()> {
        let pipeline = self.pipeline.as_ref().ok_or_else(|| {
            RhiError::PipelineError(format!(
                "drawable '{}' has no pipeline",
                self.shader
            ))
        })?;
        let slot = self.slots.get(image_index).ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "drawable '{}' has no descriptor set for image {}",
                self.shader, image_index
            ))
        })?;

        cmd.bind_graphics_pipeline(pipeline.pipeline());
        cmd.bind_descriptor_set(pipeline.layout(), slot.descriptor_set);
        cmd.draw(self.vertex_count, 1, 0, 0);
        Ok(())
    }
}

impl fmt::Debug for Drawable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drawable")
            .field("shader", &self.shader)
            .field("behavior", &self.behavior)
            .field("vertex_count", &self.vertex_count)
            .field("has_pipeline", &self.pipeline.is_some())
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Owns every drawable and the descriptor pool backing their image slots.
pub struct DrawableRegistry {
    device: Arc<Device>,
    // Dropped before the pool their descriptor sets came from.
    drawables: Vec<Drawable>,
    descriptor_pool: Option<DescriptorPool>,
    view: View,
    projection: Projection,
}

impl DrawableRegistry {
    pub fn new(device: Arc<Device>, drawables: Vec<Drawable>) -> Self {
        Self {
            device,
            drawables,
            descriptor_pool: None,
            view: View::default(),
            projection: Projection::default(),
        }
    }

    pub fn set_view(&mut self, view: View) {
        self.view = view;
    }

    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
    }

    #[inline]
    pub fn drawables(&self) -> &[Drawable] {
        &self.drawables
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.drawables.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.drawables.is_empty()
    }

    /// Recomputes every drawable's uniforms and writes them into the buffers
    /// for `image_index`.
    pub fn update_uniforms(&mut self, image_index: u32, time: f32, extent: vk::Extent2D) -> RhiResult<()> {
        let size = (extent.width, extent.height);
        for drawable in &mut self.drawables {
            let ubo = drawable.uniforms(time, size, &self.view, &self.projection);
            let slot = drawable.slots.get(image_index as usize).ok_or_else(|| {
                RhiError::InvalidHandle(format!(
                    "no uniform buffer for image {image_index}"
                ))
            })?;
            slot.uniform_buffer.write_data(0, bytemuck::bytes_of(&ubo))?;
        }
        Ok(())
    }

    /// Replaces the descriptor pool and every drawable's image slots with
    /// `image_count` fresh ones.
    pub fn rebuild_descriptors(&mut self, layout: &DescriptorSetLayout, image_count: usize) -> RhiResult<()> {
        for drawable in &mut self.drawables {
            drawable.slots.clear();
        }
        self.descriptor_pool = None;

        let set_count = self.drawables.len() * image_count;
        if set_count == 0 {
            return Ok(());
        }

        let set_count = u32::try_from(set_count).map_err(|_| {
            RhiError::InvalidHandle(format!("too many descriptor sets: {set_count}"))
        })?;
        let pool = DescriptorPool::new(self.device.clone(), set_count, &uniform_pool_sizes(set_count))?;

        for drawable in &mut self.drawables {
            let sets = pool.allocate(layout, image_count)?;
            drawable.slots.reserve(image_count);
            for descriptor_set in sets {
                let uniform_buffer =
                    Buffer::new_uniform(self.device.clone(), UniformBufferObject::SIZE as vk::DeviceSize)?;
                write_uniform_buffer(&self.device, descriptor_set, 0, &uniform_buffer);
                drawable.slots.push(ImageSlot {
                    uniform_buffer,
                    descriptor_set,
                });
            }
        }

        debug!(
            "Rebuilt descriptors: {} drawables x {} images",
            self.drawables.len(),
            image_count
        );

        self.descriptor_pool = Some(pool);
        Ok(())
    }

    /// Groups drawables by shader and gives each group one pipeline built
    /// against `render_pass`.
    pub fn setup_pipelines(
        &mut self,
        config: &EngineConfig,
        render_pass: &RenderPass,
        descriptor_layout: &DescriptorSetLayout,
    ) -> RhiResult<()> {
        for drawable in &mut self.drawables {
            drawable.pipeline = None;
        }

        let drawables = std::mem::take(&mut self.drawables);
        self.drawables = group_by_shader(drawables, |d| d.shader());

        let mut cache = PipelineCache::new(self.drawables.len());
        let keys: Vec<&str> = self.drawables.iter().map(|d| d.shader()).collect();
        let device = &self.device;
        let pipelines = assign_pipelines(&mut cache, &keys, |name| {
            ShaderPipeline::new(device, config, render_pass, descriptor_layout, name)
        })?;
        let distinct = cache.len();
        cache.destroy();

        for (drawable, pipeline) in self.drawables.iter_mut().zip(pipelines) {
            drawable.pipeline = Some(pipeline);
        }

        info!(
            "{} drawables share {} pipeline(s)",
            self.drawables.len(),
            distinct
        );
        Ok(())
    }

    /// Records every drawable's draw for `image_index` into `cmd`.
    pub fn record_draws(&self, cmd: &CommandBuffer, image_index: usize) -> RhiResult<()> {
        for drawable in &self.drawables {
            drawable.record(cmd, image_index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn translation(m: Mat4) -> Vec3 {
        m.w_axis.truncate()
    }

    #[test]
    fn test_static_keeps_base() {
        let base = Mat4::from_translation(Vec3::new(0.5, -0.25, 0.0));
        let mut behavior = UpdateBehavior::Static;
        assert_eq!(behavior.model_at(base, 0.0), base);
        assert_eq!(behavior.model_at(base, 12.5), base);
    }

    #[test]
    fn test_orbit_position() {
        let mut behavior = UpdateBehavior::Orbit {
            radius: 2.0,
            speed: 1.0,
        };

        let start = translation(behavior.model_at(Mat4::IDENTITY, 0.0));
        assert!((start - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-6);

        let quarter = translation(behavior.model_at(Mat4::IDENTITY, std::f32::consts::FRAC_PI_2));
        assert!((quarter - Vec3::new(0.0, 0.0, 2.0)).length() < 1e-5);
    }

    #[test]
    fn test_orbit_offsets_base_position() {
        let base = Mat4::from_translation(Vec3::new(1.0, 1.0, 0.0));
        let mut behavior = UpdateBehavior::Orbit {
            radius: 1.0,
            speed: 2.0,
        };
        let moved = translation(behavior.model_at(base, 0.0));
        assert!((moved - Vec3::new(2.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_spin_rotates_in_model_space() {
        let mut behavior = UpdateBehavior::Spin {
            radians_per_second: std::f32::consts::PI,
            axis: Vec3::Z,
        };
        let model = behavior.model_at(Mat4::IDENTITY, 0.5);
        let x = model * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!((x.x).abs() < 1e-6);
        assert!((x.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_spin_zero_axis_falls_back() {
        let mut behavior = UpdateBehavior::Spin {
            radians_per_second: 1.0,
            axis: Vec3::ZERO,
        };
        let model = behavior.model_at(Mat4::IDENTITY, 1.0);
        assert!(model.is_finite());
    }

    #[test]
    fn test_custom_sees_time() {
        let mut behavior =
            UpdateBehavior::Custom(Box::new(|t: f32| Mat4::from_scale(Vec3::splat(t))));
        let model = behavior.model_at(Mat4::IDENTITY, 3.0);
        assert_eq!(model.x_axis.x, 3.0);
    }

    #[test]
    fn test_uniforms_repeatable_for_same_inputs() {
        let mut drawable = Drawable::new("shader", 6)
            .with_position(Vec2::new(0.25, 0.5))
            .with_behavior(UpdateBehavior::Orbit {
                radius: 0.5,
                speed: 1.5,
            });

        let a = drawable.uniforms(2.0, (800, 600), &View::Identity, &Projection::Orthographic);
        let b = drawable.uniforms(2.0, (800, 600), &View::Identity, &Projection::Orthographic);
        assert_eq!(bytemuck::bytes_of(&a), bytemuck::bytes_of(&b));
    }

    #[test]
    fn test_uniforms_follow_aspect() {
        let mut drawable = Drawable::new("shader", 3);
        let wide = drawable.uniforms(0.0, (1600, 800), &View::Identity, &Projection::Orthographic);
        let square = drawable.uniforms(0.0, (800, 800), &View::Identity, &Projection::Orthographic);
        assert_ne!(wide.projection, square.projection);
        assert_eq!(wide.model, square.model);
    }

    #[test]
    fn test_new_drawable_has_no_gpu_state() {
        let drawable = Drawable::new(String::from("text"), 4);
        assert_eq!(drawable.shader(), "text");
        assert_eq!(drawable.vertex_count(), 4);
        assert!(drawable.pipeline().is_none());
        assert!(drawable.slots().is_empty());
    }

    #[test]
    fn test_registry_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Drawable>();
        assert_send::<DrawableRegistry>();
    }
}
