use crate::rendering::{texture::RenderTargets, util::bind_group_builder::BindGroupBuilder};

/// Builds a fullscreen-triangle pipeline over a caller-provided shader.
pub(crate) fn create_fullscreen_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
    label: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: Default::default(),
        multiview_mask: None,
        cache: None,
    })
}

/// Resolves the MRT output of the geometry passes into the scene: the
/// procedural shader reads the integer fragment-data target to look up
/// per-fragment block materials.
pub struct CompositionPass {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    sampler: wgpu::Sampler,
}

impl CompositionPass {
    pub fn new(
        device: &wgpu::Device,
        shader: &wgpu::ShaderModule,
        targets: &RenderTargets,
    ) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Composition sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let (layout, bind_group) = Self::build_bind_group(device, targets, &sampler);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Composition pipeline layout"),
            bind_group_layouts: &[&layout],
            ..Default::default()
        });
        let pipeline = create_fullscreen_pipeline(
            device,
            shader,
            &pipeline_layout,
            RenderTargets::SCENE_FORMAT,
            None,
            "Composition pipeline",
        );

        CompositionPass {
            pipeline,
            bind_group,
            sampler,
        }
    }

    fn build_bind_group(
        device: &wgpu::Device,
        targets: &RenderTargets,
        sampler: &wgpu::Sampler,
    ) -> (wgpu::BindGroupLayout, wgpu::BindGroup) {
        BindGroupBuilder::new("composition", wgpu::ShaderStages::FRAGMENT)
            .texture(
                0,
                "Color target",
                wgpu::BindingResource::TextureView(&targets.color),
                wgpu::TextureSampleType::Float { filterable: false },
            )
            .texture(
                1,
                "Fragment data target",
                wgpu::BindingResource::TextureView(&targets.fragment_data),
                wgpu::TextureSampleType::Sint,
            )
            .texture(
                2,
                "Depth target",
                wgpu::BindingResource::TextureView(&targets.depth),
                wgpu::TextureSampleType::Depth,
            )
            .sampler(
                3,
                "Composition sampler",
                wgpu::BindingResource::Sampler(sampler),
                wgpu::SamplerBindingType::NonFiltering,
            )
            .build(device)
    }

    /// The bind group references the render targets, so it must follow
    /// every resize.
    pub fn rebind(&mut self, device: &wgpu::Device, targets: &RenderTargets) {
        let (_, bind_group) = Self::build_bind_group(device, targets, &self.sampler);
        self.bind_group = bind_group;
    }

    pub fn render(&self, encoder: &mut wgpu::CommandEncoder, targets: &RenderTargets) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Composition pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &targets.scene,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}
