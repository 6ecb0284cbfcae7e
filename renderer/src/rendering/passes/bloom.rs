use crate::rendering::{
    passes::composition::create_fullscreen_pipeline,
    texture::{RenderTargets, Resolution},
    util::bind_group_builder::BindGroupBuilder,
};

const BLOOM_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

struct BloomTarget {
    view: wgpu::TextureView,
    _texture: wgpu::Texture,
}

fn half_res_target(device: &wgpu::Device, size: Resolution, label: &str) -> BloomTarget {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: (size.width / 2).max(1),
            height: (size.height / 2).max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: BLOOM_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    BloomTarget {
        view,
        _texture: texture,
    }
}

/// Downscales the scene to half resolution, runs a separable Gaussian
/// blur as two passes with their own shaders, then additively composites
/// the result back over the scene.
pub struct BloomPass {
    downsample_pipeline: wgpu::RenderPipeline,
    first_blur_pipeline: wgpu::RenderPipeline,
    second_blur_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,
    ping: BloomTarget,
    pong: BloomTarget,
    scene_bind_group: wgpu::BindGroup,
    ping_bind_group: wgpu::BindGroup,
    pong_bind_group: wgpu::BindGroup,
}

impl BloomPass {
    pub fn new(
        device: &wgpu::Device,
        downsample_shader: &wgpu::ShaderModule,
        first_blur_shader: &wgpu::ShaderModule,
        second_blur_shader: &wgpu::ShaderModule,
        composite_shader: &wgpu::ShaderModule,
        targets: &RenderTargets,
    ) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Bloom sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let ping = half_res_target(device, targets.size, "Bloom ping target");
        let pong = half_res_target(device, targets.size, "Bloom pong target");

        let (input_layout, scene_bind_group) =
            Self::input_bind_group(device, &targets.scene, &sampler, "bloom scene input");
        let (_, ping_bind_group) =
            Self::input_bind_group(device, &ping.view, &sampler, "bloom ping input");
        let (_, pong_bind_group) =
            Self::input_bind_group(device, &pong.view, &sampler, "bloom pong input");

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Bloom pipeline layout"),
            bind_group_layouts: &[&input_layout],
            ..Default::default()
        });

        let downsample_pipeline = create_fullscreen_pipeline(
            device,
            downsample_shader,
            &pipeline_layout,
            BLOOM_FORMAT,
            None,
            "Bloom downsample pipeline",
        );
        let first_blur_pipeline = create_fullscreen_pipeline(
            device,
            first_blur_shader,
            &pipeline_layout,
            BLOOM_FORMAT,
            None,
            "Bloom first blur pipeline",
        );
        let second_blur_pipeline = create_fullscreen_pipeline(
            device,
            second_blur_shader,
            &pipeline_layout,
            BLOOM_FORMAT,
            None,
            "Bloom second blur pipeline",
        );
        // Additive composite over the scene.
        let composite_pipeline = create_fullscreen_pipeline(
            device,
            composite_shader,
            &pipeline_layout,
            RenderTargets::SCENE_FORMAT,
            Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent::OVER,
            }),
            "Bloom composite pipeline",
        );

        BloomPass {
            downsample_pipeline,
            first_blur_pipeline,
            second_blur_pipeline,
            composite_pipeline,
            sampler,
            ping,
            pong,
            scene_bind_group,
            ping_bind_group,
            pong_bind_group,
        }
    }

    fn input_bind_group(
        device: &wgpu::Device,
        view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
        name: &str,
    ) -> (wgpu::BindGroupLayout, wgpu::BindGroup) {
        BindGroupBuilder::new(name, wgpu::ShaderStages::FRAGMENT)
            .texture(
                0,
                "Bloom input texture",
                wgpu::BindingResource::TextureView(view),
                wgpu::TextureSampleType::Float { filterable: true },
            )
            .sampler(
                1,
                "Bloom sampler",
                wgpu::BindingResource::Sampler(sampler),
                wgpu::SamplerBindingType::Filtering,
            )
            .build(device)
    }

    pub fn rebind(&mut self, device: &wgpu::Device, targets: &RenderTargets) {
        self.ping = half_res_target(device, targets.size, "Bloom ping target");
        self.pong = half_res_target(device, targets.size, "Bloom pong target");
        self.scene_bind_group =
            Self::input_bind_group(device, &targets.scene, &self.sampler, "bloom scene input").1;
        self.ping_bind_group =
            Self::input_bind_group(device, &self.ping.view, &self.sampler, "bloom ping input").1;
        self.pong_bind_group =
            Self::input_bind_group(device, &self.pong.view, &self.sampler, "bloom pong input").1;
    }

    pub fn render(&self, encoder: &mut wgpu::CommandEncoder, targets: &RenderTargets) {
        self.fullscreen_step(
            encoder,
            &self.downsample_pipeline,
            &self.scene_bind_group,
            &self.ping.view,
            "Bloom downsample",
        );
        self.fullscreen_step(
            encoder,
            &self.first_blur_pipeline,
            &self.ping_bind_group,
            &self.pong.view,
            "Bloom first blur",
        );
        self.fullscreen_step(
            encoder,
            &self.second_blur_pipeline,
            &self.pong_bind_group,
            &self.ping.view,
            "Bloom second blur",
        );
        self.fullscreen_step(
            encoder,
            &self.composite_pipeline,
            &self.ping_bind_group,
            &targets.scene,
            "Bloom composite",
        );
    }

    fn fullscreen_step(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: &wgpu::RenderPipeline,
        input: &wgpu::BindGroup,
        output: &wgpu::TextureView,
        label: &str,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, input, &[]);
        pass.draw(0..3, 0..1);
    }
}
