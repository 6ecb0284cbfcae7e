pub struct BindGroupBuilder<'a> {
    name: String,
    visibility: wgpu::ShaderStages,
    bindings: Vec<BindingConfig<'a>>,
}

struct BindingConfig<'a> {
    index: u32,
    _name: String,
    binding_type: BindingConfigType,
    resource: wgpu::BindingResource<'a>,
}

enum BindingConfigType {
    Buffer(wgpu::BufferBindingType),
    Texture(wgpu::TextureSampleType),
    ArrayTexture(wgpu::TextureSampleType),
    Sampler(wgpu::SamplerBindingType),
}

impl<'a> BindGroupBuilder<'a> {
    pub fn new(name: impl Into<String>, visibility: wgpu::ShaderStages) -> Self {
        BindGroupBuilder {
            name: name.into(),
            visibility,
            bindings: Vec::new(),
        }
    }

    fn push(
        mut self,
        index: u32,
        name: impl Into<String>,
        binding_type: BindingConfigType,
        resource: wgpu::BindingResource<'a>,
    ) -> Self {
        self.bindings.push(BindingConfig {
            index,
            _name: name.into(),
            binding_type,
            resource,
        });
        self
    }

    pub fn uniform(
        self,
        index: u32,
        name: impl Into<String>,
        resource: wgpu::BindingResource<'a>,
    ) -> Self {
        self.push(
            index,
            name,
            BindingConfigType::Buffer(wgpu::BufferBindingType::Uniform),
            resource,
        )
    }

    pub fn storage_r(
        self,
        index: u32,
        name: impl Into<String>,
        resource: wgpu::BindingResource<'a>,
    ) -> Self {
        self.push(
            index,
            name,
            BindingConfigType::Buffer(wgpu::BufferBindingType::Storage { read_only: true }),
            resource,
        )
    }

    pub fn texture(
        self,
        index: u32,
        name: impl Into<String>,
        resource: wgpu::BindingResource<'a>,
        sample_type: wgpu::TextureSampleType,
    ) -> Self {
        self.push(index, name, BindingConfigType::Texture(sample_type), resource)
    }

    pub fn array_texture(
        self,
        index: u32,
        name: impl Into<String>,
        resource: wgpu::BindingResource<'a>,
        sample_type: wgpu::TextureSampleType,
    ) -> Self {
        self.push(
            index,
            name,
            BindingConfigType::ArrayTexture(sample_type),
            resource,
        )
    }

    pub fn sampler(
        self,
        index: u32,
        name: impl Into<String>,
        resource: wgpu::BindingResource<'a>,
        binding_type: wgpu::SamplerBindingType,
    ) -> Self {
        self.push(index, name, BindingConfigType::Sampler(binding_type), resource)
    }

    pub fn build(self, device: &wgpu::Device) -> (wgpu::BindGroupLayout, wgpu::BindGroup) {
        let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = self
            .bindings
            .iter()
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding: binding.index,
                visibility: self.visibility,
                ty: match &binding.binding_type {
                    BindingConfigType::Buffer(buffer_type) => wgpu::BindingType::Buffer {
                        ty: *buffer_type,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingConfigType::Texture(sample_type) => wgpu::BindingType::Texture {
                        sample_type: *sample_type,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    BindingConfigType::ArrayTexture(sample_type) => wgpu::BindingType::Texture {
                        sample_type: *sample_type,
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    BindingConfigType::Sampler(binding_type) => {
                        wgpu::BindingType::Sampler(*binding_type)
                    }
                },
                count: None,
            })
            .collect();

        let layout_label = format!("{} bind group layout", self.name);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&layout_label),
            entries: &layout_entries,
        });

        let entries: Vec<wgpu::BindGroupEntry> = self
            .bindings
            .into_iter()
            .map(|binding| wgpu::BindGroupEntry {
                binding: binding.index,
                resource: binding.resource,
            })
            .collect();

        let group_label = format!("{} bind group", self.name);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&group_label),
            layout: &layout,
            entries: &entries,
        });

        (layout, bind_group)
    }
}
