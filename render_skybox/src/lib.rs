#![forbid(unsafe_code)]

//! Equirectangular-video skybox renderer.
//!
//! Per tick: a compute pass converts the uploaded bi-planar YCbCr frame
//! to RGB, six offscreen passes project that frame onto a cubemap, and a
//! final pass draws the cubemap as a skybox under the caller's view
//! rotation. Up to three frames are kept in flight, gated by
//! [`FramePacer`].

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::mpsc;

use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

use video_source::{ColorMatrix, FrameError, FrameView};

pub use mesh::{build_cube, MeshData, MeshError, MeshVertex, MESH_VERTEX_STRIDE};
pub use pacing::{FrameCompletion, FramePacer, FrameStatus, MAX_FRAMES_IN_FLIGHT};
pub use wgpu::SurfaceError as RenderError;

mod math;
mod mesh;
mod pacing;

use math::{
    face_view_projections, mat4_identity, mat4_mul, perspective_lh, rotation_x, rotation_y, Mat4,
    FACE_COUNT,
};

const DISPLAY_FOV_Y: f32 = std::f32::consts::FRAC_PI_3;
const DISPLAY_NEAR: f32 = 0.1;
const DISPLAY_FAR: f32 = 10.0;

const CUBE_EDGE: f32 = 2.0;

const CUBEMAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Slot stride inside multi-block uniform buffers; wgpu's baseline
/// `min_uniform_buffer_offset_alignment`.
const UNIFORM_SLOT_STRIDE: u64 = 256;
/// Bound range per draw: one mat4.
const UNIFORM_BLOCK_SIZE: u64 = 64;

const WORKGROUP_SIZE: u32 = 16;

const CLEAR_COLOR: wgpu::Color = wgpu::Color::WHITE;

/// Cube-face edge length in texels for a given equirect frame width.
/// A 360 equirect frame is laid out at 3x the eventual face edge.
pub fn cubemap_edge(frame_width: u32) -> u32 {
    frame_width / 3
}

fn depth_needs_rebuild(current: (u32, u32), target: (u32, u32)) -> bool {
    current != target
}

#[derive(Debug)]
pub enum RenderInitError {
    Surface(wgpu::CreateSurfaceError),
    NoAdapter,
    RequestDevice(wgpu::RequestDeviceError),
}

impl fmt::Display for RenderInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderInitError::Surface(err) => write!(f, "surface creation failed: {}", err),
            RenderInitError::NoAdapter => write!(f, "no suitable GPU adapter found"),
            RenderInitError::RequestDevice(err) => write!(f, "request device failed: {}", err),
        }
    }
}

impl std::error::Error for RenderInitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderInitError::Surface(err) => Some(err),
            RenderInitError::RequestDevice(err) => Some(err),
            RenderInitError::NoAdapter => None,
        }
    }
}

#[derive(Debug)]
pub enum CaptureError {
    SizeMismatch { expected: u32, actual: [u32; 2] },
    UnsupportedFormat(wgpu::TextureFormat),
    MapFailed,
    BufferOverflow,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::SizeMismatch { expected, actual } => write!(
                f,
                "cubemap readback size mismatch (expected {0}x{0}, got {1}x{2})",
                expected, actual[0], actual[1]
            ),
            CaptureError::UnsupportedFormat(format) => {
                write!(f, "cubemap readback unsupported format: {:?}", format)
            }
            CaptureError::MapFailed => write!(f, "cubemap readback buffer map failed"),
            CaptureError::BufferOverflow => write!(f, "cubemap readback size overflow"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Per-tick inputs, owned by the caller: the accumulated view rotation.
/// Pitch rotates about the x-axis, yaw about the y-axis, both radians.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameContext {
    pub pitch: f32,
    pub yaw: f32,
}

/// CPU copy of all six cubemap faces, RGBA8, in layer order
/// +X, -X, +Y, -Y, +Z, -Z.
pub struct CubemapFaces {
    pub edge: u32,
    pub faces: Vec<Vec<u8>>,
}

struct ConvertStage {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    luma_texture: wgpu::Texture,
    chroma_texture: wgpu::Texture,
    rgb_view: wgpu::TextureView,
    workgroups: [u32; 2],
    frame_width: u32,
    frame_height: u32,
}

impl ConvertStage {
    fn new(device: &wgpu::Device, frame_width: u32, frame_height: u32, matrix: ColorMatrix) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("viewer.convert.shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(CONVERT_SHADER)),
        });

        let luma_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("viewer.convert.luma"),
            size: wgpu::Extent3d {
                width: frame_width,
                height: frame_height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let chroma_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("viewer.convert.chroma"),
            size: wgpu::Extent3d {
                width: frame_width.div_ceil(2),
                height: frame_height.div_ceil(2),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rg8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let rgb_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("viewer.convert.rgb"),
            size: wgpu::Extent3d {
                width: frame_width,
                height: frame_height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CUBEMAP_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let luma_view = luma_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let chroma_view = chroma_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let rgb_view = rgb_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let coefficients = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("viewer.convert.coefficients"),
            contents: &color_params_bytes(matrix),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("viewer.convert.bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: CUBEMAP_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("viewer.convert.bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&luma_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&chroma_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&rgb_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: coefficients.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("viewer.convert.pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("viewer.convert.pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "cs_main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        // One invocation per output pixel; edge groups cover the remainder
        // and their out-of-bounds threads return early.
        let workgroups = [
            frame_width.div_ceil(WORKGROUP_SIZE),
            frame_height.div_ceil(WORKGROUP_SIZE),
        ];

        Self {
            pipeline,
            bind_group,
            luma_texture,
            chroma_texture,
            rgb_view,
            workgroups,
            frame_width,
            frame_height,
        }
    }

    fn upload(&self, queue: &wgpu::Queue, frame: &FrameView<'_>) -> Result<(), FrameError> {
        if frame.width != self.frame_width || frame.height != self.frame_height {
            return Err(FrameError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            });
        }
        upload_plane(
            queue,
            &self.luma_texture,
            "luma",
            self.frame_width,
            self.frame_height,
            1,
            frame.luma,
        )?;
        upload_plane(
            queue,
            &self.chroma_texture,
            "chroma",
            self.frame_width.div_ceil(2),
            self.frame_height.div_ceil(2),
            2,
            frame.chroma,
        )
    }

    fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("viewer.convert.pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(self.workgroups[0], self.workgroups[1], 1);
    }
}

struct CaptureStage {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    cubemap_texture: wgpu::Texture,
    cubemap_view: wgpu::TextureView,
    face_views: Vec<wgpu::TextureView>,
    depth_views: Vec<wgpu::TextureView>,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    edge: u32,
}

impl CaptureStage {
    fn new(device: &wgpu::Device, edge: u32, source_view: &wgpu::TextureView) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("viewer.capture.shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(CAPTURE_SHADER)),
        });

        let cubemap_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("viewer.capture.cubemap"),
            size: wgpu::Extent3d {
                width: edge,
                height: edge,
                depth_or_array_layers: FACE_COUNT as u32,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CUBEMAP_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let cubemap_view = cubemap_texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("viewer.capture.cubemap_view"),
            format: Some(CUBEMAP_FORMAT),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            aspect: wgpu::TextureAspect::All,
            base_mip_level: 0,
            mip_level_count: Some(1),
            base_array_layer: 0,
            array_layer_count: Some(FACE_COUNT as u32),
        });

        let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("viewer.capture.depth"),
            size: wgpu::Extent3d {
                width: edge,
                height: edge,
                depth_or_array_layers: FACE_COUNT as u32,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let mut face_views = Vec::with_capacity(FACE_COUNT);
        let mut depth_views = Vec::with_capacity(FACE_COUNT);
        for face in 0..FACE_COUNT as u32 {
            face_views.push(cubemap_texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("viewer.capture.face_view"),
                format: Some(CUBEMAP_FORMAT),
                dimension: Some(wgpu::TextureViewDimension::D2),
                aspect: wgpu::TextureAspect::All,
                base_mip_level: 0,
                mip_level_count: Some(1),
                base_array_layer: face,
                array_layer_count: Some(1),
            }));
            depth_views.push(depth_texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("viewer.capture.depth_view"),
                format: Some(DEPTH_FORMAT),
                dimension: Some(wgpu::TextureViewDimension::D2),
                aspect: wgpu::TextureAspect::All,
                base_mip_level: 0,
                mip_level_count: Some(1),
                base_array_layer: face,
                array_layer_count: Some(1),
            }));
        }

        // The six view-projections are static for the lifetime of the
        // renderer; one aligned slot per face, selected by dynamic offset.
        let face_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("viewer.capture.face_params"),
            contents: &face_params_bytes(),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("viewer.capture.sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("viewer.capture.bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("viewer.capture.bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &face_params,
                        offset: 0,
                        size: wgpu::BufferSize::new(UNIFORM_BLOCK_SIZE),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("viewer.capture.pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("viewer.capture.pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[mesh_vertex_layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: CUBEMAP_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let cube = build_cube(CUBE_EDGE, true);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("viewer.capture.vertex_buffer"),
            contents: &cube.vertex_bytes(),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("viewer.capture.index_buffer"),
            contents: &cube.index_bytes(),
            usage: wgpu::BufferUsages::INDEX,
        });
        let index_count = cube.indices.len() as u32;

        Self {
            pipeline,
            bind_group,
            cubemap_texture,
            cubemap_view,
            face_views,
            depth_views,
            vertex_buffer,
            index_buffer,
            index_count,
            edge,
        }
    }

    /// Renders all six faces; one sub-pass per cubemap layer, each with
    /// its own cleared color and depth layer.
    fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        for face in 0..FACE_COUNT {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("viewer.capture.pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.face_views[face],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_views[face],
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            let offset = (face as u64 * UNIFORM_SLOT_STRIDE) as u32;
            pass.set_bind_group(0, &self.bind_group, &[offset]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..self.index_count, 0, 0..1);
        }
    }
}

struct SkyboxStage {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    uniform_buffer: wgpu::Buffer,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    depth_view: wgpu::TextureView,
    depth_size: (u32, u32),
}

impl SkyboxStage {
    fn new(
        device: &wgpu::Device,
        config: &wgpu::SurfaceConfiguration,
        cubemap_view: &wgpu::TextureView,
    ) -> Self {
        let shader_source = if config.format.is_srgb() {
            SKYBOX_SHADER_SRGB
        } else {
            SKYBOX_SHADER
        };
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("viewer.skybox.shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shader_source)),
        });

        // One aligned slot per in-flight frame, round-robin via dynamic
        // offset. Written only after the pacer grants the slot.
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("viewer.skybox.uniform_buffer"),
            contents: &uniform_init_bytes(),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("viewer.skybox.sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("viewer.skybox.bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::Cube,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("viewer.skybox.bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &uniform_buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(UNIFORM_BLOCK_SIZE),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(cubemap_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("viewer.skybox.pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("viewer.skybox.pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[mesh_vertex_layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let skybox = build_cube(CUBE_EDGE, true);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("viewer.skybox.vertex_buffer"),
            contents: &skybox.vertex_bytes(),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("viewer.skybox.index_buffer"),
            contents: &skybox.index_bytes(),
            usage: wgpu::BufferUsages::INDEX,
        });
        let index_count = skybox.indices.len() as u32;

        let (depth_view, depth_size) =
            create_display_depth(device, (config.width.max(1), config.height.max(1)));

        Self {
            pipeline,
            bind_group,
            uniform_buffer,
            vertex_buffer,
            index_buffer,
            index_count,
            depth_view,
            depth_size,
        }
    }

    /// Stale-size depth use would make the depth test undefined against
    /// the new drawable, so this runs before every display pass.
    fn ensure_depth(&mut self, device: &wgpu::Device, size: PhysicalSize<u32>) {
        let target = (size.width.max(1), size.height.max(1));
        if !depth_needs_rebuild(self.depth_size, target) {
            return;
        }
        let (depth_view, depth_size) = create_display_depth(device, target);
        self.depth_view = depth_view;
        self.depth_size = depth_size;
        log::debug!("display depth buffer rebuilt at {}x{}", target.0, target.1);
    }

    fn write_uniforms(&self, queue: &wgpu::Queue, slot: usize, mvp: Mat4) {
        queue.write_buffer(
            &self.uniform_buffer,
            slot as u64 * UNIFORM_SLOT_STRIDE,
            &matrix_bytes(mvp),
        );
    }

    fn encode(&self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView, slot: usize) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("viewer.skybox.pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        let offset = (slot as u64 * UNIFORM_SLOT_STRIDE) as u32;
        pass.set_bind_group(0, &self.bind_group, &[offset]);
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..self.index_count, 0, 0..1);
    }
}

pub struct SkyboxRenderer<'window> {
    window: &'window winit::window::Window,
    surface: wgpu::Surface<'window>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
    frame_width: u32,
    frame_height: u32,
    projection: Mat4,
    convert: ConvertStage,
    capture: CaptureStage,
    skybox: SkyboxStage,
    pacer: FramePacer,
}

impl<'window> SkyboxRenderer<'window> {
    /// Builds every GPU resource up front. All frames of the video are
    /// assumed to share `frame_width` x `frame_height`.
    pub fn new(
        window: &'window winit::window::Window,
        frame_width: u32,
        frame_height: u32,
        matrix: ColorMatrix,
    ) -> Result<Self, RenderInitError> {
        pollster::block_on(Self::new_async(window, frame_width, frame_height, matrix))
    }

    async fn new_async(
        window: &'window winit::window::Window,
        frame_width: u32,
        frame_height: u32,
        matrix: ColorMatrix,
    ) -> Result<Self, RenderInitError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(RenderInitError::Surface)?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderInitError::NoAdapter)?;
        log::info!("rendering on {}", adapter.get_info().name);
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("viewer.device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(RenderInitError::RequestDevice)?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .first()
            .copied()
            .unwrap_or(wgpu::TextureFormat::Bgra8UnormSrgb);
        let present_mode = caps
            .present_modes
            .first()
            .copied()
            .unwrap_or(wgpu::PresentMode::Fifo);
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let pacer = FramePacer::new();
        let error_flag = pacer.error_flag();
        device.on_uncaptured_error(Box::new(move |error| {
            error_flag.store(true, Ordering::Release);
            log::error!("wgpu device error: {}", error);
        }));

        let edge = cubemap_edge(frame_width).max(1);
        let convert = ConvertStage::new(&device, frame_width, frame_height, matrix);
        let capture = CaptureStage::new(&device, edge, &convert.rgb_view);
        let skybox = SkyboxStage::new(&device, &config, &capture.cubemap_view);

        let aspect = config.width as f32 / config.height as f32;
        let projection = perspective_lh(DISPLAY_FOV_Y, aspect, DISPLAY_NEAR, DISPLAY_FAR);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            frame_width,
            frame_height,
            projection,
            convert,
            capture,
            skybox,
            pacer,
        })
    }

    pub fn window_id(&self) -> winit::window::WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &winit::window::Window {
        self.window
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn window_inner_size(&self) -> PhysicalSize<u32> {
        self.window.inner_size()
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    pub fn cubemap_edge(&self) -> u32 {
        self.capture.edge
    }

    pub fn in_flight(&self) -> usize {
        self.pacer.in_flight()
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
        let aspect = new_size.width as f32 / new_size.height as f32;
        self.projection = perspective_lh(DISPLAY_FOV_Y, aspect, DISPLAY_NEAR, DISPLAY_FAR);
        // The depth attachment is rebuilt by the size check at the top of
        // the next tick.
    }

    /// Stages the next decoded frame's planes for the conversion pass.
    pub fn upload_frame(&mut self, frame: &FrameView<'_>) -> Result<(), FrameError> {
        self.convert.upload(&self.queue, frame)
    }

    /// One display tick: convert, capture all six faces, draw the skybox,
    /// present. Blocks only when three frames are already in flight.
    pub fn render(&mut self, ctx: &FrameContext) -> Result<(), RenderError> {
        for completion in self.pacer.drain_completions() {
            match completion.status {
                FrameStatus::Completed => {
                    log::debug!("frame slot {} retired", completion.slot);
                }
                FrameStatus::DeviceError => {
                    log::warn!(
                        "frame slot {} retired after a device error; frame dropped",
                        completion.slot
                    );
                }
            }
        }

        let frame = self.surface.get_current_texture()?;
        let slot = self.pacer.acquire_slot();

        self.skybox.ensure_depth(&self.device, self.size);

        let model_view = mat4_mul(rotation_x(ctx.pitch), rotation_y(ctx.yaw));
        let mvp = mat4_mul(self.projection, model_view);
        self.skybox.write_uniforms(&self.queue, slot, mvp);

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("viewer.render.encoder"),
            });
        self.convert.encode(&mut encoder);
        self.capture.encode(&mut encoder);
        self.skybox.encode(&mut encoder, &view, slot);
        self.queue.submit(Some(encoder.finish()));
        self.queue
            .on_submitted_work_done(self.pacer.completion_handler(slot));
        frame.present();
        Ok(())
    }

    /// Copies all six cubemap faces back to the CPU. Debug facility; it
    /// waits for the GPU, so keep it off the steady-state render path.
    pub fn read_cubemap_faces(&self) -> Result<CubemapFaces, CaptureError> {
        let readback = CubemapReadback::new(&self.device, self.capture.edge)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("viewer.readback.encoder"),
            });
        readback.encode(&mut encoder, &self.capture.cubemap_texture)?;
        self.queue.submit(Some(encoder.finish()));
        let faces = readback.read(&self.device)?;
        Ok(CubemapFaces {
            edge: self.capture.edge,
            faces,
        })
    }
}

impl Drop for SkyboxRenderer<'_> {
    fn drop(&mut self) {
        // Unblock any waiter; outstanding GPU work drains on its own.
        self.pacer.release_all();
    }
}

struct CubemapReadback {
    edge: u32,
    bytes_per_row: u32,
    padded_bytes_per_row: u32,
    buffer: wgpu::Buffer,
}

impl CubemapReadback {
    fn new(device: &wgpu::Device, edge: u32) -> Result<Self, CaptureError> {
        let bytes_per_row = edge.checked_mul(4).ok_or(CaptureError::BufferOverflow)?;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = bytes_per_row.div_ceil(align) * align;
        let buffer_size = (padded_bytes_per_row as u64)
            .checked_mul(edge as u64)
            .and_then(|face| face.checked_mul(FACE_COUNT as u64))
            .ok_or(CaptureError::BufferOverflow)?;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("viewer.readback.buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Ok(Self {
            edge,
            bytes_per_row,
            padded_bytes_per_row,
            buffer,
        })
    }

    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
    ) -> Result<(), CaptureError> {
        let size = texture.size();
        if size.width != self.edge || size.height != self.edge {
            return Err(CaptureError::SizeMismatch {
                expected: self.edge,
                actual: [size.width, size.height],
            });
        }
        if texture.format() != CUBEMAP_FORMAT {
            return Err(CaptureError::UnsupportedFormat(texture.format()));
        }
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.edge),
                },
            },
            wgpu::Extent3d {
                width: self.edge,
                height: self.edge,
                depth_or_array_layers: FACE_COUNT as u32,
            },
        );
        Ok(())
    }

    fn read(&self, device: &wgpu::Device) -> Result<Vec<Vec<u8>>, CaptureError> {
        let buffer_slice = self.buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        match receiver.recv() {
            Ok(Ok(())) => {}
            _ => return Err(CaptureError::MapFailed),
        }
        let mapped = buffer_slice.get_mapped_range();
        let face_rows = self.edge as usize;
        let face_stride = self.padded_bytes_per_row as usize * face_rows;
        let mut faces = Vec::with_capacity(FACE_COUNT);
        for face in 0..FACE_COUNT {
            let mut rgba = vec![0u8; self.bytes_per_row as usize * face_rows];
            for row in 0..face_rows {
                let src = face * face_stride + row * self.padded_bytes_per_row as usize;
                let dst = row * self.bytes_per_row as usize;
                rgba[dst..dst + self.bytes_per_row as usize]
                    .copy_from_slice(&mapped[src..src + self.bytes_per_row as usize]);
            }
            faces.push(rgba);
        }
        drop(mapped);
        self.buffer.unmap();
        Ok(faces)
    }
}

fn create_display_depth(
    device: &wgpu::Device,
    size: (u32, u32),
) -> (wgpu::TextureView, (u32, u32)) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("viewer.skybox.depth"),
        size: wgpu::Extent3d {
            width: size.0,
            height: size.1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (view, size)
}

fn mesh_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] = [
        wgpu::VertexAttribute {
            offset: 0,
            shader_location: 0,
            format: wgpu::VertexFormat::Float32x3,
        },
        wgpu::VertexAttribute {
            offset: 12,
            shader_location: 1,
            format: wgpu::VertexFormat::Float32x3,
        },
        wgpu::VertexAttribute {
            offset: 24,
            shader_location: 2,
            format: wgpu::VertexFormat::Float32x2,
        },
    ];
    wgpu::VertexBufferLayout {
        array_stride: MESH_VERTEX_STRIDE,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

fn matrix_bytes(matrix: Mat4) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(64);
    for col in matrix {
        for value in col {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    bytes
}

fn uniform_init_bytes() -> Vec<u8> {
    let mut bytes = vec![0u8; MAX_FRAMES_IN_FLIGHT * UNIFORM_SLOT_STRIDE as usize];
    for slot in 0..MAX_FRAMES_IN_FLIGHT {
        let offset = slot * UNIFORM_SLOT_STRIDE as usize;
        bytes[offset..offset + 64].copy_from_slice(&matrix_bytes(mat4_identity()));
    }
    bytes
}

fn face_params_bytes() -> Vec<u8> {
    let mut bytes = vec![0u8; FACE_COUNT * UNIFORM_SLOT_STRIDE as usize];
    for (face, view_proj) in face_view_projections().into_iter().enumerate() {
        let offset = face * UNIFORM_SLOT_STRIDE as usize;
        bytes[offset..offset + 64].copy_from_slice(&matrix_bytes(view_proj));
    }
    bytes
}

fn color_params_bytes(matrix: ColorMatrix) -> Vec<u8> {
    let c = matrix.coefficients();
    let values = [c.y_scale, c.r_cr, c.g_cb, c.g_cr, c.b_cb, 0.0, 0.0, 0.0];
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn upload_plane(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    plane: &'static str,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    data: &[u8],
) -> Result<(), FrameError> {
    let row_bytes = usize::try_from(width).map_err(|_| FrameError::SizeOverflow)?;
    let row_bytes = row_bytes
        .checked_mul(bytes_per_pixel as usize)
        .ok_or(FrameError::SizeOverflow)?;
    let height_usize = usize::try_from(height).map_err(|_| FrameError::SizeOverflow)?;
    let expected = row_bytes
        .checked_mul(height_usize)
        .ok_or(FrameError::SizeOverflow)?;
    if data.len() != expected {
        return Err(FrameError::PlaneSizeMismatch {
            plane,
            expected,
            actual: data.len(),
        });
    }

    let padded = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize)?;
    let data = if padded == row_bytes {
        data.to_vec()
    } else {
        let mut padded_data = vec![0u8; padded * height_usize];
        for row in 0..height_usize {
            let src_start = row * row_bytes;
            let dst_start = row * padded;
            padded_data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&data[src_start..src_start + row_bytes]);
        }
        padded_data
    };

    let bytes_per_row = u32::try_from(padded).map_err(|_| FrameError::SizeOverflow)?;
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(bytes_per_row),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    Ok(())
}

fn align_to(value: usize, alignment: usize) -> Result<usize, FrameError> {
    if alignment == 0 {
        return Err(FrameError::SizeOverflow);
    }
    let add = alignment - 1;
    let sum = value.checked_add(add).ok_or(FrameError::SizeOverflow)?;
    Ok(sum / alignment * alignment)
}

const CONVERT_SHADER: &str = r#"
struct ColorParams {
    y_scale: f32,
    r_cr: f32,
    g_cb: f32,
    g_cr: f32,
    b_cb: f32,
}

@group(0) @binding(0)
var t_luma: texture_2d<f32>;
@group(0) @binding(1)
var t_chroma: texture_2d<f32>;
@group(0) @binding(2)
var t_rgb: texture_storage_2d<rgba8unorm, write>;
@group(0) @binding(3)
var<uniform> params: ColorParams;

@compute @workgroup_size(16, 16, 1)
fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(t_rgb);
    if (gid.x >= dims.x || gid.y >= dims.y) {
        return;
    }
    let y = textureLoad(t_luma, vec2<i32>(gid.xy), 0).r;
    let chroma = textureLoad(t_chroma, vec2<i32>(gid.xy / vec2<u32>(2u, 2u)), 0).rg;
    let cb = chroma.r - 0.5;
    let cr = chroma.g - 0.5;
    let y_adj = max(y - (16.0 / 255.0), 0.0) * params.y_scale;
    let r = y_adj + params.r_cr * cr;
    let g = y_adj + params.g_cb * cb + params.g_cr * cr;
    let b = y_adj + params.b_cb * cb;
    let rgb = clamp(vec3<f32>(r, g, b), vec3<f32>(0.0), vec3<f32>(1.0));
    textureStore(t_rgb, vec2<i32>(gid.xy), vec4<f32>(rgb, 1.0));
}
"#;

const CAPTURE_SHADER: &str = r#"
struct FaceParams {
    view_proj: mat4x4<f32>,
}

@group(0) @binding(0)
var<uniform> face: FaceParams;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) direction: vec3<f32>,
}

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
) -> VertexOut {
    var out: VertexOut;
    out.position = face.view_proj * vec4<f32>(position, 1.0);
    out.direction = position;
    return out;
}

@group(0) @binding(1)
var t_frame: texture_2d<f32>;
@group(0) @binding(2)
var s_frame: sampler;

const PI: f32 = 3.1415926535897931;

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let dir = normalize(in.direction);
    let lon = atan2(dir.x, dir.z);
    let lat = asin(clamp(dir.y, -1.0, 1.0));
    let uv = vec2<f32>(0.5 + lon / (2.0 * PI), 0.5 - lat / PI);
    return textureSample(t_frame, s_frame, uv);
}
"#;

const SKYBOX_SHADER: &str = r#"
struct Uniforms {
    mvp: mat4x4<f32>,
}

@group(0) @binding(0)
var<uniform> uniforms: Uniforms;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) direction: vec3<f32>,
}

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
) -> VertexOut {
    var out: VertexOut;
    out.position = uniforms.mvp * vec4<f32>(position, 1.0);
    out.direction = position;
    return out;
}

@group(0) @binding(1)
var t_env: texture_cube<f32>;
@group(0) @binding(2)
var s_env: sampler;

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return textureSample(t_env, s_env, normalize(in.direction));
}
"#;

const SKYBOX_SHADER_SRGB: &str = r#"
struct Uniforms {
    mvp: mat4x4<f32>,
}

@group(0) @binding(0)
var<uniform> uniforms: Uniforms;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) direction: vec3<f32>,
}

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
) -> VertexOut {
    var out: VertexOut;
    out.position = uniforms.mvp * vec4<f32>(position, 1.0);
    out.direction = position;
    return out;
}

@group(0) @binding(1)
var t_env: texture_cube<f32>;
@group(0) @binding(2)
var s_env: sampler;

fn srgb_to_linear(c: vec3<f32>) -> vec3<f32> {
    let cutoff = vec3<f32>(0.04045);
    let low = c / 12.92;
    let high = pow((c + vec3<f32>(0.055)) / 1.055, vec3<f32>(2.4));
    return select(high, low, c <= cutoff);
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let rgb = textureSample(t_env, s_env, normalize(in.direction)).rgb;
    return vec4<f32>(srgb_to_linear(rgb), 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cubemap_edge_is_a_third_of_the_frame_width() {
        assert_eq!(cubemap_edge(1536), 512);
        assert_eq!(cubemap_edge(1920), 640);
        // Non-divisible widths floor rather than error.
        assert_eq!(cubemap_edge(2560), 853);
        assert_eq!(cubemap_edge(1), 0);
    }

    #[test]
    fn depth_rebuild_is_skipped_for_an_unchanged_size() {
        assert!(!depth_needs_rebuild((800, 600), (800, 600)));
        assert!(depth_needs_rebuild((800, 600), (800, 601)));
        assert!(depth_needs_rebuild((800, 600), (1024, 600)));
    }

    #[test]
    fn uniform_slots_sit_on_aligned_offsets() {
        assert_eq!(UNIFORM_SLOT_STRIDE % 256, 0);
        assert!(UNIFORM_BLOCK_SIZE <= UNIFORM_SLOT_STRIDE);
        let bytes = uniform_init_bytes();
        assert_eq!(
            bytes.len(),
            MAX_FRAMES_IN_FLIGHT * UNIFORM_SLOT_STRIDE as usize
        );
    }

    #[test]
    fn face_params_pack_six_matrices_at_aligned_strides() {
        let bytes = face_params_bytes();
        assert_eq!(bytes.len(), 6 * UNIFORM_SLOT_STRIDE as usize);
        for (face, view_proj) in face_view_projections().into_iter().enumerate() {
            let offset = face * UNIFORM_SLOT_STRIDE as usize;
            assert_eq!(
                &bytes[offset..offset + 64],
                matrix_bytes(view_proj).as_slice()
            );
            // The tail of each slot is padding.
            assert!(bytes[offset + 64..offset + UNIFORM_SLOT_STRIDE as usize]
                .iter()
                .all(|&byte| byte == 0));
        }
    }

    #[test]
    fn color_params_match_the_selected_matrix() {
        let bytes = color_params_bytes(ColorMatrix::Bt601);
        assert_eq!(bytes.len(), 32);
        let y_scale = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert!((y_scale - 1.164).abs() < 1e-6);
        let bt709 = color_params_bytes(ColorMatrix::Bt709);
        let r_cr = f32::from_le_bytes([bt709[4], bt709[5], bt709[6], bt709[7]]);
        assert!((r_cr - 1.793).abs() < 1e-6);
    }

    #[test]
    fn align_to_rounds_up_to_the_boundary() {
        assert_eq!(align_to(256, 256).expect("aligned"), 256);
        assert_eq!(align_to(257, 256).expect("aligned"), 512);
        assert_eq!(align_to(0, 256).expect("aligned"), 0);
    }

    #[test]
    fn matrix_bytes_are_column_major_f32s() {
        let bytes = matrix_bytes(mat4_identity());
        assert_eq!(bytes.len(), 64);
        let first = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(first, 1.0);
        let second = f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(second, 0.0);
    }

    #[test]
    fn forward_direction_reproduces_the_source_pattern() {
        use video_source::{SyntheticSource, TestPattern, VideoSource};

        // An unrotated view looks along +Z, so the displayed centre pixel
        // samples the +Z cubemap face centre. The capture pass fills that
        // texel from the equirect frame at the direction's
        // longitude/latitude, and the conversion kernel shares its math
        // with ColorMatrix::decode, so the whole chain is checkable on
        // the CPU.
        let mut source = SyntheticSource::new(96, 48, 30.0, TestPattern::Gradient, ColorMatrix::Bt601)
            .expect("source");
        let frame = source.copy_frame_for(0).expect("frame");
        let uv = math::equirect_uv(math::Vec3::new(0.0, 0.0, 1.0));
        let px = ((uv[0] * frame.width as f32) as usize).min(frame.width as usize - 1);
        let py = ((uv[1] * frame.height as f32) as usize).min(frame.height as usize - 1);
        let y = frame.luma[py * frame.width as usize + px];
        let chroma_width = frame.width.div_ceil(2) as usize;
        let offset = ((py / 2) * chroma_width + px / 2) * 2;
        let decoded =
            ColorMatrix::Bt601.decode(y, frame.chroma[offset], frame.chroma[offset + 1]);
        let u = (px as f32 + 0.5) / frame.width as f32;
        let v = (py as f32 + 0.5) / frame.height as f32;
        let expected = source.rgb_at(u, v, 0);
        for channel in 0..3 {
            let diff = (decoded[channel] as i32 - expected[channel] as i32).abs();
            assert!(
                diff <= 8,
                "decoded {:?}, expected {:?} (channel {})",
                decoded,
                expected,
                channel
            );
        }
    }
}
