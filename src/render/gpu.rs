//! wgpu-backed output surface
//!
//! Renders offscreen: an optional fullscreen pass for the live background,
//! then the scene's pre-shaded triangles with a depth buffer. Every frame is
//! copied back so the host can display it.

use super::camera::PerspectiveCamera;
use super::output::{shaded_triangles, OutputFactory, OutputOptions, OutputSurface};
use super::scene::{Background, Scene, TextureFilter};
use crate::error::SurfaceError;
use image::RgbaImage;
use std::sync::Arc;
use wgpu::util::DeviceExt;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct SceneUniforms {
    view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct MeshVertex {
    position: [f32; 3],
    color: [f32; 3],
}

impl MeshVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

struct Targets {
    width: u32,
    height: u32,
    color: wgpu::Texture,
    depth: wgpu::Texture,
}

pub struct GpuOutput {
    device: wgpu::Device,
    queue: wgpu::Queue,
    mesh_pipeline: wgpu::RenderPipeline,
    background_pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    texture_bind_group_layout: wgpu::BindGroupLayout,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    targets: Option<Targets>,
    width: u32,
    height: u32,
    preserve: bool,
    presented: Option<Arc<RgbaImage>>,
    disposed: bool,
}

fn gpu_err(e: impl std::fmt::Display) -> SurfaceError {
    SurfaceError::Gpu(e.to_string())
}

impl GpuOutput {
    pub async fn new(options: OutputOptions) -> Result<Self, SurfaceError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| SurfaceError::Gpu("no suitable GPU adapter".into()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Brandcam Render Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(gpu_err)?;

        let mesh_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mesh Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/mesh.wgsl").into()),
        });
        let background_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Background Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/background.wgsl").into()),
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scene Uniforms"),
            size: std::mem::size_of::<SceneUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Uniform Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Uniform Bind Group"),
            layout: &uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Background Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let sampler = |filter: wgpu::FilterMode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        };
        let linear_sampler = sampler(wgpu::FilterMode::Linear);
        let nearest_sampler = sampler(wgpu::FilterMode::Nearest);

        let mesh_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&uniform_bind_group_layout],
            push_constant_ranges: &[],
        });
        let background_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Background Pipeline Layout"),
            bind_group_layouts: &[&texture_bind_group_layout],
            push_constant_ranges: &[],
        });

        let color_target = [Some(wgpu::ColorTargetState {
            format: COLOR_FORMAT,
            blend: Some(wgpu::BlendState::REPLACE),
            write_mask: wgpu::ColorWrites::ALL,
        })];

        let mesh_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mesh Pipeline"),
            layout: Some(&mesh_layout),
            vertex: wgpu::VertexState {
                module: &mesh_shader,
                entry_point: "vs_main",
                buffers: &[MeshVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &mesh_shader,
                entry_point: "fs_main",
                targets: &color_target,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // Shares the pass with the mesh pipeline, so it must declare the
        // same depth format even though it never tests or writes depth
        let background_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Background Pipeline"),
            layout: Some(&background_layout),
            vertex: wgpu::VertexState {
                module: &background_shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &background_shader,
                entry_point: "fs_main",
                targets: &color_target,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        tracing::info!(adapter = ?adapter.get_info().name, "GPU output ready");

        Ok(Self {
            device,
            queue,
            mesh_pipeline,
            background_pipeline,
            uniform_buffer,
            uniform_bind_group,
            texture_bind_group_layout,
            linear_sampler,
            nearest_sampler,
            targets: None,
            width: options.width.max(1),
            height: options.height.max(1),
            preserve: options.preserve_output_buffer,
            presented: None,
            disposed: false,
        })
    }

    /// Factory for `RenderSurface::start`; blocks while the device is created
    pub fn factory() -> OutputFactory {
        Box::new(
            |options: OutputOptions| -> Result<Box<dyn OutputSurface>, SurfaceError> {
                let output = pollster::block_on(GpuOutput::new(options))?;
                Ok(Box::new(output))
            },
        )
    }

    /// (Re)create the color and depth targets when the size changed
    fn ensure_targets(&mut self) {
        let (width, height) = (self.width, self.height);
        let stale = self
            .targets
            .as_ref()
            .map_or(true, |t| t.width != width || t.height != height);

        if stale {
            if let Some(old) = self.targets.take() {
                old.color.destroy();
                old.depth.destroy();
            }
            let size = wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            };
            let texture = |label: &'static str,
                           format: wgpu::TextureFormat,
                           usage: wgpu::TextureUsages| {
                self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage,
                    view_formats: &[],
                })
            };
            let color = texture(
                "Output Frame",
                COLOR_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            );
            let depth = texture(
                "Depth Buffer",
                DEPTH_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            );
            self.targets = Some(Targets {
                width,
                height,
                color,
                depth,
            });
        }
    }

    fn background_bind_group(&self, background: &Background) -> Option<wgpu::BindGroup> {
        let Background::Video(texture) = background else {
            return None;
        };
        let frame = texture.current_frame()?;
        let (width, height) = frame.dimensions();
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let input = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Background Frame"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &input,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.as_raw(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            extent,
        );

        let sampler = match texture.filter {
            TextureFilter::Linear => &self.linear_sampler,
            TextureFilter::Nearest => &self.nearest_sampler,
        };
        let view = input.create_view(&wgpu::TextureViewDescriptor::default());
        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Background Bind Group"),
            layout: &self.texture_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        }))
    }

    fn read_back(&self, texture: &wgpu::Texture) -> Result<RgbaImage, SurfaceError> {
        let (width, height) = (self.width, self.height);
        let unpadded = 4 * width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Readback Buffer"),
            size: u64::from(padded) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv().map_err(gpu_err)?.map_err(gpu_err)?;

        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        buffer.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| SurfaceError::Gpu("readback size mismatch".into()))
    }
}

impl OutputSurface for GpuOutput {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    fn render(&mut self, scene: &Scene, camera: &PerspectiveCamera) -> Result<(), SurfaceError> {
        if self.disposed {
            return Err(SurfaceError::Disposed);
        }

        let vertices: Vec<MeshVertex> = shaded_triangles(scene)
            .flat_map(|(world, color)| {
                let rgb = color.0.map(|c| f32::from(c) / 255.0);
                world.map(|p| MeshVertex {
                    position: p.to_array(),
                    color: rgb,
                })
            })
            .collect();
        let vertex_buffer = (!vertices.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Mesh Vertices"),
                    contents: bytemuck::cast_slice(&vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                })
        });

        let uniforms = SceneUniforms {
            view_proj: camera.view_projection().to_cols_array_2d(),
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let background = self.background_bind_group(&scene.background);
        let clear = match scene.background {
            Background::Color(color) => {
                let [r, g, b] = color.0.map(|c| f64::from(c) / 255.0);
                wgpu::Color { r, g, b, a: 1.0 }
            }
            Background::Video(_) => wgpu::Color::BLACK,
        };

        self.ensure_targets();
        let Some(targets) = self.targets.as_ref() else {
            return Err(SurfaceError::Gpu("render targets missing".into()));
        };
        let color_view = targets
            .color
            .create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = targets
            .depth
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(bind_group) = &background {
                pass.set_pipeline(&self.background_pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..3, 0..1);
            }

            if let Some(buffer) = &vertex_buffer {
                pass.set_pipeline(&self.mesh_pipeline);
                pass.set_bind_group(0, &self.uniform_bind_group, &[]);
                pass.set_vertex_buffer(0, buffer.slice(..));
                pass.draw(0..vertices.len() as u32, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        let frame = self.read_back(&targets.color)?;
        self.presented = Some(Arc::new(frame));
        Ok(())
    }

    fn read_pixels(&self) -> Result<RgbaImage, SurfaceError> {
        if self.disposed {
            return Err(SurfaceError::Disposed);
        }
        if !self.preserve {
            return Err(SurfaceError::BufferNotPreserved);
        }
        self.presented
            .as_deref()
            .cloned()
            .ok_or(SurfaceError::NoFrame)
    }

    fn presented(&self) -> Option<Arc<RgbaImage>> {
        self.presented.clone()
    }

    fn dispose(&mut self) {
        if let Some(targets) = self.targets.take() {
            targets.color.destroy();
            targets.depth.destroy();
        }
        self.presented = None;
        self.disposed = true;
        tracing::debug!("GPU output disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::scene::{Color, Light, Mesh};
    use glam::Vec3;

    /// Odd width so each readback row needs padding
    const WIDTH: u32 = 70;
    const HEIGHT: u32 = 5;

    fn gpu(preserve: bool) -> Option<GpuOutput> {
        let options = OutputOptions {
            width: WIDTH,
            height: HEIGHT,
            preserve_output_buffer: preserve,
        };
        match pollster::block_on(GpuOutput::new(options)) {
            Ok(output) => Some(output),
            Err(e) => {
                eprintln!("skipping, no GPU available: {e}");
                None
            }
        }
    }

    fn camera_at(z: f32) -> PerspectiveCamera {
        let mut camera = PerspectiveCamera::new(75.0, WIDTH as f32 / HEIGHT as f32, 0.1, 1000.0);
        camera.position = Vec3::new(0.0, 0.0, z);
        camera
    }

    #[test]
    fn clears_and_reads_back_padded_rows() {
        let Some(mut output) = gpu(true) else {
            return;
        };
        output
            .render(&Scene::new(Color([255, 0, 0])), &camera_at(10.0))
            .unwrap();

        let frame = output.read_pixels().unwrap();
        assert_eq!(frame.dimensions(), (WIDTH, HEIGHT));
        assert!(frame.pixels().all(|p| p.0 == [255, 0, 0, 255]));
        assert_eq!(output.presented().unwrap().as_ref(), &frame);
    }

    #[test]
    fn draws_object_over_clear_color() {
        let Some(mut output) = gpu(true) else {
            return;
        };
        let mut scene = Scene::new(Color::BLACK);
        scene.lights.push(Light::Ambient {
            color: Color::WHITE,
            intensity: 1.0,
        });
        scene.add(
            "quad",
            Arc::new(Mesh {
                positions: vec![
                    Vec3::new(-2.0, -2.0, 0.0),
                    Vec3::new(2.0, -2.0, 0.0),
                    Vec3::new(2.0, 2.0, 0.0),
                    Vec3::new(-2.0, 2.0, 0.0),
                ],
                indices: vec![0, 1, 2, 0, 2, 3],
            }),
        );

        output.render(&scene, &camera_at(5.0)).unwrap();
        let frame = output.read_pixels().unwrap();
        assert_ne!(frame.get_pixel(WIDTH / 2, HEIGHT / 2).0, [0, 0, 0, 255]);
        assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn unpreserved_then_disposed() {
        let Some(mut output) = gpu(false) else {
            return;
        };
        output
            .render(&Scene::new(Color::WHITE), &camera_at(10.0))
            .unwrap();
        assert!(matches!(
            output.read_pixels(),
            Err(SurfaceError::BufferNotPreserved)
        ));
        assert!(output.presented().is_some());

        output.dispose();
        assert!(output.is_disposed());
        assert!(matches!(
            output.render(&Scene::new(Color::WHITE), &camera_at(10.0)),
            Err(SurfaceError::Disposed)
        ));
    }
}
