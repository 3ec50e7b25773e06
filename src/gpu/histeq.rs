// gpu/histeq.rs — GPU histogram equalization.
//
// Three-stage hybrid per frame:
//
//   1. tile_hist kernel   — per-tile 256-bin histograms, one workgroup per
//                           tile with shared-memory atomics. Global
//                           equalization is the 1×1-tile case.
//   2. CPU LUT build      — readback of the (tiny) histogram buffer, then
//                           the same clip/CDF/LUT code as the CPU path in
//                           histeq.rs. Sharing it is what keeps both
//                           backends in agreement.
//   3. remap kernels      — per-pixel LUT lookup (global) or bilinear
//                           blend of the four nearest tile LUTs (CLAHE),
//                           writing one u32 per pixel for a plain buffer
//                           readback.
//
// Pipelines are compiled once in `GpuEqualizer::new` and reused every
// frame; per-frame objects are textures, buffers and bind groups only.

use wgpu::util::DeviceExt;

use crate::gpu::device::{GpuDevice, GpuError};
use crate::histeq::{build_lut, clip_histogram};
use crate::image::Image;

/// wgpu requires buffer→texture row pitches to be 256-byte aligned.
const COPY_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Uniform block for the tile_hist kernel. Layout must match
/// `Params` in tile_hist.wgsl.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct HistParams {
    img_w: u32,
    img_h: u32,
    tile_w: u32,
    tile_h: u32,
}

/// Uniform block for the global remap kernel.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct RemapParams {
    img_w: u32,
    img_h: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Uniform block for the CLAHE remap kernel.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ClaheParams {
    img_w: u32,
    img_h: u32,
    tile_w: u32,
    tile_h: u32,
    cols: u32,
    rows: u32,
    _pad0: u32,
    _pad1: u32,
}

struct Kernel {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

/// Compiled equalization pipelines bound to one [`GpuDevice`].
pub struct GpuEqualizer {
    gpu: GpuDevice,
    tile_hist: Kernel,
    remap: Kernel,
    clahe_remap: Kernel,
}

impl GpuEqualizer {
    /// Initialize the device and compile all kernels.
    pub fn new() -> Result<Self, GpuError> {
        let gpu = GpuDevice::new()?;
        Ok(Self::with_device(gpu))
    }

    /// Compile the kernels on an existing device.
    pub fn with_device(gpu: GpuDevice) -> Self {
        let tile_hist = build_tile_hist_kernel(&gpu);
        let remap = build_remap_kernel(
            &gpu,
            "remap",
            include_str!("../shaders/remap.wgsl"),
        );
        let clahe_remap = build_remap_kernel(
            &gpu,
            "clahe_remap",
            include_str!("../shaders/clahe_remap.wgsl"),
        );
        GpuEqualizer {
            gpu,
            tile_hist,
            remap,
            clahe_remap,
        }
    }

    /// Adapter description, for logging.
    pub fn adapter_name(&self) -> &str {
        &self.gpu.adapter_info.name
    }

    /// Global histogram equalization. Bit-identical to
    /// [`crate::histeq::equalize_histogram`].
    pub fn equalize_histogram(&self, src: &Image<u8>) -> Result<Image<u8>, GpuError> {
        let w = src.width();
        let h = src.height();
        if w == 0 || h == 0 {
            return Ok(Image::new(w, h));
        }

        // Single tile covering the whole image.
        let hists = self.tile_histograms(src, w, h, 1, 1)?;
        let lut = build_lut(&hists[0], w * h);

        let lut_words: Vec<u32> = lut.iter().map(|&v| v as u32).collect();
        self.run_remap(
            &self.remap,
            src,
            &lut_words,
            RemapParams {
                img_w: w as u32,
                img_h: h as u32,
                _pad0: 0,
                _pad1: 0,
            },
        )
    }

    /// CLAHE with the given tile grid and clip limit. Matches
    /// [`crate::histeq::Clahe::apply`] within rounding of the bilinear
    /// blend.
    pub fn equalize_clahe(
        &self,
        src: &Image<u8>,
        tiles_x: usize,
        tiles_y: usize,
        clip_limit: f32,
    ) -> Result<Image<u8>, GpuError> {
        let w = src.width();
        let h = src.height();
        if w == 0 || h == 0 {
            return Ok(Image::new(w, h));
        }

        // Same grid derivation as the CPU path.
        let tile_w = div_ceil(w, tiles_x.max(1)).max(1);
        let tile_h = div_ceil(h, tiles_y.max(1)).max(1);
        let cols = div_ceil(w, tile_w);
        let rows = div_ceil(h, tile_h);

        let mut hists = self.tile_histograms(src, tile_w, tile_h, cols, rows)?;

        // Clip + LUT per tile on the CPU (256 bins per tile).
        let mut luts: Vec<u32> = Vec::with_capacity(cols * rows * 256);
        for ty in 0..rows {
            for tx in 0..cols {
                let x0 = tx * tile_w;
                let y0 = ty * tile_h;
                let tile_pixels = ((x0 + tile_w).min(w) - x0) * ((y0 + tile_h).min(h) - y0);
                let hist = &mut hists[ty * cols + tx];
                if clip_limit > 0.0 {
                    clip_histogram(hist, tile_pixels, clip_limit);
                }
                let lut = build_lut(hist, tile_pixels);
                luts.extend(lut.iter().map(|&v| v as u32));
            }
        }

        self.run_remap(
            &self.clahe_remap,
            src,
            &luts,
            ClaheParams {
                img_w: w as u32,
                img_h: h as u32,
                tile_w: tile_w as u32,
                tile_h: tile_h as u32,
                cols: cols as u32,
                rows: rows as u32,
                _pad0: 0,
                _pad1: 0,
            },
        )
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    /// Upload the image, dispatch one tile_hist workgroup per tile, and
    /// read back the per-tile histograms.
    fn tile_histograms(
        &self,
        src: &Image<u8>,
        tile_w: usize,
        tile_h: usize,
        cols: usize,
        rows: usize,
    ) -> Result<Vec<[u32; 256]>, GpuError> {
        let device = &self.gpu.device;
        let (_texture, view) = self.upload_gray(src);

        let hist_len = cols * rows * 256;
        let hist_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tile_hist output"),
            size: (hist_len * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params = HistParams {
            img_w: src.width() as u32,
            img_h: src.height() as u32,
            tile_w: tile_w as u32,
            tile_h: tile_h as u32,
        };
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("HistParams"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tile_hist bind group"),
            layout: &self.tile_hist.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: hist_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tile_histograms"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("tile_hist"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.tile_hist.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(cols as u32, rows as u32, 1);
        }

        let words = self.readback_u32(encoder, &hist_buf, hist_len)?;

        let mut out = vec![[0u32; 256]; cols * rows];
        for (tile, chunk) in out.iter_mut().zip(words.chunks_exact(256)) {
            tile.copy_from_slice(chunk);
        }
        Ok(out)
    }

    /// Upload image + LUT buffer, dispatch a remap kernel over every
    /// pixel, and read the result back as a grayscale image.
    fn run_remap<P: bytemuck::Pod>(
        &self,
        kernel: &Kernel,
        src: &Image<u8>,
        lut_words: &[u32],
        params: P,
    ) -> Result<Image<u8>, GpuError> {
        let device = &self.gpu.device;
        let w = src.width();
        let h = src.height();

        let (_texture, view) = self.upload_gray(src);

        let lut_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("remap LUTs"),
            contents: bytemuck::cast_slice(lut_words),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let dst_len = w * h;
        let dst_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("remap output"),
            size: (dst_len * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("remap params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("remap bind group"),
            layout: &kernel.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: lut_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: dst_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("run_remap"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("remap"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let (dx, dy) = self.gpu.dispatch_size(w as u32, h as u32);
            pass.dispatch_workgroups(dx, dy, 1);
        }

        let words = self.readback_u32(encoder, &dst_buf, dst_len)?;

        let mut out = Image::new(w, h);
        for y in 0..h {
            let row = out.row_mut(y);
            for (x, px) in row.iter_mut().enumerate() {
                *px = words[y * w + x] as u8;
            }
        }
        Ok(out)
    }

    /// Upload a CPU grayscale image as an R8Unorm texture, compacting
    /// stride padding into a 256-byte-aligned staging buffer.
    fn upload_gray(&self, src: &Image<u8>) -> (wgpu::Texture, wgpu::TextureView) {
        let device = &self.gpu.device;
        let width = src.width() as u32;
        let height = src.height() as u32;

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("equalizer input"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            // R8Unorm: u8 pixels read as [0, 1] floats in the shaders.
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let aligned_bytes_per_row = align_to(width, COPY_ALIGNMENT);
        let mut staging = vec![0u8; (aligned_bytes_per_row * height) as usize];
        let src_data = src.as_slice();
        let src_stride = src.stride();
        for y in 0..height as usize {
            let src_row_start = y * src_stride;
            let dst_row_start = y * aligned_bytes_per_row as usize;
            staging[dst_row_start..dst_row_start + width as usize]
                .copy_from_slice(&src_data[src_row_start..src_row_start + width as usize]);
        }

        let staging_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("equalizer input staging"),
            contents: &staging,
            usage: wgpu::BufferUsages::COPY_SRC,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("upload_gray"),
        });
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &staging_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        (texture, view)
    }

    /// Finish the encoder, copy `src_buf` into a MAP_READ buffer, and
    /// block until the words are on the CPU.
    fn readback_u32(
        &self,
        mut encoder: wgpu::CommandEncoder,
        src_buf: &wgpu::Buffer,
        len_words: usize,
    ) -> Result<Vec<u32>, GpuError> {
        let device = &self.gpu.device;
        let size = (len_words * 4) as u64;

        let readback_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(src_buf, 0, &readback_buf, 0, size);
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let buf_slice = readback_buf.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buf_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| GpuError::Readback("map callback never fired".into()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let mapped = buf_slice.get_mapped_range();
        let words: Vec<u32> = bytemuck::cast_slice(&mapped).to_vec();
        drop(mapped);
        readback_buf.unmap();
        Ok(words)
    }
}

// ---------------------------------------------------------------------------
// Pipeline construction
// ---------------------------------------------------------------------------

fn build_tile_hist_kernel(gpu: &GpuDevice) -> Kernel {
    let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("tile_hist.wgsl"),
        source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/tile_hist.wgsl").into()),
    });

    let bgl = gpu
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile_hist BGL"),
            entries: &[
                texture_entry(0),
                storage_entry(1, false),
                uniform_entry(2),
            ],
        });

    Kernel {
        pipeline: build_pipeline(gpu, &shader, &bgl, "tile_hist"),
        bgl,
    }
}

fn build_remap_kernel(gpu: &GpuDevice, entry_point: &str, shader_template: &str) -> Kernel {
    // naga does not yet support `override` expressions inside
    // @workgroup_size(), so the workgroup dimensions are baked into the
    // source via token replacement ({{WG_X}}, {{WG_Y}}).
    let shader_src = shader_template
        .replace("{{WG_X}}", &gpu.workgroup_size.x.to_string())
        .replace("{{WG_Y}}", &gpu.workgroup_size.y.to_string());

    let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(entry_point),
        source: wgpu::ShaderSource::Wgsl(shader_src.into()),
    });

    let bgl = gpu
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("remap BGL"),
            entries: &[
                texture_entry(0),
                storage_entry(1, true),
                storage_entry(2, false),
                uniform_entry(3),
            ],
        });

    Kernel {
        pipeline: build_pipeline(gpu, &shader, &bgl, entry_point),
        bgl,
    }
}

fn build_pipeline(
    gpu: &GpuDevice,
    shader: &wgpu::ShaderModule,
    bgl: &wgpu::BindGroupLayout,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    let layout = gpu
        .device
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(entry_point),
            bind_group_layouts: &[bgl],
            push_constant_ranges: &[],
        });

    gpu.device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry_point),
            layout: Some(&layout),
            module: shader,
            entry_point,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        })
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

#[inline]
fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
