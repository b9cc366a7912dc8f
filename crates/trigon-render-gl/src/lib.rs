// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use glow::HasContext as _;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use tracing::{debug, info};
use trigon_image::{ImageStream, PixelLayout, RowSpan};
use trigon_render::RenderSize;

use glutin::{
    config::{Api, ConfigTemplateBuilder},
    context::{
        ContextApi, ContextAttributesBuilder, NotCurrentContext, PossiblyCurrentContext, Version,
    },
    display::{Display, DisplayApiPreference},
    prelude::*,
    surface::{Surface, SurfaceAttributesBuilder, SwapInterval, WindowSurface},
};

use std::num::NonZeroU32;

pub mod compute;

/// Bytes uploaded per `tex_sub_image_2d` call unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

const CLEAR_COLOR: [f32; 4] = [0.25, 0.25, 0.25, 0.5];

const VERTEX_SRC: &str = r#"
attribute vec2 pos;
attribute vec2 texture;
varying vec2 v_texture;
void main() {
  v_texture = texture;
  gl_Position = vec4(pos, 0.0, 1.0);
}"#;

const FRAGMENT_SRC: &str = r#"
precision mediump float;
uniform sampler2D u_tex;
varying vec2 v_texture;
void main() {
  gl_FragColor = texture2D(u_tex, v_texture);
}"#;

const ATTRIB_POS: u32 = 0;
const ATTRIB_TEXTURE: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct QuadVertex {
    pos: [f32; 2],
    uv: [f32; 2],
}

/// Full-window triangle strip; row 0 of the image sits at the top.
const QUAD: [QuadVertex; 4] = [
    QuadVertex {
        pos: [-1.0, 1.0],
        uv: [0.0, 0.0],
    },
    QuadVertex {
        pos: [1.0, 1.0],
        uv: [1.0, 0.0],
    },
    QuadVertex {
        pos: [-1.0, -1.0],
        uv: [0.0, 1.0],
    },
    QuadVertex {
        pos: [1.0, -1.0],
        uv: [1.0, 1.0],
    },
];

fn gl_format(layout: PixelLayout) -> u32 {
    match layout {
        PixelLayout::Rgb => glow::RGB,
        PixelLayout::Rgba => glow::RGBA,
    }
}

/// Upload buffer length: the configured chunk, grown to hold at least one row.
pub fn upload_chunk_len(chunk_size: usize, row_bytes: usize) -> usize {
    chunk_size.max(row_bytes)
}

/// Compiles and links a program from `(kind, source)` stages. Attribute
/// locations are bound before linking.
pub(crate) fn compile_program(
    gl: &glow::Context,
    stages: &[(u32, &str)],
    attribs: &[(u32, &str)],
) -> Result<glow::Program> {
    unsafe {
        let program = gl.create_program().map_err(anyhow::Error::msg)?;
        let mut shaders = Vec::with_capacity(stages.len());

        for &(kind, src) in stages {
            let shader = gl.create_shader(kind).map_err(anyhow::Error::msg)?;
            gl.shader_source(shader, src);
            gl.compile_shader(shader);
            if !gl.get_shader_compile_status(shader) {
                let log = gl.get_shader_info_log(shader);
                gl.delete_shader(shader);
                for s in shaders {
                    gl.delete_shader(s);
                }
                gl.delete_program(program);
                return Err(anyhow!("GL shader 0x{kind:x} compile: {log}"));
            }
            gl.attach_shader(program, shader);
            shaders.push(shader);
        }

        for &(index, name) in attribs {
            gl.bind_attrib_location(program, index, name);
        }
        gl.link_program(program);

        for shader in shaders {
            gl.detach_shader(program, shader);
            gl.delete_shader(shader);
        }

        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            return Err(anyhow!("GL link: {log}"));
        }

        Ok(program)
    }
}

/// Displays one image as a textured full-window quad on a GLES 2.0 context.
pub struct TextureViewer {
    context: PossiblyCurrentContext,
    surface: Surface<WindowSurface>,
    gl: glow::Context,
    size: RenderSize,
    program: glow::Program,
    texture: glow::Texture,
    quad: glow::Buffer,
    image_width: u32,
    image_height: u32,
    format: u32,
    rows_uploaded: u32,
}

impl TextureViewer {
    fn make_current(
        display: &Display,
        window_handle: RawWindowHandle,
        size: RenderSize,
    ) -> Result<(
        PossiblyCurrentContext,
        Surface<WindowSurface>,
        glow::Context,
    )> {
        let template = ConfigTemplateBuilder::new().with_api(Api::GLES2).build();
        let mut configs = unsafe { display.find_configs(template) }.context("find_configs")?;
        let config = configs.next().ok_or_else(|| anyhow!("no GLES2 configs"))?;
        let w = NonZeroU32::new(size.width.max(1)).unwrap_or(NonZeroU32::MIN);
        let h = NonZeroU32::new(size.height.max(1)).unwrap_or(NonZeroU32::MIN);

        let sattrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(window_handle, w, h);
        let surface = unsafe { display.create_window_surface(&config, &sattrs) }
            .context("create_window_surface")?;
        let ctx_attrs = ContextAttributesBuilder::new()
            .with_context_api(ContextApi::Gles(Some(Version::new(2, 0))))
            .build(Some(window_handle));
        let not_current: NotCurrentContext =
            unsafe { display.create_context(&config, &ctx_attrs) }.context("create_context")?;

        let context = not_current.make_current(&surface).context("make_current")?;

        let gl = unsafe {
            glow::Context::from_loader_function_cstr(|s| display.get_proc_address(s).cast())
        };

        let _ = surface.set_swap_interval(&context, SwapInterval::Wait(NonZeroU32::MIN));

        Ok((context, surface, gl))
    }

    /// Creates the context and allocates an empty texture sized for `image`.
    pub fn new(
        window: &dyn HasWindowHandle,
        display_handle: &dyn HasDisplayHandle,
        size: RenderSize,
        image: &ImageStream,
    ) -> Result<Self> {
        let wh = window
            .window_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();
        let dh = display_handle
            .display_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();

        let display =
            unsafe { Display::new(dh, DisplayApiPreference::Egl) }.context("Display::new")?;

        let (context, surface, gl) = Self::make_current(&display, wh, size)?;
        info!("GL version: {}", unsafe { gl.get_parameter_string(glow::VERSION) });

        let program = compile_program(
            &gl,
            &[
                (glow::VERTEX_SHADER, VERTEX_SRC),
                (glow::FRAGMENT_SHADER, FRAGMENT_SRC),
            ],
            &[(ATTRIB_POS, "pos"), (ATTRIB_TEXTURE, "texture")],
        )?;

        let format = gl_format(image.layout());
        let (texture, quad) = unsafe {
            let texture = gl.create_texture().map_err(anyhow::Error::msg)?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            // Rows are tightly packed; RGB rows need not be 4-byte aligned.
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                format as i32,
                image.width() as i32,
                image.height() as i32,
                0,
                format,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(None),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);

            let quad = gl.create_buffer().map_err(anyhow::Error::msg)?;
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(quad));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(&QUAD),
                glow::STATIC_DRAW,
            );
            gl.bind_buffer(glow::ARRAY_BUFFER, None);

            gl.use_program(Some(program));
            if let Some(loc) = gl.get_uniform_location(program, "u_tex") {
                gl.uniform_1_i32(Some(&loc), 0);
            }
            gl.use_program(None);
            (texture, quad)
        };

        info!(
            "texture allocated ({}x{}, {:?})",
            image.width(),
            image.height(),
            image.layout()
        );

        Ok(Self {
            context,
            surface,
            gl,
            size,
            program,
            texture,
            quad,
            image_width: image.width(),
            image_height: image.height(),
            format,
            rows_uploaded: 0,
        })
    }

    pub fn rows_uploaded(&self) -> u32 {
        self.rows_uploaded
    }

    /// Copies `span.num_rows` rows from `pixels` into the texture at
    /// `span.first_row`.
    pub fn upload_rows(&mut self, span: RowSpan, pixels: &[u8]) {
        if span.num_rows == 0 {
            return;
        }
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(self.texture));
            self.gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                span.first_row as i32,
                self.image_width as i32,
                span.num_rows as i32,
                self.format,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(&pixels[..span.bytes])),
            );
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
        self.rows_uploaded += span.num_rows;
        debug!(
            "uploaded rows {}..{}",
            span.first_row,
            span.first_row + span.num_rows
        );
    }

    /// Streams every remaining row of `image` into the texture, at most
    /// `chunk_size` bytes at a time, then releases the decoder.
    pub fn upload_image(&mut self, image: &mut ImageStream, chunk_size: usize) -> Result<()> {
        let mut buf = vec![0u8; upload_chunk_len(chunk_size, image.row_bytes())];
        let mut chunks = 0usize;
        loop {
            let span = image.read(&mut buf).context("image read")?;
            if span.num_rows == 0 {
                break;
            }
            self.upload_rows(span, &buf);
            chunks += 1;
        }
        image.clear();
        info!(
            "image uploaded in {chunks} chunk(s), {}/{} rows",
            self.rows_uploaded, self.image_height
        );
        Ok(())
    }

    pub fn resize(&mut self, size: RenderSize) {
        self.size = size;
        if size.is_empty() {
            return;
        }
        let w = NonZeroU32::new(size.width).unwrap_or(NonZeroU32::MIN);
        let h = NonZeroU32::new(size.height).unwrap_or(NonZeroU32::MIN);
        self.surface.resize(&self.context, w, h);
    }

    pub fn render(&mut self) -> Result<()> {
        if self.size.is_empty() {
            return Ok(());
        }

        let stride = std::mem::size_of::<QuadVertex>() as i32;
        unsafe {
            let gl = &self.gl;
            gl.viewport(0, 0, self.size.width as i32, self.size.height as i32);
            gl.clear_color(CLEAR_COLOR[0], CLEAR_COLOR[1], CLEAR_COLOR[2], CLEAR_COLOR[3]);
            gl.clear(glow::COLOR_BUFFER_BIT);

            gl.use_program(Some(self.program));
            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, Some(self.texture));

            // Transparent PNGs blend over the clear color.
            gl.enable(glow::BLEND);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);

            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.quad));
            gl.vertex_attrib_pointer_f32(ATTRIB_POS, 2, glow::FLOAT, false, stride, 0);
            gl.vertex_attrib_pointer_f32(ATTRIB_TEXTURE, 2, glow::FLOAT, false, stride, 8);
            gl.enable_vertex_attrib_array(ATTRIB_POS);
            gl.enable_vertex_attrib_array(ATTRIB_TEXTURE);

            gl.draw_arrays(glow::TRIANGLE_STRIP, 0, QUAD.len() as i32);

            gl.disable_vertex_attrib_array(ATTRIB_POS);
            gl.disable_vertex_attrib_array(ATTRIB_TEXTURE);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.bind_texture(glow::TEXTURE_2D, None);
            gl.use_program(None);
        }

        self.surface
            .swap_buffers(&self.context)
            .context("swap_buffers")?;

        Ok(())
    }
}

impl Drop for TextureViewer {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_buffer(self.quad);
            self.gl.delete_texture(self.texture);
            self.gl.delete_program(self.program);
        }
    }
}
