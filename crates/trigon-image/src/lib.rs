// SPDX-License-Identifier: CEPL-1.0
//! Row-chunked PNG/JPEG decoding for progressive texture uploads.
//!
//! [`ImageStream::open`] only reads the header. Pixels are decoded on the
//! first [`ImageStream::read`] and handed out a whole number of rows at a
//! time, top to bottom.

use image::codecs::jpeg::JpegDecoder;
use image::codecs::png::PngDecoder;
use image::{ColorType, ImageDecoder, Limits};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} is neither a PNG nor a JPEG image")]
    UnsupportedFormat(PathBuf),

    #[error("Unsupported pixel layout {0:?}, only 8-bit RGB and RGBA are handled")]
    UnsupportedLayout(ColorType),

    #[error("Buffer of {got} bytes cannot hold a single {needed}-byte row")]
    BufferTooSmall { needed: usize, got: usize },

    #[error("Image stream was cleared")]
    NotReady,

    #[error("{width}x{height} image needs {bytes} bytes of pixels, limit is {max}")]
    TooLarge {
        width: u32,
        height: u32,
        bytes: u64,
        max: u64,
    },

    #[error("Cannot allocate {0} bytes for decoded pixels")]
    OutOfMemory(usize),

    #[error(transparent)]
    Decode(#[from] image::ImageError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }

    fn from_color_type(color: ColorType) -> Result<Self, DecodeError> {
        match color {
            ColorType::Rgb8 => Ok(PixelLayout::Rgb),
            ColorType::Rgba8 => Ok(PixelLayout::Rgba),
            other => Err(DecodeError::UnsupportedLayout(other)),
        }
    }
}

/// Rows written by one [`ImageStream::read`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowSpan {
    pub first_row: u32,
    pub num_rows: u32,
    pub bytes: usize,
}

/// Upper bound on the decoded pixel buffer of one image.
pub const MAX_IMAGE_BYTES: u64 = 512 * 1024 * 1024;

type Source = BufReader<File>;

enum Decoder {
    Png(PngDecoder<Source>),
    Jpeg(JpegDecoder<Source>),
}

impl Decoder {
    fn set_limits(&mut self, limits: Limits) -> image::ImageResult<()> {
        match self {
            Decoder::Png(d) => d.set_limits(limits),
            Decoder::Jpeg(d) => d.set_limits(limits),
        }
    }

    fn decode(self, buf: &mut [u8]) -> image::ImageResult<()> {
        match self {
            Decoder::Png(d) => d.read_image(buf),
            Decoder::Jpeg(d) => d.read_image(buf),
        }
    }
}

enum Stream {
    Header(Decoder),
    Decoded { pixels: Vec<u8>, next_row: u32 },
    Cleared,
}

pub struct ImageStream {
    width: u32,
    height: u32,
    kind: ImageKind,
    layout: PixelLayout,
    stream: Stream,
}

fn open_source(path: &Path) -> Result<Source, DecodeError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })
}

impl ImageStream {
    /// Reads the header of a PNG or JPEG file. PNG is tried first.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let path = path.as_ref();

        let (kind, mut decoder) = match PngDecoder::new(open_source(path)?) {
            Ok(d) => (ImageKind::Png, Decoder::Png(d)),
            Err(png_err) => {
                debug!("{} is not a PNG: {png_err}", path.display());
                match JpegDecoder::new(open_source(path)?) {
                    Ok(d) => (ImageKind::Jpeg, Decoder::Jpeg(d)),
                    Err(jpeg_err) => {
                        debug!("{} is not a JPEG: {jpeg_err}", path.display());
                        return Err(DecodeError::UnsupportedFormat(path.to_path_buf()));
                    }
                }
            }
        };

        let ((width, height), color) = match &decoder {
            Decoder::Png(d) => (d.dimensions(), d.color_type()),
            Decoder::Jpeg(d) => (d.dimensions(), d.color_type()),
        };
        let layout = PixelLayout::from_color_type(color)?;

        // Header dimensions are untrusted; reject before anything is sized by them.
        let bytes = u64::from(width) * u64::from(height) * layout.bytes_per_pixel() as u64;
        if bytes > MAX_IMAGE_BYTES {
            return Err(DecodeError::TooLarge {
                width,
                height,
                bytes,
                max: MAX_IMAGE_BYTES,
            });
        }
        decoder.set_limits(Limits::default())?;
        info!(
            "{} opened: {:?} {}x{} {:?}",
            path.display(),
            kind,
            width,
            height,
            layout
        );

        Ok(Self {
            width,
            height,
            kind,
            layout,
            stream: Stream::Header(decoder),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    /// Rows not yet handed out by [`ImageStream::read`].
    pub fn rows_remaining(&self) -> u32 {
        match &self.stream {
            Stream::Header(_) => self.height,
            Stream::Decoded { next_row, .. } => self.height - next_row,
            Stream::Cleared => 0,
        }
    }

    /// Copies as many whole rows as fit into `buf`. Once every row has been
    /// delivered the returned span is empty.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<RowSpan, DecodeError> {
        let row_bytes = self.row_bytes();
        if matches!(self.stream, Stream::Cleared) {
            return Err(DecodeError::NotReady);
        }
        if buf.len() < row_bytes {
            return Err(DecodeError::BufferTooSmall {
                needed: row_bytes,
                got: buf.len(),
            });
        }

        // A failed decode leaves the stream cleared.
        self.stream = match std::mem::replace(&mut self.stream, Stream::Cleared) {
            Stream::Header(decoder) => {
                let len = row_bytes * self.height as usize;
                let mut pixels = Vec::new();
                pixels
                    .try_reserve_exact(len)
                    .map_err(|_| DecodeError::OutOfMemory(len))?;
                pixels.resize(len, 0);
                decoder.decode(&mut pixels)?;
                debug!("decoded {} bytes of pixel data", pixels.len());
                Stream::Decoded {
                    pixels,
                    next_row: 0,
                }
            }
            other => other,
        };

        let Stream::Decoded { pixels, next_row } = &mut self.stream else {
            return Err(DecodeError::NotReady);
        };
        let first_row = *next_row;
        let fit = (buf.len() / row_bytes) as u32;
        let num_rows = fit.min(self.height - first_row);
        let start = first_row as usize * row_bytes;
        let bytes = num_rows as usize * row_bytes;
        buf[..bytes].copy_from_slice(&pixels[start..start + bytes]);
        *next_row += num_rows;

        Ok(RowSpan {
            first_row,
            num_rows,
            bytes,
        })
    }

    /// Drops the decoder and any decoded pixels. Further reads fail with
    /// [`DecodeError::NotReady`].
    pub fn clear(&mut self) {
        self.stream = Stream::Cleared;
    }
}
