use exif::{In, Reader, Tag, Value};
use image::DynamicImage;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::OptimizerError;
use crate::stats::RunStatistics;

pub const DEFAULT_QUALITY: u8 = 75;

/// Target encodings the compressor knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }

    fn decoder_format(&self) -> image::ImageFormat {
        match self {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of an asset's declared MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    Jpeg,
    Png,
    Unsupported(String),
}

impl MediaType {
    /// Parameters such as `; charset=...` are ignored; anything that is not
    /// exactly `image/jpeg` or `image/png` is unsupported.
    pub fn from_mime(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().parse::<mime::Mime>() {
            Ok(parsed) if parsed.essence_str() == mime::IMAGE_JPEG.essence_str() => MediaType::Jpeg,
            Ok(parsed) if parsed.essence_str() == mime::IMAGE_PNG.essence_str() => MediaType::Png,
            _ => MediaType::Unsupported(raw.to_string()),
        }
    }

    pub fn image_format(&self) -> Option<ImageFormat> {
        match self {
            MediaType::Jpeg => Some(ImageFormat::Jpeg),
            MediaType::Png => Some(ImageFormat::Png),
            MediaType::Unsupported(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JpegBackend {
    #[serde(rename = "mozjpeg")]
    MozJpeg,
    #[serde(rename = "jpeg-encoder")]
    JpegEncoder,
}

impl JpegBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            JpegBackend::MozJpeg => "mozjpeg",
            JpegBackend::JpegEncoder => "jpeg-encoder",
        }
    }
}

impl Default for JpegBackend {
    fn default() -> Self {
        JpegBackend::MozJpeg
    }
}

impl FromStr for JpegBackend {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mozjpeg" => Ok(JpegBackend::MozJpeg),
            "jpeg-encoder" => Ok(JpegBackend::JpegEncoder),
            other => Err(OptimizerError::UnsupportedFormat(format!("jpeg backend '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionConfig {
    pub quality: u8,
    pub jpeg_backend: JpegBackend,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            jpeg_backend: JpegBackend::default(),
        }
    }
}

/// Result of one size-gated compression attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionOutcome {
    /// The re-encoded bytes are strictly smaller than the input.
    /// `sequence` is the shared optimized count after this acceptance.
    Replaced { bytes: Vec<u8>, sequence: u64 },
    Skipped,
}

impl CompressionOutcome {
    pub fn is_replaced(&self) -> bool {
        matches!(self, CompressionOutcome::Replaced { .. })
    }
}

/// Pixel-level re-encoding, separated from the size gate so that the gate can
/// be driven by deterministic encoders in tests.
pub trait ImageEncoder: Send + Sync {
    fn encode(&self, data: &[u8], format: ImageFormat, quality: u8) -> Result<Vec<u8>, OptimizerError>;
}

/// Decodes with `image` and re-encodes with mozjpeg / jpeg-encoder or
/// imagequant + png. No metadata is carried over.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecEncoder {
    jpeg_backend: JpegBackend,
}

impl CodecEncoder {
    pub fn new(jpeg_backend: JpegBackend) -> Self {
        Self { jpeg_backend }
    }
}

impl ImageEncoder for CodecEncoder {
    fn encode(&self, data: &[u8], format: ImageFormat, quality: u8) -> Result<Vec<u8>, OptimizerError> {
        let start = Instant::now();
        let mut img = image::load_from_memory_with_format(data, format.decoder_format())?;

        if format == ImageFormat::Jpeg {
            // Orientation lives in EXIF, which is stripped below, so bake it
            // into the pixels first.
            if let Some(orientation) = read_exif_orientation(data) {
                img = apply_exif_orientation(img, orientation);
            }
        }

        let (width, height) = (img.width(), img.height());
        let encoded = match format {
            ImageFormat::Jpeg => match self.jpeg_backend {
                JpegBackend::MozJpeg => do_mozjpeg_compression(img, quality)?,
                JpegBackend::JpegEncoder => do_jpeg_encoder_compression(img, quality)?,
            },
            ImageFormat::Png => do_png_compression(&img.to_rgba8().into_raw(), width, height, quality)?,
        };

        debug!(
            "Re-encoded {}x{} {} at quality {}: {} -> {} bytes in {:.2}ms",
            width,
            height,
            format,
            quality,
            data.len(),
            encoded.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(encoded)
    }
}

/// Applies the strictly-smaller-wins policy and feeds the shared statistics.
pub struct Compressor {
    config: CompressionConfig,
    encoder: Box<dyn ImageEncoder>,
    stats: Arc<RunStatistics>,
}

impl Compressor {
    pub fn new(config: CompressionConfig, stats: Arc<RunStatistics>) -> Self {
        let encoder = CodecEncoder::new(config.jpeg_backend);
        Self::with_encoder(config, Box::new(encoder), stats)
    }

    pub fn with_encoder(
        config: CompressionConfig,
        encoder: Box<dyn ImageEncoder>,
        stats: Arc<RunStatistics>,
    ) -> Self {
        Self { config, encoder, stats }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    pub fn statistics(&self) -> &Arc<RunStatistics> {
        &self.stats
    }

    pub fn compress(&self, raw: &[u8], format: ImageFormat) -> Result<CompressionOutcome, OptimizerError> {
        self.compress_with_quality(raw, format, self.config.quality)
    }

    pub fn compress_with_quality(
        &self,
        raw: &[u8],
        format: ImageFormat,
        quality: u8,
    ) -> Result<CompressionOutcome, OptimizerError> {
        let quality = quality.clamp(1, 100);
        let encoded = self.encoder.encode(raw, format, quality)?;

        if encoded.len() < raw.len() {
            let saved = (raw.len() - encoded.len()) as u64;
            let sequence = self.stats.record_optimized(saved);
            debug!("Accepted {} re-encode, saved {} bytes", format, saved);
            Ok(CompressionOutcome::Replaced { bytes: encoded, sequence })
        } else {
            self.stats.record_skipped();
            debug!(
                "Kept original {}: re-encode was {} bytes vs {} original",
                format,
                encoded.len(),
                raw.len()
            );
            Ok(CompressionOutcome::Skipped)
        }
    }
}

fn read_exif_orientation(data: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(data);
    let exif = Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(Tag::Orientation, In::PRIMARY)?;
    match field.value {
        Value::Short(ref values) => values.first().copied(),
        _ => None,
    }
}

fn apply_exif_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

fn do_mozjpeg_compression(img: DynamicImage, quality: u8) -> Result<Vec<u8>, OptimizerError> {
    let rgb_img = img.to_rgb8();
    let (width, height) = (rgb_img.width() as usize, rgb_img.height() as usize);
    let raw_data = rgb_img.into_raw();

    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(width, height);
    comp.set_quality(quality as f32);
    comp.set_progressive_mode();
    comp.set_mem_dest();
    comp.start_compress();

    let line_size = width * 3;
    for line in raw_data.chunks_exact(line_size) {
        comp.write_scanlines(line);
    }

    comp.finish_compress();
    comp.data_to_vec()
        .map_err(|_| OptimizerError::Encode("mozjpeg produced no output".to_string()))
}

fn do_jpeg_encoder_compression(img: DynamicImage, quality: u8) -> Result<Vec<u8>, OptimizerError> {
    use jpeg_encoder::{ColorType, Encoder};

    let rgb_img = img.to_rgb8();
    let (width, height) = (rgb_img.width(), rgb_img.height());
    if width > u16::MAX as u32 || height > u16::MAX as u32 {
        return Err(OptimizerError::Encode(format!(
            "jpeg-encoder cannot encode {}x{}",
            width, height
        )));
    }
    let raw_data = rgb_img.into_raw();

    let mut output = Vec::new();
    let mut encoder = Encoder::new(&mut output, quality);
    encoder.set_progressive(true);
    encoder
        .encode(&raw_data, width as u16, height as u16, ColorType::Rgb)
        .map_err(|e| OptimizerError::Encode(format!("jpeg-encoder failed: {:?}", e)))?;

    Ok(output)
}

/// Quantizes to an indexed palette and writes a PNG with only the chunks
/// needed to reproduce the pixels.
pub fn do_png_compression(
    rgba_data: &[u8],
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Vec<u8>, OptimizerError> {
    let quant_err = |stage: &str, e: imagequant::Error| OptimizerError::Encode(format!("{}: {:?}", stage, e));

    let mut liq = imagequant::new();
    liq.set_quality(0, quality)
        .map_err(|e| quant_err("Failed to set PNG quality", e))?;

    let rgba_pixels: Vec<imagequant::RGBA> = rgba_data
        .chunks_exact(4)
        .map(|chunk| imagequant::RGBA {
            r: chunk[0],
            g: chunk[1],
            b: chunk[2],
            a: chunk[3],
        })
        .collect();

    let mut img_quantize = liq
        .new_image(&rgba_pixels[..], width as usize, height as usize, 0.0)
        .map_err(|e| quant_err("Failed to create quantized image", e))?;

    let mut res = liq
        .quantize(&mut img_quantize)
        .map_err(|e| quant_err("Failed to quantize PNG", e))?;
    res.set_dithering_level(1.0)
        .map_err(|e| quant_err("Failed to set dithering", e))?;

    let (palette, pixels) = res
        .remapped(&mut img_quantize)
        .map_err(|e| quant_err("Failed to remap PNG", e))?;

    let mut png_data = Vec::new();
    {
        let mut encoder = png::Encoder::new(Cursor::new(&mut png_data), width, height);
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Best);

        let png_palette: Vec<u8> = palette.iter().flat_map(|c| [c.r, c.g, c.b]).collect();

        // tRNS covers the first N palette entries; the rest are opaque.
        let mut trns: Vec<u8> = palette.iter().map(|c| c.a).collect();
        while trns.last().copied() == Some(255) {
            trns.pop();
        }

        encoder.set_palette(png_palette);
        if !trns.is_empty() {
            encoder.set_trns(trns);
        }

        let mut writer = encoder
            .write_header()
            .map_err(|e| OptimizerError::Encode(format!("Failed to write PNG header: {}", e)))?;
        writer
            .write_image_data(&pixels)
            .map_err(|e| OptimizerError::Encode(format!("Failed to write PNG data: {}", e)))?;
    }

    Ok(png_data)
}
