use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageEncoder, ImageError, ImageReader};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::config::BuildConfig;
use crate::error::StageError;
use crate::pipeline::{Asset, Transform};

/// Lossy re-encoding of raster images, applied only to production builds.
///
/// JPEG files are re-encoded at the given quality and PNG files with the best
/// compression. When the result is not smaller the original bytes are kept;
/// any other file passes through untouched.
pub struct OptimizeImages {
    pub jpeg_quality: u8,
}

impl Default for OptimizeImages {
    fn default() -> Self {
        Self { jpeg_quality: 80 }
    }
}

impl OptimizeImages {
    fn optimize(&self, asset: Asset) -> Result<Asset, StageError> {
        let ext = asset.extension().map(str::to_ascii_lowercase);

        let encoded = match ext.as_deref() {
            Some("jpg" | "jpeg") => {
                let decoded = decode(&asset.data)?;
                let rgb = DynamicImage::ImageRgb8(decoded.image.to_rgb8());
                let mut buffer = Vec::new();
                let encoder = JpegEncoder::new_with_quality(&mut buffer, self.jpeg_quality);
                write(&rgb, decoded.icc, decoded.exif, encoder)?;
                buffer
            }
            Some("png") => {
                let decoded = decode(&asset.data)?;
                let mut buffer = Vec::new();
                let encoder = PngEncoder::new_with_quality(
                    &mut buffer,
                    CompressionType::Best,
                    FilterType::Adaptive,
                );
                write(&decoded.image, decoded.icc, decoded.exif, encoder)?;
                buffer
            }
            _ => return Ok(asset),
        };

        if encoded.len() < asset.data.len() {
            tracing::debug!("{}: {} -> {} bytes", asset.path, asset.data.len(), encoded.len());
            Ok(Asset::new(asset.path, encoded))
        } else {
            Ok(asset)
        }
    }
}

/// Upright pixels plus the metadata carried over to the re-encoded file.
struct Decoded {
    image: DynamicImage,
    icc: Option<Vec<u8>>,
    exif: Option<Vec<u8>>,
}

fn decode(data: &[u8]) -> Result<Decoded, StageError> {
    let mut decoder = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_decoder()?;

    let icc = decoder.icc_profile()?;
    let mut exif = decoder.exif_metadata()?;
    let orientation = decoder.orientation()?;

    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);

    // the pixels are upright now, a kept tag would rotate them twice
    if let Some(exif) = exif.as_mut() {
        let _ = Orientation::remove_from_exif_chunk(exif);
    }

    Ok(Decoded { image, icc, exif })
}

fn write(
    image: &DynamicImage,
    icc: Option<Vec<u8>>,
    exif: Option<Vec<u8>>,
    mut encoder: impl ImageEncoder,
) -> Result<(), StageError> {
    if let Some(icc) = icc {
        encoder.set_icc_profile(icc).map_err(ImageError::Unsupported)?;
    }
    if let Some(exif) = exif {
        encoder.set_exif_metadata(exif).map_err(ImageError::Unsupported)?;
    }

    image.write_with_encoder(encoder)?;
    Ok(())
}

impl Transform for OptimizeImages {
    fn name(&self) -> &'static str {
        "optimize-images"
    }

    fn apply(&self, assets: Vec<Asset>, config: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        if !config.production {
            return Ok(assets);
        }

        assets
            .into_par_iter()
            .map(|asset| self.optimize(asset))
            .collect()
    }
}
