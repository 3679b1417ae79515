use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

use super::jpeg;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),
    #[error("failed to encode jpeg: {0}")]
    Encode(image::ImageError),
    #[error("produced jpeg has no readable dimensions")]
    Dimensions,
    #[error("image task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A stored-form JPEG with the dimensions read back from its own header.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Produce the stored form of an accepted upload: JPEG at the configured
/// quality, scaled down to fit within `max_dim` on the longest side.
///
/// Aspect ratio is preserved and images are never upscaled. Decode and
/// encode are CPU-bound and run off the async pool.
pub async fn normalize(
    bytes: Bytes,
    max_dim: u32,
    quality: u8,
) -> Result<NormalizedImage, MediaError> {
    let encoded =
        tokio::task::spawn_blocking(move || reencode_jpeg(&bytes, max_dim, quality)).await??;

    // Dimensions are read back out of the JPEG we just produced rather than
    // trusted from the in-memory image.
    let (width, height) = jpeg::dimensions(&encoded).ok_or(MediaError::Dimensions)?;

    Ok(NormalizedImage {
        bytes: Bytes::from(encoded),
        width: u32::from(width),
        height: u32::from(height),
    })
}

/// Shrink an image that exceeds the face provider's byte ceiling.
///
/// Returns the re-encoded bytes, or an error the caller is expected to
/// swallow by falling back to the original image.
pub async fn downscale_for_provider(
    bytes: Bytes,
    max_dim: u32,
    quality: u8,
) -> Result<Bytes, MediaError> {
    let encoded =
        tokio::task::spawn_blocking(move || reencode_jpeg(&bytes, max_dim, quality)).await??;

    Ok(Bytes::from(encoded))
}

fn reencode_jpeg(bytes: &[u8], max_dim: u32, quality: u8) -> Result<Vec<u8>, MediaError> {
    let img = image::load_from_memory(bytes).map_err(MediaError::Decode)?;

    let img = if img.width().max(img.height()) > max_dim {
        img.resize(max_dim, max_dim, FilterType::Lanczos3)
    } else {
        img
    };

    // JPEG has no alpha channel; flatten whatever the source format was.
    let img = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut out = Cursor::new(Vec::new());
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
        .map_err(MediaError::Encode)?;

    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Bytes {
        let img = DynamicImage::new_rgba8(width, height);
        let mut buf = Cursor::new(Vec::new());
        img.write_with_encoder(image::codecs::png::PngEncoder::new(&mut buf))
            .unwrap();
        Bytes::from(buf.into_inner())
    }

    #[tokio::test]
    async fn small_images_keep_their_dimensions() {
        let normalized = normalize(png_bytes(320, 200), 4000, 90).await.unwrap();

        assert_eq!((normalized.width, normalized.height), (320, 200));
        assert_eq!(super::super::sniff(&normalized.bytes), Some(super::super::ImageKind::Jpeg));
    }

    #[tokio::test]
    async fn large_images_are_scaled_down_preserving_aspect() {
        let normalized = normalize(png_bytes(800, 400), 200, 90).await.unwrap();

        assert_eq!((normalized.width, normalized.height), (200, 100));
    }

    #[tokio::test]
    async fn portrait_images_fit_the_longest_side() {
        let normalized = normalize(png_bytes(400, 800), 200, 90).await.unwrap();

        assert_eq!((normalized.width, normalized.height), (100, 200));
    }

    #[tokio::test]
    async fn images_are_never_upscaled() {
        let normalized = normalize(png_bytes(100, 50), 4000, 90).await.unwrap();

        assert_eq!((normalized.width, normalized.height), (100, 50));
    }

    #[tokio::test]
    async fn garbage_input_fails_to_decode() {
        let err = normalize(Bytes::from_static(&[0u8; 64]), 4000, 90)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Decode(_)));
    }

    #[tokio::test]
    async fn downscale_reencodes_within_bounds() {
        let out = downscale_for_provider(png_bytes(600, 600), 256, 85)
            .await
            .unwrap();

        let (w, h) = jpeg::dimensions(&out).unwrap();
        assert_eq!((w, h), (256, 256));
    }
}
