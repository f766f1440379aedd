use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use thiserror::Error;
use tracing::debug;

use super::{FetchError, PageSource};

const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum PosterError {
    #[error("empty poster url")]
    InvalidUrl,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("unrecognized image payload: {0}")]
    Decode(#[from] image::ImageError),
}

/// Download a poster and optionally thumbnail it.
///
/// With `max_edge == 0` the body bytes come back unchanged. Otherwise the
/// payload is decoded (GIF/PNG/JPEG/WebP), rescaled so both edges fit within
/// `max_edge` preserving aspect, and re-encoded as JPEG.
pub async fn fetch_poster(
    pages: &dyn PageSource,
    url: &str,
    max_edge: u32,
) -> Result<Vec<u8>, PosterError> {
    if url.is_empty() {
        return Err(PosterError::InvalidUrl);
    }
    let body = pages.fetch(url).await?;
    if max_edge == 0 {
        return Ok(body);
    }

    let decoded = image::load_from_memory(&body)?;
    let scaled = if decoded.width() > max_edge || decoded.height() > max_edge {
        decoded.resize(max_edge, max_edge, FilterType::CatmullRom)
    } else {
        decoded
    };
    debug!(
        url,
        width = scaled.width(),
        height = scaled.height(),
        "poster thumbnailed"
    );

    let rgb = scaled.to_rgb8();
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder.encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPageSource;

    fn png_2x2() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([200, 10, 10]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let pages = MockPageSource::new();
        assert!(matches!(
            fetch_poster(&pages, "", 0).await,
            Err(PosterError::InvalidUrl)
        ));
    }

    #[tokio::test]
    async fn test_zero_max_edge_passes_bytes_through() {
        let pages = MockPageSource::new();
        pages.put("http://x/poster", b"raw-bytes".to_vec());
        let bytes = fetch_poster(&pages, "http://x/poster", 0).await.unwrap();
        assert_eq!(bytes, b"raw-bytes");
    }

    #[tokio::test]
    async fn test_reencodes_to_jpeg() {
        let pages = MockPageSource::new();
        pages.put("http://x/poster", png_2x2());
        let bytes = fetch_poster(&pages, "http://x/poster", 64).await.unwrap();
        // JPEG SOI marker
        assert_eq!(&bytes[..2], &[0xff, 0xd8]);
    }

    #[tokio::test]
    async fn test_downscales_to_max_edge() {
        let img = image::RgbImage::from_pixel(100, 50, image::Rgb([1, 2, 3]));
        let mut png = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let pages = MockPageSource::new();
        pages.put("http://x/poster", png);

        let bytes = fetch_poster(&pages, "http://x/poster", 10).await.unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert!(thumb.width() <= 10 && thumb.height() <= 10);
        // aspect preserved
        assert_eq!(thumb.width(), 10);
        assert_eq!(thumb.height(), 5);
    }

    #[tokio::test]
    async fn test_garbage_payload_is_decode_error() {
        let pages = MockPageSource::new();
        pages.put("http://x/poster", b"definitely not an image".to_vec());
        assert!(matches!(
            fetch_poster(&pages, "http://x/poster", 64).await,
            Err(PosterError::Decode(_))
        ));
    }
}
