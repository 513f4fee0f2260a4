//! JPEG encoding for frames leaving the process (detector uploads, MJPEG chunks)

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(frame.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(frame)
        .context("jpeg encode failed")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_encode_jpeg_markers() {
        let frame = RgbImage::from_pixel(16, 8, Rgb([200, 40, 40]));
        let jpeg = encode_jpeg(&frame, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_encode_jpeg_decodes_to_same_size() {
        let frame = RgbImage::from_pixel(32, 20, Rgb([0, 128, 255]));
        let jpeg = encode_jpeg(&frame, 0).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 20));
    }
}
