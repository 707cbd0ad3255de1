use std::io::Cursor;

use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, GrayImage, ImageFormat};

use crate::errors::{LeafSegError, Result};

/// Decode a base64 image, with or without a `data:<mime>;base64,` prefix.
pub fn decode_base64_image(input: &str) -> Result<DynamicImage> {
    let payload = strip_data_url(input.trim());
    if payload.is_empty() {
        return Err(LeafSegError::Decode {
            reason: "empty image payload".to_string(),
        });
    }

    // line-wrapped base64 (MIME, coreutils `base64`) is accepted
    let payload: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| LeafSegError::Decode {
            reason: format!("invalid base64: {e}"),
        })?;

    let format = image::guess_format(&bytes).map_err(|e| LeafSegError::Decode {
        reason: e.to_string(),
    })?;

    image::load_from_memory_with_format(&bytes, format).map_err(|e| LeafSegError::Decode {
        reason: e.to_string(),
    })
}

fn strip_data_url(input: &str) -> &str {
    match input.split_once(',') {
        Some((_, payload)) => payload,
        None => input,
    }
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

pub fn encode_png_data_url(image: &DynamicImage) -> Result<String> {
    let bytes = encode_png(image)?;
    Ok(format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(bytes)
    ))
}

pub fn encode_mask_data_url(mask: &GrayImage) -> Result<String> {
    encode_png_data_url(&DynamicImage::ImageLuma8(mask.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Luma, Rgb, RgbImage};

    fn png_base64() -> String {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 2, Rgb([10, 200, 30])));
        general_purpose::STANDARD.encode(encode_png(&image).unwrap())
    }

    #[test]
    fn decodes_raw_base64() {
        let image = decode_base64_image(&png_base64()).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.to_rgb8().get_pixel(0, 0), &Rgb([10, 200, 30]));
    }

    #[test]
    fn decodes_data_url_with_whitespace() {
        let input = format!("  data:image/png;base64,{}\n", png_base64());
        assert!(decode_base64_image(&input).is_ok());
    }

    #[test]
    fn decodes_line_wrapped_base64() {
        let encoded = png_base64();
        let wrapped = encoded
            .as_bytes()
            .chunks(20)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        assert!(wrapped.contains('\n'));

        let image = decode_base64_image(&format!("data:image/png;base64,{wrapped}")).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
    }

    #[test]
    fn rejects_invalid_payloads() {
        for input in ["", "data:image/png;base64,", "***not base64***", "aGVsbG8gd29ybGQ="] {
            let err = decode_base64_image(input).unwrap_err();
            assert!(matches!(err, LeafSegError::Decode { .. }), "{input}: {err}");
        }
    }

    #[test]
    fn mask_data_url_is_a_grayscale_png() {
        let mask = GrayImage::from_pixel(2, 2, Luma([128]));
        let url = encode_mask_data_url(&mask).unwrap();
        let payload = url.strip_prefix("data:image/png;base64,").unwrap();

        let decoded = decode_base64_image(payload).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
        assert_eq!(decoded.to_luma8().get_pixel(1, 1), &Luma([128]));
    }
}
