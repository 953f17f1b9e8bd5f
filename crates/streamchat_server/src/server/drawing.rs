#![forbid(unsafe_code)]

use std::io::Cursor;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::ImageReader;
use thiserror::Error;

pub const DRAWING_WIDTH: u32 = 230;
pub const DRAWING_HEIGHT: u32 = 120;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawingError {
	#[error("not a base64 data url")]
	BadHeader,
	#[error("invalid base64 payload")]
	BadPayload,
	#[error("not a readable image: {0}")]
	NotImage(String),
	#[error("unexpected size {width}x{height}")]
	WrongSize { width: u32, height: u32 },
}

/// Validate a `data:image/...;base64,...` drawing of exactly 230x120 pixels.
///
/// Any format the decoder recognizes is accepted; only the size is checked.
pub fn validate_drawing(src: &str) -> Result<(), DrawingError> {
	let (header, payload) = src.trim().split_once(',').ok_or(DrawingError::BadHeader)?;
	if !header.starts_with("data:") || !header.ends_with("base64") {
		return Err(DrawingError::BadHeader);
	}

	let bytes = STANDARD.decode(payload.trim()).map_err(|_| DrawingError::BadPayload)?;
	let (width, height) = ImageReader::new(Cursor::new(bytes))
		.with_guessed_format()
		.map_err(|e| DrawingError::NotImage(e.to_string()))?
		.into_dimensions()
		.map_err(|e| DrawingError::NotImage(e.to_string()))?;
	if width != DRAWING_WIDTH || height != DRAWING_HEIGHT {
		return Err(DrawingError::WrongSize { width, height });
	}
	Ok(())
}

#[cfg(test)]
pub(crate) fn image_data_url(width: u32, height: u32, format: image::ImageFormat) -> String {
	let mut bytes = Cursor::new(Vec::new());
	image::DynamicImage::ImageRgba8(image::RgbaImage::new(width, height))
		.write_to(&mut bytes, format)
		.expect("encode drawing");
	let mime = format.to_mime_type();
	format!("data:{mime};base64,{}", STANDARD.encode(bytes.into_inner()))
}

#[cfg(test)]
pub(crate) fn png_data_url(width: u32, height: u32) -> String {
	image_data_url(width, height, image::ImageFormat::Png)
}

#[cfg(test)]
mod tests {
	use image::ImageFormat;

	use super::*;

	#[test]
	fn accepts_canvas_sized_png() {
		assert_eq!(validate_drawing(&png_data_url(230, 120)), Ok(()));
	}

	#[test]
	fn accepts_other_formats_of_the_right_size() {
		assert_eq!(validate_drawing(&image_data_url(230, 120, ImageFormat::Gif)), Ok(()));
		assert_eq!(
			validate_drawing(&image_data_url(120, 230, ImageFormat::Gif)),
			Err(DrawingError::WrongSize { width: 120, height: 230 })
		);
	}

	#[test]
	fn rejects_wrong_size() {
		assert_eq!(
			validate_drawing(&png_data_url(231, 120)),
			Err(DrawingError::WrongSize { width: 231, height: 120 })
		);
	}

	#[test]
	fn rejects_bad_input() {
		assert_eq!(validate_drawing("https://example.com/a.png"), Err(DrawingError::BadHeader));
		assert_eq!(validate_drawing("data:image/png,abc"), Err(DrawingError::BadHeader));
		assert_eq!(validate_drawing("data:image/png;base64,!!!"), Err(DrawingError::BadPayload));
		let junk = format!("data:image/png;base64,{}", STANDARD.encode(b"definitely not an image"));
		assert!(matches!(validate_drawing(&junk), Err(DrawingError::NotImage(_))));
	}
}
