use std::fs;
use std::path::Path;

use image::DynamicImage;

use crate::error::InputError;

/// Upload types accepted by the classifier.
pub const VALID_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub fn is_valid_extension(path: &Path) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => VALID_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}

/// Read an uploaded image that the caller persisted to disk.
pub fn load_image(path: &Path) -> Result<DynamicImage, InputError> {
    if !is_valid_extension(path) {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(InputError::UnsupportedFormat(ext));
    }
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Err(InputError::EmptyFile(path.to_path_buf()));
    }
    Ok(image::load_from_memory(&bytes)?)
}

/// Decode an in-memory upload.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, InputError> {
    if bytes.is_empty() {
        return Err(InputError::EmptyUpload);
    }
    Ok(image::load_from_memory(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_valid_extension(Path::new("/tmp/scan.PNG")));
        assert!(is_valid_extension(Path::new("scan.jpeg")));
        assert!(is_valid_extension(Path::new("a/b/scan.Jpg")));
        assert!(!is_valid_extension(Path::new("scan.gif")));
        assert!(!is_valid_extension(Path::new("scan")));
    }

    #[test]
    fn loads_png_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        fs::write(&path, png_bytes()).unwrap();

        let image = load_image(&path).unwrap();
        assert_eq!((image.width(), image.height()), (4, 3));
    }

    #[test]
    fn rejects_unsupported_and_empty_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let gif = dir.path().join("scan.gif");
        fs::write(&gif, b"GIF89a").unwrap();
        assert!(matches!(load_image(&gif), Err(InputError::UnsupportedFormat(ext)) if ext == "gif"));

        let empty = dir.path().join("scan.jpg");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(load_image(&empty), Err(InputError::EmptyFile(_))));

        let missing = dir.path().join("missing.png");
        assert!(matches!(load_image(&missing), Err(InputError::Io(_))));
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(matches!(decode_image(b"not an image"), Err(InputError::Decode(_))));
        assert!(decode_image(&png_bytes()).is_ok());
    }

    #[test]
    fn empty_upload_is_not_reported_as_a_zero_sized_image() {
        let err = decode_image(&[]).unwrap_err();
        assert!(matches!(err, InputError::EmptyUpload));
        assert_eq!(err.to_string(), "uploaded image is empty");
    }
}
