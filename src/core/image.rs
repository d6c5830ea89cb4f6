use image::{DynamicImage, ImageReader};
use std::path::Path;

use crate::error::LoadError;

/// Source of decoded images for the hashing pipeline.
pub trait ImageLoader: Sync {
    type Image;

    fn load(&self, path: &Path) -> Result<Self::Image, LoadError>;
}

/// Decodes images from the local filesystem, guessing the format from content
/// rather than trusting the extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageLoader;

impl FsImageLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ImageLoader for FsImageLoader {
    type Image = DynamicImage;

    fn load(&self, path: &Path) -> Result<DynamicImage, LoadError> {
        let reader = ImageReader::open(path)
            .map_err(|e| LoadError::new(path, e))?
            .with_guessed_format()
            .map_err(|e| LoadError::new(path, e))?;
        reader.decode().map_err(|e| LoadError::new(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadErrorKind;
    use image::{GenericImageView, ImageBuffer, Rgb};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_png() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plain.png");
        let img = ImageBuffer::from_fn(32, 16, |x, y| Rgb([x as u8, y as u8, 0]));
        img.save(&path).unwrap();

        let loaded = FsImageLoader::new().load(&path).unwrap();
        assert_eq!(loaded.dimensions(), (32, 16));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nope.jpg");

        let err = FsImageLoader::new().load(&path).unwrap_err();
        assert_eq!(err.path(), path.as_path());
        assert!(matches!(err.source, LoadErrorKind::Io(_)));
    }

    #[test]
    fn test_corrupt_file_is_decode_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.png");
        fs::write(&path, b"definitely not a png").unwrap();

        let err = FsImageLoader::new().load(&path).unwrap_err();
        assert!(matches!(err.source, LoadErrorKind::Image(_)));
    }
}
