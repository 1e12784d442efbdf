//! Loading the served image from disk.
//!
//! The [`FramebufferLoader`] trait is the seam the launcher depends on, so the
//! launcher can be tested without touching the file system.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use mockvnc_core::{Framebuffer, FramebufferError};

/// Directory searched when a relative image path does not exist as given.
pub const DEFAULT_IMAGE_DIR: &str = "images";

#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be opened or decoded.
    #[error("failed to load image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The decoded image does not fit the RFB framebuffer limits.
    #[error("image {path} cannot be served: {source}")]
    Framebuffer {
        path: PathBuf,
        #[source]
        source: FramebufferError,
    },
}

/// Produces a framebuffer for an image path.
#[cfg_attr(test, mockall::automock)]
pub trait FramebufferLoader: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`LoadError`] when the image cannot be turned into a
    /// framebuffer.
    fn load(&self, path: &Path) -> Result<Framebuffer, LoadError>;
}

/// Loads PNG and JPEG files with the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageFileLoader {
    image_dir: PathBuf,
}

impl ImageFileLoader {
    pub fn new(image_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
        }
    }

    /// Resolves `path`, falling back to the image directory for relative
    /// paths that do not exist from the working directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() && !path.exists() {
            let candidate = self.image_dir.join(path);
            if candidate.exists() {
                return candidate;
            }
        }
        path.to_path_buf()
    }
}

impl Default for ImageFileLoader {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_DIR)
    }
}

impl FramebufferLoader for ImageFileLoader {
    fn load(&self, path: &Path) -> Result<Framebuffer, LoadError> {
        let resolved = self.resolve(path);
        let rgba = image::open(&resolved)
            .map_err(|source| LoadError::Image {
                path: resolved.clone(),
                source,
            })?
            .to_rgba8();
        let (width, height) = rgba.dimensions();
        debug!("decoded {} as {width}x{height}", resolved.display());

        Framebuffer::from_rgba(width, height, rgba.as_raw()).map_err(|source| {
            LoadError::Framebuffer {
                path: resolved,
                source,
            }
        })
    }
}
