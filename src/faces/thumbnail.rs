use crate::config::Config;
use crate::faces::embedder::{BoundingBox, EmbeddingError, FaceEmbedder};
use crate::faces::euclidean_distance;
use image::{DynamicImage, GenericImageView};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Face embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Finds a given face again in an image and crops it.
///
/// Embeddings are not kept between clustering and naming, so the image is
/// re-embedded and the face re-identified by distance.
pub struct ThumbnailLocator {
    match_threshold: f32,
    thumbnail_size: u32,
}

impl ThumbnailLocator {
    pub fn new(match_threshold: f32, thumbnail_size: u32) -> Self {
        Self {
            match_threshold,
            thumbnail_size,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.match_threshold, config.thumbnail_size)
    }

    /// Crop of the face in `image_path` closest to `target`, if any detected
    /// face is within the match threshold. No match is `Ok(None)`.
    pub fn locate(
        &self,
        embedder: &dyn FaceEmbedder,
        image_path: &Path,
        target: &[f32],
    ) -> Result<Option<DynamicImage>, ThumbnailError> {
        let faces = embedder.embed_faces(image_path)?;

        let best = faces
            .iter()
            .filter(|face| face.embedding.len() == target.len())
            .map(|face| (face, euclidean_distance(&face.embedding, target)))
            .filter(|(_, distance)| *distance < self.match_threshold)
            .min_by(|(_, a), (_, b)| a.total_cmp(b));

        let Some((face, distance)) = best else {
            log::debug!("No face in {} matches the target", image_path.display());
            return Ok(None);
        };
        log::debug!("Matched face in {} at distance {:.3}", image_path.display(), distance);

        let img = image::open(image_path)?;
        Ok(self.crop(&img, &face.bounding_box))
    }

    /// Crop `bbox` (clamped to the image) and shrink it to fit the thumbnail
    /// bound, keeping the aspect ratio. Smaller crops are not enlarged.
    pub fn crop(&self, img: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
        let (width, height) = img.dimensions();
        let left = bbox.left.min(width);
        let right = bbox.right.min(width);
        let top = bbox.top.min(height);
        let bottom = bbox.bottom.min(height);
        if right <= left || bottom <= top {
            return None;
        }

        let face = img.crop_imm(left, top, right - left, bottom - top);
        if face.width() <= self.thumbnail_size && face.height() <= self.thumbnail_size {
            Some(face)
        } else {
            Some(face.thumbnail(self.thumbnail_size, self.thumbnail_size))
        }
    }
}
