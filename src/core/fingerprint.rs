use image::{DynamicImage, ImageReader};
use image_hasher::{HashAlg, Hasher, HasherConfig};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),
}

/// Mean (average-intensity) hash of an image, compared by exact equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Computes 8x8 mean-hash fingerprints.
pub struct FingerprintService {
    hasher: Hasher,
}

impl FingerprintService {
    pub fn new() -> Self {
        Self {
            hasher: HasherConfig::new()
                .hash_alg(HashAlg::Mean)
                .hash_size(8, 8)
                .to_hasher(),
        }
    }

    /// Decode `path` and fingerprint it.
    pub fn compute(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(self.fingerprint_image(&img))
    }

    pub fn fingerprint_image(&self, img: &DynamicImage) -> Fingerprint {
        Fingerprint(self.hasher.hash_image(img).as_bytes().to_vec())
    }

    /// Like [`compute`](Self::compute), but an unreadable image yields `None`.
    pub fn compute_or_none(&self, path: &Path) -> Option<Fingerprint> {
        match self.compute(path) {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                log::warn!("Could not fingerprint {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl Default for FingerprintService {
    fn default() -> Self {
        Self::new()
    }
}
