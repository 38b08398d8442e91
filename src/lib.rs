//! Photo library organiser.
//!
//! Deduplicates an unsorted photo tree by perceptual hash, places the survivors
//! into a `year/month[/event]` copy tree, then clusters the faces found in the
//! placed photos so they can be named and searched.

pub mod config;
pub mod core;
pub mod faces;

pub use config::Config;
pub use core::organizer::{ManifestEntry, Organizer, Stats};
pub use faces::cluster::{ClusterLabel, FaceClusterer, FaceClusters};
pub use faces::embedder::{BoundingBox, CommandEmbedder, DetectedFace, FaceEmbedder};
pub use faces::thumbnail::ThumbnailLocator;

/// Progress snapshot handed to long-running operations' callbacks.
#[derive(Debug, Clone)]
pub struct Progress {
    pub current_file: String,
    pub completed_count: usize,
    pub total_count: usize,
}

pub type ProgressCallback<'a> = &'a (dyn Fn(Progress) + Send + Sync);
