//! Density-based (DBSCAN) grouping of face embeddings into identities.
//!
//! With `min_samples == 1` every face is a core point and clusters are the
//! connected components of the "within `tolerance`" graph, so which faces end
//! up together never depends on input order. Only the numbering does: clusters
//! are numbered in order of their first face.

use crate::config::Config;
use crate::faces::embedder::{BoundingBox, FaceEmbedder};
use crate::faces::euclidean_distance;
use crate::{Progress, ProgressCallback};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cluster assignment of one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClusterLabel {
    Cluster(usize),
    /// Not density-reachable from any core face (only when `min_samples > 1`)
    Noise,
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterLabel::Cluster(id) => write!(f, "{}", id),
            ClusterLabel::Noise => f.write_str("-1"),
        }
    }
}

/// A face seen during one clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceObservation {
    pub image_path: PathBuf,
    /// Position of this face among its image's detected faces
    pub face_index: usize,
    pub embedding: Vec<f32>,
    pub bounding_box: BoundingBox,
}

/// Labels of one image's faces, in detection order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFaces {
    pub image_path: PathBuf,
    pub labels: Vec<ClusterLabel>,
}

/// The face shown to the naming surface for a cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Representative {
    pub embedding: Vec<f32>,
    pub image_path: PathBuf,
}

/// Observations with their labels; `labels[i]` belongs to `observations[i]`.
#[derive(Debug, Clone, Default)]
pub struct FaceClusters {
    pub observations: Vec<FaceObservation>,
    pub labels: Vec<ClusterLabel>,
}

impl FaceClusters {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn cluster_count(&self) -> usize {
        self.representatives().len()
    }

    /// Per-image labels, images in order of first observation.
    pub fn by_image(&self) -> Vec<ImageFaces> {
        let mut images: Vec<ImageFaces> = Vec::new();
        let mut index: HashMap<&Path, usize> = HashMap::new();

        for (observation, label) in self.observations.iter().zip(&self.labels) {
            let slot = *index
                .entry(observation.image_path.as_path())
                .or_insert_with(|| {
                    images.push(ImageFaces {
                        image_path: observation.image_path.clone(),
                        labels: Vec::new(),
                    });
                    images.len() - 1
                });
            images[slot].labels.push(*label);
        }
        images
    }

    /// First face of every cluster. Noise faces have no representative.
    pub fn representatives(&self) -> BTreeMap<usize, Representative> {
        let mut representatives = BTreeMap::new();
        for (observation, label) in self.observations.iter().zip(&self.labels) {
            if let ClusterLabel::Cluster(id) = label {
                representatives.entry(*id).or_insert_with(|| Representative {
                    embedding: observation.embedding.clone(),
                    image_path: observation.image_path.clone(),
                });
            }
        }
        representatives
    }
}

pub struct FaceClusterer {
    tolerance: f32,
    min_samples: usize,
}

impl FaceClusterer {
    pub fn new(tolerance: f32, min_samples: usize) -> Self {
        Self {
            tolerance,
            min_samples: min_samples.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cluster_tolerance, config.min_samples)
    }

    /// Run `embedder` over `image_paths` and return every face found, in
    /// path order then detection order.
    ///
    /// Images are embedded in parallel. An image whose embedding fails, or
    /// whose vectors disagree in length with the first image's, contributes
    /// no faces.
    pub fn collect_observations(
        &self,
        embedder: &dyn FaceEmbedder,
        image_paths: &[PathBuf],
        progress: Option<ProgressCallback<'_>>,
    ) -> Vec<FaceObservation> {
        let completed = AtomicUsize::new(0);

        let per_image: Vec<Vec<FaceObservation>> = image_paths
            .par_iter()
            .map(|path| {
                let faces = match embedder.embed_faces(path) {
                    Ok(faces) => faces,
                    Err(e) => {
                        log::warn!("Error processing faces in {}: {}", path.display(), e);
                        Vec::new()
                    }
                };

                if let Some(callback) = progress {
                    callback(Progress {
                        current_file: path.to_string_lossy().to_string(),
                        completed_count: completed.fetch_add(1, Ordering::Relaxed) + 1,
                        total_count: image_paths.len(),
                    });
                }

                faces
                    .into_iter()
                    .enumerate()
                    .map(|(face_index, face)| FaceObservation {
                        image_path: path.clone(),
                        face_index,
                        embedding: face.embedding,
                        bounding_box: face.bounding_box,
                    })
                    .collect()
            })
            .collect();

        let mut dimension = None;
        let mut observations = Vec::new();
        for faces in per_image {
            let Some(first) = faces.first() else {
                continue;
            };
            let expected = *dimension.get_or_insert(first.embedding.len());
            if faces.iter().any(|f| f.embedding.len() != expected) {
                log::warn!(
                    "Skipping faces in {}: embedding length differs from {}",
                    first.image_path.display(),
                    expected
                );
                continue;
            }
            observations.extend(faces);
        }
        observations
    }

    /// Label every observation. An empty batch gives an empty result.
    pub fn cluster(&self, observations: Vec<FaceObservation>) -> FaceClusters {
        if observations.is_empty() {
            return FaceClusters::default();
        }

        let embeddings: Vec<&[f32]> = observations.iter().map(|o| o.embedding.as_slice()).collect();
        let labels = dbscan(&embeddings, self.tolerance, self.min_samples);
        log::info!(
            "Clustered {} faces into {} groups",
            observations.len(),
            labels
                .iter()
                .filter_map(|l| match l {
                    ClusterLabel::Cluster(id) => Some(*id + 1),
                    ClusterLabel::Noise => None,
                })
                .max()
                .unwrap_or(0)
        );

        FaceClusters {
            observations,
            labels,
        }
    }

    pub fn cluster_images(
        &self,
        embedder: &dyn FaceEmbedder,
        image_paths: &[PathBuf],
        progress: Option<ProgressCallback<'_>>,
    ) -> FaceClusters {
        let observations = self.collect_observations(embedder, image_paths, progress);
        self.cluster(observations)
    }
}

/// DBSCAN over Euclidean distance; neighbourhoods include the point itself
/// and every point at distance `<= eps`.
pub fn dbscan(points: &[&[f32]], eps: f32, min_samples: usize) -> Vec<ClusterLabel> {
    let n = points.len();
    let neighbors: Vec<Vec<usize>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .filter(|&j| euclidean_distance(points[i], points[j]) <= eps)
                .collect()
        })
        .collect();
    let core: Vec<bool> = neighbors.iter().map(|nb| nb.len() >= min_samples).collect();

    // Core points reachable from each other form one cluster.
    let mut parent: Vec<usize> = (0..n).collect();
    for i in (0..n).filter(|&i| core[i]) {
        for &j in neighbors[i].iter().filter(|&&j| core[j]) {
            uf_union(&mut parent, i, j);
        }
    }

    let mut labels = vec![ClusterLabel::Noise; n];
    let mut root_ids: HashMap<usize, usize> = HashMap::new();
    for i in (0..n).filter(|&i| core[i]) {
        let root = uf_find(&mut parent, i);
        let next_id = root_ids.len();
        labels[i] = ClusterLabel::Cluster(*root_ids.entry(root).or_insert(next_id));
    }

    // Border points join the cluster of their first core neighbour.
    for i in (0..n).filter(|&i| !core[i]) {
        if let Some(&j) = neighbors[i].iter().find(|&&j| core[j]) {
            labels[i] = labels[j];
        }
    }

    labels
}

/// Path-compressing find.
fn uf_find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn uf_union(parent: &mut [usize], a: usize, b: usize) {
    let ra = uf_find(parent, a);
    let rb = uf_find(parent, b);
    if ra != rb {
        parent[ra] = rb;
    }
}
