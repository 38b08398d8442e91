use crate::core::exif::ExifService;
use crate::faces::cluster::{ClusterLabel, FaceClusters};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the annotation index written into the output root.
pub const ANNOTATIONS_FILE: &str = "faces.json";

#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Display names chosen for clusters, keyed by cluster id.
pub type NameMap = BTreeMap<usize, String>;

/// Image path to the names of the people in it.
pub type Annotations = BTreeMap<PathBuf, Vec<String>>;

/// Name for `label`; unnamed clusters (and noise) get `Unknown-<label>`.
pub fn display_name(label: ClusterLabel, names: &NameMap) -> String {
    let named = match label {
        ClusterLabel::Cluster(id) => names.get(&id).map(|n| n.trim()).filter(|n| !n.is_empty()),
        ClusterLabel::Noise => None,
    };
    match named {
        Some(name) => name.to_string(),
        None => format!("Unknown-{}", label),
    }
}

/// Map every image's face labels through `names`. Each image lists a name
/// once, in order of first appearance.
pub fn annotate(clusters: &FaceClusters, names: &NameMap) -> Annotations {
    clusters
        .by_image()
        .into_iter()
        .map(|image| {
            let mut people: Vec<String> = Vec::new();
            for label in image.labels {
                let name = display_name(label, names);
                if !people.contains(&name) {
                    people.push(name);
                }
            }
            (image.image_path, people)
        })
        .collect()
}

/// Overwrite each image's EXIF comment with `Faces: <names>`. Returns how
/// many images could not be written; failures are logged and skipped.
pub fn write_face_comments(annotations: &Annotations, exif_service: &ExifService) -> usize {
    let mut failures = 0;
    for (path, people) in annotations {
        let comment = format!("Faces: {}", people.join(", "));
        if let Err(e) = exif_service.write_comment(path, &comment) {
            log::warn!("Failed to write face EXIF for {}: {}", path.display(), e);
            failures += 1;
        }
    }
    failures
}

pub fn write_annotations(output_root: &Path, annotations: &Annotations) -> Result<PathBuf, AnnotateError> {
    fs::create_dir_all(output_root)?;
    let path = output_root.join(ANNOTATIONS_FILE);
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, annotations)?;
    Ok(path)
}

pub fn read_annotations(path: &Path) -> Result<Annotations, AnnotateError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Read a `{"<cluster id>": "<name>"}` JSON file.
pub fn read_name_map(path: &Path) -> Result<NameMap, AnnotateError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Entries whose names include every filter, compared case-insensitively.
/// Blank filters match everything.
pub fn search<'a>(annotations: &'a Annotations, filters: &[&str]) -> Vec<(&'a Path, &'a [String])> {
    let filters: Vec<String> = filters
        .iter()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect();

    annotations
        .iter()
        .filter(|(_, people)| {
            let people: Vec<String> = people.iter().map(|p| p.to_lowercase()).collect();
            filters.iter().all(|f| people.contains(f))
        })
        .map(|(path, people)| (path.as_path(), people.as_slice()))
        .collect()
}
