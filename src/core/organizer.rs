use crate::config::Config;
use crate::core::date::{DateResolver, DateSource};
use crate::core::dedup::Deduplicator;
use crate::core::exif::ExifService;
use crate::core::fingerprint::{Fingerprint, FingerprintService};
use crate::core::keywords::KeywordClassifier;
use crate::core::scanner::{self, ScanError};
use crate::{Progress, ProgressCallback};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// File name of the manifest written into the output root.
pub const MANIFEST_FILE: &str = "photo_index.json";

#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Failed to create output directory {path}: {source}")]
    OutputRoot {
        path: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Cumulative counters for one organise run.
///
/// Every enumerated file lands in exactly one of `deduplicated`, `copied`,
/// `already_organized`, `name_conflicts`, `unknown_date` or `copy_failures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_files: usize,
    pub deduplicated: usize,
    pub copied: usize,
    pub already_organized: usize,
    /// Destination name already taken by a different photo
    pub name_conflicts: usize,
    pub unknown_date: usize,
    pub copy_failures: usize,
    /// Copied files whose location comment could not be written (not a
    /// separate outcome, these are also counted in `copied`)
    pub metadata_write_failures: usize,
}

impl Stats {
    pub fn reconciles(&self) -> bool {
        self.total_files
            == self.deduplicated
                + self.copied
                + self.already_organized
                + self.name_conflicts
                + self.unknown_date
                + self.copy_failures
    }
}

/// Per-image facts gathered before placement.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub source_path: PathBuf,
    pub fingerprint: Option<Fingerprint>,
    pub capture_date: Option<NaiveDate>,
    pub event_label: Option<String>,
    pub location_tags: Vec<String>,
}

/// One placed image, as persisted in [`MANIFEST_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "source")]
    pub source_path: PathBuf,
    #[serde(rename = "destination")]
    pub destination_path: PathBuf,
    #[serde(rename = "date_taken")]
    pub capture_date: NaiveDate,
    #[serde(rename = "locations")]
    pub location_tags: Vec<String>,
}

/// Copies deduplicated, dated photos into `output_root/YYYY/MM[/event]`.
pub struct Organizer {
    config: Config,
    output_root: PathBuf,
    fingerprint_service: FingerprintService,
    date_resolver: DateResolver,
    classifier: KeywordClassifier,
    exif_service: ExifService,
    cancellation_token: Arc<AtomicBool>,
}

impl Organizer {
    pub fn new(config: &Config, output_root: impl Into<PathBuf>) -> Self {
        Self {
            config: config.clone(),
            output_root: output_root.into(),
            fingerprint_service: FingerprintService::new(),
            date_resolver: DateResolver::new(),
            classifier: KeywordClassifier::new(&config.event_keywords, &config.locations),
            exif_service: ExifService::new(),
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between images; setting it stops the run before the next image.
    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Scan `input_root`, organise every photo found and write the manifest.
    pub fn organize_directory(
        &self,
        input_root: &Path,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<(Stats, Vec<ManifestEntry>), OrganizeError> {
        let images = scanner::scan_directory(input_root, &self.config)?;
        log::info!("Found {} images. Processing...", images.len());

        let (stats, manifest) = self.organize(input_root, &images, progress)?;
        let manifest_path = write_manifest(&self.output_root, &manifest)?;
        log::info!(
            "Wrote {} manifest entries to {}",
            manifest.len(),
            manifest_path.display()
        );
        Ok((stats, manifest))
    }

    /// Organise `images` (paths under `input_root`) in the given order.
    pub fn organize(
        &self,
        input_root: &Path,
        images: &[PathBuf],
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<(Stats, Vec<ManifestEntry>), OrganizeError> {
        fs::create_dir_all(&self.output_root).map_err(|source| OrganizeError::OutputRoot {
            path: self.output_root.to_string_lossy().to_string(),
            source,
        })?;

        let mut stats = Stats::default();
        let mut dedup = Deduplicator::new();
        let mut manifest = Vec::new();

        for (index, path) in images.iter().enumerate() {
            if self.cancellation_token.load(Ordering::Relaxed) {
                return Err(OrganizeError::Cancelled);
            }

            if let Some(entry) = self.process_image(input_root, path, &mut dedup, &mut stats) {
                manifest.push(entry);
            }

            if let Some(callback) = progress {
                callback(Progress {
                    current_file: path.to_string_lossy().to_string(),
                    completed_count: index + 1,
                    total_count: images.len(),
                });
            }
        }

        debug_assert!(stats.reconciles());
        log::info!(
            "Total: {}, Deduplicated: {}, Copied: {}, Already organised: {}, Name conflicts: {}, Unknown date: {}, Copy failures: {}",
            stats.total_files,
            stats.deduplicated,
            stats.copied,
            stats.already_organized,
            stats.name_conflicts,
            stats.unknown_date,
            stats.copy_failures
        );
        Ok((stats, manifest))
    }

    fn process_image(
        &self,
        input_root: &Path,
        path: &Path,
        dedup: &mut Deduplicator,
        stats: &mut Stats,
    ) -> Option<ManifestEntry> {
        stats.total_files += 1;
        // Path-derived classification ignores the input root's own name
        let relative = path.strip_prefix(input_root).unwrap_or(path);

        let fingerprint = self.fingerprint_service.compute_or_none(path);
        if !dedup.admit(fingerprint.clone()).is_admitted() {
            log::debug!("Duplicate skipped: {}", path.display());
            stats.deduplicated += 1;
            return None;
        }

        let Some((capture_date, source)) = self.date_resolver.resolve(path, relative) else {
            log::warn!("No date found for {}", path.display());
            stats.unknown_date += 1;
            return None;
        };
        if source != DateSource::Metadata {
            log::debug!("Inferred {} for {} ({:?})", capture_date, path.display(), source);
        }

        let record = ImageRecord {
            source_path: path.to_path_buf(),
            fingerprint,
            capture_date: Some(capture_date),
            event_label: self.classifier.event_label(relative),
            location_tags: self.classifier.locations(relative),
        };

        let destination = match self.place(&record, capture_date) {
            Ok(Placement::Copied(destination)) => {
                stats.copied += 1;
                if !self.annotate_locations(&record, &destination) {
                    stats.metadata_write_failures += 1;
                }
                destination
            }
            Ok(Placement::AlreadyPresent(destination)) => {
                log::debug!("Already organised: {}", destination.display());
                stats.already_organized += 1;
                destination
            }
            Ok(Placement::NameTaken(destination)) => {
                log::warn!(
                    "Skipping {}: {} already holds a different photo",
                    path.display(),
                    destination.display()
                );
                stats.name_conflicts += 1;
                return None;
            }
            Err(e) => {
                log::warn!("Failed to copy {}: {}", path.display(), e);
                stats.copy_failures += 1;
                return None;
            }
        };

        Some(ManifestEntry {
            source_path: record.source_path,
            destination_path: destination,
            capture_date,
            location_tags: record.location_tags,
        })
    }

    /// `output_root/YYYY/MM[/event_label]`
    pub fn destination_dir(&self, capture_date: NaiveDate, event_label: Option<&str>) -> PathBuf {
        let mut dir = self
            .output_root
            .join(capture_date.year().to_string())
            .join(format!("{:02}", capture_date.month()));
        if let Some(label) = event_label {
            dir.push(label);
        }
        dir
    }

    fn place(&self, record: &ImageRecord, capture_date: NaiveDate) -> std::io::Result<Placement> {
        let dest_dir = self.destination_dir(capture_date, record.event_label.as_deref());
        fs::create_dir_all(&dest_dir)?;

        let file_name = record.source_path.file_name().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
        })?;
        let destination = dest_dir.join(file_name);
        if destination.exists() {
            return Ok(if self.holds_same_photo(record, &destination)? {
                Placement::AlreadyPresent(destination)
            } else {
                Placement::NameTaken(destination)
            });
        }

        if let Err(e) = copy_preserving_mtime(&record.source_path, &destination) {
            // drop any partial copy
            let _ = fs::remove_file(&destination);
            return Err(e);
        }
        Ok(Placement::Copied(destination))
    }

    /// Placed copies may carry a rewritten comment, so decodable photos are
    /// compared by fingerprint and everything else byte for byte.
    fn holds_same_photo(&self, record: &ImageRecord, destination: &Path) -> std::io::Result<bool> {
        match &record.fingerprint {
            Some(fingerprint) => Ok(self
                .fingerprint_service
                .compute_or_none(destination)
                .is_some_and(|existing| existing == *fingerprint)),
            None => Ok(fs::read(&record.source_path)? == fs::read(destination)?),
        }
    }

    /// Write the location comment, then restore the source mtime that the
    /// rewrite clobbered. Returns false if the comment could not be written.
    fn annotate_locations(&self, record: &ImageRecord, destination: &Path) -> bool {
        if record.location_tags.is_empty() {
            return true;
        }

        let comment = record.location_tags.join("; ");
        if let Err(e) = self.exif_service.write_comment(destination, &comment) {
            log::warn!("Failed to write EXIF to {}: {}", destination.display(), e);
            return false;
        }
        if let Err(e) = copy_mtime(&record.source_path, destination) {
            log::debug!("Could not restore mtime on {}: {}", destination.display(), e);
        }
        true
    }
}

enum Placement {
    Copied(PathBuf),
    AlreadyPresent(PathBuf),
    NameTaken(PathBuf),
}

fn copy_preserving_mtime(source: &Path, destination: &Path) -> std::io::Result<()> {
    fs::copy(source, destination)?;
    copy_mtime(source, destination)
}

fn copy_mtime(source: &Path, destination: &Path) -> std::io::Result<()> {
    let modified = fs::metadata(source)?.modified()?;
    OpenOptions::new()
        .write(true)
        .open(destination)?
        .set_modified(modified)
}

/// Overwrite `output_root/photo_index.json` with `manifest`.
pub fn write_manifest(output_root: &Path, manifest: &[ManifestEntry]) -> Result<PathBuf, OrganizeError> {
    fs::create_dir_all(output_root)?;
    let path = output_root.join(MANIFEST_FILE);
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, manifest)?;
    Ok(path)
}

pub fn read_manifest(output_root: &Path) -> Result<Vec<ManifestEntry>, OrganizeError> {
    let reader = BufReader::new(File::open(output_root.join(MANIFEST_FILE))?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use crate::core::exif::ExifError;
    use image::{Rgb, RgbImage};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// Checkerboard photo; different `cell` sizes give different fingerprints.
    fn write_photo(path: &Path, cell: u32, taken: Option<&str>) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_fn(32, 32, |x, y| {
            if (x / cell + y / cell) % 2 == 0 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        })
        .save(path)
        .unwrap();
        if let Some(taken) = taken {
            let taken = NaiveDateTime::parse_from_str(taken, "%Y:%m:%d %H:%M:%S").unwrap();
            ExifService::new().write_date_taken(path, taken).unwrap();
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Two byte-identical dated copies plus one unreadable undated file.
    fn wedding_fixture(input: &Path) {
        let a = input.join("IMG_2020_Paris_Wedding/a.jpg");
        write_photo(&a, 8, Some("2020:06:01 10:00:00"));
        fs::copy(&a, input.join("IMG_2020_Paris_Wedding/b.jpg")).unwrap();
        fs::write(input.join("notes.jpg"), b"not really a jpeg").unwrap();
    }

    #[test]
    fn test_end_to_end_dedup_and_placement() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        wedding_fixture(&input);

        let organizer = Organizer::new(&Config::default(), &output);
        let (stats, manifest) = organizer.organize_directory(&input, None).unwrap();

        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.deduplicated, 1);
        assert_eq!(stats.copied, 1);
        assert_eq!(stats.unknown_date, 1);
        assert_eq!(stats.copy_failures, 0);
        assert!(stats.reconciles());

        assert_eq!(manifest.len(), 1);
        let entry = &manifest[0];
        assert_eq!(
            entry.destination_path,
            output.join("2020").join("06").join("IMG_2020_Paris_Wedding").join("a.jpg")
        );
        assert_eq!(entry.source_path, input.join("IMG_2020_Paris_Wedding").join("a.jpg"));
        assert_eq!(entry.capture_date, ymd(2020, 6, 1));
        assert_eq!(entry.location_tags, vec!["paris"]);
        assert!(entry.destination_path.is_file());

        let comment = ExifService::new().read_comment(&entry.destination_path).unwrap();
        assert_eq!(comment.as_deref(), Some("paris"));

        assert_eq!(read_manifest(&output).unwrap(), manifest);
    }

    #[test]
    fn test_second_run_copies_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        wedding_fixture(&input);

        let organizer = Organizer::new(&Config::default(), &output);
        let (_, first) = organizer.organize_directory(&input, None).unwrap();
        let (stats, second) = organizer.organize_directory(&input, None).unwrap();

        assert_eq!(stats.copied, 0);
        assert_eq!(stats.already_organized, 1);
        assert_eq!(stats.deduplicated, 1);
        assert_eq!(stats.unknown_date, 1);
        assert!(stats.reconciles());
        assert_eq!(first, second);
    }

    #[test]
    fn test_same_name_different_photo_is_not_indexed() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        write_photo(&input.join("2020/x/IMG_1.jpg"), 8, None);
        write_photo(&input.join("2020/y/IMG_1.jpg"), 16, None);

        let organizer = Organizer::new(&Config::default(), &output);
        let (stats, manifest) = organizer.organize_directory(&input, None).unwrap();

        assert_eq!(stats.copied, 1);
        assert_eq!(stats.name_conflicts, 1);
        assert_eq!(stats.already_organized, 0);
        assert!(stats.reconciles());
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].source_path, input.join("2020/x/IMG_1.jpg"));
        assert_eq!(manifest[0].destination_path, output.join("2020/01/IMG_1.jpg"));

        // the copy that owns the name is still recognised on a re-run
        let (stats, rerun) = organizer.organize_directory(&input, None).unwrap();
        assert_eq!(stats.copied, 0);
        assert_eq!(stats.already_organized, 1);
        assert_eq!(stats.name_conflicts, 1);
        assert_eq!(rerun, manifest);
    }

    #[test]
    fn test_metadata_write_failure_keeps_entry() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        write_photo(&input.join("paris/2019/x.png"), 8, None);

        let organizer = Organizer::new(&Config::default(), &output);
        let (stats, manifest) = organizer.organize_directory(&input, None).unwrap();

        assert_eq!(stats.copied, 1);
        assert_eq!(stats.metadata_write_failures, 1);
        assert!(stats.reconciles());
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].location_tags, vec!["paris"]);
        assert_eq!(manifest[0].capture_date, ymd(2019, 1, 1));

        let copied = &manifest[0].destination_path;
        assert!(image::open(copied).is_ok());
        assert!(matches!(
            ExifService::new().write_comment(copied, "paris"),
            Err(ExifError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_manifest_bounded_by_unique_fingerprints() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        write_photo(&input.join("2018/03/one.jpg"), 8, None);
        write_photo(&input.join("2018/03/two.jpg"), 8, None);
        write_photo(&input.join("2018/04/three.jpg"), 16, None);
        write_photo(&input.join("2019/01/four.jpg"), 16, None);

        let service = FingerprintService::new();
        let unique: HashSet<_> = scanner::scan_directory(&input, &Config::default())
            .unwrap()
            .iter()
            .filter_map(|p| service.compute_or_none(p))
            .collect();

        let organizer = Organizer::new(&Config::default(), &output);
        let (stats, manifest) = organizer.organize_directory(&input, None).unwrap();

        assert_eq!(unique.len(), 2);
        assert!(manifest.len() <= unique.len());
        assert_eq!(stats.deduplicated, 2);
        // first in enumeration order wins
        let kept: Vec<_> = manifest
            .iter()
            .map(|e| e.destination_path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(kept, vec!["one.jpg", "three.jpg"]);
        assert_eq!(manifest[1].capture_date, ymd(2018, 4, 1));
    }

    #[test]
    fn test_unreadable_images_are_never_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        fs::create_dir_all(input.join("1999")).unwrap();
        fs::write(input.join("1999/x.jpg"), b"garbage").unwrap();
        fs::write(input.join("1999/y.jpg"), b"garbage").unwrap();

        let organizer = Organizer::new(&Config::default(), &output);
        let (stats, manifest) = organizer.organize_directory(&input, None).unwrap();

        assert_eq!(stats.deduplicated, 0);
        assert_eq!(stats.copied, 2);
        assert_eq!(manifest.len(), 2);
        assert!(output.join("1999/01/x.jpg").is_file());
    }

    #[test]
    fn test_event_folder_and_month_name() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        write_photo(&input.join("Summer_Aug_Trip/img.jpg"), 8, None);

        let organizer = Organizer::new(&Config::default(), &output);
        let (_, manifest) = organizer.organize_directory(&input, None).unwrap();

        assert_eq!(
            manifest[0].destination_path,
            output.join("2000").join("08").join("Summer_Aug_Trip").join("img.jpg")
        );
    }

    #[test]
    fn test_copy_failure_does_not_abort_batch() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        write_photo(&input.join("2001/a.jpg"), 8, None);
        write_photo(&input.join("2002/b.jpg"), 16, None);
        // a plain file where the 2001/01 directory must go
        fs::create_dir_all(output.join("2001")).unwrap();
        fs::write(output.join("2001/01"), b"blocker").unwrap();

        let organizer = Organizer::new(&Config::default(), &output);
        let (stats, manifest) = organizer.organize_directory(&input, None).unwrap();

        assert_eq!(stats.copy_failures, 1);
        assert_eq!(stats.copied, 1);
        assert!(stats.reconciles());
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].capture_date, ymd(2002, 1, 1));
    }

    #[test]
    fn test_copy_preserves_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        let source = input.join("Paris 2010/img.jpg");
        write_photo(&source, 8, None);
        let past = SystemTime::UNIX_EPOCH + Duration::from_secs(1_300_000_000);
        OpenOptions::new()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let organizer = Organizer::new(&Config::default(), &output);
        let (_, manifest) = organizer.organize_directory(&input, None).unwrap();

        let copied = &manifest[0].destination_path;
        assert_eq!(fs::metadata(copied).unwrap().modified().unwrap(), past);
        assert_eq!(manifest[0].location_tags, vec!["paris"]);
    }

    #[test]
    fn test_progress_and_cancellation() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("input");
        let output = temp_dir.path().join("output");
        write_photo(&input.join("2001/a.jpg"), 8, None);
        write_photo(&input.join("2002/b.jpg"), 16, None);

        let organizer = Organizer::new(&Config::default(), &output);
        let seen = Mutex::new(Vec::new());
        let record = |p: Progress| seen.lock().unwrap().push((p.completed_count, p.total_count));
        organizer.organize_directory(&input, Some(&record)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);

        organizer.get_cancellation_token().store(true, Ordering::Relaxed);
        assert!(matches!(
            organizer.organize_directory(&input, None),
            Err(OrganizeError::Cancelled)
        ));
    }

    #[test]
    fn test_manifest_json_shape() {
        let entry = ManifestEntry {
            source_path: PathBuf::from("in/a.jpg"),
            destination_path: PathBuf::from("out/2020/06/a.jpg"),
            capture_date: ymd(2020, 6, 1),
            location_tags: vec!["paris".to_string()],
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["source"], "in/a.jpg");
        assert_eq!(value["destination"], "out/2020/06/a.jpg");
        assert_eq!(value["date_taken"], "2020-06-01");
        assert_eq!(value["locations"][0], "paris");
    }
}
