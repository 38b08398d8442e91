use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use sortrs::core::exif::ExifService;
use sortrs::core::organizer::read_manifest;
use sortrs::faces::annotate::{self, NameMap};
use sortrs::faces::cluster::Representative;
use sortrs::{CommandEmbedder, Config, FaceClusterer, FaceEmbedder, Organizer, Progress, Stats, ThumbnailLocator};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "sortrs", version, about = "CLI for organising photo libraries")]
struct Cli {
    /// Config file (default: `<config dir>/sortrs/config.json` if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deduplicate and copy photos into `<output>/YYYY/MM[/event]`
    Organize {
        /// Directory to organise
        #[arg(short, long, value_name = "DIR")]
        input: PathBuf,
        /// Root of the organised copy tree
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
    },

    /// Cluster and name the faces in an organised tree
    Faces {
        /// Root of the organised copy tree
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
        #[command(flatten)]
        naming: NamingArgs,
    },

    /// List annotated photos containing every given name
    Search {
        /// Root of the organised copy tree
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
        /// Name to require (repeatable)
        #[arg(short, long = "name", value_name = "NAME")]
        names: Vec<String>,
    },

    /// Organise, then cluster and name faces
    Run {
        /// Directory to organise
        #[arg(short, long, value_name = "DIR")]
        input: PathBuf,
        /// Root of the organised copy tree
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
        #[command(flatten)]
        naming: NamingArgs,
    },
}

#[derive(clap::Args, Debug)]
struct NamingArgs {
    /// JSON file mapping cluster ids to names
    #[arg(long, value_name = "FILE")]
    names: Option<PathBuf>,
    /// Leave clusters without a name entry unnamed instead of asking
    #[arg(long)]
    no_prompt: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Organize { input, output } => {
            organize(&config, &input, &output)?;
        }

        Commands::Faces { output, naming } => {
            faces(&config, &output, &naming)?;
        }

        Commands::Search { output, names } => {
            let path = output.join(annotate::ANNOTATIONS_FILE);
            let annotations = annotate::read_annotations(&path)
                .with_context(|| format!("Could not read annotations {}", path.display()))?;
            let filters: Vec<&str> = names.iter().map(String::as_str).collect();
            let hits = annotate::search(&annotations, &filters);

            if hits.is_empty() {
                println!("No matching photos.");
            } else {
                println!("Found {} photo(s):", hits.len());
                for (path, people) in hits {
                    println!("   ▶ {} [{}]", path.display(), people.join(", "));
                }
            }
        }

        Commands::Run {
            input,
            output,
            naming,
        } => {
            organize(&config, &input, &output)?;
            faces(&config, &output, &naming)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn organize(config: &Config, input: &Path, output: &Path) -> Result<()> {
    println!("▶ Organising {} → {}", input.display(), output.display());
    let organizer = Organizer::new(config, output);

    let bar = progress_bar("Organising")?;
    let on_progress = |p: Progress| {
        bar.set_length(p.total_count as u64);
        bar.set_position(p.completed_count as u64);
        bar.set_message(p.current_file);
    };
    let (stats, manifest) = benchmark("organising", || {
        organizer.organize_directory(input, Some(&on_progress))
    })
    .with_context(|| format!("Failed to organise {}", input.display()))?;
    bar.finish_and_clear();

    print_stats(&stats);
    println!("✅ Indexed {} photo(s) in {}", manifest.len(), output.display());
    Ok(())
}

fn faces(config: &Config, output: &Path, naming: &NamingArgs) -> Result<()> {
    let command = config
        .embedder
        .as_deref()
        .context("No face embedder configured; set `embedder` in the config file")?;
    let embedder = CommandEmbedder::from_command_line(command)
        .context("Embedder command must name a program")?;

    let manifest = read_manifest(output)
        .with_context(|| format!("Could not read photo index in {}", output.display()))?;
    let images: Vec<PathBuf> = manifest.into_iter().map(|e| e.destination_path).collect();
    println!("▶ Detecting faces in {} photo(s)…", images.len());

    let clusterer = FaceClusterer::from_config(config);
    let bar = progress_bar("Detecting faces")?;
    let on_progress = |p: Progress| {
        bar.set_length(p.total_count as u64);
        bar.set_position(p.completed_count as u64);
        bar.set_message(p.current_file);
    };
    let clusters = benchmark("face detection", || {
        clusterer.cluster_images(&embedder, &images, Some(&on_progress))
    });
    bar.finish_and_clear();

    if clusters.is_empty() {
        println!("No faces found.");
        return Ok(());
    }
    println!(
        "Found {} face(s) in {} group(s)",
        clusters.observations.len(),
        clusters.cluster_count()
    );

    let names = name_clusters(config, &embedder, output, &clusters.representatives(), naming)?;
    let annotations = annotate::annotate(&clusters, &names);

    let failures = annotate::write_face_comments(&annotations, &ExifService::new());
    if failures > 0 {
        println!("⚠️  Could not write face names into {} photo(s)", failures);
    }

    let path = annotate::write_annotations(output, &annotations)
        .with_context(|| format!("Failed to write annotations in {}", output.display()))?;
    println!("✅ Annotated {} photo(s) in {}", annotations.len(), path.display());
    Ok(())
}

/// Names from `--names`, then an interactive prompt for every cluster still
/// unnamed unless `--no-prompt` is given.
fn name_clusters(
    config: &Config,
    embedder: &dyn FaceEmbedder,
    output: &Path,
    representatives: &BTreeMap<usize, Representative>,
    naming: &NamingArgs,
) -> Result<NameMap> {
    let mut names = match &naming.names {
        Some(path) => annotate::read_name_map(path)
            .with_context(|| format!("Could not read name map {}", path.display()))?,
        None => NameMap::new(),
    };
    if naming.no_prompt {
        return Ok(names);
    }

    let locator = ThumbnailLocator::from_config(config);
    let thumbnail_dir = output.join(".faces");
    fs::create_dir_all(&thumbnail_dir)
        .with_context(|| format!("Failed to create directory {}", thumbnail_dir.display()))?;

    for (id, representative) in representatives {
        if names.contains_key(id) {
            continue;
        }

        println!("\n✨ Group {} (first seen in {})", id, representative.image_path.display());
        match locator.locate(embedder, &representative.image_path, &representative.embedding) {
            Ok(Some(thumbnail)) => {
                let path = thumbnail_dir.join(format!("cluster-{}.png", id));
                match thumbnail.save(&path) {
                    Ok(()) => println!("   🖼  Face saved to {}", path.display()),
                    Err(e) => log::warn!("Failed to save thumbnail {}: {}", path.display(), e),
                }
            }
            Ok(None) => println!("   (face could not be located again)"),
            Err(e) => log::warn!("Thumbnail for group {} failed: {}", id, e),
        }

        let name: String = Input::new()
            .with_prompt(format!("Name for group {} (empty to skip)", id))
            .allow_empty(true)
            .interact_text()
            .context("Failed to read name")?;
        names.insert(*id, name);
    }
    Ok(names)
}

fn print_stats(stats: &Stats) {
    println!("\nSummary:");
    println!("   Total files:       {}", stats.total_files);
    println!("   Copied:            {}", stats.copied);
    println!("   Already organised: {}", stats.already_organized);
    println!("   Name conflicts:    {}", stats.name_conflicts);
    println!("   Duplicates:        {}", stats.deduplicated);
    println!("   Unknown date:      {}", stats.unknown_date);
    println!("   Copy failures:     {}", stats.copy_failures);
    if stats.metadata_write_failures > 0 {
        println!("   Metadata failures: {}", stats.metadata_write_failures);
    }
}

fn progress_bar(prefix: &'static str) -> Result<ProgressBar> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{prefix} [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")?
            .progress_chars("=> "),
    );
    bar.set_prefix(prefix);
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
