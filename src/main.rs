use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

use clap::Parser;
use textdet::{DatasetEntry, DatasetError, DatasetIndex, DatasetOptions, ScoreMapConfig, ScoreMaps};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Index a scene-text dataset and parse every annotation in it.
#[derive(Debug, Parser)]
struct Args {
    /// Registered dataset key, e.g. IC15.
    dataset: String,
    #[arg(long, default_value = "./data")]
    root: PathBuf,
    /// Use the test split instead of the training split.
    #[arg(long)]
    test: bool,
    /// File listing image basenames to skip, one per line.
    #[arg(long)]
    exclusion_file: Option<PathBuf>,
    /// Image basenames to skip.
    #[arg(long)]
    exclude: Vec<String>,
    /// Report annotations with vertices outside their image.
    #[arg(long)]
    check_bounds: bool,
    /// Write each image's text map and training mask as PNGs into this directory.
    #[arg(long)]
    render: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> textdet::Result<()> {
    let mut options = DatasetOptions::new()
        .root(&args.root)
        .training(!args.test)
        .exclude(args.exclude.iter().cloned());
    if let Some(path) = &args.exclusion_file {
        options = options.exclusion_file(path);
    }

    let start = Instant::now();
    let index = textdet::create(&args.dataset, &options)?;
    let stats = index.statistics()?;
    log::info!(
        "{}: {} images, {} instances ({} ignored) in {:?}",
        index.name(),
        stats.images,
        stats.instances,
        stats.ignored,
        start.elapsed()
    );

    if args.check_bounds {
        check_bounds(&index)?;
    }
    if let Some(dir) = &args.render {
        std::fs::create_dir_all(dir).map_err(|err| DatasetError::Io {
            path: dir.clone(),
            source: err,
        })?;
        for entry in &index {
            render(entry, dir)?;
        }
    }
    Ok(())
}

fn check_bounds(index: &DatasetIndex) -> textdet::Result<()> {
    let mut offending = 0;
    for entry in index {
        let outside = entry.check_bounds()?;
        if !outside.is_empty() {
            log::warn!(
                "{}: records {outside:?} leave the image",
                entry.annotation_path().display()
            );
            offending += outside.len();
        }
    }
    log::info!("{offending} records outside their image");
    Ok(())
}

fn render(entry: &DatasetEntry, dir: &Path) -> textdet::Result<()> {
    let image_path = entry.image_path();
    let (width, height) =
        image::image_dimensions(image_path).map_err(|source| DatasetError::Image {
            path: image_path.to_path_buf(),
            source,
        })?;
    let maps = ScoreMaps::render(&entry.parse()?, width, height, &ScoreMapConfig::default());

    let stem = image_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    for (suffix, map) in [("text", &maps.text), ("mask", &maps.mask)] {
        let path = dir.join(format!("{stem}_{suffix}.png"));
        map.save(&path)
            .map_err(|source| DatasetError::Image { path, source })?;
    }
    Ok(())
}
