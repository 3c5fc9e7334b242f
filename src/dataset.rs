use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use image::{DynamicImage, ImageFormat};
use tracing::instrument;

use crate::{
    parse::{self, ParseFn},
    DatasetError, PolygonRecord, Result,
};

/// How an image's stem maps to its annotation file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationName {
    /// `<stem>.<extension>`
    Plain { extension: String },
    /// `<prefix><stem>.<extension>`
    Prefixed { prefix: String, extension: String },
}

impl AnnotationName {
    pub fn plain(extension: impl Into<String>) -> Self {
        Self::Plain {
            extension: extension.into(),
        }
    }

    pub fn prefixed(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self::Prefixed {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    pub fn file_name(&self, stem: &str) -> String {
        match self {
            AnnotationName::Plain { extension } => format!("{stem}.{extension}"),
            AnnotationName::Prefixed { prefix, extension } => {
                format!("{prefix}{stem}.{extension}")
            }
        }
    }
}

/// Where a dataset keeps its images and annotations, and which parser
/// reads the annotations.
#[derive(Debug, Clone)]
pub struct Layout {
    pub name: String,
    pub dataset_dir: PathBuf,
    pub image_dir: PathBuf,
    pub annotation_dir: PathBuf,
    pub naming: AnnotationName,
    pub parser: ParseFn,
}

impl Layout {
    /// A layout for a format this crate does not ship. `parser` must follow
    /// the same contract as the built-in parsers.
    pub fn custom(
        name: impl Into<String>,
        dataset_dir: impl Into<PathBuf>,
        image_dir: impl Into<PathBuf>,
        annotation_dir: impl Into<PathBuf>,
        naming: AnnotationName,
        parser: ParseFn,
    ) -> Self {
        Self {
            name: name.into(),
            dataset_dir: dataset_dir.into(),
            image_dir: image_dir.into(),
            annotation_dir: annotation_dir.into(),
            naming,
            parser,
        }
    }

    fn check_before_run(&self) -> Result<()> {
        for dir in [&self.dataset_dir, &self.image_dir, &self.annotation_dir] {
            if !dir.exists() {
                return Err(DatasetError::MissingResource { path: dir.clone() });
            }
        }
        Ok(())
    }
}

/// Image basenames (file stems) to leave out of an index.
#[derive(Debug, Clone, Default)]
pub struct Exclusions(HashSet<String>);

impl Exclusions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads one basename per line; surrounding whitespace and blank lines
    /// are ignored.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|err| DatasetError::io(path, err))?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect())
    }

    pub fn insert(&mut self, basename: impl Into<String>) {
        self.0.insert(basename.into());
    }

    pub fn contains(&self, basename: &str) -> bool {
        self.0.contains(basename)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Exclusions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for Exclusions {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

#[derive(Debug, Clone)]
pub struct DatasetEntry {
    image_path: PathBuf,
    annotation_path: PathBuf,
    parser: ParseFn,
}

impl DatasetEntry {
    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn annotation_path(&self) -> &Path {
        &self.annotation_path
    }

    pub fn parser(&self) -> ParseFn {
        self.parser
    }

    /// Parses this entry's annotation file. Nothing is cached.
    pub fn parse(&self) -> Result<Vec<PolygonRecord>> {
        (self.parser)(&self.annotation_path)
    }

    pub fn load_image(&self) -> Result<DynamicImage> {
        image::open(&self.image_path).map_err(|source| DatasetError::Image {
            path: self.image_path.clone(),
            source,
        })
    }

    /// Indices of the records with a vertex outside the image. Only the
    /// image header is read.
    pub fn check_bounds(&self) -> Result<Vec<usize>> {
        let (width, height) =
            image::image_dimensions(&self.image_path).map_err(|source| DatasetError::Image {
                path: self.image_path.clone(),
                source,
            })?;
        Ok(self
            .parse()?
            .iter()
            .enumerate()
            .filter(|(_, record)| !record.within_bounds(width, height))
            .map(|(index, _)| index)
            .collect())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetStatistics {
    pub images: usize,
    pub instances: usize,
    pub ignored: usize,
}

/// Images paired with their annotation files, in file name order.
/// Annotations are only read when an entry is parsed.
#[derive(Debug, Clone)]
pub struct DatasetIndex {
    name: String,
    entries: Vec<DatasetEntry>,
}

impl DatasetIndex {
    #[instrument(skip(exclusions), fields(name = %layout.name))]
    pub fn scan(layout: &Layout, exclusions: &Exclusions) -> Result<Self> {
        layout.check_before_run()?;

        let read_dir = fs::read_dir(&layout.image_dir)
            .map_err(|err| DatasetError::io(&layout.image_dir, err))?;
        let mut images = Vec::new();
        for dir_entry in read_dir {
            let path = dir_entry
                .map_err(|err| DatasetError::io(&layout.image_dir, err))?
                .path();
            if path.is_file() && ImageFormat::from_path(&path).is_ok() {
                images.push(path);
            }
        }
        images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut entries = Vec::with_capacity(images.len());
        for image_path in images {
            let stem = image_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            if exclusions.contains(&stem) {
                log::debug!("Excluding {stem}");
                continue;
            }
            let annotation_path = layout.annotation_dir.join(layout.naming.file_name(&stem));
            entries.push(DatasetEntry {
                image_path,
                annotation_path,
                parser: layout.parser,
            });
        }
        log::debug!("Indexed {} images for {}", entries.len(), layout.name);

        Ok(Self {
            name: layout.name.clone(),
            entries,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DatasetEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DatasetEntry> {
        self.entries.iter()
    }

    /// Parses every entry, stopping at the first failure.
    #[instrument(skip(self), fields(name = %self.name))]
    pub fn statistics(&self) -> Result<DatasetStatistics> {
        let mut stats = DatasetStatistics {
            images: self.entries.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            let records = entry.parse()?;
            stats.instances += records.len();
            stats.ignored += records.iter().filter(|it| it.is_ignored()).count();
        }
        Ok(stats)
    }
}

impl<'a> IntoIterator for &'a DatasetIndex {
    type Item = &'a DatasetEntry;
    type IntoIter = std::slice::Iter<'a, DatasetEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    Ctw1500,
    Ic13,
    Ic15,
    Ic17,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 4] = [
        DatasetKind::Ctw1500,
        DatasetKind::Ic13,
        DatasetKind::Ic15,
        DatasetKind::Ic17,
    ];

    pub fn key(self) -> &'static str {
        match self {
            DatasetKind::Ctw1500 => "ctw1500",
            DatasetKind::Ic13 => "IC13",
            DatasetKind::Ic15 => "IC15",
            DatasetKind::Ic17 => "IC17",
        }
    }

    pub fn keys() -> Vec<&'static str> {
        Self::ALL.iter().map(|kind| kind.key()).collect()
    }

    pub fn parser(self) -> ParseFn {
        match self {
            DatasetKind::Ctw1500 => parse::parse_ctw1500,
            DatasetKind::Ic13 => parse::parse_ic13,
            DatasetKind::Ic15 => parse::parse_ic15,
            DatasetKind::Ic17 => parse::parse_serialized,
        }
    }

    /// The directory layout the dataset is distributed with, under `root`.
    pub fn layout(self, root: &Path, is_training: bool) -> Layout {
        let dataset_dir = root.join(self.key());
        let (image_dir, annotation_dir, naming) = match self {
            DatasetKind::Ctw1500 => (
                dataset_dir
                    .join(if is_training { "train" } else { "test" })
                    .join("text_image"),
                dataset_dir.join("label"),
                AnnotationName::plain("txt"),
            ),
            DatasetKind::Ic13 | DatasetKind::Ic15 | DatasetKind::Ic17 => {
                let split = if is_training { "Train" } else { "Test" };
                let extension = if self == DatasetKind::Ic17 {
                    "json"
                } else {
                    "txt"
                };
                (
                    dataset_dir.join("Images").join(split),
                    dataset_dir.join("gt").join(split),
                    AnnotationName::prefixed("gt_", extension),
                )
            }
        };
        Layout {
            name: self.key().to_owned(),
            dataset_dir,
            image_dir,
            annotation_dir,
            naming,
            parser: self.parser(),
        }
    }

    pub fn build(self, options: &DatasetOptions) -> Result<DatasetIndex> {
        let mut exclusions = match &options.exclusion_file {
            Some(path) => Exclusions::from_file(path)?,
            None => Exclusions::new(),
        };
        exclusions.extend(options.exclude.iter().cloned());

        let layout = self.layout(&options.root, options.is_training);
        let index = DatasetIndex::scan(&layout, &exclusions)?;
        if options.verbose {
            log::info!("=> {} loaded", self.key());
            log::info!(
                "  images: {} ({}), annotations: {} ({})",
                index.len(),
                layout.image_dir.display(),
                index.len(),
                layout.annotation_dir.display()
            );
        }
        Ok(index)
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for DatasetKind {
    type Err = DatasetError;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.key() == name)
            .ok_or_else(|| DatasetError::UnknownDataset {
                name: name.to_owned(),
                valid: Self::keys(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct DatasetOptions {
    root: PathBuf,
    is_training: bool,
    exclusion_file: Option<PathBuf>,
    exclude: Vec<String>,
    verbose: bool,
}

impl DatasetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn training(mut self, is_training: bool) -> Self {
        self.is_training = is_training;
        self
    }

    pub fn exclusion_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclusion_file = Some(path.into());
        self
    }

    pub fn exclude(mut self, basenames: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude.extend(basenames.into_iter().map(Into::into));
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
            is_training: true,
            exclusion_file: None,
            exclude: Vec::new(),
            verbose: true,
        }
    }
}

/// Builds the index of the dataset registered under `name`.
pub fn create(name: &str, options: &DatasetOptions) -> Result<DatasetIndex> {
    name.parse::<DatasetKind>()?.build(options)
}
