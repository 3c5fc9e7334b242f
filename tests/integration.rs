use std::{
    fs,
    path::{Path, PathBuf},
};

use geo::coord;
use image::RgbImage;
use tempfile::TempDir;
use textdet::{
    create,
    parse::{parse_ic13, write_serialized},
    AnnotationName, DatasetError, DatasetIndex, DatasetKind, DatasetOptions, Exclusions, Layout,
    Orientation, PolygonRecord,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn write_image(path: &Path, width: u32, height: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::new(width, height).save(path).unwrap();
}

fn options(root: &Path) -> DatasetOptions {
    DatasetOptions::new().root(root).verbose(false)
}

/// Two training images per dataset, with well-formed annotations.
fn fixture() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    let data = root.path();

    for stem in ["1001", "1002"] {
        write_image(
            &data.join(format!("ctw1500/train/text_image/{stem}.jpg")),
            64,
            64,
        );
        write(
            &data.join(format!("ctw1500/label/{stem}.txt")),
            "2\n1,1,20,1,40,5,40,20,20,25,1,20,\"curved, text\"\n2,2,8,2,8,8,2,8,\"###\"\n",
        );
    }

    for stem in ["img_1", "img_2"] {
        write_image(&data.join(format!("IC13/Images/Train/{stem}.jpg")), 64, 64);
        write(
            &data.join(format!("IC13/gt/Train/gt_{stem}.txt")),
            "10 20 50 40 hello\n1 1 9 9 ###\n",
        );

        write_image(&data.join(format!("IC15/Images/Train/{stem}.jpg")), 64, 64);
        write(
            &data.join(format!("IC15/gt/Train/gt_{stem}.txt")),
            "\u{feff}1,1,30,1,30,20,1,20,Hello,world\n2,2,9,2,9,9,2,9,###\n",
        );

        write_image(&data.join(format!("IC17/Images/Train/{stem}.jpg")), 64, 64);
        let annotation = data.join(format!("IC17/gt/Train/gt_{stem}.json"));
        fs::create_dir_all(annotation.parent().unwrap()).unwrap();
        write_serialized(
            &annotation,
            &[
                PolygonRecord::new(
                    vec![
                        coord! { x: 1, y: 1 },
                        coord! { x: 30, y: 1 },
                        coord! { x: 30, y: 20 },
                        coord! { x: 1, y: 20 },
                    ],
                    Orientation::Horizontal,
                    "mlt",
                ),
                PolygonRecord::new(
                    vec![
                        coord! { x: 2, y: 2 },
                        coord! { x: 9, y: 2 },
                        coord! { x: 9, y: 9 },
                        coord! { x: 2, y: 9 },
                    ],
                    Orientation::Horizontal,
                    "###",
                ),
            ],
        )
        .unwrap();
    }
    root
}

fn file_stem(path: &Path) -> String {
    path.file_stem().unwrap().to_string_lossy().into_owned()
}

#[test]
fn every_dataset_builds_and_parses() {
    init_logging();
    let root = fixture();

    for kind in DatasetKind::ALL {
        let index = create(kind.key(), &options(root.path())).unwrap();
        assert_eq!(index.name(), kind.key());
        assert_eq!(index.len(), 2, "{kind}");

        for entry in &index {
            assert!(entry.annotation_path().exists(), "{kind}: {entry:?}");
            let records = entry.parse().unwrap();
            assert_eq!(records.len(), 2, "{kind}");
            assert!(!records[0].is_ignored());
            assert_eq!(records[1].orientation(), Orientation::Ignore);
        }

        let stats = index.statistics().unwrap();
        assert_eq!(stats.images, 2);
        assert_eq!(stats.instances, 4);
        assert_eq!(stats.ignored, 2);
    }
}

#[test]
fn entries_pair_images_with_annotations_by_basename() {
    init_logging();
    let root = fixture();
    let index = create("IC15", &options(root.path())).unwrap();

    let pairs = index
        .iter()
        .map(|entry| {
            (
                file_stem(entry.image_path()),
                file_stem(entry.annotation_path()),
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(
        pairs,
        vec![
            ("img_1".to_owned(), "gt_img_1".to_owned()),
            ("img_2".to_owned(), "gt_img_2".to_owned()),
        ]
    );
    let records = index.get(0).unwrap().parse().unwrap();
    assert_eq!(records[0].transcription(), "Hello,world");
}

#[test]
fn excluded_basenames_never_appear() {
    init_logging();
    let root = fixture();
    let exclusion_file = root.path().join("ignore.txt");
    fs::write(&exclusion_file, "  1001  \n\n").unwrap();

    let index = create(
        "ctw1500",
        &options(root.path()).exclusion_file(&exclusion_file),
    )
    .unwrap();
    assert_eq!(index.len(), 1);
    assert!(index
        .iter()
        .all(|entry| file_stem(entry.image_path()) != "1001"));

    let index = create(
        "IC13",
        &options(root.path()).exclude(["img_1", "img_2"]),
    )
    .unwrap();
    assert!(index.is_empty());
}

#[test]
fn missing_directories_fail_construction() {
    init_logging();
    let root = tempfile::tempdir().unwrap();
    match create("IC15", &options(root.path())) {
        Err(DatasetError::MissingResource { path }) => {
            assert_eq!(path, root.path().join("IC15"));
        }
        other => panic!("unexpected result {other:?}"),
    }

    fs::create_dir_all(root.path().join("IC15/Images/Train")).unwrap();
    match create("IC15", &options(root.path())) {
        Err(DatasetError::MissingResource { path }) => {
            assert_eq!(path, root.path().join("IC15/gt/Train"));
        }
        other => panic!("unexpected result {other:?}"),
    }

    let fixture = fixture();
    let err = create("IC13", &options(fixture.path()).training(false)).unwrap_err();
    assert!(err.to_string().contains("is not available"), "{err}");
}

#[test]
fn unknown_dataset_lists_every_key() {
    init_logging();
    let root = fixture();
    for name in ["total-text", "", "ic15", "synth-text-2"] {
        let err = create(name, &options(root.path())).unwrap_err();
        let message = err.to_string();
        for key in DatasetKind::keys() {
            assert!(message.contains(key), "{message}");
        }
        assert!(matches!(err, DatasetError::UnknownDataset { .. }));
    }
}

#[test]
fn malformed_annotation_only_fails_its_entry() {
    init_logging();
    let root = fixture();
    write(
        &root.path().join("IC13/gt/Train/gt_img_2.txt"),
        "10 20 50 hello\n",
    );
    fs::remove_file(root.path().join("IC13/gt/Train/gt_img_1.txt")).unwrap();
    write_image(&root.path().join("IC13/Images/Train/img_3.jpg"), 8, 8);
    write(
        &root.path().join("IC13/gt/Train/gt_img_3.txt"),
        "0 0 4 4 ok\n",
    );

    let index = create("IC13", &options(root.path())).unwrap();
    assert_eq!(index.len(), 3);

    assert!(matches!(
        index.get(0).unwrap().parse(),
        Err(DatasetError::Io { .. })
    ));
    match index.get(1).unwrap().parse() {
        Err(DatasetError::MalformedAnnotation { line, content, .. }) => {
            assert_eq!(line, 1);
            assert_eq!(content, "10 20 50 hello");
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(index.get(2).unwrap().parse().unwrap().len(), 1);
    assert!(index.statistics().is_err());
}

#[test]
fn only_image_files_are_indexed() {
    init_logging();
    let root = fixture();
    let image_dir = root.path().join("IC13/Images/Train");
    write(&image_dir.join("notes.txt"), "not an image");
    fs::create_dir_all(image_dir.join("nested.jpg")).unwrap();
    write_image(&image_dir.join("img_0.png"), 8, 8);

    let index = create("IC13", &options(root.path())).unwrap();
    let stems = index
        .iter()
        .map(|entry| file_stem(entry.image_path()))
        .collect::<Vec<_>>();
    assert_eq!(stems, vec!["img_0", "img_1", "img_2"]);
}

#[test]
fn bounds_are_checked_against_the_image() {
    init_logging();
    let root = fixture();
    write(
        &root.path().join("IC13/gt/Train/gt_img_1.txt"),
        "10 20 50 40 inside\n10 20 64 40 outside\n",
    );
    let index = create("IC13", &options(root.path())).unwrap();
    assert_eq!(index.get(0).unwrap().check_bounds().unwrap(), vec![1]);
    assert!(index.get(1).unwrap().check_bounds().unwrap().is_empty());
    assert_eq!(index.get(0).unwrap().load_image().unwrap().width(), 64);
}

#[test]
fn custom_layouts_use_their_own_parser() {
    init_logging();
    let root = tempfile::tempdir().unwrap();
    let dataset_dir: PathBuf = root.path().join("mine");
    write_image(&dataset_dir.join("images/a.jpg"), 16, 16);
    write(&dataset_dir.join("labels/a.gt"), "0 0 8 8 word\n");

    let layout = Layout::custom(
        "mine",
        &dataset_dir,
        dataset_dir.join("images"),
        dataset_dir.join("labels"),
        AnnotationName::plain("gt"),
        parse_ic13,
    );
    let index = DatasetIndex::scan(&layout, &Exclusions::new()).unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(
        index.get(0).unwrap().annotation_path(),
        dataset_dir.join("labels/a.gt")
    );
    let records = index.get(0).unwrap().parse().unwrap();
    assert_eq!(records[0].transcription(), "word");
}

#[test]
fn index_can_be_shared_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<DatasetIndex>();

    init_logging();
    let root = fixture();
    let index = create("IC15", &options(root.path())).unwrap();
    let counts = std::thread::scope(|scope| {
        let handles = index
            .entries()
            .chunks(1)
            .map(|shard| {
                scope.spawn(move || {
                    shard
                        .iter()
                        .map(|entry| entry.parse().unwrap().len())
                        .sum::<usize>()
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });
    assert_eq!(counts, vec![2, 2]);
}

#[cfg(unix)]
#[test]
fn non_utf8_image_names_stay_in_the_index() {
    use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

    init_logging();
    let root = fixture();
    let image_dir = root.path().join("IC13/Images/Train");
    let name = OsStr::from_bytes(b"caf\xe9.jpg");
    fs::write(image_dir.join(name), b"").unwrap();

    let index = create("IC13", &options(root.path())).unwrap();
    assert_eq!(index.len(), 3);
    let entry = index
        .iter()
        .find(|entry| entry.image_path().file_name() == Some(name))
        .unwrap();
    assert_eq!(
        entry.annotation_path(),
        root.path().join("IC13/gt/Train/gt_caf\u{fffd}.txt")
    );
}
