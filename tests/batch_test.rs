use std::fs;
use std::path::Path;
use std::sync::Arc;

use image::{GenericImageView, Rgb, RgbImage};
use serde_json::Value;
use tempfile::TempDir;

use leaf_seg_rs::mocks::MockSegmentationModel;
use leaf_seg_rs::{BatchSummary, DirectoryProcessor, LeafAnalyzer, PreprocessConfig};

fn fast_preprocess() -> PreprocessConfig {
    PreprocessConfig {
        denoise_template_window: 3,
        denoise_search_window: 5,
        ..PreprocessConfig::default()
    }
}

fn write_leaf(path: &Path) {
    RgbImage::from_fn(24, 18, |x, _| {
        if x % 4 == 0 {
            Rgb([150, 110, 60])
        } else {
            Rgb([50, 160, 45])
        }
    })
    .save(path)
    .unwrap();
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_segment_directory() {
    let temp_dir = TempDir::new().unwrap();
    let input_dir = temp_dir.path().join("input");
    let output_dir = temp_dir.path().join("output");
    fs::create_dir_all(input_dir.join("tomato")).unwrap();

    write_leaf(&input_dir.join("tomato/leaf_01.png"));
    RgbImage::from_pixel(10, 10, Rgb([90, 90, 90]))
        .save(input_dir.join("wall.png"))
        .unwrap();
    fs::write(input_dir.join("broken.png"), b"not really a png").unwrap();
    fs::write(input_dir.join("notes.txt"), b"ignored").unwrap();

    let analyzer = LeafAnalyzer::new(Arc::new(MockSegmentationModel::striped()), fast_preprocess());
    let summary = DirectoryProcessor::new(&input_dir, &output_dir)
        .segment(&analyzer, 0.4)
        .unwrap();

    assert_eq!(
        summary,
        BatchSummary {
            processed: 1,
            skipped: 1,
            failed: 1,
        }
    );

    for suffix in [
        "_mask.png",
        "_colored.png",
        "_overlay.png",
        "_diseased.png",
        "_stats.json",
    ] {
        let path = output_dir.join(format!("tomato/leaf_01{suffix}"));
        assert!(path.exists(), "missing {}", path.display());
    }

    let mask = image::open(output_dir.join("tomato/leaf_01_mask.png")).unwrap();
    assert_eq!(mask.dimensions(), (24, 18));

    let stats = read_json(&output_dir.join("tomato/leaf_01_stats.json"));
    assert_eq!(stats["isLeaf"], true);
    assert!(stats["maskStats"]["healthyPercent"].as_f64().unwrap() > 0.0);
    let severity = stats["diseaseSeverity"].as_f64().unwrap();
    assert!((0.0..=100.0).contains(&severity));

    let diseased = image::open(output_dir.join("tomato/leaf_01_diseased.png")).unwrap();
    assert_eq!(diseased.dimensions(), (24, 18));

    let rejected = read_json(&output_dir.join("wall_stats.json"));
    assert_eq!(rejected["isLeaf"], false);
    assert!(rejected.get("diseaseSeverity").is_none());
    assert!(!output_dir.join("wall_mask.png").exists());
    assert!(!output_dir.join("notes_stats.json").exists());
}

#[test]
fn test_skip_leaf_check_segments_everything() {
    let temp_dir = TempDir::new().unwrap();
    let input_dir = temp_dir.path().join("input");
    let output_dir = temp_dir.path().join("output");
    fs::create_dir_all(&input_dir).unwrap();
    RgbImage::from_pixel(10, 10, Rgb([90, 90, 90]))
        .save(input_dir.join("wall.png"))
        .unwrap();

    let analyzer = LeafAnalyzer::new(Arc::new(MockSegmentationModel::striped()), fast_preprocess())
        .skip_leaf_check(true);
    let summary = DirectoryProcessor::new(&input_dir, &output_dir)
        .segment(&analyzer, 0.5)
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert!(output_dir.join("wall_overlay.png").exists());
}

#[test]
fn test_preprocess_directory() {
    let temp_dir = TempDir::new().unwrap();
    let input_dir = temp_dir.path().join("input");
    let output_dir = temp_dir.path().join("preprocessed");
    fs::create_dir_all(input_dir.join("nested")).unwrap();
    write_leaf(&input_dir.join("nested/leaf.jpg"));

    let summary = DirectoryProcessor::new(&input_dir, &output_dir)
        .preprocess(&fast_preprocess(), "png")
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);
    let output = image::open(output_dir.join("nested/leaf_preprocessed.png")).unwrap();
    assert_eq!(output.dimensions(), (24, 18));
}

#[test]
fn test_empty_directory() {
    let temp_dir = TempDir::new().unwrap();
    let summary = DirectoryProcessor::new(temp_dir.path(), temp_dir.path().join("out"))
        .preprocess(&PreprocessConfig::default(), "png")
        .unwrap();
    assert_eq!(summary, BatchSummary::default());
}
