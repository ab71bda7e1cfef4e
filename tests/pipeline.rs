//! 前処理 → 学習 → 評価 → 推論の通しテスト（NdArrayバックエンド）

use burn::module::AutodiffModule;
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use fruit_classifier_lib::dataset::{preprocess_dataset, SplitSettings};
use fruit_classifier_lib::evaluate::TrainingHistory;
use fruit_classifier_lib::experiment::{run_experiment, FileTracker};
use fruit_classifier_lib::ml::{evaluate_held_out, train_model, AugmentationPolicy, Predictor, TrainRequest};
use fruit_classifier_lib::model::config::{OptimizerSetup, ProjectPaths};
use fruit_classifier_lib::model::ArtifactBundle;
use fruit_classifier_lib::ClassifierError;
use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;

type TestBackend = Autodiff<NdArray<f32>>;

/// 115×73 のグラデーション画像
fn test_image() -> RgbImage {
    RgbImage::from_fn(115, 73, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, ((x + y) % 256) as u8]))
}

fn write_raw_corpus(root: &Path) {
    let raw = ProjectPaths::new(root).raw_dir();
    for class in ["A", "B"] {
        fs::create_dir_all(raw.join(class)).unwrap();
        test_image().save(raw.join(class).join("test_image.jpg")).unwrap();
    }
}

fn request() -> TrainRequest {
    let mut request = TrainRequest::new("fruits", "basic");
    request.optimizer = OptimizerSetup {
        initial_learning_rate: 1e-3,
        epochs: 2,
        batch_size: 32,
    };
    request.split = SplitSettings::default();
    request.augmentation = AugmentationPolicy::none();
    request
}

#[test]
fn test_preprocess_then_train_two_epochs() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    write_raw_corpus(dir.path());

    let report = preprocess_dataset(&paths.raw_dir(), &paths.interim_dir("fruits"), 28, 28).unwrap();
    assert_eq!(report.kept(), 2);
    for class in ["A", "B"] {
        let resized = image::open(paths.interim_dir("fruits").join(class).join("test_image.png"))
            .unwrap()
            .to_rgb8();
        assert_eq!(resized.dimensions(), (28, 28));
    }

    let device = NdArrayDevice::Cpu;
    let outcome = train_model::<TestBackend>(&paths, &request(), &device).unwrap();

    assert!(outcome.artifacts.model.is_file());
    assert!(outcome.artifacts.encoder.is_file());
    assert!(outcome.artifacts.model.starts_with(paths.model_dir("basic")));
    assert!(outcome.artifacts.encoder.starts_with(paths.encoder_dir("basic")));
    assert_eq!(outcome.history.len(), 2);
    assert_eq!(outcome.history.loss().len(), 2);
    assert_eq!(outcome.history.accuracy().len(), 2);
    assert!(outcome.history_plot.is_file());

    let from_csv = TrainingHistory::read_csv(&outcome.history_csv).unwrap();
    assert_eq!(from_csv.len(), 2);

    // 分割はキャッシュされる
    for name in ["x_train", "y_train", "x_val", "y_val"] {
        let cached = fs::read_dir(paths.processed_dir("fruits"))
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with(name));
        assert!(cached, "{} is not cached", name);
    }

    let evaluation = evaluate_held_out::<NdArray<f32>>(
        &outcome.model.valid(),
        &outcome.split,
        &outcome.encoder,
        &paths,
        "basic",
        32,
        None,
        &device,
    )
    .unwrap();
    assert!(evaluation.plot_path.ends_with("basic_confusion.png"));
    assert!(evaluation.plot_path.is_file());
    assert!((0.0..=1.0).contains(&evaluation.accuracy));

    // 保存したモデルとエンコーダはペアで読み込める
    let predictor = Predictor::<NdArray<f32>>::load(&paths, "basic", &device).unwrap();
    assert_eq!(predictor.encoder().classes(), ["A".to_string(), "B".to_string()]);
    let predictions = predictor
        .classify(&[image::DynamicImage::ImageRgb8(test_image())])
        .unwrap();
    assert_eq!(predictions.len(), 1);
    assert!(["A", "B"].contains(&predictions[0].label.as_str()));
    let total: f32 = predictions[0].probabilities.iter().sum();
    assert!((total - 1.0).abs() < 1e-4);
}

const EXPERIMENT_FILE: &str = r#"
[preprocessing]
dataset_name = 'fruits'
height = 28
width = 28

[train]
model_type = 'leNet'
model_name = 'basic'
augment = false

[optimizer_setup]
initial_learning_rate = 1e-3
epochs = 2
batch_size = 32
"#;

#[test]
fn test_experiment_records_run() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    write_raw_corpus(dir.path());

    let experiment_file = paths.experiment_files_dir().join("basic.ini");
    fs::create_dir_all(paths.experiment_files_dir()).unwrap();
    fs::write(&experiment_file, EXPERIMENT_FILE).unwrap();

    let mut tracker = FileTracker::new(&paths.runs_dir(), "basic").unwrap();
    let outcome =
        run_experiment::<TestBackend>(&experiment_file, &paths, &mut tracker, &NdArrayDevice::Cpu).unwrap();

    let record = FileTracker::read_run(&tracker.run_file()).unwrap();
    assert_eq!(record.model_name, "basic");
    assert!(record.finished_at.is_some());
    assert_eq!(record.scalars["preprocess_kept"][0].value, 2.0);
    for name in ["loss", "acc"] {
        let points = &record.scalars[name];
        assert_eq!(points.len(), 2, "{}", name);
        assert_eq!(points.iter().map(|p| p.step).collect::<Vec<_>>(), vec![Some(1), Some(2)]);
    }
    assert!(record.scalars.contains_key("cohens_kappa"));
    assert_eq!(record.scalars["accuracy"][0].value, outcome.accuracy());

    assert_eq!(record.artifacts.len(), 5);
    for artifact in &record.artifacts {
        assert!(artifact.is_file(), "{:?} is missing", artifact);
    }
    assert_eq!(record.result, Some(outcome.accuracy()));
}

#[test]
fn test_missing_artifact_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    let err = ArtifactBundle::load(&paths, "nothing").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ClassifierError>(),
        Some(ClassifierError::MissingArtifact(_))
    ));
}
