pub mod config;
#[cfg(feature = "ml")]
pub mod model_metadata;
#[cfg(feature = "ml")]
pub mod model_storage;

pub use config::{AppConfig, DeviceType, InferenceSettings, OptimizerSetup, ProjectPaths, TrainingSettings};
#[cfg(feature = "ml")]
pub use model_metadata::{ModelManifest, MANIFEST_FORMAT_VERSION};
#[cfg(feature = "ml")]
pub use model_storage::{
    load_model_with_metadata, log_manifest_info, save_model_with_metadata, ArtifactBundle, BundlePaths,
    MODEL_FILE_NAME,
};
