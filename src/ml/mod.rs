pub mod augmentation;
pub mod factory;
pub mod inference;
pub mod ml_model;
pub mod training;

pub use augmentation::AugmentationPolicy;
pub use factory::{lenet_config, parse_setup, ModelFactory, ModelKind, ModelSetup, Strictness};
pub use inference::{predict_probabilities, Annotator, InferenceEngine, Prediction, Predictor};
pub use ml_model::{LeNet, LeNetConfig};
pub use training::{
    decayed_learning_rate, evaluate_held_out, fit, steps_per_epoch, train_model, weights_to_bytes, FitOptions,
    FruitBatch, FruitBatcher, FruitItem, SplitDataset, TrainOutcome, TrainRequest,
};
