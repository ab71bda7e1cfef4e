pub mod corpus;
pub mod encoder;
pub mod partition;
pub mod preprocess;

pub use corpus::{load_corpus, Corpus, ImageRecord, LoaderOptions, PixelArray, UnreadablePolicy};
pub use encoder::{LabelEncoder, ENCODER_FILE_NAME};
pub use partition::{load_or_partition, DatasetSplit, PartitionCache, Partitioner, SplitIndices, SplitSettings};
pub use preprocess::{preprocess_dataset, preprocess_image, PreprocessReport};
