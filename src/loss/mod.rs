pub mod cross_entropy;
pub mod class_weights;

pub use cross_entropy::{CrossEntropyLoss, WeightedCrossEntropy};
pub use class_weights::{class_counts, class_weights};
