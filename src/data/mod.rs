//! Datasets and batching.

pub mod dataset;
pub mod image_folder;
pub mod loader;
pub mod sample;

pub use dataset::{Dataset, InMemoryDataset};
pub use image_folder::{load_image, ImageFolder};
pub use loader::{Batches, DataLoader};
pub use sample::{Input, Sample};
