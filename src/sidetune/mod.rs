//! Side-tuning: a frozen pretrained network blended with a trainable one.
//!
//! Every classifier here follows the same shape. A [`FeatureExtractor`]
//! produces base features that never change, a trainable branch produces
//! side features of identical shape, [`fusion::merge`] blends them with a
//! fixed [`Alpha`], and a head maps the blend to class scores.

pub mod classifier;
pub mod extractor;
pub mod finetune;
pub mod fusion;
pub mod image;
pub mod multimodal;
pub mod side;
pub mod text;
pub mod text_cnn;

pub use classifier::{Classifier, SideTuneClassifier};
pub use extractor::FeatureExtractor;
pub use finetune::FineTune;
pub use fusion::{merge, Alpha};
pub use self::image::{FusePoint, ImageSideTune};
pub use multimodal::MultimodalSideTune;
pub use side::{SideNetwork, TunePolicy};
pub use text::{TextBranchConfig, TextConvBranch};
pub use text_cnn::TextCnn;
