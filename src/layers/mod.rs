pub mod module;
pub mod dense;
pub mod conv;
pub mod batch_norm;
pub mod activation_layer;
pub mod pool;
pub mod dropout;
pub mod residual;
pub mod sequential;

pub use module::{Module, Param};
pub use dense::Linear;
pub use conv::{Conv2d, ConvConfig};
pub use batch_norm::BatchNorm2d;
pub use activation_layer::ActivationLayer;
pub use pool::{GlobalAvgPool, GlobalMaxPool, MaxPool2d};
pub use dropout::Dropout;
pub use residual::{ResidualBlock, Shortcut};
pub use sequential::{Layer, Sequential};
