pub mod optimizer;
pub mod scheduler;
pub mod sgd;

pub use optimizer::Optimizer;
pub use scheduler::{LrScheduler, PolyDecayLr};
pub use sgd::{Sgd, SgdConfig};
