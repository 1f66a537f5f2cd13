use crate::layers::Param;

/// Updates parameters in place from their accumulated gradients.
pub trait Optimizer {
    /// Applies one update. Parameters must be passed in the same order on
    /// every call since per-parameter state is kept by position.
    fn step(&mut self, params: &mut [&mut Param]);

    fn zero_grad(&mut self, params: &mut [&mut Param]) {
        for param in params.iter_mut() {
            param.zero_grad();
        }
    }

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);

    /// Short identifier used in run reports, e.g. `sgd`.
    fn name(&self) -> &str;
}
