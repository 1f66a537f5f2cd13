use std::time::Instant;

use tracing::{debug, info, warn};

use crate::data::dataset::Dataset;
use crate::data::loader::DataLoader;
use crate::error::{Result, SideTuneError};
use crate::loss::cross_entropy::WeightedCrossEntropy;
use crate::math::tensor::Tensor;
use crate::metrics::confusion::ConfusionMatrix;
use crate::metrics::epoch_stats::EpochStats;
use crate::metrics::report::PipelineResult;
use crate::optim::optimizer::Optimizer;
use crate::optim::scheduler::LrScheduler;
use crate::sidetune::classifier::Classifier;
use crate::train::train_config::TrainConfig;

/// Drives epochs of weighted cross-entropy training over one classifier.
///
/// The scheduler owns the learning rate: the optimizer is set to
/// `scheduler.get_lr()` before the first epoch and after every scheduler step.
pub struct TrainingPipeline<'m, C: Classifier + ?Sized, O: Optimizer, S: LrScheduler> {
    model: &'m mut C,
    loss: WeightedCrossEntropy,
    optimizer: O,
    scheduler: S,
    config: TrainConfig,
}

impl<'m, C: Classifier + ?Sized, O: Optimizer, S: LrScheduler> TrainingPipeline<'m, C, O, S> {
    pub fn new(
        model: &'m mut C,
        loss: WeightedCrossEntropy,
        optimizer: O,
        scheduler: S,
        config: TrainConfig,
    ) -> Result<Self> {
        config.validate()?;
        if model.num_classes() != config.num_classes || loss.num_classes() != config.num_classes {
            return Err(SideTuneError::shape(
                "class count of model / loss",
                &[config.num_classes, config.num_classes],
                &[model.num_classes(), loss.num_classes()],
            ));
        }
        Ok(TrainingPipeline { model, loss, optimizer, scheduler, config })
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Trains for `num_epochs`, restores the best validation snapshot and
    /// evaluates it on `test`.
    pub fn run<D: Dataset + ?Sized>(
        &mut self,
        train: &mut DataLoader<'_, D>,
        val: &mut DataLoader<'_, D>,
        test: &mut DataLoader<'_, D>,
    ) -> Result<PipelineResult> {
        if train.dataset().is_empty() {
            return Err(SideTuneError::EmptyDataset("training split".into()));
        }
        if test.is_shuffled() {
            warn!("test loader is shuffled; expected a sequential pass");
        }

        info!(
            model = self.model.name(),
            trainable_params = self.model.trainable_param_count(),
            frozen_params = self.model.frozen_params().iter().map(|p| p.numel()).sum::<usize>(),
            epochs = self.config.num_epochs,
            "starting training"
        );

        self.model.zero_grad();
        self.optimizer.set_learning_rate(self.scheduler.get_lr());

        let mut best_accuracy = f64::NEG_INFINITY;
        let mut best_epoch = 0;
        let mut best_snapshot: Option<Vec<Tensor>> = None;
        let mut history = Vec::with_capacity(self.config.num_epochs);

        for epoch in 1..=self.config.num_epochs {
            let t_start = Instant::now();
            let learning_rate = self.optimizer.learning_rate();

            // ── Training phase ────────────────────────────────────────────
            let train_loss = self.train_epoch(train, epoch)?;

            // ── Scheduler step ────────────────────────────────────────────
            self.scheduler.step();
            self.optimizer.set_learning_rate(self.scheduler.get_lr());

            // ── Validation ────────────────────────────────────────────────
            let confusion = evaluate(&*self.model, val)?;
            let val_accuracy = confusion.accuracy();

            // ── Best-model tracking ───────────────────────────────────────
            let is_best = val_accuracy > best_accuracy;
            if is_best {
                best_accuracy = val_accuracy;
                best_epoch = epoch;
                best_snapshot = Some(self.model.snapshot());
            }

            let stats = EpochStats {
                epoch,
                total_epochs: self.config.num_epochs,
                train_loss,
                val_accuracy,
                learning_rate,
                is_best,
                elapsed_ms: t_start.elapsed().as_millis() as u64,
            };
            info!(
                epoch,
                train_loss,
                val_accuracy,
                learning_rate,
                best = is_best,
                "epoch complete"
            );
            if let Some(tx) = &self.config.progress_tx {
                // A dropped receiver only means nobody is listening.
                let _ = tx.send(stats.clone());
            }
            history.push(stats);
        }

        if let Some(snapshot) = &best_snapshot {
            self.model.restore(snapshot)?;
        }

        let confusion = evaluate(&*self.model, test)?;
        let test_accuracy = confusion.accuracy();
        let distribution = confusion.predicted_distribution();
        info!(
            best_epoch,
            best_val_accuracy = best_accuracy,
            test_accuracy,
            distribution = ?distribution,
            "training finished"
        );

        Ok(PipelineResult {
            best_val_accuracy: best_accuracy,
            best_epoch,
            test_accuracy,
            confusion,
            distribution,
            history,
        })
    }

    /// One pass over `train`; returns the mean batch loss.
    fn train_epoch<D: Dataset + ?Sized>(&mut self, train: &mut DataLoader<'_, D>, epoch: usize) -> Result<f64> {
        let mut running = 0.0;
        let mut batches = 0usize;
        for (index, batch) in train.batches().enumerate() {
            let batch = batch?;
            if batch.is_empty() {
                continue;
            }
            let labels: Vec<usize> = batch.iter().map(|s| s.label).collect();
            let batch_weight = self.loss.batch_weight(&labels)?;

            // Each sample's backward must follow its own forward.
            let mut batch_loss = 0.0;
            for sample in &batch {
                let logits = self.model.forward(&sample.input)?;
                batch_loss += self.loss.sample_loss(&logits, sample.label, batch_weight)?;
                let grad = self.loss.sample_gradient(&logits, sample.label, batch_weight)?;
                self.model.backward(&grad)?;
            }

            let mut params = self.model.trainable_params_mut();
            self.optimizer.step(&mut params);
            self.optimizer.zero_grad(&mut params);

            debug!(epoch, batch = index, loss = batch_loss, "batch");
            running += batch_loss;
            batches += 1;
        }
        Ok(if batches == 0 { 0.0 } else { running / batches as f64 })
    }
}

/// Arg-max predictions of `model` over one pass of `loader`, tabulated
/// against the true labels. Uses the evaluation path only.
pub fn evaluate<C: Classifier + ?Sized, D: Dataset + ?Sized>(
    model: &C,
    loader: &mut DataLoader<'_, D>,
) -> Result<ConfusionMatrix> {
    let mut confusion = ConfusionMatrix::new(model.num_classes());
    for batch in loader.batches() {
        for sample in batch? {
            let logits = model.predict(&sample.input)?;
            confusion.record(sample.label, logits.argmax())?;
        }
    }
    Ok(confusion)
}
