use std::sync::mpsc;

use approx::assert_abs_diff_eq;
use ferrite_sidetune::data::{DataLoader, Dataset, InMemoryDataset, Input, Sample};
use ferrite_sidetune::experiment::{synthetic_dataset, ExperimentSpec};
use ferrite_sidetune::layers::Param;
use ferrite_sidetune::loss::{class_counts, WeightedCrossEntropy};
use ferrite_sidetune::optim::{LrScheduler, PolyDecayLr, Sgd};
use ferrite_sidetune::sidetune::{Alpha, Classifier, ImageSideTune, SideTuneClassifier, TunePolicy};
use ferrite_sidetune::train::{evaluate, TrainConfig, TrainingPipeline};
use ferrite_sidetune::{MobileNetV2Config, Result, SideTuneError, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Scores `[-s * x, s * x]` for a scalar text input `x`: any positive scale
/// separates negative from positive inputs.
struct SignClassifier {
    scale: Param,
    cached: Option<f64>,
}

impl SignClassifier {
    fn new() -> SignClassifier {
        SignClassifier { scale: Param::new(Tensor::vector(&[1.0])), cached: None }
    }

    fn value(input: &Input) -> Result<f64> {
        Ok(input.expect_text()?.data()[0])
    }
}

impl Classifier for SignClassifier {
    fn name(&self) -> &str {
        "sign"
    }

    fn num_classes(&self) -> usize {
        2
    }

    fn predict(&self, input: &Input) -> Result<Tensor> {
        let x = Self::value(input)?;
        let s = self.scale.value.data()[0];
        Ok(Tensor::vector(&[-s * x, s * x]))
    }

    fn forward(&mut self, input: &Input) -> Result<Tensor> {
        self.cached = Some(Self::value(input)?);
        self.predict(input)
    }

    fn backward(&mut self, grad_logits: &Tensor) -> Result<()> {
        let x = self.cached.take().unwrap_or(0.0);
        let g = grad_logits.data();
        self.scale.grad_mut()[0] += x * (g[1] - g[0]);
        Ok(())
    }

    fn trainable_params(&self) -> Vec<&Param> {
        vec![&self.scale]
    }

    fn trainable_params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.scale]
    }

    fn frozen_params(&self) -> Vec<&Param> {
        Vec::new()
    }
}

/// Same scoring as `SignClassifier`, but every sample pushes the scale down
/// by a fixed gradient, so the sign flips after enough steps.
struct DriftingClassifier {
    inner: SignClassifier,
    push: f64,
}

impl Classifier for DriftingClassifier {
    fn name(&self) -> &str {
        "drifting"
    }

    fn num_classes(&self) -> usize {
        2
    }

    fn predict(&self, input: &Input) -> Result<Tensor> {
        self.inner.predict(input)
    }

    fn forward(&mut self, input: &Input) -> Result<Tensor> {
        self.inner.forward(input)
    }

    fn backward(&mut self, _grad_logits: &Tensor) -> Result<()> {
        self.inner.cached = None;
        self.inner.scale.grad_mut()[0] += self.push;
        Ok(())
    }

    fn trainable_params(&self) -> Vec<&Param> {
        self.inner.trainable_params()
    }

    fn trainable_params_mut(&mut self) -> Vec<&mut Param> {
        self.inner.trainable_params_mut()
    }

    fn frozen_params(&self) -> Vec<&Param> {
        Vec::new()
    }
}

fn toy_dataset() -> InMemoryDataset {
    let samples = [(-1.0, 0), (-0.5, 0), (0.5, 1), (1.0, 1)]
        .iter()
        .map(|&(x, y)| Sample::new(Input::Text(Tensor::vector(&[x])), y))
        .collect();
    InMemoryDataset::new(vec!["negative".into(), "positive".into()], samples).unwrap()
}

#[test]
fn separable_toy_task_reaches_perfect_test_accuracy() {
    let ds = toy_dataset();
    let mut model = SignClassifier::new();
    let mut train = DataLoader::shuffled(&ds, 2, 42).unwrap();
    let mut val = DataLoader::new(&ds, 2).unwrap();
    let mut test = DataLoader::new(&ds, 2).unwrap();

    let result = TrainingPipeline::new(
        &mut model,
        WeightedCrossEntropy::uniform(2).unwrap(),
        Sgd::with_momentum(0.1, 0.9, 0.0).unwrap(),
        PolyDecayLr::new(0.1, 3).unwrap(),
        TrainConfig::new(3, 2),
    )
    .unwrap()
    .run(&mut train, &mut val, &mut test)
    .unwrap();

    assert_eq!(result.test_accuracy, 1.0);
    assert_eq!(result.confusion.matrix(), &[vec![2, 0], vec![0, 2]]);
    assert_eq!(result.distribution, vec![2, 2]);
    assert_eq!(result.history.len(), 3);
    assert!(model.scale.value.data()[0] > 1.0);
}

#[test]
fn best_accuracy_is_the_running_maximum() {
    let spec = ExperimentSpec { epochs: 3, ..ExperimentSpec::toy() };
    let mut rng = StdRng::seed_from_u64(7);
    let train = synthetic_dataset(&spec, 4, &mut rng).unwrap();
    let val = synthetic_dataset(&spec, 3, &mut rng).unwrap();
    let test = synthetic_dataset(&spec, 3, &mut rng).unwrap();

    let mut model = spec.build_model().unwrap();
    let (tx, rx) = mpsc::channel();
    let result = TrainingPipeline::new(
        &mut model,
        WeightedCrossEntropy::uniform(2).unwrap(),
        Sgd::with_momentum(0.05, 0.9, 0.0).unwrap(),
        PolyDecayLr::new(0.05, 3).unwrap(),
        TrainConfig::new(3, 2).with_progress(tx),
    )
    .unwrap()
    .run(
        &mut DataLoader::shuffled(&train, 4, 1).unwrap(),
        &mut DataLoader::new(&val, 4).unwrap(),
        &mut DataLoader::new(&test, 4).unwrap(),
    )
    .unwrap();

    let received: Vec<_> = rx.try_iter().collect();
    assert_eq!(received, result.history);

    let mut running = f64::NEG_INFINITY;
    for stats in &result.history {
        assert_eq!(stats.is_best, stats.val_accuracy > running);
        running = running.max(stats.val_accuracy);
    }
    assert_eq!(result.best_val_accuracy, running);
    assert_eq!(result.history[result.best_epoch - 1].val_accuracy, running);
    assert!(result.history[result.best_epoch - 1].is_best);
    assert_eq!(result.history[0].learning_rate, 0.05);
    assert_eq!(result.confusion.row_sums(), class_counts(&test.targets(), 2).unwrap());
}

#[test]
fn dropped_progress_receiver_does_not_stop_training() {
    let ds = toy_dataset();
    let mut model = SignClassifier::new();
    let (tx, rx) = mpsc::channel();
    drop(rx);
    let result = TrainingPipeline::new(
        &mut model,
        WeightedCrossEntropy::uniform(2).unwrap(),
        Sgd::new(0.1),
        PolyDecayLr::new(0.1, 4).unwrap(),
        TrainConfig::new(4, 2).with_progress(tx),
    )
    .unwrap()
    .run(
        &mut DataLoader::new(&ds, 4).unwrap(),
        &mut DataLoader::new(&ds, 4).unwrap(),
        &mut DataLoader::new(&ds, 4).unwrap(),
    )
    .unwrap();
    assert_eq!(result.history.len(), 4);
}

#[test]
fn frozen_branch_is_bit_identical_after_training() {
    let spec = ExperimentSpec::toy();
    let mut rng = StdRng::seed_from_u64(11);
    let data = synthetic_dataset(&spec, 4, &mut rng).unwrap();

    let backbone = MobileNetV2Config::tiny().build(&mut rng).unwrap();
    let mut model = ImageSideTune::new(backbone, 2, Alpha::HALF, TunePolicy::Full, &mut rng).unwrap();
    let frozen_before: Vec<Tensor> = model.frozen_params().iter().map(|p| p.value.clone()).collect();
    let trainable_before = model.snapshot();

    TrainingPipeline::new(
        &mut model,
        WeightedCrossEntropy::uniform(2).unwrap(),
        Sgd::with_momentum(0.05, 0.9, 0.0).unwrap(),
        PolyDecayLr::new(0.05, 2).unwrap(),
        TrainConfig::new(2, 2),
    )
    .unwrap()
    .run(
        &mut DataLoader::shuffled(&data, 4, 3).unwrap(),
        &mut DataLoader::new(&data, 4).unwrap(),
        &mut DataLoader::new(&data, 4).unwrap(),
    )
    .unwrap();

    let frozen_after: Vec<Tensor> = model.frozen_params().iter().map(|p| p.value.clone()).collect();
    assert_eq!(frozen_before, frozen_after);
    assert_ne!(trainable_before, model.snapshot());
}

#[test]
fn confusion_rows_count_each_class() {
    let spec = ExperimentSpec::toy();
    let mut rng = StdRng::seed_from_u64(5);
    let data = synthetic_dataset(&spec, 5, &mut rng).unwrap();
    let model = spec.build_model().unwrap();
    let confusion = evaluate(&model, &mut DataLoader::shuffled(&data, 3, 9).unwrap()).unwrap();
    assert_eq!(confusion.row_sums(), vec![5, 5]);
    assert_eq!(confusion.total(), data.len());
}

#[test]
fn schedule_starts_at_base_and_reaches_zero() {
    let mut sched = PolyDecayLr::new(0.1, 15).unwrap();
    assert_eq!(sched.get_lr(), 0.1);
    for _ in 0..15 {
        sched.step();
    }
    assert_eq!(sched.get_lr(), 0.0);
}

#[test]
fn saved_classifier_predicts_the_same() {
    let spec = ExperimentSpec::toy();
    let model = spec.build_model().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    let path = path.to_str().unwrap();
    model.save_json(path).unwrap();
    let loaded = SideTuneClassifier::load_json(path).unwrap();

    assert_eq!(loaded.name(), model.name());
    assert_eq!(loaded.trainable_param_count(), model.trainable_param_count());
    let x = Input::Image(Tensor::uniform(&[3, 16, 16], 1.0, &mut StdRng::seed_from_u64(2)));
    let a = model.predict(&x).unwrap();
    let b = loaded.predict(&x).unwrap();
    for (p, q) in a.data().iter().zip(b.data()) {
        assert_abs_diff_eq!(*p, *q, epsilon = 1e-9);
    }
}

#[test]
fn best_epoch_parameters_are_restored_before_testing() {
    let ds = toy_dataset();
    let mut model = DriftingClassifier { inner: SignClassifier::new(), push: 1.0 };

    // One batch of four samples per epoch: the scale goes 1.0 -> 0.2 after
    // epoch 1 (lr 0.2) and 0.2 -> 0.2 - 4 * 0.2 * sqrt(0.5) < 0 after epoch 2.
    let result = TrainingPipeline::new(
        &mut model,
        WeightedCrossEntropy::uniform(2).unwrap(),
        Sgd::new(0.2),
        PolyDecayLr::new(0.2, 2).unwrap(),
        TrainConfig::new(2, 2),
    )
    .unwrap()
    .run(
        &mut DataLoader::new(&ds, 4).unwrap(),
        &mut DataLoader::new(&ds, 4).unwrap(),
        &mut DataLoader::new(&ds, 4).unwrap(),
    )
    .unwrap();

    assert_eq!(result.history[0].val_accuracy, 1.0);
    assert_eq!(result.history[1].val_accuracy, 0.0);
    assert_eq!(result.best_epoch, 1);
    assert_eq!(result.best_val_accuracy, 1.0);
    assert_eq!(result.test_accuracy, 1.0);

    let restored = model.snapshot();
    assert_eq!(restored.len(), 1);
    assert_abs_diff_eq!(restored[0].data()[0], 0.2, epsilon = 1e-12);
}

#[test]
fn malformed_training_sample_aborts_the_run() {
    let mut samples = toy_dataset().samples().to_vec();
    samples.push(Sample::new(Input::Image(Tensor::zeros(&[3, 2, 2])), 1));
    let ds = InMemoryDataset::new(vec!["negative".into(), "positive".into()], samples).unwrap();
    let clean = toy_dataset();
    let mut model = SignClassifier::new();

    let err = TrainingPipeline::new(
        &mut model,
        WeightedCrossEntropy::uniform(2).unwrap(),
        Sgd::new(0.1),
        PolyDecayLr::new(0.1, 2).unwrap(),
        TrainConfig::new(2, 2),
    )
    .unwrap()
    .run(
        &mut DataLoader::new(&ds, 5).unwrap(),
        &mut DataLoader::new(&clean, 4).unwrap(),
        &mut DataLoader::new(&clean, 4).unwrap(),
    )
    .unwrap_err();

    assert!(matches!(err, SideTuneError::InputKind { expected: "text", .. }));
}

#[test]
fn class_count_disagreement_is_rejected_at_construction() {
    let mut model = SignClassifier::new();
    let wrong_loss = TrainingPipeline::new(
        &mut model,
        WeightedCrossEntropy::uniform(3).unwrap(),
        Sgd::new(0.1),
        PolyDecayLr::new(0.1, 2).unwrap(),
        TrainConfig::new(2, 2),
    );
    assert!(matches!(wrong_loss, Err(SideTuneError::ShapeMismatch { .. })));

    let mut model = SignClassifier::new();
    let wrong_config = TrainingPipeline::new(
        &mut model,
        WeightedCrossEntropy::uniform(2).unwrap(),
        Sgd::new(0.1),
        PolyDecayLr::new(0.1, 2).unwrap(),
        TrainConfig::new(2, 3),
    );
    assert!(matches!(wrong_config, Err(SideTuneError::ShapeMismatch { .. })));
}

#[test]
fn empty_training_split_is_rejected() {
    let empty = InMemoryDataset::new(vec!["negative".into(), "positive".into()], Vec::new()).unwrap();
    let ds = toy_dataset();
    let mut model = SignClassifier::new();

    let err = TrainingPipeline::new(
        &mut model,
        WeightedCrossEntropy::uniform(2).unwrap(),
        Sgd::new(0.1),
        PolyDecayLr::new(0.1, 2).unwrap(),
        TrainConfig::new(2, 2),
    )
    .unwrap()
    .run(
        &mut DataLoader::new(&empty, 2).unwrap(),
        &mut DataLoader::new(&ds, 2).unwrap(),
        &mut DataLoader::new(&ds, 2).unwrap(),
    )
    .unwrap_err();

    assert!(matches!(err, SideTuneError::EmptyDataset(_)));
}
