use ndarray::{Array2, ArrayD, IxDyn};
use opgraph::evaluation::calculate_accuracy;
use opgraph::nn::{Activation, DenseLayer};
use opgraph::ops::SoftmaxCrossEntropyCost;
use opgraph::{AdaptiveSgd, Graph, LabeledSplit, OptimizerKind, TrainingConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Two square clusters on either side of the line x0 + x1 = 0, with one-hot labels.
fn separable_split(examples: usize, seed: u64) -> LabeledSplit {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Array2::zeros((examples, 2));
    let mut labels = Array2::zeros((examples, 2));
    for i in 0..examples {
        let class = i % 2;
        let offset = if class == 0 { 1.0 } else { -1.0 };
        data[[i, 0]] = offset + rng.random_range(-0.8..0.8);
        data[[i, 1]] = offset + rng.random_range(-0.8..0.8);
        labels[[i, class]] = 1.0;
    }
    LabeledSplit::new(data.into_dyn(), labels.into_dyn()).unwrap()
}

fn classifier(batch: usize) -> Graph {
    let mut graph = Graph::new();
    let x = graph.add_feeder(ArrayD::zeros(IxDyn(&[batch, 2]))).unwrap();
    let hidden = DenseLayer::new(8)
        .activation(Activation::Tanh)
        .dropout(0.1)
        .seed(3)
        .build(&mut graph, x)
        .unwrap();
    let logits = DenseLayer::new(2)
        .seed(4)
        .build(&mut graph, hidden.output)
        .unwrap();
    graph
        .add_final(SoftmaxCrossEntropyCost::default(), &[logits.output])
        .unwrap();
    graph
}

fn train(graph: &mut Graph, split: &LabeledSplit, validation: &LabeledSplit, config: TrainingConfig) -> Vec<f64> {
    let initial = graph.unroll_gradient_parameters();
    let mut trainer = AdaptiveSgd::new(config, split)
        .unwrap()
        .with_validation(validation);
    let params = trainer
        .minimize(initial, |p, x, y| graph.cost_and_gradient(p, x, y))
        .unwrap();
    graph.attach_parameters(params.view()).unwrap();
    trainer.cost_history().to_vec()
}

#[test]
fn test_adam_learns_separable_problem() {
    let train_split = separable_split(200, 1);
    let validation = separable_split(60, 2);
    let mut graph = classifier(20);

    let config = TrainingConfig {
        epochs: 30,
        mini_batch_size: 20,
        learning_rate: 0.02,
        seed: Some(7),
        test_frequency: Some(50),
        ..TrainingConfig::default_stable()
    };
    let history = train(&mut graph, &train_split, &validation, config);

    let early: f64 = history[..10].iter().sum::<f64>() / 10.0;
    let late: f64 = history[history.len() - 10..].iter().sum::<f64>() / 10.0;
    assert!(late < early, "cost went from {} to {}", early, late);

    let params_before = graph.unroll_gradient_parameters();
    let accuracy = calculate_accuracy(
        &mut graph,
        validation.data().clone(),
        validation.labels().clone(),
    )
    .unwrap();
    assert!(accuracy > 0.9, "accuracy {}", accuracy);

    // Evaluation leaves parameters and the training flag alone
    assert_eq!(graph.unroll_gradient_parameters(), params_before);
    assert!(graph.is_training());
}

#[test]
fn test_sgd_learns_separable_problem() {
    let train_split = separable_split(200, 3);
    let validation = separable_split(60, 4);
    let mut graph = classifier(25);

    let config = TrainingConfig {
        epochs: 40,
        mini_batch_size: 25,
        learning_rate: 0.1,
        optimizer: OptimizerKind::Sgd,
        seed: Some(8),
        test_frequency: None,
        ..TrainingConfig::default_stable()
    };
    train(&mut graph, &train_split, &validation, config);

    let accuracy = calculate_accuracy(
        &mut graph,
        validation.data().clone(),
        validation.labels().clone(),
    )
    .unwrap();
    assert!(accuracy > 0.9, "accuracy {}", accuracy);
}

#[test]
fn test_trained_graph_survives_save_and_load() {
    let train_split = separable_split(100, 5);
    let test_split = separable_split(40, 6);
    let mut graph = classifier(10);

    let config = TrainingConfig {
        epochs: 10,
        mini_batch_size: 10,
        learning_rate: 0.02,
        seed: Some(9),
        ..TrainingConfig::default_stable()
    };
    train(&mut graph, &train_split, &test_split, config);
    let accuracy = calculate_accuracy(
        &mut graph,
        test_split.data().clone(),
        test_split.labels().clone(),
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("classifier.bin");
    graph.reset_all();
    graph.save(&path).unwrap();

    let mut restored = Graph::load(&path).unwrap();
    assert_eq!(
        restored.unroll_gradient_parameters(),
        graph.unroll_gradient_parameters()
    );
    let restored_accuracy = calculate_accuracy(
        &mut restored,
        test_split.data().clone(),
        test_split.labels().clone(),
    )
    .unwrap();
    assert_eq!(restored_accuracy, accuracy);
}

#[test]
fn test_config_file_drives_training() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("training.json");
    std::fs::write(
        &path,
        r#"{ "epochs": 2, "mini_batch_size": 16, "learning_rate": 0.01, "seed": 1 }"#,
    )
    .unwrap();

    let config = TrainingConfig::from_file(&path).unwrap();
    assert_eq!(config.optimizer, OptimizerKind::Adam);

    let split = separable_split(48, 10);
    let mut graph = classifier(16);
    let history = train(&mut graph, &split, &split, config);
    assert_eq!(history.len(), 2 * 3);
    assert!(history.iter().all(|c| c.is_finite()));
}
