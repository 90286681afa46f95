use candle_core::Device;
use image::{GrayImage, Luma};
use yomu_core::{
    load_samples, max_label_len, split_data, Dataset, ModelConfig, Reader, SampleEncoder,
    Vocabulary,
};
use yomu_trainer::{run_training, Trainer, TrainingConfig};

fn tiny_config(epochs: usize) -> TrainingConfig {
    TrainingConfig {
        train_fraction: 0.75,
        batch_size: 4,
        epochs,
        learning_rate: 1e-2,
        patience: 2,
        seed: 3,
        model: ModelConfig {
            image_width: 32,
            image_height: 8,
            conv1_filters: 2,
            conv2_filters: 4,
            dense_units: 8,
            lstm1_units: 6,
            lstm2_units: 4,
            dropout: 0.1,
            lstm_dropout: 0.1,
        },
        ..TrainingConfig::default()
    }
}

/// Draw each label as vertical bars, one bar width per character code.
fn write_captchas(dir: &std::path::Path) {
    let labels = ["abc", "bca", "cab", "acb", "bac", "cba", "aba", "cbc"];
    for label in labels {
        let img = GrayImage::from_fn(64, 16, |x, _| {
            let slot = (x / 16) as usize;
            let v = label
                .chars()
                .nth(slot)
                .map(|c| (c as u8 - b'a' + 1) * 80)
                .unwrap_or(0);
            Luma([v])
        });
        img.save(dir.join(format!("{label}.png"))).unwrap();
    }
}

#[test]
fn training_run_writes_loadable_model() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_captchas(data.path());

    let run = run_training(tiny_config(3), data.path(), out.path(), Device::Cpu).unwrap();

    assert!(!run.history.epochs.is_empty());
    assert!(run.history.epochs.len() <= 3);
    assert!(run.history.best_epoch.is_some());
    assert!(run.history.epochs.iter().all(|e| e.loss.is_finite() && e.val_loss.is_finite()));
    assert_eq!(run.report.predictions.len(), 2);

    for file in [
        "model.safetensors",
        "vocab.json",
        "model.json",
        "config.json",
        "history.json",
        "predictions.json",
    ] {
        assert!(out.path().join(file).exists(), "{file} missing");
    }

    let reader = Reader::load(out.path(), Device::Cpu).unwrap();
    assert_eq!(reader.vocab().characters(), &['a', 'b', 'c']);
    let pred = reader.read_file(data.path().join("abc.png")).unwrap();
    assert!(pred.text.chars().count() <= 3);
    assert!((0.0..=1.0).contains(&pred.confidence));
}

#[test]
fn early_stop_restores_best_checkpoint() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_captchas(data.path());

    // Only the first epoch can count as an improvement, so the second stops.
    let config = TrainingConfig {
        patience: 1,
        min_delta: 1e6,
        ..tiny_config(5)
    };
    let samples = load_samples(data.path()).unwrap();
    let vocab = Vocabulary::from_labels(samples.iter().map(|s| &s.label));
    let (train, valid) = split_data(&samples, config.train_fraction, true, config.seed).unwrap();
    let encoder = SampleEncoder::new(
        config.model.image_width as u32,
        config.model.image_height as u32,
    );
    let train = Dataset::encode(&train, &encoder, &vocab).unwrap();
    let valid = Dataset::encode(&valid, &encoder, &vocab).unwrap();

    let mut trainer = Trainer::new(config, vocab, max_label_len(&samples), Device::Cpu).unwrap();
    let checkpoint = out.path().join("model.safetensors");
    let history = trainer.fit(&train, &valid, &checkpoint).unwrap();

    assert!(history.stopped_early);
    assert_eq!(history.epochs.len(), 2);
    let last = history.epochs.last().unwrap().epoch;
    assert_eq!(history.best_epoch, Some(1));
    assert!(history.best_epoch.unwrap() < last);

    // The epoch-2 update was discarded: live weights equal the epoch-1 file.
    let saved = candle_core::safetensors::load(&checkpoint, &Device::Cpu).unwrap();
    let live = trainer.varmap().data().lock().unwrap();
    assert_eq!(saved.len(), live.len());
    for (name, var) in live.iter() {
        let diff = (var.as_tensor() - &saved[name])
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(diff, 0.0, "{name} differs from the checkpoint");
    }
}

#[test]
fn label_longer_than_time_steps_is_rejected() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_captchas(data.path());

    let mut config = tiny_config(1);
    // 8 columns -> 2 time steps, labels need 3.
    config.model.image_width = 8;
    assert!(run_training(config, data.path(), out.path(), Device::Cpu).is_err());
}
