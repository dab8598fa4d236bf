//! Train-then-generate through the public API, with MIDI files on disk.

use lstm_rbm::utils::midi::{read_piano_roll, write_piano_roll};
use lstm_rbm::{LstmRbm, ModelConfig, ModelError, TensorData};
use ndarray::Array2;
use std::path::PathBuf;

const RANGE: (u8, u8) = (60, 64);
const DT: f64 = 0.3;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lstm_rbm_{}_{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn tiny_config() -> ModelConfig {
    ModelConfig {
        n_hidden: 3,
        n_hidden_recurrent: 2,
        r: RANGE,
        dt: DT,
        lr: 0.1,
        seed: 1234,
        ..ModelConfig::default()
    }
}

/// Ten steps, four pitches: a held two-note chord and a pulsing top voice.
fn synthetic_sequence() -> Array2<TensorData> {
    Array2::from_shape_fn((10, 4), |(t, j)| match j {
        0 | 2 => 1.0,
        3 if t % 2 == 0 => 1.0,
        _ => 0.0,
    })
}

#[test]
fn training_improves_the_monitor_and_generation_round_trips() {
    let dir = scratch_dir("e2e");
    let song = dir.join("song.mid");
    write_piano_roll(&song, &synthetic_sequence(), RANGE, DT).unwrap();
    assert_eq!(read_piano_roll(&song, RANGE, DT).unwrap(), synthetic_sequence());

    let mut model = LstmRbm::new(tiny_config()).unwrap();
    let report = model.train(&[&song], 10, 50).unwrap();
    assert_eq!(report.epochs_completed(), 50);
    assert!(!report.interrupted);
    let first = report.epoch_monitors[0];
    let last = report.epoch_monitors[49];
    assert!(last > first, "epoch 1: {}, epoch 50: {}", first, last);

    let sample = dir.join("sample1.mid");
    let roll = model.generate(&sample, false).unwrap();
    assert_eq!(roll.dim(), (200, 4));
    assert!(roll.iter().all(|&x| x == 0.0 || x == 1.0));
    assert_eq!(read_piano_roll(&sample, RANGE, DT).unwrap(), roll);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn empty_training_set_is_reported_before_any_work() {
    let mut model = LstmRbm::new(tiny_config()).unwrap();
    let before = model.params().w.data_clone();
    let no_files: [&str; 0] = [];
    let err = model.train(&no_files, 10, 50).unwrap_err();
    assert!(matches!(err, ModelError::EmptyTrainingSet));
    assert_eq!(model.params().w.data_clone(), before);
}

#[test]
fn missing_file_is_reported_as_a_midi_error() {
    let mut model = LstmRbm::new(tiny_config()).unwrap();
    let err = model.train(&["/nonexistent/lstm_rbm/song.mid"], 10, 1).unwrap_err();
    assert!(matches!(err, ModelError::Midi(_)));
}

#[test]
fn same_seed_same_music() {
    let train_and_sample = || {
        let mut model = LstmRbm::new(tiny_config()).unwrap();
        model
            .train_on_piano_rolls(&[synthetic_sequence()], 5, 3)
            .unwrap();
        model.generate_function().unwrap()
    };
    assert_eq!(train_and_sample(), train_and_sample());
}
