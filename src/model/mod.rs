//! # LSTM-RBM Model (`model`)
//!
//! [`LstmRbm`] owns the parameter set, the optimizer and the random stream,
//! and exposes the two operations a user runs: [`LstmRbm::train`] over a
//! list of MIDI files and [`LstmRbm::generate`] of a new piece.

pub mod unroll;

use crate::nn::modules::{FastDropout, LstmRbmParams};
use crate::nn::Module;
use crate::optim::{Optimizer, SGD};
use crate::tensor::{TensorData, TensorError};
use crate::utils::midi::{read_piano_roll, write_piano_roll, MidiError, PitchRange};
use crate::utils::{render_piano_roll, InterruptFlag};
use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub use unroll::{generate_unroll, train_unroll, TrainUnroll};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Training requires at least one file")]
    EmptyTrainingSet,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Piano-roll has width {got}, model expects {expected}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),

    #[error("MIDI error: {0}")]
    Midi(#[from] MidiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Hyperparameters. Missing JSON fields take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub n_hidden: usize,
    pub n_hidden_recurrent: usize,
    pub lr: f32,
    /// MIDI pitch range `[low, high)`; its width is the visible layer size.
    pub r: PitchRange,
    /// Seconds per piano-roll row.
    pub dt: f64,
    pub seed: u64,
    /// Gibbs steps per training sample.
    pub k_train: usize,
    /// Gibbs steps per generated time step.
    pub k_generate: usize,
    pub generation_steps: usize,
    pub momentum: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            n_hidden: 150,
            n_hidden_recurrent: 100,
            lr: 0.001,
            r: (21, 109),
            dt: 0.3,
            seed: 0xbeef,
            k_train: 15,
            k_generate: 25,
            generation_steps: 200,
            momentum: 0.0,
        }
    }
}

impl ModelConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn n_visible(&self) -> usize {
        (self.r.1 as usize).saturating_sub(self.r.0 as usize)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let fail = |msg: String| Err(ModelError::InvalidConfig(msg));
        if self.r.0 >= self.r.1 || self.r.1 > 128 {
            return fail(format!("pitch range {:?} must satisfy low < high <= 128", self.r));
        }
        if self.n_hidden == 0 || self.n_hidden_recurrent == 0 {
            return fail("layer sizes must be positive".to_string());
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return fail(format!("dt {} must be positive", self.dt));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return fail(format!("lr {} must be positive", self.lr));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return fail(format!("momentum {} must lie in [0, 1)", self.momentum));
        }
        if self.k_train == 0 || self.k_generate == 0 {
            return fail("Gibbs chain lengths must be positive".to_string());
        }
        if self.generation_steps == 0 {
            return fail("generation_steps must be positive".to_string());
        }
        Ok(())
    }
}

/// Outcome of a training run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    /// Mean monitor value of every completed epoch.
    pub epoch_monitors: Vec<TensorData>,
    /// Whether the run stopped early on an interrupt request.
    pub interrupted: bool,
}

impl TrainReport {
    pub fn epochs_completed(&self) -> usize {
        self.epoch_monitors.len()
    }

    pub fn final_monitor(&self) -> Option<TensorData> {
        self.epoch_monitors.last().copied()
    }
}

/// LSTM-RBM polyphonic music model.
#[derive(Debug)]
pub struct LstmRbm {
    config: ModelConfig,
    params: LstmRbmParams,
    optimizer: SGD,
    dropout: FastDropout,
    rng: StdRng,
    interrupt: InterruptFlag,
}

impl LstmRbm {
    /// Builds a model. The seed drives parameter initialisation and every
    /// later random draw.
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let params = LstmRbmParams::new(
            config.n_visible(),
            config.n_hidden,
            config.n_hidden_recurrent,
            &mut rng,
        )?;
        let optimizer = SGD::new(
            params.parameters().into_values(),
            config.lr,
            Some(config.momentum),
        )?;
        log::debug!(
            "LSTM-RBM with {} visible, {} hidden, {} recurrent units ({} parameters)",
            config.n_visible(),
            config.n_hidden,
            config.n_hidden_recurrent,
            params.num_parameters()
        );

        Ok(LstmRbm {
            config,
            params,
            optimizer,
            dropout: FastDropout::default(),
            rng,
            interrupt: InterruptFlag::new(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn params(&self) -> &LstmRbmParams {
        &self.params
    }

    pub fn n_visible(&self) -> usize {
        self.config.n_visible()
    }

    /// Clone of the flag polled by the training loop; raise it to stop
    /// training after the current chunk.
    pub fn interrupt_handle(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    /// One update on one chunk of a sequence; returns the chunk's monitor.
    ///
    /// The gradient is complete before any parameter changes, so an error
    /// leaves the parameters as they were.
    pub fn train_function(&mut self, chunk: &Array2<TensorData>) -> Result<TensorData, ModelError> {
        self.check_width(chunk.ncols())?;
        if chunk.nrows() == 0 {
            return Err(ModelError::InvalidArgument("empty training chunk".to_string()));
        }

        let out = train_unroll(
            &self.params,
            chunk,
            self.config.k_train,
            &self.dropout,
            &mut self.rng,
        )?;
        self.optimizer.zero_grad();
        out.cost.backward()?;
        self.optimizer.step()?;
        Ok(out.monitor)
    }

    /// Samples a `generation_steps × n_visible` piano-roll.
    pub fn generate_function(&mut self) -> Result<Array2<TensorData>, ModelError> {
        Ok(generate_unroll(
            &self.params,
            self.config.generation_steps,
            self.config.k_generate,
            &self.dropout,
            &mut self.rng,
        )?)
    }

    /// Trains on MIDI files, decoded with the configured pitch range and `dt`.
    pub fn train<P: AsRef<Path>>(
        &mut self,
        files: &[P],
        batch_size: usize,
        num_epochs: usize,
    ) -> Result<TrainReport, ModelError> {
        if files.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        check_loop_arguments(batch_size, num_epochs)?;

        let dataset = files
            .iter()
            .map(|f| read_piano_roll(f, self.config.r, self.config.dt))
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("Loaded {} training sequences", dataset.len());

        self.train_on_piano_rolls(&dataset, batch_size, num_epochs)
    }

    /// Trains on decoded piano-rolls.
    ///
    /// Each epoch visits the sequences in a fresh random order and splits
    /// every sequence into consecutive chunks of at most `batch_size` rows,
    /// one update per chunk. The mean chunk monitor is printed per epoch.
    /// An interrupt request is honoured between chunks; updates already
    /// applied are kept and the partial epoch is not reported.
    pub fn train_on_piano_rolls(
        &mut self,
        dataset: &[Array2<TensorData>],
        batch_size: usize,
        num_epochs: usize,
    ) -> Result<TrainReport, ModelError> {
        if dataset.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        check_loop_arguments(batch_size, num_epochs)?;
        for sequence in dataset {
            self.check_width(sequence.ncols())?;
        }
        if dataset.iter().all(|seq| seq.nrows() == 0) {
            return Err(ModelError::InvalidArgument("every training sequence is empty".to_string()));
        }

        log::info!(
            "Training on {} sequences for {} epochs (batch size {})",
            dataset.len(),
            num_epochs,
            batch_size
        );

        let mut report = TrainReport::default();
        let mut order: Vec<usize> = (0..dataset.len()).collect();

        'epochs: for epoch in 0..num_epochs {
            order.shuffle(&mut self.rng);
            let mut monitors = Vec::new();

            for &index in &order {
                let sequence = &dataset[index];
                for start in (0..sequence.nrows()).step_by(batch_size) {
                    if self.interrupt.is_set() {
                        report.interrupted = true;
                        break 'epochs;
                    }
                    let end = (start + batch_size).min(sequence.nrows());
                    let chunk = sequence.slice(s![start..end, ..]).to_owned();
                    let monitor = self.train_function(&chunk)?;
                    log::debug!("epoch {} sequence {} rows {}..{}: {}", epoch + 1, index, start, end, monitor);
                    monitors.push(monitor);
                }
            }

            let mean = monitors.iter().sum::<TensorData>() / monitors.len() as TensorData;
            println!("Epoch {}/{} {}", epoch + 1, num_epochs, mean);
            report.epoch_monitors.push(mean);
        }

        if report.interrupted {
            self.interrupt.reset();
            println!("Interrupted by user.");
            log::info!(
                "Training interrupted after {} complete epochs",
                report.epochs_completed()
            );
        } else {
            log::info!("Training finished: final monitor {:?}", report.final_monitor());
        }
        Ok(report)
    }

    /// Generates a piece, writes it to `path` as MIDI and, with `show`,
    /// prints a piano-roll rendering.
    pub fn generate<P: AsRef<Path>>(
        &mut self,
        path: P,
        show: bool,
    ) -> Result<Array2<TensorData>, ModelError> {
        let roll = self.generate_function()?;
        write_piano_roll(path.as_ref(), &roll, self.config.r, self.config.dt)?;
        log::info!("Wrote {} steps to {}", roll.nrows(), path.as_ref().display());
        if show {
            println!("{}", render_piano_roll(&roll, self.config.r, self.config.dt));
        }
        Ok(roll)
    }

    fn check_width(&self, width: usize) -> Result<(), ModelError> {
        if width != self.n_visible() {
            return Err(ModelError::ShapeMismatch {
                expected: self.n_visible(),
                got: width,
            });
        }
        Ok(())
    }
}

fn check_loop_arguments(batch_size: usize, num_epochs: usize) -> Result<(), ModelError> {
    if batch_size == 0 {
        return Err(ModelError::InvalidArgument("batch_size must be positive".to_string()));
    }
    if num_epochs == 0 {
        return Err(ModelError::InvalidArgument("num_epochs must be positive".to_string()));
    }
    Ok(())
}
