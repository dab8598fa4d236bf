//! # LSTM-RBM Core Library
//!
//! A generative model of polyphonic music: a Restricted Boltzmann Machine
//! models which notes sound together at one time step, and a gated recurrent
//! memory evolves the RBM's biases from one step to the next.
//!
//! The crate is organised bottom-up:
//! - [`tensor`]: arrays with reverse-mode automatic differentiation.
//! - [`nn`]: functional helpers, fast dropout, energy-based losses, the RBM
//!   Gibbs sampler and the gated recurrence step.
//! - [`optim`]: parameter update rules.
//! - [`model`]: the sequence unroller and the [`LstmRbm`] façade.
//! - [`utils`]: the piano-roll MIDI boundary, visualization, logging and
//!   interrupt handling.

pub mod tensor;
pub mod nn;
pub mod optim;
pub mod model;
pub mod utils;

pub use model::{LstmRbm, ModelConfig, ModelError, TrainReport};
pub use tensor::{Tensor, TensorData, TensorError};
