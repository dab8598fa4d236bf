//! # Neural Network Modules
//!
//! Parameterised pieces of the model.

pub mod dropout;
pub use dropout::FastDropout;

pub mod rnn;
pub use rnn::{recurrence, LstmRbmParams, MemoryState, StepOutput};
