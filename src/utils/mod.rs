//! # Utility Functions (`utils`)
//!
//! The piano-roll MIDI boundary, text visualization, logging setup and the
//! interrupt flag used by the training loop.

pub mod interrupt;
pub mod logging;
pub mod midi;
pub mod plot;

pub use interrupt::InterruptFlag;
pub use logging::init_logging;
pub use midi::{read_piano_roll, write_piano_roll, MidiError, PitchRange};
pub use plot::render_piano_roll;
