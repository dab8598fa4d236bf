//! # Piano-roll Rendering
//!
//! Text visualization of a piano-roll: one line per pitch, highest first,
//! one column per time step.

use crate::tensor::TensorData;
use crate::utils::midi::PitchRange;
use ndarray::Array2;
use std::fmt::Write;

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

fn pitch_name(pitch: u8) -> String {
    let octave = pitch as i32 / 12 - 1;
    format!("{}{}", NOTE_NAMES[(pitch % 12) as usize], octave)
}

/// Renders `roll` with `#` for active cells and `.` for rests.
///
/// Only the pitch span that contains notes is drawn; an empty roll renders
/// as the header alone. The header states the duration in seconds.
pub fn render_piano_roll(roll: &Array2<TensorData>, r: PitchRange, dt: f64) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Piano-roll: {} steps x {} pitches, {:.1}s",
        roll.nrows(),
        roll.ncols(),
        roll.nrows() as f64 * dt
    );

    let active: Vec<usize> = roll
        .columns()
        .into_iter()
        .enumerate()
        .filter(|(_, col)| col.iter().any(|&x| x >= 0.5))
        .map(|(j, _)| j)
        .collect();
    let (lowest, highest) = match (active.first(), active.last()) {
        (Some(&lo), Some(&hi)) => (lo, hi),
        _ => return out,
    };

    for j in (lowest..=highest).rev() {
        let pitch = r.0 as usize + j;
        let _ = write!(out, "{:>4} |", pitch_name(pitch.min(127) as u8));
        for &x in roll.column(j) {
            out.push(if x >= 0.5 { '#' } else { '.' });
        }
        out.push('\n');
    }
    out
}
