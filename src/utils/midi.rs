//! # Piano-roll MIDI Boundary
//!
//! Converts between Standard MIDI Files and piano-rolls: `T × n` binary
//! matrices where row `t` covers the time interval `[t·dt, (t+1)·dt)` and
//! column `j` is MIDI pitch `r.0 + j`.
//!
//! Output files are SMF format 0 on channel 0, 100 ticks per quarter at
//! 500000 µs per quarter, so one tick is 5 ms. Each maximal run of active
//! steps in a column becomes one note. The end-of-track event sits at
//! `T·dt`, which keeps trailing silence through a round trip.

use crate::tensor::TensorData;
use midly::num::{u15, u24, u28, u4, u7};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};
use ndarray::Array2;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const TICKS_PER_QUARTER: u16 = 100;
const MICROS_PER_QUARTER: u32 = 500_000;
const VELOCITY: u8 = 90;
const CHANNEL: u8 = 0;
// Largest delta a MIDI variable-length quantity can hold.
const MAX_TICK: u64 = 0x0FFF_FFFF;

/// Inclusive-exclusive MIDI pitch range `[low, high)`.
pub type PitchRange = (u8, u8);

#[derive(Error, Debug)]
pub enum MidiError {
    #[error("Invalid pitch range ({low}, {high}): need low < high <= 128")]
    InvalidRange { low: u8, high: u8 },

    #[error("Invalid time step {0}: must be finite and positive")]
    InvalidStep(f64),

    #[error("Piano-roll has width {got}, pitch range needs {expected}")]
    WidthMismatch { expected: usize, got: usize },

    #[error("Time {0}s does not fit in a MIDI file")]
    TooLong(f64),

    #[error("MIDI parse error: {0}")]
    Parse(#[from] midly::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn check_range(r: PitchRange) -> Result<usize, MidiError> {
    let (low, high) = r;
    if low >= high || high > 128 {
        return Err(MidiError::InvalidRange { low, high });
    }
    Ok((high - low) as usize)
}

fn check_step(dt: f64) -> Result<(), MidiError> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(MidiError::InvalidStep(dt));
    }
    Ok(())
}

/// Reads a MIDI file into a piano-roll.
pub fn read_piano_roll<P: AsRef<Path>>(
    path: P,
    r: PitchRange,
    dt: f64,
) -> Result<Array2<TensorData>, MidiError> {
    let bytes = std::fs::read(path)?;
    decode_piano_roll(&bytes, r, dt)
}

/// Writes a piano-roll to a MIDI file.
pub fn write_piano_roll<P: AsRef<Path>>(
    path: P,
    roll: &Array2<TensorData>,
    r: PitchRange,
    dt: f64,
) -> Result<(), MidiError> {
    let bytes = encode_piano_roll(roll, r, dt)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// A sounding interval in seconds.
#[derive(Debug, Clone, Copy)]
struct Note {
    key: u8,
    start: f64,
    end: f64,
}

/// Decodes SMF bytes into a piano-roll.
///
/// Tempo changes from every track apply to every track. Note-on with
/// velocity 0 counts as note-off. Notes outside `r` are dropped, and note
/// boundaries snap to the nearest step.
pub fn decode_piano_roll(
    bytes: &[u8],
    r: PitchRange,
    dt: f64,
) -> Result<Array2<TensorData>, MidiError> {
    let width = check_range(r)?;
    check_step(dt)?;

    let smf = Smf::parse(bytes)?;
    let clock = Clock::new(&smf);

    let mut notes = Vec::new();
    let mut end_time: f64 = 0.0;
    for track in &smf.tracks {
        let mut tick: u64 = 0;
        // (channel, key) -> start times, oldest first
        let mut sounding: HashMap<(u8, u8), Vec<f64>> = HashMap::new();
        for event in track {
            tick += event.delta.as_int() as u64;
            let now = clock.seconds(tick);
            end_time = end_time.max(now);

            let (channel, message) = match event.kind {
                TrackEventKind::Midi { channel, message } => (channel.as_int(), message),
                _ => continue,
            };
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    sounding.entry((channel, key.as_int())).or_default().push(now);
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let key = key.as_int();
                    if let Some(starts) = sounding.get_mut(&(channel, key)) {
                        if !starts.is_empty() {
                            let start = starts.remove(0);
                            notes.push(Note { key, start, end: now });
                        }
                    }
                }
                _ => {}
            }
        }
        // Unterminated notes run to the end of their track.
        let track_end = clock.seconds(tick);
        for ((_, key), starts) in sounding {
            for start in starts {
                notes.push(Note { key, start, end: track_end });
            }
        }
    }

    let steps = (end_time / dt).round() as usize;
    let mut roll = Array2::zeros((steps, width));
    for note in notes {
        if note.key < r.0 || note.key >= r.1 {
            continue;
        }
        let column = (note.key - r.0) as usize;
        let first = ((note.start / dt).round() as usize).min(steps);
        let last = ((note.end / dt).round() as usize).min(steps);
        for t in first..last {
            roll[[t, column]] = 1.0;
        }
    }
    Ok(roll)
}

/// Maps absolute ticks to seconds.
struct Clock {
    timing: Timing,
    // (tick, µs per quarter), sorted by tick, first entry at tick 0
    tempo_map: Vec<(u64, u32)>,
}

impl Clock {
    fn new(smf: &Smf<'_>) -> Self {
        let mut tempo_map = vec![(0u64, MICROS_PER_QUARTER)];
        for track in &smf.tracks {
            let mut tick: u64 = 0;
            for event in track {
                tick += event.delta.as_int() as u64;
                if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                    tempo_map.push((tick, tempo.as_int()));
                }
            }
        }
        // Stable sort keeps a tempo set at tick 0 after the default.
        tempo_map.sort_by_key(|&(tick, _)| tick);
        Clock {
            timing: smf.header.timing,
            tempo_map,
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        match self.timing {
            Timing::Timecode(fps, subframes) => {
                tick as f64 / (fps.as_f32() as f64 * subframes as f64)
            }
            Timing::Metrical(tpq) => {
                let tpq = tpq.as_int().max(1) as f64;
                let mut elapsed = 0.0;
                let (mut last_tick, mut tempo) = self.tempo_map[0];
                for &(at, next_tempo) in &self.tempo_map[1..] {
                    if at >= tick {
                        break;
                    }
                    elapsed += (at - last_tick) as f64 * tempo as f64 / tpq / 1e6;
                    last_tick = at;
                    tempo = next_tempo;
                }
                elapsed + (tick - last_tick) as f64 * tempo as f64 / tpq / 1e6
            }
        }
    }
}

/// Encodes a piano-roll as SMF bytes. Cells `>= 0.5` are active.
pub fn encode_piano_roll(
    roll: &Array2<TensorData>,
    r: PitchRange,
    dt: f64,
) -> Result<Vec<u8>, MidiError> {
    let width = check_range(r)?;
    check_step(dt)?;
    if roll.ncols() != width {
        return Err(MidiError::WidthMismatch {
            expected: width,
            got: roll.ncols(),
        });
    }

    let ticks_per_second = TICKS_PER_QUARTER as f64 * 1e6 / MICROS_PER_QUARTER as f64;
    let tick_of = |step: usize| -> Result<u64, MidiError> {
        let seconds = step as f64 * dt;
        let tick = (seconds * ticks_per_second).round();
        if tick > MAX_TICK as f64 {
            return Err(MidiError::TooLong(seconds));
        }
        Ok(tick as u64)
    };

    // (tick, is_on, key); offs sort before ons at the same tick
    let mut events: Vec<(u64, bool, u8)> = Vec::new();
    let steps = roll.nrows();
    for (column, pitch) in roll.columns().into_iter().zip(r.0..r.1) {
        let mut run_start: Option<usize> = None;
        for t in 0..=steps {
            let active = t < steps && column[t] >= 0.5;
            match (active, run_start) {
                (true, None) => run_start = Some(t),
                (false, Some(start)) => {
                    events.push((tick_of(start)?, true, pitch));
                    events.push((tick_of(t)?, false, pitch));
                    run_start = None;
                }
                _ => {}
            }
        }
    }
    events.sort_by_key(|&(tick, is_on, key)| (tick, is_on, key));

    let channel = u4::new(CHANNEL);
    let mut track: Track<'static> = Vec::with_capacity(events.len() + 2);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(MICROS_PER_QUARTER))),
    });

    let mut last_tick = 0u64;
    for (tick, is_on, key) in events {
        let message = if is_on {
            MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(VELOCITY),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            }
        };
        track.push(TrackEvent {
            delta: u28::new((tick - last_tick) as u32),
            kind: TrackEventKind::Midi { channel, message },
        });
        last_tick = tick;
    }

    let end = tick_of(steps)?;
    track.push(TrackEvent {
        delta: u28::new(end.saturating_sub(last_tick) as u32),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));
    smf.tracks.push(track);

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const R: PitchRange = (21, 109);

    #[test]
    fn round_trip_is_lossless_for_random_rolls() {
        let mut rng = StdRng::seed_from_u64(17);
        let roll = Array2::from_shape_fn((200, 88), |_| {
            if rng.gen_bool(0.2) {
                1.0
            } else {
                0.0
            }
        });
        let bytes = encode_piano_roll(&roll, R, 0.3).unwrap();
        assert_eq!(decode_piano_roll(&bytes, R, 0.3).unwrap(), roll);
    }

    #[test]
    fn trailing_silence_survives_round_trip() {
        let roll = arr2(&[[1.0, 0.0], [0.0, 0.0], [0.0, 0.0]]);
        let bytes = encode_piano_roll(&roll, (60, 62), 0.25).unwrap();
        let back = decode_piano_roll(&bytes, (60, 62), 0.25).unwrap();
        assert_eq!(back, roll);
    }

    #[test]
    fn sustained_notes_become_single_events() {
        let roll = arr2(&[[1.0], [1.0], [1.0], [0.0], [1.0]]);
        let bytes = encode_piano_roll(&roll, (60, 61), 0.3).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        let ons = smf.tracks[0]
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    TrackEventKind::Midi {
                        message: MidiMessage::NoteOn { .. },
                        ..
                    }
                )
            })
            .count();
        assert_eq!(ons, 2);
        assert_eq!(smf.header.format, Format::SingleTrack);
    }

    #[test]
    fn decode_honours_tempo_changes_and_zero_velocity_offs() {
        // 480 tpq; tempo 1 s per quarter, then 0.5 s per quarter at tick 480.
        let mut smf = Smf::new(Header::new(Format::Parallel, Timing::Metrical(u15::new(480))));
        smf.tracks.push(vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(1_000_000))),
            },
            TrackEvent {
                delta: u28::new(480),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000))),
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ]);
        let on = |delta: u32, key: u8, vel: u8| TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(3),
                message: MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(vel),
                },
            },
        };
        // Note 61 from 0 s to 1.5 s (tick 960); note 20 is out of range.
        smf.tracks.push(vec![
            on(0, 61, 100),
            on(0, 20, 100),
            on(960, 61, 0),
            on(0, 20, 0),
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ]);
        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).unwrap();

        let roll = decode_piano_roll(&bytes, (60, 62), 0.5).unwrap();
        assert_eq!(roll, arr2(&[[0.0, 1.0], [0.0, 1.0], [0.0, 1.0]]));
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let roll = Array2::<TensorData>::zeros((2, 3));
        assert!(matches!(
            encode_piano_roll(&roll, (60, 62), 0.3),
            Err(MidiError::WidthMismatch { expected: 2, got: 3 })
        ));
        assert!(matches!(
            encode_piano_roll(&roll, (60, 60), 0.3),
            Err(MidiError::InvalidRange { .. })
        ));
        assert!(matches!(
            encode_piano_roll(&roll, (60, 63), 0.0),
            Err(MidiError::InvalidStep(_))
        ));
        assert!(decode_piano_roll(b"not a midi file", (60, 63), 0.3).is_err());
    }

    #[test]
    fn files_round_trip_through_disk() {
        let dir = std::env::temp_dir().join(format!("lstm_rbm_midi_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roll.mid");
        let roll = arr2(&[[0.0, 1.0, 1.0], [1.0, 0.0, 1.0]]);
        write_piano_roll(&path, &roll, (48, 51), 0.3).unwrap();
        assert_eq!(read_piano_roll(&path, (48, 51), 0.3).unwrap(), roll);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
