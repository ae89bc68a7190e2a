//! Standard MIDI File (SMF) export.
//!
//! Builds a Type 1 file: track 0 carries a fixed 120 BPM tempo meta event,
//! tracks 1..N carry one voice's Note On/Off pairs each. Sustained notes
//! (no explicit Note Off in the voice's event trace) extend to the start of
//! the channel's next note, or to the end of the piece if they're last.
//!
//! Pitch is derived from the rendered events rather than the source note
//! bytes: exactly, from the FM key-code/octave nibble for FM voices; and
//! approximately, via the standard POKEY divide-down formula, for polychip
//! voices (AUDCTL's high-resolution/linked-channel modes aren't reflected
//! in this conversion).

use crate::error::Result;
use crate::interpreter::{Event, EventKind, Interpreter, DEFAULT_MAX_SECONDS_SFX};
use crate::resolver::CommandInfo;
use crate::rom::Rom;

const TICKS_PER_BEAT: u32 = 480;
const BEATS_PER_SECOND: f64 = 2.0; // fixed 120 BPM
const MASTER_CLOCK_HZ: f64 = 1_789_773.0;

/// Semitone codes the FM key-code nibble cycles through (see the interpreter's
/// `FM_NOTE_MAP`); reversed here to recover a semitone index from a KC byte.
const FM_NOTE_MAP: [u8; 12] = [0, 1, 2, 4, 5, 6, 8, 9, 10, 12, 13, 14];

struct NoteEvent {
    time: f64,
    note: u8,
    explicit_off: Option<f64>,
}

fn poly_audf_to_midi(audf: u8) -> u8 {
    let freq = MASTER_CLOCK_HZ / (2.0 * (audf as f64 + 1.0) * 28.0);
    let midi = 69.0 + 12.0 * (freq / 440.0).log2();
    midi.round().clamp(0.0, 127.0) as u8
}

fn fm_kc_to_midi(kc: u8) -> u8 {
    let octave = (kc >> 4) & 0x07;
    let code = kc & 0x0F;
    let semitone = FM_NOTE_MAP
        .iter()
        .position(|&c| c == code)
        .unwrap_or(0) as u8;
    (octave * 12 + semitone).min(127)
}

/// Collapse a voice's raw event trace into note on/off pairs, in time order.
fn note_events(events: &[Event]) -> Vec<NoteEvent> {
    let mut out = Vec::new();
    for e in events {
        match e.kind {
            EventKind::PolyNoteOn { audf, .. } => {
                out.push(NoteEvent {
                    time: e.time,
                    note: poly_audf_to_midi(audf),
                    explicit_off: None,
                });
            }
            EventKind::PolyNoteOff { .. } => {
                if let Some(last) = out.last_mut() {
                    if last.explicit_off.is_none() {
                        last.explicit_off = Some(e.time);
                    }
                }
            }
            EventKind::FmNoteOn { .. } => {
                // KC is written just before FmNoteOn; look back for it.
                continue;
            }
            EventKind::FmRegWrite { reg, value } if (0x28..0x30).contains(&reg) => {
                out.push(NoteEvent {
                    time: e.time,
                    note: fm_kc_to_midi(value),
                    explicit_off: None,
                });
            }
            EventKind::FmNoteOff { .. } => {
                if let Some(last) = out.last_mut() {
                    if last.explicit_off.is_none() {
                        last.explicit_off = Some(e.time);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

fn midi_varlen(mut value: u32) -> Vec<u8> {
    let mut buf = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        buf.push(((value & 0x7F) as u8) | 0x80);
        value >>= 7;
    }
    buf.reverse();
    buf
}

fn build_track(mut events: Vec<(u32, Vec<u8>)>) -> Vec<u8> {
    events.sort_by_key(|(tick, _)| *tick);
    let mut data = Vec::new();
    let mut prev_tick = 0u32;
    for (tick, bytes) in events {
        let delta = tick.saturating_sub(prev_tick);
        data.extend(midi_varlen(delta));
        data.extend(bytes);
        prev_tick = tick;
    }
    data.extend(midi_varlen(0));
    data.extend([0xFF, 0x2F, 0x00]);

    let mut chunk = Vec::with_capacity(data.len() + 8);
    chunk.extend(*b"MTrk");
    chunk.extend((data.len() as u32).to_be_bytes());
    chunk.extend(data);
    chunk
}

fn tick_of(seconds: f64) -> u32 {
    (seconds * TICKS_PER_BEAT as f64 * BEATS_PER_SECOND).round().max(0.0) as u32
}

/// Render `info`'s channel chain to a Type 1 Standard MIDI File.
pub fn write_midi(rom: &Rom, info: &CommandInfo, path: impl AsRef<std::path::Path>) -> Result<()> {
    let mut voice_notes: Vec<Vec<NoteEvent>> = Vec::new();
    let mut song_end = 0.0f64;

    for ch in &info.channels {
        let (hardware, voice) = ch.hardware();
        let interp = Interpreter::new(rom, hardware, voice, DEFAULT_MAX_SECONDS_SFX);
        let events = interp.run(ch.seq_ptr as u32)?;
        for e in &events {
            song_end = song_end.max(e.time);
        }
        voice_notes.push(note_events(&events));
    }

    let num_tracks = voice_notes.len() + 1;
    let mut file = Vec::new();
    file.extend(*b"MThd");
    file.extend(6u32.to_be_bytes());
    file.extend(1u16.to_be_bytes());
    file.extend((num_tracks as u16).to_be_bytes());
    file.extend((TICKS_PER_BEAT as u16).to_be_bytes());

    let tempo_event = (0u32, vec![0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]); // 500,000 us/beat
    file.extend(build_track(vec![tempo_event]));

    for (idx, notes) in voice_notes.iter().enumerate() {
        let midi_ch = match idx {
            0..=8 => idx as u8,
            9..=14 => idx as u8 + 1, // skip channel 9 (drums)
            _ => 15,
        };

        let mut events = Vec::new();
        for (i, note) in notes.iter().enumerate() {
            let start_tick = tick_of(note.time);
            let end_secs = match note.explicit_off {
                Some(off) => off,
                None => notes.get(i + 1).map(|n| n.time).unwrap_or(song_end),
            };
            let end_tick = tick_of(end_secs).max(start_tick + 1);

            events.push((start_tick, vec![0x90 | midi_ch, note.note, 100]));
            events.push((end_tick, vec![0x80 | midi_ch, note.note, 0]));
        }
        file.extend(build_track(events));
    }

    std::fs::write(path, file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poly_audf_to_midi_is_monotonic_with_frequency() {
        let low = poly_audf_to_midi(200);
        let high = poly_audf_to_midi(20);
        assert!(high > low);
    }

    #[test]
    fn fm_kc_round_trips_through_note_map() {
        for (semitone, &code) in FM_NOTE_MAP.iter().enumerate() {
            let kc = (3 << 4) | code;
            assert_eq!(fm_kc_to_midi(kc), 3 * 12 + semitone as u8);
        }
    }

    #[test]
    fn midi_varlen_encodes_small_and_large_values() {
        assert_eq!(midi_varlen(0), vec![0x00]);
        assert_eq!(midi_varlen(0x7F), vec![0x7F]);
        assert_eq!(midi_varlen(0x80), vec![0x81, 0x00]);
    }

    #[test]
    fn build_track_emits_end_of_track_meta_event() {
        let track = build_track(vec![(0, vec![0x90, 60, 100])]);
        assert_eq!(&track[0..4], b"MTrk");
        assert!(track.ends_with(&[0x00, 0xFF, 0x2F, 0x00]));
    }
}
