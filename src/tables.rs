//! Fixed ROM offsets and shared constant tables.
//!
//! Every other module reaches through here rather than hard-coding an
//! address or duplicating a name table; the offsets are a contract with the
//! ROM image and must be honored exactly.

/// 219-byte table: command id -> handler type.
pub const DISPATCH_TYPE_TABLE: u32 = 0x5DEA;
/// 219-byte table: command id -> handler parameter.
pub const DISPATCH_PARAM_TABLE: u32 = 0x5EC5;

/// Type-7 (polychip/FM SFX) tables.
pub const SFX_OFFSET_TABLE: u32 = 0x5FA8;
/// Offset -> priority byte.
pub const SFX_PRIORITY_TABLE: u32 = 0x6024;
/// Offset -> hardware channel byte.
pub const SFX_CHANNEL_TABLE: u32 = 0x60DA;
/// Offset*2 -> 16-bit sequence pointer.
pub const SFX_SEQ_PTR_TABLE: u32 = 0x6190;
/// Offset -> next-offset chain link (0 = end of chain).
pub const SFX_NEXT_TABLE: u32 = 0x62FC;

/// Type-11 (speech) tables.
pub const MUSIC_INDEX_TABLE: u32 = 0x63B2;
/// Index*2 -> 16-bit sequence pointer.
pub const MUSIC_SEQ_PTR_TABLE: u32 = 0x8449;
/// Index*2 -> 16-bit sequence length.
pub const MUSIC_SEQ_LEN_TABLE: u32 = 0x85C3;

/// 16 entries, 16-bit LE each: duration index -> duration value (in frames).
pub const DURATION_TABLE_ADDR: u32 = 0x5C5F;
/// 128 entries, 16-bit LE each: chromatic note index -> polychip frequency divider.
pub const NOTE_FREQ_TABLE_ADDR: u32 = 0x5A35;

/// Highest valid command id (exclusive upper bound is 0xDB).
pub const MAX_COMMANDS: usize = 219;
/// Hard safety cap on SFX channel-chain length.
pub const MAX_CHANNEL_CHAIN: usize = 30;

/// Human-readable name for each of the 15 dispatch handler types.
pub fn handler_type_name(handler_type: u8) -> &'static str {
    match handler_type {
        0 => "Parameter Shift",
        1 => "Set Variable",
        2 => "Add to Variable",
        3 => "Jump Table Dispatch",
        4 => "Kill by Status",
        5 => "Stop Sound",
        6 => "Stop Chain",
        7 => "POKEY SFX",
        8 => "Output Buffer Queue",
        9 => "Fade Out Sound",
        10 => "Fade Out by Status",
        11 => "YM2151 Music/Speech",
        12 => "Channel Control",
        13 => "Control Register",
        14 => "Null Handler",
        0xFF => "Invalid/Unused",
        _ => "Unknown",
    }
}

/// Duration-index (0-15) name, matching the reference disassembler's vocabulary.
pub const DURATION_NAMES: [&str; 16] = [
    "rest",
    "whole",
    "half",
    "quarter",
    "eighth",
    "dotted-half",
    "dotted-quarter",
    "dotted-eighth",
    "triplet",
    "sixteenth",
    "32nd",
    "64th",
    "128th",
    "dotted-16th",
    "dotted-32nd",
    "triplet-quarter",
];

/// Short abbreviation for each duration name, used by the score/tracker view.
pub fn duration_abbrev(dur_idx: u8) -> &'static str {
    match dur_idx {
        0 => "rest",
        1 => "W",
        2 => "H",
        3 => "Q",
        4 => "8th",
        5 => "H.",
        6 => "Q.",
        7 => "8.",
        8 => "trip",
        9 => "16th",
        10 => "32nd",
        11 => "64th",
        12 => "128",
        13 => "16.",
        14 => "32.",
        15 => "Qtr",
        _ => "?",
    }
}

/// Chromatic note names, C-based, used to render a ROM note value as e.g. "A4".
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Convert a ROM note value (0 = rest, 1-127 = chromatic) to a MIDI note number.
///
/// Note `0x46` (70) maps to MIDI 69 = A4 = 440 Hz.
pub fn rom_note_to_midi(note_value: u8) -> Option<u8> {
    if note_value == 0 {
        None
    } else {
        Some(note_value - 1)
    }
}

/// Format a MIDI note number as a note name with octave, e.g. "A4", "C#3".
pub fn midi_note_name(midi: u8) -> String {
    let name = NOTE_NAMES[(midi as usize) % 12];
    let octave = (midi as i32 / 12) - 1;
    format!("{name}{octave}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a440_is_note_0x46() {
        let midi = rom_note_to_midi(0x46).unwrap();
        assert_eq!(midi, 69);
        assert_eq!(midi_note_name(midi), "A4");
    }

    #[test]
    fn note_zero_is_rest() {
        assert_eq!(rom_note_to_midi(0), None);
    }

    #[test]
    fn handler_type_names_cover_all_documented_types() {
        assert_eq!(handler_type_name(7), "POKEY SFX");
        assert_eq!(handler_type_name(11), "YM2151 Music/Speech");
        assert_eq!(handler_type_name(0xFF), "Invalid/Unused");
        assert_eq!(handler_type_name(200), "Unknown");
    }
}
