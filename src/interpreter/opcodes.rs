//! The opcode table for bytecode in the `0x80..=0xBA` range.
//!
//! This is the single source of truth consulted by both the interpreter and
//! the disassembler — there is exactly one opcode table in the crate.

/// Shape of an opcode's argument bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgFormat {
    /// One byte.
    Byte,
    /// A 16-bit little-endian pointer (address).
    Word,
    /// Two independent bytes.
    ByteByte,
    /// One byte followed by a 16-bit little-endian pointer.
    ByteWord,
}

impl ArgFormat {
    /// Number of argument bytes this format consumes (not counting the opcode byte itself).
    pub const fn len(self) -> usize {
        match self {
            ArgFormat::Byte => 1,
            ArgFormat::Word => 2,
            ArgFormat::ByteByte => 2,
            ArgFormat::ByteWord => 3,
        }
    }
}

/// One entry in the opcode table: mnemonic, short description, argument shape.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeDef {
    /// Assembler mnemonic, e.g. "SET_TEMPO".
    pub name: &'static str,
    /// One-line description, for the disassembler's `--list`/header output.
    pub desc: &'static str,
    /// Argument byte layout.
    pub fmt: ArgFormat,
}

macro_rules! op {
    ($name:literal, $desc:literal, $fmt:expr) => {
        OpcodeDef {
            name: $name,
            desc: $desc,
            fmt: $fmt,
        }
    };
}

use ArgFormat::*;

/// Look up the opcode definition for a byte in `0x80..=0xBA`.
///
/// Returns `None` for anything outside that range (the caller is expected to
/// have already dispatched notes/rests and END bytes before consulting this
/// table).
pub fn lookup(byte0: u8) -> Option<OpcodeDef> {
    let def = match byte0 {
        0x80 => op!("SET_TEMPO", "Set tempo (A>>2)", Byte),
        0x81 => op!("ADD_TEMPO", "Add to tempo", Byte),
        0x82 => op!("SET_VOLUME", "Set base volume", Byte),
        0x83 => op!("SET_VOLUME_CHK", "Set volume (w/ $FE check)", Byte),
        0x84 => op!("ADD_TRANSPOSE", "Add to transpose offset", Byte),
        0x85 => op!("NOP_FE_CHECK", "No-op ($FE check)", Byte),
        0x86 => op!("SET_FREQ_ENV", "Set freq envelope ptr", Word),
        0x87 => op!("SET_VOL_ENV", "Set vol envelope ptr", Word),
        0x88 => op!("RESET_TIMER", "Reset timers/counters", Byte),
        0x89 => op!("SET_REPEAT", "Set repeat counter", Byte),
        0x8A => op!("SET_DISTORTION", "Set distortion mask", Byte),
        0x8B => op!("SET_CTRL_BITS", "Set control bits", Byte),
        0x8C => op!("CLR_CTRL_BITS", "Clear control bits", Byte),
        0x8D => op!("PUSH_SEQ", "Push & load segment ptr", Word),
        0x8E => op!("PUSH_SEQ_EXT", "Push extended chain state", Byte),
        0x8F => op!("POP_SEQ", "Pop sequence from chain", Byte),
        0x90 => op!("SWITCH_POKEY", "Switch to POKEY mode", Byte),
        0x91 => op!("SWITCH_YM2151", "Switch to YM2151 mode", Byte),
        0x92 => op!("NOP_92", "No-op (consumed)", Byte),
        0x93 => op!("NOP_93", "No-op (consumed)", Byte),
        0x94 => op!("NOP_94", "No-op (consumed)", Byte),
        0x95 => op!("NOP_95", "No-op (consumed)", Byte),
        0x96 => op!("QUEUE_OUTPUT", "Queue byte to main CPU", Byte),
        0x97 => op!("RESET_ENVELOPE", "Reset envelope to defaults", Byte),
        0x98 => op!("NOP_98", "No-op (consumed)", Byte),
        0x99 => op!("SET_SEQ_PTR", "Set sequence pointer (jump)", Word),
        0x9A => op!("PLAY_MUSIC_CMD", "Trigger music command", Byte),
        0x9B => op!("SET_VAR_NAMED", "Set named variable", Byte),
        0x9C => op!("FORCE_POKEY", "Force POKEY mode", Byte),
        0x9D => op!("SET_VOICE", "Load YM2151 voice definition", Word),
        0x9E => op!("YM_LOAD_ENV", "Load YM envelope table", ByteByte),
        0x9F => op!("YM_LOAD_REG", "Load YM register block", ByteByte),
        0xA0 => op!("FREQ_OFFSET", "Add signed frequency offset", Byte),
        0xA1 => op!("YM_DETUNE_NEG", "Negate + apply YM detune", Byte),
        0xA2 => op!("REG_OR", "OR register", Byte),
        0xA3 => op!("REG_XOR", "XOR register", Byte),
        0xA4 => op!("VAR_LOAD", "Load pair to seq variables", ByteByte),
        0xA5 => op!("NOP_A5", "No-op (consumed)", Byte),
        0xA6 => op!("SHIFT_LEFT", "Shift register left N", Byte),
        0xA7 => op!("FREQ_ADD", "Add signed value to frequency", Byte),
        0xA8 => op!("SET_RELEASE", "Set release rate", Byte),
        0xA9 => op!("VAR_ADD", "Add to sequence variable", Byte),
        0xAA => op!("VAR_SUB", "Subtract from variable", Byte),
        0xAB => op!("VAR_AND", "AND mask variable", Byte),
        0xAC => op!("VAR_OR", "OR mask variable", Byte),
        0xAD => op!("VAR_XOR", "XOR mask variable", Byte),
        0xAE => op!("COND_JUMP", "Conditional jump (if var=0)", Word),
        0xAF => op!("COND_JUMP_INC", "Cond jump + inc var", Word),
        0xB0 => op!("VAR_TO_REG", "Store var to selected register", Byte),
        0xB1 => op!("VAR_APPLY", "Apply var to subsystem", Byte),
        0xB2 => op!("VAR_CLASSIFY", "Classify var + jump to shared", Byte),
        0xB3 => op!("SHIFT_VAR_RIGHT", "Shift variable right by N", Byte),
        0xB4 => op!("SHIFT_VAR_LEFT", "Shift variable left by N", Byte),
        0xB5 => op!("COND_JUMP_EQ", "Jump if var == 0", ByteWord),
        0xB6 => op!("COND_JUMP_NE", "Jump if var != 0", ByteWord),
        0xB7 => op!("COND_JUMP_PL", "Jump if var >= 0", ByteWord),
        0xB8 => op!("COND_JUMP_MI", "Jump if var < 0", ByteWord),
        0xB9 => op!("VAR_CLASSIFY_SUB", "Classify var + subtract", Byte),
        0xBA => op!("VAR_SUB_STORE", "Subtract from var + store", Byte),
        _ => return None,
    };
    Some(def)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_defined_opcode_is_covered() {
        for byte0 in 0x80u16..=0xBA {
            assert!(lookup(byte0 as u8).is_some(), "missing opcode ${byte0:02X}");
        }
    }

    #[test]
    fn bytes_outside_range_are_not_opcodes() {
        assert!(lookup(0x7F).is_none());
        assert!(lookup(0xBB).is_none());
    }

    #[test]
    fn arg_format_lengths_match_spec() {
        assert_eq!(lookup(0x80).unwrap().fmt.len(), 1); // SET_TEMPO: b
        assert_eq!(lookup(0x86).unwrap().fmt.len(), 2); // SET_FREQ_ENV: w
        assert_eq!(lookup(0x9E).unwrap().fmt.len(), 2); // YM_LOAD_ENV: bb
        assert_eq!(lookup(0xB5).unwrap().fmt.len(), 3); // COND_JUMP_EQ: bw
    }
}
