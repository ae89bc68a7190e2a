//! Error taxonomy shared by every component.
//!
//! Interpreter and chip cores never raise on malformed bytecode; they degrade
//! gracefully and at most log. The ROM accessor is the only place that signals
//! a range error, and every caller handles it locally (terminates the current
//! voice, or surfaces a one-line diagnostic). CLI-level operations are the only
//! code that turns a `SoundRomError` into a process exit code.

/// Errors surfaced by the ROM accessor, interpreter, chips and external interfaces.
#[derive(thiserror::Error, Debug)]
pub enum SoundRomError {
    /// A read (byte, word or block) fell outside the mapped ROM address range.
    #[error("ROM address ${addr:04X} out of range: {reason}")]
    RomOutOfRange {
        /// The CPU address that was requested.
        addr: u32,
        /// Human-readable reason (e.g. "below ROM_BASE", "word read extends past end").
        reason: &'static str,
    },

    /// A command resolved to a non-renderable or structurally empty descriptor.
    #[error("command 0x{cmd:02X} is malformed: {reason}")]
    MalformedCommand {
        /// The command id that failed to resolve to renderable data.
        cmd: u8,
        /// Human-readable reason.
        reason: &'static str,
    },

    /// An interpreter or disassembler safety cap was hit.
    ///
    /// This is informational, not fatal: the caller still has a valid,
    /// truncated trace or rendering.
    #[error("safety limit reached: {limit}")]
    SafetyLimitReached {
        /// Which limit fired (e.g. "instruction cap", "time cap").
        limit: &'static str,
    },

    /// Bytecode at a given address could not be decoded.
    #[error("bytecode corruption at ${addr:04X}: {reason}")]
    BytecodeCorruption {
        /// Address of the offending byte.
        addr: u32,
        /// Human-readable reason.
        reason: &'static str,
    },

    /// Filesystem I/O failure (ROM load, WAV/MIDI write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid CLI flags or config file.
    #[error("configuration error: {0}")]
    Config(String),

    /// WAV or MIDI export failed after rendering succeeded.
    #[error("export error: {0}")]
    Export(String),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, SoundRomError>;
