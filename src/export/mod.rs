//! Output writers (component H).
//!
//! The mixer already normalizes and clips its output to `i16` range, so the
//! writers here are thin format encoders, not post-processors.

mod wav;
pub use wav::write_wav;

#[cfg(feature = "midi")]
mod midi;
#[cfg(feature = "midi")]
pub use midi::write_midi;
