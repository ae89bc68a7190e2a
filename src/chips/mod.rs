//! Chip emulators (components D, E, F).

pub mod fm;
pub mod lpc;
pub mod poly;

pub use fm::FmChip;
pub use poly::PolyChip;
