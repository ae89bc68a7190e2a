//! ROM accessor (component A).
//!
//! Address-mapped random-access read of the fixed 48 KiB sound-program image.
//! This is the only place in the crate that turns an out-of-range address
//! into an error; every other component calls through here and handles the
//! error locally.

use crate::error::{Result, SoundRomError};

/// First CPU address mapped to the ROM image.
pub const ROM_BASE: u32 = 0x4000;
/// One past the last CPU address in the mapped range.
pub const ROM_END: u32 = 0x10000;
/// Expected image size (48 KiB).
pub const ROM_SIZE: usize = 0xC000;

/// Byte-addressable, read-only view of the sound-program ROM.
///
/// Constructed once per render session and held for its duration; all other
/// components borrow it rather than copying its contents.
pub struct Rom {
    data: Vec<u8>,
}

impl Rom {
    /// Wrap a raw byte buffer as a ROM image.
    ///
    /// Logs a warning (does not fail) if `data.len() != ROM_SIZE`, since a
    /// slightly larger or smaller dump is still usable as long as the
    /// addresses this crate reads from are present.
    pub fn new(data: Vec<u8>) -> Self {
        if data.len() != ROM_SIZE {
            log::warn!(
                "ROM image is {} bytes, expected {ROM_SIZE}",
                data.len()
            );
        }
        Rom { data }
    }

    /// Load a ROM image from a file path.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::new(data))
    }

    fn offset(&self, addr: u32) -> Result<usize> {
        if !(ROM_BASE..ROM_END).contains(&addr) {
            return Err(SoundRomError::RomOutOfRange {
                addr,
                reason: "outside mapped ROM range",
            });
        }
        let off = (addr - ROM_BASE) as usize;
        if off >= self.data.len() {
            return Err(SoundRomError::RomOutOfRange {
                addr,
                reason: "beyond end of ROM data",
            });
        }
        Ok(off)
    }

    /// Read a single byte at CPU address `addr`.
    pub fn read_u8(&self, addr: u32) -> Result<u8> {
        let off = self.offset(addr)?;
        Ok(self.data[off])
    }

    /// Read a 16-bit little-endian word at CPU address `addr`.
    pub fn read_u16_le(&self, addr: u32) -> Result<u16> {
        let off = self.offset(addr)?;
        if off + 1 >= self.data.len() {
            return Err(SoundRomError::RomOutOfRange {
                addr,
                reason: "word read extends past end of ROM",
            });
        }
        Ok(u16::from_le_bytes([self.data[off], self.data[off + 1]]))
    }

    /// Read `n` bytes starting at CPU address `addr`, truncated at the end of the image.
    pub fn read_bytes(&self, addr: u32, n: usize) -> Result<&[u8]> {
        let off = self.offset(addr)?;
        let end = (off + n).min(self.data.len());
        Ok(&self.data[off..end])
    }

    /// Size of the backing buffer in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the backing buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_of_size(n: usize) -> Rom {
        Rom::new(vec![0u8; n])
    }

    #[test]
    fn read_u8_in_range() {
        let mut data = vec![0u8; ROM_SIZE];
        data[0x10] = 0xAB;
        let rom = Rom::new(data);
        assert_eq!(rom.read_u8(ROM_BASE + 0x10).unwrap(), 0xAB);
    }

    #[test]
    fn read_u8_below_base_errors() {
        let rom = rom_of_size(ROM_SIZE);
        assert!(matches!(
            rom.read_u8(0x1000),
            Err(SoundRomError::RomOutOfRange { .. })
        ));
    }

    #[test]
    fn read_u8_at_end_errors() {
        let rom = rom_of_size(ROM_SIZE);
        assert!(rom.read_u8(ROM_END - 1).is_ok());
        assert!(matches!(
            rom.read_u8(ROM_END),
            Err(SoundRomError::RomOutOfRange { .. })
        ));
    }

    #[test]
    fn read_u16_le_round_trips() {
        let mut data = vec![0u8; ROM_SIZE];
        data[0x20] = 0x34;
        data[0x21] = 0x12;
        let rom = Rom::new(data);
        assert_eq!(rom.read_u16_le(ROM_BASE + 0x20).unwrap(), 0x1234);
    }

    #[test]
    fn read_u16_le_truncated_at_end_errors() {
        let rom = rom_of_size(ROM_SIZE);
        assert!(matches!(
            rom.read_u16_le(ROM_END - 1),
            Err(SoundRomError::RomOutOfRange { .. })
        ));
    }

    #[test]
    fn read_bytes_truncates_at_image_end() {
        let rom = rom_of_size(ROM_SIZE);
        let bytes = rom.read_bytes(ROM_END - 4, 16).unwrap();
        assert_eq!(bytes.len(), 4);
    }

    #[test]
    fn undersized_image_still_constructs() {
        let rom = rom_of_size(0x10);
        assert_eq!(rom.len(), 0x10);
    }
}
