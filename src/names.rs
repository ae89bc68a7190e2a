//! Sound-name lookup table (component H, optional `names` feature).
//!
//! Backed by a CSV with columns `id, subsystem, description`; the header row
//! is skipped. `id` accepts a plain decimal or a `0x`/`0o`/`0b`-prefixed
//! integer literal, matching the way the reference disassembler's own
//! command-name table is authored.

use crate::error::{Result, SoundRomError};
use std::collections::HashMap;
use std::path::Path;

/// One row of the sound-name table.
#[derive(Debug, Clone)]
pub struct SoundName {
    pub subsystem: String,
    pub description: String,
}

/// Command id -> name/description lookup, loaded once per render session.
#[derive(Debug, Clone, Default)]
pub struct SoundNameTable {
    entries: HashMap<u8, SoundName>,
}

fn parse_id(field: &str) -> Option<u8> {
    let field = field.trim();
    let (digits, radix) = if let Some(hex) = field.strip_prefix("0x").or(field.strip_prefix("0X"))
    {
        (hex, 16)
    } else if let Some(oct) = field.strip_prefix("0o").or(field.strip_prefix("0O")) {
        (oct, 8)
    } else if let Some(bin) = field.strip_prefix("0b").or(field.strip_prefix("0B")) {
        (bin, 2)
    } else {
        (field, 10)
    };
    u8::from_str_radix(digits, radix).ok()
}

impl SoundNameTable {
    /// Load a table from a CSV file, skipping the header row.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path.as_ref())
            .map_err(|e| SoundRomError::Config(format!("invalid sound-name CSV: {e}")))?;

        let mut entries = HashMap::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| SoundRomError::Config(format!("invalid CSV row: {e}")))?;
            let Some(id_field) = record.get(0) else {
                continue;
            };
            let Some(id) = parse_id(id_field) else {
                continue;
            };
            let subsystem = record.get(1).unwrap_or("").to_string();
            let description = record.get(2).unwrap_or("").to_string();
            entries.insert(
                id,
                SoundName {
                    subsystem,
                    description,
                },
            );
        }
        Ok(SoundNameTable { entries })
    }

    /// Look up a command id's name, if the table has an entry for it.
    pub fn lookup(&self, cmd: u8) -> Option<&SoundName> {
        self.entries.get(&cmd)
    }

    /// Try `soundcmds.csv` next to `rom_path`, then in the current directory.
    pub fn discover(rom_path: impl AsRef<Path>) -> Option<Self> {
        let beside_rom = rom_path.as_ref().with_file_name("soundcmds.csv");
        if beside_rom.is_file() {
            if let Ok(table) = Self::load(&beside_rom) {
                return Some(table);
            }
        }
        let cwd = Path::new("soundcmds.csv");
        if cwd.is_file() {
            if let Ok(table) = Self::load(cwd) {
                return Some(table);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_decimal_and_hex_ids() {
        assert_eq!(parse_id("13"), Some(13));
        assert_eq!(parse_id("0x0D"), Some(0x0D));
        assert_eq!(parse_id("0b1010"), Some(0b1010));
        assert_eq!(parse_id("nope"), None);
    }

    #[test]
    fn loads_csv_and_skips_header() {
        let path = std::env::temp_dir().join(format!(
            "soundrom_core_names_test_{}.csv",
            std::process::id()
        ));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "id,subsystem,description").unwrap();
            writeln!(file, "0x0D,player,Food Eaten").unwrap();
        }

        let table = SoundNameTable::load(&path).unwrap();
        let entry = table.lookup(0x0D).unwrap();
        assert_eq!(entry.subsystem, "player");
        assert_eq!(entry.description, "Food Eaten");
        assert!(table.lookup(0x0E).is_none());

        std::fs::remove_file(&path).ok();
    }
}
