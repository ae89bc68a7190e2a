//! Command resolver (component B).
//!
//! Walks the two top-level dispatch tables and, for the two renderable
//! handler types, the per-type chain/index tables, to enumerate the voices
//! that make up a command. Never fails outright: a command that cannot be
//! resolved to renderable data comes back with `has_sequence == false`.

use crate::error::Result;
use crate::rom::Rom;
use crate::tables::*;

/// One hardware voice participating in a type-7 (SFX) command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Offset into the SFX tables this channel was resolved from.
    pub offset: u8,
    /// Playback priority (higher wins contention on real hardware).
    pub priority: u8,
    /// Hardware channel: 0x00..0x03 = polychip, 0x04.. = FM (see [`HardwareChip`]).
    pub channel: u8,
    /// ROM address of this channel's bytecode stream.
    pub seq_ptr: u16,
}

/// Which chip a hardware channel number belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareChip {
    /// Polynomial-noise chip, voices 0-3.
    Poly,
    /// FM chip, voices 0-7 (voice numbers 0x0C+ clamp to voice 7).
    Fm,
}

impl ChannelInfo {
    /// Classify this channel's hardware and its voice index within that chip.
    pub fn hardware(&self) -> (HardwareChip, u8) {
        if self.channel <= 0x03 {
            (HardwareChip::Poly, self.channel)
        } else {
            let voice = (self.channel - 0x04).min(7);
            (HardwareChip::Fm, voice)
        }
    }
}

/// Resolved information for a single command id.
#[derive(Debug, Clone)]
pub struct CommandInfo {
    /// The command id this descriptor was resolved for.
    pub cmd: u8,
    /// Raw handler type byte (0-14, or 0xFF).
    pub handler_type: u8,
    /// Raw handler parameter byte.
    pub param: u8,
    /// True for handler types 7 and 11, the only renderable kinds.
    pub has_sequence: bool,
    /// True for handler type 11 (LPC speech), false for type 7 (SFX/music).
    pub is_speech: bool,
    /// Populated for type-7 commands: every channel in the next-offset chain.
    pub channels: Vec<ChannelInfo>,
    /// Populated for type-11 commands: the speech index this param mapped to.
    pub speech_index: Option<u8>,
    /// Populated for type-11 commands: ROM address of the LPC bitstream.
    pub seq_ptr: Option<u16>,
    /// Populated for type-11 commands: declared length of the LPC bitstream.
    pub seq_len: Option<u16>,
}

impl CommandInfo {
    /// Name of the handler type, for display purposes.
    pub fn type_name(&self) -> &'static str {
        handler_type_name(self.handler_type)
    }
}

/// Resolve command `cmd` to its handler descriptor.
///
/// Returns `Ok(None)` for `cmd >= MAX_COMMANDS` rather than an error: an
/// out-of-range command id is a caller mistake, not a ROM-read failure, and
/// [§4.2] of the design specifies this resolver "never throws".
pub fn resolve_command(rom: &Rom, cmd: u8) -> Result<Option<CommandInfo>> {
    if cmd as usize >= MAX_COMMANDS {
        return Ok(None);
    }

    let handler_type = rom.read_u8(DISPATCH_TYPE_TABLE + cmd as u32)?;
    let param = rom.read_u8(DISPATCH_PARAM_TABLE + cmd as u32)?;

    let mut info = CommandInfo {
        cmd,
        handler_type,
        param,
        has_sequence: false,
        is_speech: false,
        channels: Vec::new(),
        speech_index: None,
        seq_ptr: None,
        seq_len: None,
    };

    match handler_type {
        7 => {
            let offset = rom.read_u8(SFX_OFFSET_TABLE + param as u32)?;
            let mut channels = Vec::new();
            let mut seen = std::collections::HashSet::new();
            let mut cur = offset;
            while cur != 0 && seen.insert(cur) && channels.len() < MAX_CHANNEL_CHAIN {
                let priority = rom.read_u8(SFX_PRIORITY_TABLE + cur as u32)?;
                let channel = rom.read_u8(SFX_CHANNEL_TABLE + cur as u32)?;
                let seq_ptr = rom.read_u16_le(SFX_SEQ_PTR_TABLE + cur as u32 * 2)?;
                channels.push(ChannelInfo {
                    offset: cur,
                    priority,
                    channel,
                    seq_ptr,
                });
                cur = rom.read_u8(SFX_NEXT_TABLE + cur as u32)?;
            }
            info.has_sequence = !channels.is_empty();
            info.channels = channels;
        }
        11 => {
            let index = rom.read_u8(MUSIC_INDEX_TABLE + param as u32)?;
            let seq_ptr = rom.read_u16_le(MUSIC_SEQ_PTR_TABLE + index as u32 * 2)?;
            let seq_len = rom.read_u16_le(MUSIC_SEQ_LEN_TABLE + index as u32 * 2)?;
            info.speech_index = Some(index);
            info.seq_ptr = Some(seq_ptr);
            info.seq_len = Some(seq_len);
            info.has_sequence = seq_len > 0;
            info.is_speech = true;
        }
        _ => {}
    }

    Ok(info).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal ROM with a single type-7 command whose chain is one
    /// channel long, wired up by hand at the fixed table offsets.
    fn rom_with_one_sfx_command() -> Rom {
        let mut data = vec![0u8; crate::rom::ROM_SIZE];
        let set = |data: &mut Vec<u8>, addr: u32, val: u8| {
            data[(addr - crate::rom::ROM_BASE) as usize] = val;
        };
        let set16 = |data: &mut Vec<u8>, addr: u32, val: u16| {
            let off = (addr - crate::rom::ROM_BASE) as usize;
            let bytes = val.to_le_bytes();
            data[off] = bytes[0];
            data[off + 1] = bytes[1];
        };

        set(&mut data, DISPATCH_TYPE_TABLE + 0x0D, 7);
        set(&mut data, DISPATCH_PARAM_TABLE + 0x0D, 0x05);
        set(&mut data, SFX_OFFSET_TABLE + 0x05, 0x20);
        set(&mut data, SFX_PRIORITY_TABLE + 0x20, 9);
        set(&mut data, SFX_CHANNEL_TABLE + 0x20, 0x01);
        set16(&mut data, SFX_SEQ_PTR_TABLE + 0x20 * 2, 0x7234);
        set(&mut data, SFX_NEXT_TABLE + 0x20, 0);

        Rom::new(data)
    }

    #[test]
    fn resolves_sfx_command_with_single_channel() {
        let rom = rom_with_one_sfx_command();
        let info = resolve_command(&rom, 0x0D).unwrap().unwrap();
        assert_eq!(info.handler_type, 7);
        assert!(info.has_sequence);
        assert!(!info.is_speech);
        assert_eq!(info.channels.len(), 1);
        let ch = info.channels[0];
        assert_eq!(ch.priority, 9);
        assert_eq!(ch.channel, 0x01);
        assert_eq!(ch.seq_ptr, 0x7234);
        assert_eq!(ch.hardware().0, HardwareChip::Poly);
    }

    #[test]
    fn out_of_range_command_returns_none() {
        let rom = Rom::new(vec![0u8; crate::rom::ROM_SIZE]);
        assert!(resolve_command(&rom, 255).unwrap().is_none());
    }

    #[test]
    fn non_renderable_handler_type_has_no_sequence() {
        let rom = Rom::new(vec![0u8; crate::rom::ROM_SIZE]);
        // handler_type/param default to 0 ("Parameter Shift") for command 0.
        let info = resolve_command(&rom, 0).unwrap().unwrap();
        assert!(!info.has_sequence);
        assert!(info.channels.is_empty());
    }

    #[test]
    fn channel_chain_detects_cycle() {
        let mut data = vec![0u8; crate::rom::ROM_SIZE];
        let set = |data: &mut Vec<u8>, addr: u32, val: u8| {
            data[(addr - crate::rom::ROM_BASE) as usize] = val;
        };
        data[(DISPATCH_TYPE_TABLE - crate::rom::ROM_BASE) as usize] = 7;
        data[(DISPATCH_PARAM_TABLE - crate::rom::ROM_BASE) as usize] = 0;
        set(&mut data, SFX_OFFSET_TABLE, 0x01);
        // 0x01 -> next 0x02, 0x02 -> next 0x01: an immediate cycle.
        set(&mut data, SFX_NEXT_TABLE + 1, 0x02);
        set(&mut data, SFX_NEXT_TABLE + 2, 0x01);
        let rom = Rom::new(data);
        let info = resolve_command(&rom, 0).unwrap().unwrap();
        assert_eq!(info.channels.len(), 2);
    }

    #[test]
    fn fm_channel_clamps_to_voice_seven() {
        let mut data = vec![0u8; crate::rom::ROM_SIZE];
        let set = |data: &mut Vec<u8>, addr: u32, val: u8| {
            data[(addr - crate::rom::ROM_BASE) as usize] = val;
        };
        set(&mut data, DISPATCH_TYPE_TABLE, 7);
        set(&mut data, DISPATCH_PARAM_TABLE, 0);
        set(&mut data, SFX_OFFSET_TABLE, 0x10);
        set(&mut data, SFX_CHANNEL_TABLE + 0x10, 0x20);
        let rom = Rom::new(data);
        let info = resolve_command(&rom, 0).unwrap().unwrap();
        let (chip, voice) = info.channels[0].hardware();
        assert_eq!(chip, HardwareChip::Fm);
        assert_eq!(voice, 7);
    }

    #[test]
    fn resolves_speech_command() {
        let mut data = vec![0u8; crate::rom::ROM_SIZE];
        let set = |data: &mut Vec<u8>, addr: u32, val: u8| {
            data[(addr - crate::rom::ROM_BASE) as usize] = val;
        };
        let set16 = |data: &mut Vec<u8>, addr: u32, val: u16| {
            let off = (addr - crate::rom::ROM_BASE) as usize;
            let bytes = val.to_le_bytes();
            data[off] = bytes[0];
            data[off + 1] = bytes[1];
        };
        set(&mut data, DISPATCH_TYPE_TABLE + 0x5A, 11);
        set(&mut data, DISPATCH_PARAM_TABLE + 0x5A, 0x03);
        set(&mut data, MUSIC_INDEX_TABLE + 0x03, 0x07);
        set16(&mut data, MUSIC_SEQ_PTR_TABLE + 0x07 * 2, 0x9000);
        set16(&mut data, MUSIC_SEQ_LEN_TABLE + 0x07 * 2, 512);
        let rom = Rom::new(data);
        let info = resolve_command(&rom, 0x5A).unwrap().unwrap();
        assert!(info.is_speech);
        assert!(info.has_sequence);
        assert_eq!(info.seq_ptr, Some(0x9000));
        assert_eq!(info.seq_len, Some(512));
    }

    #[test]
    fn zero_length_speech_is_not_renderable() {
        let mut data = vec![0u8; crate::rom::ROM_SIZE];
        let set = |data: &mut Vec<u8>, addr: u32, val: u8| {
            data[(addr - crate::rom::ROM_BASE) as usize] = val;
        };
        set(&mut data, DISPATCH_TYPE_TABLE, 11);
        set(&mut data, DISPATCH_PARAM_TABLE, 0);
        let rom = Rom::new(data);
        let info = resolve_command(&rom, 0).unwrap().unwrap();
        assert!(info.is_speech);
        assert!(!info.has_sequence);
    }
}
