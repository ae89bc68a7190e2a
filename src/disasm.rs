//! Plain-text disassembler and score/tracker view (component disasm).
//!
//! `disassemble` walks one voice's bytecode the same way the interpreter
//! does (following `PUSH_SEQ`/`CHAIN`/`SET_SEQ_PTR`), but renders the walk as
//! a human-readable listing with segment-entry/return/loop marker lines
//! instead of executing it. `score` builds a columnar tracker view across a
//! whole command's channel chain.

use crate::error::Result;
use crate::interpreter::opcodes::{lookup, ArgFormat};
use crate::resolver::CommandInfo;
use crate::rom::{Rom, ROM_BASE, ROM_END};
use crate::tables::{duration_abbrev, midi_note_name, rom_note_to_midi, DURATION_NAMES};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Safety cap on total instructions disassembled for one voice.
const MAX_INSTRUCTIONS: usize = 1024;

/// Disassemble one voice's bytecode stream starting at `start_addr`.
///
/// Returns a multi-line listing: one line per instruction, plus marker lines
/// for segment entry, loop detection, and out-of-range jumps.
pub fn disassemble(rom: &Rom, start_addr: u32) -> Result<String> {
    let mut out = String::new();
    let mut return_stack: Vec<u32> = Vec::new();
    let mut visited_segments: HashSet<u32> = HashSet::from([start_addr]);
    let mut visited_addrs: HashSet<u32> = HashSet::new();
    let mut addr = start_addr;
    let mut total = 0usize;

    while total < MAX_INSTRUCTIONS {
        if !(ROM_BASE..ROM_END).contains(&addr) {
            writeln!(out, "; --- out of ROM range @ ${addr:04X} ---").ok();
            break;
        }
        if visited_addrs.contains(&addr) {
            writeln!(out, "; --- loop to ${addr:04X} (already shown) ---").ok();
            break;
        }
        visited_addrs.insert(addr);

        let Ok(byte0) = rom.read_u8(addr) else {
            writeln!(out, "; --- read error @ ${addr:04X} ---").ok();
            break;
        };
        total += 1;

        if byte0 >= 0xBB {
            writeln!(out, "${addr:04X}  END          ${byte0:02X}").ok();
            break;
        }

        if byte0 <= 0x7F {
            let Ok(byte1) = rom.read_u8(addr + 1) else {
                writeln!(out, "${addr:04X}  NOTE?        ${byte0:02X}  ; truncated").ok();
                break;
            };
            if byte1 == 0x00 {
                if let Some(ret_addr) = return_stack.pop() {
                    writeln!(out, "${addr:04X}  CHAIN             ; return to ${ret_addr:04X}").ok();
                    writeln!(out, "; --- returning to ${ret_addr:04X} ---").ok();
                    addr = ret_addr;
                    continue;
                } else {
                    writeln!(out, "${addr:04X}  CHAIN             ; end of sequence").ok();
                    break;
                }
            }
            writeln!(out, "{}", format_note(addr, byte0, byte1)).ok();
            addr += 2;
            continue;
        }

        let Some(def) = lookup(byte0) else {
            writeln!(out, "${addr:04X}  ??? ${byte0:02X}         ; unknown opcode").ok();
            addr += 2;
            continue;
        };

        let nargs = def.fmt.len();
        let mut args = Vec::with_capacity(nargs);
        for i in 0..nargs {
            match rom.read_u8(addr + 1 + i as u32) {
                Ok(b) => args.push(b),
                Err(_) => break,
            }
        }

        writeln!(out, "{}", format_opcode(addr, byte0, def.name, &args, def.fmt)).ok();

        if byte0 == 0x8D && args.len() >= 2 {
            let target = args[0] as u32 | ((args[1] as u32) << 8);
            let ret_addr = addr + 3;
            if !(ROM_BASE..ROM_END).contains(&target) {
                writeln!(out, "; --- segment @ ${target:04X} (outside ROM) ---").ok();
                addr = ret_addr;
            } else if visited_segments.contains(&target) {
                writeln!(out, "; --- segment @ ${target:04X} (already shown above) ---").ok();
                addr = ret_addr;
            } else {
                visited_segments.insert(target);
                return_stack.push(ret_addr);
                writeln!(out, "; --- entering segment @ ${target:04X} ---").ok();
                addr = target;
            }
            continue;
        }

        if byte0 == 0x99 && args.len() >= 2 {
            let target = args[0] as u32 | ((args[1] as u32) << 8);
            if !(ROM_BASE..ROM_END).contains(&target) {
                writeln!(out, "; --- jump to ${target:04X} (outside ROM) ---").ok();
                break;
            }
            if visited_segments.contains(&target) {
                writeln!(out, "; --- jump to ${target:04X} (already shown above) ---").ok();
                break;
            }
            visited_segments.insert(target);
            addr = target;
            continue;
        }

        addr += 1 + nargs as u32;
    }

    Ok(out)
}

fn format_note(addr: u32, byte0: u8, byte1: u8) -> String {
    let dur_idx = byte1 & 0x0F;
    let dotted = byte1 & 0x40 != 0;
    let sustain = byte1 & 0x80 != 0;
    let dur_name = DURATION_NAMES
        .get(dur_idx as usize)
        .copied()
        .unwrap_or("?");

    let mut flags = Vec::new();
    if dotted {
        flags.push("dotted");
    }
    if sustain {
        flags.push("sustain");
    }
    let flag_str = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };

    let mnemonic = if byte0 == 0 { "REST" } else { "NOTE" };
    let pitch = rom_note_to_midi(byte0).map(midi_note_name);
    let operands = match pitch {
        Some(p) => format!("{p} (${byte0:02X}), {dur_name}"),
        None => format!("${byte0:02X}, {dur_name}"),
    };
    format!("${addr:04X}  {mnemonic:<12} {operands}{flag_str}")
}

fn format_opcode(addr: u32, byte0: u8, name: &str, args: &[u8], fmt: ArgFormat) -> String {
    let operands = match fmt {
        ArgFormat::Byte if !args.is_empty() => format!("${:02X}", args[0]),
        ArgFormat::ByteByte if args.len() >= 2 => format!("${:02X}, ${:02X}", args[0], args[1]),
        ArgFormat::Word if args.len() >= 2 => {
            let word = args[0] as u32 | ((args[1] as u32) << 8);
            format!("${word:04X}")
        }
        ArgFormat::ByteWord if args.len() >= 3 => {
            let word = args[1] as u32 | ((args[2] as u32) << 8);
            format!("${:02X}, ${word:04X}", args[0])
        }
        _ => String::new(),
    };

    let comment = match (byte0, fmt) {
        (0x99, ArgFormat::Word) if args.len() >= 2 => {
            let word = args[0] as u32 | ((args[1] as u32) << 8);
            let dir = if word <= addr { "LOOP" } else { "jump" };
            format!("  ; {dir} -> ${word:04X}")
        }
        (0x8D, ArgFormat::Word) if args.len() >= 2 => {
            let word = args[0] as u32 | ((args[1] as u32) << 8);
            format!("  ; call -> ${word:04X}")
        }
        (0x86 | 0x87 | 0x9D, ArgFormat::Word) if args.len() >= 2 => {
            let word = args[0] as u32 | ((args[1] as u32) << 8);
            format!("  ; -> ${word:04X}")
        }
        (0xAE | 0xAF, ArgFormat::ByteWord) if args.len() >= 3 => {
            let word = args[1] as u32 | ((args[2] as u32) << 8);
            let dir = if word <= addr { "back" } else { "fwd" };
            format!("  ; {dir} -> ${word:04X}")
        }
        _ => String::new(),
    };

    format!("${addr:04X}  {name:<12} {operands}{comment}")
}

struct NoteSpan {
    time: f64,
    duration: f64,
    pitch: Option<String>,
    abbrev: String,
    is_rest: bool,
    sustain: bool,
}

/// Walk one voice's bytecode building a list of timed note/rest spans, the
/// same way [`crate::interpreter`] computes durations, but without touching
/// any chip. Used only for the textual score view.
fn channel_timeline(rom: &Rom, start_addr: u32) -> Vec<NoteSpan> {
    let mut spans = Vec::new();
    let mut return_stack: Vec<u32> = Vec::new();
    let mut visited: HashSet<u32> = HashSet::new();
    let mut addr = start_addr;
    let mut tempo: u8 = 0;
    let mut cumulative_frames = 0.0f64;
    let mut total = 0usize;

    while total < MAX_INSTRUCTIONS {
        if !(ROM_BASE..ROM_END).contains(&addr) || visited.contains(&addr) {
            break;
        }
        visited.insert(addr);
        let Ok(byte0) = rom.read_u8(addr) else {
            break;
        };
        total += 1;

        if byte0 >= 0xBB {
            break;
        }

        if byte0 <= 0x7F {
            let Ok(byte1) = rom.read_u8(addr + 1) else {
                break;
            };
            if byte1 == 0 {
                match return_stack.pop() {
                    Some(ret) => {
                        addr = ret;
                        continue;
                    }
                    None => break,
                }
            }
            let dur_idx = byte1 & 0x0F;
            let dotted = byte1 & 0x40 != 0;
            let sustain = byte1 & 0x80 != 0;
            let base = if dur_idx == 0 {
                0u16
            } else {
                rom.read_u16_le(crate::tables::DURATION_TABLE_ADDR + dur_idx as u32 * 2)
                    .unwrap_or(0)
            };
            let dur_value = if dotted { base as f64 * 1.5 } else { base as f64 };
            let dur_frames = if tempo > 0 && dur_value > 0.0 {
                dur_value / tempo as f64
            } else {
                0.0
            };

            let mut abbrev = duration_abbrev(dur_idx).to_string();
            if sustain {
                abbrev.push_str("sus");
            }

            spans.push(NoteSpan {
                time: cumulative_frames / 120.0,
                duration: dur_frames / 120.0,
                pitch: rom_note_to_midi(byte0).map(midi_note_name),
                abbrev,
                is_rest: byte0 == 0,
                sustain,
            });

            cumulative_frames += dur_frames;
            addr += 2;
            continue;
        }

        let Some(def) = lookup(byte0) else {
            addr += 2;
            continue;
        };
        let nargs = def.fmt.len();
        let mut args = Vec::with_capacity(nargs);
        for i in 0..nargs {
            match rom.read_u8(addr + 1 + i as u32) {
                Ok(b) => args.push(b),
                Err(_) => break,
            }
        }

        match byte0 {
            0x80 if !args.is_empty() => tempo = args[0] >> 2,
            0x81 if !args.is_empty() => tempo = tempo.wrapping_add(args[0]),
            0x8D if args.len() >= 2 => {
                let target = args[0] as u32 | ((args[1] as u32) << 8);
                return_stack.push(addr + 3);
                addr = target;
                continue;
            }
            0x99 if args.len() >= 2 => {
                let target = args[0] as u32 | ((args[1] as u32) << 8);
                addr = target;
                continue;
            }
            _ => {}
        }

        addr += 1 + nargs as u32;
    }

    spans
}

/// Build a columnar score/tracker view across a command's channel chain.
pub fn score(rom: &Rom, info: &CommandInfo) -> String {
    let timelines: Vec<Vec<NoteSpan>> = info
        .channels
        .iter()
        .map(|ch| channel_timeline(rom, ch.seq_ptr as u32))
        .collect();

    if timelines.iter().all(|tl| tl.is_empty()) {
        return String::from("(no channel activity)\n");
    }

    let song_end = timelines
        .iter()
        .flat_map(|tl| tl.iter())
        .map(|s| s.time + s.duration)
        .fold(0.0f64, f64::max);

    let mut all_times: Vec<f64> = timelines
        .iter()
        .flat_map(|tl| tl.iter().map(|s| (s.time * 10_000.0).round() / 10_000.0))
        .collect();
    all_times.sort_by(|a, b| a.partial_cmp(b).unwrap());
    all_times.dedup();

    const COL_W: usize = 12;
    let mut out = String::new();
    write!(out, "{:>8} |", "Time").ok();
    for i in 0..timelines.len() {
        write!(out, " {:<w$}|", format!("Ch{}", i + 1), w = COL_W).ok();
    }
    out.push('\n');
    write!(out, "---------+").ok();
    for _ in 0..timelines.len() {
        write!(out, "{}+", "-".repeat(COL_W + 1)).ok();
    }
    out.push('\n');

    for &t in &all_times {
        write!(out, "{t:7.2}s |").ok();
        for tl in &timelines {
            let cell = render_cell(tl, t, song_end);
            write!(out, " {cell:<w$}|", w = COL_W).ok();
        }
        out.push('\n');
    }

    out
}

fn render_cell(tl: &[NoteSpan], t: f64, song_end: f64) -> String {
    let note_spans: Vec<&NoteSpan> = tl.iter().filter(|s| !s.is_rest).collect();
    for s in tl {
        let start = (s.time * 10_000.0).round() / 10_000.0;
        if (start - t).abs() < 1e-6 {
            return if s.is_rest {
                format!("--- {}", s.abbrev)
            } else {
                format!("{:<4}{}", s.pitch.clone().unwrap_or_default(), s.abbrev)
            };
        }
        if s.sustain && start < t {
            let pos = note_spans.iter().position(|n| std::ptr::eq(*n, s));
            let eff_end = match pos.and_then(|p| note_spans.get(p + 1)) {
                Some(next) => next.time,
                None => song_end,
            };
            if t < eff_end {
                return "  |".to_string();
            }
        }
    }
    "  .".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::Rom;
    use crate::tables::DURATION_TABLE_ADDR;

    fn blank_rom() -> Rom {
        Rom::new(vec![0u8; crate::rom::ROM_SIZE])
    }

    #[test]
    fn disassemble_end_byte_emits_single_line() {
        let mut data = vec![0u8; crate::rom::ROM_SIZE];
        data[0] = 0xFF; // 0x4000 -> END
        let rom = Rom::new(data);
        let text = disassemble(&rom, 0x4000).unwrap();
        assert!(text.contains("END"));
    }

    #[test]
    fn disassemble_chain_with_empty_stack_ends() {
        let mut data = vec![0u8; crate::rom::ROM_SIZE];
        data[0] = 0x00;
        data[1] = 0x00; // CHAIN, empty return stack
        let rom = Rom::new(data);
        let text = disassemble(&rom, 0x4000).unwrap();
        assert!(text.contains("CHAIN"));
        assert!(text.contains("end of sequence"));
    }

    #[test]
    fn disassemble_note_shows_pitch_and_duration() {
        let mut data = vec![0u8; crate::rom::ROM_SIZE];
        data[0] = 0x46; // A4
        data[1] = 0x03; // quarter note, no flags
        data[2] = 0xFF; // END
        let rom = Rom::new(data);
        let text = disassemble(&rom, 0x4000).unwrap();
        assert!(text.contains("NOTE"));
        assert!(text.contains("quarter"));
    }

    #[test]
    fn score_with_no_channels_reports_no_activity() {
        let rom = blank_rom();
        let info = crate::resolver::CommandInfo {
            cmd: 0,
            handler_type: 7,
            param: 0,
            has_sequence: false,
            is_speech: false,
            channels: Vec::new(),
            speech_index: None,
            seq_ptr: None,
            seq_len: None,
        };
        let text = score(&rom, &info);
        assert!(text.contains("no channel activity"));
    }

    #[test]
    fn score_renders_a_note_column() {
        let mut data = vec![0u8; crate::rom::ROM_SIZE];
        // tempo, then a note, then END
        let dur_idx = 3u8; // quarter
        let base = 48u16;
        let dur_addr = (DURATION_TABLE_ADDR - 0x4000 + dur_idx as u32 * 2) as usize;
        data[dur_addr] = (base & 0xFF) as u8;
        data[dur_addr + 1] = (base >> 8) as u8;
        data[0] = 0x80; // SET_TEMPO
        data[1] = 0x10;
        data[2] = 0x46; // A4
        data[3] = dur_idx;
        data[4] = 0xFF; // END
        let rom = Rom::new(data);
        let info = crate::resolver::CommandInfo {
            cmd: 0,
            handler_type: 7,
            param: 0,
            has_sequence: true,
            is_speech: false,
            channels: vec![crate::resolver::ChannelInfo {
                offset: 0,
                priority: 0,
                channel: 0,
                seq_ptr: 0x4000,
            }],
            speech_index: None,
            seq_ptr: None,
            seq_len: None,
        };
        let text = score(&rom, &info);
        assert!(text.contains("A4"));
    }
}
