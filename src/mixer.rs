//! Mix & render engine (component G).
//!
//! Ties the resolver, interpreter and chip emulators together into finished
//! PCM. A type-7 command is resolved to its channel chain, each channel is
//! run through the interpreter independently, and the resulting event lists
//! are merged and stably sorted by time. The merged timeline is then walked
//! per chip group: between consecutive events of a chip's own kind, exactly
//! that many output samples are rendered before the event's register write
//! is applied. A type-11 command skips the interpreter entirely and decodes
//! its LPC bitstream directly.

use crate::chips::{lpc, FmChip, PolyChip};
use crate::config::RenderConfig;
use crate::error::{Result, SoundRomError};
use crate::interpreter::{Event, EventKind, Interpreter, DEFAULT_MAX_SECONDS_SFX};
use crate::resolver::{CommandInfo, HardwareChip};
use crate::rom::Rom;

/// Target peak amplitude when both chip groups contribute to the mix.
const DUAL_GROUP_PEAK: f32 = 16000.0;
/// Target peak amplitude when only a single chip group contributes.
const SINGLE_GROUP_PEAK: f32 = 29000.0;

/// Finished render output: either mono (polychip-only) or interleaved stereo.
pub struct RenderOutput {
    pub sample_rate: u32,
    pub channels: u8,
    pub samples: Vec<i16>,
}

/// Render a resolved command to PCM.
///
/// Speech commands (`is_speech`) bypass the interpreter and decode their LPC
/// bitstream directly at the chip's native 8 kHz. SFX/music commands resolve
/// their channel chain, run the interpreter per channel, and mix the result.
pub fn render_command(rom: &Rom, info: &CommandInfo, config: &RenderConfig) -> Result<RenderOutput> {
    if info.is_speech {
        return render_speech(rom, info, config);
    }
    render_channels(rom, info, config)
}

fn render_speech(rom: &Rom, info: &CommandInfo, _config: &RenderConfig) -> Result<RenderOutput> {
    let seq_ptr = info
        .seq_ptr
        .ok_or_else(|| SoundRomError::Config("speech command has no seq_ptr".into()))?;
    let seq_len = info.seq_len.unwrap_or(0);
    if seq_len == 0 {
        return Ok(RenderOutput {
            sample_rate: lpc::SAMPLE_RATE,
            channels: 1,
            samples: Vec::new(),
        });
    }
    let bitstream = rom.read_bytes(seq_ptr as u32, seq_len as usize)?;
    let samples = lpc::render(bitstream);
    Ok(RenderOutput {
        sample_rate: lpc::SAMPLE_RATE,
        channels: 1,
        samples,
    })
}

fn render_channels(rom: &Rom, info: &CommandInfo, config: &RenderConfig) -> Result<RenderOutput> {
    let sample_rate = config.sample_rate;
    let max_seconds = config.max_seconds.unwrap_or(DEFAULT_MAX_SECONDS_SFX);

    // Run the interpreter per channel, tagging each event stream with the
    // chip group it belongs to so the merged timeline can be re-split later.
    let mut poly_events: Vec<Event> = Vec::new();
    let mut fm_events: Vec<Event> = Vec::new();
    let mut max_time = 0.0f64;

    for ch in &info.channels {
        let (hardware, voice) = ch.hardware();
        let interp = Interpreter::new(rom, hardware, voice, max_seconds);
        let events = interp.run(ch.seq_ptr as u32)?;
        for e in &events {
            max_time = max_time.max(e.time);
        }
        match hardware {
            HardwareChip::Poly => poly_events.extend(events),
            HardwareChip::Fm => fm_events.extend(events),
        }
    }

    // Stable sort: concurrent events from different channels keep their
    // original channel-enumeration order, matching §4.2's chain-walk order.
    poly_events.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
    fm_events.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());

    // §8's worked render example ends the output 0.1s after the last event,
    // covering the release tail, and uses floor rather than ceil.
    let total_samples = ((max_time + 0.1) * sample_rate as f64).floor().max(0.0) as u32;

    let have_poly = poly_events
        .iter()
        .any(|e| !matches!(e.kind, EventKind::End));
    let have_fm = fm_events.iter().any(|e| !matches!(e.kind, EventKind::End));

    let poly_buf = if have_poly {
        render_poly_track(sample_rate, &poly_events, total_samples)
    } else {
        Vec::new()
    };
    let (fm_l, fm_r) = if have_fm {
        render_fm_track(sample_rate, &fm_events, total_samples)
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(mix_down(poly_buf, fm_l, fm_r, have_poly, have_fm, sample_rate))
}

fn render_poly_track(sample_rate: u32, events: &[Event], total_samples: u32) -> Vec<f32> {
    let mut chip = PolyChip::new(sample_rate);
    let mut out = Vec::with_capacity(total_samples as usize);
    let mut cursor = 0u32;

    for e in events {
        let pos = ((e.time * sample_rate as f64).round() as u32).min(total_samples);
        if pos > cursor {
            out.extend(chip.render_samples(pos - cursor));
            cursor = pos;
        }
        match e.kind {
            EventKind::PolyNoteOn { voice, audf, audc } => chip.note_on(voice, audf, audc),
            EventKind::PolyNoteOff { voice } => chip.note_off(voice),
            EventKind::PolyAudCtl { value } => chip.set_audctl(value),
            _ => {}
        }
    }
    if total_samples > cursor {
        out.extend(chip.render_samples(total_samples - cursor));
    }
    out
}

fn render_fm_track(sample_rate: u32, events: &[Event], total_samples: u32) -> (Vec<f32>, Vec<f32>) {
    let mut chip = FmChip::new(sample_rate);
    let mut out_l = Vec::with_capacity(total_samples as usize);
    let mut out_r = Vec::with_capacity(total_samples as usize);
    let mut cursor = 0u32;

    for e in events {
        let pos = ((e.time * sample_rate as f64).round() as u32).min(total_samples);
        if pos > cursor {
            let (l, r) = chip.render_samples(pos - cursor);
            out_l.extend(l);
            out_r.extend(r);
            cursor = pos;
        }
        match e.kind {
            EventKind::FmRegWrite { reg, value } => chip.write_reg(reg, value),
            EventKind::FmNoteOn { channel } => chip.key_on(channel),
            EventKind::FmNoteOff { channel } => chip.key_off(channel),
            _ => {}
        }
    }
    if total_samples > cursor {
        let (l, r) = chip.render_samples(total_samples - cursor);
        out_l.extend(l);
        out_r.extend(r);
    }
    (out_l, out_r)
}

fn peak_abs(buf: &[f32]) -> f32 {
    buf.iter().fold(0.0f32, |m, &s| m.max(s.abs()))
}

fn mix_down(
    poly: Vec<f32>,
    fm_l: Vec<f32>,
    fm_r: Vec<f32>,
    have_poly: bool,
    have_fm: bool,
    sample_rate: u32,
) -> RenderOutput {
    let poly_peak = peak_abs(&poly);
    let fm_peak = peak_abs(&fm_l).max(peak_abs(&fm_r));

    let target = if have_poly && have_fm {
        DUAL_GROUP_PEAK
    } else {
        SINGLE_GROUP_PEAK
    };
    let poly_scale = if poly_peak > 0.0 { target / poly_peak } else { 0.0 };
    let fm_scale = if fm_peak > 0.0 { target / fm_peak } else { 0.0 };

    if have_fm {
        let n = poly.len().max(fm_l.len());
        let mut samples = Vec::with_capacity(n * 2);
        for i in 0..n {
            let p = poly.get(i).copied().unwrap_or(0.0) * poly_scale;
            let l = p + fm_l.get(i).copied().unwrap_or(0.0) * fm_scale;
            let r = p + fm_r.get(i).copied().unwrap_or(0.0) * fm_scale;
            samples.push(l.clamp(-32768.0, 32767.0) as i16);
            samples.push(r.clamp(-32768.0, 32767.0) as i16);
        }
        RenderOutput {
            sample_rate,
            channels: 2,
            samples,
        }
    } else {
        let samples = poly
            .iter()
            .map(|&p| (p * poly_scale).clamp(-32768.0, 32767.0) as i16)
            .collect();
        RenderOutput {
            sample_rate,
            channels: 1,
            samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve_command;

    fn rom_with_silent_command() -> Rom {
        // A 48 KiB ROM image with every dispatch/chain table zeroed: command 0
        // resolves to handler type 0 (unrenderable), exercising the "no
        // channels at all" path without needing a real bytecode stream.
        let data = vec![0u8; crate::rom::ROM_SIZE];
        Rom::new(data)
    }

    #[test]
    fn unresolvable_command_renders_silence() {
        let rom = rom_with_silent_command();
        let info = resolve_command(&rom, 0).unwrap().unwrap();
        let config = RenderConfig::default();
        let out = render_command(&rom, &info, &config).unwrap();
        assert!(out.samples.is_empty() || out.samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn silent_poly_and_fm_tracks_mix_to_empty() {
        let poly = Vec::new();
        let fm_l = Vec::new();
        let fm_r = Vec::new();
        let out = mix_down(poly, fm_l, fm_r, false, false, 44_100);
        assert_eq!(out.channels, 1);
        assert!(out.samples.is_empty());
    }

    #[test]
    fn dual_group_mix_is_stereo_and_scaled_to_target_peak() {
        let poly = vec![1.0f32, -1.0, 0.5];
        let fm_l = vec![2.0f32, -2.0, 1.0];
        let fm_r = vec![2.0f32, -2.0, 1.0];
        let out = mix_down(poly, fm_l, fm_r, true, true, 44_100);
        assert_eq!(out.channels, 2);
        assert_eq!(out.samples.len(), 6);
        let peak = out.samples.iter().map(|&s| (s as i32).abs()).max().unwrap();
        assert!(peak <= 16000 && peak > 15000);
    }

    #[test]
    fn single_group_mix_scales_to_larger_target_peak() {
        let poly = vec![1.0f32, -1.0];
        let out = mix_down(poly, Vec::new(), Vec::new(), true, false, 44_100);
        assert_eq!(out.channels, 1);
        let peak = out.samples.iter().map(|&s| (s as i32).abs()).max().unwrap();
        assert!(peak <= 29000 && peak > 28000);
    }
}
