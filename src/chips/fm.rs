//! 8-channel, 4-operator FM synthesis chip (component E).
//!
//! A design-faithful approximation of a YM2151-class chip: fixed-point
//! linearization of the envelope/attenuation path rather than the original
//! log/exp hardware tables. Tests assert shape (frequency, envelope timing)
//! rather than bit-exact samples — the chip is not meant to reproduce the
//! original silicon sample-for-sample.

/// Native internal sample rate the operators are stepped at, before
/// resampling to the host rate.
const NATIVE_RATE: f64 = 55_466.0;
/// 128-point sine lookup table, linearly interpolated across the 1024-unit phase range.
const SINE_TABLE_LEN: usize = 128;
/// Attenuation table covers 0.0-96.0 dB in tenths of a dB, plus a silent sentinel beyond.
const ATTEN_TABLE_LEN: usize = 961;

/// Hardware slot offset for each of the four operators, in program order `M1, M2, C1, C2`.
const SLOT_OFFSETS: [u8; 4] = [0, 16, 8, 24];
const OPERATOR_REG_BASES: [u8; 6] = [0x40, 0x60, 0x80, 0xA0, 0xC0, 0xE0];

/// Coarse detune table, cents, indexed by the 2-bit DT2 field.
const DT2_CENTS: [f64; 4] = [0.0, 600.0, 781.0, 950.0];
/// Fine detune table, cents, indexed by the 3-bit DT1 magnitude (sign from bit 2).
const DT1_CENTS: [f64; 8] = [0.0, 7.0, 14.0, 20.0, 0.0, -7.0, -14.0, -20.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EgPhase {
    Attack,
    Decay1,
    Decay2,
    Release,
}

#[derive(Debug, Clone, Copy)]
struct Operator {
    phase: f64,
    total_level: u8,
    ar: u8,
    d1r: u8,
    d2r: u8,
    rr: u8,
    d1l: u8,
    ks: u8,
    mul: u8,
    dt1: u8,
    dt2: u8,
    eg_phase: EgPhase,
    eg_level: u16,
    eg_counter: u32,
    prev_out: [f64; 2],
    key_on: bool,
}

impl Default for Operator {
    fn default() -> Self {
        Operator {
            phase: 0.0,
            total_level: 127,
            ar: 0,
            d1r: 0,
            d2r: 0,
            rr: 0,
            d1l: 0,
            ks: 0,
            mul: 1,
            dt1: 0,
            dt2: 0,
            eg_phase: EgPhase::Release,
            eg_level: 1023,
            eg_counter: 0,
            prev_out: [0.0, 0.0],
            key_on: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    operators: [Operator; 4],
    kc: u8,
    kf: u8,
    fb: u8,
    con: u8,
    pan_l: bool,
    pan_r: bool,
}

/// 8-channel, 4-operator FM synthesis chip.
pub struct FmChip {
    channels: [Channel; 8],
    sine_table: Vec<f64>,
    atten_table: Vec<f64>,
    sample_buffer_l: Vec<f32>,
    sample_buffer_r: Vec<f32>,
    sample_phase: u64,
    output_sample_rate: u32,
}

impl FmChip {
    /// Build a chip with all channels silent, resampling to `output_sample_rate`.
    pub fn new(output_sample_rate: u32) -> Self {
        let sine_table = (0..SINE_TABLE_LEN)
            .map(|i| (2.0 * std::f64::consts::PI * i as f64 / SINE_TABLE_LEN as f64).sin())
            .collect();
        let atten_table = (0..ATTEN_TABLE_LEN)
            .map(|i| 10f64.powf(-(i as f64) / 200.0))
            .collect();
        FmChip {
            channels: [Channel::default(); 8],
            sine_table,
            atten_table,
            sample_buffer_l: Vec::new(),
            sample_buffer_r: Vec::new(),
            sample_phase: 0,
            output_sample_rate,
        }
    }

    /// Decode and apply a raw FM register write.
    pub fn write_reg(&mut self, reg: u8, value: u8) {
        if reg == 0x08 {
            let channel = (value & 0x07) as usize;
            for slot in 0..4 {
                let bit = (value >> (3 + slot)) & 1;
                let op = &mut self.channels[channel].operators[slot as usize];
                if bit != 0 {
                    op.key_on = true;
                    op.phase = 0.0;
                    op.eg_phase = EgPhase::Attack;
                } else if op.key_on {
                    op.key_on = false;
                    op.eg_phase = EgPhase::Release;
                }
            }
            return;
        }
        if (0x20..0x28).contains(&reg) {
            let ch = &mut self.channels[(reg - 0x20) as usize];
            // value packed by the interpreter as 0xC0 | (fb<<3) | con
            ch.con = value & 0x07;
            ch.fb = (value >> 3) & 0x07;
            ch.pan_l = value & 0x40 != 0;
            ch.pan_r = value & 0x80 != 0;
            return;
        }
        if (0x28..0x30).contains(&reg) {
            self.channels[(reg - 0x28) as usize].kc = value;
            return;
        }
        if (0x30..0x38).contains(&reg) {
            self.channels[(reg - 0x30) as usize].kf = value >> 2;
            return;
        }
        for &base in &OPERATOR_REG_BASES {
            if reg >= base && reg < base + 32 {
                let rel = reg - base;
                let channel = (rel & 0x07) as usize;
                let slot_offset = rel & !0x07;
                let Some(slot) = SLOT_OFFSETS.iter().position(|&o| o == slot_offset) else {
                    return;
                };
                let op = &mut self.channels[channel].operators[slot];
                match base {
                    0x40 => {
                        op.mul = value & 0x0F;
                        op.dt1 = (value >> 4) & 0x07;
                    }
                    0x60 => op.total_level = value & 0x7F,
                    0x80 => {
                        op.ar = value & 0x1F;
                        op.ks = (value >> 6) & 0x03;
                    }
                    0xA0 => op.d1r = value & 0x1F,
                    0xC0 => {
                        op.d2r = value & 0x1F;
                        op.dt2 = (value >> 6) & 0x03;
                    }
                    0xE0 => {
                        op.rr = value & 0x0F;
                        op.d1l = (value >> 4) & 0x0F;
                    }
                    _ => {}
                }
                return;
            }
        }
    }

    /// Key-on every operator slot of a channel (convenience for the mix engine's
    /// `FmNoteOn` event).
    pub fn key_on(&mut self, channel: u8) {
        self.write_reg(0x08, (0x0F << 3) | (channel & 0x07));
    }

    /// Key-off every operator slot of a channel (`FmNoteOff`).
    pub fn key_off(&mut self, channel: u8) {
        self.write_reg(0x08, channel & 0x07);
    }

    fn operator_freq_hz(ch: &Channel, op: &Operator) -> f64 {
        let octave = (ch.kc >> 4) as i32;
        let semitone = (ch.kc & 0x0F) as i32;
        let midi = octave * 12 + semitone;
        let frac = ch.kf as f64 / 64.0;
        let base_hz = 440.0 * 2f64.powf((midi as f64 + frac - 69.0) / 12.0);

        let mul_factor = if op.mul == 0 { 0.5 } else { op.mul as f64 };
        let dt1_cents = DT1_CENTS[op.dt1 as usize];
        let dt2_cents = DT2_CENTS[op.dt2 as usize];
        base_hz * mul_factor * 2f64.powf((dt1_cents + dt2_cents) / 1200.0)
    }

    fn eg_period(eff_rate: u8, release: bool) -> u32 {
        if release {
            let shift = (6i32 - (eff_rate as i32 / 4)).max(0) as u32;
            (64u32 >> shift.min(6)).max(1)
        } else {
            let fine = [32u32, 16, 8, 4, 2, 1, 1, 1][(eff_rate & 0x07) as usize];
            let coarse = (eff_rate >> 3).min(7) as u32;
            (fine >> coarse).max(1)
        }
    }

    fn step_envelope(op: &mut Operator, ks: u8, kc: u8) {
        let ks_contribution = (ks as i32) * ((kc >> 4) as i32) / 2;
        let (rate, release) = match op.eg_phase {
            EgPhase::Attack => (op.ar, false),
            EgPhase::Decay1 => (op.d1r, false),
            EgPhase::Decay2 => (op.d2r, false),
            EgPhase::Release => (op.rr, true),
        };
        let eff_rate = (rate as i32 * 2 + ks_contribution).clamp(0, 63) as u8;
        let period = Self::eg_period(eff_rate, release);

        op.eg_counter += 1;
        if op.eg_counter < period {
            return;
        }
        op.eg_counter = 0;

        match op.eg_phase {
            EgPhase::Attack => {
                let step = (op.eg_level >> (3 - (eff_rate & 3) as u16)).max(1);
                op.eg_level = op.eg_level.saturating_sub(step);
                if op.eg_level == 0 || eff_rate >= 62 {
                    op.eg_phase = EgPhase::Decay1;
                }
            }
            EgPhase::Decay1 => {
                let step = 1 + (eff_rate & 3) as u16;
                op.eg_level = (op.eg_level + step).min(1023);
                let target = if op.d1l == 15 { 1023 } else { (op.d1l as u16) << 5 };
                if op.eg_level >= target {
                    op.eg_phase = EgPhase::Decay2;
                }
            }
            EgPhase::Decay2 => {
                let step = 1 + (eff_rate & 3) as u16;
                op.eg_level = (op.eg_level + step).min(1023);
            }
            EgPhase::Release => {
                let step = 2 + (eff_rate & 3) as u16;
                op.eg_level = (op.eg_level + step).min(1023);
            }
        }
    }

    fn sine_lookup(&self, phase: f64) -> f64 {
        let p = phase.rem_euclid(1024.0);
        let scaled = p / 1024.0 * SINE_TABLE_LEN as f64;
        let idx0 = scaled.floor() as usize % SINE_TABLE_LEN;
        let idx1 = (idx0 + 1) % SINE_TABLE_LEN;
        let frac = scaled - scaled.floor();
        self.sine_table[idx0] * (1.0 - frac) + self.sine_table[idx1] * frac
    }

    fn atten(&self, total_level: u8, eg_level: u16) -> f64 {
        let idx = (10.0 * (total_level as f64 * 0.75 + eg_level as f64 * 0.046875)).round() as usize;
        self.atten_table
            .get(idx.min(ATTEN_TABLE_LEN))
            .copied()
            .unwrap_or(0.0)
    }

    fn operator_output(&self, ch: &Channel, slot: usize, modulation: f64) -> f64 {
        let op = &ch.operators[slot];
        let phase = op.phase + modulation * 512.0;
        self.sine_lookup(phase) * self.atten(op.total_level, op.eg_level)
    }

    /// Advance every operator by one native sample and mix one stereo output pair.
    fn step_native_sample(&mut self) -> (f64, f64) {
        let mut mix_l = 0.0f64;
        let mut mix_r = 0.0f64;

        for ch in self.channels.iter_mut() {
            for slot in 0..4 {
                let op = &mut ch.operators[slot];
                let inc = Self::operator_freq_hz_static(ch.kc, ch.kf, op) * 1024.0 / NATIVE_RATE;
                op.phase = (op.phase + inc).rem_euclid(1024.0);
                let ks = op.ks;
                let kc = ch.kc;
                Self::step_envelope(op, ks, kc);
            }

            let fb_mod = if ch.fb > 0 {
                let m1 = &ch.operators[0];
                let avg = (m1.prev_out[0] + m1.prev_out[1]) / 2.0;
                avg * ((1u32 << (ch.fb - 1)) as f64 / 4.0)
            } else {
                0.0
            };

            let m1 = self.operator_output(ch, 0, fb_mod);
            let out = match ch.con {
                0 => {
                    let c1 = self.operator_output(ch, 2, m1);
                    let m2 = self.operator_output(ch, 1, c1);
                    self.operator_output(ch, 3, m2)
                }
                1 => {
                    let c1 = self.operator_output(ch, 2, 0.0);
                    let m2 = self.operator_output(ch, 1, m1 + c1);
                    self.operator_output(ch, 3, m2)
                }
                2 => {
                    let c1 = self.operator_output(ch, 2, 0.0);
                    let m2 = self.operator_output(ch, 1, c1);
                    self.operator_output(ch, 3, m1 + m2)
                }
                3 => {
                    let c1 = self.operator_output(ch, 2, m1);
                    let m2 = self.operator_output(ch, 1, 0.0);
                    self.operator_output(ch, 3, c1 + m2)
                }
                4 => {
                    let c1 = self.operator_output(ch, 2, m1);
                    let m2 = self.operator_output(ch, 1, 0.0);
                    let c2 = self.operator_output(ch, 3, m2);
                    c1 + c2
                }
                5 => {
                    let c1 = self.operator_output(ch, 2, m1);
                    let m2 = self.operator_output(ch, 1, m1);
                    let c2 = self.operator_output(ch, 3, m1);
                    c1 + m2 + c2
                }
                6 => {
                    let c1 = self.operator_output(ch, 2, m1);
                    let m2 = self.operator_output(ch, 1, 0.0);
                    let c2 = self.operator_output(ch, 3, 0.0);
                    c1 + m2 + c2
                }
                _ => {
                    let m2 = self.operator_output(ch, 1, 0.0);
                    let c1 = self.operator_output(ch, 2, 0.0);
                    let c2 = self.operator_output(ch, 3, 0.0);
                    m1 + m2 + c1 + c2
                }
            };

            ch.operators[0].prev_out[1] = ch.operators[0].prev_out[0];
            ch.operators[0].prev_out[0] = m1;

            if ch.pan_l {
                mix_l += out;
            }
            if ch.pan_r {
                mix_r += out;
            }
        }

        (mix_l / 8.0, mix_r / 8.0)
    }

    /// `operator_freq_hz` without a live borrow on `self`, for use inside the
    /// mutable-iteration loop in [`Self::step_native_sample`].
    fn operator_freq_hz_static(kc: u8, kf: u8, op: &Operator) -> f64 {
        let dummy = Channel {
            kc,
            kf,
            ..Default::default()
        };
        Self::operator_freq_hz(&dummy, op)
    }

    /// Advance `n` native samples, accumulating resampled output into the host-rate buffer.
    pub fn tick_n(&mut self, n: u32) {
        for _ in 0..n {
            let (l, r) = self.step_native_sample();
            self.sample_phase += self.output_sample_rate as u64;
            if self.sample_phase >= NATIVE_RATE as u64 {
                self.sample_phase -= NATIVE_RATE as u64;
                self.sample_buffer_l.push(l as f32);
                self.sample_buffer_r.push(r as f32);
            }
        }
    }

    /// Take the accumulated resampled stereo buffers, emptying them.
    pub fn drain_audio(&mut self) -> (Vec<f32>, Vec<f32>) {
        (
            std::mem::take(&mut self.sample_buffer_l),
            std::mem::take(&mut self.sample_buffer_r),
        )
    }

    /// Render exactly `n` output sample pairs, ticking native samples as needed.
    /// Used by the mix engine to walk between timed register-write events.
    pub fn render_samples(&mut self, n: u32) -> (Vec<f32>, Vec<f32>) {
        while (self.sample_buffer_l.len() as u32) < n {
            self.tick_n(1);
        }
        let rem_l = self.sample_buffer_l.split_off(n as usize);
        let rem_r = self.sample_buffer_r.split_off(n as usize);
        (
            std::mem::replace(&mut self.sample_buffer_l, rem_l),
            std::mem::replace(&mut self.sample_buffer_r, rem_r),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_carrier_channel(chip: &mut FmChip, channel: u8) {
        chip.write_reg(0x20 + channel, 0xC0 | 7); // CON 7, all-carrier, L+R on
        chip.write_reg(0x28 + channel, 0x4A); // kc
        chip.write_reg(0x30 + channel, 0);
        for slot_offset in SLOT_OFFSETS {
            chip.write_reg(0x40 + slot_offset + channel, 1); // mul=1, dt1=0
            chip.write_reg(0x60 + slot_offset + channel, 0); // tl=0 (loudest)
            chip.write_reg(0x80 + slot_offset + channel, 31); // ar=31 (fast attack)
            chip.write_reg(0xA0 + slot_offset + channel, 0);
            chip.write_reg(0xC0 + slot_offset + channel, 0);
            chip.write_reg(0xE0 + slot_offset + channel, 0x10); // d1l=1
        }
    }

    #[test]
    fn silent_chip_produces_zero_samples() {
        let mut chip = FmChip::new(44100);
        chip.tick_n(10_000);
        let (l, r) = chip.drain_audio();
        assert!(l.iter().all(|&s| s == 0.0));
        assert!(r.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn keyed_on_carrier_produces_audible_output() {
        let mut chip = FmChip::new(44100);
        simple_carrier_channel(&mut chip, 0);
        chip.key_on(0);
        chip.tick_n(20_000);
        let (l, _r) = chip.drain_audio();
        assert!(l.iter().any(|&s| s.abs() > 0.001));
    }

    #[test]
    fn key_off_eventually_releases_to_silence() {
        let mut chip = FmChip::new(44100);
        simple_carrier_channel(&mut chip, 1);
        chip.key_on(1);
        chip.tick_n(5_000);
        chip.key_off(1);
        chip.tick_n(200_000);
        let (l, _r) = chip.drain_audio();
        let tail: f32 = l[l.len() - 200..].iter().map(|s| s.abs()).sum();
        assert!(tail < 1.0);
    }

    #[test]
    fn register_decode_routes_to_correct_operator_slot() {
        let mut chip = FmChip::new(44100);
        chip.write_reg(0x40 + SLOT_OFFSETS[2] + 3, 0x25); // C1 of channel 3: mul=5, dt1=2
        assert_eq!(chip.channels[3].operators[2].mul, 5);
        assert_eq!(chip.channels[3].operators[2].dt1, 2);
    }

    #[test]
    fn pan_disabled_channel_contributes_nothing() {
        let mut chip = FmChip::new(44100);
        simple_carrier_channel(&mut chip, 2);
        chip.write_reg(0x20 + 2, 7); // con=7, no pan bits set
        chip.key_on(2);
        chip.tick_n(10_000);
        let (l, r) = chip.drain_audio();
        assert!(l.iter().all(|&s| s == 0.0));
        assert!(r.iter().all(|&s| s == 0.0));
    }
}
