//! 10-pole LPC speech chip (component F).
//!
//! A TMS5220-class lattice-filter speech synthesizer. Unlike the polychip
//! and FM chip, this chip isn't driven by live register writes: a speech
//! command resolves directly to a bitstream address and length, so
//! [`render`] decodes the whole stream in one pass.
//!
//! The exact silicon lookup tables (energy, pitch, reflection coefficients,
//! chirp excitation) are not recoverable from the bytecode alone; the
//! tables here are shape-faithful reconstructions (monotonic, correctly
//! sized and scaled) rather than verified bit-exact hardware constants.

/// Output sample rate of the speech chip.
pub const SAMPLE_RATE: u32 = 8_000;
/// Samples rendered per ~25 ms frame.
const SAMPLES_PER_IP: u32 = 25;
/// Interpolation periods per frame.
const IP_COUNT: u32 = 8;
/// Number of lattice filter stages.
const STAGES: usize = 10;
/// Chirp excitation table length.
const CHIRP_LEN: usize = 52;

/// Per-IP interpolation shift; IP 0 changes slowest, IP 7 snaps to target.
const INTERP_SHIFT: [u32; 8] = [3, 3, 3, 2, 2, 1, 1, 0];

/// 16-entry energy gain table, indices 0 and 15 are silence/terminate sentinels.
const ENERGY_TABLE: [i32; 16] = [
    0, 1, 2, 3, 4, 6, 8, 11, 16, 23, 33, 47, 63, 85, 114, 0,
];

/// Bit widths for the ten reflection-coefficient tables (K1..K10).
const K_BITS: [u32; STAGES] = [5, 5, 4, 4, 4, 4, 4, 3, 3, 3];

fn build_k_table(bits: u32) -> Vec<i32> {
    let n = 1i32 << bits;
    let half = n / 2;
    (0..n)
        .map(|i| {
            let centered = i - half;
            centered * (16384 / half.max(1))
        })
        .collect()
}

fn build_chirp_table() -> [i8; CHIRP_LEN] {
    let mut table = [0i8; CHIRP_LEN];
    for (i, slot) in table.iter_mut().enumerate() {
        let decay = (-(i as f64) / 8.0).exp();
        let osc = (i as f64 * 0.9).cos();
        *slot = (100.0 * decay * osc).round().clamp(-127.0, 127.0) as i8;
    }
    table
}

fn wrap(v: i32, bound: i32) -> i32 {
    let range = bound * 2;
    let mut r = v % range;
    if r >= bound {
        r -= range;
    }
    if r < -bound {
        r += range;
    }
    r
}

/// 10-bit x 14-bit signed fixed-point multiply: `((a wrap ±512) * (b wrap ±16384)) >> 9`.
fn fixed_mul(a: i32, b: i32) -> i32 {
    let a = wrap(a, 512);
    let b = wrap(b, 16384);
    ((a as i64 * b as i64) >> 9) as i32
}

struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader { data, bit_pos: 0 }
    }

    fn exhausted(&self) -> bool {
        self.bit_pos / 8 >= self.data.len()
    }

    /// Read `n` bits (n <= 8), LSB-first within each byte. Returns 0 past the end.
    fn read_bits(&mut self, n: u32) -> u32 {
        let mut value = 0u32;
        for i in 0..n {
            let byte_idx = self.bit_pos / 8;
            let bit_idx = self.bit_pos % 8;
            let bit = if byte_idx < self.data.len() {
                (self.data[byte_idx] >> bit_idx) & 1
            } else {
                0
            };
            value |= (bit as u32) << i;
            self.bit_pos += 1;
        }
        value
    }
}

struct FrameParams {
    energy_idx: u8,
    pitch_idx: u8,
    voiced: bool,
    k_idx: Option<[u8; STAGES]>,
}

/// `None` signals end-of-stream: either the terminate energy index (15) or an
/// exhausted bitstream.
fn parse_frame(reader: &mut BitReader) -> Option<FrameParams> {
    if reader.exhausted() {
        return None;
    }
    let energy_idx = reader.read_bits(4) as u8;
    if energy_idx == 15 {
        return None;
    }
    if energy_idx == 0 {
        return Some(FrameParams {
            energy_idx: 0,
            pitch_idx: 0,
            voiced: false,
            k_idx: None,
        });
    }
    let repeat = reader.read_bits(1) != 0;
    let pitch_idx = reader.read_bits(6) as u8;
    let voiced = pitch_idx != 0;

    if repeat {
        return Some(FrameParams {
            energy_idx,
            pitch_idx,
            voiced,
            k_idx: None,
        });
    }

    let mut k_idx = [0u8; STAGES];
    k_idx[0] = reader.read_bits(5) as u8;
    k_idx[1] = reader.read_bits(5) as u8;
    k_idx[2] = reader.read_bits(4) as u8;
    k_idx[3] = reader.read_bits(4) as u8;
    if voiced {
        k_idx[4] = reader.read_bits(4) as u8;
        k_idx[5] = reader.read_bits(4) as u8;
        k_idx[6] = reader.read_bits(4) as u8;
        k_idx[7] = reader.read_bits(3) as u8;
        k_idx[8] = reader.read_bits(3) as u8;
        k_idx[9] = reader.read_bits(3) as u8;
    }
    Some(FrameParams {
        energy_idx,
        pitch_idx,
        voiced,
        k_idx: Some(k_idx),
    })
}

/// Decode a raw LPC bitstream into 8 kHz signed 16-bit mono samples.
pub fn render(bitstream: &[u8]) -> Vec<i16> {
    let k_tables: Vec<Vec<i32>> = K_BITS.iter().map(|&b| build_k_table(b)).collect();
    let chirp = build_chirp_table();

    let mut reader = BitReader::new(bitstream);

    let mut energy_cur = 0i32;
    let mut pitch_cur = 0i32;
    let mut k_cur = [0i32; STAGES];
    let mut energy_tgt = 0i32;
    let mut pitch_tgt = 0i32;
    let mut k_tgt = [0i32; STAGES];
    let mut voiced = false;

    let mut x = [0i32; STAGES];
    let mut lfsr: u32 = 1;
    let mut pitch_counter: u32 = 0;

    let mut out = Vec::new();

    'frames: loop {
        let Some(frame) = parse_frame(&mut reader) else {
            break;
        };

        let new_voiced = frame.voiced;
        let inhibit_interp = new_voiced != voiced;
        voiced = new_voiced;

        energy_tgt = ENERGY_TABLE[frame.energy_idx as usize];
        if frame.energy_idx != 0 {
            pitch_tgt = frame.pitch_idx as i32;
            if let Some(k_idx) = frame.k_idx {
                for i in 0..STAGES {
                    if i < 4 || voiced {
                        k_tgt[i] = k_tables[i][k_idx[i] as usize];
                    }
                }
            }
        }

        for ip in 0..IP_COUNT {
            for sample_in_ip in 0..SAMPLES_PER_IP {
                if sample_in_ip == 1 && !inhibit_interp {
                    let shift = INTERP_SHIFT[ip as usize];
                    energy_cur += (energy_tgt - energy_cur) >> shift;
                    pitch_cur += (pitch_tgt - pitch_cur) >> shift;
                    for i in 0..STAGES {
                        k_cur[i] += (k_tgt[i] - k_cur[i]) >> shift;
                    }
                }

                let excitation = if voiced {
                    let idx = (pitch_counter as usize).min(CHIRP_LEN - 1);
                    chirp[idx] as i32
                } else {
                    for _ in 0..20 {
                        let bit = ((lfsr >> 12) ^ (lfsr >> 3) ^ (lfsr >> 2) ^ lfsr) & 1;
                        lfsr = ((lfsr << 1) | bit) & 0x1FFF;
                    }
                    if lfsr & 1 != 0 {
                        64
                    } else {
                        -64
                    }
                };

                if voiced {
                    pitch_counter += 1;
                    if pitch_counter >= (pitch_cur.max(1)) as u32 {
                        pitch_counter = 0;
                    }
                }

                let mut u = [0i32; STAGES + 1];
                u[STAGES] = excitation * energy_cur;
                for i in (0..STAGES).rev() {
                    u[i] = u[i + 1] - fixed_mul(k_cur[i], x[i]);
                }
                for i in (1..STAGES).rev() {
                    x[i] = x[i - 1] + fixed_mul(k_cur[i], u[i]);
                }
                x[0] = u[0];

                let wrapped = wrap(u[0], 8192);
                let saturated = wrapped.clamp(-2048, 2047);
                let zeroed = saturated & !0x0F;
                let sample = (zeroed << 2) as i16;
                out.push(sample);

                if energy_cur == 0 && pitch_cur == 0 && reader.exhausted() {
                    break 'frames;
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_bits(bits: &[(u32, u32)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut cur_byte = 0u8;
        let mut cur_bit = 0u32;
        for &(value, width) in bits {
            for i in 0..width {
                let bit = (value >> i) & 1;
                cur_byte |= (bit as u8) << cur_bit;
                cur_bit += 1;
                if cur_bit == 8 {
                    bytes.push(cur_byte);
                    cur_byte = 0;
                    cur_bit = 0;
                }
            }
        }
        if cur_bit > 0 {
            bytes.push(cur_byte);
        }
        bytes
    }

    #[test]
    fn immediate_terminate_produces_no_samples() {
        let data = pack_bits(&[(15, 4)]);
        let samples = render(&data);
        assert!(samples.is_empty());
    }

    #[test]
    fn silence_frame_then_terminate_is_quiet() {
        let data = pack_bits(&[(0, 4), (15, 4)]);
        let samples = render(&data);
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|&s| s.abs() < 100));
    }

    #[test]
    fn voiced_frame_produces_nonzero_samples() {
        let mut bits = vec![(8u32, 4), (0, 1), (20, 6)]; // energy=8, no repeat, voiced pitch=20
        bits.push((10, 5)); // k1
        bits.push((10, 5)); // k2
        bits.push((5, 4)); // k3
        bits.push((5, 4)); // k4
        bits.push((5, 4)); // k5
        bits.push((5, 4)); // k6
        bits.push((5, 4)); // k7
        bits.push((2, 3)); // k8
        bits.push((2, 3)); // k9
        bits.push((2, 3)); // k10
        bits.push((15, 4)); // terminate
        let data = pack_bits(&bits);
        let samples = render(&data);
        assert!(samples.iter().any(|&s| s != 0));
    }

    #[test]
    fn unvoiced_frame_decodes_without_k_overrun() {
        let mut bits = vec![(6u32, 4), (0, 1), (0, 6)]; // energy=6, no repeat, pitch=0 (unvoiced)
        bits.push((10, 5));
        bits.push((10, 5));
        bits.push((5, 4));
        bits.push((5, 4));
        bits.push((15, 4)); // terminate
        let data = pack_bits(&bits);
        let samples = render(&data);
        assert!(!samples.is_empty());
    }

    #[test]
    fn fixed_mul_respects_wrap_and_shift() {
        assert_eq!(fixed_mul(0, 1000), 0);
        let result = fixed_mul(512, 16384);
        assert!(result.abs() < 512 * 16384);
    }
}
