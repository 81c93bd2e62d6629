/*
    MartyPC POKEY Core
    https://github.com/dbalsom/martypc

    Copyright 2022-2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    devices::pokey::poly.rs

    The 4, 5, 9 and 17 bit polynomial counters and RANDOM.
*/

use lazy_static::lazy_static;

pub const POLY9_PERIOD: u32 = 511;
pub const POLY17_PERIOD: u32 = 131071;

/// Bit 0 of each entry is the poly17 output, bit 1 the poly9 output. The
/// table is padded so an 8-bit window can be read from any counter value.
pub const POLY_BUFFER_LEN: usize = POLY17_PERIOD as usize + 8;
pub const POLY17_BIT: u8 = 0b01;
pub const POLY9_BIT: u8 = 0b10;

lazy_static! {
    pub static ref POLY_BUFFER: Vec<u8> = build_poly_buffer();
}

#[inline]
fn lfsr_step(p: u32, bits: u32) -> u32 {
    (p >> 1) | (((p ^ (p >> 5)) & 1) << (bits - 1))
}

fn lfsr_sequence(bits: u32, len: usize) -> Vec<u8> {
    let mut p = (1u32 << bits) - 1;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push((p & 1) as u8);
        p = lfsr_step(p, bits);
    }
    out
}

fn build_poly_buffer() -> Vec<u8> {
    let poly9 = lfsr_sequence(9, POLY9_PERIOD as usize);
    let poly17 = lfsr_sequence(17, POLY17_PERIOD as usize);

    (0..POLY_BUFFER_LEN)
        .map(|i| poly17[i % POLY17_PERIOD as usize] | (poly9[i % POLY9_PERIOD as usize] << 1))
        .collect()
}

/// Read the 8-bit RANDOM window starting at `counter`.
pub fn random_byte(counter: u32, use_poly9: bool) -> u8 {
    let src = &POLY_BUFFER[counter as usize..counter as usize + 8];
    let mut v: u8 = 0;
    for i in (0..8).rev() {
        let bit = if use_poly9 {
            (src[i] & POLY9_BIT) >> 1
        }
        else {
            src[i] & POLY17_BIT
        };
        v = (v << 1) | bit;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_repeat(bits: u32) -> u32 {
        let seed = (1u32 << bits) - 1;
        let mut p = lfsr_step(seed, bits);
        let mut n = 1;
        while p != seed {
            p = lfsr_step(p, bits);
            n += 1;
        }
        n
    }

    #[test]
    fn test_lfsr_periods_are_maximal() {
        assert_eq!(first_repeat(9), POLY9_PERIOD);
        assert_eq!(first_repeat(17), POLY17_PERIOD);
    }

    #[test]
    fn test_buffer_wraps_seamlessly() {
        assert_eq!(POLY_BUFFER.len(), POLY_BUFFER_LEN);
        for i in 0..8 {
            assert_eq!(POLY_BUFFER[POLY17_PERIOD as usize + i] & POLY17_BIT, POLY_BUFFER[i] & POLY17_BIT);
        }
        assert_eq!(POLY_BUFFER[511] & POLY9_BIT, POLY_BUFFER[0] & POLY9_BIT);
    }

    #[test]
    fn test_random_window_from_seed() {
        // All-ones seed shifts out eight ones first.
        assert_eq!(random_byte(0, false), 0xFF);
        assert_eq!(random_byte(0, true), 0xFF);
    }
}
