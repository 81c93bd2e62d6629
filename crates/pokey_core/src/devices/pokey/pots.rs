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

    devices::pokey::pots.rs

    Potentiometer scanning in slow and fast modes.
*/

//! Potentiometer scan.
//!
//! A single master counter runs from 0 to 229 after POTGO. Each pot line
//! latches the counter when it reaches the line's position; ALLPOT shows
//! which lines are still charging. Slow scan counts once per scan line,
//! fast scan once per cycle.

use super::{registers::*, timers::SLOW_TICK_15KHZ, Pokey};

pub const POT_COUNT: usize = 8;
/// Position of an open pot line.
pub const POT_MAX_POSITION: u8 = 228;
/// Fast scan count ceiling; latched values never exceed it.
pub const POT_COUNT_LIMIT_FAST: u32 = 229;
pub const POT_COUNT_LIMIT_SLOW: u32 = 228;
/// Fast scan position of a grounded line. Never reached.
pub const POT_GROUNDED: u8 = 0xFF;

/// Fast scan starts counting this many cycles after POTGO.
const FAST_SCAN_DELAY: u32 = 2;
/// Immediate pot updates only apply this soon after POTGO. Longer than a
/// PAL frame.
const IMMEDIATE_UPDATE_WINDOW: u64 = 37000;
/// Hires position clamp so the fast scan position stays in 1..=229.
const HIRES_MIN: i32 = 575;
const HIRES_MAX: i32 = 131647;

/// Bits that read back unstable from an in-progress fast scan count.
const FAST_POT_DITHER: [u8; 16] = [0, 1, 0, 3, 0, 1, 0, 7, 0, 1, 0, 3, 0, 1, 0, 15];

#[derive(Clone, Debug)]
pub struct PotScanner {
    /// Slow scan positions.
    pub positions: [u8; POT_COUNT],
    /// Fast scan positions.
    pub hi_positions: [u8; POT_COUNT],
    pub latches: [u8; POT_COUNT],
    pub allpot: u8,
    pub master_counter: u8,
    pub last_time_fast: u32,
    pub last_time_slow: u32,
    pub last_scan_time: u64,
}

impl Default for PotScanner {
    fn default() -> Self {
        Self {
            positions: [POT_MAX_POSITION; POT_COUNT],
            hi_positions: [POT_MAX_POSITION; POT_COUNT],
            latches: [0; POT_COUNT],
            allpot: 0,
            master_counter: 0,
            last_time_fast: 0,
            last_time_slow: 0,
            last_scan_time: 0,
        }
    }
}

impl PotScanner {
    /// Power-on state. Positions belong to the host and are kept.
    pub fn reset(&mut self, t: u32) {
        self.allpot = 0;
        self.latches = [0; POT_COUNT];
        self.last_time_fast = t;
        self.last_time_slow = t;
    }

    pub fn active_positions(&self, fast_scan: bool) -> &[u8; POT_COUNT] {
        if fast_scan {
            &self.hi_positions
        }
        else {
            &self.positions
        }
    }

    /// Run the master counter up to `fast_time`, with `slow_time` the last
    /// scan line tick, and latch every line that has been reached.
    fn advance(&mut self, fast_time: u32, slow_time: u32, fast_scan: bool) {
        // Time must move forward.
        if fast_time.wrapping_sub(self.last_time_fast).wrapping_sub(1) >= 0x7FFF_FFFF {
            return;
        }

        let mut count = self.master_counter as u32;
        if count < POT_COUNT_LIMIT_FAST {
            if fast_scan {
                count = count
                    .saturating_add(fast_time.wrapping_sub(self.last_time_fast))
                    .min(POT_COUNT_LIMIT_FAST);
            }
            else {
                count = count
                    .saturating_add(slow_time.wrapping_sub(self.last_time_slow) / SLOW_TICK_15KHZ)
                    .min(POT_COUNT_LIMIT_SLOW);
            }
        }

        self.master_counter = count as u8;
        self.last_time_fast = fast_time;
        self.last_time_slow = slow_time;

        if self.allpot == 0 {
            return;
        }

        let positions = *self.active_positions(fast_scan);
        for (i, &pos) in positions.iter().enumerate() {
            let bit = 1 << i;
            if self.allpot & bit != 0 && self.master_counter >= pos {
                self.allpot &= !bit;
                self.latches[i] = pos.min(POT_COUNT_LIMIT_FAST as u8);
            }
        }
    }

    /// POTn as read: the latch once the line is done, otherwise the live
    /// count.
    fn pot_value(&self, index: usize, fast_scan: bool) -> u8 {
        if self.allpot & (1 << index) == 0 {
            return self.latches[index];
        }

        let count = self.master_counter;
        if fast_scan {
            count ^ FAST_POT_DITHER[(count & 0x0F) as usize]
        }
        else {
            count
        }
    }
}

impl Pokey {
    fn is_fast_pot_scan(&self) -> bool {
        self.skctl & SKCTL_FAST_POTS != 0
    }

    pub fn set_pot_pos(&mut self, index: usize, pos: i32) {
        self.set_pot_pos_hires(index, pos.saturating_mul(0x1_0000), false);
    }

    /// Set a pot position in 16.16 fixed point scan lines. A grounded line
    /// never completes a fast scan.
    pub fn set_pot_pos_hires(&mut self, index: usize, pos: i32, grounded: bool) {
        if index >= POT_COUNT {
            log::warn!("POKEY: Ignoring position for nonexistent pot {}", index);
            return;
        }

        let lo_pos = (pos >> 16).clamp(1, POT_MAX_POSITION as i32) as u8;
        let hi_pos = if grounded {
            POT_GROUNDED
        }
        else {
            ((pos.clamp(HIRES_MIN, HIRES_MAX) * SLOW_TICK_15KHZ as i32) >> 16) as u8
        };

        if self.pots.positions[index] == lo_pos && self.pots.hi_positions[index] == hi_pos {
            return;
        }

        self.update_pots(0);

        self.pots.positions[index] = lo_pos;
        self.pots.hi_positions[index] = hi_pos;

        // A line that already latched this scan picks up the new position.
        if self.immediate_pots
            && self.scheduler.tick64().wrapping_sub(self.pots.last_scan_time) < IMMEDIATE_UPDATE_WINDOW
            && self.pots.allpot & (1 << index) == 0
        {
            let pos = if self.is_fast_pot_scan() { hi_pos } else { lo_pos };
            self.pots.latches[index] = pos.min(POT_COUNT_LIMIT_FAST as u8);
            log::trace!("POKEY: Immediate update of POT{} to {}", index, self.pots.latches[index]);
        }
    }

    pub(super) fn start_pot_scan(&mut self) {
        // Catch up an interrupted fast scan first.
        if self.is_fast_pot_scan() {
            self.update_pots(0);
        }

        let t = self.scheduler.tick();
        let slow_time = self.update_last_15khz_time(t);

        self.pots.master_counter = 0;
        self.pots.last_scan_time = self.scheduler.tick64();
        self.pots.last_time_fast = t.wrapping_add(FAST_SCAN_DELAY);
        self.pots.last_time_slow = slow_time;

        // Slow scan dumps every line. Fast scan leaves charged lines alone,
        // so only grounded lines report as in progress.
        if !self.is_fast_pot_scan() {
            self.pots.allpot = 0xFF;
        }
        else {
            for (i, &pos) in self.pots.hi_positions.iter().enumerate() {
                if pos == POT_GROUNDED {
                    self.pots.allpot |= 1 << i;
                }
            }
        }

        log::trace!("POKEY: Pot scan started, ALLPOT={:02X}", self.pots.allpot);
    }

    /// Bring the pot scan up to the current cycle plus `skew`.
    pub(super) fn update_pots(&mut self, skew: u32) {
        let t = self.scheduler.tick();
        let slow_time = self.update_last_15khz_time(t);
        let fast_time = t.wrapping_add(skew);
        let fast_scan = self.is_fast_pot_scan();
        self.pots.advance(fast_time, slow_time, fast_scan);
    }

    /// Scanner state as `update_pots` would leave it, without committing.
    pub fn pots_at(&self, skew: u32) -> PotScanner {
        let t = self.scheduler.tick();
        let mut scanner = self.pots.clone();
        scanner.advance(t.wrapping_add(skew), self.last_15khz_at(t), self.is_fast_pot_scan());
        scanner
    }

    pub(super) fn read_pot(&mut self, index: usize) -> u8 {
        self.update_pots(0);
        self.pots.pot_value(index, self.is_fast_pot_scan())
    }

    pub(super) fn peek_pot(&self, index: usize) -> u8 {
        self.pots_at(0).pot_value(index, self.is_fast_pot_scan())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::pokey::tests::TestRig;

    fn fast_rig() -> TestRig {
        let mut rig = TestRig::running();
        rig.write(REG_SKCTL, SKCTL_INIT_MASK | SKCTL_FAST_POTS);
        rig
    }

    #[test]
    fn test_slow_scan_latches_position() {
        let mut rig = TestRig::running();
        rig.pokey.set_pot_pos(0, 10);
        rig.write(REG_POTGO, 0);
        assert_eq!(rig.read(REG_ALLPOT), 0xFF);

        rig.advance(12 * SLOW_TICK_15KHZ as u64);
        assert_eq!(rig.read(REG_ALLPOT), 0xFE);
        assert_eq!(rig.read(REG_POT0), 10);

        // Open lines top out at 228.
        rig.advance(230 * SLOW_TICK_15KHZ as u64);
        assert_eq!(rig.read(REG_ALLPOT), 0);
        assert_eq!(rig.read(REG_POT0 + 1), POT_MAX_POSITION);
    }

    #[test]
    fn test_fast_scan_uses_hires_position() {
        let mut rig = TestRig::running();
        rig.pokey.set_pot_pos_hires(1, 0x8000, false);
        assert_eq!(rig.pokey.pots.hi_positions[1], 57);
        assert_eq!(rig.pokey.pots.positions[1], 1);

        // Dump the lines in slow mode, then count fast.
        rig.write(REG_POTGO, 0);
        rig.write(REG_SKCTL, SKCTL_INIT_MASK | SKCTL_FAST_POTS);
        rig.advance(100);
        assert_eq!(rig.read(REG_POT0 + 1), 57);
        assert_eq!(rig.read(REG_ALLPOT) & 0x02, 0);
    }

    #[test]
    fn test_fast_scan_leaves_charged_lines_done() {
        let mut rig = fast_rig();
        rig.pokey.set_pot_pos_hires(2, 0, true);
        rig.write(REG_POTGO, 0);

        // Only the grounded line reports in progress, and it never finishes.
        assert_eq!(rig.read(REG_ALLPOT), 0x04);
        rig.advance(1000);
        assert_eq!(rig.read(REG_ALLPOT), 0x04);
    }

    #[test]
    fn test_fast_scan_count_dither() {
        let mut rig = fast_rig();
        rig.pokey.set_pot_pos_hires(0, 0, true);
        rig.write(REG_POTGO, 0);

        // Count 11 after the start delay reads back as 11 ^ 3.
        rig.advance(11 + FAST_SCAN_DELAY as u64);
        assert_eq!(rig.read(REG_POT0), 8);
    }

    #[test]
    fn test_immediate_update_after_latch() {
        let mut rig = TestRig::running();
        rig.pokey.set_pot_pos(0, 10);
        rig.write(REG_POTGO, 0);
        rig.advance(12 * SLOW_TICK_15KHZ as u64);
        assert_eq!(rig.read(REG_POT0), 10);

        rig.pokey.set_pot_pos(0, 20);
        assert_eq!(rig.read(REG_POT0), 10);

        rig.pokey.set_immediate_pot_update(true);
        rig.pokey.set_pot_pos(0, 30);
        assert_eq!(rig.read(REG_POT0), 30);
    }

    #[test]
    fn test_debug_read_does_not_latch() {
        let mut rig = TestRig::running();
        rig.pokey.set_pot_pos(3, 5);
        rig.write(REG_POTGO, 0);
        rig.advance(10 * SLOW_TICK_15KHZ as u64);

        assert_eq!(rig.pokey.debug_read_byte(REG_ALLPOT) & 0x08, 0);
        assert_eq!(rig.pokey.debug_read_byte(REG_POT0 + 3), 5);
        assert_eq!(rig.pokey.pots.allpot & 0x08, 0x08);
    }

    #[test]
    fn test_position_clamps() {
        let mut rig = TestRig::running();
        rig.pokey.set_pot_pos(4, 0);
        rig.pokey.set_pot_pos(5, 1000);
        assert_eq!(rig.pokey.pots.positions[4], 1);
        assert_eq!(rig.pokey.pots.positions[5], POT_MAX_POSITION);
        assert_eq!(rig.pokey.pots.hi_positions[5], POT_COUNT_LIMIT_FAST as u8);
        assert_eq!(rig.pokey.pots.hi_positions[4], 1);

        // Out of range indices are ignored.
        rig.pokey.set_pot_pos(8, 10);
    }
}
