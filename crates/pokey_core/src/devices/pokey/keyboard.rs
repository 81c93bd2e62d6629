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

    devices::pokey::keyboard.rs

    Keyboard matrix scanning and cooked key input.
*/

//! Keyboard scan logic.
//!
//! POKEY walks a six-bit scan counter through the 8x8 key matrix once per
//! 15KHz tick, feeding each key's state and a compare latch into a two-bit
//! state machine. Control, Shift and Break sit on a second return line
//! (KR2) sampled on rows 0, 2 and 6.
//!
//! Hosts can drive the matrix directly (raw keys), or hand over finished
//! key codes and let the chip pace them to the OS (cooked keys).

use std::collections::VecDeque;

use super::{registers::*, timers::SLOW_TICK_15KHZ, Pokey};
use crate::scheduler::PokeyEvent;

/// Column bit of the KR2 return line in a matrix row.
pub const KR2_COLUMN: u16 = 0x100;
pub const CONTROL_ROW: usize = 0;
pub const SHIFT_ROW: usize = 2;
pub const BREAK_ROW: usize = 6;

pub const KBCODE_SHIFT: u8 = 0x40;
pub const KBCODE_CONTROL: u8 = 0x80;
/// Scan code bits that also select the matrix row.
pub const SCAN_CODE_MASK: u8 = 0x3F;

/// Frames a cooked key is held down, and frames of quiet required after
/// release before the next queued key goes out.
pub const KEY_HOLD_FRAMES: u32 = 1;
pub const KEY_COOLDOWN_FRAMES: u32 = 60;

/// Ctrl+Shift+key on rows 0 and 2 shorts against the KR2 keys and cannot
/// be produced through debounce.
#[inline]
pub fn is_matrix_blocked_code(c: u8) -> bool {
    c & 0xE8 == 0xC0
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum KeyScanState {
    #[default]
    WaitingForKey,
    WaitingForBounce,
    WaitingForKeyUp,
    WaitingForDebounce,
}

impl KeyScanState {
    /// SKSTAT bit 2 reads low while a key is registered.
    pub fn is_key_down(&self) -> bool {
        matches!(self, KeyScanState::WaitingForKeyUp | KeyScanState::WaitingForDebounce)
    }

    pub fn to_bits(self) -> u8 {
        match self {
            KeyScanState::WaitingForKey => 0,
            KeyScanState::WaitingForBounce => 1,
            KeyScanState::WaitingForKeyUp => 2,
            KeyScanState::WaitingForDebounce => 3,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => KeyScanState::WaitingForKey,
            1 => KeyScanState::WaitingForBounce,
            2 => KeyScanState::WaitingForKeyUp,
            _ => KeyScanState::WaitingForDebounce,
        }
    }
}

pub struct KeyboardState {
    pub scan_code: u8,
    pub scan_state: KeyScanState,
    pub scan_latch: u8,
    pub irq_pending: bool,

    pub control_latched: bool,
    pub shift_latched: bool,
    pub break_latched: bool,

    pub shift_key: bool,
    pub control_key: bool,
    pub break_key: bool,

    /// Low byte is the KR1 matrix, bit 8 the KR2 line.
    pub matrix: [u16; 8],
    /// `matrix` with phantom keys filled in.
    pub effective: [u16; 8],

    pub queue: VecDeque<u8>,
    pub cooked_mode: bool,
    pub scan_enabled: bool,
    pub code_timer: u32,
    pub cooldown_timer: u32,
    pub use_cooldown: bool,
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self {
            scan_code: 0,
            scan_state: KeyScanState::WaitingForKey,
            scan_latch: 0,
            irq_pending: false,
            control_latched: false,
            shift_latched: false,
            break_latched: false,
            shift_key: false,
            control_key: false,
            break_key: false,
            matrix: [0; 8],
            effective: [0; 8],
            queue: VecDeque::new(),
            cooked_mode: false,
            scan_enabled: false,
            code_timer: 0,
            cooldown_timer: 0,
            use_cooldown: true,
        }
    }
}

impl KeyboardState {
    pub fn reset_scan(&mut self) {
        self.scan_state = KeyScanState::WaitingForKey;
        self.scan_code = 0;
    }

    /// Recompute the effective matrix. With three or more keys down, rows
    /// sharing a column are shorted together and every column on one
    /// shorted row shows up on all of them. The closure is transitive, so
    /// phantom keys can themselves bridge further rows.
    ///
    /// `cross_connect` selects which columns participate. The 5200 wires
    /// KR2 to a separate button, so only KR1 shorts there.
    pub fn rebuild_effective(&mut self, cross_connect: u16) {
        self.effective = self.matrix;

        let mut src_rows = [0usize; 8];
        let mut active = false;

        for i in 0..8 {
            let mut src = i;
            let mut connected = self.effective[i] & cross_connect;

            if connected != 0 {
                for j in (i + 1)..8 {
                    if self.effective[j] & connected != 0 {
                        connected |= self.effective[j];
                        src = j;
                    }
                }
                self.effective[src] |= connected & cross_connect;
                active = true;
            }

            src_rows[i] = src;
        }

        if !active {
            return;
        }

        for i in 0..8 {
            self.effective[i] |= self.effective[src_rows[i]];
        }
    }

    #[inline]
    pub fn effective_key(&self, kc: u8) -> bool {
        self.effective[(kc >> 3) as usize & 7] & (1 << (kc & 7)) != 0
    }

    #[inline]
    pub fn effective_kr2(&self, row: usize) -> bool {
        self.effective[row] & KR2_COLUMN != 0
    }

    /// One bit per scan code of the KR1 matrix.
    pub fn raw_key_mask(&self) -> u64 {
        self.matrix
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, row)| acc | ((*row as u64 & 0xFF) << (i * 8)))
    }
}

impl Pokey {
    fn update_key_matrix(&mut self, row: usize, mask: u16, state: u16) {
        let delta = (self.kb.matrix[row] ^ state) & mask;
        if delta != 0 {
            self.kb.matrix[row] ^= delta;
            self.update_effective_key_matrix();
        }
    }

    fn update_effective_key_matrix(&mut self) {
        let cross_connect = if self.is_5200_mode { 0x00FF } else { 0xFFFF };
        self.kb.rebuild_effective(cross_connect);
    }

    fn set_shift_status(&mut self, state: bool) {
        if state {
            self.skstat &= !SKSTAT_SHIFT;
        }
        else {
            self.skstat |= SKSTAT_SHIFT;
        }
    }

    /// Update the Shift key. With `immediate`, SKSTAT follows at once
    /// instead of waiting for the scan to reach the Shift row.
    pub fn set_shift_key_state(&mut self, state: bool, immediate: bool) {
        self.kb.shift_key = state;

        if immediate && self.skctl & SKCTL_KEY_SCAN != 0 {
            self.kb.shift_latched = state;
            self.set_shift_status(state);
        }

        self.update_key_matrix(SHIFT_ROW, KR2_COLUMN, if state { KR2_COLUMN } else { 0 });
    }

    pub fn set_control_key_state(&mut self, state: bool) {
        self.kb.control_key = state;
        self.update_key_matrix(CONTROL_ROW, KR2_COLUMN, if state { KR2_COLUMN } else { 0 });
    }

    pub fn set_break_key_state(&mut self, state: bool, immediate: bool) {
        if self.kb.break_key == state {
            return;
        }
        self.kb.break_key = state;

        if immediate && state {
            self.push_break();
        }

        self.update_key_matrix(BREAK_ROW, KR2_COLUMN, if state { KR2_COLUMN } else { 0 });
    }

    /// Break is detected with the scan enabled regardless of debounce.
    pub fn push_break(&mut self) {
        self.kb.queue.clear();

        if self.skctl & SKCTL_KEY_SCAN != 0 {
            self.assert_break_irq();
        }
    }

    pub fn clear_key_queue(&mut self) {
        self.kb.queue.clear();
    }

    pub fn key_queue_len(&self) -> usize {
        self.kb.queue.len()
    }

    /// Deliver a finished key code. Keys the OS can't take yet are queued
    /// when `allow_queue` is set; `repeat` avoids a second IRQ for a key
    /// already held.
    pub fn push_key(&mut self, c: u8, repeat: bool, allow_queue: bool, flush_queue: bool, use_cooldown: bool) {
        self.set_keyboard_modes(true, false);

        if is_matrix_blocked_code(c) {
            log::debug!("POKEY: Dropping key {:02X} blocked by matrix conflict", c);
            return;
        }

        self.kb.use_cooldown = use_cooldown;

        if allow_queue {
            if !self.kb.queue.is_empty() || !self.can_push_key(c) {
                self.kb.queue.push_back(c);
                return;
            }
        }
        else if flush_queue {
            self.kb.queue.clear();
        }

        // Scan and debounce must both be on to register a key.
        if self.skctl & SKCTL_INIT_MASK != SKCTL_INIT_MASK {
            return;
        }

        self.kbcode = c;
        self.skstat &= !SKSTAT_KEY_DOWN;

        if self.kb.code_timer == 0 || !repeat {
            self.queue_keyboard_irq();
        }

        self.kb.code_timer = KEY_HOLD_FRAMES;
        self.kb.cooldown_timer = 0;
    }

    pub fn raw_key_mask(&self) -> u64 {
        self.kb.raw_key_mask()
    }

    /// Press a key in the matrix. Without `immediate` the key is found by
    /// the scan; with it, the matrix holds only this key and KBCODE is
    /// loaded directly.
    pub fn push_raw_key(&mut self, c: u8, immediate: bool) {
        if self.is_5200_mode {
            return;
        }

        self.set_keyboard_modes(false, !immediate);
        self.kb.queue.clear();

        let row = ((c >> 3) & 7) as usize;
        let colbit = 1u16 << (c & 7);

        if !immediate {
            self.update_key_matrix(row, colbit, 0xFF);
            return;
        }

        // A single KR1 key can't create phantoms, so the effective matrix
        // is a plain copy.
        for r in self.kb.matrix.iter_mut() {
            *r &= 0xFF00;
        }
        self.kb.matrix[row] |= colbit;
        self.kb.effective = self.kb.matrix;

        if self.skctl & SKCTL_INIT_MASK == SKCTL_INIT_MASK && !is_matrix_blocked_code(c) {
            self.skstat &= !SKSTAT_KEY_DOWN;
            self.kbcode = c;
            self.queue_keyboard_irq();
        }
    }

    pub fn release_raw_key(&mut self, c: u8, immediate: bool) {
        if self.is_5200_mode {
            return;
        }

        self.set_keyboard_modes(false, !immediate);
        self.kb.queue.clear();

        let row = ((c >> 3) & 7) as usize;
        let colbit = 1u16 << (c & 7);

        if !immediate {
            self.update_key_matrix(row, colbit, 0);
        }
        else if self.kb.matrix[row] & colbit != 0 {
            for r in self.kb.matrix.iter_mut() {
                *r &= 0xFF00;
            }
            self.kb.effective = self.kb.matrix;
            self.skstat |= SKSTAT_KEY_DOWN;
        }
    }

    pub fn release_all_raw_keys(&mut self, immediate: bool) {
        if self.is_5200_mode {
            return;
        }

        self.kb.matrix = [0; 8];
        self.kb.effective = [0; 8];

        if immediate {
            self.kb.irq_pending = false;
            self.skstat |= SKSTAT_KEY_DOWN;
        }

        self.set_keyboard_modes(self.kb.cooked_mode, !immediate);
    }

    /// Replace the KR1 matrix, one entry per scan code. The KR2 keys are kept.
    pub fn set_key_matrix(&mut self, matrix: Option<&[bool; 64]>) {
        match matrix {
            Some(keys) => {
                for (row, cols) in self.kb.matrix.iter_mut().zip(keys.chunks_exact(8)) {
                    let v = cols
                        .iter()
                        .enumerate()
                        .fold(0u16, |acc, (i, &down)| acc | ((down as u16) << i));
                    *row = (*row & 0xFF00) | v;
                }
            }
            None => self.kb.matrix = [0; 8],
        }

        self.update_effective_key_matrix();
    }

    pub fn set_keyboard_modes(&mut self, cooked: bool, scan_enabled: bool) {
        self.kb.cooked_mode = cooked;
        self.kb.scan_enabled = scan_enabled;
        self.update_keyboard_scan_event();
    }

    /// Cycles from `t` to the next 15KHz tick.
    fn cycles_to_next_15khz(&mut self) -> u32 {
        let t = self.scheduler.tick();
        let last = self.update_last_15khz_time(t);
        SLOW_TICK_15KHZ - t.wrapping_sub(last)
    }

    pub(super) fn update_keyboard_scan_event(&mut self) {
        if (self.is_5200_mode || self.kb.scan_enabled) && self.skctl & SKCTL_KEY_SCAN != 0 {
            let delay = self.cycles_to_next_15khz();
            self.scheduler.set_event(delay, PokeyEvent::KeyboardScan);
        }
        else {
            self.scheduler.unset_event(PokeyEvent::KeyboardScan);
        }
    }

    /// Cooked keys raise their IRQ on the next 15KHz tick, as a scan would.
    fn queue_keyboard_irq(&mut self) {
        if !self.scheduler.is_event_pending(PokeyEvent::KeyboardIrq) {
            let delay = self.cycles_to_next_15khz();
            self.scheduler.set_event(delay, PokeyEvent::KeyboardIrq);
        }
        self.kb.irq_pending = true;
    }

    fn assert_keyboard_irq(&mut self) {
        if self.irqen & IRQ_KEY != 0 {
            if self.irqst & IRQ_KEY == 0 {
                log::trace!("POKEY: Keyboard overrun");
                self.skstat &= !SKSTAT_KEY_OVERRUN;
            }

            self.irqst &= !IRQ_KEY;
            self.assert_irq(false);
        }
    }

    fn assert_break_irq(&mut self) {
        if self.irqen & IRQ_BREAK != 0 {
            self.irqst &= !IRQ_BREAK;
            self.assert_irq(false);
        }
    }

    /// Whether a cooked key press would be accepted right now.
    pub fn can_push_key(&self, scan_code: u8) -> bool {
        if self.kb.irq_pending {
            return false;
        }
        // IRQ still active, or disabled.
        if self.irqst & self.irqen & IRQ_KEY == 0 {
            return false;
        }
        if self.skctl & SKCTL_INIT_MASK != SKCTL_INIT_MASK {
            return false;
        }

        let cooldown_expired = self.kb.use_cooldown && self.kb.cooldown_timer == 0;
        self.connections.is_key_push_ok(scan_code, cooldown_expired)
    }

    fn try_push_next_key(&mut self) {
        if let Some(c) = self.kb.queue.pop_front() {
            let use_cooldown = self.kb.use_cooldown;
            self.push_key(c, false, false, false, use_cooldown);
        }
    }

    /// Per-frame pacing of cooked keys.
    pub(super) fn advance_key_timers(&mut self) {
        if self.kb.code_timer != 0 {
            self.kb.code_timer -= 1;
            if self.kb.code_timer == 0 {
                self.skstat |= SKSTAT_KEY_DOWN;
                self.kb.cooldown_timer = KEY_COOLDOWN_FRAMES;
            }
        }
        else if self.speaker_active {
            // Keyclick in progress; the OS is still busy with the last key.
            self.kb.cooldown_timer = KEY_COOLDOWN_FRAMES;
        }
        else {
            self.kb.cooldown_timer = self.kb.cooldown_timer.saturating_sub(1);

            if let Some(&c) = self.kb.queue.front() {
                if self.can_push_key(c) {
                    self.try_push_next_key();
                }
            }
        }
    }

    pub(super) fn on_keyboard_irq_event(&mut self) {
        if self.kb.irq_pending {
            self.kb.irq_pending = false;

            if self.skctl & SKCTL_KEY_SCAN != 0 {
                self.assert_keyboard_irq();
            }
        }
    }

    pub(super) fn on_keyboard_scan_event(&mut self) {
        if !((self.is_5200_mode || self.kb.scan_enabled) && self.skctl & SKCTL_KEY_SCAN != 0) {
            return;
        }

        self.scheduler.set_event(SLOW_TICK_15KHZ, PokeyEvent::KeyboardScan);

        let kc = self.kb.scan_code & SCAN_CODE_MASK;
        self.kb.scan_code = self.kb.scan_code.wrapping_add(1);

        match kc {
            0x00 => {
                self.kb.control_latched = self.kb.effective_kr2(CONTROL_ROW);
            }
            0x10 => {
                let shift = self.kb.effective_kr2(SHIFT_ROW);
                if self.kb.shift_latched != shift {
                    self.kb.shift_latched = shift;
                    self.set_shift_status(shift);
                }
            }
            0x30 => {
                let brk = self.kb.effective_kr2(BREAK_ROW);
                if self.kb.break_latched != brk {
                    self.kb.break_latched = brk;
                    if brk {
                        self.assert_break_irq();
                    }
                }
            }
            _ => {}
        }

        let key = self.kb.effective_key(kc);
        // With debounce off the comparator always reports a match.
        let same = kc == self.kb.scan_latch || self.skctl & SKCTL_DEBOUNCE == 0;

        self.kb.scan_state = match self.kb.scan_state {
            KeyScanState::WaitingForKey if key => {
                self.kb.scan_latch = kc;
                KeyScanState::WaitingForBounce
            }
            KeyScanState::WaitingForBounce if key => {
                if same {
                    self.register_scanned_key(kc);
                    KeyScanState::WaitingForKeyUp
                }
                else {
                    KeyScanState::WaitingForKey
                }
            }
            KeyScanState::WaitingForBounce if same => KeyScanState::WaitingForKey,
            KeyScanState::WaitingForKeyUp if same && !key => KeyScanState::WaitingForDebounce,
            KeyScanState::WaitingForDebounce if same => {
                if key {
                    KeyScanState::WaitingForKeyUp
                }
                else {
                    self.skstat |= SKSTAT_KEY_DOWN;
                    KeyScanState::WaitingForKey
                }
            }
            state => state,
        };
    }

    fn register_scanned_key(&mut self, kc: u8) {
        let mut code = kc;
        if self.kb.shift_latched {
            code |= KBCODE_SHIFT;
        }
        if self.kb.control_latched {
            code |= KBCODE_CONTROL;
        }

        log::trace!("POKEY: Scanned key {:02X}", code);
        self.kbcode = code;
        self.skstat &= !SKSTAT_KEY_DOWN;

        if self.irqen & IRQ_KEY != 0 {
            if self.irqst & IRQ_KEY == 0 {
                // Previous key not yet acknowledged.
                self.skstat &= !SKSTAT_KEY_OVERRUN;
            }
            else {
                self.irqst &= !IRQ_KEY;
                self.assert_irq(false);
            }
        }
    }

    /// SKCTL bits 0-1 changed to `value`.
    pub(super) fn on_skctl_keyboard_change(&mut self, value: u8, delta: u8) {
        // Raw immediate mode emulates the scan on mode changes.
        if !self.is_5200_mode && !self.kb.scan_enabled {
            if value & SKCTL_DEBOUNCE == 0 {
                // No key can register with debounce off, and a held one is dropped.
                self.skstat |= SKSTAT_KEY_DOWN;
                self.kb.reset_scan();
            }
            else if value & SKCTL_INIT_MASK == SKCTL_INIT_MASK {
                self.set_shift_status(self.kb.shift_key);

                for row in 0..8 {
                    let cols = self.kb.matrix[row] & 0xFF;
                    if cols == 0 {
                        continue;
                    }

                    let mut code = (row as u8) * 8 + cols.trailing_zeros() as u8;
                    if self.kb.shift_key {
                        code |= KBCODE_SHIFT;
                    }
                    if self.kb.control_key {
                        code |= KBCODE_CONTROL;
                    }

                    self.skstat &= !SKSTAT_KEY_DOWN;
                    self.kbcode = code;
                    self.queue_keyboard_irq();
                }
            }
        }

        if delta & SKCTL_KEY_SCAN != 0 {
            if value & SKCTL_KEY_SCAN == 0 {
                // Resets the state machine but not the latched Shift state.
                self.skstat |= SKSTAT_KEY_DOWN;
                self.kb.reset_scan();
            }

            self.update_keyboard_scan_event();
        }
    }
}
