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

    devices::pokey::timers.rs

    The four audio timers, their linking and deferred scheduling.
*/

//! The four audio timers.
//!
//! Each channel is either *active*, with a borrow event armed on the
//! scheduler, or *deferred*, described to the renderer as a periodic
//! schedule with no events at all. A deferred channel only needs to be
//! resolved back into a concrete counter value when something changes its
//! parameters or a register read depends on it.

use super::{registers::*, Pokey};
use crate::{scheduler::PokeyEvent, updatable::Updatable};

/// Host cycles per tick of the 15KHz and 64KHz reference clocks.
pub const SLOW_TICK_15KHZ: u32 = 114;
pub const SLOW_TICK_64KHZ: u32 = 28;
/// Cycles from counter underflow to the borrow.
pub const BORROW_DELAY: u32 = 3;
/// A write to AUDFn reloads the counter this many cycles after the write.
pub const AUDF_WRITE_LATENCY: u32 = 2;
/// Reload value of the low half of a fast linked pair; three of its cycles
/// were already spent in the borrow.
pub const FAST_LINKED_RELOAD: u32 = 256 - BORROW_DELAY;
/// Deferred starts are pulled forward in multiples of at least this many
/// cycles to keep wrapping arithmetic meaningful.
pub const DEFERRED_CATCHUP_MIN: u32 = 2_097_152;
/// Oldest effective time kept for the double-buffered AUDF reload values.
pub const AUDFP1_MAX_LAG: u32 = 8192 * 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeferredSchedule {
    pub start: u32,
    pub period: u32,
}

impl DeferredSchedule {
    /// Cycles from `t` until the next borrow on this schedule. A start in the
    /// future is honored as-is.
    pub fn ticks_until_fire(&self, t: u32) -> u32 {
        let since = t.wrapping_sub(self.start);
        if (since as i32) < 0 {
            self.start.wrapping_sub(t)
        }
        else {
            self.period - since % self.period
        }
    }
}

/// Clocking decoded from AUDCTL.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TimerMode {
    pub fast1: bool,
    pub fast3: bool,
    pub linked12: bool,
    pub linked34: bool,
    pub clock_15khz: bool,
}

impl From<AudCtl> for TimerMode {
    fn from(a: AudCtl) -> Self {
        Self {
            fast1: a.fast_1(),
            fast3: a.fast_3(),
            linked12: a.link_12(),
            linked34: a.link_34(),
            clock_15khz: a.clock_15khz(),
        }
    }
}

impl TimerMode {
    #[inline]
    pub fn slow_tick(&self) -> u32 {
        if self.clock_15khz {
            SLOW_TICK_15KHZ
        }
        else {
            SLOW_TICK_64KHZ
        }
    }

    /// Whether the pair containing `channel` runs at 1.79MHz. Only the low
    /// channels have a fast clock select.
    #[inline]
    pub fn pair_fast(&self, channel: usize) -> bool {
        if channel < 2 {
            self.fast1
        }
        else {
            self.fast3
        }
    }

    #[inline]
    pub fn pair_linked(&self, channel: usize) -> bool {
        if channel < 2 {
            self.linked12
        }
        else {
            self.linked34
        }
    }

    /// The low channels clock fast on their own; a high channel only when
    /// linked to a fast low channel.
    #[inline]
    pub fn counts_fast(&self, channel: usize) -> bool {
        match channel {
            0 | 2 => self.pair_fast(channel),
            _ => self.pair_linked(channel) && self.pair_fast(channel),
        }
    }

    #[inline]
    pub fn is_lo_linked(&self, channel: usize) -> bool {
        channel & 1 == 0 && self.pair_linked(channel)
    }

    #[inline]
    pub fn is_hi_linked(&self, channel: usize) -> bool {
        channel & 1 == 1 && self.pair_linked(channel)
    }
}

#[derive(Clone, Debug)]
pub struct TimerChannel {
    pub audf: Updatable<u8>,
    pub audc: Updatable<u8>,
    // AUDF+1 before and after the most recent write, and the cycle at which
    // the newer value takes effect.
    audfp1_a: u32,
    audfp1_b: u32,
    audfp1_time: u32,
    pub counter: u32,
    pub borrow: u32,
    pub period: u32,
    pub allow_deferred: bool,
    pub deferred: Option<DeferredSchedule>,
}

impl Default for TimerChannel {
    fn default() -> Self {
        Self {
            audf: Updatable::new(0),
            audc: Updatable::new(0),
            audfp1_a: 1,
            audfp1_b: 1,
            audfp1_time: 0,
            counter: 1,
            borrow: 0,
            period: 0,
            allow_deferred: false,
            deferred: None,
        }
    }
}

impl TimerChannel {
    pub fn reset(&mut self) {
        self.audf.set(0);
        self.audc.set(0);
        self.audfp1_a = 1;
        self.audfp1_b = 1;
        self.audfp1_time = 0;
        self.counter = 1;
        self.borrow = 0;
        self.deferred = None;
    }

    /// The reload value in effect at cycle `t`.
    #[inline]
    pub fn audfp1(&self, t: u32) -> u32 {
        if t.wrapping_sub(self.audfp1_time) < 0x8000_0000 {
            self.audfp1_b
        }
        else {
            self.audfp1_a
        }
    }

    /// The reload value the channel will settle into.
    #[inline]
    pub fn audfp1_eventual(&self) -> u32 {
        self.audfp1_b
    }

    pub fn set_audfp1(&mut self, t: u32, period: u32) {
        let effective = t.wrapping_add(AUDF_WRITE_LATENCY);
        if self.audfp1_time != effective {
            self.audfp1_a = self.audfp1_b;
            self.audfp1_time = effective;
        }
        self.audfp1_b = period;
    }

    /// Forget any write still in flight. Used when restoring state.
    pub fn load_audfp1(&mut self, audf: u8) {
        self.audfp1_a = audf as u32 + 1;
        self.audfp1_b = audf as u32 + 1;
    }

    pub fn clamp_audfp1_time(&mut self, min_effective: u32) {
        if (self.audfp1_time.wrapping_sub(min_effective) as i32) < 0 {
            self.audfp1_time = min_effective;
        }
    }
}

impl Pokey {
    /// Recompute the steady-state period of `channel` from the eventual reload
    /// value, not the value that applies on the very next tick.
    pub(super) fn recompute_timer_period(&mut self, channel: usize) {
        let slow = self.mode.slow_tick();
        let fast = self.mode.counts_fast(channel);

        let period = if self.mode.is_hi_linked(channel) {
            let lo = channel & !1;
            let p = ((*self.channels[channel].audf as u32) << 8) + self.channels[lo].audfp1_eventual();
            if fast {
                p + 2 * BORROW_DELAY
            }
            else {
                p * slow
            }
        }
        else {
            let p = self.channels[channel].audfp1_eventual();
            if self.mode.is_lo_linked(channel) {
                self.full_period[channel >> 1] = if fast { 256 } else { 256 * slow };
            }
            if fast {
                p + BORROW_DELAY
            }
            else {
                p * slow
            }
        };

        self.channels[channel].period = period;
    }

    pub(super) fn recompute_all_timer_periods(&mut self) {
        for channel in 0..4 {
            self.recompute_timer_period(channel);
        }
    }

    /// A channel may run deferred only when nothing needs its borrows at exact
    /// cycles: no timer IRQ, no two-tone resync, no serial clocking. Linked
    /// pairs defer together or not at all.
    pub(super) fn recompute_allowed_deferred_timers(&mut self) {
        let two_tone = self.skctl & SKCTL_TWO_TONE != 0;
        let send_mode = self.skctl & SKCTL_SEND_MODE;

        let mut allow = [
            self.irqen & IRQ_TIMER1 == 0 && !two_tone,
            self.irqen & IRQ_TIMER2 == 0 && !two_tone && send_mode != 0x60,
            true,
            self.irqen & IRQ_TIMER4 == 0
                && self.skctl & SKCTL_ASYNC_RECV == 0
                && send_mode != 0x20
                && send_mode != 0x40,
        ];

        for lo in [0, 2] {
            if self.mode.pair_linked(lo) && !(allow[lo] && allow[lo + 1]) {
                allow[lo] = false;
                allow[lo + 1] = false;
            }
        }

        for (ch, allowed) in allow.into_iter().enumerate() {
            self.channels[ch].allow_deferred = allowed;
        }
    }

    /// Cycles until `channel` borrows next, from whichever representation is
    /// authoritative. None if the channel is stopped.
    fn ticks_until_borrow(&self, channel: usize, t: u32) -> Option<u32> {
        match self.channels[channel].deferred {
            Some(schedule) => Some(schedule.ticks_until_fire(t)),
            None => self.scheduler.ticks_to_event(PokeyEvent::timer_borrow(channel)),
        }
    }

    /// Reconstruct the current counter value and borrow phase of `channel`.
    pub(super) fn update_timer_counter(&mut self, channel: usize) {
        let t = self.scheduler.tick();
        let slow = self.mode.slow_tick();
        let fast = self.mode.counts_fast(channel);
        let hi_linked = self.mode.is_hi_linked(channel);
        let lo_linked = self.mode.is_lo_linked(channel);

        self.channels[channel].borrow = 0;

        // The low half of a linked pair is tracked through the high half's borrows.
        let source = if lo_linked { channel | 1 } else { channel };
        let Some(mut ticks_left) = self.ticks_until_borrow(source, t)
        else {
            return;
        };
        let ticks_left0 = ticks_left;

        let full_period = self.full_period[channel >> 1];
        let ch = &mut self.channels[channel];

        if lo_linked {
            if ticks_left <= BORROW_DELAY {
                // High half is borrowing; low half already ran its borrow and free runs.
                ch.counter = if fast { 256 - ticks_left } else { 256 };
            }
            else {
                ticks_left -= BORROW_DELAY;

                if ticks_left <= BORROW_DELAY {
                    ch.borrow = ticks_left;
                    ch.counter = if fast { 256 - ticks_left } else { 256 };
                }
                else {
                    ticks_left = (ticks_left - BORROW_DELAY) % full_period;
                    if !fast {
                        ticks_left = ticks_left.div_ceil(slow);
                    }
                    ch.counter = if ticks_left != 0 { ticks_left } else { 256 };
                }
            }
        }
        else if ticks_left <= BORROW_DELAY {
            ch.borrow = ticks_left;
            ch.counter = if fast && !hi_linked { 256 - ticks_left } else { 256 };
        }
        else {
            ticks_left -= BORROW_DELAY;

            if hi_linked {
                if ticks_left <= BORROW_DELAY {
                    ch.counter = 256;
                    ch.borrow = ticks_left + BORROW_DELAY;
                }
                else {
                    ticks_left -= BORROW_DELAY;
                    ch.counter = if fast {
                        (ticks_left + 255) >> 8
                    }
                    else {
                        ticks_left.div_ceil(slow * 256)
                    };
                }
            }
            else if fast {
                ch.counter = ticks_left;
            }
            else {
                ch.counter = ticks_left.div_ceil(slow);
            }
        }

        log::trace!(
            "POKEY: Counter[{}] = {:03X}+{} ({} ticks left)",
            channel,
            ch.counter,
            ch.borrow,
            ticks_left0
        );

        debug_assert!(ch.counter > 0 && ch.counter <= 256);
        debug_assert!(ch.borrow <= if hi_linked { 2 * BORROW_DELAY } else { BORROW_DELAY });
    }

    pub(super) fn update_all_timer_counters(&mut self) {
        for channel in 0..4 {
            self.update_timer_counter(channel);
        }
    }

    /// Cycles for `counter` ticks to elapse, aligned to the slow clock when the
    /// channel isn't running at 1.79MHz.
    #[inline]
    fn counter_ticks(&self, counter: u32, fast: bool, cycles_to_slow_tick: i32) -> u32 {
        if fast {
            counter
        }
        else {
            ((counter * self.mode.slow_tick()) as i32 + cycles_to_slow_tick) as u32
        }
    }

    fn clear_timer_schedule(&mut self, channel: usize) {
        self.scheduler.unset_event(PokeyEvent::timer_borrow(channel));
        self.flush_deferred_timer_events(channel);
    }

    /// With the reference clocks stopped only an in-progress borrow can complete.
    fn schedule_pending_borrow(&mut self, channel: usize) {
        let borrow = self.channels[channel].borrow;
        if borrow != 0 {
            self.scheduler.set_event(borrow, PokeyEvent::timer_borrow(channel));
        }
    }

    fn schedule_timer(&mut self, channel: usize, t: u32, ticks: u32) {
        debug_assert!((ticks as i32) > 0);

        if !self.channels[channel].allow_deferred {
            log::trace!("POKEY: Timer {} - active tick in {} cycles", channel + 1, ticks);
            self.scheduler.set_event(ticks, PokeyEvent::timer_borrow(channel));
        }
        else {
            log::trace!("POKEY: Timer {} - passive tick in {} cycles", channel + 1, ticks);
            let period = self.channels[channel].period;
            self.setup_deferred_timer_events(channel, t.wrapping_add(ticks), period);
        }
    }

    /// Rebuild the schedule of each channel in `mask` from its current
    /// counter and borrow. Both halves of a linked pair must have been
    /// brought up to date before the pair is set up.
    pub(super) fn setup_timers(&mut self, mask: u8) {
        let t = self.scheduler.tick();
        let slow = self.mode.slow_tick();

        let last_slow = if self.mode.clock_15khz {
            self.update_last_15khz_time(t)
        }
        else {
            self.update_last_64khz_time(t)
        };
        let mut cycles_to_slow_tick = slow as i32 - t.wrapping_sub(last_slow) as i32;
        if cycles_to_slow_tick != 0 {
            cycles_to_slow_tick -= slow as i32;
        }

        let slow_tick_valid = !is_init_mode(self.skctl);
        debug_assert!(!slow_tick_valid || (-(SLOW_TICK_15KHZ as i32)..=0).contains(&cycles_to_slow_tick));

        // Timers 3 and 4 are held while asynchronous receive waits for a start bit.
        let async_hold = self.skctl & SKCTL_ASYNC_RECV != 0 && self.ser_in.waiting_for_start_bit;

        for lo in [0usize, 2] {
            let hi = lo + 1;

            if lo == 2 && async_hold {
                for channel in [lo, hi] {
                    if mask & (1 << channel) != 0 {
                        self.clear_timer_schedule(channel);
                        self.schedule_pending_borrow(channel);
                    }
                }
                continue;
            }

            if mask & (1 << lo) != 0 {
                self.setup_lo_timer(lo, t, cycles_to_slow_tick, slow_tick_valid);
            }
            if mask & (1 << hi) != 0 {
                self.setup_hi_timer(hi, t, cycles_to_slow_tick, slow_tick_valid);
            }
        }
    }

    fn setup_lo_timer(&mut self, lo: usize, t: u32, cycles_to_slow_tick: i32, slow_tick_valid: bool) {
        let hi = lo + 1;
        let fast = self.mode.pair_fast(lo);
        let linked = self.mode.pair_linked(lo);

        self.clear_timer_schedule(lo);

        if !fast && !slow_tick_valid {
            self.schedule_pending_borrow(lo);
            return;
        }

        let mut ticks = self.channels[lo].borrow;
        if ticks == 0 {
            if linked && self.channels[hi].borrow != 0 {
                // High half is borrowing, so the low half is about to restart at full period.
                ticks = self.channels[hi].borrow + self.channels[hi].period - BORROW_DELAY;
            }
            else {
                ticks = self.counter_ticks(self.channels[lo].counter, fast, cycles_to_slow_tick) + BORROW_DELAY;
            }
        }

        if !self.channels[lo].allow_deferred || !linked {
            self.schedule_timer(lo, t, ticks);
            return;
        }

        debug_assert!((ticks as i32) > 0);

        let full_period = self.full_period[lo >> 1];
        let lo_time = t.wrapping_add(ticks);
        let hi_ch = &self.channels[hi];
        let hi_time = if hi_ch.borrow != 0 {
            let hi_time = t.wrapping_add(hi_ch.borrow);
            if (hi_time.wrapping_sub(lo_time) as i32) < 0 {
                hi_time.wrapping_add(hi_ch.period)
            }
            else {
                hi_time
            }
        }
        else {
            lo_time
                .wrapping_add(BORROW_DELAY)
                .wrapping_add(full_period * (hi_ch.counter - 1))
        };
        let hi_period = hi_ch.period;
        let lo_offset = self.channels[lo].period - BORROW_DELAY;

        log::trace!(
            "POKEY: Timer {} - passive linked tick in {} cycles, hi-tick in {} cycles (full period {})",
            lo + 1,
            ticks,
            hi_time.wrapping_sub(t),
            full_period
        );
        self.setup_deferred_timer_events_linked(lo, lo_time, full_period, hi_time, hi_period, lo_offset);
    }

    fn setup_hi_timer(&mut self, hi: usize, t: u32, cycles_to_slow_tick: i32, slow_tick_valid: bool) {
        let lo = hi - 1;

        self.clear_timer_schedule(hi);

        let ticks = if self.mode.pair_linked(lo) {
            let fast = self.mode.pair_fast(lo);
            if !fast && !slow_tick_valid {
                self.schedule_pending_borrow(hi);
                return;
            }

            let mut ticks = self.channels[hi].borrow;
            if ticks == 0 {
                ticks = self.channels[lo].borrow;
                if ticks == 0 {
                    ticks = self.counter_ticks(self.channels[lo].counter, fast, cycles_to_slow_tick) + BORROW_DELAY;
                }

                let full_turns = self.channels[hi].counter - 1;
                ticks += if fast {
                    full_turns << 8
                }
                else {
                    full_turns * 256 * self.mode.slow_tick()
                };
                ticks += BORROW_DELAY;
            }
            ticks
        }
        else {
            if !slow_tick_valid {
                self.schedule_pending_borrow(hi);
                return;
            }

            match self.channels[hi].borrow {
                0 => self.counter_ticks(self.channels[hi].counter, false, cycles_to_slow_tick) + BORROW_DELAY,
                borrow => borrow,
            }
        };

        self.schedule_timer(hi, t, ticks);
    }

    pub(super) fn flush_deferred_timer_events(&mut self, channel: usize) {
        if self.channels[channel].deferred.take().is_some() {
            let t = self.scheduler.tick();
            self.renderer.clear_channel_deferred_events(channel, t);
        }
    }

    fn setup_deferred_timer_events(&mut self, channel: usize, start: u32, period: u32) {
        debug_assert!(self.channels[channel].deferred.is_none());
        self.channels[channel].deferred = Some(DeferredSchedule { start, period });
        self.renderer.set_channel_deferred_events(channel, start, period);
    }

    fn setup_deferred_timer_events_linked(
        &mut self,
        channel: usize,
        start: u32,
        period: u32,
        hi_start: u32,
        hi_period: u32,
        lo_offset: u32,
    ) {
        debug_assert!(self.channels[channel].deferred.is_none());
        self.channels[channel].deferred = Some(DeferredSchedule { start, period });
        self.renderer
            .set_channel_deferred_events_linked(channel, start, period, hi_start, hi_period, lo_offset);
    }

    fn timer_irq(&mut self, bit: u8) {
        if self.irqen & bit != 0 {
            self.irqst &= !bit;
            self.assert_irq(false);
        }
    }

    fn toggle_serial_clock_phase(&mut self) {
        self.ser_out.clock_phase = !self.ser_out.clock_phase;
        if self.ser_out.clock_phase && self.ser_out.counter != 0 {
            self.scheduler.set_event(2, PokeyEvent::SerialOutput);
        }
    }

    fn fire_timer(&mut self, channel: usize) {
        self.renderer.add_channel_event(channel);

        match channel {
            0 => {
                self.timer_irq(IRQ_TIMER1);
                if self.skctl & SKCTL_TWO_TONE != 0 && self.ser_out.output_state && self.skctl & SKCTL_FORCE_BREAK == 0
                {
                    self.scheduler.set_event(2, PokeyEvent::ResetTwoTones1);
                }
            }
            1 => {
                self.timer_irq(IRQ_TIMER2);
                if self.skctl & SKCTL_TWO_TONE != 0 {
                    self.scheduler.set_event(2, PokeyEvent::ResetTwoTones2);
                }
                if OutputClock::from(self.skctl) == OutputClock::Timer2 {
                    self.toggle_serial_clock_phase();
                }
            }
            3 => {
                self.timer_irq(IRQ_TIMER4);
                if self.skctl & SKCTL_RECV_MODE != 0 {
                    self.on_serial_input_tick();
                }
                if OutputClock::from(self.skctl) == OutputClock::Timer4 {
                    self.toggle_serial_clock_phase();
                }
            }
            _ => {}
        }
    }

    /// A two-tone resync landing on the same cycle gates off the borrow.
    fn two_tone_resync_coincident(&self) -> bool {
        self.scheduler.ticks_to_event(PokeyEvent::ResetTwoTones1) == Some(0)
            || self.scheduler.ticks_to_event(PokeyEvent::ResetTwoTones2) == Some(0)
    }

    pub(super) fn on_timer_borrow(&mut self, channel: usize) {
        if channel >= 2 || !self.two_tone_resync_coincident() {
            self.fire_timer(channel);
        }

        let t = self.scheduler.tick();
        let linked = self.mode.pair_linked(channel);
        self.channels[channel].borrow = 0;

        if channel & 1 == 0 {
            if !linked {
                self.channels[channel].counter = self.channels[channel].audfp1(t);
            }
            else {
                self.channels[channel].counter = if self.mode.pair_fast(channel) {
                    FAST_LINKED_RELOAD
                }
                else {
                    256
                };
                // SetupTimers needs to see whether the high half is mid-borrow.
                self.update_timer_counter(channel | 1);
            }
            self.setup_timers(1 << channel);
        }
        else {
            let lo = channel - 1;
            self.channels[channel].counter = self.channels[channel].audfp1(t);
            if linked {
                self.channels[lo].counter = self.channels[lo].audfp1(t);
                self.channels[lo].borrow = 0;
                self.setup_timers(0b11 << lo);
            }
            else {
                self.setup_timers(1 << channel);
            }
        }
    }

    /// Two-tone resync of timers 1 and 2.
    pub(super) fn on_reset_two_tones(&mut self) {
        let t = self.scheduler.tick();
        for ch in 0..2 {
            self.channels[ch].counter = self.channels[ch].audfp1(t);
            self.channels[ch].borrow = 0;
        }
        self.setup_timers(0b0011);
    }

    /// First phase of STIMER: drop in-progress borrows, except that a timer
    /// one cycle from firing is cancelled outright.
    pub(super) fn on_reset_timers(&mut self) {
        for channel in 0..4 {
            self.channels[channel].borrow = 0;

            let event = PokeyEvent::timer_borrow(channel);
            if self.scheduler.ticks_to_event(event) == Some(1) {
                self.scheduler.unset_event(event);
            }
        }
        self.scheduler.set_event(1, PokeyEvent::ResetTimers2);
    }

    pub(super) fn on_reset_timers2(&mut self) {
        let t = self.scheduler.tick();
        for ch in self.channels.iter_mut() {
            ch.counter = ch.audfp1(t);
        }
        self.renderer.reset_timers();
        self.setup_timers(0b1111);
    }

    pub(super) fn write_audf(&mut self, channel: usize, value: u8) {
        if *self.channels[channel].audf == value {
            return;
        }

        let t = self.scheduler.tick();
        self.channels[channel].audf.update(value);
        self.channels[channel].set_audfp1(t, value as u32 + 1);
        self.recompute_timer_period(channel);

        let lo = channel & !1;
        if self.mode.pair_linked(lo) {
            if channel == lo {
                self.recompute_timer_period(lo + 1);
            }
            // Both counters must be current before the pair is set up again.
            self.update_timer_counter(lo);
            self.update_timer_counter(lo + 1);
            self.setup_timers(0b11 << lo);
        }
        else {
            self.update_timer_counter(channel);
            self.setup_timers(1 << channel);
        }
    }

    pub(super) fn write_audctl(&mut self, value: u8) {
        if self.audctl == value {
            return;
        }

        let delta = self.audctl ^ value;
        if delta & AUDCTL_PERIOD_34 != 0 {
            self.ser_rate_changed = true;
        }

        self.update_all_timer_counters();
        for channel in 0..4 {
            self.flush_deferred_timer_events(channel);
        }

        self.audctl = value;
        self.mode = TimerMode::from(AudCtl::from(value));
        self.renderer.set_audctl(value);

        if delta & (AUDCTL_LINK_12 | AUDCTL_LINK_34) != 0 {
            self.recompute_allowed_deferred_timers();
        }
        if delta & AUDCTL_PERIOD_12 != 0 {
            self.recompute_timer_period(0);
            self.recompute_timer_period(1);
        }
        if delta & AUDCTL_PERIOD_34 != 0 {
            self.recompute_timer_period(2);
            self.recompute_timer_period(3);
        }

        self.setup_timers(0b1111);
    }

    /// Most recent 15KHz tick at or before `t`, without recording it.
    pub(super) fn last_15khz_at(&self, t: u32) -> u32 {
        let offset = t.wrapping_sub(self.last_15khz_time);
        if offset >= SLOW_TICK_15KHZ {
            self.last_15khz_time.wrapping_add(offset - offset % SLOW_TICK_15KHZ)
        }
        else {
            self.last_15khz_time
        }
    }

    pub(super) fn update_last_15khz_time(&mut self, t: u32) -> u32 {
        self.last_15khz_time = self.last_15khz_at(t);
        self.last_15khz_time
    }

    pub(super) fn update_last_64khz_time(&mut self, t: u32) -> u32 {
        let mut offset = t.wrapping_sub(self.last_64khz_time);
        if offset >= SLOW_TICK_64KHZ {
            self.last_64khz_time = self.last_64khz_time.wrapping_add(SLOW_TICK_64KHZ);
            offset -= SLOW_TICK_64KHZ;

            if offset >= SLOW_TICK_64KHZ {
                self.last_64khz_time = self
                    .last_64khz_time
                    .wrapping_add(offset - offset % SLOW_TICK_64KHZ);
            }
        }
        self.last_64khz_time
    }

    /// Cycles until `channel` next borrows, or 0 if it is stopped.
    pub fn cycles_to_timer_fire(&self, channel: usize) -> u32 {
        assert!(channel < 4);
        let t = self.scheduler.tick();
        match self.channels[channel].deferred {
            Some(schedule) => schedule.ticks_until_fire(t),
            None => self
                .scheduler
                .ticks_to_event(PokeyEvent::timer_borrow(channel))
                .unwrap_or(0),
        }
    }

    /// Steady-state period of `channel` in host cycles.
    pub fn timer_period(&self, channel: usize) -> u32 {
        self.channels[channel].period
    }

    pub fn is_timer_deferred(&self, channel: usize) -> bool {
        self.channels[channel].deferred.is_some()
    }

    /// Keep deferred starts, clock anchors and AUDF write times within
    /// wrapping range of the current cycle.
    pub(super) fn catch_up_timers(&mut self, t: u32) {
        for ch in self.channels.iter_mut() {
            let Some(schedule) = ch.deferred.as_mut()
            else {
                continue;
            };

            // Catch up by a multiple of the period. A start still in the
            // future fails the signed comparison and is left alone.
            let mut big_period = schedule.period;
            while big_period < DEFERRED_CATCHUP_MIN {
                big_period <<= 4;
            }

            if (t.wrapping_sub(schedule.start) as i32) > big_period as i32 {
                schedule.start = schedule.start.wrapping_add(big_period);
            }
        }

        self.update_last_15khz_time(t);
        self.update_last_64khz_time(t);

        let min_effective = t.wrapping_sub(AUDFP1_MAX_LAG);
        for ch in self.channels.iter_mut() {
            ch.clamp_audfp1_time(min_effective);
        }
    }
}
