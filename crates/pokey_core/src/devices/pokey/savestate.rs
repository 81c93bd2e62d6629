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

    devices::pokey::savestate.rs

    Save state snapshot and restore.
*/

//! Snapshot and restore.
//!
//! Only architectural registers and a handful of phase offsets relative to
//! the current cycle are stored. Scheduling (which channels run deferred,
//! which events are pending) is rebuilt on load by the same setup path a
//! register write takes.

use serde_derive::{Deserialize, Serialize};

use super::{
    keyboard::KeyScanState,
    poly::{POLY17_PERIOD, POLY9_PERIOD},
    pots::POT_COUNT,
    registers::*,
    serial::{RECV_BITS_INTERNAL, SEND_BITS},
    timers::{TimerMode, BORROW_DELAY, SLOW_TICK_15KHZ, SLOW_TICK_64KHZ},
    Pokey,
};
use crate::{error::PokeyError, scheduler::PokeyEvent};

/// Shutoff age stored for a chip that left init mode long ago.
const POLY_SHUTOFF_SETTLED: u64 = 1000;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PokeySaveState {
    pub audf: [u8; 4],
    pub audc: [u8; 4],
    pub audctl: u8,
    pub irqen: u8,
    pub irqst: u8,
    pub skctl: u8,
    pub skstat: u8,
    pub allpot: u8,
    pub kbcode: u8,
    pub serin: u8,
    pub serout: u8,
    pub pot_latches: [u8; POT_COUNT],

    pub internal: Option<PokeyInternalState>,
    pub stereo_pair: Option<Box<PokeySaveState>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PokeyInternalState {
    pub timer_counters: [u32; 4],
    pub timer_borrows: [u32; 4],
    pub two_tone_reset: [u32; 2],

    /// Cycles since the last tick of each reference clock.
    pub clock_15khz_offset: u32,
    pub clock_64khz_offset: u32,
    pub poly9_offset: u32,
    pub poly17_offset: u32,
    /// Cycles since init mode was entered.
    pub poly_shutoff_age: u64,

    pub ser_in_counter: u32,
    pub ser_in_shift: u8,
    pub ser_in_deferred_load: bool,
    pub ser_in_waiting_for_start_bit: bool,

    pub ser_out_event_time: u32,
    pub ser_out_shift: u8,
    /// Whole bits left to shift (0..=10). Stored as the raw countdown, not a
    /// half-bit count; the clock phase is kept in `ser_clock_phase`.
    pub ser_out_counter: u32,
    pub ser_out_valid: bool,
    pub ser_out_shift_valid: bool,
    pub ser_clock_phase: bool,

    pub key_scan_code: u8,
    pub key_scan_state: u8,
    pub key_irq_pending: bool,

    pub trace_byte_index: u32,
}

impl PokeySaveState {
    /// Reject out of range phase values before anything is touched.
    pub fn validate(&self) -> Result<(), PokeyError> {
        if let Some(internal) = &self.internal {
            internal.validate()?;
        }
        if let Some(pair) = &self.stereo_pair {
            pair.validate()?;
        }
        Ok(())
    }
}

impl PokeyInternalState {
    pub fn validate(&self) -> Result<(), PokeyError> {
        for (i, &counter) in self.timer_counters.iter().enumerate() {
            if !(1..=256).contains(&counter) {
                return Err(PokeyError::InvalidSaveState(format!(
                    "timer {} counter {} out of range",
                    i + 1,
                    counter
                )));
            }
        }

        for (i, &borrow) in self.timer_borrows.iter().enumerate() {
            if borrow > 2 * BORROW_DELAY {
                return Err(PokeyError::InvalidSaveState(format!(
                    "timer {} borrow {} out of range",
                    i + 1,
                    borrow
                )));
            }
        }

        let checks = [
            ("15KHz clock offset", self.clock_15khz_offset, SLOW_TICK_15KHZ),
            ("64KHz clock offset", self.clock_64khz_offset, SLOW_TICK_64KHZ),
            ("poly9 offset", self.poly9_offset, POLY9_PERIOD),
            ("poly17 offset", self.poly17_offset, POLY17_PERIOD),
            ("serial input counter", self.ser_in_counter, RECV_BITS_INTERNAL + 1),
            ("serial output counter", self.ser_out_counter, SEND_BITS + 1),
        ];

        for (name, value, limit) in checks {
            if value >= limit {
                return Err(PokeyError::InvalidSaveState(format!("{} {} out of range", name, value)));
            }
        }

        Ok(())
    }
}

impl Pokey {
    pub fn save_state(&mut self) -> PokeySaveState {
        self.update_all_timer_counters();

        let t = self.scheduler.tick();
        let (poly9, poly17) = self.poly_offsets_at(t);

        let internal = PokeyInternalState {
            timer_counters: std::array::from_fn(|i| self.channels[i].counter),
            timer_borrows: std::array::from_fn(|i| self.channels[i].borrow),
            two_tone_reset: [
                self.scheduler.ticks_to_event(PokeyEvent::ResetTwoTones1).unwrap_or(0),
                self.scheduler.ticks_to_event(PokeyEvent::ResetTwoTones2).unwrap_or(0),
            ],
            clock_15khz_offset: t.wrapping_sub(self.update_last_15khz_time(t)),
            clock_64khz_offset: t.wrapping_sub(self.update_last_64khz_time(t)),
            poly9_offset: poly9,
            poly17_offset: poly17,
            poly_shutoff_age: self.scheduler.tick64().wrapping_sub(self.poly_shutoff_time),
            ser_in_counter: self.ser_in.counter,
            ser_in_shift: self.ser_in.shift_register,
            ser_in_deferred_load: self.ser_in.deferred_load,
            ser_in_waiting_for_start_bit: self.ser_in.waiting_for_start_bit,
            ser_out_event_time: self.scheduler.ticks_to_event(PokeyEvent::SerialOutput).unwrap_or(0),
            ser_out_shift: self.ser_out.shift_register,
            ser_out_counter: self.ser_out.counter,
            ser_out_valid: self.ser_out.valid,
            ser_out_shift_valid: self.ser_out.shift_valid,
            ser_clock_phase: self.ser_out.clock_phase,
            key_scan_code: self.kb.scan_code,
            key_scan_state: self.kb.scan_state.to_bits(),
            key_irq_pending: self.kb.irq_pending,
            trace_byte_index: self.trace_byte_index,
        };

        PokeySaveState {
            audf: std::array::from_fn(|i| *self.channels[i].audf),
            audc: std::array::from_fn(|i| *self.channels[i].audc),
            audctl: self.audctl,
            irqen: self.irqen,
            irqst: self.irqst,
            skctl: self.skctl,
            skstat: self.skstat,
            allpot: self.pots.allpot,
            kbcode: self.kbcode,
            serin: self.serin,
            serout: self.serout,
            pot_latches: self.pots.latches,
            internal: Some(internal),
            stereo_pair: self.slave.as_mut().map(|slave| Box::new(slave.save_state())),
        }
    }

    /// Restore a snapshot. `None` returns the chip to power-on state.
    pub fn load_state(&mut self, state: Option<&PokeySaveState>) -> Result<(), PokeyError> {
        let Some(state) = state
        else {
            log::debug!("POKEY: Loading empty state");
            self.cold_reset();
            return Ok(());
        };

        state.validate()?;
        self.restore_state(state);
        self.post_load_state();
        Ok(())
    }

    fn restore_state(&mut self, state: &PokeySaveState) {
        for i in 0..4 {
            self.channels[i].audf.set(state.audf[i]);
            self.channels[i].audc.set(state.audc[i]);
            self.channels[i].load_audfp1(state.audf[i]);
            self.channels[i].deferred = None;
            self.reg_shadow[(i * 2) + REG_AUDF1 as usize] = state.audf[i];
            self.reg_shadow[(i * 2) + REG_AUDC1 as usize] = state.audc[i];
        }

        self.audctl = state.audctl;
        self.irqen = state.irqen;
        self.irqst = state.irqst;
        self.skctl = state.skctl;
        self.skstat = state.skstat;
        self.pots.allpot = state.allpot;
        self.pots.latches = state.pot_latches;
        self.kbcode = state.kbcode;
        self.serin = state.serin;
        self.serout = state.serout;

        self.reg_shadow[REG_AUDCTL as usize] = state.audctl;
        self.reg_shadow[REG_SEROUT as usize] = state.serout;
        self.reg_shadow[REG_IRQEN as usize] = state.irqen;
        self.reg_shadow[REG_SKCTL as usize] = state.skctl;

        let t64 = self.scheduler.tick64();
        let t = self.scheduler.tick();

        for event in [
            PokeyEvent::ResetTwoTones1,
            PokeyEvent::ResetTwoTones2,
            PokeyEvent::SerialInput,
            PokeyEvent::SerialOutput,
            PokeyEvent::ResetTimers,
            PokeyEvent::ResetTimers2,
        ] {
            self.scheduler.unset_event(event);
        }
        for channel in 0..4 {
            self.scheduler.unset_event(PokeyEvent::timer_borrow(channel));
        }

        let internal = state.internal.clone().unwrap_or_else(|| PokeyInternalState {
            timer_counters: [1; 4],
            clock_15khz_offset: 1,
            clock_64khz_offset: 1,
            poly_shutoff_age: POLY_SHUTOFF_SETTLED,
            ser_in_waiting_for_start_bit: true,
            ..Default::default()
        });

        for i in 0..4 {
            self.channels[i].counter = internal.timer_counters[i];
            self.channels[i].borrow = internal.timer_borrows[i];
        }

        self.last_15khz_time = t.wrapping_sub(internal.clock_15khz_offset);
        self.last_64khz_time = t.wrapping_sub(internal.clock_64khz_offset);
        self.poly9_counter = internal.poly9_offset;
        self.poly17_counter = internal.poly17_offset;
        self.poly_shutoff_time = t64.wrapping_sub(internal.poly_shutoff_age);

        self.ser_in.counter = internal.ser_in_counter;
        self.ser_in.shift_register = internal.ser_in_shift;
        self.ser_in.deferred_load = internal.ser_in_deferred_load;
        self.ser_in.waiting_for_start_bit = internal.ser_in_waiting_for_start_bit;

        if internal.ser_out_event_time != 0 {
            self.scheduler
                .set_event(internal.ser_out_event_time, PokeyEvent::SerialOutput);
        }
        self.ser_out.shift_register = internal.ser_out_shift;
        self.ser_out.counter = internal.ser_out_counter;
        self.ser_out.valid = internal.ser_out_valid;
        self.ser_out.shift_valid = internal.ser_out_shift_valid;
        self.ser_out.clock_phase = internal.ser_clock_phase;
        self.ser_out.output_state = self.ser_out.line_level();

        for (event, delay) in [PokeyEvent::ResetTwoTones1, PokeyEvent::ResetTwoTones2]
            .into_iter()
            .zip(internal.two_tone_reset)
        {
            if delay != 0 {
                self.scheduler.set_event(delay, event);
            }
        }

        self.kb.scan_code = internal.key_scan_code;
        self.kb.scan_state = KeyScanState::from_bits(internal.key_scan_state);
        self.kb.irq_pending = internal.key_irq_pending;

        self.trace_byte_index = internal.trace_byte_index;

        if let Some(slave) = self.slave.as_mut() {
            match state.stereo_pair.as_deref() {
                Some(pair) => slave.restore_state(pair),
                None => slave.restore_state(&PokeySaveState::default()),
            }
        }
        else if state.stereo_pair.is_some() {
            log::warn!("POKEY: Ignoring stereo state, no secondary chip attached");
        }
    }

    /// Rebuild everything derived from the restored registers.
    fn post_load_state(&mut self) {
        let t = self.scheduler.tick();

        self.mode = TimerMode::from(AudCtl::from(self.audctl));
        self.renderer.set_init_mode(is_init_mode(self.skctl));
        self.renderer.set_audctl(self.audctl);
        for channel in 0..4 {
            let audc = *self.channels[channel].audc;
            self.renderer.set_audcx(channel, audc);
        }

        self.last_poly_time = t;
        self.update_irq_line(false);

        if self.kb.irq_pending {
            let delay = SLOW_TICK_15KHZ - t.wrapping_sub(self.update_last_15khz_time(t));
            self.scheduler.set_event(delay, PokeyEvent::KeyboardIrq);
        }
        else {
            self.scheduler.unset_event(PokeyEvent::KeyboardIrq);
        }
        self.update_keyboard_scan_event();

        self.recompute_all_timer_periods();
        self.recompute_allowed_deferred_timers();
        self.setup_timers(0b1111);

        if let Some(slave) = self.slave.as_mut() {
            slave.post_load_state();
        }

        self.notify_force_break();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::pokey::tests::TestRig;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const SKCTL_CHOICES: [u8; 5] = [0x03, 0x0B, 0x23, 0x43, 0x63];

    fn random_writes(rig: &mut TestRig, rng: &mut StdRng, count: usize) {
        for _ in 0..count {
            match rng.gen_range(0..6) {
                0 => {
                    let reg = REG_AUDF1 + 2 * rng.gen_range(0..4u8);
                    rig.write(reg, rng.gen());
                }
                1 => {
                    let reg = REG_AUDC1 + 2 * rng.gen_range(0..4u8);
                    rig.write(reg, rng.gen());
                }
                2 => rig.write(REG_AUDCTL, rng.gen()),
                3 => rig.write(REG_IRQEN, rng.gen::<u8>() & IRQ_TIMERS),
                4 => rig.write(REG_SKCTL, SKCTL_CHOICES[rng.gen_range(0..SKCTL_CHOICES.len())]),
                _ => rig.write(REG_STIMER, 0),
            }
            rig.advance(rng.gen_range(1..400));
        }
    }

    fn assert_same_observables(a: &mut TestRig, b: &mut TestRig) {
        for reg in [REG_IRQST, REG_SKSTAT, REG_KBCODE, REG_RANDOM] {
            assert_eq!(a.read(reg), b.read(reg), "register {:02X} at {}", reg, a.now());
        }
        for ch in 0..4 {
            assert_eq!(
                a.pokey.cycles_to_timer_fire(ch),
                b.pokey.cycles_to_timer_fire(ch),
                "timer {} at {}",
                ch + 1,
                a.now()
            );
        }
    }

    #[test]
    fn test_round_trip_reproduces_reads() {
        let mut rng = StdRng::seed_from_u64(0x5EED_0001);

        for _ in 0..20 {
            let mut a = TestRig::running();
            random_writes(&mut a, &mut rng, 12);
            // Let any STIMER sequence finish.
            a.advance(16);

            let state = a.pokey.save_state();
            let mut b = TestRig::with_start(a.now());
            b.pokey.load_state(Some(&state)).unwrap();
            assert_eq!(b.pokey.save_state(), state);

            for _ in 0..40 {
                let step = rng.gen_range(1..700);
                a.advance(step);
                b.advance(step);
                assert_same_observables(&mut a, &mut b);
            }
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let mut rig = TestRig::running();
        rig.write(REG_AUDF1, 0x40);
        rig.write(REG_AUDC1, 0xA8);
        rig.advance(1000);

        let state = rig.pokey.save_state();
        let text = toml::to_string(&state).unwrap();
        let back: PokeySaveState = toml::from_str(&text).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_mid_byte_send_saves_whole_bit_countdown() {
        let mut rig = TestRig::running();
        rig.add_device(&[], false);
        rig.pokey.set_external_serial_clock(0, 40);
        rig.write(REG_SEROUT, 0x5A);

        let mut steps = 0;
        while !(2..SEND_BITS).contains(&rig.pokey.ser_out.counter) && steps < 2000 {
            rig.advance(1);
            steps += 1;
        }
        let live = rig.pokey.ser_out.counter;
        assert!((2..SEND_BITS).contains(&live));

        let state = rig.pokey.save_state();
        let internal = state.internal.as_ref().unwrap();
        assert_eq!(internal.ser_out_counter, live);
        assert!(internal.ser_out_shift_valid);

        let mut b = TestRig::with_start(rig.now());
        b.pokey.load_state(Some(&state)).unwrap();
        assert_eq!(b.pokey.ser_out.counter, live);
    }

    #[test]
    fn test_rejects_out_of_range_counter() {
        let mut rig = TestRig::running();
        let mut state = rig.pokey.save_state();
        if let Some(internal) = state.internal.as_mut() {
            internal.timer_counters[2] = 0;
        }

        let before = rig.pokey.save_state();
        assert!(matches!(
            rig.pokey.load_state(Some(&state)),
            Err(PokeyError::InvalidSaveState(_))
        ));
        assert_eq!(rig.pokey.save_state(), before);
    }

    #[test]
    fn test_load_none_resets() {
        let mut rig = TestRig::running();
        rig.write(REG_IRQEN, IRQ_SEROUT_COMPLETE);
        assert!(rig.pokey.is_irq_asserted());

        rig.pokey.load_state(None).unwrap();
        assert!(!rig.pokey.is_irq_asserted());
        assert_eq!(rig.read(REG_IRQST), IRQST_RESET);
        assert_eq!(rig.pokey.skctl(), 0);
    }

    #[test]
    fn test_registers_only_state_loads() {
        let mut rig = TestRig::running();
        let state = PokeySaveState {
            audf: [0x10, 0x20, 0x30, 0x40],
            audc: [0xA0; 4],
            skctl: SKCTL_INIT_MASK,
            irqst: IRQST_RESET,
            skstat: SKSTAT_RESET,
            ..Default::default()
        };

        rig.pokey.load_state(Some(&state)).unwrap();
        assert_eq!(rig.pokey.register_state()[REG_AUDF3 as usize], 0x30);
        assert_eq!(rig.pokey.timer_period(2), 0x31 * SLOW_TICK_64KHZ);
        assert!(rig.pokey.cycles_to_timer_fire(2) > 0);
    }

    #[test]
    fn test_stereo_pair_nests() {
        let mut rig = TestRig::running();
        let slave = rig.secondary();
        rig.pokey.set_slave(Some(Box::new(slave)));
        rig.write(REG_SECONDARY | REG_AUDC2, 0xC4);

        let state = rig.pokey.save_state();
        let pair = state.stereo_pair.as_deref().map(|p| p.audc[1]);
        assert_eq!(pair, Some(0xC4));

        rig.write(REG_SECONDARY | REG_AUDC2, 0x00);
        rig.pokey.load_state(Some(&state)).unwrap();
        assert_eq!(rig.pokey.slave().map(|s| s.register_state()[REG_AUDC2 as usize]), Some(0xC4));
    }
}
