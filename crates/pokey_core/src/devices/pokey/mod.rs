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

    devices::pokey::mod.rs

    Implements the Atari POKEY: timers, serial port, keyboard scan,
    pot scanning and interrupts.
*/

//! The POKEY chip: four audio timers, keyboard scan, serial I/O, pot scan
//! and the IRQ aggregator behind a 16 register window.
//!
//! A stereo configuration owns a second chip as a slave which decodes at
//! `$10-$1F` when the stereo soft enable is on.

pub mod display;
pub mod irq;
pub mod keyboard;
pub mod poly;
pub mod pots;
pub mod registers;
pub mod savestate;
pub mod serial;
pub mod timers;

use crate::{
    config::PokeyConfig,
    device_traits::{
        connections::{IrqTraceOutput, PokeyConnections},
        renderer::PokeyRenderer,
        sio::{CassetteDevice, SioDevice},
    },
    scheduler::{ChipSlot, PokeyEvent, Scheduler},
    tracelogger::TraceLogger,
};

use keyboard::KeyboardState;
use pots::PotScanner;
use registers::*;
use serial::{SerialInputState, SerialOutputState};
use timers::{TimerChannel, TimerMode};

pub use savestate::{PokeyInternalState, PokeySaveState};

/// Number of register slots decoded across a stereo pair.
pub const REGISTER_SPAN: usize = 0x20;

/// Slave initialization: silent but clocked, so a freshly attached chip does
/// not sit in init mode.
const SLAVE_INIT_REGS: [(u8, u8); 10] = [
    (REG_AUDF1, 0xFF),
    (REG_AUDC1, 0xB0),
    (REG_AUDF2, 0xFF),
    (REG_AUDC2, 0xB0),
    (REG_AUDF3, 0xFF),
    (REG_AUDC3, 0xB0),
    (REG_AUDF4, 0xFF),
    (REG_AUDC4, 0xB0),
    (REG_AUDCTL, 0x00),
    (REG_SKCTL, SKCTL_INIT_MASK),
];

/// Cycles from leaving init mode to the first 15KHz and 64KHz ticks.
const INIT_EXIT_15KHZ_PHASE: u32 = 81;
const INIT_EXIT_64KHZ_PHASE: u32 = 22;
/// RANDOM keeps shifting ones in for this many cycles after entering init mode.
const POLY_SHUTOFF_CYCLES: u64 = 10;

pub struct Pokey {
    scheduler: Box<dyn Scheduler>,
    renderer: Box<dyn PokeyRenderer>,
    connections: Box<dyn PokeyConnections>,
    irq_trace: Option<Box<dyn IrqTraceOutput>>,
    sio_devices: Vec<Box<dyn SioDevice>>,
    cassette: Option<Box<dyn CassetteDevice>>,
    slave: Option<Box<Pokey>>,

    trace_logger: TraceLogger,
    trace_sio: bool,
    trace_byte_index: u32,
    trace_direction_send: bool,

    address_mask: u8,
    stereo_soft_enable: bool,
    serial_noise: bool,
    immediate_pots: bool,
    is_5200_mode: bool,

    reg_shadow: [u8; REGISTER_SPAN],

    channels: [TimerChannel; 4],
    full_period: [u32; 2],
    mode: TimerMode,
    audctl: u8,

    irqen: u8,
    irqst: u8,
    irq_asserted: bool,
    trace_irq_start: u64,
    trace_irq_pending: bool,

    skctl: u8,
    skstat: u8,
    kbcode: u8,
    serin: u8,
    serout: u8,

    last_15khz_time: u32,
    last_64khz_time: u32,
    last_poly_time: u32,
    poly9_counter: u32,
    poly17_counter: u32,
    poly_shutoff_time: u64,

    ser_in: SerialInputState,
    ser_out: SerialOutputState,
    ext_clock_base: u32,
    ext_clock_period: u32,
    ser_rate_changed: bool,
    command_line: bool,
    data_in_flip_time: u64,

    kb: KeyboardState,
    pots: PotScanner,
    speaker_active: bool,
}

impl Pokey {
    pub fn new(
        scheduler: Box<dyn Scheduler>,
        renderer: Box<dyn PokeyRenderer>,
        connections: Box<dyn PokeyConnections>,
    ) -> Self {
        let mut pokey = Self {
            scheduler,
            renderer,
            connections,
            irq_trace: None,
            sio_devices: Vec::new(),
            cassette: None,
            slave: None,
            trace_logger: TraceLogger::None,
            trace_sio: false,
            trace_byte_index: 0,
            trace_direction_send: false,
            address_mask: ADDRESS_MASK_MONO,
            stereo_soft_enable: true,
            serial_noise: false,
            immediate_pots: false,
            is_5200_mode: false,
            reg_shadow: [0; REGISTER_SPAN],
            channels: Default::default(),
            full_period: [256 * timers::SLOW_TICK_64KHZ; 2],
            mode: TimerMode::default(),
            audctl: 0,
            irqen: 0,
            irqst: 0,
            irq_asserted: false,
            trace_irq_start: 0,
            trace_irq_pending: false,
            skctl: 0,
            skstat: 0,
            kbcode: 0,
            serin: 0,
            serout: 0,
            last_15khz_time: 0,
            last_64khz_time: 0,
            last_poly_time: 0,
            poly9_counter: 0,
            poly17_counter: 0,
            poly_shutoff_time: 0,
            ser_in: SerialInputState::default(),
            ser_out: SerialOutputState::default(),
            ext_clock_base: 0,
            ext_clock_period: 0,
            ser_rate_changed: false,
            command_line: false,
            data_in_flip_time: u64::MAX,
            kb: KeyboardState::default(),
            pots: PotScanner::default(),
            speaker_active: false,
        };

        pokey.cold_reset();
        pokey
    }

    /// Apply the chip options of a configuration. Stereo is the host's
    /// concern, since it has to provide the slave's collaborators.
    pub fn apply_config(&mut self, config: &PokeyConfig) {
        self.set_stereo_soft_enable(config.stereo_soft_enable);
        self.serial_noise = config.serial_noise;
        self.immediate_pots = config.immediate_pots;
        self.set_5200_mode(config.five_200_mode);
        self.set_keyboard_modes(self.kb.cooked_mode, config.keyboard_scan);

        match &config.trace_sio {
            Some(path) => {
                self.trace_logger = TraceLogger::from_filename(path);
                self.trace_sio = self.trace_logger.is_some();
            }
            None => {
                self.trace_sio = false;
            }
        }
    }

    pub fn cold_reset(&mut self) {
        log::debug!("POKEY: Cold reset");

        self.kb.reset_scan();
        self.kb.irq_pending = false;
        self.kb.control_latched = false;
        self.kb.shift_latched = false;
        self.kb.break_latched = false;
        self.kb.code_timer = 0;
        self.kb.cooldown_timer = 0;

        self.reg_shadow = [0; REGISTER_SPAN];

        self.kbcode = 0;
        self.skstat = if self.kb.shift_key {
            SKSTAT_RESET & !SKSTAT_SHIFT
        }
        else {
            SKSTAT_RESET
        };
        self.skctl = 0;
        self.irqen = 0;
        self.irqst = IRQST_RESET;

        self.audctl = 0;
        self.mode = TimerMode::default();

        for channel in 0..4 {
            self.channels[channel].reset();
            self.scheduler.unset_event(PokeyEvent::timer_borrow(channel));
        }

        self.recompute_all_timer_periods();
        self.recompute_allowed_deferred_timers();

        for event in [
            PokeyEvent::KeyboardScan,
            PokeyEvent::KeyboardIrq,
            PokeyEvent::ResetTimers,
            PokeyEvent::ResetTimers2,
            PokeyEvent::SerialOutput,
            PokeyEvent::SerialInput,
            PokeyEvent::ResetTwoTones1,
            PokeyEvent::ResetTwoTones2,
        ] {
            self.scheduler.unset_event(event);
        }

        self.renderer.cold_reset();

        let t = self.scheduler.tick();
        self.last_poly_time = t;
        self.poly9_counter = 0;
        self.poly17_counter = 0;

        self.ser_in.reset();
        self.ser_out.reset();

        self.last_15khz_time = t;
        self.last_64khz_time = t;

        self.pots.reset(t);
        self.command_line = false;

        if let Some(slave) = self.slave.as_mut() {
            slave.cold_reset();
        }

        self.negate_irq(false);
        self.notify_force_break();
    }

    /// Attach or detach the stereo secondary chip. The outgoing slave is
    /// returned cold-reset.
    pub fn set_slave(&mut self, slave: Option<Box<Pokey>>) -> Option<Box<Pokey>> {
        let mut previous = std::mem::replace(&mut self.slave, slave);
        if let Some(old) = previous.as_mut() {
            old.cold_reset();
        }

        self.update_address_decoding();

        if let Some(slave) = self.slave.as_mut() {
            log::debug!("POKEY: Attaching stereo secondary");
            slave.cold_reset();
            for (reg, value) in SLAVE_INIT_REGS {
                slave.write_byte(reg, value);
            }
        }

        previous
    }

    pub fn slave(&self) -> Option<&Pokey> {
        self.slave.as_deref()
    }

    pub fn slave_mut(&mut self) -> Option<&mut Pokey> {
        self.slave.as_deref_mut()
    }

    pub fn set_stereo_soft_enable(&mut self, enable: bool) {
        if self.stereo_soft_enable != enable {
            self.stereo_soft_enable = enable;
            self.update_address_decoding();
        }
    }

    fn update_address_decoding(&mut self) {
        self.address_mask = if self.slave.is_some() && self.stereo_soft_enable {
            ADDRESS_MASK_STEREO
        }
        else {
            ADDRESS_MASK_MONO
        };
    }

    pub fn set_5200_mode(&mut self, enable: bool) {
        if self.is_5200_mode != enable {
            self.is_5200_mode = enable;
            self.update_keyboard_scan_event();
        }
    }

    pub fn set_serial_noise(&mut self, enable: bool) {
        self.serial_noise = enable;
    }

    pub fn set_immediate_pot_update(&mut self, enable: bool) {
        self.immediate_pots = enable;
    }

    pub fn set_trace_logger(&mut self, logger: TraceLogger, trace_sio: bool) {
        self.trace_logger = logger;
        self.trace_sio = trace_sio && self.trace_logger.is_some();
    }

    pub fn set_irq_trace_output(&mut self, output: Option<Box<dyn IrqTraceOutput>>) {
        self.irq_trace = output;
        self.trace_irq_pending = false;
    }

    pub fn add_sio_device(&mut self, device: Box<dyn SioDevice>) {
        self.sio_devices.push(device);
    }

    pub fn remove_sio_devices(&mut self) -> Vec<Box<dyn SioDevice>> {
        std::mem::take(&mut self.sio_devices)
    }

    pub fn set_cassette(&mut self, cassette: Option<Box<dyn CassetteDevice>>) {
        self.cassette = cassette;
        self.ser_rate_changed = true;
        self.notify_force_break();
    }

    pub fn read_byte(&mut self, addr: u8) -> u8 {
        let reg = addr & self.address_mask;

        match reg {
            REG_POT0..=REG_POT7 => self.read_pot(reg as usize),
            REG_ALLPOT => {
                self.update_pots(0);
                self.pots.allpot
            }
            REG_KBCODE => self.kbcode,
            REG_RANDOM => self.read_random(),
            REG_SERIN => self.read_serin(),
            REG_IRQST => self.irqst,
            REG_SKSTAT => self.read_skstat(),
            _ if reg & REG_SECONDARY != 0 => match self.slave.as_mut() {
                Some(slave) => slave.read_byte(reg & ADDRESS_MASK_MONO),
                None => 0xFF,
            },
            _ => 0xFF,
        }
    }

    /// Read a register without disturbing emulation state.
    pub fn debug_read_byte(&self, addr: u8) -> u8 {
        let reg = addr & self.address_mask;

        match reg {
            REG_POT0..=REG_POT7 => self.peek_pot(reg as usize),
            REG_ALLPOT => self.pots_at(0).allpot,
            REG_KBCODE => self.kbcode,
            REG_RANDOM => self.peek_random(),
            REG_SERIN => self.serin,
            REG_IRQST => self.irqst,
            REG_SKSTAT => self.peek_skstat(),
            _ if reg & REG_SECONDARY != 0 => match self.slave.as_ref() {
                Some(slave) => slave.debug_read_byte(reg & ADDRESS_MASK_MONO),
                None => self.debug_read_byte(reg & ADDRESS_MASK_MONO),
            },
            _ => 0xFF,
        }
    }

    pub fn write_byte(&mut self, addr: u8, value: u8) {
        let reg = addr & self.address_mask;
        self.reg_shadow[reg as usize] = value;

        match reg {
            REG_AUDF1 | REG_AUDF2 | REG_AUDF3 | REG_AUDF4 => {
                let channel = (reg >> 1) as usize;
                self.write_audf(channel, value);
                if channel >= 2 {
                    self.ser_rate_changed = true;
                }
            }
            REG_AUDC1 | REG_AUDC2 | REG_AUDC3 | REG_AUDC4 => {
                let channel = (reg >> 1) as usize;
                if *self.channels[channel].audc != value {
                    self.channels[channel].audc.update(value);
                    self.renderer.set_audcx(channel, value);
                }
            }
            REG_AUDCTL => self.write_audctl(value),
            REG_STIMER => {
                self.scheduler.set_event(3, PokeyEvent::ResetTimers);
            }
            REG_SKRES => {
                self.skstat |= SKSTAT_ERRORS;
            }
            REG_POTGO => self.start_pot_scan(),
            REG_SEROUT => self.write_serout(value),
            REG_IRQEN => self.write_irqen(value),
            REG_SKCTL => self.write_skctl(value),
            _ if reg & REG_SECONDARY != 0 => {
                if let Some(slave) = self.slave.as_mut() {
                    slave.write_byte(reg & ADDRESS_MASK_MONO, value);
                }
            }
            _ => {}
        }
    }

    fn write_skctl(&mut self, value: u8) {
        if value == self.skctl {
            return;
        }

        self.update_all_timer_counters();

        if self.skctl & SKCTL_ASYNC_RECV == 0 && value & SKCTL_ASYNC_RECV != 0 && self.ser_in.waiting_for_start_bit {
            // Timers 3 and 4 restart immediately.
            let t = self.scheduler.tick();
            self.channels[2].counter = self.channels[2].audfp1(t);
            self.channels[3].counter = self.channels[3].audfp1(t);
        }

        let delta = value ^ self.skctl;

        if delta & SKCTL_FAST_POTS != 0 {
            // The switch to fast mode is delayed the same two cycles as the counter.
            self.update_pots(2);
        }

        if delta & SKCTL_CLOCK_MODE != 0 {
            self.ser_rate_changed = true;

            // Clock mode 000 also resets the serial clock phase flip-flop.
            if value & SKCTL_CLOCK_MODE == 0 {
                self.ser_out.clock_phase = false;
            }
        }

        let prev_init = is_init_mode(self.skctl);
        let new_init = is_init_mode(value);

        if new_init != prev_init {
            let t = self.scheduler.tick();

            if new_init {
                log::debug!("POKEY: Entering init mode");
                self.scheduler.unset_event(PokeyEvent::KeyboardScan);
                self.scheduler.unset_event(PokeyEvent::KeyboardIrq);

                // The poly counters keep running to model the shift-out on RANDOM.
                self.poly_shutoff_time = self.scheduler.tick64();
            }
            else {
                log::debug!("POKEY: Leaving init mode");
                self.last_15khz_time = t.wrapping_add(INIT_EXIT_15KHZ_PHASE).wrapping_sub(timers::SLOW_TICK_15KHZ);
                self.last_64khz_time = t.wrapping_add(INIT_EXIT_64KHZ_PHASE).wrapping_sub(timers::SLOW_TICK_64KHZ);

                self.poly9_counter = 0;
                self.poly17_counter = 0;
                self.last_poly_time = t.wrapping_add(1);
            }

            self.renderer.set_init_mode(new_init);
            self.reset_serial_for_init();
        }

        self.skctl = value;

        if delta & SKCTL_INIT_MASK != 0 {
            self.on_skctl_keyboard_change(value, delta);
        }

        self.recompute_allowed_deferred_timers();
        self.setup_timers(0b1111);

        if !self.is_serial_output_clock_running() {
            self.flush_serial_output();
        }

        if delta & SKCTL_FORCE_BREAK != 0 {
            self.notify_force_break();
        }
    }

    fn notify_force_break(&mut self) {
        let enabled = self.skctl & SKCTL_FORCE_BREAK != 0;
        if let Some(cassette) = self.cassette.as_mut() {
            cassette.change_force_break(enabled);
        }
    }

    pub fn is_serial_force_break_enabled(&self) -> bool {
        self.skctl & SKCTL_FORCE_BREAK != 0
    }

    /// Bring the poly counters up to the current cycle.
    fn update_poly_time(&mut self) {
        let t = self.scheduler.tick();
        let (poly9, poly17) = self.poly_offsets_at(t);
        self.poly9_counter = poly9;
        self.poly17_counter = poly17;
        self.last_poly_time = t;
    }

    fn poly_offsets_at(&self, t: u32) -> (u32, u32) {
        let delta = t.wrapping_sub(self.last_poly_time) as i32 as i64;
        (
            (self.poly9_counter as i64 + delta).rem_euclid(poly::POLY9_PERIOD as i64) as u32,
            (self.poly17_counter as i64 + delta).rem_euclid(poly::POLY17_PERIOD as i64) as u32,
        )
    }

    /// Mask of bits already forced high by the init mode shift-in, or None
    /// if the register has fully saturated.
    fn random_force_mask(&self) -> Option<u8> {
        if !is_init_mode(self.skctl) {
            return Some(0);
        }

        let offset = self.scheduler.tick64().wrapping_sub(self.poly_shutoff_time);
        match offset {
            0 => Some(0),
            1..=POLY_SHUTOFF_CYCLES => Some((0xFFE00u32 >> offset) as u8),
            _ => None,
        }
    }

    fn random_value(&self, poly9: u32, poly17: u32) -> u8 {
        let v = if self.audctl & AUDCTL_POLY9 != 0 {
            poly::random_byte(poly9, true)
        }
        else {
            poly::random_byte(poly17, false)
        };
        !v
    }

    fn read_random(&mut self) -> u8 {
        let Some(force_mask) = self.random_force_mask()
        else {
            return 0xFF;
        };

        self.update_poly_time();
        self.random_value(self.poly9_counter, self.poly17_counter) | force_mask
    }

    fn peek_random(&self) -> u8 {
        let Some(force_mask) = self.random_force_mask()
        else {
            return 0xFF;
        };

        let (poly9, poly17) = self.poly_offsets_at(self.scheduler.tick());
        self.random_value(poly9, poly17) | force_mask
    }

    /// Route a fired event to this chip or its stereo slave.
    pub fn dispatch_event(&mut self, slot: ChipSlot, event: PokeyEvent) {
        match slot {
            ChipSlot::Primary => self.on_scheduled_event(event),
            ChipSlot::Secondary => match self.slave.as_mut() {
                Some(slave) => slave.on_scheduled_event(event),
                None => log::warn!("POKEY: Dropping {} for detached secondary", event),
            },
        }
    }

    pub fn on_scheduled_event(&mut self, event: PokeyEvent) {
        match event {
            PokeyEvent::KeyboardIrq => self.on_keyboard_irq_event(),
            PokeyEvent::KeyboardScan => self.on_keyboard_scan_event(),
            PokeyEvent::Timer1Borrow => self.on_timer_borrow(0),
            PokeyEvent::Timer2Borrow => self.on_timer_borrow(1),
            PokeyEvent::Timer3Borrow => self.on_timer_borrow(2),
            PokeyEvent::Timer4Borrow => self.on_timer_borrow(3),
            PokeyEvent::ResetTwoTones1 | PokeyEvent::ResetTwoTones2 => self.on_reset_two_tones(),
            PokeyEvent::ResetTimers => self.on_reset_timers(),
            PokeyEvent::ResetTimers2 => self.on_reset_timers2(),
            PokeyEvent::SerialOutput => {
                if self.ser_out.counter != 0 {
                    self.on_serial_output_tick();
                }
            }
            PokeyEvent::SerialInput => {
                if self.ser_in.counter != 0 {
                    self.on_serial_input_tick();
                }
            }
        }
    }

    pub fn set_speaker(&mut self, state: bool) {
        if self.renderer.set_speaker(state) {
            self.speaker_active = true;
        }
    }

    pub fn advance_scan_line(&mut self) {
        if self.ser_rate_changed {
            self.ser_rate_changed = false;

            let divisor = self.serial_cycles_per_bit_recv() >> 1;
            if let Some(cassette) = self.cassette.as_mut() {
                cassette.change_serial_rate(divisor);
            }
        }

        if let Some(slave) = self.slave.as_mut() {
            slave.advance_scan_line();
        }
    }

    /// End-of-frame housekeeping: pots, cooked key timers and wrap-safety
    /// catch-up on both chips.
    pub fn advance_frame(&mut self) {
        self.update_pots(0);
        if let Some(slave) = self.slave.as_mut() {
            slave.update_pots(0);
        }

        self.advance_key_timers();
        self.speaker_active = false;

        let t = self.scheduler.tick();
        self.post_frame_update(t);
        if let Some(slave) = self.slave.as_mut() {
            slave.post_frame_update(t);
        }
    }

    fn post_frame_update(&mut self, t: u32) {
        self.renderer.restart_audio_log();

        self.catch_up_timers(t);
        self.update_poly_time();
        self.catch_up_external_clock(t);

        self.trace_logger.flush();
    }

    pub fn register_state(&self) -> &[u8; REGISTER_SPAN] {
        &self.reg_shadow
    }

    pub fn is_irq_asserted(&self) -> bool {
        self.irq_asserted
    }

    pub fn audctl(&self) -> u8 {
        self.audctl
    }

    pub fn skctl(&self) -> u8 {
        self.skctl
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        device_traits::sio::SerialInputByte,
        scheduler::{run_until, EventScheduler, SchedulerHandle},
    };
    use std::{cell::RefCell, collections::VecDeque, rc::Rc};

    /// Everything the chip tells its collaborators, for assertions.
    #[derive(Default)]
    pub(crate) struct Recorded {
        pub irq_line: bool,
        pub irq_asserts: u32,
        pub channel_events: [u32; 4],
        pub noise_pulses: u32,
        pub sio_writes: Vec<(u8, bool, u32, bool)>,
        pub commands: Vec<bool>,
        pub irq_spans: Vec<(u64, u64)>,
        pub key_push_refused: bool,
    }

    pub(crate) type Shared = Rc<RefCell<Recorded>>;

    struct RecordingRenderer(Shared);

    impl PokeyRenderer for RecordingRenderer {
        fn set_init_mode(&mut self, _init: bool) {}
        fn reset_timers(&mut self) {}
        fn set_audcx(&mut self, _channel: usize, _value: u8) {}
        fn set_audctl(&mut self, _value: u8) {}
        fn add_channel_event(&mut self, channel: usize) {
            self.0.borrow_mut().channel_events[channel] += 1;
        }
        fn set_channel_deferred_events(&mut self, _channel: usize, _start: u32, _period: u32) {}
        fn set_channel_deferred_events_linked(
            &mut self,
            _channel: usize,
            _lo_start: u32,
            _lo_period: u32,
            _hi_start: u32,
            _hi_period: u32,
            _lo_offset: u32,
        ) {
        }
        fn clear_channel_deferred_events(&mut self, _channel: usize, _t: u32) {}
        fn add_serial_noise_pulse(&mut self, _t: u32) {
            self.0.borrow_mut().noise_pulses += 1;
        }
    }

    struct RecordingConnections(Shared);

    impl PokeyConnections for RecordingConnections {
        fn assert_irq(&mut self, _cpu_based: bool) {
            let mut r = self.0.borrow_mut();
            r.irq_line = true;
            r.irq_asserts += 1;
        }
        fn negate_irq(&mut self, _cpu_based: bool) {
            self.0.borrow_mut().irq_line = false;
        }
        fn is_key_push_ok(&self, _scan_code: u8, _cooldown_expired: bool) -> bool {
            !self.0.borrow().key_push_refused
        }
    }

    pub(crate) struct RecordingIrqTrace(pub Shared);

    impl IrqTraceOutput for RecordingIrqTrace {
        fn add_irq(&mut self, start: u64, end: u64) {
            self.0.borrow_mut().irq_spans.push((start, end));
        }
    }

    /// An SIO peripheral that logs what it hears and answers from a queue.
    pub(crate) struct ScriptedDevice {
        pub log: Shared,
        pub replies: VecDeque<SerialInputByte>,
        pub accept_burst: bool,
    }

    impl SioDevice for ScriptedDevice {
        fn write_sio(&mut self, byte: u8, command: bool, cycles_per_bit: u32, _start: u64, framing_error: bool) -> bool {
            self.log
                .borrow_mut()
                .sio_writes
                .push((byte, command, cycles_per_bit, framing_error));
            self.accept_burst
        }
        fn begin_command(&mut self) {
            self.log.borrow_mut().commands.push(true);
        }
        fn end_command(&mut self) {
            self.log.borrow_mut().commands.push(false);
        }
        fn ser_in_ready(&mut self) -> Option<SerialInputByte> {
            self.replies.pop_front()
        }
    }

    pub(crate) struct TestRig {
        pub timeline: Rc<RefCell<EventScheduler>>,
        pub pokey: Pokey,
        pub rec: Shared,
    }

    impl TestRig {
        /// A cold chip, still in init mode.
        pub fn new() -> Self {
            Self::with_start(0)
        }

        pub fn with_start(start: u64) -> Self {
            let timeline = Rc::new(RefCell::new(EventScheduler::with_start(start)));
            let rec: Shared = Default::default();
            let pokey = Pokey::new(
                Box::new(SchedulerHandle::new(ChipSlot::Primary, timeline.clone())),
                Box::new(RecordingRenderer(rec.clone())),
                Box::new(RecordingConnections(rec.clone())),
            );
            Self { timeline, pokey, rec }
        }

        /// A chip with its clocks running and keyboard scan enabled.
        pub fn running() -> Self {
            let mut rig = Self::new();
            rig.write(REG_SKCTL, SKCTL_INIT_MASK);
            rig
        }

        pub fn secondary(&self) -> Pokey {
            let rec: Shared = Default::default();
            Pokey::new(
                Box::new(SchedulerHandle::new(ChipSlot::Secondary, self.timeline.clone())),
                Box::new(RecordingRenderer(rec.clone())),
                Box::new(RecordingConnections(rec)),
            )
        }

        pub fn add_device(&mut self, replies: &[SerialInputByte], accept_burst: bool) {
            self.pokey.add_sio_device(Box::new(ScriptedDevice {
                log: self.rec.clone(),
                replies: replies.iter().copied().collect(),
                accept_burst,
            }));
        }

        pub fn write(&mut self, reg: u8, value: u8) {
            self.pokey.write_byte(reg, value);
        }

        pub fn read(&mut self, reg: u8) -> u8 {
            self.pokey.read_byte(reg)
        }

        pub fn now(&self) -> u64 {
            self.timeline.borrow().now()
        }

        pub fn advance(&mut self, cycles: u64) {
            let until = self.now() + cycles;
            let pokey = &mut self.pokey;
            run_until(&self.timeline, until, |slot, event| pokey.dispatch_event(slot, event));
        }
    }

    #[test]
    fn test_cold_reset_defaults() {
        let mut rig = TestRig::new();
        assert_eq!(rig.read(REG_SKSTAT), SKSTAT_RESET);
        assert_eq!(rig.read(REG_IRQST), IRQST_RESET);
        assert_eq!(rig.read(REG_KBCODE), 0);
        assert_eq!(rig.pokey.audctl(), 0);
        assert!(!rig.pokey.is_irq_asserted());
        for ch in 0..4 {
            assert_eq!(rig.pokey.timer_period(ch), timers::SLOW_TICK_64KHZ);
        }
    }

    #[test]
    fn test_unmapped_reads_float_high() {
        let mut rig = TestRig::running();
        assert_eq!(rig.read(0x0B), 0xFF);
        assert_eq!(rig.read(0x0C), 0xFF);
        assert_eq!(rig.pokey.debug_read_byte(0x0C), 0xFF);
    }

    #[test]
    fn test_register_shadow_tracks_writes() {
        let mut rig = TestRig::running();
        rig.write(REG_AUDC2, 0xA8);
        rig.write(REG_SEROUT, 0x55);
        assert_eq!(rig.pokey.register_state()[REG_AUDC2 as usize], 0xA8);
        assert_eq!(rig.pokey.register_state()[REG_SEROUT as usize], 0x55);

        rig.pokey.cold_reset();
        assert_eq!(rig.pokey.register_state()[REG_AUDC2 as usize], 0);
    }

    #[test]
    fn test_random_advances_and_saturates_in_init() {
        let mut rig = TestRig::running();
        rig.advance(100);
        let a = rig.read(REG_RANDOM);
        rig.advance(1);
        let b = rig.read(REG_RANDOM);
        rig.advance(1);
        let c = rig.read(REG_RANDOM);
        assert!(a != b || b != c);

        rig.write(REG_SKCTL, 0);
        rig.advance(POLY_SHUTOFF_CYCLES + 1);
        assert_eq!(rig.read(REG_RANDOM), 0xFF);
        assert_eq!(rig.pokey.debug_read_byte(REG_RANDOM), 0xFF);
    }

    #[test]
    fn test_debug_read_matches_read() {
        let mut rig = TestRig::running();
        rig.write(REG_AUDCTL, AUDCTL_POLY9);
        rig.advance(1234);
        let peek = rig.pokey.debug_read_byte(REG_RANDOM);
        assert_eq!(peek, rig.read(REG_RANDOM));
        assert_eq!(rig.pokey.debug_read_byte(REG_SKSTAT), rig.read(REG_SKSTAT));
    }

    #[test]
    fn test_stereo_decode() {
        let mut rig = TestRig::running();
        let slave = rig.secondary();

        // Without a slave the upper bank mirrors the primary.
        rig.write(REG_AUDC1 | REG_SECONDARY, 0x42);
        assert_eq!(rig.pokey.register_state()[REG_AUDC1 as usize], 0x42);

        assert!(rig.pokey.set_slave(Some(Box::new(slave))).is_none());
        rig.write(REG_IRQEN | REG_SECONDARY, IRQ_KEY);
        assert_eq!(rig.pokey.slave().map(|s| s.irqen), Some(IRQ_KEY));
        assert_eq!(rig.pokey.irqen, 0);
        assert_eq!(rig.pokey.slave().map(|s| s.skctl()), Some(SKCTL_INIT_MASK));

        rig.pokey.set_stereo_soft_enable(false);
        rig.write(REG_IRQEN | REG_SECONDARY, IRQ_BREAK);
        assert_eq!(rig.pokey.irqen, IRQ_BREAK);
    }

    #[test]
    fn test_secondary_events_route_to_slave() {
        let mut rig = TestRig::running();
        let slave = rig.secondary();
        rig.pokey.set_slave(Some(Box::new(slave)));

        rig.write(REG_AUDF1 | REG_SECONDARY, 0x10);
        rig.write(REG_IRQEN | REG_SECONDARY, IRQ_TIMER1);
        rig.write(REG_STIMER | REG_SECONDARY, 0);
        rig.advance(10_000);

        let slave = rig.pokey.slave().map(|s| s.irqst);
        assert_eq!(slave.map(|st| st & IRQ_TIMER1), Some(0));
        assert_eq!(rig.pokey.irqst & IRQ_TIMER1, IRQ_TIMER1);
    }
}
