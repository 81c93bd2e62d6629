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

    devices::pokey::serial.rs

    Serial input and output shift registers and SIO bus timing.
*/

//! Serial port: SERIN/SEROUT shift registers, the SIO bus and the cassette.
//!
//! Bytes arrive whole from a peripheral and are clocked through a bit
//! countdown so SERIN, SKSTAT and the serial IRQs change at the right cycle.
//! Outgoing bytes are shifted on the selected clock and handed to every
//! attached device once the stop bit goes out.

use super::{registers::*, Pokey};
use crate::{device_traits::sio::SerialInputByte, scheduler::PokeyEvent};

/// Master clock divided down to the CPU clock, for baud rate reporting.
pub const BAUD_CLOCK: f32 = 7_159_090.0 / 4.0;
/// Bit countdowns for a received byte. Internal clocks tick twice per bit.
pub const RECV_BITS_EXTERNAL: u32 = 9;
pub const RECV_BITS_INTERNAL: u32 = 19;
/// Start bit, eight data bits and stop bit.
pub const SEND_BITS: u32 = 10;
/// The trace byte index wraps after this many bytes in one direction.
pub const TRACE_INDEX_WRAP: u32 = 1000;
/// External clock bases are re-anchored when this far behind.
const EXT_CLOCK_CATCHUP: u32 = 0x4000_0000;

#[derive(Clone, Debug, Default)]
pub struct SerialInputState {
    pub shift_register: u8,
    pub counter: u32,
    /// ANDed into SKSTAT when the byte lands in SERIN.
    pub pending_status: u8,
    /// Load SERIN only after the last bit instead of immediately.
    pub deferred_load: bool,
    pub waiting_for_start_bit: bool,
    pub burst_pending_data: bool,
    pub burst_pending_irq1: bool,
    pub burst_pending_irq2: bool,
    pub simulate_port: bool,
    pub simulate_base_time: u32,
    pub simulate_cycles_per_bit: u32,
    /// Start bit, data and stop bit, LSB first.
    pub simulate_data: u32,
    pub reset_counter: u32,
}

impl SerialInputState {
    pub fn reset(&mut self) {
        *self = Self {
            pending_status: 0xFF,
            waiting_for_start_bit: true,
            reset_counter: self.reset_counter,
            ..Default::default()
        };
    }

    /// Input line level `dt` cycles into a simulated byte, or None once
    /// the stop bit has passed.
    fn simulated_level(&self, dt: u32) -> Option<bool> {
        let bit = dt / self.simulate_cycles_per_bit.max(1);
        if bit >= SEND_BITS {
            None
        }
        else {
            Some(self.simulate_data & (1 << bit) != 0)
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SerialOutputState {
    pub shift_register: u8,
    /// Bits left to shift, counting down from 10.
    pub counter: u32,
    /// SEROUT holds a byte not yet moved to the shift register.
    pub valid: bool,
    pub shift_valid: bool,
    pub clock_phase: bool,
    /// Output line level.
    pub output_state: bool,
    pub start_time: u64,
    /// Cycle by which a burst reply must arrive, or 0 if none is expected.
    /// Bit 0 is forced on so a live deadline is never zero.
    pub burst_deadline: u32,
}

impl SerialOutputState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Line level while `counter` bits remain: start bit, data LSB first,
    /// then idle high.
    pub fn line_level(&self) -> bool {
        match self.counter {
            0 => true,
            c @ 1..=9 => (self.shift_register as u32 >> (9 - c)) & 1 != 0,
            _ => false,
        }
    }
}

impl Pokey {
    pub fn set_external_serial_clock(&mut self, base: u32, period: u32) {
        self.ext_clock_base = base;
        self.ext_clock_period = period;

        if period == 0 {
            self.scheduler.unset_event(PokeyEvent::SerialInput);
            self.scheduler.unset_event(PokeyEvent::SerialOutput);
        }
    }

    /// Set the serial data input level. SKSTAT bit 4 flips again at
    /// `flip_time`.
    pub fn set_data_line(&mut self, state: bool, flip_time: u64) {
        if state {
            self.skstat |= SKSTAT_SERIN_DATA;
        }
        else {
            self.skstat &= !SKSTAT_SERIN_DATA;
        }
        self.data_in_flip_time = flip_time;
    }

    pub fn set_command_line(&mut self, state: bool) {
        if state == self.command_line {
            return;
        }

        log::debug!("POKEY: {} command line", if state { "Asserting" } else { "Negating" });
        self.command_line = state;

        for device in self.sio_devices.iter_mut() {
            if state {
                device.begin_command();
            }
            else {
                device.end_command();
            }
        }
    }

    pub fn is_command_line_asserted(&self) -> bool {
        self.command_line
    }

    pub fn serial_input_reset_counter(&self) -> u32 {
        self.ser_in.reset_counter
    }

    /// Receive bit period implied by SKCTL and the timer 4 setting.
    pub fn serial_cycles_per_bit_recv(&self) -> u32 {
        if is_external_recv(self.skctl) {
            self.ext_clock_period
        }
        else {
            self.channels[3].period * 2
        }
    }

    fn trace_sio_line(&mut self, send: bool, text: std::fmt::Arguments) {
        if !self.trace_sio {
            return;
        }

        if self.trace_byte_index >= TRACE_INDEX_WRAP || self.trace_direction_send != send {
            self.trace_byte_index = 0;
            self.trace_direction_send = send;
        }

        let index = self.trace_byte_index;
        self.trace_byte_index += 1;
        self.trace_logger.write_line(format_args!("[{:3}] {}", index, text));
    }

    /// Shift a byte in from a peripheral. Rate and framing checks happen
    /// here; SERIN is loaded now, or after the last bit for simulated
    /// input.
    pub fn receive_sio_byte(&mut self, byte: SerialInputByte) {
        let mut c = byte.value;
        let cpb = byte.cycles_per_bit;
        let t = self.scheduler.tick();

        if cpb != 0 && self.serial_noise {
            let mut pattern = (c as u32) * 2 + 0x200;
            pattern ^= pattern * 2 + 1;

            for i in 0..SEND_BITS {
                if pattern & (1 << i) != 0 {
                    self.renderer.add_serial_noise_pulse(t.wrapping_add(cpb.wrapping_mul(i)));
                }
            }
        }

        log::trace!(
            "POKEY: Receiving byte {:02X} (SERIN {:02X}, shift {:02X}) at {} cycles/bit",
            c,
            self.serin,
            self.ser_in.shift_register,
            cpb
        );

        let baud = BAUD_CLOCK / cpb as f32;
        let mut note = String::new();

        if is_init_mode(self.skctl) {
            self.trace_sio_line(
                false,
                format_args!(
                    "Receive      < ${:02X}     (@ {} cycles/bit / {:.1} baud) [dropped - init mode]",
                    c, cpb, baud
                ),
            );
            log::debug!("POKEY: Dropping byte {:02X} in init mode", c);
            return;
        }

        self.ser_in.simulate_port = byte.simulate_input_port;
        if byte.simulate_input_port {
            self.ser_in.simulate_base_time = t;
            self.ser_in.simulate_cycles_per_bit = cpb;
            self.ser_in.simulate_data = ((c as u32) << 1) + 0x200;
        }

        let external = is_external_recv(self.skctl);
        if external && self.ext_clock_period == 0 {
            self.trace_sio_line(
                false,
                format_args!(
                    "Receive      < ${:02X}     (@ {} cycles/bit / {:.1} baud) [dropped - external mode with no clock]",
                    c, cpb, baud
                ),
            );
            log::debug!(
                "POKEY: Dropping byte {:02X}, external receive clock not running (SKCTL={:02X})",
                c,
                self.skctl
            );
            return;
        }

        self.ser_in.pending_status = 0xFF;

        if byte.force_framing_error {
            self.ser_in.pending_status &= !SKSTAT_FRAMING_ERROR;
            note.push_str(" [framing error]");
        }

        if self.skctl & SKCTL_RECV_MODE == SKCTL_RECV_SYNC_TIMER4 && !byte.synchronous {
            // Synchronous receive of an async byte drops a bit.
            self.ser_in.pending_status &= !SKSTAT_FRAMING_ERROR;
            c = (c & 0x0F) + ((c & 0xE0) >> 1) + 0x80;
            note.push_str(" [garbled - receiving in synchronous mode]");
            log::debug!("POKEY: Garbling byte, asynchronous receive not enabled (SKCTL={:02X})", self.skctl);
        }

        if cpb != 0 {
            let expected = self.serial_cycles_per_bit_recv();
            let margin = (expected + 7) >> 3;

            if cpb < expected.saturating_sub(margin) || cpb > expected + margin {
                c = 0xFF;
                self.ser_in.pending_status &= !SKSTAT_FRAMING_ERROR;
                note.push_str(&format!(" [garbled - expected {} cycles/bit]", expected));
                log::debug!(
                    "POKEY: Framing error, receive rate mismatch (expected {} cycles/bit, got {})",
                    expected,
                    cpb
                );
            }
        }

        self.trace_sio_line(
            false,
            format_args!(
                "Receive      < ${:02X}     (@ {} cycles/bit / {:.1} baud){}",
                byte.value, cpb, baud, note
            ),
        );

        if external {
            if self.scheduler.is_event_pending(PokeyEvent::SerialInput) {
                log::debug!(
                    "POKEY: Interrupting receive in progress, {} bits left",
                    self.ser_in.counter
                );
            }
            self.scheduler.set_event(self.ext_clock_period, PokeyEvent::SerialInput);
        }
        else if self.skctl & SKCTL_ASYNC_RECV != 0 {
            // The start bit restarts timers 3 and 4.
            self.update_timer_counter(2);
            self.update_timer_counter(3);

            let t = self.scheduler.tick();
            self.channels[2].counter = self.channels[2].audfp1(t);
            self.channels[3].counter = self.channels[3].audfp1(t);

            self.ser_in.waiting_for_start_bit = false;
            self.setup_timers(0b1100);
        }

        self.ser_in.shift_register = c;
        self.ser_in.counter = if external {
            RECV_BITS_EXTERNAL
        }
        else {
            RECV_BITS_INTERNAL
        };

        self.skstat &= !SKSTAT_SERIN_BUSY;

        self.ser_in.deferred_load = byte.simulate_input_port;

        if byte.allow_burst {
            self.ser_in.burst_pending_data = true;
            self.ser_in.burst_pending_irq1 = true;
            self.ser_in.deferred_load = false;
        }
        else {
            self.ser_in.burst_pending_data = false;
            self.ser_in.burst_pending_irq1 = false;
        }

        self.ser_in.burst_pending_irq2 = false;
        self.ser_out.burst_deadline = 0;

        if !self.ser_in.deferred_load {
            self.process_received_serial_byte();
        }
    }

    /// Offer serial input to each device in order until one supplies a byte.
    pub(super) fn poll_sio_devices(&mut self) {
        for i in 0..self.sio_devices.len() {
            if self.ser_in.burst_pending_data {
                break;
            }

            if let Some(byte) = self.sio_devices[i].ser_in_ready() {
                self.receive_sio_byte(byte);
            }
        }
    }

    fn process_received_serial_byte(&mut self) {
        log::trace!(
            "POKEY: Reasserting serial input IRQ, IRQEN={:02X} IRQST={:02X}",
            self.irqen,
            self.irqst
        );

        if self.irqen & IRQ_SERIN_READY != 0 {
            if self.irqst & IRQ_SERIN_READY == 0 {
                if self.skstat & SKSTAT_SERIN_OVERRUN != 0 && self.trace_sio {
                    self.trace_logger.write_line(format_args!("Signaling first serial input overrun."));
                }
                self.skstat &= !SKSTAT_SERIN_OVERRUN;
                log::debug!("POKEY: Serial input overrun (SERIN {:02X})", self.serin);
            }

            self.irqst &= !IRQ_SERIN_READY;
            self.assert_irq(false);
        }

        self.serin = self.ser_in.shift_register;
        self.skstat &= self.ser_in.pending_status;
    }

    pub(super) fn read_serin(&mut self) -> u8 {
        let c = self.serin;
        log::trace!("POKEY: Reading SERIN {:02X}", c);

        if self.ser_in.burst_pending_data {
            self.ser_in.burst_pending_data = false;

            if !self.ser_in.burst_pending_irq1 && !self.ser_in.burst_pending_irq2 {
                self.poll_sio_devices();
            }
        }

        c
    }

    fn skstat_with_data_line(&self) -> u8 {
        let mut c = self.skstat;
        if self.scheduler.tick64() >= self.data_in_flip_time {
            c ^= SKSTAT_SERIN_DATA;
        }
        c
    }

    fn simulated_input_level(&self) -> Option<bool> {
        if !self.ser_in.simulate_port {
            return None;
        }
        let dt = self.scheduler.tick().wrapping_sub(self.ser_in.simulate_base_time);
        self.ser_in.simulated_level(dt)
    }

    fn apply_input_level(c: u8, level: Option<bool>) -> u8 {
        match level {
            Some(true) => c | SKSTAT_SERIN_DATA,
            Some(false) => c & !SKSTAT_SERIN_DATA,
            None => c,
        }
    }

    pub(super) fn read_skstat(&mut self) -> u8 {
        let c = self.skstat_with_data_line();
        let level = self.simulated_input_level();
        if self.ser_in.simulate_port && level.is_none() {
            self.ser_in.simulate_port = false;
        }
        Self::apply_input_level(c, level)
    }

    pub(super) fn peek_skstat(&self) -> u8 {
        Self::apply_input_level(self.skstat_with_data_line(), self.simulated_input_level())
    }

    pub(super) fn write_serout(&mut self, value: u8) {
        log::trace!("POKEY: Sending serial byte {:02X}", value);

        // SEROUT only loads a latch; the shift register takes it on a
        // later clock.
        self.serout = value;
        if self.ser_out.valid {
            log::debug!("POKEY: Serial output overrun");
        }

        if self.ser_out.counter == 0 {
            self.ser_out.counter = 1;

            if OutputClock::from(self.skctl) == OutputClock::External && self.ext_clock_period != 0 {
                let delay = self.next_external_output_edge();
                self.scheduler.set_event(delay, PokeyEvent::SerialOutput);
            }
        }

        self.ser_out.valid = true;
    }

    /// Cycles to the next external output clock edge after the write lands.
    fn next_external_output_edge(&self) -> u32 {
        let bit_period = self.ext_clock_period * 2;
        let delay = self
            .scheduler
            .tick()
            .wrapping_add(2)
            .wrapping_sub(self.ext_clock_base);

        if delay >= 0x8000_0000 {
            bit_period - delay.wrapping_neg() % bit_period
        }
        else {
            match delay % bit_period {
                0 => bit_period,
                d => d,
            }
        }
    }

    pub(super) fn on_serial_input_tick(&mut self) {
        if self.ser_in.counter == 0 {
            return;
        }

        self.ser_in.counter -= 1;

        if self.ser_in.counter == 0 {
            self.skstat |= SKSTAT_SERIN_BUSY;
            self.ser_in.waiting_for_start_bit = true;

            if self.skctl & SKCTL_ASYNC_RECV != 0 && !self.mode.linked34 {
                let t = self.scheduler.tick();
                self.channels[2].counter = self.channels[2].audfp1(t);
                self.setup_timers(0b0100);
            }

            if self.ser_in.deferred_load {
                self.process_received_serial_byte();
            }
        }
        else if is_external_recv(self.skctl) && self.ext_clock_period != 0 {
            self.scheduler.set_event(self.ext_clock_period, PokeyEvent::SerialInput);
        }
    }

    pub(super) fn on_serial_output_tick(&mut self) {
        self.ser_out.counter = self.ser_out.counter.saturating_sub(1);

        if self.ser_out.counter == 0 {
            self.flush_serial_output();

            if self.ser_out.valid {
                self.ser_out.counter = SEND_BITS;
                self.ser_out.start_time = self.scheduler.tick64();

                // A burst reply that missed its window finishes the next byte at once.
                let deadline = self.ser_out.burst_deadline;
                if deadline != 0 && self.scheduler.tick().wrapping_sub(deadline) >= 0x8000_0000 {
                    self.ser_out.counter = 1;
                }

                self.ser_out.shift_register = self.serout;
                self.ser_out.valid = false;
                self.ser_out.shift_valid = true;

                if let Some(cassette) = self.cassette.as_mut() {
                    cassette.begin_cassette_data(self.skctl);
                }

                // Serial output complete is not gated by IRQEN.
                self.irqst |= IRQ_SEROUT_COMPLETE;

                if self.irqen & IRQ_SEROUT_READY != 0 {
                    self.irqst &= !IRQ_SEROUT_READY;
                }
            }
            else {
                self.irqst &= !IRQ_SEROUT_COMPLETE;
            }

            self.update_irq_line(false);
        }

        self.ser_out.output_state = self.ser_out.line_level();

        if self.ser_out.counter != 0 && OutputClock::from(self.skctl) == OutputClock::External {
            if self.ext_clock_period != 0 {
                self.scheduler.set_event(self.ext_clock_period, PokeyEvent::SerialOutput);
            }
            else {
                self.scheduler.unset_event(PokeyEvent::SerialOutput);
            }
        }
    }

    pub fn is_serial_output_clock_running(&self) -> bool {
        let clocks_running = !is_init_mode(self.skctl);

        match OutputClock::from(self.skctl) {
            OutputClock::External => self.ext_clock_period != 0,
            OutputClock::Timer4 => {
                // With async receive the clock only runs while receiving.
                if self.skctl & SKCTL_ASYNC_RECV != 0 {
                    false
                }
                else {
                    clocks_running || (self.mode.linked34 && self.mode.fast3)
                }
            }
            OutputClock::Timer2 => clocks_running || (self.mode.linked12 && self.mode.fast1),
        }
    }

    /// Hand the byte in the output shift register to the bus. A byte cut
    /// short before its first data bit is lost; a later cut keeps the bits
    /// already sent.
    pub(super) fn flush_serial_output(&mut self) {
        if !self.ser_out.shift_valid {
            return;
        }

        let remaining = self.ser_out.counter;
        self.ser_out.shift_valid = false;
        self.ser_out.counter = 0;

        if remaining >= 9 {
            return;
        }

        let clock_period = match OutputClock::from(self.skctl) {
            OutputClock::External => self.ext_clock_period,
            OutputClock::Timer4 => self.channels[3].period,
            OutputClock::Timer2 => self.channels[1].period,
        };
        // Two clock edges per bit.
        let cpb = clock_period * 2;

        let shift = self.ser_out.shift_register;
        log::debug!("POKEY: Transmitted byte {:02X} at {} cycles/bit", shift, cpb);
        self.trace_sio_line(
            true,
            format_args!(
                "Send     ${:02X} >         (@ {} cycles/bit / {:.1} baud)",
                shift,
                cpb,
                BAUD_CLOCK / cpb as f32
            ),
        );

        let mut c = shift;
        let mut framing_error = false;

        if remaining != 0 {
            let unsent = (0xFFu32 << (9 - remaining)) as u8;
            c &= !unsent;
            if self.serial_noise {
                c |= unsent;
            }
            // Line still low at stop bit time.
            framing_error = !self.ser_out.output_state;
        }

        let mut burst_ok = false;
        let command = self.command_line;
        let start_time = self.ser_out.start_time;
        for device in self.sio_devices.iter_mut() {
            if device.write_sio(c, command, cpb, start_time, framing_error) {
                burst_ok = true;
            }
        }

        if let Some(cassette) = self.cassette.as_mut() {
            cassette.write_cassette_data(shift, cpb);
        }

        self.ser_out.burst_deadline = if burst_ok {
            self.scheduler.tick().wrapping_add(cpb * SEND_BITS) | 1
        }
        else {
            0
        };
    }

    /// Init mode resets both serial state machines. SERIN and SEROUT keep
    /// their values.
    pub(super) fn reset_serial_for_init(&mut self) {
        self.ser_in.shift_register = 0;
        self.ser_in.counter = 0;
        self.ser_out.shift_register = 0;
        self.ser_out.counter = 0;
        self.ser_out.valid = false;
        self.ser_out.shift_valid = false;

        self.ser_in.burst_pending_data = false;
        self.ser_in.burst_pending_irq1 = false;
        self.ser_in.burst_pending_irq2 = false;
        self.ser_out.burst_deadline = 0;

        self.skstat |= SKSTAT_SERIN_BUSY;
        self.irqst &= !IRQ_SEROUT_COMPLETE;
        self.update_irq_line(true);

        if let Some(cassette) = self.cassette.as_mut() {
            cassette.reset_serial_input();
        }

        self.ser_in.reset_counter = self.ser_in.reset_counter.wrapping_add(1);
    }

    pub(super) fn catch_up_external_clock(&mut self, t: u32) {
        let period = self.ext_clock_period;
        if period == 0 {
            return;
        }

        let mut since = t.wrapping_sub(self.ext_clock_base);
        if since >= EXT_CLOCK_CATCHUP {
            since = since.wrapping_add(period - 1);
            self.ext_clock_base = self.ext_clock_base.wrapping_add(since - since % period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::pokey::{tests::TestRig, timers::BORROW_DELAY};

    /// AUDF3=$28 AUDF4=0 linked at 1.79MHz: 47 cycles per timer 4 borrow,
    /// two borrows per bit.
    const SIO_AUDF3: u8 = 0x28;
    const SIO_CPB: u32 = 2 * (SIO_AUDF3 as u32 + 1 + 2 * BORROW_DELAY);

    fn clocked_rig(skctl: u8) -> TestRig {
        let mut rig = TestRig::running();
        rig.write(REG_AUDCTL, AUDCTL_LINK_34 | AUDCTL_FAST_3);
        rig.write(REG_AUDF3, SIO_AUDF3);
        rig.write(REG_AUDF4, 0);
        rig.write(REG_SKCTL, skctl);
        rig
    }

    /// Asynchronous receive on timers 3+4.
    fn sio_rig() -> TestRig {
        let mut rig = clocked_rig(SKCTL_INIT_MASK | SKCTL_RECV_MODE);
        rig.write(REG_IRQEN, IRQ_SERIN_READY);
        rig
    }

    /// Transmit clocked by timer 4.
    fn send_rig() -> TestRig {
        let mut rig = clocked_rig(SKCTL_INIT_MASK | 0x40);
        rig.add_device(&[], false);
        rig
    }

    #[test]
    fn test_receive_rate_matches() {
        let rig = sio_rig();
        assert_eq!(rig.pokey.serial_cycles_per_bit_recv(), SIO_CPB);
    }

    #[test]
    fn test_receive_loads_serin_and_irq() {
        let mut rig = sio_rig();
        rig.pokey.receive_sio_byte(SerialInputByte::new(0x41, SIO_CPB));

        assert_eq!(rig.read(REG_SERIN), 0x41);
        assert_eq!(rig.read(REG_IRQST) & IRQ_SERIN_READY, 0);
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_SERIN_BUSY, 0);
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_FRAMING_ERROR, SKSTAT_FRAMING_ERROR);
        assert!(rig.pokey.is_irq_asserted());

        // Busy clears once all the bits have been clocked through.
        rig.advance(20 * SIO_CPB as u64);
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_SERIN_BUSY, SKSTAT_SERIN_BUSY);
    }

    #[test]
    fn test_receive_rate_mismatch_is_framing_error() {
        let mut rig = sio_rig();
        let off = SIO_CPB + SIO_CPB / 6;
        rig.pokey.receive_sio_byte(SerialInputByte::new(0x41, off));

        assert_eq!(rig.read(REG_SERIN), 0xFF);
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_FRAMING_ERROR, 0);

        // Within the 1/8 tolerance is fine.
        rig.write(REG_SKRES, 0);
        rig.advance(20 * SIO_CPB as u64);
        rig.pokey.receive_sio_byte(SerialInputByte::new(0x42, SIO_CPB + SIO_CPB / 10));
        assert_eq!(rig.read(REG_SERIN), 0x42);
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_FRAMING_ERROR, SKSTAT_FRAMING_ERROR);
    }

    #[test]
    fn test_receive_overrun() {
        let mut rig = sio_rig();
        rig.pokey.receive_sio_byte(SerialInputByte::new(0x01, 0));
        rig.advance(20 * SIO_CPB as u64);
        rig.pokey.receive_sio_byte(SerialInputByte::new(0x02, 0));
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_SERIN_OVERRUN, 0);
        assert_eq!(rig.read(REG_SERIN), 0x02);
    }

    #[test]
    fn test_receive_dropped_in_init_and_without_ext_clock() {
        let mut rig = TestRig::new();
        rig.pokey.receive_sio_byte(SerialInputByte::new(0x55, 0));
        assert_eq!(rig.read(REG_SERIN), 0);

        rig.write(REG_SKCTL, SKCTL_INIT_MASK);
        rig.pokey.receive_sio_byte(SerialInputByte::new(0x55, 0));
        assert_eq!(rig.read(REG_SERIN), 0);

        rig.pokey.set_external_serial_clock(0, 50);
        rig.pokey.receive_sio_byte(SerialInputByte::new(0x55, 50));
        assert_eq!(rig.read(REG_SERIN), 0x55);
    }

    #[test]
    fn test_sync_mode_garbles_async_byte() {
        let mut rig = sio_rig();
        rig.write(REG_SKCTL, SKCTL_INIT_MASK | SKCTL_RECV_SYNC_TIMER4);
        rig.pokey.receive_sio_byte(SerialInputByte::new(0x13, 0));
        assert_eq!(rig.read(REG_SERIN), 0x83);
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_FRAMING_ERROR, 0);
    }

    #[test]
    fn test_burst_irq_handshake() {
        let mut rig = sio_rig();
        rig.add_device(&[SerialInputByte::burst(0x22, SIO_CPB)], false);

        rig.pokey.receive_sio_byte(SerialInputByte::burst(0x11, SIO_CPB));
        assert_eq!(rig.read(REG_IRQST) & IRQ_SERIN_READY, 0);

        // Reading SERIN while IRQ1 is outstanding does not poll.
        assert_eq!(rig.read(REG_SERIN), 0x11);
        assert_eq!(rig.read(REG_SERIN), 0x11);

        // Acknowledge: disable moves to IRQ2, enable asks the device for more.
        rig.write(REG_IRQEN, 0);
        assert_eq!(rig.read(REG_SERIN), 0x11);
        rig.write(REG_IRQEN, IRQ_SERIN_READY);
        assert_eq!(rig.read(REG_SERIN), 0x22);
        assert_eq!(rig.read(REG_IRQST) & IRQ_SERIN_READY, 0);
    }

    #[test]
    fn test_simulated_input_port() {
        let mut rig = sio_rig();
        let mut byte = SerialInputByte::new(0x01, SIO_CPB);
        byte.simulate_input_port = true;
        rig.pokey.receive_sio_byte(byte);

        // Load is deferred to the last bit.
        assert_eq!(rig.read(REG_SERIN), 0);

        // Start bit low, then data bit 0 high.
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_SERIN_DATA, 0);
        rig.advance(SIO_CPB as u64);
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_SERIN_DATA, SKSTAT_SERIN_DATA);
        rig.advance(SIO_CPB as u64);
        assert_eq!(rig.pokey.debug_read_byte(REG_SKSTAT) & SKSTAT_SERIN_DATA, 0);

        rig.advance(20 * SIO_CPB as u64);
        assert_eq!(rig.read(REG_SERIN), 0x01);
    }

    #[test]
    fn test_data_line_flip() {
        let mut rig = TestRig::running();
        rig.pokey.set_data_line(false, 500);
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_SERIN_DATA, 0);
        rig.advance(500);
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_SERIN_DATA, SKSTAT_SERIN_DATA);
    }

    #[test]
    fn test_serout_shifts_to_devices() {
        let mut rig = send_rig();
        rig.write(REG_IRQEN, IRQ_SEROUT_READY | IRQ_SEROUT_COMPLETE);
        rig.pokey.set_command_line(true);

        rig.write(REG_SEROUT, 0x31);
        rig.advance(2 * SIO_CPB as u64);
        // Moved to the shift register; SEROUT is free again.
        assert_eq!(rig.read(REG_IRQST) & IRQ_SEROUT_READY, 0);

        rig.advance(12 * SIO_CPB as u64);
        let writes = rig.rec.borrow().sio_writes.clone();
        assert_eq!(writes, vec![(0x31, true, SIO_CPB, false)]);
        assert_eq!(rig.rec.borrow().commands, vec![true]);
        assert_eq!(rig.read(REG_IRQST) & IRQ_SEROUT_COMPLETE, 0);
    }

    #[test]
    fn test_truncated_output_keeps_sent_bits() {
        let mut rig = send_rig();
        rig.write(REG_SEROUT, 0xFF);
        rig.advance(6 * SIO_CPB as u64);

        // Switching to an external clock with none attached cuts the byte off.
        rig.write(REG_SKCTL, SKCTL_INIT_MASK);
        let writes = rig.rec.borrow().sio_writes.clone();
        assert_eq!(writes.len(), 1);
        let (c, _, _, framing) = writes[0];
        assert_ne!(c, 0xFF);
        assert_eq!(c & 1, 1);
        assert!(!framing);
    }

    #[test]
    fn test_init_mode_resets_serial_and_counts() {
        let mut rig = sio_rig();
        let before = rig.pokey.serial_input_reset_counter();
        rig.write(REG_SKCTL, 0);
        assert_eq!(rig.pokey.serial_input_reset_counter(), before + 1);
        assert_eq!(rig.read(REG_IRQST) & IRQ_SEROUT_COMPLETE, 0);
        assert_eq!(rig.read(REG_SKSTAT) & SKSTAT_SERIN_BUSY, SKSTAT_SERIN_BUSY);
    }

    #[test]
    fn test_serial_noise_pulses() {
        let mut rig = sio_rig();
        rig.pokey.set_serial_noise(true);
        rig.pokey.receive_sio_byte(SerialInputByte::new(0x00, SIO_CPB));
        // Edges at the start bit and the stop bit.
        assert_eq!(rig.rec.borrow().noise_pulses, 2);
    }

    #[test]
    fn test_external_output_clock() {
        let mut rig = TestRig::running();
        rig.add_device(&[], false);
        rig.pokey.set_external_serial_clock(0, 40);
        rig.write(REG_SEROUT, 0x5A);
        rig.advance(40 * 2 * 14);

        let writes = rig.rec.borrow().sio_writes.clone();
        assert_eq!(writes.first().map(|w| (w.0, w.2)), Some((0x5A, 2 * 40)));
    }

    #[test]
    fn test_send_rate_matches_receive_rate() {
        let mut sender = send_rig();
        sender.write(REG_SEROUT, 0x31);
        sender.advance(14 * SIO_CPB as u64);
        let sent = sender.rec.borrow().sio_writes.clone();
        assert_eq!(sent.len(), 1);
        let (byte, _, cpb, _) = sent[0];

        // A device echoing at the reported rate passes the receive check.
        let mut receiver = sio_rig();
        assert_eq!(cpb, receiver.pokey.serial_cycles_per_bit_recv());
        receiver.pokey.receive_sio_byte(SerialInputByte::new(byte, cpb));
        assert_eq!(receiver.read(REG_SERIN), 0x31);
        assert_eq!(receiver.read(REG_SKSTAT) & SKSTAT_FRAMING_ERROR, SKSTAT_FRAMING_ERROR);
    }

    #[test]
    fn test_burst_window_spans_whole_byte() {
        let mut rig = clocked_rig(SKCTL_INIT_MASK | 0x40);
        rig.add_device(&[], true);
        rig.write(REG_SEROUT, 0x31);

        let mut steps = 0;
        while rig.rec.borrow().sio_writes.is_empty() && steps < 20 * SIO_CPB {
            rig.advance(1);
            steps += 1;
        }
        assert_eq!(rig.rec.borrow().sio_writes.len(), 1);

        let sent_at = rig.now() as u32;
        assert_eq!(
            rig.pokey.ser_out.burst_deadline,
            sent_at.wrapping_add(SEND_BITS * SIO_CPB) | 1
        );
    }

    #[test]
    fn test_line_level() {
        let mut out = SerialOutputState::default();
        out.shift_register = 0b0000_0001;
        out.counter = 10;
        assert!(!out.line_level());
        out.counter = 9;
        assert!(out.line_level());
        out.counter = 8;
        assert!(!out.line_level());
        out.counter = 0;
        assert!(out.line_level());
    }
}
