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

    devices::pokey::irq.rs

    IRQEN/IRQST handling and the IRQ output line.
*/

use super::{registers::*, Pokey};

impl Pokey {
    /// Drive the IRQ output from the current IRQEN and IRQST.
    pub(super) fn update_irq_line(&mut self, cpu_based: bool) {
        if self.irqen & !self.irqst != 0 {
            self.assert_irq(cpu_based);
        }
        else {
            self.negate_irq(cpu_based);
        }
    }

    /// Raise the IRQ output. Chip-originated edges are traced one cycle
    /// earlier than CPU-originated ones.
    pub(super) fn assert_irq(&mut self, cpu_based: bool) {
        if self.irq_asserted {
            return;
        }
        self.irq_asserted = true;
        self.connections.assert_irq(cpu_based);

        if self.irq_trace.is_some() {
            self.trace_irq_start = self.trace_time(cpu_based);
            self.trace_irq_pending = true;
        }
    }

    pub(super) fn negate_irq(&mut self, cpu_based: bool) {
        if !self.irq_asserted {
            return;
        }
        self.irq_asserted = false;
        self.connections.negate_irq(cpu_based);

        if self.trace_irq_pending {
            self.trace_irq_pending = false;
            let end = self.trace_time(cpu_based);
            if let Some(trace) = self.irq_trace.as_mut() {
                trace.add_irq(self.trace_irq_start, end);
            }
        }
    }

    fn trace_time(&self, cpu_based: bool) -> u64 {
        let t = self.scheduler.tick64();
        if cpu_based {
            t
        }
        else {
            t.wrapping_sub(1)
        }
    }

    pub(super) fn write_irqen(&mut self, value: u8) {
        if self.irqen == value {
            return;
        }

        let delta = self.irqen ^ value;
        self.irqen = value;

        // Disabled sources are held inactive. Serial output complete is
        // level-sensitive and only gated.
        self.irqst |= !value & IRQ_DISABLE_CLEARS;

        if self.kb.break_key && self.irqen & self.irqst & IRQ_BREAK != 0 {
            self.irqst |= IRQ_BREAK;
        }

        self.update_irq_line(true);

        if delta & IRQ_TIMERS != 0 {
            self.recompute_allowed_deferred_timers();

            // Only enabling pulls a deferred timer back onto exact events.
            // Disabling waits for the next borrow to re-defer.
            if delta & self.irqen & IRQ_TIMERS != 0 {
                let mut to_change = 0u8;
                for (bit, channel) in [(IRQ_TIMER1, 0), (IRQ_TIMER2, 1), (IRQ_TIMER4, 3)] {
                    if delta & bit != 0 && self.channels[channel].deferred.is_some() {
                        to_change |= 1 << channel;
                    }
                }

                if to_change != 0 {
                    self.update_all_timer_counters();
                    self.setup_timers(to_change);
                }
            }
        }

        if delta & IRQ_SERIN_READY != 0 {
            if value & IRQ_SERIN_READY != 0 {
                if self.ser_in.burst_pending_irq2 {
                    self.ser_in.burst_pending_irq2 = false;
                    if !self.ser_in.burst_pending_data {
                        self.poll_sio_devices();
                    }
                }
            }
            else if self.ser_in.burst_pending_irq1 {
                // The handler has acknowledged the byte; the next re-enable
                // asks the device for more.
                self.ser_in.burst_pending_irq1 = false;
                self.ser_in.burst_pending_irq2 = true;
            }
        }
    }

    /// Pending and enabled IRQ sources, active high.
    pub fn active_irqs(&self) -> u8 {
        self.irqen & !self.irqst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::pokey::tests::{RecordingIrqTrace, TestRig};

    #[test]
    fn test_disable_clears_status_but_not_sertrans() {
        let mut rig = TestRig::running();
        rig.write(REG_IRQEN, IRQ_TIMER1);
        rig.write(REG_AUDF1, 0x00);
        rig.write(REG_STIMER, 0);
        rig.advance(200);
        assert_eq!(rig.read(REG_IRQST) & IRQ_TIMER1, 0);
        assert!(rig.pokey.is_irq_asserted());

        rig.write(REG_IRQEN, 0);
        assert_eq!(rig.read(REG_IRQST) & IRQ_TIMER1, IRQ_TIMER1);
        assert!(!rig.pokey.is_irq_asserted());
        assert!(!rig.rec.borrow().irq_line);

        // Serial output complete is not forced inactive by IRQEN.
        assert_eq!(rig.read(REG_IRQST) & IRQ_SEROUT_COMPLETE, 0);
    }

    #[test]
    fn test_sertrans_asserts_when_enabled() {
        let mut rig = TestRig::running();
        // IRQST bit 3 is already active after reset; enabling it raises the line.
        rig.write(REG_IRQEN, IRQ_SEROUT_COMPLETE);
        assert!(rig.pokey.is_irq_asserted());
        assert_eq!(rig.pokey.active_irqs(), IRQ_SEROUT_COMPLETE);
    }

    #[test]
    fn test_timer_irq_pulls_channel_out_of_deferred() {
        let mut rig = TestRig::running();
        rig.write(REG_AUDF1, 0x40);
        rig.write(REG_STIMER, 0);
        rig.advance(100);
        assert!(rig.pokey.is_timer_deferred(0));

        let remaining = rig.pokey.cycles_to_timer_fire(0);
        rig.write(REG_IRQEN, IRQ_TIMER1);
        assert!(!rig.pokey.is_timer_deferred(0));
        assert_eq!(rig.pokey.cycles_to_timer_fire(0), remaining);
    }

    #[test]
    fn test_irq_trace_spans() {
        let mut rig = TestRig::running();
        rig.pokey
            .set_irq_trace_output(Some(Box::new(RecordingIrqTrace(rig.rec.clone()))));

        rig.advance(10);
        rig.write(REG_IRQEN, IRQ_SEROUT_COMPLETE);
        rig.advance(25);
        rig.write(REG_IRQEN, 0);

        let start = rig.now() - 25;
        assert_eq!(rig.rec.borrow().irq_spans, vec![(start, start + 25)]);
    }

    #[test]
    fn test_break_held_keeps_status_inactive_on_reenable() {
        let mut rig = TestRig::running();
        rig.write(REG_IRQEN, IRQ_BREAK);
        rig.pokey.set_break_key_state(true, false);
        rig.pokey.push_break();
        assert_eq!(rig.read(REG_IRQST) & IRQ_BREAK, 0);

        rig.write(REG_IRQEN, 0);
        rig.write(REG_IRQEN, IRQ_BREAK);
        assert_eq!(rig.read(REG_IRQST) & IRQ_BREAK, IRQ_BREAK);
        assert!(!rig.pokey.is_irq_asserted());
    }
}
