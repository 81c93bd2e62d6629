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

    devices::pokey::display.rs

    Debugger views of POKEY state.
*/

//! Debugger views: register maps with dirty tracking and a text status dump.

use std::{collections::BTreeMap, fmt};

use super::{registers::*, Pokey};
use crate::syntax_token::SyntaxToken;

pub type PokeyDisplayState = BTreeMap<String, Vec<BTreeMap<&'static str, SyntaxToken>>>;

const CHANNEL_LABELS: [(&str, &str, &str); 4] = [
    ("AUDF1:", "AUDC1:", "Timer 1:"),
    ("AUDF2:", "AUDC2:", "Timer 2:"),
    ("AUDF3:", "AUDC3:", "Timer 3:"),
    ("AUDF4:", "AUDC4:", "Timer 4:"),
];

pub fn audctl_description(audctl: u8) -> String {
    let a = AudCtl::from(audctl);
    let mut s = format!("{:02x}", audctl);
    s.push_str(if a.poly9() { ", 9-bit poly" } else { ", 17-bit poly" });
    for (set, name) in [
        (a.fast_1(), ", 1.79 ch1"),
        (a.fast_3(), ", 1.79 ch3"),
        (a.link_12(), ", ch1+ch2"),
        (a.link_34(), ", ch3+ch4"),
        (a.highpass_13(), ", highpass 1+3"),
        (a.highpass_24(), ", highpass 2+4"),
    ] {
        if set {
            s.push_str(name);
        }
    }
    s.push_str(if a.clock_15khz() { ", 15KHz" } else { ", 64KHz" });
    s
}

pub fn skctl_description(skctl: u8) -> String {
    let mut s = format!(
        "{:02x} | {} | {} | {}",
        skctl,
        RECV_MODE_NAMES[((skctl >> 4) & 3) as usize],
        SEND_MODE_NAMES[((skctl >> 4) & 7) as usize],
        INIT_MODE_NAMES[(skctl & SKCTL_INIT_MASK) as usize]
    );
    for (bit, name) in [
        (SKCTL_FORCE_BREAK, " | force break"),
        (SKCTL_TWO_TONE, " | two-tone mode"),
        (SKCTL_FAST_POTS, " | fast pot scan"),
    ] {
        if skctl & bit != 0 {
            s.push_str(name);
        }
    }
    s
}

/// IRQ sources named in `mask`. IRQST is active low.
pub fn irq_description(value: u8, active_low: bool) -> String {
    let active = if active_low { !value } else { value };
    let mut s = format!("{:02X}", value);
    for (bit, name) in IRQ_NAMES {
        if active & bit != 0 {
            s.push_str(", ");
            s.push_str(name);
        }
    }
    s
}

fn state_token(s: String) -> SyntaxToken {
    SyntaxToken::StateString(s, false, 0)
}

impl Pokey {
    fn timer_mode_name(&self, channel: usize) -> &'static str {
        if self.channels[channel].deferred.is_some() {
            "passive"
        }
        else {
            "active"
        }
    }

    fn channel_display_state(&self, channel: usize) -> BTreeMap<&'static str, SyntaxToken> {
        let (audf_label, audc_label, timer_label) = CHANNEL_LABELS[channel];
        let ch = &self.channels[channel];

        let mut map = BTreeMap::<&str, SyntaxToken>::new();
        map.insert(audf_label, SyntaxToken::register(&ch.audf));
        map.insert(audc_label, SyntaxToken::register(&ch.audc));
        map.insert(
            timer_label,
            state_token(format!(
                "{} cycles to fire, period {} ({})",
                self.cycles_to_timer_fire(channel),
                ch.period,
                self.timer_mode_name(channel)
            )),
        );
        map.insert("Output:", state_token(format!("{}", self.renderer.channel_output(channel))));
        map
    }

    fn control_display_state(&self) -> BTreeMap<&'static str, SyntaxToken> {
        let pots = self.pots_at(0);
        let mut map = BTreeMap::<&str, SyntaxToken>::new();
        map.insert("AUDCTL:", state_token(audctl_description(self.audctl)));
        map.insert("SKCTL:", state_token(skctl_description(self.skctl)));
        map.insert("SKSTAT:", state_token(format!("{:02X}", self.peek_skstat())));
        map.insert("IRQEN:", state_token(irq_description(self.irqen, false)));
        map.insert("IRQST:", state_token(irq_description(self.irqst, true)));
        map.insert("KBCODE:", state_token(format!("{:02X}", self.kbcode)));
        map.insert("ALLPOT:", state_token(format!("{:02X}", pots.allpot)));
        map.insert("SERIN:", state_token(format!("{:02X}", self.serin)));
        map.insert("SEROUT:", state_token(format!("{:02X}", self.serout)));
        map
    }

    fn section_display_state(&mut self, prefix: &str, clean: bool, state: &mut PokeyDisplayState) {
        let timers = (0..4).map(|ch| self.channel_display_state(ch)).collect();
        state.insert(format!("{}Timers", prefix), timers);
        state.insert(format!("{}Control", prefix), vec![self.control_display_state()]);

        if clean {
            for ch in self.channels.iter_mut() {
                ch.audf.clean();
                ch.audc.clean();
            }
        }
    }

    pub fn get_display_state(&mut self, clean: bool) -> PokeyDisplayState {
        let mut state = PokeyDisplayState::new();
        self.section_display_state("", clean, &mut state);

        if let Some(slave) = self.slave.as_mut() {
            slave.section_display_state("Secondary ", clean, &mut state);
        }
        state
    }

    fn dump_chip_status(&self, out: &mut impl fmt::Write) -> fmt::Result {
        for channel in 0..4 {
            let ch = &self.channels[channel];
            write!(
                out,
                "AUDF{}: {:02x}  AUDC{}: {:02x}  Output: {}",
                channel + 1,
                *ch.audf,
                channel + 1,
                *ch.audc,
                self.renderer.channel_output(channel) as u8
            )?;

            match ch.deferred {
                Some(schedule) => writeln!(
                    out,
                    "  ({} cycles until fire) (passive: {} cycles)",
                    self.cycles_to_timer_fire(channel),
                    schedule.period
                )?,
                None if self.cycles_to_timer_fire(channel) != 0 => {
                    writeln!(out, "  ({} cycles until fire) (active)", self.cycles_to_timer_fire(channel))?
                }
                None => writeln!(out)?,
            }
        }

        writeln!(out, "AUDCTL: {}", audctl_description(self.audctl))?;
        writeln!(out, "SKCTL: {}", skctl_description(self.skctl))?;

        if self.ser_in.counter != 0 {
            writeln!(
                out,
                "SERIN: {:02X} (shifting in {:02X})",
                self.serin, self.ser_in.shift_register
            )?;
        }
        else {
            writeln!(out, "SERIN: {:02X}", self.serin)?;
        }

        let pending = |b: bool| if b { "pending" } else { "done" };
        writeln!(out, "SEROUT: {:02x} ({})", self.serout, pending(self.ser_out.valid))?;
        writeln!(
            out,
            "        shift register {:02x} ({}: {})",
            self.ser_out.shift_register,
            self.ser_out.counter,
            pending(self.ser_out.counter != 0)
        )?;
        writeln!(out, "IRQEN:  {}", irq_description(self.irqen, false))?;
        writeln!(out, "IRQST:  {}", irq_description(self.irqst, true))?;

        write!(out, "KBCODE: {:02X}", self.kbcode)?;
        if self.is_5200_mode || self.kb.scan_enabled {
            write!(out, " (keyboard scan counter: {:02X})", self.kb.scan_code)?;
        }
        writeln!(out)?;

        writeln!(out, "ALLPOT: {:02X}", self.pots_at(0).allpot)?;
        writeln!(out)?;
        writeln!(
            out,
            "Command line: {}",
            if self.command_line { "asserted" } else { "negated" }
        )
    }

    /// Human readable status of the chip, and of the secondary if attached.
    pub fn dump_status(&self, out: &mut impl fmt::Write) -> fmt::Result {
        match self.slave.as_deref() {
            Some(slave) => {
                writeln!(out, "Primary POKEY:")?;
                self.dump_chip_status(out)?;
                writeln!(out)?;
                writeln!(out, "Secondary POKEY:")?;
                slave.dump_chip_status(out)
            }
            None => self.dump_chip_status(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::pokey::tests::TestRig;

    #[test]
    fn test_audctl_description() {
        assert_eq!(
            audctl_description(AUDCTL_FAST_3 | AUDCTL_LINK_34),
            "28, 17-bit poly, 1.79 ch3, ch3+ch4, 64KHz"
        );
        assert_eq!(audctl_description(AUDCTL_POLY9 | AUDCTL_CLOCK_15KHZ), "81, 9-bit poly, 15KHz");
    }

    #[test]
    fn test_irq_description_polarity() {
        assert_eq!(irq_description(IRQ_TIMER1 | IRQ_KEY, false), "41, keyboard, timer1");
        assert_eq!(irq_description(0xF7, true), "F7, sertrans");
    }

    #[test]
    fn test_skctl_description() {
        assert_eq!(
            skctl_description(0x13),
            "13 | recv ch3+4 async | send ext | keyboard scan enabled"
        );
    }

    #[test]
    fn test_display_state_dirty_tracking() {
        let mut rig = TestRig::running();
        rig.write(REG_AUDF2, 0x12);

        let state = rig.pokey.get_display_state(true);
        let timers = &state["Timers"];
        assert_eq!(timers.len(), 4);
        assert_eq!(timers[1]["AUDF2:"], SyntaxToken::StateString("12".to_string(), true, 0));

        let state = rig.pokey.get_display_state(true);
        assert_eq!(state["Timers"][1]["AUDF2:"], SyntaxToken::StateString("12".to_string(), false, 0));
        assert!(!state.contains_key("Secondary Timers"));
    }

    #[test]
    fn test_dump_status_stereo() {
        let mut rig = TestRig::running();
        let mut out = String::new();
        rig.pokey.dump_status(&mut out).unwrap();
        assert!(out.starts_with("AUDF1: 00  AUDC1: 00"));
        assert!(out.contains("IRQST:  F7, sertrans"));
        assert!(out.contains("Command line: negated"));

        let slave = rig.secondary();
        rig.pokey.set_slave(Some(Box::new(slave)));
        out.clear();
        rig.pokey.dump_status(&mut out).unwrap();
        assert!(out.starts_with("Primary POKEY:"));
        assert!(out.contains("Secondary POKEY:\nAUDF1: ff  AUDC1: b0"));
        assert!(rig.pokey.get_display_state(false).contains_key("Secondary Control"));
    }
}
