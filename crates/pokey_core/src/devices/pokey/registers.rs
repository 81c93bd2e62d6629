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

    devices::pokey::registers.rs

    Register addresses and bit definitions.
*/

use modular_bitfield::prelude::*;

// Read addresses
pub const REG_POT0: u8 = 0x00;
pub const REG_POT7: u8 = 0x07;
pub const REG_ALLPOT: u8 = 0x08;
pub const REG_KBCODE: u8 = 0x09;
pub const REG_RANDOM: u8 = 0x0A;
pub const REG_SERIN: u8 = 0x0D;
pub const REG_IRQST: u8 = 0x0E;
pub const REG_SKSTAT: u8 = 0x0F;

// Write addresses
pub const REG_AUDF1: u8 = 0x00;
pub const REG_AUDC1: u8 = 0x01;
pub const REG_AUDF2: u8 = 0x02;
pub const REG_AUDC2: u8 = 0x03;
pub const REG_AUDF3: u8 = 0x04;
pub const REG_AUDC3: u8 = 0x05;
pub const REG_AUDF4: u8 = 0x06;
pub const REG_AUDC4: u8 = 0x07;
pub const REG_AUDCTL: u8 = 0x08;
pub const REG_STIMER: u8 = 0x09;
pub const REG_SKRES: u8 = 0x0A;
pub const REG_POTGO: u8 = 0x0B;
pub const REG_SEROUT: u8 = 0x0D;
pub const REG_IRQEN: u8 = 0x0E;
pub const REG_SKCTL: u8 = 0x0F;

/// Register offsets at or above this decode to the stereo secondary chip.
pub const REG_SECONDARY: u8 = 0x10;
pub const ADDRESS_MASK_MONO: u8 = 0x0F;
pub const ADDRESS_MASK_STEREO: u8 = 0x1F;

// IRQEN / IRQST bits. IRQST is active low.
pub const IRQ_TIMER1: u8 = 0b0000_0001;
pub const IRQ_TIMER2: u8 = 0b0000_0010;
pub const IRQ_TIMER4: u8 = 0b0000_0100;
pub const IRQ_SEROUT_COMPLETE: u8 = 0b0000_1000;
pub const IRQ_SEROUT_READY: u8 = 0b0001_0000;
pub const IRQ_SERIN_READY: u8 = 0b0010_0000;
pub const IRQ_KEY: u8 = 0b0100_0000;
pub const IRQ_BREAK: u8 = 0b1000_0000;
pub const IRQ_TIMERS: u8 = IRQ_TIMER1 | IRQ_TIMER2 | IRQ_TIMER4;
/// Every source except serial output complete is held inactive while disabled.
pub const IRQ_DISABLE_CLEARS: u8 = !IRQ_SEROUT_COMPLETE;
pub const IRQST_RESET: u8 = 0xF7;

// SKSTAT bits. All are active low except the serial data input level.
pub const SKSTAT_FRAMING_ERROR: u8 = 0b1000_0000;
pub const SKSTAT_KEY_OVERRUN: u8 = 0b0100_0000;
pub const SKSTAT_SERIN_OVERRUN: u8 = 0b0010_0000;
pub const SKSTAT_SERIN_DATA: u8 = 0b0001_0000;
pub const SKSTAT_SHIFT: u8 = 0b0000_1000;
pub const SKSTAT_KEY_DOWN: u8 = 0b0000_0100;
pub const SKSTAT_SERIN_BUSY: u8 = 0b0000_0010;
pub const SKSTAT_ERRORS: u8 = SKSTAT_FRAMING_ERROR | SKSTAT_KEY_OVERRUN | SKSTAT_SERIN_OVERRUN;
pub const SKSTAT_RESET: u8 = 0x7F;

// SKCTL bits
pub const SKCTL_DEBOUNCE: u8 = 0b0000_0001;
pub const SKCTL_KEY_SCAN: u8 = 0b0000_0010;
pub const SKCTL_INIT_MASK: u8 = SKCTL_DEBOUNCE | SKCTL_KEY_SCAN;
pub const SKCTL_FAST_POTS: u8 = 0b0000_0100;
pub const SKCTL_TWO_TONE: u8 = 0b0000_1000;
/// Asynchronous receive: timers 3+4 restart on each start bit.
pub const SKCTL_ASYNC_RECV: u8 = 0b0001_0000;
pub const SKCTL_RECV_MODE: u8 = 0b0011_0000;
pub const SKCTL_RECV_SYNC_TIMER4: u8 = 0b0010_0000;
pub const SKCTL_SEND_MODE: u8 = 0b0110_0000;
pub const SKCTL_CLOCK_MODE: u8 = 0b0111_0000;
pub const SKCTL_FORCE_BREAK: u8 = 0b1000_0000;

/// AUDCTL as written by the CPU. Bit 0 is the least significant field.
#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct AudCtl {
    pub clock_15khz: bool,
    pub highpass_24: bool,
    pub highpass_13: bool,
    pub link_34: bool,
    pub link_12: bool,
    pub fast_3: bool,
    pub fast_1: bool,
    pub poly9: bool,
}

pub const AUDCTL_CLOCK_15KHZ: u8 = 0b0000_0001;
pub const AUDCTL_LINK_34: u8 = 0b0000_1000;
pub const AUDCTL_LINK_12: u8 = 0b0001_0000;
pub const AUDCTL_FAST_3: u8 = 0b0010_0000;
pub const AUDCTL_FAST_1: u8 = 0b0100_0000;
pub const AUDCTL_POLY9: u8 = 0b1000_0000;
/// Bits that change the period of timers 1 and 2.
pub const AUDCTL_PERIOD_12: u8 = AUDCTL_FAST_1 | AUDCTL_LINK_12 | AUDCTL_CLOCK_15KHZ;
/// Bits that change the period of timers 3 and 4.
pub const AUDCTL_PERIOD_34: u8 = AUDCTL_FAST_3 | AUDCTL_LINK_34 | AUDCTL_CLOCK_15KHZ;

impl From<u8> for AudCtl {
    fn from(value: u8) -> Self {
        AudCtl::from_bytes([value])
    }
}

/// Source of the serial output shift clock, from SKCTL bits 5-6.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputClock {
    External,
    Timer4,
    Timer2,
}

impl From<u8> for OutputClock {
    fn from(skctl: u8) -> Self {
        match skctl & SKCTL_SEND_MODE {
            0x00 => OutputClock::External,
            0x20 | 0x40 => OutputClock::Timer4,
            _ => OutputClock::Timer2,
        }
    }
}

#[inline]
pub fn is_init_mode(skctl: u8) -> bool {
    skctl & SKCTL_INIT_MASK == 0
}

#[inline]
pub fn is_external_recv(skctl: u8) -> bool {
    skctl & SKCTL_RECV_MODE == 0
}

pub const RECV_MODE_NAMES: [&str; 4] = ["recv ext", "recv ch3+4 async", "recv ch4", "recv ch3+4 async"];

pub const SEND_MODE_NAMES: [&str; 8] = [
    "send ext",
    "send ext",
    "send ch4",
    "send ch4 async (x)",
    "send ch4",
    "send ch4 async (x)",
    "send ch2",
    "send ch2",
];

pub const INIT_MODE_NAMES: [&str; 4] = [
    "init mode",
    "keyboard scan disabled",
    "keyboard scan enabled w/o debounce",
    "keyboard scan enabled",
];

pub const IRQ_NAMES: [(u8, &str); 8] = [
    (IRQ_BREAK, "break key"),
    (IRQ_KEY, "keyboard"),
    (IRQ_SERIN_READY, "serin"),
    (IRQ_SEROUT_READY, "serout"),
    (IRQ_SEROUT_COMPLETE, "sertrans"),
    (IRQ_TIMER4, "timer4"),
    (IRQ_TIMER2, "timer2"),
    (IRQ_TIMER1, "timer1"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audctl_field_order() {
        let a = AudCtl::from(0x78);
        assert!(a.fast_1() && a.fast_3() && a.link_12() && a.link_34());
        assert!(!a.clock_15khz() && !a.poly9());

        let b = AudCtl::from(AUDCTL_POLY9 | AUDCTL_CLOCK_15KHZ);
        assert!(b.poly9() && b.clock_15khz());
        assert!(!b.link_12());
    }

    #[test]
    fn test_output_clock_decode() {
        assert_eq!(OutputClock::from(0x03), OutputClock::External);
        assert_eq!(OutputClock::from(0x23), OutputClock::Timer4);
        assert_eq!(OutputClock::from(0x43), OutputClock::Timer4);
        assert_eq!(OutputClock::from(0x73), OutputClock::Timer2);
    }
}
