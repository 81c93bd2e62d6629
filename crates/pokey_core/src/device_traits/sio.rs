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

    device_traits::sio.rs

    Peripherals on the SIO bus and the cassette data path.
*/

use serde_derive::{Deserialize, Serialize};

/// A byte a peripheral wants to shift into POKEY.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SerialInputByte {
    pub value: u8,
    /// Bit period the peripheral is sending at, or 0 to skip rate checking.
    pub cycles_per_bit: u32,
    /// Reconstruct SKSTAT bit 4 from the in-flight bits while the byte arrives.
    pub simulate_input_port: bool,
    /// Deliver SERIN immediately instead of after the shift completes.
    pub allow_burst: bool,
    pub synchronous: bool,
    pub force_framing_error: bool,
}

impl SerialInputByte {
    pub fn new(value: u8, cycles_per_bit: u32) -> Self {
        Self {
            value,
            cycles_per_bit,
            ..Default::default()
        }
    }

    pub fn burst(value: u8, cycles_per_bit: u32) -> Self {
        Self {
            value,
            cycles_per_bit,
            allow_burst: true,
            ..Default::default()
        }
    }
}

/// A peripheral attached to the SIO bus. Devices are polled in attachment
/// order; the first one to answer wins.
pub trait SioDevice {
    /// A byte finished shifting out. Returns true if the device will answer in
    /// burst mode, which opens a short window where a quick reply is still
    /// treated as synchronous with this byte.
    fn write_sio(&mut self, byte: u8, command: bool, cycles_per_bit: u32, start_time: u64, framing_error: bool)
        -> bool;

    fn begin_command(&mut self) {}
    fn end_command(&mut self) {}

    /// Serial input is ready for another byte.
    fn ser_in_ready(&mut self) -> Option<SerialInputByte> {
        None
    }
}

/// The cassette motor/data path, which listens to the same serial lines.
pub trait CassetteDevice {
    fn begin_cassette_data(&mut self, _skctl: u8) {}
    fn write_cassette_data(&mut self, _byte: u8, _cycles_per_bit: u32) {}
    fn change_serial_rate(&mut self, _divisor: u32) {}
    fn reset_serial_input(&mut self) {}
    fn change_force_break(&mut self, _enabled: bool) {}
}
