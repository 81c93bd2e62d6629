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

    device_traits::connections.rs

    IRQ wiring and the cooked keyboard handshake.
*/

/// Machine-side wiring of the POKEY IRQ output and the cooked keyboard
/// handshake.
pub trait PokeyConnections {
    fn assert_irq(&mut self, cpu_based: bool);
    fn negate_irq(&mut self, cpu_based: bool);

    /// Whether the OS is ready to accept another cooked key press.
    fn is_key_push_ok(&self, _scan_code: u8, _cooldown_expired: bool) -> bool {
        true
    }
}

/// Receives the cycle span of each IRQ assertion for tracing tools.
pub trait IrqTraceOutput {
    fn add_irq(&mut self, start: u64, end: u64);
}

#[derive(Default)]
pub struct NullConnections;

impl PokeyConnections for NullConnections {
    fn assert_irq(&mut self, _cpu_based: bool) {}
    fn negate_irq(&mut self, _cpu_based: bool) {}
}
