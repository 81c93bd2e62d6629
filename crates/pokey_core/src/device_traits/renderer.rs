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

    device_traits::renderer.rs

    The interface to an audio renderer driven by the timers.
*/

/// The audio renderer a POKEY drives. The chip owns all counter state; the
/// renderer is handed just enough to reproduce channel edges on its own,
/// either one edge at a time or as a periodic schedule.
pub trait PokeyRenderer {
    fn cold_reset(&mut self) {}

    fn set_init_mode(&mut self, init: bool);

    /// Returns true if the speaker level actually changed.
    fn set_speaker(&mut self, _state: bool) -> bool {
        false
    }

    fn reset_timers(&mut self);
    fn set_audcx(&mut self, channel: usize, value: u8);
    fn set_audctl(&mut self, value: u8);

    /// A borrow from an actively scheduled channel.
    fn add_channel_event(&mut self, channel: usize);

    /// Channel borrows occur at `start`, `start + period`, ... until cleared.
    fn set_channel_deferred_events(&mut self, channel: usize, start: u32, period: u32);

    /// Deferred schedule for the low half of a linked pair. The low channel
    /// ticks every `lo_period` from `lo_start`; the high half borrows every
    /// `hi_period` from `hi_start`, and the low counter restarts `lo_offset`
    /// cycles after each high borrow.
    fn set_channel_deferred_events_linked(
        &mut self,
        channel: usize,
        lo_start: u32,
        lo_period: u32,
        hi_start: u32,
        hi_period: u32,
        lo_offset: u32,
    );

    fn clear_channel_deferred_events(&mut self, channel: usize, t: u32);

    fn add_serial_noise_pulse(&mut self, _t: u32) {}

    fn channel_output(&self, _channel: usize) -> bool {
        false
    }

    fn restart_audio_log(&mut self) {}
}

/// A renderer that produces nothing. Used by headless hosts that only care
/// about register-visible behavior.
#[derive(Default)]
pub struct NullRenderer;

impl PokeyRenderer for NullRenderer {
    fn set_init_mode(&mut self, _init: bool) {}
    fn reset_timers(&mut self) {}
    fn set_audcx(&mut self, _channel: usize, _value: u8) {}
    fn set_audctl(&mut self, _value: u8) {}
    fn add_channel_event(&mut self, _channel: usize) {}
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
}
