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

    scheduler.rs

    Event scheduling for the POKEY timers, serial port and keyboard scan.
*/

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use fxhash::FxHashMap;
use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// Identifiers for every one-shot event a POKEY may have outstanding on the
/// timeline. A chip never has more than one instance of a given event pending.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, Serialize, Deserialize)]
#[repr(u32)]
pub enum PokeyEvent {
    KeyboardIrq = 1,
    KeyboardScan,
    Timer1Borrow,
    Timer2Borrow,
    Timer3Borrow,
    Timer4Borrow,
    ResetTwoTones1,
    ResetTwoTones2,
    ResetTimers,
    ResetTimers2,
    SerialOutput,
    SerialInput,
}

impl PokeyEvent {
    pub const TIMER_BORROW: [PokeyEvent; 4] = [
        PokeyEvent::Timer1Borrow,
        PokeyEvent::Timer2Borrow,
        PokeyEvent::Timer3Borrow,
        PokeyEvent::Timer4Borrow,
    ];

    #[inline]
    pub fn timer_borrow(channel: usize) -> PokeyEvent {
        PokeyEvent::TIMER_BORROW[channel]
    }
}

/// The view of the machine scheduler a POKEY needs. The chip never advances
/// time; it only queries the clock and arms or cancels its own events.
pub trait Scheduler {
    fn tick64(&self) -> u64;

    #[inline]
    fn tick(&self) -> u32 {
        self.tick64() as u32
    }

    /// Arm `event` to fire `delay` cycles from now, replacing any pending instance.
    fn set_event(&mut self, delay: u32, event: PokeyEvent);
    fn unset_event(&mut self, event: PokeyEvent);
    /// Cycles remaining until `event` fires, or None if it is not pending.
    fn ticks_to_event(&self, event: PokeyEvent) -> Option<u32>;

    fn is_event_pending(&self, event: PokeyEvent) -> bool {
        self.ticks_to_event(event).is_some()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChipSlot {
    Primary,
    Secondary,
}

/// A discrete event timeline shared by a primary chip and its optional stereo
/// secondary. Events due at the same cycle are delivered in the order they
/// were armed.
#[derive(Default)]
pub struct EventScheduler {
    now: u64,
    seq: u64,
    queue: BTreeMap<(u64, u64), (ChipSlot, PokeyEvent)>,
    pending: FxHashMap<(ChipSlot, PokeyEvent), (u64, u64)>,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self::with_start(0)
    }

    pub fn with_start(now: u64) -> Self {
        Self {
            now,
            ..Default::default()
        }
    }

    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn schedule(&mut self, slot: ChipSlot, event: PokeyEvent, delay: u32) {
        self.cancel(slot, event);

        let key = (self.now + delay as u64, self.seq);
        self.seq += 1;
        self.queue.insert(key, (slot, event));
        self.pending.insert((slot, event), key);
    }

    pub fn cancel(&mut self, slot: ChipSlot, event: PokeyEvent) {
        if let Some(key) = self.pending.remove(&(slot, event)) {
            self.queue.remove(&key);
        }
    }

    pub fn ticks_to(&self, slot: ChipSlot, event: PokeyEvent) -> Option<u32> {
        self.pending
            .get(&(slot, event))
            .map(|(t, _)| t.saturating_sub(self.now) as u32)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Remove the earliest event due at or before `limit`, moving the clock to
    /// its scheduled time.
    pub fn pop_due(&mut self, limit: u64) -> Option<(u64, ChipSlot, PokeyEvent)> {
        let (&key, _) = self.queue.iter().next()?;
        if key.0 > limit {
            return None;
        }
        let (slot, event) = self.queue.remove(&key)?;
        self.pending.remove(&(slot, event));
        self.now = self.now.max(key.0);
        Some((key.0, slot, event))
    }

    pub fn advance_to(&mut self, t: u64) {
        self.now = self.now.max(t);
    }
}

/// Run the shared timeline up to and including cycle `until`, handing each
/// due event to `dispatch`. No borrow of the timeline is held while the
/// dispatcher runs, so handlers are free to arm new events.
pub fn run_until<F>(timeline: &Rc<RefCell<EventScheduler>>, until: u64, mut dispatch: F)
where
    F: FnMut(ChipSlot, PokeyEvent),
{
    loop {
        let due = timeline.borrow_mut().pop_due(until);
        match due {
            Some((_, slot, event)) => dispatch(slot, event),
            None => break,
        }
    }
    timeline.borrow_mut().advance_to(until);
}

/// A chip's handle onto a shared [`EventScheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    slot: ChipSlot,
    timeline: Rc<RefCell<EventScheduler>>,
}

impl SchedulerHandle {
    pub fn new(slot: ChipSlot, timeline: Rc<RefCell<EventScheduler>>) -> Self {
        Self { slot, timeline }
    }

    pub fn slot(&self) -> ChipSlot {
        self.slot
    }
}

impl Scheduler for SchedulerHandle {
    fn tick64(&self) -> u64 {
        self.timeline.borrow().now()
    }

    fn set_event(&mut self, delay: u32, event: PokeyEvent) {
        self.timeline.borrow_mut().schedule(self.slot, event, delay);
    }

    fn unset_event(&mut self, event: PokeyEvent) {
        self.timeline.borrow_mut().cancel(self.slot, event);
    }

    fn ticks_to_event(&self, event: PokeyEvent) -> Option<u32> {
        self.timeline.borrow().ticks_to(self.slot, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_cycle_events_fire_in_scheduling_order() {
        let timeline = Rc::new(RefCell::new(EventScheduler::with_start(100)));
        let mut a = SchedulerHandle::new(ChipSlot::Primary, timeline.clone());
        let mut b = SchedulerHandle::new(ChipSlot::Secondary, timeline.clone());

        a.set_event(5, PokeyEvent::Timer2Borrow);
        b.set_event(5, PokeyEvent::Timer1Borrow);
        a.set_event(2, PokeyEvent::SerialOutput);

        let mut fired = Vec::new();
        run_until(&timeline, 200, |slot, ev| {
            fired.push((timeline.borrow().now(), slot, ev));
        });

        assert_eq!(
            fired,
            vec![
                (102, ChipSlot::Primary, PokeyEvent::SerialOutput),
                (105, ChipSlot::Primary, PokeyEvent::Timer2Borrow),
                (105, ChipSlot::Secondary, PokeyEvent::Timer1Borrow),
            ]
        );
        assert_eq!(timeline.borrow().now(), 200);
    }

    #[test]
    fn test_set_event_replaces_pending_instance() {
        let timeline = Rc::new(RefCell::new(EventScheduler::new()));
        let mut h = SchedulerHandle::new(ChipSlot::Primary, timeline.clone());

        h.set_event(10, PokeyEvent::ResetTimers);
        h.set_event(3, PokeyEvent::ResetTimers);
        assert_eq!(h.ticks_to_event(PokeyEvent::ResetTimers), Some(3));
        assert_eq!(timeline.borrow().pending_count(), 1);

        h.unset_event(PokeyEvent::ResetTimers);
        assert!(!h.is_event_pending(PokeyEvent::ResetTimers));
    }

    #[test]
    fn test_handler_can_rearm_during_dispatch() {
        let timeline = Rc::new(RefCell::new(EventScheduler::new()));
        let mut h = SchedulerHandle::new(ChipSlot::Primary, timeline.clone());
        h.set_event(114, PokeyEvent::KeyboardScan);

        let mut count = 0;
        run_until(&timeline, 114 * 4, |_, ev| {
            assert_eq!(ev, PokeyEvent::KeyboardScan);
            count += 1;
            h.set_event(114, PokeyEvent::KeyboardScan);
        });

        assert_eq!(count, 4);
        assert_eq!(h.ticks_to_event(PokeyEvent::KeyboardScan), Some(114));
    }
}
