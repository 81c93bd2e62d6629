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

    benches::pokey_bench.rs

    Criterion benchmarks for whole frames of POKEY activity.
*/

use std::{cell::RefCell, rc::Rc};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pokey_core::{
    device_traits::{connections::NullConnections, renderer::NullRenderer},
    devices::pokey::{registers::*, Pokey},
    scheduler::{run_until, ChipSlot, EventScheduler, SchedulerHandle},
};

/// NTSC frame: 262 scan lines of 114 cycles.
const FRAME_CYCLES: u64 = 262 * 114;

fn make_pokey(irqen: u8) -> (Rc<RefCell<EventScheduler>>, Pokey) {
    let timeline = Rc::new(RefCell::new(EventScheduler::new()));
    let mut pokey = Pokey::new(
        Box::new(SchedulerHandle::new(ChipSlot::Primary, timeline.clone())),
        Box::new(NullRenderer),
        Box::new(NullConnections),
    );

    pokey.write_byte(REG_SKCTL, SKCTL_INIT_MASK);
    pokey.write_byte(REG_AUDCTL, AUDCTL_FAST_1 | AUDCTL_FAST_3);
    for (i, audf) in [0x10u8, 0x20, 0x30, 0x40].into_iter().enumerate() {
        pokey.write_byte(REG_AUDF1 + 2 * i as u8, audf);
        pokey.write_byte(REG_AUDC1 + 2 * i as u8, 0xA8);
    }
    pokey.write_byte(REG_IRQEN, irqen);
    pokey.write_byte(REG_STIMER, 0);
    (timeline, pokey)
}

fn run_frame(timeline: &Rc<RefCell<EventScheduler>>, pokey: &mut Pokey) {
    let until = timeline.borrow().now() + FRAME_CYCLES;
    run_until(timeline, until, |slot, event| pokey.dispatch_event(slot, event));
    pokey.advance_frame();
}

pub fn pokey_frame_bench(c: &mut Criterion) {
    c.bench_function("pokey_frame_deferred_timers", |b| {
        let (timeline, mut pokey) = make_pokey(0);

        b.iter(|| {
            run_frame(&timeline, &mut pokey);
            black_box(pokey.read_byte(REG_IRQST));
        });
    });

    c.bench_function("pokey_frame_active_timers", |b| {
        let (timeline, mut pokey) = make_pokey(IRQ_TIMERS);

        b.iter(|| {
            run_frame(&timeline, &mut pokey);
            // Acknowledge so the next frame raises them again.
            pokey.write_byte(REG_IRQEN, 0);
            pokey.write_byte(REG_IRQEN, IRQ_TIMERS);
            black_box(pokey.read_byte(REG_IRQST));
        });
    });
}

criterion_group!(benches, pokey_frame_bench);
criterion_main!(benches);
