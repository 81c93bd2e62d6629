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

    script.rs

    Register scripts for the headless front-end.
*/

//! A line oriented register script and the session that runs it.
//!
//! ```text
//! # comment
//! write SKCTL $03
//! write AUDF1 10
//! read IRQST
//! advance 400
//! frame 2
//! key $3F
//! rawkey $21
//! release $21
//! pot 0 100
//! serin $41 94
//! dump
//! ```

use std::{cell::RefCell, rc::Rc};

use anyhow::{anyhow, bail, Context};

use pokey_core::{
    device_traits::{
        connections::PokeyConnections,
        renderer::NullRenderer,
        sio::{SerialInputByte, SioDevice},
    },
    devices::pokey::registers::*,
    scheduler::{run_until, ChipSlot, EventScheduler, SchedulerHandle},
    Pokey,
    PokeyConfig,
};

use crate::args::{parse_byte, parse_number};

pub const CYCLES_PER_SCANLINE: u64 = 114;
pub const SCANLINES_PER_FRAME: u64 = 262;

const WRITE_REGISTERS: [(&str, u8); 15] = [
    ("AUDF1", REG_AUDF1),
    ("AUDC1", REG_AUDC1),
    ("AUDF2", REG_AUDF2),
    ("AUDC2", REG_AUDC2),
    ("AUDF3", REG_AUDF3),
    ("AUDC3", REG_AUDC3),
    ("AUDF4", REG_AUDF4),
    ("AUDC4", REG_AUDC4),
    ("AUDCTL", REG_AUDCTL),
    ("STIMER", REG_STIMER),
    ("SKRES", REG_SKRES),
    ("POTGO", REG_POTGO),
    ("SEROUT", REG_SEROUT),
    ("IRQEN", REG_IRQEN),
    ("SKCTL", REG_SKCTL),
];

const READ_REGISTERS: [(&str, u8); 6] = [
    ("ALLPOT", REG_ALLPOT),
    ("KBCODE", REG_KBCODE),
    ("RANDOM", REG_RANDOM),
    ("SERIN", REG_SERIN),
    ("IRQST", REG_IRQST),
    ("SKSTAT", REG_SKSTAT),
];

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Command {
    Write(u8, u8),
    Read(u8),
    Advance(u64),
    Frame(u64),
    Key(u8),
    RawKey(u8),
    Release(u8),
    Pot(usize, i32),
    SerIn(u8, u32),
    Dump,
}

/// Resolve a register name or a numeric address. A `2:` prefix selects the
/// secondary chip, and `POT0`-`POT7` name the pot latches.
fn parse_register(s: &str, write: bool) -> anyhow::Result<u8> {
    let (name, offset) = match s.strip_prefix("2:") {
        Some(rest) => (rest, REG_SECONDARY),
        None => (s, 0),
    };
    let upper = name.to_ascii_uppercase();

    if !write {
        if let Some(n) = upper.strip_prefix("POT").and_then(|n| n.parse::<u8>().ok()) {
            if n <= REG_POT7 {
                return Ok(REG_POT0 + n + offset);
            }
            bail!("no pot {}", n);
        }
    }

    let table: &[(&str, u8)] = if write { &WRITE_REGISTERS } else { &READ_REGISTERS };
    if let Some((_, reg)) = table.iter().find(|(n, _)| *n == upper) {
        return Ok(reg + offset);
    }

    let reg = parse_byte(name).map_err(|_| anyhow!("unknown register '{}'", s))?;
    Ok(reg | offset)
}

fn arg<'a>(args: &[&'a str], index: usize, what: &str) -> anyhow::Result<&'a str> {
    args.get(index).copied().ok_or_else(|| anyhow!("missing {}", what))
}

/// Parse one script line. Blank lines and comments yield `None`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<Command>> {
    let line = match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let mut words = line.split_whitespace();
    let Some(op) = words.next()
    else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match op.to_ascii_lowercase().as_str() {
        "write" => Command::Write(
            parse_register(arg(&args, 0, "register")?, true)?,
            parse_byte(arg(&args, 1, "value")?)?,
        ),
        "read" => Command::Read(parse_register(arg(&args, 0, "register")?, false)?),
        "advance" => Command::Advance(parse_number(arg(&args, 0, "cycle count")?)?),
        "frame" => match args.first() {
            Some(n) => Command::Frame(parse_number(n)?),
            None => Command::Frame(1),
        },
        "key" => Command::Key(parse_byte(arg(&args, 0, "key code")?)?),
        "rawkey" => Command::RawKey(parse_byte(arg(&args, 0, "key code")?)?),
        "release" => Command::Release(parse_byte(arg(&args, 0, "key code")?)?),
        "pot" => {
            let index = parse_number(arg(&args, 0, "pot index")?)? as usize;
            let pos = arg(&args, 1, "position")?;
            let pos = pos.parse::<i32>().with_context(|| format!("bad position '{}'", pos))?;
            Command::Pot(index, pos)
        }
        "serin" => {
            let value = parse_byte(arg(&args, 0, "byte")?)?;
            let cpb = match args.get(1) {
                Some(n) => u32::try_from(parse_number(n)?)?,
                None => 0,
            };
            Command::SerIn(value, cpb)
        }
        "dump" => Command::Dump,
        _ => bail!("unknown command '{}'", op),
    };

    Ok(Some(command))
}

/// What the host saw on the chip's external lines.
#[derive(Debug, Default)]
pub struct HostLog {
    pub irq_asserts: u32,
    pub irq_line: bool,
    pub sent: Vec<u8>,
}

type SharedLog = Rc<RefCell<HostLog>>;

struct HeadlessConnections(SharedLog);

impl PokeyConnections for HeadlessConnections {
    fn assert_irq(&mut self, _cpu_based: bool) {
        let mut log = self.0.borrow_mut();
        log.irq_asserts += 1;
        log.irq_line = true;
    }

    fn negate_irq(&mut self, _cpu_based: bool) {
        self.0.borrow_mut().irq_line = false;
    }
}

/// An SIO bus listener that records every byte sent and never answers.
struct SioMonitor(SharedLog);

impl SioDevice for SioMonitor {
    fn write_sio(&mut self, byte: u8, command: bool, cycles_per_bit: u32, start_time: u64, framing_error: bool) -> bool {
        log::info!(
            "SIO: {:02X}{} at {} ({} cycles/bit){}",
            byte,
            if command { " (command)" } else { "" },
            start_time,
            cycles_per_bit,
            if framing_error { " framing error" } else { "" }
        );
        self.0.borrow_mut().sent.push(byte);
        false
    }
}

/// A chip, or a stereo pair, on its own event timeline.
pub struct Session {
    timeline: Rc<RefCell<EventScheduler>>,
    pokey: Pokey,
    host: SharedLog,
    immediate_keys: bool,
}

impl Session {
    pub fn new(config: &PokeyConfig) -> Self {
        let timeline = Rc::new(RefCell::new(EventScheduler::new()));
        let host: SharedLog = Default::default();

        let mut pokey = Pokey::new(
            Box::new(SchedulerHandle::new(ChipSlot::Primary, timeline.clone())),
            Box::new(NullRenderer),
            Box::new(HeadlessConnections(host.clone())),
        );

        if config.stereo {
            let secondary = Pokey::new(
                Box::new(SchedulerHandle::new(ChipSlot::Secondary, timeline.clone())),
                Box::new(NullRenderer),
                Box::new(HeadlessConnections(host.clone())),
            );
            pokey.set_slave(Some(Box::new(secondary)));
        }
        pokey.apply_config(config);
        pokey.add_sio_device(Box::new(SioMonitor(host.clone())));

        Self {
            timeline,
            pokey,
            host,
            immediate_keys: config.immediate_keys,
        }
    }

    pub fn pokey(&self) -> &Pokey {
        &self.pokey
    }

    pub fn host(&self) -> std::cell::Ref<'_, HostLog> {
        self.host.borrow()
    }

    pub fn now(&self) -> u64 {
        self.timeline.borrow().now()
    }

    pub fn advance(&mut self, cycles: u64) {
        let until = self.now() + cycles;
        let pokey = &mut self.pokey;
        run_until(&self.timeline, until, |slot, event| pokey.dispatch_event(slot, event));
    }

    pub fn run_frame(&mut self) {
        for _ in 0..SCANLINES_PER_FRAME {
            self.advance(CYCLES_PER_SCANLINE);
            self.pokey.advance_scan_line();
        }
        self.pokey.advance_frame();
    }

    pub fn dump(&self) -> anyhow::Result<String> {
        let mut out = String::new();
        self.pokey.dump_status(&mut out)?;
        Ok(out)
    }

    /// Run one command, returning any text it produced.
    pub fn execute(&mut self, command: Command) -> anyhow::Result<Option<String>> {
        match command {
            Command::Write(reg, value) => self.pokey.write_byte(reg, value),
            Command::Read(reg) => {
                let value = self.pokey.read_byte(reg);
                return Ok(Some(format!("[{}] {:02X} -> {:02X}", self.now(), reg, value)));
            }
            Command::Advance(cycles) => self.advance(cycles),
            Command::Frame(count) => {
                for _ in 0..count {
                    self.run_frame();
                }
            }
            Command::Key(code) => self.pokey.push_key(code, false, true, false, false),
            Command::RawKey(code) => self.pokey.push_raw_key(code, self.immediate_keys),
            Command::Release(code) => self.pokey.release_raw_key(code, self.immediate_keys),
            Command::Pot(index, pos) => self.pokey.set_pot_pos(index, pos),
            Command::SerIn(value, cpb) => self.pokey.receive_sio_byte(SerialInputByte::new(value, cpb)),
            Command::Dump => return self.dump().map(Some),
        }
        Ok(None)
    }

    /// Run a whole script, collecting its output. Errors carry the line number.
    pub fn run_script(&mut self, text: &str) -> anyhow::Result<Vec<String>> {
        let mut output = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let command = parse_line(line).with_context(|| format!("line {}", n + 1))?;
            if let Some(command) = command {
                log::trace!("[{}] {:?}", self.now(), command);
                if let Some(text) = self.execute(command)? {
                    output.push(text);
                }
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register_names() {
        assert_eq!(parse_register("audctl", true).unwrap(), REG_AUDCTL);
        assert_eq!(parse_register("IRQST", false).unwrap(), REG_IRQST);
        assert_eq!(parse_register("IRQEN", true).unwrap(), REG_IRQEN);
        assert_eq!(parse_register("pot5", false).unwrap(), REG_POT0 + 5);
        assert_eq!(parse_register("2:AUDC2", true).unwrap(), REG_SECONDARY | REG_AUDC2);
        assert_eq!(parse_register("$0E", false).unwrap(), REG_IRQST);
        assert!(parse_register("IRQST", true).is_err());
        assert!(parse_register("POT8", false).is_err());
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("  # nothing").unwrap(), None);
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(
            parse_line("write AUDF1 $10 # comment").unwrap(),
            Some(Command::Write(REG_AUDF1, 0x10))
        );
        assert_eq!(parse_line("frame").unwrap(), Some(Command::Frame(1)));
        assert_eq!(parse_line("pot 3 -5").unwrap(), Some(Command::Pot(3, -5)));
        assert_eq!(parse_line("serin $41 94").unwrap(), Some(Command::SerIn(0x41, 94)));
        assert!(parse_line("write AUDF1").is_err());
        assert!(parse_line("jump 10").is_err());
    }

    #[test]
    fn test_timer_irq_script() {
        let mut session = Session::new(&PokeyConfig::default());
        let output = session
            .run_script(
                "write SKCTL $03\n\
                 write IRQEN $01\n\
                 write AUDF1 10\n\
                 write STIMER 0\n\
                 advance 400\n\
                 read IRQST\n",
            )
            .unwrap();

        assert_eq!(output.len(), 1);
        assert!(output[0].ends_with("0E -> F6"), "{}", output[0]);
        assert!(session.host().irq_line);
        assert!(session.host().irq_asserts >= 1);

        let dump = session.dump().unwrap();
        assert!(dump.starts_with("AUDF1: 0a"));
    }

    #[test]
    fn test_script_error_names_line() {
        let mut session = Session::new(&PokeyConfig::default());
        let err = session.run_script("write SKCTL 3\nbogus\n").unwrap_err();
        assert_eq!(err.to_string(), "line 2");
    }

    #[test]
    fn test_frame_advances_timeline() {
        let mut session = Session::new(&PokeyConfig::default());
        session.execute(Command::Frame(2)).unwrap();
        assert_eq!(session.now(), 2 * SCANLINES_PER_FRAME * CYCLES_PER_SCANLINE);
    }

    #[test]
    fn test_stereo_session_dumps_both_chips() {
        let config = PokeyConfig {
            stereo: true,
            ..Default::default()
        };
        let mut session = Session::new(&config);
        session.run_script("write 2:AUDC1 $A4\n").unwrap();
        assert_eq!(session.pokey().slave().map(|s| s.register_state()[REG_AUDC1 as usize]), Some(0xA4));
        assert!(session.dump().unwrap().contains("Secondary POKEY:"));
    }
}
