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

    lib.rs

    Headless POKEY front-end main library component.
*/

//! Headless driver for the POKEY core.
//!
//! Loads `pokey.toml`, overlays command line switches, runs an optional
//! register script on an owned event timeline and prints the chip status.

#![forbid(unsafe_code)]

pub mod args;
pub mod script;

use anyhow::Context;

use pokey_core::devices::pokey::registers::{REG_AUDCTL, REG_SKCTL, SKCTL_INIT_MASK};

use crate::{
    args::cli_args,
    script::{Command, Session},
};

pub fn run() -> anyhow::Result<()> {
    env_logger::init();

    let args = cli_args().run();
    let mut config = args.load_config()?;
    args.overlay(&mut config);
    log::debug!("Running with {:?}", config);

    let mut session = Session::new(&config);

    // Without a script there is nothing to take the chip out of init mode.
    if args.script.is_none() {
        session.execute(Command::Write(REG_SKCTL, SKCTL_INIT_MASK))?;
    }
    if let Some(audctl) = args.audctl_value()? {
        session.execute(Command::Write(REG_AUDCTL, audctl))?;
    }

    if let Some(path) = &args.script {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading script {}", path.display()))?;
        let output = session
            .run_script(&text)
            .with_context(|| format!("in script {}", path.display()))?;
        for line in output {
            println!("{}", line);
        }
    }

    if let Some(cycles) = args.cycles {
        session.advance(cycles);
    }

    log::info!(
        "Stopped at cycle {}, {} IRQ assertions, {} bytes sent",
        session.now(),
        session.host().irq_asserts,
        session.host().sent.len()
    );
    print!("{}", session.dump()?);
    Ok(())
}
