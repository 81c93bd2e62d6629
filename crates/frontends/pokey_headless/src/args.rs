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

    args.rs

    Command line arguments.
*/

//! Command line arguments and their overlay onto the file configuration.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use bpaf::Bpaf;

use pokey_core::PokeyConfig;

pub const DEFAULT_CONFIG_FILE: &str = "pokey.toml";

#[derive(Debug, Default, Bpaf)]
#[bpaf(options, version, generate(cli_args))]
pub struct CmdLineArgs {
    #[bpaf(long)]
    pub configfile: Option<PathBuf>,

    #[bpaf(long, switch)]
    pub stereo: bool,

    #[bpaf(long, switch)]
    pub serial_noise: bool,

    /// Cycles to run after the script.
    #[bpaf(long)]
    pub cycles: Option<u64>,

    #[bpaf(long)]
    pub trace_sio: Option<PathBuf>,

    /// AUDCTL value written before the script runs, e.g. `$28`.
    #[bpaf(long)]
    pub audctl: Option<String>,

    #[bpaf(long)]
    pub script: Option<PathBuf>,
}

impl CmdLineArgs {
    /// Switches only ever turn options on; an absent switch leaves the file's
    /// value alone.
    pub fn overlay(&self, config: &mut PokeyConfig) {
        if self.stereo {
            config.stereo = true;
        }
        if self.serial_noise {
            config.serial_noise = true;
        }
        if let Some(path) = &self.trace_sio {
            config.trace_sio = Some(path.clone());
        }
    }

    pub fn audctl_value(&self) -> anyhow::Result<Option<u8>> {
        self.audctl
            .as_deref()
            .map(|s| parse_byte(s).with_context(|| format!("bad --audctl value '{}'", s)))
            .transpose()
    }

    /// Read the configuration file. A missing default file is not an error,
    /// but a missing file named on the command line is.
    pub fn load_config(&self) -> anyhow::Result<PokeyConfig> {
        let config = match &self.configfile {
            Some(path) => PokeyConfig::from_file(path)?,
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    PokeyConfig::from_file(&path)?
                }
                else {
                    log::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    PokeyConfig::default()
                }
            }
        };
        Ok(config)
    }
}

/// Parse a number written as `$2A`, `0x2A` or `42`.
pub fn parse_number(s: &str) -> anyhow::Result<u64> {
    let s = s.trim();
    let (digits, radix) = if let Some(hex) = s.strip_prefix('$') {
        (hex, 16)
    }
    else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    }
    else {
        (s, 10)
    };
    u64::from_str_radix(digits, radix).map_err(|e| anyhow!("'{}': {}", s, e))
}

pub fn parse_byte(s: &str) -> anyhow::Result<u8> {
    let value = parse_number(s)?;
    u8::try_from(value).map_err(|_| anyhow!("'{}' does not fit in a byte", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_forms() {
        assert_eq!(parse_number("$2A").unwrap(), 0x2A);
        assert_eq!(parse_number("0x2a").unwrap(), 0x2A);
        assert_eq!(parse_number("42").unwrap(), 42);
        assert!(parse_number("$G0").is_err());
        assert!(parse_byte("$100").is_err());
    }

    #[test]
    fn test_overlay_only_sets() {
        let mut config = PokeyConfig {
            serial_noise: true,
            ..Default::default()
        };
        let args = CmdLineArgs {
            stereo: true,
            trace_sio: Some(PathBuf::from("sio.log")),
            ..Default::default()
        };
        args.overlay(&mut config);

        assert!(config.stereo);
        assert!(config.serial_noise);
        assert_eq!(config.trace_sio, Some(PathBuf::from("sio.log")));
    }

    #[test]
    fn test_audctl_value() {
        let args = CmdLineArgs {
            audctl: Some("$28".to_string()),
            ..Default::default()
        };
        assert_eq!(args.audctl_value().unwrap(), Some(0x28));
        assert_eq!(CmdLineArgs::default().audctl_value().unwrap(), None);

        let bad = CmdLineArgs {
            audctl: Some("fast".to_string()),
            ..Default::default()
        };
        assert!(bad.audctl_value().is_err());
    }

    #[test]
    fn test_missing_named_config_is_error() {
        let args = CmdLineArgs {
            configfile: Some(PathBuf::from("/nonexistent/pokey.toml")),
            ..Default::default()
        };
        assert!(args.load_config().is_err());
    }
}
