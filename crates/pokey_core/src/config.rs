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

    config.rs

    Chip options read from a TOML document.
*/

use std::path::{Path, PathBuf};

use serde_derive::Deserialize;

use crate::error::PokeyError;

const fn _default_true() -> bool {
    true
}

/// Chip options. Read from the `[pokey]` table of a TOML document; every
/// field has a default so an empty table is valid.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PokeyConfig {
    /// Attach a secondary chip for stereo.
    #[serde(default)]
    pub stereo: bool,
    #[serde(default = "_default_true")]
    pub stereo_soft_enable: bool,
    #[serde(default)]
    pub serial_noise: bool,
    #[serde(default = "_default_true")]
    pub immediate_pots: bool,
    /// Raw keys bypass the matrix scan and register immediately.
    #[serde(default)]
    pub immediate_keys: bool,
    #[serde(default)]
    pub five_200_mode: bool,
    #[serde(default)]
    pub keyboard_scan: bool,
    #[serde(default)]
    pub trace_sio: Option<PathBuf>,
}

impl Default for PokeyConfig {
    fn default() -> Self {
        Self {
            stereo: false,
            stereo_soft_enable: true,
            serial_noise: false,
            immediate_pots: true,
            immediate_keys: false,
            five_200_mode: false,
            keyboard_scan: false,
            trace_sio: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    pokey: PokeyConfig,
}

impl PokeyConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, PokeyError> {
        let doc: ConfigDocument = toml::from_str(toml_str).map_err(|e| PokeyError::ConfigParseError(e.to_string()))?;
        Ok(doc.pokey)
    }

    pub fn from_file(path: &Path) -> Result<Self, PokeyError> {
        let toml_str = std::fs::read_to_string(path)
            .map_err(|e| PokeyError::ConfigIOError(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&toml_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PokeyConfig::from_toml_str("").unwrap();
        assert_eq!(config, PokeyConfig::default());
    }

    #[test]
    fn test_pokey_table_overrides() {
        let config = PokeyConfig::from_toml_str(
            r#"
            [pokey]
            stereo = true
            serial_noise = true
            immediate_pots = false
            trace_sio = "sio.log"
            "#,
        )
        .unwrap();

        assert!(config.stereo);
        assert!(config.stereo_soft_enable);
        assert!(config.serial_noise);
        assert!(!config.immediate_pots);
        assert_eq!(config.trace_sio, Some(PathBuf::from("sio.log")));
    }

    #[test]
    fn test_bad_document_is_parse_error() {
        let err = PokeyConfig::from_toml_str("[pokey]\nstereo = 7").unwrap_err();
        assert!(matches!(err, PokeyError::ConfigParseError(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = PokeyConfig::from_file(Path::new("/nonexistent/pokey.toml")).unwrap_err();
        assert!(matches!(err, PokeyError::ConfigIOError(_, _)));
    }
}
