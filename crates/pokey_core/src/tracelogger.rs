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

    tracelogger.rs

    A file or console sink for serial and IRQ traces.
*/

use std::{
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Where a chip sends its SIO traffic trace. Each chip owns its own sink.
#[derive(Debug, Default)]
pub enum TraceLogger {
    FileWriter(BufWriter<File>),
    Console,
    #[default]
    None,
}

impl TraceLogger {
    /// Open a trace file. A file that can't be created disables tracing.
    pub fn from_filename<S: AsRef<Path>>(filename: S) -> Self {
        let path = filename.as_ref();
        match File::create(path) {
            Ok(file) => TraceLogger::FileWriter(BufWriter::new(file)),
            Err(e) => {
                log::error!("POKEY: Couldn't create trace file {}: {}", path.display(), e);
                TraceLogger::None
            }
        }
    }

    /// Write one trace line. Write errors are dropped; a trace is best effort.
    pub fn write_line(&mut self, args: fmt::Arguments) {
        match self {
            TraceLogger::FileWriter(buf) => {
                _ = buf.write_fmt(args);
                _ = buf.write_all(b"\n");
            }
            TraceLogger::Console => println!("{}", args),
            TraceLogger::None => {}
        }
    }

    pub fn flush(&mut self) {
        if let TraceLogger::FileWriter(buf) = self {
            _ = buf.flush();
        }
    }

    #[inline]
    pub fn is_some(&self) -> bool {
        !matches!(self, TraceLogger::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_trace_lines() {
        let path = std::env::temp_dir().join(format!("pokey_trace_{}.log", std::process::id()));
        let mut logger = TraceLogger::from_filename(&path);
        assert!(logger.is_some());

        logger.write_line(format_args!("[{:3}] Send {:02X}", 0, 0x31));
        logger.write_line(format_args!("[{:3}] Send {:02X}", 1, 0x52));
        logger.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "[  0] Send 31\n[  1] Send 52\n");
        _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unwritable_path_disables() {
        let logger = TraceLogger::from_filename("/nonexistent/dir/trace.log");
        assert!(!logger.is_some());
    }
}
