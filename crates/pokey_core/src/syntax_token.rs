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

    syntax_token.rs

    Tokens used to present chip state in a debugger.
*/

use crate::updatable::Updatable;

/// Tokens for the debugger's register views. A view widget renders each
/// token with its own coloring.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum SyntaxToken {
    #[default]
    NullToken,
    /// Text, whether it changed since the view last looked, and the number of
    /// views it has stayed unchanged for.
    StateString(String, bool, u8),
}

impl SyntaxToken {
    /// A register byte in hex, carrying its change tracking.
    pub fn register(reg: &Updatable<u8>) -> Self {
        SyntaxToken::StateString(format!("{:02X}", **reg), reg.is_dirty(), reg.age())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_token() {
        let mut audc = Updatable::new(0u8);
        audc.update(0xA8);
        assert_eq!(SyntaxToken::register(&audc), SyntaxToken::StateString("A8".to_string(), true, 0));
        audc.clean();
        audc.clean();
        assert_eq!(SyntaxToken::register(&audc), SyntaxToken::StateString("A8".to_string(), false, 1));
    }
}
