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

    updatable.rs

    A value wrapper that remembers whether it changed since last shown.
*/

use std::ops::Deref;

/// A register value as seen by a debugger view. Tracks whether the value
/// changed since the view last cleaned it, and for how many cleanings it has
/// stayed the same so the view can fade the highlight out.
#[derive(Clone, Debug, Default)]
pub struct Updatable<T> {
    val: T,
    dirty: bool,
    age: u8,
}

impl<T: PartialEq> Updatable<T> {
    pub fn new(val: T) -> Self {
        Self { val, dirty: false, age: u8::MAX }
    }

    /// Store a value written by the guest. Rewriting the same value is not a change.
    #[inline]
    pub fn update(&mut self, val: T) {
        if self.val != val {
            self.set(val);
        }
    }

    /// Store a value unconditionally, as a reset or state load does.
    #[inline]
    pub fn set(&mut self, val: T) {
        self.val = val;
        self.dirty = true;
        self.age = 0;
    }
}

impl<T> Updatable<T> {
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of cleanings since the last change, saturating.
    #[inline]
    pub fn age(&self) -> u8 {
        self.age
    }

    pub fn clean(&mut self) {
        if !self.dirty {
            self.age = self.age.saturating_add(1);
        }
        self.dirty = false;
    }
}

impl<T> Deref for Updatable<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.val
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_of_same_value_stays_clean() {
        let mut audf = Updatable::new(0x10u8);
        audf.update(0x10);
        assert!(!audf.is_dirty());

        audf.update(0x11);
        assert!(audf.is_dirty());
        assert_eq!(audf.age(), 0);

        audf.clean();
        assert_eq!(*audf, 0x11);
        assert_eq!(audf.age(), 0);
        audf.clean();
        audf.clean();
        assert_eq!(audf.age(), 2);

        audf.set(0x11);
        assert!(audf.is_dirty());
        assert_eq!(audf.age(), 0);
    }
}
