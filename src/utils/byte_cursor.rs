use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::utf16le_to_string;

/// A lightweight cursor over an immutable byte slice.
///
/// This is the slice/offset equivalent of `Cursor<&[u8]>`, intended for hot-path
/// parsing where the data is already in memory and we want explicit bounds and
/// offset control. All reads are little-endian and advance the cursor on
/// success; moving the cursor out of bounds is a `Truncated` error.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! le_reader {
    ($name:ident, $named:ident, $ty:ty, $width:expr) => {
        #[inline]
        pub(crate) fn $name(&mut self) -> DeserializationResult<$ty> {
            self.$named(stringify!($ty))
        }

        #[inline]
        pub(crate) fn $named(&mut self, what: &'static str) -> DeserializationResult<$ty> {
            let bytes = self.take_bytes($width, what)?;
            Ok(<$ty>::from_le_bytes(
                bytes.try_into().expect("take_bytes returned $width bytes"),
            ))
        }
    };
}

impl<'a> ByteCursor<'a> {
    #[inline]
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Allows `pos == len` (EOF), rejects `pos > len`.
    #[inline]
    pub(crate) fn with_pos(buf: &'a [u8], pos: usize) -> DeserializationResult<Self> {
        let mut cursor = Self::new(buf);
        cursor.set_pos(pos, "cursor.position")?;
        Ok(cursor)
    }

    #[inline]
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn position(&self) -> u64 {
        self.pos as u64
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    #[inline]
    pub(crate) fn set_pos(&mut self, pos: usize, what: &'static str) -> DeserializationResult<()> {
        if pos > self.buf.len() {
            return Err(DeserializationError::Truncated {
                what,
                offset: pos as u64,
                need: pos - self.buf.len(),
                have: 0,
            });
        }
        self.pos = pos;
        Ok(())
    }

    #[inline]
    pub(crate) fn advance(&mut self, n: usize, what: &'static str) -> DeserializationResult<()> {
        let new_pos = self
            .pos
            .checked_add(n)
            .ok_or(DeserializationError::Truncated {
                what,
                offset: self.pos as u64,
                need: n,
                have: self.remaining(),
            })?;
        if new_pos > self.buf.len() {
            return Err(DeserializationError::Truncated {
                what,
                offset: self.pos as u64,
                need: n,
                have: self.remaining(),
            });
        }
        self.pos = new_pos;
        Ok(())
    }

    /// Moves the cursor back by `n` bytes, so a consumed dispatch byte can be
    /// replayed by the surrounding element loop.
    #[inline]
    pub(crate) fn rewind(&mut self, n: usize, what: &'static str) -> DeserializationResult<()> {
        let new_pos = self.pos.checked_sub(n).ok_or(DeserializationError::Truncated {
            what,
            offset: self.pos as u64,
            need: n,
            have: self.pos,
        })?;
        self.pos = new_pos;
        Ok(())
    }

    /// Reads the next byte without consuming it.
    #[inline]
    pub(crate) fn peek_u8(&self) -> DeserializationResult<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(DeserializationError::Truncated {
                what: "peek",
                offset: self.pos as u64,
                need: 1,
                have: 0,
            })
    }

    #[inline]
    pub(crate) fn take_bytes(
        &mut self,
        len: usize,
        what: &'static str,
    ) -> DeserializationResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(DeserializationError::Truncated {
                what,
                offset: self.pos as u64,
                need: len,
                have: self.remaining(),
            })?;
        let out = self
            .buf
            .get(self.pos..end)
            .ok_or(DeserializationError::Truncated {
                what,
                offset: self.pos as u64,
                need: len,
                have: self.remaining(),
            })?;
        self.pos = end;
        Ok(out)
    }

    #[inline]
    pub(crate) fn array<const N: usize>(
        &mut self,
        what: &'static str,
    ) -> DeserializationResult<[u8; N]> {
        let bytes = self.take_bytes(N, what)?;
        Ok(bytes.try_into().expect("take_bytes returned N bytes"))
    }

    #[inline]
    pub(crate) fn u8(&mut self) -> DeserializationResult<u8> {
        self.u8_named("u8")
    }

    #[inline]
    pub(crate) fn u8_named(&mut self, what: &'static str) -> DeserializationResult<u8> {
        let b = self.peek_u8().map_err(|_| DeserializationError::Truncated {
            what,
            offset: self.pos as u64,
            need: 1,
            have: 0,
        })?;
        self.pos += 1;
        Ok(b)
    }

    le_reader!(i8, i8_named, i8, 1);
    le_reader!(u16, u16_named, u16, 2);
    le_reader!(i16, i16_named, i16, 2);
    le_reader!(u32, u32_named, u32, 4);
    le_reader!(i32, i32_named, i32, 4);
    le_reader!(u64, u64_named, u64, 8);
    le_reader!(i64, i64_named, i64, 8);
    le_reader!(f32, f32_named, f32, 4);
    le_reader!(f64, f64_named, f64, 8);

    /// Reads `size` bytes of UTF-16LE text, trimming trailing NUL code units.
    pub(crate) fn utf16_by_size(
        &mut self,
        size: usize,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let bytes = self.take_bytes(size & !1, what)?;
        if size % 2 != 0 {
            // Odd sizes occur in dirty samples, drop the dangling byte.
            self.advance(1, what)?;
        }
        Ok(utf16le_to_string(bytes))
    }

    /// Reads a `u16` count of UTF-16 code units followed by that many units,
    /// optionally consuming a trailing NUL unit.
    pub(crate) fn len_prefixed_utf16_string(
        &mut self,
        is_null_terminated: bool,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let chars = self.u16_named(what)? as usize;
        let s = self.utf16_by_size(chars * 2, what)?;
        if is_null_terminated {
            let _ = self.u16_named(what)?;
        }
        Ok(s)
    }
}
