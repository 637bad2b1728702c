use std::fmt;
use std::sync::Arc;

use crate::error::ResourceError;

/// Headroom reserved in front of a frame built with `Packet::new`.
pub const DEFAULT_HEADROOM: usize = 128;

/// Handle to a packet buffer.
///
/// The buffer is shared: `clone` takes another reference and dropping a handle releases one.
/// Each handle carries its own view (`head`, `len`) of the buffer, so stripping headers from a
/// clone leaves other holders untouched. Writing through a shared buffer copies it first.
#[derive(Clone)]
pub struct Packet {
    buf: Arc<Vec<u8>>,
    head: usize,
    len: usize,
}

impl Packet {
    /// Copy `frame` into a fresh buffer with `DEFAULT_HEADROOM` bytes in front of it.
    pub fn new(frame: &[u8]) -> Packet {
        Packet::with_headroom(frame, DEFAULT_HEADROOM)
    }

    pub fn with_headroom(frame: &[u8], headroom: usize) -> Packet {
        let mut buf = vec![0; headroom + frame.len()];
        buf[headroom..].copy_from_slice(frame);

        Packet {
            buf: Arc::new(buf),
            head: headroom,
            len: frame.len(),
        }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buf[self.head..self.head + self.len]
    }

    /// Mutable access to the frame. Copies the buffer if it is shared.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let (head, len) = (self.head, self.len);
        &mut Arc::make_mut(&mut self.buf)[head..head + len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn headroom(&self) -> usize {
        self.head
    }

    /// Number of handles sharing the buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.buf)
    }

    pub fn is_shared(&self) -> bool {
        self.ref_count() > 1
    }

    /// Grow the frame by `n` bytes at the front and return them. Never reallocates: fails if
    /// the headroom is too small.
    pub fn prepend(&mut self, n: usize) -> Result<&mut [u8], ResourceError> {
        if n > self.head {
            return Err(ResourceError::Headroom {
                needed: n,
                available: self.head,
            });
        }

        self.head -= n;
        self.len += n;

        Ok(&mut self.data_mut()[..n])
    }

    /// Remove `n` bytes from the front of this handle's view.
    pub fn adj(&mut self, n: usize) -> Result<(), ResourceError> {
        if n > self.len {
            return Err(ResourceError::Truncated {
                needed: n,
                len: self.len,
            });
        }

        self.head += n;
        self.len -= n;

        Ok(())
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len)
            .field("headroom", &self.head)
            .field("refs", &self.ref_count())
            .finish()
    }
}
