use thiserror::Error;

pub const RING_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("ring buffer is full")]
pub struct Full;

/// A byte queue with one producer and one consumer.
///
/// The cursors are `u8`, so they wrap at 256 on their own. One slot is always
/// left empty to tell a full buffer (`write + 1 == read`) from an empty one
/// (`write == read`), leaving 255 usable slots.
pub struct RingBuffer {
    buf: [u8; RING_CAPACITY],
    read: u8,
    write: u8,
}

impl RingBuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0; RING_CAPACITY],
            read: 0,
            write: 0,
        }
    }

    /// Queue a byte. Unread data is never overwritten.
    pub fn push(&mut self, byte: u8) -> Result<(), Full> {
        if self.is_full() {
            return Err(Full);
        }
        self.buf[self.write as usize] = byte;
        self.write = self.write.wrapping_add(1);
        Ok(())
    }

    /// Queue all of `bytes`, or none of them.
    pub fn push_slice(&mut self, bytes: &[u8]) -> Result<(), Full> {
        if bytes.len() > self.free() {
            return Err(Full);
        }
        for &byte in bytes {
            self.buf[self.write as usize] = byte;
            self.write = self.write.wrapping_add(1);
        }
        Ok(())
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.read as usize];
        self.read = self.read.wrapping_add(1);
        Some(byte)
    }

    /// Move up to `out.len()` bytes into `out`, returning how many were moved.
    pub fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.pop() {
                Some(byte) => out[n] = byte,
                None => break,
            }
            n += 1;
        }
        n
    }

    /// Bytes waiting to be read.
    pub fn available(&self) -> usize {
        self.write.wrapping_sub(self.read) as usize
    }

    pub fn free(&self) -> usize {
        RING_CAPACITY - 1 - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.write == self.read
    }

    pub fn is_full(&self) -> bool {
        self.write.wrapping_add(1) == self.read
    }

    pub fn clear(&mut self) {
        self.read = self.write;
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fills_to_255() {
        let mut ring = RingBuffer::new();
        for i in 0..255u8 {
            ring.push(i).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.available(), 255);
        assert_eq!(ring.free(), 0);
        // the oldest byte is still there
        assert_eq!(ring.push(0xff), Err(Full));
        assert_eq!(ring.pop(), Some(0));
        assert!(ring.push(0xff).is_ok());
        assert_eq!(ring.push(0xfe), Err(Full));
    }

    #[test]
    fn cursors_wrap() {
        let mut ring = RingBuffer::new();
        let mut expected = 0u32;
        // 256 pushes with occupancy kept low carries both cursors across the wrap
        for i in 0..256u32 {
            ring.push(i as u8).unwrap();
            if i % 3 == 2 {
                while let Some(byte) = ring.pop() {
                    assert_eq!(byte, expected as u8);
                    expected += 1;
                }
            }
        }
        while let Some(byte) = ring.pop() {
            assert_eq!(byte, expected as u8);
            expected += 1;
        }
        assert_eq!(expected, 256);
        assert!(ring.is_empty());
        assert_eq!(ring.available(), 0);

        // and across a second lap, with the buffer nearly full
        for round in 0..4u8 {
            for i in 0..200u8 {
                ring.push(i ^ round).unwrap();
            }
            for i in 0..200u8 {
                assert_eq!(ring.pop(), Some(i ^ round));
            }
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn push_slice_is_all_or_nothing() {
        let mut ring = RingBuffer::new();
        ring.push_slice(&[1; 250]).unwrap();
        assert_eq!(ring.push_slice(&[2; 6]), Err(Full));
        assert_eq!(ring.available(), 250);
        ring.push_slice(&[3; 5]).unwrap();
        assert!(ring.is_full());

        let mut out = [0u8; 300];
        assert_eq!(ring.pop_into(&mut out), 255);
        assert_eq!(&out[..250], &[1; 250][..]);
        assert_eq!(&out[250..255], &[3; 5][..]);
        assert!(ring.is_empty());
    }

    #[test]
    fn clear_drops_pending() {
        let mut ring = RingBuffer::new();
        ring.push_slice(b"$$S").unwrap();
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.pop(), None);
    }
}
