//! Per-socket receive cache.
//!
//! Pulling bytes off the device costs a full transaction, so reads are
//! served from a small buffer per socket that is refilled in bulk once it
//! runs dry.

use crate::state::{SocketHandle, MAX_SOCKETS};
use ninalink_protocol::Slot;

/// Source of buffered socket data.
pub trait SocketData {
    /// Copies up to `slot.capacity() - 1` pending bytes for `sock` into
    /// `slot` and returns how many were copied.
    fn fetch(&self, sock: SocketHandle, slot: &mut Slot) -> usize;
}

#[derive(Debug)]
struct Entry {
    data: Slot,
    cursor: usize,
    remaining: usize,
}

/// Receive buffers for every socket slot.
#[derive(Debug)]
pub struct SocketBuffers {
    capacity: usize,
    entries: [Option<Entry>; MAX_SOCKETS],
}

impl SocketBuffers {
    /// Creates an empty cache whose buffers are `capacity` bytes each. The
    /// last byte of every buffer is the slot terminator, so a refill keeps
    /// at most `capacity - 1` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: std::array::from_fn(|_| None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes ready to read, refilling from `source` when the buffer is empty.
    pub fn available(&mut self, sock: SocketHandle, source: &impl SocketData) -> usize {
        let Some(index) = sock.index() else {
            return 0;
        };
        let capacity = self.capacity;
        let entry = self.entries[index].get_or_insert_with(|| {
            tracing::trace!("{}: allocating {} byte receive buffer", sock, capacity);
            Entry {
                data: Slot::new(capacity),
                cursor: 0,
                remaining: 0,
            }
        });

        if entry.remaining == 0 {
            let read = source.fetch(sock, &mut entry.data);
            if read > 0 {
                entry.cursor = 0;
                entry.remaining = read;
            }
        }
        entry.remaining
    }

    /// Next byte without consuming it, or `None` when nothing is pending.
    pub fn peek(&mut self, sock: SocketHandle, source: &impl SocketData) -> Option<u8> {
        if self.available(sock, source) == 0 {
            return None;
        }
        let entry = self.entry(sock)?;
        entry.data.as_bytes().get(entry.cursor).copied()
    }

    /// Copies up to `buf.len()` bytes into `buf`, returning the count.
    pub fn read(&mut self, sock: SocketHandle, source: &impl SocketData, buf: &mut [u8]) -> usize {
        let n = self.available(sock, source).min(buf.len());
        if n == 0 {
            return 0;
        }
        let Some(index) = sock.index() else {
            return 0;
        };
        let Some(entry) = self.entries[index].as_mut() else {
            return 0;
        };

        let start = entry.cursor;
        buf[..n].copy_from_slice(&entry.data.as_bytes()[start..start + n]);
        entry.cursor += n;
        entry.remaining -= n;
        n
    }

    /// Frees the buffer for `sock`. Closing twice is harmless.
    pub fn close(&mut self, sock: SocketHandle) {
        if let Some(index) = sock.index() {
            if self.entries[index].take().is_some() {
                tracing::trace!("{}: receive buffer freed", sock);
            }
        }
    }

    /// Frees every buffer.
    pub fn close_all(&mut self) {
        self.entries.iter_mut().for_each(|entry| *entry = None);
    }

    /// Whether `sock` currently owns a buffer.
    pub fn is_allocated(&self, sock: SocketHandle) -> bool {
        self.entry(sock).is_some()
    }

    /// Cached bytes, without touching the device.
    pub fn remaining(&self, sock: SocketHandle) -> usize {
        self.entry(sock).map_or(0, |entry| entry.remaining)
    }

    fn entry(&self, sock: SocketHandle) -> Option<&Entry> {
        self.entries.get(sock.index()?)?.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ninalink_protocol::{Command, Frame, ResponseParser};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Hands out queued bytes, at most `chunk` per fetch.
    struct FakeDevice {
        pending: RefCell<VecDeque<u8>>,
        chunk: usize,
        fetches: Cell<usize>,
    }

    impl FakeDevice {
        fn new(data: &[u8], chunk: usize) -> Self {
            Self {
                pending: RefCell::new(data.iter().copied().collect()),
                chunk,
                fetches: Cell::new(0),
            }
        }
    }

    impl SocketData for FakeDevice {
        fn fetch(&self, _sock: SocketHandle, slot: &mut Slot) -> usize {
            self.fetches.set(self.fetches.get() + 1);
            let mut pending = self.pending.borrow_mut();
            let n = pending.len().min(self.chunk).min(slot.capacity() - 1);
            let bytes: Vec<u8> = pending.drain(..n).collect();

            let reply = Frame::reply(Command::GetDatabufTcp)
                .with_param(bytes)
                .encode()
                .unwrap();
            ResponseParser::for_command(Command::GetDatabufTcp)
                .parse(reply.iter().copied(), std::slice::from_mut(slot))
                .unwrap();
            slot.len()
        }
    }

    const SOCK: SocketHandle = SocketHandle::new(2);

    #[test]
    fn test_lazy_allocation() {
        let device = FakeDevice::new(b"", 64);
        let mut cache = SocketBuffers::new(255);

        assert!(!cache.is_allocated(SOCK));
        assert_eq!(cache.available(SOCK, &device), 0);
        assert!(cache.is_allocated(SOCK));
        assert_eq!(device.fetches.get(), 1);
    }

    #[test]
    fn test_read_less_than_remaining() {
        let device = FakeDevice::new(b"0123456789", 64);
        let mut cache = SocketBuffers::new(255);

        assert_eq!(cache.available(SOCK, &device), 10);
        let mut buf = [0u8; 4];
        assert_eq!(cache.read(SOCK, &device, &mut buf), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(cache.remaining(SOCK), 6);

        assert_eq!(cache.peek(SOCK, &device), Some(b'4'));
        assert_eq!(device.fetches.get(), 1);
    }

    #[test]
    fn test_read_more_than_remaining() {
        let device = FakeDevice::new(b"abc", 64);
        let mut cache = SocketBuffers::new(255);

        let mut buf = [0u8; 16];
        assert_eq!(cache.read(SOCK, &device, &mut buf), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(cache.remaining(SOCK), 0);
    }

    #[test]
    fn test_refill_after_drain() {
        let device = FakeDevice::new(b"abcdef", 4);
        let mut cache = SocketBuffers::new(255);

        let mut buf = [0u8; 16];
        assert_eq!(cache.read(SOCK, &device, &mut buf), 4);
        assert_eq!(cache.read(SOCK, &device, &mut buf), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(device.fetches.get(), 2);
    }

    #[test]
    fn test_capacity_bounds_fill() {
        let data = vec![7u8; 100];
        let device = FakeDevice::new(&data, 1000);
        let mut cache = SocketBuffers::new(32);

        assert_eq!(cache.available(SOCK, &device), 31);
        assert_eq!(device.pending.borrow().len(), 69);
    }

    #[test]
    fn test_refill_keeps_one_byte_for_terminator() {
        let data: Vec<u8> = (0..10).collect();
        let device = FakeDevice::new(&data, 1000);
        let mut cache = SocketBuffers::new(4);
        let mut buf = [0u8; 8];

        assert_eq!(cache.read(SOCK, &device, &mut buf), 3);
        assert_eq!(&buf[..3], &[0, 1, 2]);
        assert_eq!(cache.read(SOCK, &device, &mut buf), 3);
        assert_eq!(&buf[..3], &[3, 4, 5]);
        assert_eq!(device.fetches.get(), 2);
    }

    #[test]
    fn test_peek_empty_is_none() {
        let device = FakeDevice::new(b"", 64);
        let mut cache = SocketBuffers::new(255);
        assert_eq!(cache.peek(SOCK, &device), None);
    }

    #[test]
    fn test_close_resets_and_is_idempotent() {
        let device = FakeDevice::new(b"stale-bytes", 64);
        let mut cache = SocketBuffers::new(255);
        assert_eq!(cache.available(SOCK, &device), 11);

        cache.close(SOCK);
        cache.close(SOCK);
        assert!(!cache.is_allocated(SOCK));
        assert_eq!(cache.remaining(SOCK), 0);

        // No residue from before the close.
        assert_eq!(cache.available(SOCK, &device), 0);
        assert_eq!(cache.peek(SOCK, &device), None);
    }

    #[test]
    fn test_invalid_handle() {
        let device = FakeDevice::new(b"data", 64);
        let mut cache = SocketBuffers::new(255);
        let mut buf = [0u8; 4];

        assert_eq!(cache.available(SocketHandle::NO_SOCKET, &device), 0);
        assert_eq!(cache.read(SocketHandle::NO_SOCKET, &device, &mut buf), 0);
        assert_eq!(cache.peek(SocketHandle::NO_SOCKET, &device), None);
        cache.close(SocketHandle::NO_SOCKET);
        assert_eq!(device.fetches.get(), 0);
    }

    #[test]
    fn test_close_all() {
        let device = FakeDevice::new(b"xy", 1);
        let mut cache = SocketBuffers::new(255);
        cache.available(SocketHandle::new(0), &device);
        cache.available(SocketHandle::new(1), &device);

        cache.close_all();
        assert!(!cache.is_allocated(SocketHandle::new(0)));
        assert!(!cache.is_allocated(SocketHandle::new(1)));
    }
}
