//! Transport adapter seam.

use crate::signal::Signal;
use std::sync::Arc;

/// The physical link to the co-processor.
///
/// Implementations wrap the serial peripheral and the select, reset and
/// busy lines. A transfer is full-duplex: every byte clocked out clocks one
/// byte in, and those inbound bytes are read back with
/// [`read_byte`](Transport::read_byte) once the transfer completes.
///
/// Completion is reported asynchronously by raising
/// [`Signals::transfer_done`]; the busy line's falling edge raises
/// [`Signals::device_ready`].
pub trait Transport: Send {
    /// Drives the select line. `true` selects the device.
    fn set_select(&mut self, selected: bool);

    /// Drives the reset line. `true` is the released (high) level.
    fn set_reset(&mut self, high: bool);

    /// Returns whether the device is holding the busy line.
    fn is_busy(&self) -> bool;

    /// Discards any inbound bytes left over from an earlier transfer.
    fn clear(&mut self);

    /// Starts clocking `tx` out. Must not block on completion.
    fn start_transfer(&mut self, tx: &[u8]);

    /// Pops the next inbound byte captured by the last transfer.
    fn read_byte(&mut self) -> Option<u8>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn set_select(&mut self, selected: bool) {
        (**self).set_select(selected)
    }

    fn set_reset(&mut self, high: bool) {
        (**self).set_reset(high)
    }

    fn is_busy(&self) -> bool {
        (**self).is_busy()
    }

    fn clear(&mut self) {
        (**self).clear()
    }

    fn start_transfer(&mut self, tx: &[u8]) {
        (**self).start_transfer(tx)
    }

    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }
}

/// Notifications produced by the transport's interrupt handlers.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    pub device_ready: Arc<Signal>,
    pub transfer_done: Arc<Signal>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }
}
