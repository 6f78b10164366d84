//! The framing engine.
//!
//! Every transaction runs the same dance: wait for the device to be ready,
//! select it, clock a buffer out (capturing the bytes clocked in), wait for
//! the transfer-complete signal, deselect. Replies are fetched by clocking
//! out zero filler and parsing whatever the device shifted back.

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::transport::{Signals, Transport};
use bytes::BytesMut;
use ninalink_protocol::{
    Command, Frame, ParamWidth, ProtocolError, ResponseParser, Slot, MAX_FRAME_SIZE,
};
use parking_lot::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Outcome of a successful receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    params_read: usize,
    truncated: bool,
}

impl Reply {
    /// Number of parameters stored into slots.
    pub fn params_read(&self) -> usize {
        self.params_read
    }

    /// Whether any stored parameter lost bytes to a short slot.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_empty(&self) -> bool {
        self.params_read == 0
    }
}

struct Link<T> {
    transport: T,
    tx: BytesMut,
    rx: Vec<u8>,
    initialized: bool,
}

/// Host side of the co-processor link.
///
/// The transport and the shared transmit buffer sit behind a single mutex,
/// so at most one transaction is in flight. Callers on several threads
/// queue on that lock; use [`session`](SpiDriver::session) to keep a
/// command and its reply together.
pub struct SpiDriver<T: Transport> {
    link: Mutex<Link<T>>,
    signals: Signals,
    config: LinkConfig,
}

impl<T: Transport> SpiDriver<T> {
    pub fn new(transport: T, signals: Signals, config: LinkConfig) -> Self {
        Self {
            link: Mutex::new(Link {
                transport,
                tx: BytesMut::with_capacity(MAX_FRAME_SIZE),
                rx: Vec::with_capacity(MAX_FRAME_SIZE),
                initialized: false,
            }),
            signals,
            config,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Resets the device now instead of on the first transaction.
    pub fn begin(&self) {
        self.session().reset_device();
    }

    /// Holds the device in reset. The next transaction resets it again.
    pub fn end(&self) {
        let mut link = self.link.lock();
        link.transport.set_select(false);
        link.transport.set_reset(false);
        link.initialized = false;
        tracing::debug!("co-processor held in reset");
    }

    pub fn is_initialized(&self) -> bool {
        self.link.lock().initialized
    }

    /// Locks the link for a sequence of transactions.
    pub fn session(&self) -> Session<'_, T> {
        Session {
            link: self.link.lock(),
            signals: &self.signals,
            config: &self.config,
        }
    }

    /// Transmits a command frame.
    pub fn send(&self, frame: &Frame) -> Result<(), LinkError> {
        self.session().send(frame)
    }

    /// Transmits a command frame, reporting only success.
    pub fn send_command(&self, frame: &Frame) -> bool {
        match self.send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("send {:#04x} failed: {}", frame.opcode(), e);
                false
            }
        }
    }

    /// Fetches and parses the reply to `opcode`.
    pub fn receive(
        &self,
        opcode: u8,
        max_size: usize,
        width: ParamWidth,
        slots: &mut [Slot],
    ) -> Result<Reply, LinkError> {
        self.session().receive(opcode, max_size, width, slots)
    }

    /// Fetches the reply to `opcode`, returning the parameter count or `0`
    /// on any failure.
    pub fn receive_response(
        &self,
        opcode: u8,
        max_size: usize,
        width: ParamWidth,
        slots: &mut [Slot],
    ) -> usize {
        self.receive(opcode, max_size, width, slots)
            .map(|reply| reply.params_read())
            .unwrap_or(0)
    }

    /// Sends `frame` and reads its reply without releasing the link.
    pub fn request(&self, frame: &Frame, slots: &mut [Slot]) -> Result<Reply, LinkError> {
        self.session().request(frame, slots)
    }
}

/// Exclusive use of the link until dropped.
pub struct Session<'a, T: Transport> {
    link: MutexGuard<'a, Link<T>>,
    signals: &'a Signals,
    config: &'a LinkConfig,
}

impl<'a, T: Transport> Session<'a, T> {
    /// Transmits a command frame.
    pub fn send(&mut self, frame: &Frame) -> Result<(), LinkError> {
        {
            let link = &mut *self.link;
            link.tx.clear();
            let size = frame.encode_into(&mut link.tx)?;
            if size > self.config.max_frame_size {
                return Err(ProtocolError::FrameTooLarge {
                    size,
                    max: self.config.max_frame_size,
                }
                .into());
            }
            link.transport.clear();
        }

        match frame.command_kind() {
            Some(command) => tracing::debug!("-> {} ({} params)", command, frame.params().len()),
            None => tracing::debug!("-> {:#04x} ({} params)", frame.opcode(), frame.params().len()),
        }

        self.select()?;
        self.transfer();
        self.deselect();
        Ok(())
    }

    /// Clocks out up to `max_size` filler bytes and parses the reply to
    /// `opcode` out of what came back.
    pub fn receive(
        &mut self,
        opcode: u8,
        max_size: usize,
        width: ParamWidth,
        slots: &mut [Slot],
    ) -> Result<Reply, LinkError> {
        let size = max_size.min(self.config.max_frame_size).min(MAX_FRAME_SIZE);
        {
            let link = &mut *self.link;
            link.tx.clear();
            link.tx.resize(size, 0);
            link.transport.clear();
        }

        self.select()?;
        self.transfer();
        {
            let link = &mut *self.link;
            link.rx.clear();
            while link.rx.len() < size {
                match link.transport.read_byte() {
                    Some(byte) => link.rx.push(byte),
                    None => break,
                }
            }
        }
        self.deselect();

        let parser =
            ResponseParser::new(opcode, width).with_start_budget(self.config.start_marker_budget);
        let params_read = parser
            .parse(self.link.rx.iter().copied(), slots)
            .inspect_err(|e| tracing::warn!("reply to {:#04x} rejected: {}", opcode, e))?;

        let reply = Reply {
            params_read,
            truncated: slots[..params_read].iter().any(Slot::is_truncated),
        };
        tracing::trace!(
            "<- {:#04x}: {} params{}",
            opcode,
            params_read,
            if reply.truncated { " (truncated)" } else { "" }
        );
        Ok(reply)
    }

    /// Sends `frame` and parses its reply.
    pub fn request(&mut self, frame: &Frame, slots: &mut [Slot]) -> Result<Reply, LinkError> {
        self.send(frame)?;
        let width = frame
            .command_kind()
            .map(Command::reply_width)
            .unwrap_or(frame.width());
        let max_size = self.config.max_frame_size;
        self.receive(frame.opcode(), max_size, width, slots)
    }

    fn reset_device(&mut self) {
        tracing::debug!("resetting co-processor");
        let transport = &mut self.link.transport;
        transport.set_select(false);
        transport.set_reset(true);
        std::thread::sleep(self.config.reset_pulse());
        transport.set_reset(false);
        std::thread::sleep(self.config.reset_pulse());
        transport.set_reset(true);
        std::thread::sleep(self.config.boot_delay());
        self.link.initialized = true;
    }

    fn select(&mut self) -> Result<(), LinkError> {
        if !self.link.initialized {
            self.reset_device();
        }
        self.wait_ready(self.config.ready_timeout())?;
        self.link.transport.set_select(true);
        // Most of the time the device is already ready; a short wait is
        // enough to find out and its expiry is not an error.
        let _ = self.wait_ready(Some(self.config.select_wait()));
        Ok(())
    }

    fn deselect(&mut self) {
        self.link.transport.set_select(false);
    }

    fn transfer(&mut self) {
        let link = &mut *self.link;
        tracing::trace!("transfer {} bytes", link.tx.len());
        link.transport.start_transfer(&link.tx);
        self.signals.transfer_done.take();
    }

    fn wait_ready(&mut self, timeout: Option<Duration>) -> Result<(), LinkError> {
        let Some(timeout) = timeout else {
            while self.link.transport.is_busy() {
                self.signals.device_ready.take();
            }
            return Ok(());
        };

        let deadline = Instant::now() + timeout;
        while self.link.transport.is_busy() {
            let now = Instant::now();
            if now >= deadline {
                return Err(LinkError::DeviceNotReady(timeout));
            }
            self.signals.device_ready.take_timeout(deadline - now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ninalink_protocol::{END_CMD, ERR_CMD, START_CMD};
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Select(bool),
        Reset(bool),
        Transfer(Vec<u8>),
    }

    #[derive(Default)]
    struct Script {
        events: Vec<Event>,
        replies: VecDeque<Vec<u8>>,
    }

    /// Records pin activity and answers filler transfers with queued bytes.
    struct ScriptedTransport {
        script: Arc<Mutex<Script>>,
        busy: Arc<AtomicBool>,
        transfer_done: Arc<crate::Signal>,
        inbound: VecDeque<u8>,
    }

    impl Transport for ScriptedTransport {
        fn set_select(&mut self, selected: bool) {
            self.script.lock().events.push(Event::Select(selected));
        }

        fn set_reset(&mut self, high: bool) {
            self.script.lock().events.push(Event::Reset(high));
        }

        fn is_busy(&self) -> bool {
            self.busy.load(Ordering::SeqCst)
        }

        fn clear(&mut self) {
            self.inbound.clear();
        }

        fn start_transfer(&mut self, tx: &[u8]) {
            let mut script = self.script.lock();
            script.events.push(Event::Transfer(tx.to_vec()));
            let reply = if tx.first() == Some(&START_CMD) {
                Vec::new()
            } else {
                script.replies.pop_front().unwrap_or_default()
            };
            self.inbound = reply
                .into_iter()
                .chain(std::iter::repeat(0))
                .take(tx.len())
                .collect();
            self.transfer_done.give();
        }

        fn read_byte(&mut self) -> Option<u8> {
            self.inbound.pop_front()
        }
    }

    struct Harness {
        driver: SpiDriver<ScriptedTransport>,
        script: Arc<Mutex<Script>>,
        busy: Arc<AtomicBool>,
        signals: Signals,
    }

    fn harness(config: LinkConfig) -> Harness {
        let signals = Signals::new();
        let script = Arc::new(Mutex::new(Script::default()));
        let busy = Arc::new(AtomicBool::new(false));
        let transport = ScriptedTransport {
            script: Arc::clone(&script),
            busy: Arc::clone(&busy),
            transfer_done: Arc::clone(&signals.transfer_done),
            inbound: VecDeque::new(),
        };
        Harness {
            driver: SpiDriver::new(transport, signals.clone(), config),
            script,
            busy,
            signals,
        }
    }

    impl Harness {
        fn queue_reply(&self, bytes: Vec<u8>) {
            self.script.lock().replies.push_back(bytes);
        }

        fn transfers(&self) -> Vec<Vec<u8>> {
            self.script
                .lock()
                .events
                .iter()
                .filter_map(|e| match e {
                    Event::Transfer(bytes) => Some(bytes.clone()),
                    _ => None,
                })
                .collect()
        }

        fn events(&self) -> Vec<Event> {
            self.script.lock().events.clone()
        }
    }

    #[test]
    fn test_send_start_client_frame() {
        let h = harness(LinkConfig::instant());
        let frame = Frame::raw(0x20, ParamWidth::Narrow)
            .with_ipv4(Ipv4Addr::new(10, 0, 0, 5))
            .with_u16(80)
            .with_u8(0)
            .with_u8(0);

        assert!(h.driver.send_command(&frame));

        let transfers = h.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(
            transfers[0],
            vec![START_CMD, 0x20, 4, 4, 10, 0, 0, 5, 2, 0, 80, 1, 0, 1, 0, END_CMD]
        );
    }

    #[test]
    fn test_lazy_reset_then_select_dance() {
        let h = harness(LinkConfig::instant());
        assert!(!h.driver.is_initialized());

        h.driver.send(&Frame::command(Command::GetFwVersion)).unwrap();
        h.driver.send(&Frame::command(Command::GetFwVersion)).unwrap();

        let events = h.events();
        assert_eq!(
            &events[..7],
            &[
                Event::Select(false),
                Event::Reset(true),
                Event::Reset(false),
                Event::Reset(true),
                Event::Select(true),
                Event::Transfer(vec![START_CMD, 0x37, 0, END_CMD]),
                Event::Select(false),
            ]
        );
        let resets = events
            .iter()
            .filter(|e| matches!(e, Event::Reset(_)))
            .count();
        assert_eq!(resets, 3);
        assert!(h.driver.is_initialized());
    }

    #[test]
    fn test_end_forces_reset_on_next_use() {
        let h = harness(LinkConfig::instant());
        h.driver.begin();
        h.driver.end();
        assert!(!h.driver.is_initialized());

        h.driver.send(&Frame::command(Command::GetFwVersion)).unwrap();
        let resets = h
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Reset(_)))
            .count();
        assert_eq!(resets, 3 + 1 + 3);
    }

    #[test]
    fn test_canned_reply_reports_one_param() {
        let h = harness(LinkConfig::instant());
        h.queue_reply(vec![START_CMD, 0xA0, 0x01, 0x01, 0x01, 0x00, 0x00, END_CMD]);

        let mut slots = [Slot::for_value(1)];
        let read = h
            .driver
            .receive_response(0x20, MAX_FRAME_SIZE, ParamWidth::Narrow, &mut slots);

        assert_eq!(read, 1);
        assert_eq!(slots[0].as_u8(), Some(1));

        let transfers = h.transfers();
        assert_eq!(transfers[0].len(), MAX_FRAME_SIZE);
        assert!(transfers[0].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_receive_size_clamped() {
        let h = harness(LinkConfig::instant());
        let mut slots = [Slot::for_value(1)];
        h.driver
            .receive_response(0x20, 4096, ParamWidth::Narrow, &mut slots);
        assert_eq!(h.transfers()[0].len(), MAX_FRAME_SIZE);
    }

    #[test]
    fn test_silent_device_reads_zero_params() {
        let h = harness(LinkConfig::instant());
        let mut slots = [Slot::for_value(1)];
        assert_eq!(
            h.driver
                .receive_response(0x20, 64, ParamWidth::Narrow, &mut slots),
            0
        );

        let err = h
            .driver
            .receive(0x20, 64, ParamWidth::Narrow, &mut slots)
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::Protocol(ProtocolError::MissingStart { .. })
        ));
    }

    #[test]
    fn test_error_marker_surfaces() {
        let h = harness(LinkConfig::instant());
        h.queue_reply(vec![0, 0, ERR_CMD]);
        let mut slots = [Slot::for_value(1)];
        let err = h
            .driver
            .receive(0x2D, 64, ParamWidth::Narrow, &mut slots)
            .unwrap_err();
        assert_eq!(err, LinkError::Protocol(ProtocolError::DeviceError));
    }

    #[test]
    fn test_request_reports_truncation() {
        let h = harness(LinkConfig::instant());
        let reply = Frame::reply(Command::GetCurrSsid)
            .with_param(&b"a-rather-long-network-name"[..])
            .encode()
            .unwrap();
        h.queue_reply(reply.to_vec());

        let mut slots = [Slot::new(8)];
        let result = h
            .driver
            .request(&Frame::command(Command::GetCurrSsid).with_u8(0xFF), &mut slots)
            .unwrap();

        assert_eq!(result.params_read(), 1);
        assert!(result.is_truncated());
        assert_eq!(slots[0].as_bytes(), b"a-rathe");
        assert_eq!(h.transfers().len(), 2);
    }

    #[test]
    fn test_frame_over_configured_limit() {
        let config = LinkConfig {
            max_frame_size: 16,
            ..LinkConfig::instant()
        };
        let h = harness(config);
        let frame = Frame::command(Command::SetNet).with_param(vec![b'x'; 32]);

        let err = h.driver.send(&frame).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Protocol(ProtocolError::FrameTooLarge { max: 16, .. })
        ));
        assert!(h.transfers().is_empty());
    }

    #[test]
    fn test_busy_device_times_out() {
        let config = LinkConfig {
            ready_timeout_ms: Some(20),
            ..LinkConfig::instant()
        };
        let h = harness(config);
        h.busy.store(true, Ordering::SeqCst);

        let err = h
            .driver
            .send(&Frame::command(Command::GetConnStatus))
            .unwrap_err();
        assert_eq!(err, LinkError::DeviceNotReady(Duration::from_millis(20)));
        assert!(h.transfers().is_empty());
        assert!(!h.events().contains(&Event::Select(true)));
    }

    #[test]
    fn test_ready_edge_releases_wait() {
        let h = harness(LinkConfig::instant());
        h.driver.begin();
        h.busy.store(true, Ordering::SeqCst);

        let busy = Arc::clone(&h.busy);
        let ready = Arc::clone(&h.signals.device_ready);
        let irq = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            busy.store(false, Ordering::SeqCst);
            ready.give();
        });

        h.driver
            .send(&Frame::command(Command::GetConnStatus))
            .unwrap();
        irq.join().unwrap();
        assert_eq!(h.transfers().len(), 1);
    }
}
