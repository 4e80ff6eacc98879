//! Card-reader serial line.
//!
//! Two threads share one physical line: the reader thread blocks on `read`,
//! feeds every byte to a single [`FrameDecoder`] and publishes each card scan;
//! the poller thread writes the reader's poll command at a fixed interval.
//! Corrupted frames are dropped by the decoder and never reach the bus.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use cabinet_events::{EventBus, Notification, NotificationEnvelope};
use cabinet_protocol::{CardEvent, FrameDecoder, ReaderCommand};

const READ_CHUNK: usize = 64;

/// Pause after a read that found no data, so a non-blocking device node does
/// not spin the thread.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(20);

/// Handle to the reader thread.
///
/// The thread stops at end of input, on a read error, or at the first read
/// that returns after [`CardReaderHandle::shutdown`] was requested.
#[derive(Debug)]
pub struct CardReaderHandle {
    stop: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl CardReaderHandle {
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Stop and wait for the thread.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Stop without waiting; a thread blocked in `read` exits when the read
    /// returns.
    pub fn detach(self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct CardReaderWorker;

impl CardReaderWorker {
    /// Spawn the reader thread over any byte source.
    pub fn spawn<R, B>(name: &'static str, source: R, bus: B) -> io::Result<CardReaderHandle>
    where
        R: Read + Send + 'static,
        B: EventBus<NotificationEnvelope> + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || read_loop(name, source, bus, flag))?;

        Ok(CardReaderHandle {
            stop,
            join: Some(join),
        })
    }
}

fn read_loop<R, B>(name: &'static str, mut source: R, bus: B, stop: Arc<AtomicBool>)
where
    R: Read,
    B: EventBus<NotificationEnvelope>,
{
    info!(worker = name, "card reader started");

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_CHUNK];
    while !stop.load(Ordering::SeqCst) {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                thread::sleep(IDLE_BACKOFF);
                continue;
            }
            Err(e) => {
                warn!(worker = name, error = %e, "card reader line failed");
                break;
            }
        };

        for frame in decoder.frames(buf[..n].iter().copied()) {
            let Some(event) = CardEvent::from_frame(&frame) else {
                debug!(worker = name, command = frame.command, "frame without card payload");
                continue;
            };
            info!(worker = name, card = %event.card, sequence = event.sequence, "card scanned");
            let envelope = NotificationEnvelope::new(Notification::CardScanned { card: event.card });
            if let Err(e) = bus.publish(envelope) {
                warn!(worker = name, error = %e, "failed to publish card scan");
            }
        }
    }

    info!(
        worker = name,
        decoded = decoder.decoded_frames(),
        dropped = decoder.dropped_frames(),
        "card reader stopped"
    );
}

/// Handle to the poll writer thread.
#[derive(Debug)]
pub struct ReaderPollerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl ReaderPollerHandle {
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReaderPoller {
    pub interval: Duration,
    pub command: ReaderCommand,
}

impl Default for ReaderPoller {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            command: ReaderCommand::poll(),
        }
    }
}

impl ReaderPoller {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the poll writer. A failed write is logged and retried on the
    /// next tick.
    pub fn spawn<W>(&self, name: &'static str, mut sink: W) -> io::Result<ReaderPollerHandle>
    where
        W: Write + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let interval = self.interval;
        let bytes = self.command.encode();

        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            debug!(worker = name, interval_ms = interval.as_millis() as u64, "reader poller started");
            loop {
                if let Err(e) = sink.write_all(&bytes).and_then(|()| sink.flush()) {
                    warn!(worker = name, error = %e, "failed to write reader poll");
                }
                match shutdown_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
            debug!(worker = name, "reader poller stopped");
        })?;

        Ok(ReaderPollerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

/// Both halves of a card reader attached to a device node.
#[derive(Debug)]
pub struct CardReaderLine {
    pub reader: CardReaderHandle,
    pub poller: ReaderPollerHandle,
}

impl CardReaderLine {
    /// Open `device` for reading and writing and start both threads.
    pub fn open<B>(device: &Path, poll_interval: Duration, bus: B) -> io::Result<Self>
    where
        B: EventBus<NotificationEnvelope> + 'static,
    {
        let source = File::open(device)?;
        let sink = OpenOptions::new().write(true).open(device)?;
        info!(device = %device.display(), "card reader line opened");

        let reader = CardReaderWorker::spawn("card-reader", source, bus)?;
        let poller = ReaderPoller::default()
            .with_interval(poll_interval)
            .spawn("card-reader-poll", sink)?;
        Ok(Self { reader, poller })
    }

    /// Stop polling and release the reader thread. A serial device can block
    /// in `read` indefinitely, so the reader is not joined.
    pub fn shutdown(self) {
        self.poller.shutdown();
        self.reader.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Mutex, PoisonError};
    use std::time::Instant;

    use cabinet_events::InMemoryEventBus;
    use cabinet_protocol::HardwareFrame;

    #[test]
    fn scans_on_the_line_become_card_notifications() {
        let mut bytes = vec![0x00, 0x7F];
        bytes.extend(HardwareFrame::new(0x02, 1, 0, 0, vec![0x12, 0xAB]).unwrap().encode());

        let mut corrupted = HardwareFrame::new(0x02, 2, 0, 0, vec![0x55]).unwrap().encode();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0x01;
        bytes.extend(corrupted);

        bytes.extend(HardwareFrame::new(0x02, 3, 0, 0, Vec::new()).unwrap().encode());
        bytes.extend(HardwareFrame::new(0x02, 4, 0, 0, vec![0x0F]).unwrap().encode());

        let bus = Arc::new(InMemoryEventBus::<NotificationEnvelope>::new());
        let sub = bus.subscribe();
        let handle = CardReaderWorker::spawn("reader-test", Cursor::new(bytes), bus.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        let cards: Vec<_> = sub.drain().into_iter().map(|e| e.into_notification()).collect();
        assert_eq!(
            cards,
            vec![
                Notification::CardScanned { card: "12AB".into() },
                Notification::CardScanned { card: "0F".into() },
            ]
        );
    }

    /// Reports "no data yet" a few times before handing over its bytes.
    struct SlowLine {
        idle_reads: usize,
        bytes: Cursor<Vec<u8>>,
    }

    impl Read for SlowLine {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.idle_reads > 0 {
                self.idle_reads -= 1;
                return Err(io::Error::from(ErrorKind::WouldBlock));
            }
            self.bytes.read(buf)
        }
    }

    #[test]
    fn idle_reads_back_off_before_retrying() {
        let line = SlowLine {
            idle_reads: 3,
            bytes: Cursor::new(HardwareFrame::new(0x02, 1, 0, 0, vec![0x0A]).unwrap().encode()),
        };
        let bus = Arc::new(InMemoryEventBus::<NotificationEnvelope>::new());
        let sub = bus.subscribe();

        let started = Instant::now();
        let handle = CardReaderWorker::spawn("idle-test", line, bus.clone()).unwrap();
        let deadline = started + Duration::from_secs(5);
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        assert!(started.elapsed() >= 3 * IDLE_BACKOFF);
        let cards: Vec<_> = sub.drain().into_iter().map(|e| e.into_notification()).collect();
        assert_eq!(cards, vec![Notification::CardScanned { card: "0A".into() }]);
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn poller_writes_poll_command_repeatedly() {
        let sink = SharedSink::default();
        let handle = ReaderPoller::default()
            .with_interval(Duration::from_millis(5))
            .spawn("poll-test", sink.clone())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.0.lock().unwrap().len() < 2 * ReaderCommand::LEN && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        let written = sink.0.lock().unwrap().clone();
        assert!(written.len() >= 2 * ReaderCommand::LEN);
        assert_eq!(written.len() % ReaderCommand::LEN, 0);
        for chunk in written.chunks(ReaderCommand::LEN) {
            assert_eq!(chunk, ReaderCommand::poll().encode());
        }
    }
}
