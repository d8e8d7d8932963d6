use std::{
    io,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    task::Poll,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, warn};
use tankbot_protocol::{
    Backpressure, PacketType, SendError,
    command::{Command, build_command, build_frame},
    dispatch::{Dispatcher, MotorControl, TelemetrySink},
    frame_parser::{FrameParser, FrameParserResult},
    payload::SpeedCommand,
    ring_buffer::{RING_CAPACITY, RingBuffer},
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::transport::ByteTransport;

const READ_CHUNK: usize = 64;
/// How long a sender waiting for buffer room sleeps between attempts.
const SEND_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Why the worker thread stopped. All of these are final: there is no reconnect.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("read error: {0}")]
    Read(#[source] io::Error),
    #[error("write error: {0}")]
    Write(#[source] io::Error),
    #[error("incomplete write: only {written} of {expected} bytes sent")]
    ShortWrite { written: usize, expected: usize },
    #[error("device thread panicked")]
    Panicked,
}

#[derive(Clone, Copy, Debug)]
pub struct LinkOptions {
    pub poll_interval: Duration,
    pub backpressure: Backpressure,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            backpressure: Backpressure::Spin,
        }
    }
}

struct Shared {
    outgoing: Mutex<RingBuffer>,
    alive: AtomicBool,
}

impl Shared {
    fn outgoing(&self) -> MutexGuard<'_, RingBuffer> {
        // cursors are only moved after a byte is copied, so a poisoned buffer is still consistent
        self.outgoing.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Clears the liveness flag however the worker exits.
struct AliveGuard<'a>(&'a AtomicBool);

impl Drop for AliveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the worker thread that talks to the device.
///
/// Any thread may enqueue packets; only the worker touches the transport.
/// Once the worker has died it stays dead.
pub struct DeviceThread {
    shared: Arc<Shared>,
    stop_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<Result<(), LinkError>>>,
    backpressure: Backpressure,
}

impl DeviceThread {
    pub fn spawn<P, M, T>(
        transport: P,
        dispatcher: Dispatcher<M, T>,
        options: LinkOptions,
    ) -> io::Result<Self>
    where
        P: ByteTransport + Send + 'static,
        M: MotorControl + Send + 'static,
        T: TelemetrySink + Send + 'static,
    {
        let shared = Arc::new(Shared {
            outgoing: Mutex::new(RingBuffer::new()),
            alive: AtomicBool::new(true),
        });
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name("device-link".into())
            .spawn(move || {
                let _alive = AliveGuard(&worker.alive);
                let result =
                    thread_main(transport, dispatcher, &worker, stop_rx, options.poll_interval);
                if let Err(e) = &result {
                    error!("connection lost: {e}");
                }
                result
            })?;
        Ok(Self {
            shared,
            stop_tx,
            handle: Some(handle),
            backpressure: options.backpressure,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Bytes queued but not yet handed to the transport.
    pub fn pending_outgoing(&self) -> usize {
        self.shared.outgoing().available()
    }

    pub fn enqueue_outgoing(&self, kind: PacketType, payload: &[u8]) -> Result<(), SendError> {
        let frame = build_frame(kind, payload)?;
        self.enqueue_frame(&frame)
    }

    pub fn send(&self, command: &Command) -> Result<(), SendError> {
        self.enqueue_frame(&build_command(command))
    }

    pub fn send_speed(&self, speed: SpeedCommand) -> Result<(), SendError> {
        self.send(&Command::Speed(speed))
    }

    /// Set both motor speeds from fractions of full speed, clamped to 0.0..=1.0.
    pub fn set_speed(&self, left: f64, right: f64) -> Result<(), SendError> {
        self.send_speed(SpeedCommand::from_fractions(left, right))
    }

    /// The lock is held only while the frame is copied in. A sender waiting for
    /// room gives up with `ConnectionLost` if the worker dies meanwhile.
    fn enqueue_frame(&self, frame: &[u8]) -> Result<(), SendError> {
        self.backpressure.drive(
            || {
                if !self.is_alive() {
                    return Poll::Ready(Err(SendError::ConnectionLost));
                }
                match self.shared.outgoing().push_slice(frame) {
                    Ok(()) => Poll::Ready(Ok(())),
                    Err(_) => Poll::Pending,
                }
            },
            || thread::sleep(SEND_RETRY_DELAY),
        )
    }

    /// Ask the worker to stop and wait for it. The worker notices within one
    /// loop period; a read or write already in progress is not interrupted.
    pub fn shutdown(mut self) -> Result<(), LinkError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), LinkError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        // a full channel means a stop is already pending
        let _ = self.stop_tx.try_send(());
        handle.join().unwrap_or(Err(LinkError::Panicked))
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            debug!("device thread had already failed: {e}");
        }
    }
}

fn thread_main<P, M, T>(
    mut transport: P,
    mut dispatcher: Dispatcher<M, T>,
    shared: &Shared,
    mut stop_rx: mpsc::Receiver<()>,
    poll_interval: Duration,
) -> Result<(), LinkError>
where
    P: ByteTransport,
    M: MotorControl,
    T: TelemetrySink,
{
    let mut parser = FrameParser::new();
    let mut pending = [0u8; RING_CAPACITY];
    let mut chunk = [0u8; READ_CHUNK];
    debug!("device link started");

    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                debug!("device link received stop");
                return Ok(());
            }
            Err(TryRecvError::Empty) => {}
        }

        // copy out under the lock, write without it
        let n = shared.outgoing().pop_into(&mut pending);
        if n > 0 {
            debug!("sending: {:x?}", &pending[..n]);
            let written = transport.write(&pending[..n]).map_err(LinkError::Write)?;
            if written != n {
                return Err(LinkError::ShortWrite {
                    written,
                    expected: n,
                });
            }
        }

        loop {
            let n = transport.read(&mut chunk).map_err(LinkError::Read)?;
            if n == 0 {
                break;
            }
            feed(&mut parser, &mut dispatcher, &chunk[..n]);
        }

        thread::sleep(poll_interval);
    }
}

/// Run `bytes` through the parser, dispatching every packet they complete.
fn feed<M: MotorControl, T: TelemetrySink>(
    parser: &mut FrameParser,
    dispatcher: &mut Dispatcher<M, T>,
    bytes: &[u8],
) -> usize {
    let mut dispatched = 0;
    let mut offset = 0;
    while offset < bytes.len() {
        match parser.parse(&bytes[offset..]) {
            FrameParserResult::Ready { packet, consumed } => {
                dispatcher.dispatch(packet);
                dispatched += 1;
                offset += consumed;
            }
            FrameParserResult::Error { err, consumed } => {
                warn!("{err}");
                offset += consumed;
            }
            FrameParserResult::Incomplete => break,
        }
    }
    dispatched
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::debug_history::DebugHistory;

    #[test]
    fn feed_dispatches_everything_in_one_go() {
        let mut bytes = b"junk".to_vec();
        for text in [&b"one"[..], b"two", b"three"] {
            bytes.extend_from_slice(&build_command(&Command::Message(text)));
        }
        // a broken frame in the middle does not stop the rest
        bytes.extend_from_slice(b"$$M\x01x\x00\r\n");
        bytes.extend_from_slice(&build_command(&Command::Message(b"four")));
        // and a partial frame waits for the next read
        let tail = build_command(&Command::Message(b"five"));
        bytes.extend_from_slice(&tail[..5]);

        let history = DebugHistory::new(16);
        let mut parser = FrameParser::new();
        let mut dispatcher = Dispatcher::new((), history.clone());
        assert_eq!(feed(&mut parser, &mut dispatcher, &bytes), 4);
        assert_eq!(feed(&mut parser, &mut dispatcher, &tail[5..]), 1);

        let mut cursor = crate::debug_history::Cursor::default();
        assert_eq!(
            history.read_since(&mut cursor),
            vec!["one", "two", "three", "four", "five"]
        );
        assert_eq!(parser.stats().dropped_frames, 1);
    }
}
