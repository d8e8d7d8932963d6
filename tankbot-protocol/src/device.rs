//! The microcontroller end of the link.
//!
//! The receive and transmit interrupts only move single bytes between the UART
//! and a pair of [`RingBuffer`]s. Everything else, parsing included, happens in
//! [`DeviceLink::poll`] from the main loop.
//!
//! ```ignore
//! static SERIAL: SerialBuffers = SerialBuffers::new();
//!
//! #[interrupt]
//! fn USART0_RX() {
//!     SERIAL.on_receive(read_udr0());
//! }
//!
//! #[interrupt]
//! fn USART0_UDRE() {
//!     SERIAL.on_transmit_ready(&mut Usart0);
//! }
//!
//! let mut link = DeviceLink::new(&SERIAL, Usart0);
//! let mut dispatcher = Dispatcher::new(EscMotors::new(Timer1), ());
//! link.send_message(b"Startup complete")?;
//! loop {
//!     link.poll(&mut dispatcher);
//! }
//! ```

use core::cell::{Cell, RefCell};
use core::fmt::{self, Write};
use core::task::Poll;

use critical_section::Mutex;
use log::warn;

use crate::{
    Backpressure, MAX_MESSAGE_LENGTH, PacketType, SendError,
    command::{Command, build_command, build_frame},
    dispatch::{Dispatched, Dispatcher, MotorControl, TelemetrySink},
    frame_parser::FrameParser,
    ring_buffer::RingBuffer,
};

/// The UART registers the link touches.
pub trait UartRegisters {
    /// Load the transmit data register.
    fn write_data(&mut self, byte: u8);
    /// Enable or disable the "data register empty" interrupt.
    fn set_transmit_interrupt(&mut self, enabled: bool);
}

/// Buffers shared between the UART interrupts and the main loop.
///
/// Each buffer has exactly one producer and one consumer. The critical
/// sections only ever cover a single push or pop.
pub struct SerialBuffers {
    input: Mutex<RefCell<RingBuffer>>,
    output: Mutex<RefCell<RingBuffer>>,
    overruns: Mutex<Cell<u32>>,
}

impl SerialBuffers {
    pub const fn new() -> Self {
        Self {
            input: Mutex::new(RefCell::new(RingBuffer::new())),
            output: Mutex::new(RefCell::new(RingBuffer::new())),
            overruns: Mutex::new(Cell::new(0)),
        }
    }

    /// Body of the receive interrupt. A byte that does not fit is dropped and counted.
    pub fn on_receive(&self, byte: u8) {
        critical_section::with(|cs| {
            if self.input.borrow_ref_mut(cs).push(byte).is_err() {
                let overruns = self.overruns.borrow(cs);
                overruns.set(overruns.get().wrapping_add(1));
            }
        })
    }

    /// Body of the data register empty interrupt.
    pub fn on_transmit_ready<U: UartRegisters>(&self, uart: &mut U) {
        critical_section::with(|cs| {
            let mut output = self.output.borrow_ref_mut(cs);
            if let Some(byte) = output.pop() {
                uart.write_data(byte);
            }
            // ran out of data to send
            if output.is_empty() {
                uart.set_transmit_interrupt(false);
            }
        })
    }

    /// Received bytes lost because the input buffer was full.
    pub fn overruns(&self) -> u32 {
        critical_section::with(|cs| self.overruns.borrow(cs).get())
    }

    pub fn input_available(&self) -> usize {
        critical_section::with(|cs| self.input.borrow_ref(cs).available())
    }

    pub fn output_pending(&self) -> usize {
        critical_section::with(|cs| self.output.borrow_ref(cs).available())
    }

    fn read_byte(&self) -> Option<u8> {
        critical_section::with(|cs| self.input.borrow_ref_mut(cs).pop())
    }

    fn output_free(&self) -> usize {
        critical_section::with(|cs| self.output.borrow_ref(cs).free())
    }

    fn queue_byte(&self, byte: u8) {
        critical_section::with(|cs| {
            // room was reserved by the caller
            let _ = self.output.borrow_ref_mut(cs).push(byte);
        })
    }
}

impl Default for SerialBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// Main loop side of the link.
pub struct DeviceLink<'a, U> {
    buffers: &'a SerialBuffers,
    uart: U,
    parser: FrameParser,
    backpressure: Backpressure,
    dropped_diagnostics: u32,
}

impl<'a, U: UartRegisters> DeviceLink<'a, U> {
    /// Sending busy-waits for room by default, relying on the transmit
    /// interrupt to drain the output buffer.
    pub fn new(buffers: &'a SerialBuffers, uart: U) -> Self {
        Self {
            buffers,
            uart,
            parser: FrameParser::new(),
            backpressure: Backpressure::Spin,
            dropped_diagnostics: 0,
        }
    }

    pub fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    pub fn parser(&self) -> &FrameParser {
        &self.parser
    }

    /// Diagnostics that could not be queued for the host.
    pub fn dropped_diagnostics(&self) -> u32 {
        self.dropped_diagnostics
    }

    /// Process received data, dispatching at most one packet.
    ///
    /// This bounds the time spent per call, so it must be called on every pass
    /// of the main loop. Bytes after the completed packet stay queued.
    pub fn poll<M: MotorControl, T: TelemetrySink>(
        &mut self,
        dispatcher: &mut Dispatcher<M, T>,
    ) -> Option<Dispatched> {
        while let Some(byte) = self.buffers.read_byte() {
            match self.parser.parse_byte(byte) {
                Ok(None) => {}
                Ok(Some(packet)) => {
                    let outcome = dispatcher.dispatch(packet);
                    self.report(outcome);
                    return Some(outcome);
                }
                Err(err) => {
                    warn!("{err}");
                    self.diagnose(format_args!("{err}"));
                }
            }
        }
        None
    }

    /// Tell the host about packets that were dropped.
    fn report(&mut self, outcome: Dispatched) {
        match outcome {
            Dispatched::Unknown(kind) => {
                self.diagnose(format_args!("Unknown packet type '{}' - ignoring", kind as char))
            }
            Dispatched::Malformed(err) => self.diagnose(format_args!("{err}")),
            Dispatched::Speed(_) | Dispatched::Message { .. } => {}
        }
    }

    fn diagnose(&mut self, args: fmt::Arguments) {
        if let Err(e) = self.send_fmt(args) {
            self.dropped_diagnostics = self.dropped_diagnostics.wrapping_add(1);
            warn!("dropped diagnostic: {e}");
        }
    }

    pub fn enqueue_outgoing(&mut self, kind: PacketType, payload: &[u8]) -> Result<(), SendError> {
        let frame = build_frame(kind, payload)?;
        self.enqueue_frame(&frame)
    }

    pub fn send(&mut self, command: &Command) -> Result<(), SendError> {
        self.enqueue_frame(&build_command(command))
    }

    /// Send debug text, cut to [`MAX_MESSAGE_LENGTH`] bytes.
    pub fn send_message(&mut self, text: &[u8]) -> Result<(), SendError> {
        self.send(&Command::Message(text))
    }

    /// Format debug text into a fixed buffer and send it. Output past
    /// [`MAX_MESSAGE_LENGTH`] bytes is dropped.
    pub fn send_fmt(&mut self, args: fmt::Arguments) -> Result<(), SendError> {
        let mut text = heapless::Vec::<u8, MAX_MESSAGE_LENGTH>::new();
        // Truncating never reports an error
        let _ = Truncating(&mut text).write_fmt(args);
        self.send_message(&text)
    }

    /// Reserve room for the whole frame, then copy it in a byte at a time.
    fn enqueue_frame(&mut self, frame: &[u8]) -> Result<(), SendError> {
        let buffers = self.buffers;
        self.backpressure.drive(
            || {
                if buffers.output_free() >= frame.len() {
                    Poll::Ready(Ok(()))
                } else {
                    Poll::Pending
                }
            },
            core::hint::spin_loop,
        )?;
        // only the transmit interrupt consumes, so the reserved room can only grow
        for &byte in frame {
            buffers.queue_byte(byte);
        }
        self.uart.set_transmit_interrupt(true);
        Ok(())
    }
}

struct Truncating<'b>(&'b mut heapless::Vec<u8, MAX_MESSAGE_LENGTH>);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.0.capacity() - self.0.len();
        let take = s.len().min(room);
        let _ = self.0.extend_from_slice(&s.as_bytes()[..take]);
        Ok(())
    }
}
