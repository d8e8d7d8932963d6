use std::{
    io::{self, Read, Write},
    time::Duration,
};

use log::debug;

/// A byte pipe to the device. Both directions may be partial.
pub trait ByteTransport {
    /// Read whatever is available right now. `Ok(0)` means nothing was.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl<T: ByteTransport + ?Sized> ByteTransport for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }
}

/// A serial port opened with a short read timeout, so reads behave as polls.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32, read_timeout: Duration) -> serialport::Result<Self> {
        debug!("opening {path} at {baud} baud");
        let port = serialport::new(path, baud).timeout(read_timeout).open()?;
        Ok(Self { port })
    }
}

impl ByteTransport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match Read::read(&mut self.port, buf) {
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            other => other,
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = Write::write(&mut self.port, buf)?;
        self.port.flush()?;
        Ok(n)
    }
}

/// Toggle DTR to reset the board into its bootloader.
pub fn reset_board(path: &str) -> serialport::Result<()> {
    let mut port = serialport::new(path, 115_200).open()?;
    port.write_data_terminal_ready(true)?;
    std::thread::sleep(Duration::from_secs(1));
    port.write_data_terminal_ready(false)?;
    Ok(())
}
