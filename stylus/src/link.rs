//! `link`
//!
//! The byte-oriented transport underneath the EBB protocol client. The real
//! transport is the USB CDC serial device node the board enumerates as; the
//! trait seam exists so that tests can talk to a scripted in-memory device
//! instead.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError,
    },
};

/// The default serial device node to use on non-Windows systems.
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyACM0";

/// A half-duplex byte stream to an EBB board.
///
/// `send` must be callable from any thread at any time: the abort-motion
/// command is written from outside the plotting loop, while the loop may be
/// blocked reading a response. Implementations keep the write path usable
/// independently of an in-progress `recv`.
pub trait EbbTransport: Send + Sync {
    /// Writes a complete command to the device.
    ///
    /// # Arguments
    /// * `bytes`: The raw command bytes, including the trailing carriage
    ///   return.
    ///
    /// # Returns
    /// `Ok(())` once the bytes have been handed to the device, otherwise the
    /// I/O error.
    fn send(&self, bytes: &[u8]) -> io::Result<()>;

    /// Reads some response bytes from the device, blocking until at least
    /// one byte is available.
    ///
    /// # Arguments
    /// * `buf`: Destination buffer.
    ///
    /// # Returns
    /// The number of bytes read; `Ok(0)` means the device is gone.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Releases the transport. Subsequent operations fail with an I/O error.
    ///
    /// # Returns
    /// `Ok(())` if the transport was released.
    fn close(&self) -> io::Result<()>;
}

/// An EBB transport over a serial device node, opened as a plain file.
///
/// The board enumerates as a USB CDC device, so ordinary read/write file I/O
/// is all that is needed; no baud-rate or line-discipline configuration is
/// required on the USB side.
pub struct SerialLink {
    /// Handle used by the read path.
    reader: Mutex<File>,
    /// Handle used by the write path, separate from the reader so that a
    /// blocked read never holds up a write.
    writer: Mutex<File>,
    /// Set once [`EbbTransport::close`] has been called.
    closed: AtomicBool,
}

impl SerialLink {
    /// Opens the serial device node at `path`.
    ///
    /// # Arguments
    /// * `path`: Path to the device node, e.g. [`DEFAULT_SERIAL_DEVICE`].
    ///
    /// # Returns
    /// The opened link, or the error from opening the device node.
    pub fn open(path: impl AsRef<Path>) -> io::Result<SerialLink> {
        let writer = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let reader = writer.try_clone()?;
        Ok(SerialLink {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns an error if the link has been closed.
    ///
    /// # Returns
    /// `Ok(())` while the link is open.
    fn check_open(&self) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial link is closed",
            ))
        } else {
            Ok(())
        }
    }
}

impl EbbTransport for SerialLink {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.check_open()?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(bytes)?;
        writer.flush()
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        reader.read(buf)
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
