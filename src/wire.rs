//! Buffered wire I/O.
//!
//! Owns the read-side buffer fed by the transport, drains it through the
//! framer into frames, and batches outgoing messages so that an extended
//! query sequence (Parse+Bind+Describe+Execute+Sync) goes out in one write.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::framer::{CopyEvent, Frame, Framer};
use crate::transport::Transport;

const READ_CHUNK: usize = 16 * 1024;

/// Buffered reader/writer over a [`Transport`].
#[derive(Debug)]
pub struct WireStream {
    transport: Transport,
    framer: Framer,
    /// Outgoing messages accumulate here until [`WireStream::flush`].
    write_buf: Vec<u8>,
    scratch: Vec<u8>,
}

impl WireStream {
    /// Wrap a connected transport.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            framer: Framer::new(),
            write_buf: Vec::with_capacity(8 * 1024),
            scratch: vec![0u8; READ_CHUNK],
        }
    }

    /// Queue outgoing bytes; nothing is sent until [`WireStream::flush`].
    pub fn queue(&mut self) -> &mut Vec<u8> {
        &mut self.write_buf
    }

    /// Send everything queued in one transport write.
    pub fn flush(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let res = self.transport.send(&self.write_buf);
        self.write_buf.clear();
        res
    }

    /// Block until the next complete frame arrives.
    pub fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.framer.next_frame()? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    /// Return a buffered frame if one is already complete, without touching
    /// the transport.
    pub fn buffered_frame(&mut self) -> Result<Option<Frame>> {
        self.framer.next_frame()
    }

    /// Wait up to `timeout` for a frame. `None` means no frame arrived in
    /// time; the connection remains usable.
    pub fn poll_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        if let Some(frame) = self.framer.next_frame()? {
            return Ok(Some(frame));
        }

        // A zero read timeout means "block forever" to the OS; clamp it.
        let timeout = timeout.max(Duration::from_millis(1));
        self.transport.set_read_deadline(Some(timeout))?;
        let res = self.fill();
        self.transport.set_read_deadline(None)?;

        match res {
            Ok(()) => self.framer.next_frame(),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Block until the next COPY-out event (a CopyData payload or the first
    /// frame of another kind).
    pub fn next_copy_event(&mut self, copy_data_kind: u8) -> Result<CopyEvent> {
        loop {
            if let Some(event) = self.framer.next_copy_event(copy_data_kind)? {
                return Ok(event);
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<()> {
        let n = self.transport.recv(&mut self.scratch)?;
        if n == 0 {
            return Err(Error::ConnectionBroken);
        }
        self.framer.feed(&self.scratch[..n]);
        Ok(())
    }

    /// Shut down the underlying transport. Best-effort.
    pub fn close(&mut self) {
        self.transport.close();
    }
}
