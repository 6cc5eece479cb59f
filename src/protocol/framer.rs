//! Incremental message framer.
//!
//! Slices a growing byte stream into `{kind, body}` frames. Input arrives in
//! arbitrary pieces via [`Framer::feed`]; [`Framer::next_frame`] yields a
//! frame as soon as its bytes are complete. Feeding the stream one byte at a
//! time produces the same frames as feeding it in a single call.
//!
//! The accumulation buffer is arena-style: reads append, consumed bytes are
//! compacted away only once consumption passes a threshold.

use crate::error::{Error, Result};

/// A complete wire frame: one kind octet plus its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type byte
    pub kind: u8,
    /// Message payload (after the length field)
    pub body: Vec<u8>,
}

/// Result of pulling from the framer while a COPY-out transfer is active.
#[derive(Debug)]
pub enum CopyEvent {
    /// A CopyData frame's payload.
    Data(Vec<u8>),
    /// First frame whose kind is not CopyData. The framer suspends the fast
    /// path here; the caller processes this frame in normal mode.
    Final(Frame),
}

const HEADER_LEN: usize = 5;
const COMPACT_THRESHOLD: usize = 64 * 1024;

/// Incremental splitter of a byte stream into frames.
#[derive(Debug, Default)]
pub struct Framer {
    buf: Vec<u8>,
    /// Offset of the first unconsumed byte.
    pos: usize,
}

impl Framer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(8 * 1024),
            pos: 0,
        }
    }

    /// Append raw bytes received from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered, unconsumed bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns true if at least one complete frame is buffered.
    pub fn has_frame(&self) -> Result<bool> {
        match self.peek_header()? {
            Some((_, total)) => Ok(self.buffered() >= total),
            None => Ok(false),
        }
    }

    /// Parse the 5-byte header if buffered, returning `(kind, total frame
    /// size)`. Fails fatally when the length field is below 4.
    fn peek_header(&self) -> Result<Option<(u8, usize)>> {
        if self.buffered() < HEADER_LEN {
            return Ok(None);
        }
        let h = &self.buf[self.pos..self.pos + HEADER_LEN];
        let kind = h[0];
        let len = i32::from_be_bytes([h[1], h[2], h[3], h[4]]);
        if len < 4 {
            return Err(Error::Protocol(format!(
                "invalid frame header: kind '{}' length {}",
                kind as char, len
            )));
        }
        Ok(Some((kind, 1 + len as usize)))
    }

    /// Yield the next complete frame, if any.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some((kind, total)) = self.peek_header()? else {
            return Ok(None);
        };
        if self.buffered() < total {
            return Ok(None);
        }

        let body = self.buf[self.pos + HEADER_LEN..self.pos + total].to_vec();
        self.consume(total);
        Ok(Some(Frame { kind, body }))
    }

    /// Pull the next event while in COPY-out mode: CopyData payloads stream
    /// through as [`CopyEvent::Data`]; the first frame of any other kind is
    /// published as [`CopyEvent::Final`], after which the caller resumes
    /// normal framing.
    pub fn next_copy_event(&mut self, copy_data_kind: u8) -> Result<Option<CopyEvent>> {
        let Some((kind, total)) = self.peek_header()? else {
            return Ok(None);
        };
        if self.buffered() < total {
            return Ok(None);
        }

        let body = self.buf[self.pos + HEADER_LEN..self.pos + total].to_vec();
        self.consume(total);
        if kind == copy_data_kind {
            Ok(Some(CopyEvent::Data(body)))
        } else {
            Ok(Some(CopyEvent::Final(Frame { kind, body })))
        }
    }

    fn consume(&mut self, n: usize) {
        self.pos += n;
        if self.pos >= COMPACT_THRESHOLD || self.pos * 2 >= self.buf.len() {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(kind: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![kind];
        out.extend_from_slice(&((body.len() as i32 + 4).to_be_bytes()));
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn splits_concatenated_frames() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&frame_bytes(b'1', b""));
        stream.extend_from_slice(&frame_bytes(b'T', b"\x00\x01abc"));
        stream.extend_from_slice(&frame_bytes(b'Z', b"I"));

        let mut framer = Framer::new();
        framer.feed(&stream);

        let f1 = framer.next_frame().unwrap().unwrap();
        assert_eq!((f1.kind, f1.body.as_slice()), (b'1', &b""[..]));
        let f2 = framer.next_frame().unwrap().unwrap();
        assert_eq!((f2.kind, f2.body.as_slice()), (b'T', &b"\x00\x01abc"[..]));
        let f3 = framer.next_frame().unwrap().unwrap();
        assert_eq!((f3.kind, f3.body.as_slice()), (b'Z', &b"I"[..]));
        assert!(framer.next_frame().unwrap().is_none());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn byte_at_a_time_matches_bulk() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&frame_bytes(b'C', b"SELECT 1\0"));
        stream.extend_from_slice(&frame_bytes(b'Z', b"T"));
        stream.extend_from_slice(&frame_bytes(b'N', b"hello"));

        let mut bulk = Framer::new();
        bulk.feed(&stream);
        let mut expected = Vec::new();
        while let Some(f) = bulk.next_frame().unwrap() {
            expected.push(f);
        }

        let mut trickle = Framer::new();
        let mut got = Vec::new();
        for &b in &stream {
            trickle.feed(&[b]);
            while let Some(f) = trickle.next_frame().unwrap() {
                got.push(f);
            }
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn incomplete_frame_waits() {
        let bytes = frame_bytes(b'D', b"0123456789");
        let mut framer = Framer::new();
        framer.feed(&bytes[..bytes.len() - 1]);
        assert!(framer.next_frame().unwrap().is_none());
        framer.feed(&bytes[bytes.len() - 1..]);
        assert_eq!(framer.next_frame().unwrap().unwrap().body, b"0123456789");
    }

    #[test]
    fn invalid_header_is_fatal() {
        let mut framer = Framer::new();
        framer.feed(&[b'Q', 0, 0, 0, 3]); // length < 4
        assert!(framer.next_frame().is_err());
    }

    #[test]
    fn copy_mode_yields_data_then_final() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&frame_bytes(b'd', b"1\n"));
        stream.extend_from_slice(&frame_bytes(b'd', b"2\n"));
        stream.extend_from_slice(&frame_bytes(b'c', b""));
        stream.extend_from_slice(&frame_bytes(b'C', b"COPY 2\0"));

        let mut framer = Framer::new();
        framer.feed(&stream);

        match framer.next_copy_event(b'd').unwrap().unwrap() {
            CopyEvent::Data(d) => assert_eq!(d, b"1\n"),
            CopyEvent::Final(_) => panic!("expected data"),
        }
        match framer.next_copy_event(b'd').unwrap().unwrap() {
            CopyEvent::Data(d) => assert_eq!(d, b"2\n"),
            CopyEvent::Final(_) => panic!("expected data"),
        }
        match framer.next_copy_event(b'd').unwrap().unwrap() {
            CopyEvent::Final(f) => assert_eq!(f.kind, b'c'),
            CopyEvent::Data(_) => panic!("expected final"),
        }
        // Back in normal mode the trailing frame is still there.
        let f = framer.next_frame().unwrap().unwrap();
        assert_eq!(f.kind, b'C');
    }

    #[test]
    fn compaction_keeps_pending_bytes() {
        let mut framer = Framer::new();
        for _ in 0..10 {
            framer.feed(&frame_bytes(b'D', &[0u8; 1024]));
        }
        let partial = frame_bytes(b'Z', b"I");
        framer.feed(&partial[..3]);
        while framer.next_frame().unwrap().is_some() {}
        framer.feed(&partial[3..]);
        let f = framer.next_frame().unwrap().unwrap();
        assert_eq!((f.kind, f.body.as_slice()), (b'Z', &b"I"[..]));
    }
}
