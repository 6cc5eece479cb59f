//! Connection-to-connection COPY transfer.
//!
//! [`CopyManager`] pumps framed COPY data from one producer to one or more
//! receivers. Each cycle reads the next chunk from the producer and writes
//! it to every active receiver, with per-party fault isolation:
//!
//! - a receiver fault deactivates that receiver and surfaces
//!   [`CopyFault::Receiver`]; the caller may repair it, call
//!   [`CopyManager::reconcile`], and resume [`CopyManager::run`]
//! - a producer fault surfaces [`CopyFault::Producer`] with no state change
//! - an abandoned manager sends `CopyFail` upstream to every still-active
//!   receiver on drop
//!
//! [`CopyFault::Receiver`]: crate::error::CopyFault::Receiver
//! [`CopyFault::Producer`]: crate::error::CopyFault::Producer

use crate::connection::{CopyReader, CopyWriter};
use crate::error::{CopyFault, Error, Result};

/// Source of COPY data chunks.
pub trait CopySource {
    /// Produce the next chunk, `None` at end of stream.
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// Called once after the stream is exhausted.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called on abnormal exit. Best-effort.
    fn abort(&mut self, _reason: &str) {}
}

/// Sink for COPY data chunks.
pub trait CopySink {
    /// Deliver one chunk.
    fn receive(&mut self, chunk: &[u8]) -> Result<()>;

    /// Complete the transfer; returns the rows loaded when known.
    fn finish(&mut self) -> Result<Option<u64>>;

    /// Abort the transfer upstream. Best-effort.
    fn abort(&mut self, _reason: &str) {}
}

impl CopySource for CopyReader<'_> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        CopyReader::next_chunk(self)
    }
}

impl CopySink for CopyWriter<'_> {
    fn receive(&mut self, chunk: &[u8]) -> Result<()> {
        self.send_buffered(chunk)?;
        self.flush()
    }

    fn finish(&mut self) -> Result<Option<u64>> {
        self.finish_mut()
    }

    fn abort(&mut self, reason: &str) {
        let _ = self.fail_mut(reason);
    }
}

/// Adapter: any chunk iterator as a producer.
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I> {
    /// Wrap an iterator of raw COPY chunks.
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<I: Iterator<Item = Vec<u8>>> CopySource for IterSource<I> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.iter.next())
    }
}

/// Adapter: any callable as a receiver.
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F> {
    /// Wrap a chunk callback.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F: FnMut(&[u8]) -> Result<()>> CopySink for FnSink<F> {
    fn receive(&mut self, chunk: &[u8]) -> Result<()> {
        (self.f)(chunk)
    }

    fn finish(&mut self) -> Result<Option<u64>> {
        Ok(None)
    }
}

/// Transfer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Chunks pumped
    pub chunks: u64,
    /// Bytes pumped
    pub bytes: u64,
    /// Rows reported by receivers that finished with a count
    pub rows: Option<u64>,
}

struct Slot<'a> {
    sink: Box<dyn CopySink + 'a>,
    active: bool,
}

/// Pump coordinating one producer and any number of receivers.
pub struct CopyManager<'a> {
    producer: Box<dyn CopySource + 'a>,
    receivers: Vec<Slot<'a>>,
    stats: CopyStats,
    /// Chunk read but not yet delivered to every receiver, with the index
    /// of the next receiver it is owed to.
    pending: Option<(Vec<u8>, usize)>,
    finished: bool,
}

impl<'a> CopyManager<'a> {
    /// Create a manager over a producer.
    pub fn new(producer: impl CopySource + 'a) -> Self {
        Self {
            producer: Box::new(producer),
            receivers: Vec::new(),
            stats: CopyStats::default(),
            pending: None,
            finished: false,
        }
    }

    /// Add a receiver; returns its index for fault reports.
    pub fn add_receiver(&mut self, sink: impl CopySink + 'a) -> usize {
        self.receivers.push(Slot {
            sink: Box::new(sink),
            active: true,
        });
        self.receivers.len() - 1
    }

    /// Progress so far.
    pub fn stats(&self) -> CopyStats {
        self.stats
    }

    /// Readmit a receiver deactivated by a fault. Must happen before the
    /// next [`CopyManager::run`] cycle; the chunk that faulted is not
    /// redelivered.
    pub fn reconcile(&mut self, index: usize) -> Result<()> {
        if self.finished {
            return Err(Error::State("copy transfer already finished".into()));
        }
        let slot = self
            .receivers
            .get_mut(index)
            .ok_or_else(|| Error::InvalidUsage(format!("no receiver #{}", index)))?;
        // Skip the chunk the receiver missed while inactive.
        if let Some((_, owed_from)) = &mut self.pending
            && *owed_from <= index
        {
            *owed_from = index + 1;
        }
        slot.active = true;
        Ok(())
    }

    /// Pump until the producer is exhausted, then finish every party.
    ///
    /// Restartable after a [`CopyFault::Receiver`] (optionally preceded by
    /// [`CopyManager::reconcile`]) or a trapped producer fault.
    pub fn run(&mut self) -> Result<CopyStats> {
        if self.finished {
            return Err(Error::State("copy transfer already finished".into()));
        }

        loop {
            // Finish delivering a chunk interrupted by a receiver fault.
            if let Some((chunk, owed_from)) = self.pending.take() {
                self.deliver(chunk, owed_from)?;
            }

            let chunk = self
                .producer
                .next_chunk()
                .map_err(|e| CopyFault::Producer {
                    source: Box::new(e),
                })?;

            match chunk {
                Some(chunk) => {
                    self.stats.chunks += 1;
                    self.stats.bytes += chunk.len() as u64;
                    if self.stats.chunks % 4096 == 0 {
                        tracing::debug!(
                            chunks = self.stats.chunks,
                            bytes = self.stats.bytes,
                            "copy transfer progress"
                        );
                    }
                    self.deliver(chunk, 0)?;
                }
                None => {
                    return self.complete();
                }
            }
        }
    }

    fn deliver(&mut self, chunk: Vec<u8>, from: usize) -> Result<()> {
        for index in from..self.receivers.len() {
            let slot = &mut self.receivers[index];
            if !slot.active {
                continue;
            }
            if let Err(e) = slot.sink.receive(&chunk) {
                slot.active = false;
                self.pending = Some((chunk, index + 1));
                return Err(CopyFault::Receiver {
                    index,
                    source: Box::new(e),
                }
                .into());
            }
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<CopyStats> {
        self.finished = true;

        let mut errors = Vec::new();
        if let Err(e) = self.producer.finish() {
            errors.push(e);
        }

        let mut rows: Option<u64> = None;
        for slot in &mut self.receivers {
            if !slot.active {
                continue;
            }
            match slot.sink.finish() {
                Ok(Some(n)) => rows = Some(rows.unwrap_or(0) + n),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }
        self.stats.rows = rows;

        if errors.is_empty() {
            tracing::debug!(
                chunks = self.stats.chunks,
                bytes = self.stats.bytes,
                "copy transfer complete"
            );
            Ok(self.stats)
        } else {
            Err(CopyFault::Aborted {
                reason: "completion failed".into(),
                errors,
            }
            .into())
        }
    }
}

impl Drop for CopyManager<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Abnormal exit: fail the transfer on every still-active party.
        self.producer.abort("copy transfer abandoned");
        for slot in &mut self.receivers {
            if slot.active {
                slot.sink.abort("copy transfer abandoned");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn chunks(data: &[&str]) -> IterSource<std::vec::IntoIter<Vec<u8>>> {
        IterSource::new(
            data.iter()
                .map(|s| s.as_bytes().to_vec())
                .collect::<Vec<_>>()
                .into_iter(),
        )
    }

    #[test]
    fn pumps_every_chunk_to_every_receiver() {
        let a = Rc::new(RefCell::new(Vec::new()));
        let b = Rc::new(RefCell::new(Vec::new()));

        let mut manager = CopyManager::new(chunks(&["1\n", "2\n", "3\n"]));
        let a2 = Rc::clone(&a);
        manager.add_receiver(FnSink::new(move |chunk: &[u8]| {
            a2.borrow_mut().extend_from_slice(chunk);
            Ok(())
        }));
        let b2 = Rc::clone(&b);
        manager.add_receiver(FnSink::new(move |chunk: &[u8]| {
            b2.borrow_mut().extend_from_slice(chunk);
            Ok(())
        }));

        let stats = manager.run().unwrap();
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.bytes, 6);
        assert_eq!(a.borrow().as_slice(), b"1\n2\n3\n");
        assert_eq!(b.borrow().as_slice(), b"1\n2\n3\n");
    }

    #[test]
    fn receiver_fault_is_isolated() {
        let good = Rc::new(RefCell::new(Vec::new()));

        let mut manager = CopyManager::new(chunks(&["1\n", "2\n"]));
        let mut deliveries = 0;
        manager.add_receiver(FnSink::new(move |_: &[u8]| {
            deliveries += 1;
            if deliveries == 2 {
                Err(Error::Decode("disk full".into()))
            } else {
                Ok(())
            }
        }));
        let good2 = Rc::clone(&good);
        manager.add_receiver(FnSink::new(move |chunk: &[u8]| {
            good2.borrow_mut().extend_from_slice(chunk);
            Ok(())
        }));

        let err = manager.run().unwrap_err();
        match err {
            Error::Copy(CopyFault::Receiver { index, .. }) => assert_eq!(index, 0),
            other => panic!("unexpected error: {other}"),
        }

        // The healthy receiver still completes once resumed.
        let stats = manager.run().unwrap();
        assert_eq!(stats.chunks, 2);
        assert_eq!(good.borrow().as_slice(), b"1\n2\n");
    }

    #[test]
    fn reconcile_readmits() {
        let mut manager = CopyManager::new(chunks(&["1\n", "2\n", "3\n"]));
        let counter = Rc::new(RefCell::new(0u32));
        let c2 = Rc::clone(&counter);
        manager.add_receiver(FnSink::new(move |_: &[u8]| {
            let mut n = c2.borrow_mut();
            *n += 1;
            if *n == 1 {
                Err(Error::Decode("transient".into()))
            } else {
                Ok(())
            }
        }));

        assert!(manager.run().is_err());
        manager.reconcile(0).unwrap();
        let stats = manager.run().unwrap();
        assert_eq!(stats.chunks, 3);
        // First chunk faulted and is not redelivered; two more were seen.
        assert_eq!(*counter.borrow(), 3);
    }

    #[test]
    fn producer_fault_keeps_state() {
        struct FailingSource {
            sent: bool,
        }
        impl CopySource for FailingSource {
            fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
                if self.sent {
                    Err(Error::Decode("read failed".into()))
                } else {
                    self.sent = true;
                    Ok(Some(b"1\n".to_vec()))
                }
            }
        }

        let seen = Rc::new(RefCell::new(0u32));
        let mut manager = CopyManager::new(FailingSource { sent: false });
        let s2 = Rc::clone(&seen);
        manager.add_receiver(FnSink::new(move |_: &[u8]| {
            *s2.borrow_mut() += 1;
            Ok(())
        }));

        let err = manager.run().unwrap_err();
        assert!(matches!(err, Error::Copy(CopyFault::Producer { .. })));
        assert_eq!(*seen.borrow(), 1);
    }
}
