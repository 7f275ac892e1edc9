//! Progress reporting interface
//!
//! The UI that renders progress lives outside this crate; the resolver and
//! unpacker only talk to the [`ProgressSink`] trait. [`NullProgress`] is the
//! default sink for callers that do not render anything.

use std::io::Read;

/// Display unit for byte counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteUnit {
    KiB,
    MiB,
}

impl ByteUnit {
    /// Pick a display unit from an optional content-length hint.
    ///
    /// Transfers of at least one MiB count in MiB; everything else (including
    /// transfers of unknown length) counts in KiB.
    pub fn for_hint(total_hint: Option<u64>) -> ByteUnit {
        match total_hint {
            Some(len) if len >= 1024 * 1024 => ByteUnit::MiB,
            _ => ByteUnit::KiB,
        }
    }
}

/// Sink for resolver progress events.
///
/// Implementations are expected to use interior mutability; the resolver
/// holds a shared reference for the whole traversal.
pub trait ProgressSink {
    /// The known size of the dependency graph grew to `packages` entries.
    ///
    /// Called after each manifest pre-scan, before any fetch work starts, so
    /// a renderer can show a meaningful total up front.
    fn estimated_total(&self, packages: usize) {
        let _ = packages;
    }

    /// One package finished resolving.
    fn complete_one(&self) {}

    /// A byte transfer is starting.
    fn start_bytes(&self, total_hint: Option<u64>, unit: ByteUnit) {
        let _ = (total_hint, unit);
    }

    /// Bytes were read from the current transfer.
    fn bytes_read(&self, count: u64) {
        let _ = count;
    }
}

/// A sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}

/// Transparent reader adapter that reports bytes read to a sink.
pub struct ProgressReader<'a, R> {
    inner: R,
    sink: &'a dyn ProgressSink,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub fn new(inner: R, sink: &'a dyn ProgressSink, total_hint: Option<u64>) -> Self {
        sink.start_bytes(total_hint, ByteUnit::for_hint(total_hint));
        ProgressReader { inner, sink }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.sink.bytes_read(n as u64);
        Ok(n)
    }
}
