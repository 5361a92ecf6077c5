//! Append-only sink for latency samples.
//!
//! Connection threads buffer samples locally and append a whole batch under
//! one lock acquisition, so the sink mutex is touched once per
//! [`SAMPLE_BATCH`](super::SAMPLE_BATCH) round trips instead of once per
//! sample. Ordering across threads is not guaranteed; each thread's own
//! samples land in sequence order.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Header row of the results CSV.
pub const CSV_HEADER: &str = "Thread ID,Message Range,Message Size,Seconds";

/// One timed window of round trips from a single connection thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub thread_id: usize,
    /// First message sequence number covered by this window (1-based).
    pub first_seq: u64,
    /// Last message sequence number covered by this window.
    pub last_seq: u64,
    pub message_size: u32,
    pub seconds: f64,
}

/// Mutex-protected CSV writer shared by all connection threads.
pub struct SampleSink<W: Write> {
    out: Mutex<W>,
    recorded: AtomicU64,
}

impl<W: Write> SampleSink<W> {
    /// Wrap a writer and emit the CSV header.
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{CSV_HEADER}")?;
        Ok(Self {
            out: Mutex::new(out),
            recorded: AtomicU64::new(0),
        })
    }

    /// Append a batch of samples under a single lock acquisition.
    pub fn append(&self, samples: &[Sample]) -> io::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        for sample in samples {
            writeln!(
                out,
                "{},{} to {},{},{}",
                sample.thread_id,
                sample.first_seq,
                sample.last_seq,
                sample.message_size,
                sample.seconds
            )?;
        }
        self.recorded.fetch_add(samples.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Total samples appended so far.
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Flush and recover the underlying writer.
    pub fn into_inner(self) -> io::Result<W> {
        let mut out = self.out.into_inner().unwrap_or_else(|e| e.into_inner());
        out.flush()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(thread_id: usize, first: u64, last: u64, seconds: f64) -> Sample {
        Sample {
            thread_id,
            first_seq: first,
            last_seq: last,
            message_size: 1024,
            seconds,
        }
    }

    #[test]
    fn test_header_and_row_format() {
        let sink = SampleSink::new(Vec::new()).unwrap();
        sink.append(&[sample(1, 1, 1, 0.25)]).unwrap();

        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert_eq!(lines.next(), Some("1,1 to 1,1024,0.25"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_batched_append_counts_samples() {
        let sink = SampleSink::new(Vec::new()).unwrap();
        let batch: Vec<Sample> = (0..10).map(|i| sample(2, i + 1, i + 1, 0.001)).collect();

        sink.append(&batch).unwrap();
        sink.append(&[sample(2, 11, 11, 0.002)]).unwrap();
        assert_eq!(sink.recorded(), 11);

        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(out.lines().count(), 12); // header + 11 rows
    }

    #[test]
    fn test_windowed_range_covers_multiple_messages() {
        let sink = SampleSink::new(Vec::new()).unwrap();
        sink.append(&[sample(3, 1, 5, 0.5)]).unwrap();

        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert!(out.contains("3,1 to 5,1024,0.5"));
    }
}
