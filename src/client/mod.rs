//! Multi-threaded load-generating client.
//!
//! Spawns a fixed number of connection threads; each opens one TCP
//! connection and issues back-to-back requests, timing round trips per
//! configured window and recording samples into the shared [`SampleSink`].
//! A window that meets the configured timeout marks the connection as
//! degraded: the thread stops issuing requests, flushes what it has, and
//! closes cleanly. The driver reports the mean per-connection wall-clock
//! duration across all threads that completed.

mod sink;

pub use sink::{Sample, SampleSink, CSV_HEADER};

use crate::config::ClientConfig;
use crate::protocol::encode_request;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Samples buffered per thread before taking the sink lock.
pub const SAMPLE_BATCH: usize = 10;

/// Outcome of one full driver run.
#[derive(Debug, Clone, Copy)]
pub struct DriverSummary {
    pub completed: usize,
    pub failed: usize,
    /// Mean wall-clock duration of the completed connections.
    pub mean_connection_time: Duration,
}

/// Run the load driver against the configured server, writing samples to
/// the configured CSV file.
pub fn run(config: &ClientConfig) -> io::Result<DriverSummary> {
    let file = File::create(&config.output).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("unable to open {}: {e}", config.output.display()),
        )
    })?;
    let sink = SampleSink::new(BufWriter::new(file))?;

    let summary = run_with_sink(config, &sink)?;

    sink.into_inner()?;
    Ok(summary)
}

/// Driver loop against a caller-supplied sink.
pub fn run_with_sink<W: Write + Send>(
    config: &ClientConfig,
    sink: &SampleSink<W>,
) -> io::Result<DriverSummary> {
    info!(
        host = %config.host,
        port = config.port,
        message_size = config.message_size,
        message_count = config.message_count,
        clients = config.clients,
        timeout_secs = config.timeout,
        "Starting load run"
    );

    let results = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(config.clients);
        for thread_id in 1..=config.clients {
            handles.push(scope.spawn(move || drive_connection(config, thread_id, sink)));
            // Stagger spawns so a large client count does not arrive as a
            // single connect burst.
            thread::sleep(Duration::from_millis(1));
        }

        handles
            .into_iter()
            .enumerate()
            .map(|(i, handle)| {
                handle.join().unwrap_or_else(|_| {
                    Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("client thread {} panicked", i + 1),
                    ))
                })
            })
            .collect::<Vec<_>>()
    });

    let mut total = Duration::ZERO;
    let mut completed = 0;
    let mut failed = 0;
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(elapsed) => {
                total += elapsed;
                completed += 1;
            }
            Err(e) => {
                warn!(thread = i + 1, error = %e, "Client thread failed");
                failed += 1;
            }
        }
    }

    if completed == 0 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "every client thread failed",
        ));
    }

    Ok(DriverSummary {
        completed,
        failed,
        mean_connection_time: total / completed as u32,
    })
}

/// One connection's request loop. Returns the connection's wall-clock
/// duration from connect to close.
fn drive_connection<W: Write>(
    config: &ClientConfig,
    thread_id: usize,
    sink: &SampleSink<W>,
) -> io::Result<Duration> {
    let mut stream = TcpStream::connect((config.host.as_str(), config.port))?;

    let frame = encode_request(config.message_size);
    let mut response = vec![0u8; config.message_size as usize];
    let per_record = config.messages_per_record.max(1);

    let mut samples: Vec<Sample> = Vec::with_capacity(SAMPLE_BATCH);
    let connection_timer = Instant::now();
    let mut window_timer = Instant::now();
    let mut window_first = 1u64;

    for i in 0..config.message_count {
        if i % per_record == 0 {
            window_timer = Instant::now();
            window_first = i + 1;
        }

        stream.write_all(&frame)?;
        // A peer close mid-response surfaces as UnexpectedEof: fatal for
        // this thread.
        stream.read_exact(&mut response)?;

        let window_done = i % per_record == per_record - 1 || i == config.message_count - 1;
        if !window_done {
            continue;
        }

        let seconds = window_timer.elapsed().as_secs_f64();
        samples.push(Sample {
            thread_id,
            first_seq: window_first,
            last_seq: i + 1,
            message_size: config.message_size,
            seconds,
        });
        if samples.len() == SAMPLE_BATCH {
            sink.append(&samples)?;
            samples.clear();
        }

        if seconds >= config.timeout {
            debug!(
                thread = thread_id,
                window_seconds = seconds,
                "Round trip exceeded timeout, stopping early"
            );
            break;
        }
    }

    if !samples.is_empty() {
        sink.append(&samples)?;
    }
    drop(stream);

    Ok(connection_timer.elapsed())
}
