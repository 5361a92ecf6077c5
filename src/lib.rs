//! evbench: a request/response network benchmark harness
//!
//! A server answers fixed-protocol requests using a choice of event-handling
//! strategies, and a multi-threaded client drives concurrent connections
//! while recording per-request round-trip latency, so the strategies can be
//! compared under controlled, repeatable load.
//!
//! Pieces:
//! - Bounded, blocking worker pool with back-pressure and two shutdown modes
//! - Readiness-notification backends: epoll, kqueue, poll, select
//! - Event-driven and thread-per-connection server architectures
//! - Load-driving client with windowed latency sampling to CSV

pub mod client;
pub mod config;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod server;

pub use config::{ClientConfig, ServerConfig, ServerMode};
pub use pool::{SubmitError, WorkerPool};
pub use registry::ConnectionRegistry;
pub use runtime::Mechanism;
pub use server::{EventServer, ShutdownHandle, ThreadedServer};
