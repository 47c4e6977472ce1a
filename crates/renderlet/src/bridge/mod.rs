//! IPC bridge for renderlet supervisor-worker communication.
//!
//! This module provides the wire protocol and codec for communication between
//! the supervisor (parent) and each worker.
//!
//! # Architecture
//!
//! - **protocol**: Message types (ControlMessage, WorkerMessage)
//! - **codec**: newline-delimited JSON framing for AsyncRead/AsyncWrite
//! - **channel**: stdio and in-memory channel endpoints

pub mod channel;
pub mod codec;
pub mod protocol;
