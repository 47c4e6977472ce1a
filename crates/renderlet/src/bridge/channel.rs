//! Control channel endpoints.
//!
//! - **stdio**: child-process side, the worker talks over its own stdin/stdout
//! - **duplex**: in-memory pair for in-process workers and tests

use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::JsonLinesCodec;
use super::protocol::{ControlMessage, WorkerMessage};

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Buffer size of each direction of an in-memory channel.
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Supervisor side of a worker's control channel.
pub struct SupervisorEnd {
    pub sender: FramedWrite<BoxedWriter, JsonLinesCodec<ControlMessage>>,
    pub receiver: FramedRead<BoxedReader, JsonLinesCodec<WorkerMessage>>,
}

impl SupervisorEnd {
    pub fn new(
        reader: impl AsyncRead + Send + 'static,
        writer: impl AsyncWrite + Send + 'static,
    ) -> Self {
        Self {
            sender: FramedWrite::new(Box::pin(writer), JsonLinesCodec::new()),
            receiver: FramedRead::new(Box::pin(reader), JsonLinesCodec::new()),
        }
    }
}

/// Worker side of the control channel.
pub struct WorkerEnd {
    pub receiver: FramedRead<BoxedReader, JsonLinesCodec<ControlMessage>>,
    pub sender: FramedWrite<BoxedWriter, JsonLinesCodec<WorkerMessage>>,
}

impl WorkerEnd {
    pub fn new(
        reader: impl AsyncRead + Send + 'static,
        writer: impl AsyncWrite + Send + 'static,
    ) -> Self {
        Self {
            receiver: FramedRead::new(Box::pin(reader), JsonLinesCodec::new()),
            sender: FramedWrite::new(Box::pin(writer), JsonLinesCodec::new()),
        }
    }

    /// Channel of a worker process spawned by the supervisor.
    ///
    /// stdout belongs to the protocol from here on; logging must go to stderr.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

/// Connected in-memory channel pair.
pub fn duplex_pair() -> (SupervisorEnd, WorkerEnd) {
    let (supervisor_io, worker_io) = tokio::io::duplex(DUPLEX_BUFFER);
    let (supervisor_read, supervisor_write) = tokio::io::split(supervisor_io);
    let (worker_read, worker_write) = tokio::io::split(worker_io);

    (
        SupervisorEnd::new(supervisor_read, supervisor_write),
        WorkerEnd::new(worker_read, worker_write),
    )
}
