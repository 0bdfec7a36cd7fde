//! One streamed request: the writer half and the concurrently awaited
//! response.
//!
//! The writer half runs on the uploader's blocking thread. Rendered bytes
//! pass through a small buffer, the optional gzip compressor and finally
//! [`BodyWriter`], which hands fixed size chunks to the HTTP client over a
//! channel of capacity one. A slow sink therefore blocks the renderer, not
//! memory. Dropping the writer ends the request body, which is what lets the
//! sink answer.

use std::{
    convert::Infallible,
    io::{self, BufWriter, Write},
};

use bytes::{Bytes, BytesMut};
use flate2::{Compression, write::GzEncoder};
use http_body_util::StreamBody;
use hyper::body::Frame;
use metrics::counter;
use rand::rngs::SmallRng;
use sweep_payload::{Payload, Render};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;

use super::Error;
use crate::work::WorkItem;

const WRITE_BUFFER_BYTES: usize = 16 * 1024;
const BODY_CHUNK_BYTES: usize = 64 * 1024;

/// A single frame of a streamed request body.
pub(crate) type Chunk = Result<Frame<Bytes>, Infallible>;

/// The streamed request body handed to the HTTP client.
pub type Body = StreamBody<ReceiverStream<Chunk>>;

/// Construct the two ends of a streamed request body.
pub(crate) fn body() -> (BodyWriter, Body) {
    let (writer, rcv) = channel();
    (writer, StreamBody::new(ReceiverStream::new(rcv)))
}

fn channel() -> (BodyWriter, mpsc::Receiver<Chunk>) {
    let (snd, rcv) = mpsc::channel(1);
    (
        BodyWriter {
            buf: BytesMut::with_capacity(BODY_CHUNK_BYTES),
            snd,
        },
        rcv,
    )
}

/// Blocking [`Write`] end of a streamed request body.
#[derive(Debug)]
pub(crate) struct BodyWriter {
    buf: BytesMut,
    snd: mpsc::Sender<Chunk>,
}

impl BodyWriter {
    fn send(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        let len = chunk.len() as u64;
        self.snd
            .blocking_send(Ok(Frame::data(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "request body closed"))?;
        counter!("bytes_written").increment(len);
        Ok(())
    }
}

impl Write for BodyWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= BODY_CHUNK_BYTES {
            self.send()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send()
    }
}

/// Optional compression between the renderer and the request body.
#[derive(Debug)]
pub(crate) enum Encoder {
    Identity(BodyWriter),
    Gzip(GzEncoder<BodyWriter>),
}

impl Encoder {
    pub(crate) fn new(body: BodyWriter, compress: bool) -> Self {
        if compress {
            Self::Gzip(GzEncoder::new(body, Compression::fast()))
        } else {
            Self::Identity(body)
        }
    }

    /// Write any trailer and push the remaining bytes into the body. The body
    /// ends once the returned writer is dropped.
    pub(crate) fn finish(self) -> io::Result<BodyWriter> {
        let mut body = match self {
            Self::Identity(body) => body,
            Self::Gzip(gz) => gz.finish()?,
        };
        body.flush()?;
        Ok(body)
    }
}

impl Write for Encoder {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Self::Identity(body) => body.write(data),
            Self::Gzip(gz) => gz.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Identity(body) => body.flush(),
            Self::Gzip(gz) => gz.flush(),
        }
    }
}

/// An open request with its writer half and the task awaiting the response.
#[derive(Debug)]
pub(crate) struct Session {
    writer: BufWriter<Encoder>,
    response: JoinHandle<Result<(), Error>>,
    items: u32,
}

impl Session {
    pub(crate) fn new(
        body: BodyWriter,
        compress: bool,
        response: JoinHandle<Result<(), Error>>,
    ) -> Self {
        Self {
            writer: BufWriter::with_capacity(WRITE_BUFFER_BYTES, Encoder::new(body, compress)),
            response,
            items: 0,
        }
    }

    /// Number of work items streamed into this request so far.
    pub(crate) fn items(&self) -> u32 {
        self.items
    }

    /// Whether the sink answered before the body was complete.
    pub(crate) fn answered(&self) -> bool {
        self.response.is_finished()
    }

    pub(crate) fn render(
        &mut self,
        payload: &Payload,
        rng: &mut SmallRng,
        item: &WorkItem,
    ) -> Result<(), Error> {
        payload.render(rng, item, &mut self.writer)?;
        self.items += 1;
        Ok(())
    }

    /// Abandon the request because of `cause`, returning the error that best
    /// explains the failure.
    pub(crate) fn fail(self, runtime: &Handle, cause: Error) -> Error {
        let Session {
            writer, response, ..
        } = self;
        drop(writer);
        settle(runtime, response, cause)
    }

    /// End the body and wait for the sink's answer. Returns the number of
    /// items the request carried.
    pub(crate) fn close(self, runtime: &Handle) -> Result<u32, Error> {
        let Session {
            writer,
            response,
            items,
        } = self;
        let finished = match writer.into_inner() {
            Ok(encoder) => encoder.finish(),
            Err(err) => Err(err.into_error()),
        };
        match finished {
            Ok(body) => drop(body),
            Err(source) => return Err(settle(runtime, response, source.into())),
        }
        runtime.block_on(response)??;
        Ok(items)
    }
}

/// A closed body means the client gave up on the request, in which case the
/// response task holds the real reason. Anything else is a local failure and
/// the in-flight request is cancelled.
fn settle(runtime: &Handle, response: JoinHandle<Result<(), Error>>, cause: Error) -> Error {
    if cause.is_body_closed() || response.is_finished() {
        if let Ok(Err(err)) = runtime.block_on(response) {
            return err;
        }
    } else {
        response.abort();
    }
    cause
}
