//! The HTTP uploader.
//!
//! Each uploader owns one blocking thread. It pulls work items from the
//! shared queue and renders them straight into the body of an open POST
//! request while a task on the runtime drives the request and waits for the
//! sink's answer. A request carries at most `max_items_per_request` items,
//! or every item the uploader receives when that limit is unset.
//!
//! The sink must answer 204 No Content. Any other answer, or a transport
//! failure, ends the uploader with an error carrying the response body.

use std::{
    io,
    num::NonZeroU32,
    time::{SystemTime, UNIX_EPOCH},
};

use http::{HeaderValue, Method, Request, StatusCode, Uri, header};
use http_body_util::BodyExt;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use metrics::counter;
use rand::{SeedableRng, rngs::SmallRng};
use sweep_payload::Payload;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::{
    config::Config,
    counters::Counters,
    signals::Watcher,
    work::{WorkItem, WorkReceiver},
};

mod session;

pub use session::Body;
use session::Session;

/// The status a sink answers with once it has accepted a request.
pub const ACCEPTED: StatusCode = StatusCode::NO_CONTENT;

/// HTTP client shared by every uploader.
pub type HttpClient = Client<HttpConnector, Body>;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Uploader`].
pub enum Error {
    /// The request could not be sent or no response arrived
    #[error("request to {uri} failed: {source}")]
    Request {
        /// The sink
        uri: Uri,
        /// Underlying client error
        #[source]
        source: Box<hyper_util::client::legacy::Error>,
    },
    /// The sink answered with something other than 204
    #[error("unexpected response code {status} from {uri}: {body}")]
    Status {
        /// The sink
        uri: Uri,
        /// The status the sink answered with
        status: StatusCode,
        /// The response body, lossily decoded
        body: String,
    },
    /// Rendering a series failed
    #[error(transparent)]
    Render(#[from] sweep_payload::Error),
    /// Writing the request body failed
    #[error("failed to write request body: {0}")]
    Io(#[from] io::Error),
    /// The request could not be built
    #[error(transparent)]
    Http(#[from] http::Error),
    /// The response task panicked or was cancelled
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether the error means the HTTP client stopped reading the body.
    fn is_body_closed(&self) -> bool {
        let source = match self {
            Self::Io(source) | Self::Render(sweep_payload::Error::Io(source)) => source,
            _ => return false,
        };
        source.kind() == io::ErrorKind::BrokenPipe
    }
}

/// Build the client every uploader shares. Idle connections are kept for
/// reuse, up to one per uploader.
#[must_use]
pub fn client(workers: usize) -> HttpClient {
    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(workers)
        .retry_canceled_requests(false)
        .build_http()
}

/// What one uploader accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Requests the sink accepted
    pub requests: u64,
    /// Work items carried by those requests
    pub items: u64,
}

#[derive(Debug)]
/// Streams rendered work items to the sink.
pub struct Uploader {
    id: usize,
    client: HttpClient,
    sink: Uri,
    compress: bool,
    limit: Option<NonZeroU32>,
    seed: Option<u64>,
    payload: Payload,
    queue: WorkReceiver,
    counters: Counters,
    halt: Watcher,
    runtime: Handle,
}

impl Uploader {
    /// Create a new [`Uploader`] instance.
    ///
    /// Requests are driven by the current tokio runtime, so this must be
    /// called from within one. The uploader itself must be spun from a thread
    /// where blocking is allowed. Once `halt` is signaled the uploader stops
    /// taking work.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn new(
        id: usize,
        config: &Config,
        payload: Payload,
        client: HttpClient,
        queue: WorkReceiver,
        counters: Counters,
        halt: Watcher,
    ) -> Self {
        Self {
            id,
            client,
            sink: config.sink.clone(),
            compress: config.compress,
            limit: config.request_limit(),
            seed: config.seed,
            payload,
            queue,
            counters,
            halt,
            runtime: Handle::current(),
        }
    }

    /// Run the uploader until the work queue is closed and drained, or until
    /// halted.
    ///
    /// # Errors
    ///
    /// Returns the first failure of any request this uploader made.
    pub fn spin(self) -> Result<Summary, Error> {
        let mut summary = Summary::default();
        while let Some(first) = self.next_item() {
            let mut rng = self.stream_rng(summary.requests);
            let mut session = self.open()?;
            let mut next = Some(first);
            while let Some(item) = next.take() {
                if let Err(err) = session.render(&self.payload, &mut rng, &item) {
                    return Err(session.fail(&self.runtime, err));
                }
                self.counters.add_rows(u64::from(item.rows));
                // A sink that answers early has stopped reading. Its status
                // decides the request, a 204 accepts what it took so far.
                if session.answered() || self.limit.is_some_and(|l| session.items() >= l.get()) {
                    break;
                }
                next = self.next_item();
            }
            debug!(uploader = self.id, "closing request body, awaiting response");
            let items = session.close(&self.runtime)?;
            summary.requests += 1;
            summary.items += u64::from(items);
        }
        info!(
            uploader = self.id,
            requests = summary.requests,
            items = summary.items,
            "work queue drained"
        );
        Ok(summary)
    }

    fn next_item(&self) -> Option<WorkItem> {
        if self.halt.try_recv() {
            debug!(uploader = self.id, "halted, taking no more work");
            return None;
        }
        self.queue.recv().ok()
    }

    fn open(&self) -> Result<Session, Error> {
        let (writer, body) = session::body();
        let mut request = Request::builder().method(Method::POST).uri(self.sink.clone());
        if self.compress {
            request = request.header(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        let request = request.body(body)?;
        let response = self
            .runtime
            .spawn(exchange(self.client.clone(), request, self.sink.clone()));
        debug!(uploader = self.id, sink = %self.sink, "request opened");
        Ok(Session::new(writer, self.compress, response))
    }

    /// Random stream for the uploader's `stream`th request. Seeded runs mix
    /// the configured seed with the uploader id and request ordinal so no two
    /// streams coincide.
    fn stream_rng(&self, stream: u64) -> SmallRng {
        let id = self.id as u64;
        let seed = match self.seed {
            Some(seed) => seed,
            None => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| {
                    d.as_secs()
                        .wrapping_mul(1_000_000_000)
                        .wrapping_add(u64::from(d.subsec_nanos()))
                }),
        };
        // Weyl increment, keeps nearby ids apart.
        let seed = seed
            .wrapping_add(id.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            .wrapping_add(stream.rotate_left(32));
        SmallRng::seed_from_u64(seed)
    }
}

/// Drive one request and interpret the sink's answer.
async fn exchange(client: HttpClient, request: Request<Body>, uri: Uri) -> Result<(), Error> {
    counter!("requests_sent").increment(1);
    let response = match client.request(request).await {
        Ok(response) => response,
        Err(source) => {
            counter!("request_failure").increment(1);
            return Err(Error::Request {
                uri,
                source: Box::new(source),
            });
        }
    };
    let status = response.status();
    if status == ACCEPTED {
        counter!("request_ok").increment(1);
        return Ok(());
    }
    counter!("request_failure").increment(1);
    let body = match response.into_body().collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
        Err(err) => format!("<unreadable response body: {err}>"),
    };
    Err(Error::Status { uri, status, body })
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;

    #[test]
    fn broken_pipe_marks_closed_body() {
        let closed = io::Error::new(ErrorKind::BrokenPipe, "gone");
        assert!(Error::Io(closed).is_body_closed());
        let closed = io::Error::new(ErrorKind::BrokenPipe, "gone");
        assert!(Error::Render(sweep_payload::Error::Io(closed)).is_body_closed());

        let other = io::Error::other("disk on fire");
        assert!(!Error::Io(other).is_body_closed());
        assert!(!Error::Render(sweep_payload::Error::Digits(20)).is_body_closed());
    }

    #[test]
    fn status_error_carries_body() {
        let err = Error::Status {
            uri: Uri::from_static("http://localhost:8428/api/v1/import"),
            status: StatusCode::BAD_REQUEST,
            body: "cannot parse line".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected response code 400 Bad Request from \
             http://localhost:8428/api/v1/import: cannot parse line"
        );
    }

    #[tokio::test]
    async fn streams_get_distinct_seeds() {
        use rand::RngCore;

        let (_snd, rcv) = crate::work::queue();
        let (halt, _halt) = crate::signals::signal();
        let config = Config {
            seed: Some(7),
            ..Config::default()
        };
        let uploader = |id| {
            Uploader::new(
                id,
                &config,
                Payload::new(config.format, config.digits).expect("valid payload"),
                client(1),
                rcv.clone(),
                Counters::new(0),
                halt.clone(),
            )
        };
        let a = uploader(0);
        let b = uploader(1);
        let first = |u: &Uploader, stream| u.stream_rng(stream).next_u64();

        assert_eq!(first(&a, 0), first(&a, 0));
        assert_ne!(first(&a, 0), first(&a, 1));
        assert_ne!(first(&a, 0), first(&b, 0));
    }
}
