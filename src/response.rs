use crate::request::Request;
use crate::{Error, ErrorKind};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use std::fmt;
use std::io;
use std::sync::Arc;

type StatusFn = dyn Fn(&Request) -> u16 + Send + Sync + 'static;
type ResponderFn = dyn Fn(&mut ResponseWriter, &Request) + Send + Sync + 'static;

///
/// Produces the status code for exactly one call of a sequenced mock. See
/// `Server::mock_sequence`.
///
/// Returning `0` keeps the default status (200).
///
#[derive(Clone)]
pub struct StatusProducer(Arc<StatusFn>);

impl StatusProducer {
    /// Wraps a callback deciding the status code from the request
    pub fn new(callback: impl Fn(&Request) -> u16 + Send + Sync + 'static) -> Self {
        StatusProducer(Arc::new(callback))
    }

    pub(crate) fn produce(&self, request: &Request) -> u16 {
        (self.0)(request)
    }
}

impl From<u16> for StatusProducer {
    fn from(status: u16) -> Self {
        StatusProducer::new(move |_| status)
    }
}

impl fmt::Debug for StatusProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<callback>")
    }
}

///
/// The response sink handed to custom responders registered with `Server::mock_fn`.
///
/// Headers configured on the mock are already present when the responder runs.
/// The body can be written with `write_body` or through `std::io::Write`.
///
#[derive(Debug)]
pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    error: Option<Error>,
}

impl ResponseWriter {
    pub(crate) fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            error: None,
        }
    }

    /// Sets the status code. Invalid codes turn the response into a 500.
    pub fn set_status(&mut self, status: u16) -> &mut Self {
        match StatusCode::from_u16(status) {
            Ok(status) => self.status = status,
            Err(_) => {
                self.error = Some(Error::new_with_context(
                    ErrorKind::InvalidStatusCode,
                    status,
                ))
            }
        }
        self
    }

    /// Sets a header, replacing any previous value. Invalid names or values turn the
    /// response into a 500.
    pub fn set_header(&mut self, field: &str, value: &str) -> &mut Self {
        let name = HeaderName::from_bytes(field.as_bytes())
            .map_err(|err| Error::new_with_context(ErrorKind::ResponseFailure, err));
        let value = HeaderValue::from_str(value)
            .map_err(|err| Error::new_with_context(ErrorKind::ResponseFailure, err));

        match (name, value) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(err), _) | (_, Err(err)) => self.error = Some(err),
        }
        self
    }

    /// Appends to the body
    pub fn write_body<StrOrBytes: AsRef<[u8]>>(&mut self, body: StrOrBytes) -> &mut Self {
        self.body.extend_from_slice(body.as_ref());
        self
    }

    /// The status written so far
    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    /// The headers written so far
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn finish(self) -> Result<Reply, Error> {
        if let Some(err) = self.error {
            return Err(err);
        }

        Ok(Reply {
            status: self.status,
            headers: self.headers,
            body: Bytes::from(self.body),
        })
    }
}

impl io::Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

///
/// How a mock produces its response.
///
#[derive(Clone)]
pub(crate) enum Strategy {
    /// A fixed body and an optional sequence of per-call status producers
    Static {
        body: Bytes,
        sequence: Vec<StatusProducer>,
    },
    /// A responder owning status, headers and body
    Custom(Arc<ResponderFn>),
}

impl Strategy {
    pub(crate) fn custom(
        responder: impl Fn(&mut ResponseWriter, &Request) + Send + Sync + 'static,
    ) -> Self {
        Strategy::Custom(Arc::new(responder))
    }

    /// The number of calls this strategy can serve, if limited
    pub(crate) fn capacity(&self) -> Option<usize> {
        match self {
            Strategy::Static { sequence, .. } if !sequence.is_empty() => Some(sequence.len()),
            _ => None,
        }
    }

    ///
    /// Writes the response for the `call`-th match (1-based) into `writer`.
    ///
    pub(crate) fn produce(&self, call: usize, request: &Request, writer: &mut ResponseWriter) {
        match self {
            Strategy::Custom(responder) => responder(writer, request),
            Strategy::Static { body, sequence } => {
                if let Some(producer) = call.checked_sub(1).and_then(|i| sequence.get(i)) {
                    let status = producer.produce(request);
                    if status != 0 {
                        writer.set_status(status);
                    }
                }
                writer.write_body(body);
            }
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Static { body, sequence } => f
                .debug_struct("Static")
                .field("body", body)
                .field("sequence", &sequence.len())
                .finish(),
            Strategy::Custom(_) => f.write_str("Custom(<callback>)"),
        }
    }
}

///
/// A fully produced response, ready to be handed to the transport.
///
#[derive(Debug)]
pub(crate) struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub(crate) fn not_found(path: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );

        Self {
            status: StatusCode::NOT_FOUND,
            headers,
            body: Bytes::from(format!("{} not found", path)),
        }
    }

    pub(crate) fn failure(error: &Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: HeaderMap::new(),
            body: Bytes::from(error.to_string()),
        }
    }
}
