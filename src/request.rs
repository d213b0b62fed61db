use crate::{Error, ErrorKind};
use bytes::Bytes;
use http::header::{AsHeaderName, HeaderValue};
use http::Request as HttpRequest;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use std::borrow::Cow;
use std::collections::HashMap;

///
/// Stores a HTTP request received by the server. This is what filters, status producers
/// and custom responders get to look at.
///
/// The body is read in full before the request reaches any mock.
///
#[derive(Debug)]
pub struct Request {
    inner: HttpRequest<Bytes>,
}

impl Request {
    pub(crate) async fn read_from(request: HttpRequest<Incoming>) -> Result<Request, Error> {
        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|err| Error::new_with_context(ErrorKind::RequestBodyFailure, err))?
            .to_bytes();

        Ok(Request {
            inner: HttpRequest::from_parts(parts, body),
        })
    }

    /// The HTTP method, exactly as received (e.g. `GET`)
    pub fn method(&self) -> &str {
        self.inner.method().as_str()
    }

    /// The path component of the request URI, without the query string
    pub fn path(&self) -> &str {
        self.inner.uri().path()
    }

    /// The raw query string, if any
    pub fn query(&self) -> Option<&str> {
        self.inner.uri().query()
    }

    ///
    /// Looks up a query parameter by name. Values are URL-decoded. When the parameter is
    /// repeated, the first occurrence wins.
    ///
    /// ## Example
    ///
    /// ```
    /// use bytes::Bytes;
    /// use htmock::Request;
    ///
    /// let request = Request::from(
    ///     http::Request::get("/users?id=1&name=John%20Doe")
    ///         .body(Bytes::new())
    ///         .unwrap(),
    /// );
    ///
    /// assert_eq!(Some("1".to_string()), request.query_param("id"));
    /// assert_eq!(Some("John Doe".to_string()), request.query_param("name"));
    /// assert_eq!(None, request.query_param("missing"));
    /// ```
    ///
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query()?;
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .ok()?
            .into_iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// All query parameters, URL-decoded. Repeated parameters keep their last value.
    pub fn query_params(&self) -> HashMap<String, String> {
        self.query()
            .and_then(|query| serde_urlencoded::from_str(query).ok())
            .unwrap_or_default()
    }

    /// Retrieves all the header values for the given header field name
    pub fn header<T: AsHeaderName>(&self, header_name: T) -> Vec<&HeaderValue> {
        self.inner.headers().get_all(header_name).iter().collect()
    }

    /// Checks whether the provided header field exists
    pub fn has_header<T: AsHeaderName>(&self, header_name: T) -> bool {
        self.inner.headers().contains_key(header_name)
    }

    /// The request body
    pub fn body(&self) -> &[u8] {
        self.inner.body()
    }

    /// The request body as a string, replacing invalid UTF-8 sequences
    pub fn utf8_lossy_body(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.inner.body())
    }

    /// The `METHOD path` pair mocks are keyed by
    pub(crate) fn key(&self) -> String {
        format!("{} {}", self.method(), self.path())
    }

    pub(crate) fn formatted(&self) -> String {
        let mut formatted = format!(
            "\r\n{} {}\r\n",
            self.method(),
            self.inner
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/")
        );

        for (key, value) in self.inner.headers() {
            formatted.push_str(&format!(
                "{}: {}\r\n",
                key,
                value.to_str().unwrap_or("<invalid>")
            ));
        }

        if !self.body().is_empty() {
            formatted.push_str(&self.utf8_lossy_body());
            formatted.push_str("\r\n");
        }

        formatted
    }
}

impl From<HttpRequest<Bytes>> for Request {
    fn from(inner: HttpRequest<Bytes>) -> Self {
        Request { inner }
    }
}
