use crate::matcher::{Filter, SharedFilter};
use crate::report::Reporter;
use crate::request::Request;
use crate::response::Strategy;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) const DEFAULT_METHOD: &str = "GET";

/// A panicking responder must not take the whole server down with it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct InnerMock {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) filter: Option<SharedFilter>,
    pub(crate) strategy: Strategy,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) budget: Option<usize>,
    pub(crate) calls: usize,
    pub(crate) asserted: bool,
}

impl InnerMock {
    pub(crate) fn new(path: &str, strategy: Strategy) -> Self {
        Self {
            method: DEFAULT_METHOD.to_owned(),
            path: path.to_owned(),
            filter: None,
            strategy,
            headers: vec![("content-type".to_owned(), "application/json".to_owned())],
            budget: None,
            calls: 0,
            asserted: false,
        }
    }

    pub(crate) fn matches_route(&self, method: &str, path: &str) -> bool {
        self.method == method && self.path == path
    }

    ///
    /// A mock is depleted once it reached its call budget or ran out of per-call
    /// status producers.
    ///
    pub(crate) fn is_depleted(&self) -> bool {
        if matches!(self.budget, Some(budget) if self.calls >= budget) {
            return true;
        }

        matches!(self.strategy.capacity(), Some(capacity) if self.calls >= capacity)
    }

    pub(crate) fn key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    fn set_header(&mut self, field: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(field))
        {
            Some(header) => *header = (field.to_owned(), value.to_owned()),
            None => self.headers.push((field.to_owned(), value.to_owned())),
        }
    }

    pub(crate) fn assert_call_count(&mut self, reporter: &dyn Reporter, expected: usize) {
        self.asserted = true;

        if self.calls == 0 {
            reporter.report(&format!(
                "url: {} is mocked but never called. It was called {} times",
                self.path, self.calls
            ));
            return;
        }

        if self.calls != expected {
            reporter.report(&format!(
                "url: {} expected to be called {} times. It was called {} times",
                self.path, expected, self.calls
            ));
        }
    }
}

impl fmt::Debug for InnerMock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerMock")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("filter", &self.filter.as_ref().map(|_| "<filter>"))
            .field("strategy", &self.strategy)
            .field("headers", &self.headers)
            .field("budget", &self.budget)
            .field("calls", &self.calls)
            .field("asserted", &self.asserted)
            .finish()
    }
}

///
/// A handle to a registered mock. Should be obtained via `Server::mock`,
/// `Server::mock_sequence` or `Server::mock_fn`.
///
/// The mock is live as soon as it is registered. Configure it before sending
/// requests its way; every configuration call consumes and returns the handle
/// so calls can be chained.
///
#[derive(Clone, Debug)]
pub struct Mock {
    inner: Arc<Mutex<InnerMock>>,
}

impl Mock {
    pub(crate) fn new(inner: InnerMock) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, InnerMock> {
        lock(&self.inner)
    }

    ///
    /// Sets a header of the mock response, replacing a previous value for the same
    /// (case-insensitive) field. Mocks default to `content-type: application/json`.
    ///
    /// ## Example
    ///
    /// ```
    /// let s = htmock::Server::new();
    ///
    /// s.mock("/", "hello").with_header("content-type", "text/plain");
    /// ```
    ///
    pub fn with_header(self, field: &str, value: &str) -> Self {
        self.lock().set_header(field, value);
        self
    }

    ///
    /// Sets the HTTP method this mock answers to. Mocks default to `GET`. The method is
    /// compared as-is, so use upper-case verbs.
    ///
    /// ## Example
    ///
    /// ```
    /// let s = htmock::Server::new();
    ///
    /// s.mock("/users", r#"{"id": 1}"#).with_method("POST");
    /// ```
    ///
    pub fn with_method(self, method: &str) -> Self {
        self.lock().method = method.to_owned();
        self
    }

    ///
    /// Only lets requests accepted by `filter` match this mock.
    ///
    /// Mocks with a filter are always tried before mocks without one on the same method
    /// and path, whatever order they were registered in.
    ///
    /// ## Example
    ///
    /// ```
    /// let s = htmock::Server::new();
    ///
    /// s.mock("/users", "user 1")
    ///   .filter(|r: &htmock::Request| r.query_param("id").as_deref() == Some("1"));
    ///
    /// // Fallback for every other id
    /// s.mock("/users", "user not found");
    /// ```
    ///
    pub fn filter<F: Filter>(self, filter: F) -> Self {
        self.lock().filter = Some(Arc::new(filter));
        self
    }

    /// Lets this mock match a single request. Overrides `times`.
    pub fn once(self) -> Self {
        self.times(1)
    }

    ///
    /// Lets this mock match at most `hits` requests. Overrides `once`.
    ///
    /// A budget of `0` means the mock never matches: it is depleted from the start and
    /// requests fall through to the next mock. Leave the budget unset for an unbounded mock.
    ///
    pub fn times(self, hits: usize) -> Self {
        self.lock().budget = Some(hits);
        self
    }

    /// The number of requests this mock served so far
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    /// Whether this mock reached its call budget or used up its status producers
    pub fn is_depleted(&self) -> bool {
        self.lock().is_depleted()
    }

    ///
    /// Reports a failure unless this mock served exactly `expected` requests. A mock that
    /// was never called always fails.
    ///
    /// Marks the mock as asserted for `Server::assert_call_count_asserted`.
    ///
    pub fn assert_call_count(&self, reporter: &dyn Reporter, expected: usize) {
        self.lock().assert_call_count(reporter, expected);
    }

    pub(crate) fn accepts(filter: Option<&SharedFilter>, request: &Request) -> bool {
        filter.map_or(true, |filter| filter.accepts(request))
    }
}

impl fmt::Display for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lock().key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::StatusProducer;
    use crate::Failures;
    use bytes::Bytes;

    fn static_mock(sequence: Vec<StatusProducer>) -> Mock {
        Mock::new(InnerMock::new(
            "/test",
            Strategy::Static {
                body: Bytes::from("ok"),
                sequence,
            },
        ))
    }

    #[test]
    fn test_defaults() {
        let mock = static_mock(vec![]);
        let inner = mock.lock();
        assert_eq!("GET", inner.method);
        assert_eq!(
            vec![("content-type".to_string(), "application/json".to_string())],
            inner.headers
        );
        assert!(inner.filter.is_none());
        assert_eq!(None, inner.budget);
    }

    #[test]
    fn test_with_header_replaces_case_insensitively() {
        let mock = static_mock(vec![])
            .with_header("Content-Type", "text/plain")
            .with_header("x-one", "1");

        assert_eq!(
            vec![
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("x-one".to_string(), "1".to_string())
            ],
            mock.lock().headers
        );
    }

    #[test]
    fn test_with_method() {
        let mock = static_mock(vec![]).with_method("DELETE");
        assert!(mock.lock().matches_route("DELETE", "/test"));
        assert!(!mock.lock().matches_route("delete", "/test"));
        assert!(!mock.lock().matches_route("DELETE", "/test/"));
        assert_eq!("DELETE /test", mock.to_string());
    }

    #[test]
    fn test_once_and_times_last_write_wins() {
        let mock = static_mock(vec![]).once().times(3);
        assert_eq!(Some(3), mock.lock().budget);

        let mock = static_mock(vec![]).times(3).once();
        assert_eq!(Some(1), mock.lock().budget);
    }

    #[test]
    fn test_unbounded_mock_is_never_depleted() {
        let mock = static_mock(vec![]);
        mock.lock().calls = 1_000;
        assert!(!mock.is_depleted());
    }

    #[test]
    fn test_depleted_by_budget() {
        let mock = static_mock(vec![]).times(2);
        mock.lock().calls = 1;
        assert!(!mock.is_depleted());
        mock.lock().calls = 2;
        assert!(mock.is_depleted());
    }

    #[test]
    fn test_depleted_by_sequence() {
        let mock = static_mock(vec![200.into(), 201.into()]);
        mock.lock().calls = 1;
        assert!(!mock.is_depleted());
        mock.lock().calls = 2;
        assert!(mock.is_depleted());
    }

    #[test]
    fn test_budget_tighter_than_sequence() {
        let mock = static_mock(vec![200.into(), 201.into()]).once();
        mock.lock().calls = 1;
        assert!(mock.is_depleted());
    }

    #[test]
    fn test_assert_call_count_never_called() {
        let mock = static_mock(vec![]);
        let failures = Failures::new();
        mock.assert_call_count(&failures, 0);

        assert!(mock.lock().asserted);
        assert_eq!(
            vec!["url: /test is mocked but never called. It was called 0 times"],
            failures.messages()
        );
    }

    #[test]
    fn test_assert_call_count_mismatch() {
        let mock = static_mock(vec![]);
        mock.lock().calls = 2;
        let failures = Failures::new();
        mock.assert_call_count(&failures, 3);

        assert_eq!(
            vec!["url: /test expected to be called 3 times. It was called 2 times"],
            failures.messages()
        );
    }

    #[test]
    fn test_assert_call_count_ok() {
        let mock = static_mock(vec![]);
        mock.lock().calls = 2;
        let failures = Failures::new();
        mock.assert_call_count(&failures, 2);

        assert!(!failures.failed());
        assert!(mock.lock().asserted);
    }
}
