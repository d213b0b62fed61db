#![warn(missing_docs)]

//!
//! Htmock spins up a local HTTP server for your tests, serves the mocks you register on it and
//! keeps track of how often each of them was called, so that your tests can assert on call
//! counts, unused mocks and requests nobody mocked.
//!
//! Every `Server` listens on its own free port of `127.0.0.1` and handles requests concurrently.
//! Servers stop listening when dropped.
//!
//! # Getting Started
//!
//! Point the client under test to `Server::url()` and register mocks by path:
//!
//! ## Example
//!
//! ```
//! use htmock::{Failures, Server};
//!
//! let s = Server::new();
//!
//! // GET /hello responds with status 200, `content-type: application/json`
//! // and the body "world", as many times as it is requested.
//! let m = s.mock("/hello", "world");
//!
//! // ...call `s.url()` + "/hello" from the code under test...
//!
//! let failures = Failures::new();
//! m.assert_call_count(&failures, 1);
//! s.assert_no_missing_mocks(&failures);
//! // Panics listing every accumulated failure
//! // failures.check();
//! ```
//!
//! # Methods and headers
//!
//! Mocks match `GET` requests unless told otherwise. Methods and paths are compared exactly:
//! `post` is not `POST`, `/hello/` is not `/hello` and the query string never takes part.
//!
//! ## Example
//!
//! ```
//! let s = htmock::Server::new();
//!
//! s.mock("/users", r#"<user id="1"/>"#)
//!   .with_method("POST")
//!   .with_header("content-type", "application/xml")
//!   .with_header("x-request-id", "1234");
//! ```
//!
//! # Call budgets
//!
//! A mock can be limited to a number of calls with `Mock::once` or `Mock::times`. Once
//! depleted, requests fall through to the next mock registered for the same method and path,
//! in registration order.
//!
//! ## Example
//!
//! ```
//! let s = htmock::Server::new();
//!
//! s.mock("/status", "starting").once();
//! s.mock("/status", "warming up").times(2);
//! s.mock("/status", "ready");
//!
//! // The first request sees "starting", the next two "warming up",
//! // every later one "ready".
//! ```
//!
//! # Status sequences
//!
//! `Server::mock_sequence` takes one `StatusProducer` per call. Each one is used exactly once, in
//! order, and decides the status code of its call. When all of them are used up the mock stops
//! matching.
//!
//! ## Example
//!
//! ```
//! use htmock::StatusProducer;
//!
//! let s = htmock::Server::new();
//!
//! s.mock_sequence("/jobs/1", r#"{"state": "pending"}"#, [202.into(), 202.into()]);
//! s.mock_sequence("/jobs/1", r#"{"state": "done"}"#, [StatusProducer::new(|_| 200)]);
//!
//! // 202, 202, 200, then 404.
//! ```
//!
//! # Filters
//!
//! When several mocks share a method and path, filters decide which one serves a request. Mocks
//! with a filter are always tried first, mocks without one act as the fallback. Filters are
//! plain closures or `Match` values built from a `Matcher`.
//!
//! ## Example
//!
//! ```
//! use htmock::{Match, Matcher, Request, Server};
//!
//! let s = Server::new();
//!
//! s.mock_fn("/users", |w, _| {
//!     w.set_status(404).write_body("user not found");
//! });
//!
//! s.mock("/users", "user 1")
//!   .filter(|r: &Request| r.query_param("id").as_deref() == Some("1"));
//!
//! s.mock("/users", "user 2")
//!   .filter(Match::query(Matcher::UrlEncoded("id".into(), "2".into())));
//! ```
//!
//! # Non-matching calls
//!
//! Requests no mock can serve are answered with `404 Not Found` and the body `<path> not found`.
//! They are counted per method and path and reported by `Server::assert_no_missing_mocks`.
//!
//! # Assertions
//!
//! Assertions never panic on their own. They report each failure to a `Reporter`, such as
//! `Failures` or any `Fn(&str)` closure, so a single check can surface several problems at once.
//!
//! ## Example
//!
//! ```
//! use htmock::{Failures, Server};
//!
//! let s = Server::new();
//! s.mock("/a", "a");
//! s.mock("/b", "b").with_method("PUT");
//!
//! let failures = Failures::new();
//! s.assert_call_count(&failures, "GET", "/a", 0);
//! s.assert_call_count_asserted(&failures);
//! s.assert_mocks_called(&failures);
//!
//! // "/a" was never called, "/b" was never asserted nor called
//! assert_eq!(3, failures.messages().len());
//! ```
//!
//! # Debug
//!
//! Htmock logs through the `log` crate. Install a logger such as `env_logger` to see every
//! request received and the mock that served it.
//!

pub use error::{Error, ErrorKind};
pub use matcher::{Filter, Match, Matcher};
pub use mock::Mock;
pub use report::{Failures, Reporter};
pub use request::Request;
pub use response::{ResponseWriter, StatusProducer};
pub use server::{Server, ServerOpts};

mod diff;
mod error;
mod matcher;
mod mock;
mod report;
mod request;
mod response;
mod server;
