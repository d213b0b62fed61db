use crate::mock::lock;
use std::sync::Mutex;

///
/// Receives assertion failures. Failures are non-fatal: an assertion may report several
/// of them and the caller carries on.
///
/// Implemented for `Failures` and for any `Fn(&str)` closure.
///
pub trait Reporter {
    /// Records one failure
    fn report(&self, message: &str);
}

impl<F> Reporter for F
where
    F: Fn(&str),
{
    fn report(&self, message: &str) {
        self(message)
    }
}

///
/// A `Reporter` collecting every failure it receives.
///
/// ## Example
///
/// ```
/// use htmock::{Failures, Server};
///
/// let s = Server::new();
/// s.mock("/hello", "world");
///
/// let failures = Failures::new();
/// s.assert_mocks_called(&failures);
///
/// assert!(failures.failed());
/// assert_eq!(vec!["GET /hello mocked but never called."], failures.messages());
/// ```
///
#[derive(Debug, Default)]
pub struct Failures {
    messages: Mutex<Vec<String>>,
}

impl Failures {
    /// Creates an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any failure was reported
    pub fn failed(&self) -> bool {
        !lock(&self.messages).is_empty()
    }

    /// The reported failures, oldest first
    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }

    ///
    /// Panics listing every reported failure, if there are any.
    ///
    #[track_caller]
    pub fn check(&self) {
        let messages = lock(&self.messages);
        if !messages.is_empty() {
            panic!(
                "\n> {} mock assertion(s) failed:\n{}\n",
                messages.len(),
                messages.join("\n")
            );
        }
    }
}

impl Reporter for Failures {
    fn report(&self, message: &str) {
        log::debug!("Mock assertion failed: {}", message);
        lock(&self.messages).push(message.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_failures_accumulate() {
        let failures = Failures::new();
        assert!(!failures.failed());

        failures.report("one");
        failures.report("two");

        assert!(failures.failed());
        assert_eq!(vec!["one", "two"], failures.messages());
    }

    #[test]
    fn test_check_passes_without_failures() {
        Failures::new().check();
    }

    #[test]
    #[should_panic(expected = "2 mock assertion(s) failed:\none\ntwo")]
    fn test_check_panics_with_all_failures() {
        let failures = Failures::new();
        failures.report("one");
        failures.report("two");
        failures.check();
    }

    #[test]
    fn test_closure_reporter() {
        let seen = RefCell::new(vec![]);
        let reporter = |message: &str| seen.borrow_mut().push(message.to_owned());
        reporter.report("boom");
        assert_eq!(vec!["boom".to_string()], *seen.borrow());
    }
}
