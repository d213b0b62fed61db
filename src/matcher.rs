use crate::request::Request;
use assert_json_diff::{assert_json_matches_no_panic, CompareMode};
use regex::Regex;
use std::collections::HashMap;
use std::convert::From;
use std::fmt;
use std::string::ToString;
use std::sync::Arc;

///
/// Decides whether a request is accepted by a mock. Set with `Mock::filter`.
///
/// Implemented for every `Fn(&Request) -> bool` closure and for `Match`.
///
pub trait Filter: Send + Sync + 'static {
    /// Returns `true` when the mock should serve `request`
    fn accepts(&self, request: &Request) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
{
    fn accepts(&self, request: &Request) -> bool {
        self(request)
    }
}

pub(crate) type SharedFilter = Arc<dyn Filter>;

///
/// Allows matching the query, headers or body in multiple ways: by the exact value, by any value (as
/// long as it is present), by regular expression or by checking that a particular header is missing.
///
/// Matchers are turned into filters through `Match`.
///
#[derive(Clone, PartialEq, Debug)]
pub enum Matcher {
    /// Matches the exact value. There's also an implementation of `From<&str>`
    /// to keep things simple.
    Exact(String),
    /// Matches a value by a regular expression.
    Regex(String),
    /// Matches a specified JSON body from a `serde_json::Value`
    Json(serde_json::Value),
    /// Matches a partial JSON body from a `serde_json::Value`
    PartialJson(serde_json::Value),
    /// Matches a URL-encoded key/value pair, where both key and value should be specified
    /// in plain (unencoded) format
    UrlEncoded(String, String),
    /// At least one matcher must match
    AnyOf(Vec<Matcher>),
    /// All matchers must match
    AllOf(Vec<Matcher>),
    /// Matches any value.
    Any,
    /// Checks that a value is not present.
    Missing,
}

impl<'a> From<&'a str> for Matcher {
    fn from(value: &str) -> Self {
        Matcher::Exact(value.to_string())
    }
}

impl From<String> for Matcher {
    fn from(value: String) -> Self {
        Matcher::Exact(value)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join_matches = |matches: &[Self]| {
            matches
                .iter()
                .map(Self::to_string)
                .collect::<Vec<String>>()
                .join(", ")
        };

        let result = match self {
            Matcher::Exact(ref value) => value.to_string(),
            Matcher::Regex(ref value) => format!("{} (regex)", value),
            Matcher::Json(ref json_obj) => format!("{} (json)", json_obj),
            Matcher::PartialJson(ref json_obj) => format!("{} (partial json)", json_obj),
            Matcher::UrlEncoded(ref field, ref value) => {
                format!("{}={} (urlencoded)", field, value)
            }
            Matcher::Any => "(any)".to_string(),
            Matcher::AnyOf(x) => format!("({}) (any of)", join_matches(x)),
            Matcher::AllOf(x) => format!("({}) (all of)", join_matches(x)),
            Matcher::Missing => "(missing)".to_string(),
        };
        write!(f, "{}", result)
    }
}

impl Matcher {
    pub(crate) fn matches_values(&self, values: &[&str]) -> bool {
        match self {
            Matcher::Missing => values.is_empty(),
            // Missing matches against all values at once, every other matcher
            // matches against individual values.
            Matcher::AnyOf(ref matchers) if values.is_empty() => {
                matchers.iter().any(|m| m.matches_values(values))
            }
            Matcher::AllOf(ref matchers) if values.is_empty() => {
                matchers.iter().all(|m| m.matches_values(values))
            }
            _ => !values.is_empty() && values.iter().all(|val| self.matches_value(val)),
        }
    }

    pub(crate) fn matches_value(&self, other: &str) -> bool {
        let compare_json_config = assert_json_diff::Config::new(CompareMode::Inclusive);
        match self {
            Matcher::Exact(ref value) => value == other,
            Matcher::Regex(ref regex) => Regex::new(regex)
                .map(|regex| regex.is_match(other))
                .unwrap_or_else(|err| {
                    log::error!("Invalid regex matcher {}: {}", regex, err);
                    false
                }),
            Matcher::Json(ref json_obj) => serde_json::from_str::<serde_json::Value>(other)
                .map(|other| *json_obj == other)
                .unwrap_or(false),
            Matcher::PartialJson(ref json_obj) => {
                serde_json::from_str::<serde_json::Value>(other)
                    .map(|actual| {
                        assert_json_matches_no_panic(&actual, json_obj, compare_json_config)
                            .is_ok()
                    })
                    .unwrap_or(false)
            }
            Matcher::UrlEncoded(ref expected_field, ref expected_value) => {
                serde_urlencoded::from_str::<HashMap<String, String>>(other)
                    .map(|params: HashMap<_, _>| {
                        params.into_iter().any(|(ref field, ref value)| {
                            field == expected_field && value == expected_value
                        })
                    })
                    .unwrap_or(false)
            }
            Matcher::Any => true,
            Matcher::AnyOf(ref matchers) => matchers.iter().any(|m| m.matches_value(other)),
            Matcher::AllOf(ref matchers) => matchers.iter().all(|m| m.matches_value(other)),
            Matcher::Missing => other.is_empty(),
        }
    }
}

///
/// A declarative filter over a part of the request.
///
/// ## Example
///
/// ```
/// use htmock::{Match, Matcher, Server};
///
/// let mut s = Server::new();
///
/// s.mock("/users", r#"{"id": 1}"#)
///   .filter(Match::query(Matcher::UrlEncoded("id".into(), "1".into())));
///
/// s.mock("/users", r#"{"admin": true}"#)
///   .filter(Match::all(vec![
///     Match::header("authorization", Matcher::Regex("^Bearer ".into())),
///     Match::query(Matcher::UrlEncoded("role".into(), "admin".into())),
///   ]));
/// ```
///
#[derive(Clone, PartialEq, Debug)]
pub enum Match {
    /// Matches the raw query string (empty when the request has none)
    Query(Matcher),
    /// Matches every value of a header; the field name is case-insensitive
    Header(String, Matcher),
    /// Matches the body as text
    Body(Matcher),
    /// Every filter must accept
    All(Vec<Match>),
}

impl Match {
    /// Filters on the query string
    pub fn query<M: Into<Matcher>>(matcher: M) -> Self {
        Match::Query(matcher.into())
    }

    /// Filters on a request header
    pub fn header<M: Into<Matcher>>(field: &str, matcher: M) -> Self {
        Match::Header(field.to_lowercase(), matcher.into())
    }

    /// Filters on the request body
    pub fn body<M: Into<Matcher>>(matcher: M) -> Self {
        Match::Body(matcher.into())
    }

    /// Combines filters; all of them must accept the request
    pub fn all(filters: Vec<Match>) -> Self {
        Match::All(filters)
    }
}

impl Filter for Match {
    fn accepts(&self, request: &Request) -> bool {
        match self {
            Match::Query(matcher) => matcher.matches_value(request.query().unwrap_or("")),
            Match::Header(field, matcher) => {
                let values: Vec<&str> = request
                    .header(field.as_str())
                    .into_iter()
                    .filter_map(|value| value.to_str().ok())
                    .collect();
                matcher.matches_values(&values)
            }
            Match::Body(matcher) => matcher.matches_value(&request.utf8_lossy_body()),
            Match::All(filters) => filters.iter().all(|filter| filter.accepts(request)),
        }
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Match::Query(matcher) => write!(f, "query: {}", matcher),
            Match::Header(field, matcher) => write!(f, "{}: {}", field, matcher),
            Match::Body(matcher) => write!(f, "body: {}", matcher),
            Match::All(filters) => {
                let joined: Vec<String> = filters.iter().map(ToString::to_string).collect();
                write!(f, "{}", joined.join("; "))
            }
        }
    }
}
