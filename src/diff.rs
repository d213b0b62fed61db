#[cfg(feature = "color")]
use colored::Colorize;
use similar::{ChangeTag, TextDiff};

const MIN_SIMILARITY: f32 = 0.75;

///
/// Finds the registered `METHOD path` key closest to `key`, if any is similar enough
/// to be worth suggesting.
///
pub(crate) fn closest<'a, I>(key: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .filter(|candidate| *candidate != key)
        .map(|candidate| (TextDiff::from_chars(key, candidate).ratio(), candidate))
        .filter(|(ratio, _)| *ratio >= MIN_SIMILARITY)
        .max_by(|(a, _), (b, _)| a.total_cmp(b))
        .map(|(_, candidate)| candidate)
}

pub(crate) fn compare(expected: &str, actual: &str) -> String {
    let mut result = String::new();

    let diff = TextDiff::from_chars(expected, actual);
    for change in diff.iter_all_changes() {
        let value = change.value();
        match change.tag() {
            ChangeTag::Equal => {
                #[cfg(feature = "color")]
                result.push_str(&value.green().to_string());
                #[cfg(not(feature = "color"))]
                result.push_str(value);
            }
            ChangeTag::Insert => {
                #[cfg(feature = "color")]
                result.push_str(&value.white().on_green().to_string());
                #[cfg(not(feature = "color"))]
                result.push_str(value);
            }
            ChangeTag::Delete => {
                #[cfg(feature = "color")]
                result.push_str(&value.white().on_red().to_string());
                #[cfg(not(feature = "color"))]
                {
                    result.push('[');
                    result.push_str(value);
                    result.push(']');
                }
            }
        }
    }

    result
}
