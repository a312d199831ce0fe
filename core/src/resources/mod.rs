//! Resource wrappers: one thin facade per API resource group.
//!
//! Wrappers shape paths and payloads and hand them to the [`Dispatcher`];
//! they never retry or validate on their own.
//!
//! [`Dispatcher`]: crate::dispatch::Dispatcher

mod events;
mod flows;
mod templates;
mod users;
mod webhooks;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use url::form_urlencoded;

use crate::error::Result;

pub use events::{with_occurred_at, Events};
pub use flows::Flows;
pub use templates::Templates;
pub use users::Users;
pub use webhooks::Webhooks;

pub(crate) const API_PREFIX: &str = "/api/v1";

/// Query parameters for list operations. Keys serialize in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    params: BTreeMap<String, String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    pub fn limit(self, limit: u32) -> Self {
        self.with("limit", limit)
    }

    pub fn page(self, page: u32) -> Self {
        self.with("page", page)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// `?k=v&...`, or an empty string when there are no parameters.
    pub fn to_query(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let pairs = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish();
        format!("?{pairs}")
    }
}

impl<K, V> FromIterator<(K, V)> for ListOptions
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |options, (k, v)| options.with(k, v))
    }
}

/// `/api/v1/<segments...>` with each segment percent-encoded.
pub(crate) fn path(segments: &[&str]) -> String {
    let mut out = String::from(API_PREFIX);
    for segment in segments {
        out.push('/');
        out.push_str(&urlencoding::encode(segment));
    }
    out
}

pub(crate) fn to_json<T: Serialize + ?Sized>(payload: &T) -> Result<Value> {
    Ok(serde_json::to_value(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_options_add_no_query() {
        assert_eq!(ListOptions::new().to_query(), "");
    }

    #[test]
    fn options_serialize_sorted_and_encoded() {
        let options = ListOptions::new()
            .with("channel", "zns")
            .with("q", "a b&c")
            .limit(20);
        assert_eq!(options.to_query(), "?channel=zns&limit=20&q=a+b%26c");
    }

    #[test]
    fn single_option_has_no_leading_separator() {
        let query = ListOptions::new().with("channel", "zns").to_query();
        assert_eq!(query, "?channel=zns");
        assert!(!query.contains("?&"));
    }

    #[test]
    fn paging_options() {
        let options = ListOptions::new().page(2).limit(50);
        assert!(!options.is_empty());
        assert!(ListOptions::new().is_empty());
        assert_eq!(options.to_query(), "?limit=50&page=2");
    }

    #[test]
    fn options_collect_from_pairs() {
        let options: ListOptions = [("channel", "email")].into_iter().collect();
        assert_eq!(options.to_query(), "?channel=email");
    }

    #[test]
    fn path_segments_are_encoded() {
        assert_eq!(path(&["users"]), "/api/v1/users");
        assert_eq!(path(&["users", "a/b c", "preferences"]), "/api/v1/users/a%2Fb%20c/preferences");
        assert_eq!(path(&["templates", "otp-v2_x.~"]), "/api/v1/templates/otp-v2_x.~");
        assert_eq!(path(&["users", "an+é?"]), "/api/v1/users/an%2B%C3%A9%3F");
    }
}
