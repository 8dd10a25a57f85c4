//! URI and header helpers shared by the HTTP components.

use reqwest::Url;

/// Appends a path to a base URI, dropping empty segments so that trailing slashes on
/// the base and leading slashes on the path never produce `//`.
pub fn concatenate_uri_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let segments: Vec<String> = base
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    let extra = path.split('/').filter(|seg| !seg.is_empty());

    let joined: Vec<String> = segments
        .into_iter()
        .chain(extra.map(str::to_string))
        .collect();
    url.set_path(&format!("/{}", joined.join("/")));
    url
}

/// Returns a copy of the URI with a query parameter appended.
pub fn add_query_param(uri: &Url, name: &str, value: &str) -> Url {
    let mut url = uri.clone();
    url.query_pairs_mut().append_pair(name, value);
    url
}

/// Whether a header value consists only of printable ASCII or tabs.
pub fn is_ascii_header_value(value: &str) -> bool {
    value
        .chars()
        .all(|c| c == '\t' || ('\u{20}'..='\u{7e}').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_concatenate_simple() {
        let result = concatenate_uri_path(&url("http://events.test"), "/bulk");
        assert_eq!(result.as_str(), "http://events.test/bulk");
    }

    #[test]
    fn test_concatenate_with_base_path() {
        let result = concatenate_uri_path(&url("http://events.test/base/"), "bulk");
        assert_eq!(result.as_str(), "http://events.test/base/bulk");
    }

    #[test]
    fn test_concatenate_removes_empty_segments() {
        let result = concatenate_uri_path(&url("http://events.test/a//b/"), "//c/");
        assert_eq!(result.as_str(), "http://events.test/a/b/c");
    }

    #[test]
    fn test_add_query_param() {
        let result = add_query_param(&url("http://events.test/x?a=1"), "b", "two words");
        assert_eq!(result.as_str(), "http://events.test/x?a=1&b=two+words");
    }

    #[test]
    fn test_ascii_header_value() {
        assert!(is_ascii_header_value("FlagKit/1.0\tok"));
        assert!(!is_ascii_header_value("caf\u{e9}"));
        assert!(!is_ascii_header_value("line\nbreak"));
    }
}
