//! Endpoint URL construction
//!
//! Provider base URLs come from several places (built-in table, config
//! overrides, environment) and may or may not carry a trailing slash.

/// Strip trailing slashes from a base URL
///
/// ```
/// use mosp_chat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:11434/"), "http://localhost:11434");
/// assert_eq!(normalize_base_url("https://openrouter.ai/api/v1"), "https://openrouter.ai/api/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path with exactly one slash between them
///
/// ```
/// use mosp_chat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:11434/", "/api/chat"),
///     "http://localhost:11434/api/chat"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{normalized_base}/{endpoint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_removed() {
        assert_eq!(normalize_base_url("http://localhost:11434///"), "http://localhost:11434");
        assert_eq!(normalize_base_url("http://gpu-box:11434"), "http://gpu-box:11434");
        assert_eq!(normalize_base_url("///"), "");
    }

    #[test]
    fn endpoints_join_without_double_slashes() {
        let cases = [
            ("http://localhost:11434", "api/chat", "http://localhost:11434/api/chat"),
            ("http://localhost:11434/", "/api/tags", "http://localhost:11434/api/tags"),
            (
                "https://openrouter.ai/api/v1/",
                "chat/completions",
                "https://openrouter.ai/api/v1/chat/completions",
            ),
            (
                "https://api.anthropic.com/v1",
                "///messages",
                "https://api.anthropic.com/v1/messages",
            ),
        ];

        for (base, endpoint, expected) in cases {
            assert_eq!(construct_api_url(base, endpoint), expected);
        }
    }
}
