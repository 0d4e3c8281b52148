use serde::{Deserialize, Serialize};

/// Coarse page classification used to group element patterns.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Login,
    Search,
    Form,
    General,
    Unknown,
}

impl PageType {
    pub fn infer(url: Option<&str>) -> Self {
        let Some(url) = url else {
            return PageType::Unknown;
        };
        let lower = url.to_ascii_lowercase();
        if lower.contains("login") || lower.contains("signin") {
            PageType::Login
        } else if lower.contains("search")
            || lower.contains("query")
            || lower.contains("baidu")
            || lower.contains("google")
        {
            PageType::Search
        } else if lower.contains("form") || lower.contains("submit") {
            PageType::Form
        } else {
            PageType::General
        }
    }
}

/// Key phrase used for fuzzy case matching.
pub(crate) fn extract_keyword(message: &str) -> String {
    const MARKERS: [&str; 5] = [
        "no such element",
        "timeout",
        "stale element",
        "click intercepted",
        "unable to locate",
    ];
    if let Some(marker) = MARKERS.iter().find(|marker| message.contains(*marker)) {
        return (*marker).to_string();
    }
    message.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_type_follows_url_hints() {
        assert_eq!(PageType::infer(None), PageType::Unknown);
        assert_eq!(PageType::infer(Some("https://a.test/SignIn")), PageType::Login);
        assert_eq!(PageType::infer(Some("https://www.baidu.com")), PageType::Search);
        assert_eq!(PageType::infer(Some("https://a.test/form/1")), PageType::Form);
        assert_eq!(PageType::infer(Some("https://a.test/")), PageType::General);
    }

    #[test]
    fn keyword_prefers_known_markers() {
        assert_eq!(extract_keyword("wait: timeout after 10s"), "timeout");
        assert_eq!(extract_keyword("short"), "short");
        assert_eq!(extract_keyword(&"x".repeat(80)).len(), 50);
    }
}
