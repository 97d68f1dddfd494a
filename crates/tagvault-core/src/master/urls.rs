//! URL normalization for file URL mappings.

use url::Url;

/// A parsed URL reduced to a canonical string and its domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    pub url: String,
    pub domain: String,
}

/// Parse and normalize a URL. Fragments are dropped, scheme and host are
/// lowercased by the parser. Returns `None` for anything without a host.
pub fn normalize_url(raw: &str) -> Option<NormalizedUrl> {
    let mut url = Url::parse(raw.trim()).ok()?;
    let domain = url.host_str()?.trim_start_matches("www.").to_string();
    url.set_fragment(None);
    Some(NormalizedUrl {
        url: url.to_string(),
        domain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_drops_fragment_and_www() {
        let n = normalize_url(" https://WWW.Example.com/post/1#comments ").unwrap();
        assert_eq!(n.url, "https://www.example.com/post/1");
        assert_eq!(n.domain, "example.com");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_url("not a url").is_none());
        assert!(normalize_url("mailto:someone@example.com").is_none());
    }
}
