//! Tagged image locators.

use reqwest::Url;
use std::fmt;
use std::path::PathBuf;

/// Where an image's bytes come from. Classified once, at the boundary.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Raw encoded bytes (e.g. a multipart upload).
    Bytes(Vec<u8>),
    /// `data:<mime>;base64,<payload>`.
    DataUri(String),
    /// `http://` or `https://` URL.
    Url(String),
    /// Local filesystem path.
    Path(PathBuf),
}

impl ImageSource {
    /// Classify a textual locator by its prefix.
    pub fn parse(locator: &str) -> Self {
        let trimmed = locator.trim();
        if has_prefix_ignore_case(trimmed, "data:") {
            ImageSource::DataUri(trimmed.to_string())
        } else if has_prefix_ignore_case(trimmed, "http://")
            || has_prefix_ignore_case(trimmed, "https://")
        {
            ImageSource::Url(trimmed.to_string())
        } else {
            ImageSource::Path(PathBuf::from(trimmed))
        }
    }

    /// Resolve a reference photo value as stored on a user record.
    ///
    /// URLs and data URIs are used as-is. A bare name is joined onto
    /// `base_url` (percent-encoded) when one is configured, otherwise it is
    /// treated as a local path.
    pub fn from_stored(value: &str, base_url: Option<&Url>) -> Self {
        match (Self::parse(value), base_url) {
            (ImageSource::Path(path), Some(base)) => {
                let name = value.trim().trim_start_matches('/');
                match base.join(name) {
                    Ok(url) => ImageSource::Url(url.to_string()),
                    Err(err) => {
                        tracing::warn!(name, %base, error = %err, "cannot join stored photo onto base URL");
                        ImageSource::Path(path)
                    }
                }
            }
            (source, _) => source,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ImageSource::Bytes(_) => "bytes",
            ImageSource::DataUri(_) => "data-uri",
            ImageSource::Url(_) => "url",
            ImageSource::Path(_) => "path",
        }
    }
}

/// Never prints payloads; data URIs and byte buffers are summarized.
impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            ImageSource::DataUri(s) => {
                let header = s.split(',').next().unwrap_or_default();
                write!(f, "DataUri({header},… {} chars)", s.len())
            }
            ImageSource::Url(u) => write!(f, "Url({u})"),
            ImageSource::Path(p) => write!(f, "Path({})", p.display()),
        }
    }
}

fn has_prefix_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Ensure a base URL ends with `/` so [`Url::join`] appends instead of replacing.
pub fn directory_url(base: &str) -> Result<Url, String> {
    let with_slash = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    Url::parse(&with_slash).map_err(|e| format!("invalid base URL {base:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classifies_prefixes() {
        assert!(matches!(ImageSource::parse("data:image/png;base64,AAAA"), ImageSource::DataUri(_)));
        assert!(matches!(ImageSource::parse("https://cdn.example/a.jpg"), ImageSource::Url(_)));
        assert!(matches!(ImageSource::parse("HTTP://cdn.example/a.jpg"), ImageSource::Url(_)));
        assert_eq!(
            ImageSource::parse(" uploads/tmp_1.jpg "),
            ImageSource::Path(PathBuf::from("uploads/tmp_1.jpg"))
        );
        // Not a URL scheme, just a file that starts with "http".
        assert!(matches!(ImageSource::parse("httpd.png"), ImageSource::Path(_)));
    }

    #[test]
    fn test_from_stored_joins_bare_names() {
        let base = directory_url("https://storage.example/v1/object/public/users").unwrap();
        assert_eq!(
            ImageSource::from_stored("juan perez.jpg", Some(&base)),
            ImageSource::Url("https://storage.example/v1/object/public/users/juan%20perez.jpg".into())
        );
    }

    #[test]
    fn test_from_stored_keeps_urls_and_paths() {
        let base = directory_url("https://storage.example/users/").unwrap();
        assert_eq!(
            ImageSource::from_stored("https://other.example/x.png", Some(&base)),
            ImageSource::Url("https://other.example/x.png".into())
        );
        assert_eq!(
            ImageSource::from_stored("photos/x.png", None),
            ImageSource::Path(PathBuf::from("photos/x.png"))
        );
    }

    #[test]
    fn test_debug_hides_payload() {
        let source = ImageSource::DataUri("data:image/png;base64,SECRETSECRET".into());
        let shown = format!("{source:?}");
        assert!(shown.starts_with("DataUri(data:image/png;base64,"));
        assert!(!shown.contains("SECRET"));
        assert_eq!(format!("{:?}", ImageSource::Bytes(vec![0; 3])), "Bytes(3 bytes)");
    }

    #[test]
    fn test_directory_url() {
        assert_eq!(directory_url("http://a/b").unwrap().as_str(), "http://a/b/");
        assert!(directory_url("not a url").is_err());
    }
}
