use std::time::Duration;

use tracing::info;
use url::Url;

/// Query parameters that never affect content identity.
const TRACKING_PARAMS: [&str; 6] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "ref",
];

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Canonicalises a URL without touching the network: lowercases the host,
/// strips the trailing slash from the path, drops the fragment, removes
/// tracking parameters and re-encodes the remaining query. Returns `None`
/// when the input does not parse as an absolute URL.
///
/// The result is a fixed point: normalising it again yields the same string.
pub fn normalize_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?.to_lowercase();

    let mut normalized = format!("{}://", parsed.scheme());
    normalized.push_str(&host);
    if let Some(port) = parsed.port() {
        normalized.push_str(&format!(":{}", port));
    }
    normalized.push_str(parsed.path().trim_end_matches('/'));

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    let mut has_query = false;
    for (key, value) in parsed.query_pairs() {
        if TRACKING_PARAMS.contains(&key.as_ref()) {
            continue;
        }
        query.append_pair(&key, &value);
        has_query = true;
    }
    if has_query {
        normalized.push('?');
        normalized.push_str(&query.finish());
    }

    Some(normalized)
}

/// Resolves redirects (capped at ten seconds) and normalises the landing URL.
/// Any failure falls back to the original URL unchanged, so callers always
/// get something usable as a dedup key.
pub async fn clean_url(client: &reqwest::Client, original_url: &str) -> String {
    let resolved = match client
        .get(original_url)
        .timeout(RESOLVE_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => response.url().to_string(),
        Err(e) => {
            info!("Error resolving URL {}: {}", original_url, e);
            return original_url.to_string();
        }
    };

    normalize_url(&resolved).unwrap_or_else(|| original_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_tracking_params() {
        let url = "https://example.com/a?utm_source=x&utm_medium=y&utm_campaign=z&utm_term=t&utm_content=c&ref=news&id=5";
        assert_eq!(
            normalize_url(url).unwrap(),
            "https://example.com/a?id=5".to_string()
        );
    }

    #[test]
    fn test_drops_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_url("https://example.com/a/b/#section").unwrap(),
            "https://example.com/a/b"
        );
    }

    #[test]
    fn test_lowercases_host_only() {
        assert_eq!(
            normalize_url("https://EXAMPLE.com/Path").unwrap(),
            "https://example.com/Path"
        );
    }

    #[test]
    fn test_keeps_explicit_port_and_other_params() {
        assert_eq!(
            normalize_url("https://example.com:8443/a?page=2&ref=feed").unwrap(),
            "https://example.com:8443/a?page=2"
        );
    }

    #[test]
    fn test_rejects_relative_input() {
        assert!(normalize_url("not a url").is_none());
        assert!(normalize_url("/relative/path").is_none());
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let samples = [
            "https://Example.COM/a/b/?utm_source=tw&x=1#frag",
            "http://example.com/",
            "https://example.com:8080/path?q=hello%20world",
            "https://example.com/a?ref=x",
        ];
        for sample in samples {
            let once = normalize_url(sample).unwrap();
            let twice = normalize_url(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {}", sample);
        }
    }
}
