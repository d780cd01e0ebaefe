use crate::UrlError;
use url::Url;

/// List of tracking query parameters ignored when computing a URL's identity
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
];

/// Parses and validates a URL submitted for extraction
///
/// The URL must be absolute, use `http` or `https` and carry a host. The
/// fragment is dropped since it never reaches the server; everything else is
/// kept as submitted so the fetcher requests exactly what the caller asked for.
///
/// # Examples
///
/// ```
/// use batch_harvest::url::parse_target_url;
///
/// let url = parse_target_url("https://Example.com/page#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page");
/// ```
pub fn parse_target_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingHost),
    }

    url.set_fragment(None);

    Ok(url)
}

/// Builds the canonical identity string of a URL
///
/// Two submissions that differ only in host case, `www.` prefix, trailing
/// slash, dot segments, fragment, tracking parameters or query parameter order
/// share the same canonical form.
pub fn canonical_form(url: &Url) -> Result<String, UrlError> {
    let mut canonical = url.clone();

    if let Some(host) = url.host_str() {
        let lowered = host.to_lowercase();
        let stripped = lowered.strip_prefix("www.").unwrap_or(&lowered);
        canonical
            .set_host(Some(stripped))
            .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
    } else {
        return Err(UrlError::MissingHost);
    }

    let path = normalize_path(url.path());
    canonical.set_path(&path);
    canonical.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(url);
        if params.is_empty() {
            canonical.set_query(None);
        } else {
            let query_string = params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            canonical.set_query(Some(&query_string));
        }
    }

    Ok(canonical.to_string())
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
