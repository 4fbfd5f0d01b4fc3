//! URL completion rules shared by extraction and virtualization.
//!
//! Markup on the origin site references resources in three shapes:
//!
//! - protocol-relative (`//img.host/a.jpg`), completed to `https://img.host/a.jpg`
//! - root-relative (`/manga/x/`), completed against the origin host
//! - already absolute (`https://host/x`), kept as is
//!
//! Document-relative references are resolved against the page they were found
//! on. Anything that does not end up as an `http`/`https` URL with a host is
//! rejected. Fragments never survive normalization.

use url::Url;

const DEFAULT_EXTENSION: &str = "jpg";
const MAX_EXTENSION_LEN: usize = 5;

pub fn normalize_url(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut url = if let Some(rest) = raw.strip_prefix("//") {
        Url::parse(&format!("https://{rest}")).ok()?
    } else if raw.starts_with('/') {
        base.join(raw).ok()?
    } else {
        match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => base.join(raw).ok()?,
            Err(_) => return None,
        }
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.host_str()?;
    url.set_fragment(None);
    Some(url)
}

/// Key used to detect the same target referenced twice on one page.
pub fn dedup_key(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    let mut path = canonical.path().to_owned();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    canonical.set_path(&path);
    canonical.to_string()
}

/// Last dot-segment of the final path segment, lowercased; `jpg` when the
/// path carries nothing usable.
pub fn extension_of(url: &Url) -> String {
    let last_segment = url
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or_default();

    let Some((stem, ext)) = last_segment.rsplit_once('.') else {
        return DEFAULT_EXTENSION.to_owned();
    };
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return DEFAULT_EXTENSION.to_owned();
    }
    ext.to_ascii_lowercase()
}

/// Turns a client supplied chapter reference into a clean relative path.
///
/// The reference is percent-decoded, a same-host absolute URL is reduced to
/// its path, and repeated or surrounding slashes are dropped. Returns `None`
/// for references that are empty, point at another host, or try to walk out
/// of the site root.
pub fn normalize_chapter_ref(origin: &Url, raw: &str) -> Option<String> {
    let decoded = urlencoding::decode(raw.trim()).ok()?;
    let mut path = decoded.into_owned();

    if path.starts_with("http://") || path.starts_with("https://") {
        let url = normalize_url(origin, &path)?;
        if !same_site(origin, &url) {
            return None;
        }
        path = url.path().to_owned();
    }

    let segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    if segments.is_empty() {
        return None;
    }
    let unsafe_segment = segments.iter().any(|segment| {
        *segment == "."
            || *segment == ".."
            || segment
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '\\' | '?' | '#'))
    });
    if unsafe_segment {
        return None;
    }

    Some(segments.join("/"))
}

/// Relative chapter reference for a chapter link found on an item page.
pub fn chapter_ref_from_url(origin: &Url, url: &Url) -> Option<String> {
    if !same_site(origin, url) {
        return None;
    }
    normalize_chapter_ref(origin, url.path())
}

/// Item slug for links shaped like `/manga/<slug>/`.
pub fn item_slug(url: &Url) -> Option<String> {
    let segments = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    match segments.as_slice() {
        ["manga", slug] if is_valid_entity_id(slug) => Some((*slug).to_owned()),
        _ => None,
    }
}

pub fn is_valid_entity_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && !id.contains("..")
        && !id.chars().any(|c| {
            c.is_whitespace() || c.is_control() || matches!(c, '/' | '\\' | '?' | '#' | '%')
        })
}

/// Whether `url` is served by the same host as `origin`, ignoring a leading `www.`.
pub fn same_site(origin: &Url, url: &Url) -> bool {
    match (origin.host_str(), url.host_str()) {
        (Some(a), Some(b)) => strip_www(a).eq_ignore_ascii_case(strip_www(b)),
        _ => false,
    }
}

/// Whether the host of `url` equals, or is a subdomain of, one of `allowed`.
pub fn host_allowed(url: &Url, allowed: &[String]) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    allowed.iter().any(|domain| {
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
    })
}

pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}
