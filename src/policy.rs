//! Redirect and retry decisions.

use crate::request::Target;
use crate::Error;
use http::uri::{Authority, Scheme, Uri};
use http::{Method, StatusCode};

/// Decides how a request is rewritten when following a redirect.
pub trait RedirectPolicy {
    /// Method to use when following a `status` redirect of a `method` request,
    /// and whether the payload should be sent again.
    fn redirect_method(&self, status: StatusCode, method: &Method) -> (Method, bool);
}

/// Browser style redirects.
///
/// 301 and 302 turn POST into GET, 303 turns everything but HEAD into GET.
/// 307 and 308 keep method and payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct DowngradeRedirects;

impl RedirectPolicy for DowngradeRedirects {
    fn redirect_method(&self, status: StatusCode, method: &Method) -> (Method, bool) {
        match status {
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND if *method == Method::POST => {
                (Method::GET, false)
            }
            StatusCode::SEE_OTHER if *method != Method::HEAD => (Method::GET, false),
            _ => (method.clone(), true),
        }
    }
}

/// Keep the method for every redirect except 303.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreserveMethodRedirects;

impl RedirectPolicy for PreserveMethodRedirects {
    fn redirect_method(&self, status: StatusCode, method: &Method) -> (Method, bool) {
        if status == StatusCode::SEE_OTHER && *method != Method::HEAD {
            (Method::GET, false)
        } else {
            (method.clone(), true)
        }
    }
}

pub(crate) fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Resolve a `location` header against the target it came from, following
/// RFC 3986 reference resolution.
pub(crate) fn redirect_target(current: &Target, location: &str) -> Result<Target, Error> {
    let location = location.trim();

    if location.is_empty() {
        return Err(Error::Protocol("Empty redirect location".into()));
    }

    let invalid = || Error::Protocol(format!("Invalid redirect location: {}", location));

    // fragments never go on the wire
    let reference = location.split('#').next().unwrap_or("");

    if reference.starts_with("//") {
        let scheme = if current.secure { "https:" } else { "http:" };
        return absolute_target(&format!("{}{}", scheme, reference)).ok_or_else(invalid);
    }

    let current_path = current.path.split('?').next().unwrap_or("");

    let path = if reference.is_empty() {
        current.path.clone()
    } else if reference.starts_with('?') {
        format!("{}{}", current_path, reference)
    } else if reference.starts_with('/') {
        normalize(reference)
    } else if let Some(target) = absolute_target(reference) {
        return Ok(target);
    } else if reference.contains("://") {
        return Err(invalid());
    } else {
        // relative to the directory of the current path
        let dir = match current_path.rfind('/') {
            Some(i) => &current_path[..=i],
            None => "/",
        };
        normalize(&format!("{}{}", dir, reference))
    };

    Ok(Target {
        path,
        ..current.clone()
    })
}

fn absolute_target(location: &str) -> Option<Target> {
    let uri: Uri = location.parse().ok()?;

    let secure = match uri.scheme() {
        Some(s) if *s == Scheme::HTTPS => true,
        Some(s) if *s == Scheme::HTTP => false,
        _ => return None,
    };

    let authority: &Authority = uri.authority()?;

    let host = authority.host().trim_start_matches('[').trim_end_matches(']');

    if host.is_empty() {
        return None;
    }

    let path = uri
        .path_and_query()
        .map(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("/");

    Some(Target {
        host: host.to_string(),
        port: authority.port_u16(),
        path: normalize(path),
        secure,
    })
}

/// Remove `.` and `..` segments from the path, leaving the query as is.
fn normalize(path_and_query: &str) -> String {
    let (path, query) = match path_and_query.find('?') {
        Some(i) => path_and_query.split_at(i),
        None => (path_and_query, ""),
    };

    let segments: Vec<&str> = path.split('/').skip(1).collect();
    let last = segments.len().saturating_sub(1);

    let mut out: Vec<&str> = vec![];

    for (i, seg) in segments.iter().enumerate() {
        match *seg {
            "." | ".." => {
                if *seg == ".." {
                    out.pop();
                }
                // "/a/b/.." resolves to the directory "/a/"
                if i == last {
                    out.push("");
                }
            }
            s => out.push(s),
        }
    }

    format!("/{}{}", out.join("/"), query)
}

/// Whether another try is allowed after bumping the try counter to `tries`.
///
/// `max_attempts` counts total tries, 0 is treated like 1.
pub(crate) fn may_retry(tries: u32, max_attempts: u32) -> bool {
    tries < max_attempts.max(1)
}
