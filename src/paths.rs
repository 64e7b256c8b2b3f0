//! Request classification.
//!
//! Decides whether an outbound request writes a file and, if so, which
//! logical path(s) it writes to. Everything here is pure: no I/O, no state.
//! Paths stay percent-encoded exactly as the host application put them on
//! the wire, so `/photos/a%20b.jpg` and `/photos/a b.jpg` are different keys.

use axum::http::{Method, Uri};

/// generic "resource write" surface of the file manager
pub const RESOURCE_PREFIX: &str = "/api/resources";
/// resumable ("tus") session surface
pub const TUS_PREFIX: &str = "/api/tus";

/// what the request body looked like, as far as classification cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// no body at all
    Empty,
    /// json, urlencoded forms, plain text
    Text,
    /// a raw blob, optionally carrying a file name
    Binary { name: Option<String> },
    /// multipart form data with the file names of its parts, `None` when
    /// the parts could not be read
    Multipart { file_names: Option<Vec<String>> },
}

impl Payload {
    pub fn carries_binary(&self) -> bool {
        matches!(self, Payload::Binary { .. } | Payload::Multipart { .. })
    }

    /// distinct, non-empty file names in first-seen order
    pub fn file_names(&self) -> Vec<String> {
        let raw: Vec<&String> = match self {
            Payload::Binary { name: Some(name) } => vec![name],
            Payload::Multipart { file_names: Some(names) } => names.iter().collect(),
            _ => Vec::new(),
        };

        let mut names: Vec<String> = Vec::with_capacity(raw.len());
        for name in raw {
            if !name.is_empty() && !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

/// which leg of the resumable protocol a call is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TusCall {
    /// `POST`: session creation, declares the total length
    Create,
    /// `PATCH`: append, answers with the new offset
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// not an upload, nothing to track
    Ignored,
    /// direct write, one entry per target path
    Simple(Vec<String>),
    /// multipart write into `dir` whose file names are unknown
    Unnamed { dir: String },
    /// one call of a resumable session
    Resumable { path: String, call: TusCall },
}

impl Resolution {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Resolution::Ignored)
    }
}

/// classify a request by method, target and payload
pub fn resolve(method: &Method, target: &str, payload: &Payload) -> Resolution {
    if let Some(path) = tus_upload_path(target) {
        let call = if *method == Method::POST {
            TusCall::Create
        } else if *method == Method::PATCH {
            TusCall::Append
        } else {
            return Resolution::Ignored;
        };
        return Resolution::Resumable { path, call };
    }

    if let Payload::Multipart { file_names: None } = payload {
        return match resource_target(method, target) {
            Some(raw) => Resolution::Unnamed { dir: normalize_path(&raw) },
            None => Resolution::Ignored,
        };
    }

    let paths = resource_upload_paths(method, target, payload);
    if paths.is_empty() {
        Resolution::Ignored
    } else {
        Resolution::Simple(paths)
    }
}

/// normalized session path for a tus target, root is never a valid session
pub fn tus_upload_path(target: &str) -> Option<String> {
    let raw = extract_api_path(target, TUS_PREFIX)?;
    let path = normalize_path(&raw);
    if path == "/" {
        return None;
    }
    Some(path)
}

/// target paths written by a request to the resource surface
pub fn resource_upload_paths(method: &Method, target: &str, payload: &Payload) -> Vec<String> {
    let Some(raw) = resource_target(method, target) else {
        return Vec::new();
    };
    if !payload.carries_binary() {
        return Vec::new();
    }

    let names = payload.file_names();
    let base = normalize_path(&raw);

    if names.is_empty() {
        if base == "/" {
            return Vec::new();
        }
        return vec![base];
    }

    // a single part named like the target is a plain write to that path
    if names.len() == 1 && !raw.is_empty() && raw != "/" && path_ends_with_file_name(&raw, &names[0]) {
        return vec![base];
    }

    names
        .iter()
        .map(|name| join_dir_and_file(&base, name))
        .collect()
}

// raw resource path of a write request
fn resource_target(method: &Method, target: &str) -> Option<String> {
    if *method != Method::POST && *method != Method::PUT {
        return None;
    }
    extract_api_path(target, RESOURCE_PREFIX)
}

/// suffix of the url path after `prefix`
///
/// The path equal to the prefix yields an empty suffix; paths that merely
/// share a leading substring (`/api/resourcesX`) do not match.
pub fn extract_api_path(target: &str, prefix: &str) -> Option<String> {
    let uri: Uri = target.parse().ok()?;
    let path = uri.path();
    if path == prefix {
        return Some(String::new());
    }
    let rest = path.strip_prefix(prefix)?;
    if !rest.starts_with('/') {
        return None;
    }
    Some(rest.to_string())
}

/// leading slash, no trailing slash, empty means root
pub fn normalize_path(raw: &str) -> String {
    if raw.is_empty() {
        return "/".to_string();
    }
    let mut path = if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    };
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

// strip any directory component so a crafted name can't walk out of the target dir
pub fn sanitize_file_name(name: &str) -> &str {
    fn after_last(s: &str, sep: char) -> &str {
        match s.rfind(sep) {
            Some(i) if i + 1 < s.len() => &s[i + 1..],
            _ => s,
        }
    }
    after_last(after_last(name, '/'), '\\')
}

/// whether the last segment of an encoded path names `file_name`
pub fn path_ends_with_file_name(path: &str, file_name: &str) -> bool {
    if path.is_empty() || file_name.is_empty() {
        return false;
    }
    let last = path.rsplit('/').next().unwrap_or("");
    if let Ok(decoded) = urlencoding::decode(last) {
        if decoded == file_name {
            return true;
        }
    }
    last == urlencoding::encode(file_name)
}

/// encoded path of `file_name` inside the encoded directory `dir`
pub fn join_dir_and_file(dir: &str, file_name: &str) -> String {
    let dir = normalize_path(dir);
    let encoded = urlencoding::encode(sanitize_file_name(file_name));
    if dir == "/" {
        format!("/{encoded}")
    } else {
        format!("{dir}/{encoded}")
    }
}

/// decoded last segment of an encoded path, used as a display label
pub fn file_label(path: &str) -> String {
    let last = path.rsplit('/').next().unwrap_or("");
    urlencoding::decode(last)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| last.to_string())
}
