//! Session routing: path-derived session ids and the live-session registry.

mod registry;

pub use registry::SessionRegistry;

/// Derive the session id from a request path.
///
/// `/<id>` and `/<id>/proxy-session` both map to `<id>`. Returns `None` when
/// nothing is left after stripping.
pub fn session_id_from_path(path: &str) -> Option<String> {
    let path = path.trim_start_matches('/');
    let id = match path.find("/proxy-session") {
        Some(idx) => &path[..idx],
        None if path == "proxy-session" => "",
        None => path,
    };
    let id = id.trim_end_matches('/');
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}
