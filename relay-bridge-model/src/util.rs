//! Small stateless helpers shared by the gateway and provider.

/// Join a bridge base URL with a path segment, tolerating a trailing slash
/// on the base and a leading slash on the segment.
///
/// `join("https://bridge.example.com/", "events")` and
/// `join("https://bridge.example.com", "/events")` both yield
/// `"https://bridge.example.com/events"`.
pub fn join_path(base: &str, segment: &str) -> String {
    let base = base.trim_end_matches('/');
    let segment = segment.trim_start_matches('/');
    format!("{base}/{segment}")
}
