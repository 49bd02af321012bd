//! Node path helpers and the path ensurer.

use tracing::debug;
use tracing::warn;

use crate::session::CoordinationSession;
use crate::session::CreateMode;
use crate::Error;
use crate::Result;

/// Canonical absolute form of `path`: empty segments are dropped and the
/// remaining ones joined behind a single leading `/`.
///
/// `"_test/nodes"`, `"/_test//nodes/"` and `"/_test/nodes"` all normalize to
/// `"/_test/nodes"`; an empty path normalizes to `"/"`.
pub fn normalize_path(path: &str) -> String {
    let joined = path.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/");
    format!("/{joined}")
}

/// `base` + `/` + `child`, normalized
pub fn join_path(
    base: &str,
    child: &str,
) -> String {
    normalize_path(&format!("{base}/{child}"))
}

/// Splits a normalized path into `(parent, last segment)`
pub(crate) fn split_parent(path: &str) -> (String, Option<String>) {
    let path = normalize_path(path);
    match path.rfind('/') {
        Some(idx) if idx + 1 < path.len() => {
            let parent = if idx == 0 { "/".to_string() } else { path[..idx].to_string() };
            (parent, Some(path[idx + 1..].to_string()))
        }
        _ => (path, None),
    }
}

/// Creates every missing node on the way to `path` as a persistent node and
/// returns the normalized terminal path.
///
/// Safe to call concurrently: when another caller creates a node between our
/// existence check and our create, the resulting "already exists" is treated
/// as success.
pub(crate) async fn ensure_path(
    session: &dyn CoordinationSession,
    path: &str,
) -> Result<String> {
    let mut current = String::new();

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);

        if session.exists(&current).await? {
            continue;
        }

        match session.create(&current, &[], CreateMode::Persistent).await {
            Ok(_) => debug!(path = %current, "created znode"),
            Err(e) if e.is_node_exists() => {
                debug!(path = %current, "znode created concurrently, continuing");
            }
            Err(e) => {
                warn!(path = %current, "Failed to create znode: {}", e);
                return Err(Error::PathCreateFailed {
                    path: current,
                    source: e,
                });
            }
        }
    }

    if current.is_empty() {
        current.push('/');
    }
    Ok(current)
}
