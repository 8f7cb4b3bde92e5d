//! Mount routing: maps a request host and path to a target.
//!
//! Targets bound to the request host win over host-less targets; within each
//! group the longest matching mount path wins. The request path handed to the
//! gateway is the remainder after the mount path, keeping its leading `/`
//! (`/docs/a/b.txt` on mount `/docs/` routes to `/a/b.txt`).

use s3gate_core::target::{Snapshot, TargetEntry};

/// The result of routing a request to a target.
#[derive(Debug, Clone)]
pub struct Route<'a> {
    /// The matched target.
    pub entry: &'a TargetEntry,
    /// The mount path that matched (e.g. `/docs/`).
    pub mount_path: &'a str,
    /// Raw (still percent-encoded) path below the mount point.
    pub raw_request_path: &'a str,
}

/// Resolve `host` and `path` against the targets of `snapshot`.
#[must_use]
pub fn resolve<'a>(snapshot: &'a Snapshot, host: Option<&str>, path: &'a str) -> Option<Route<'a>> {
    let host = host.map(strip_port);
    let mut best: Option<(bool, Route<'a>)> = None;

    for entry in &snapshot.targets {
        let mount = &entry.target.config.mount;
        let host_bound = match mount.host.as_deref() {
            Some(wanted) => {
                if !host.is_some_and(|h| h.eq_ignore_ascii_case(strip_port(wanted))) {
                    continue;
                }
                true
            }
            None => false,
        };

        for mount_path in &mount.paths {
            if !path.starts_with(mount_path.as_str()) {
                continue;
            }
            let better = best.as_ref().is_none_or(|(bound, route)| {
                (host_bound, mount_path.len()) > (*bound, route.mount_path.len())
            });
            if better {
                best = Some((
                    host_bound,
                    Route {
                        entry,
                        mount_path,
                        raw_request_path: &path[mount_path.len() - 1..],
                    },
                ));
            }
        }
    }

    best.map(|(_, route)| route)
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.split(':').next().unwrap_or(host)
}
