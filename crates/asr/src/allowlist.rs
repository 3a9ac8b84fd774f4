//! Peer-IP allow list, loaded once at startup.

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, warn};

pub struct AllowList {
    ips: HashSet<String>,
}

impl AllowList {
    /// Loads one IP per line; `#`-prefixed lines are comments. A missing or
    /// empty file allows every peer.
    pub fn load(path: &Path) -> Self {
        let ips = match std::fs::read_to_string(path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "allow list not readable, allowing all peers");
                HashSet::new()
            }
        };
        if ips.is_empty() {
            info!("allow list empty, all peers permitted");
        } else {
            info!(count = ips.len(), "allow list loaded");
        }
        Self { ips }
    }

    pub fn allow_all() -> Self {
        Self { ips: HashSet::new() }
    }

    #[cfg(test)]
    pub fn from_ips(ips: &[&str]) -> Self {
        Self {
            ips: ips.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn permits(&self, peer_ip: &str) -> bool {
        self.ips.is_empty() || self.ips.contains(peer_ip)
    }
}
