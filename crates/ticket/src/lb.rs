//! Round-robin load balancer over the LLM summarizer pool, with per-node
//! health flags and counters.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

struct Node {
    url: String,
    healthy: AtomicBool,
    req_count: AtomicU64,
    err_count: AtomicU64,
}

pub struct LoadBalancer {
    nodes: Vec<Node>,
    cursor: AtomicUsize,
}

#[derive(Debug, Serialize)]
pub struct NodeStats {
    pub url: String,
    pub healthy: bool,
    pub request_count: u64,
    pub error_count: u64,
}

#[derive(Debug, Serialize)]
pub struct LbStats {
    pub total_endpoints: usize,
    pub healthy_endpoints: usize,
    pub endpoints: Vec<NodeStats>,
}

impl LoadBalancer {
    pub fn new(urls: Vec<String>) -> Self {
        info!(nodes = urls.len(), "load balancer initialized");
        for url in &urls {
            info!(%url, "summarizer node");
        }
        let nodes = urls
            .into_iter()
            .map(|url| Node {
                url,
                healthy: AtomicBool::new(true),
                req_count: AtomicU64::new(0),
                err_count: AtomicU64::new(0),
            })
            .collect();
        Self {
            nodes,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Next healthy node in round-robin order. When every node is down, a
    /// random one is chosen so the next call still gets an attempt.
    pub fn next(&self) -> (usize, String) {
        for _ in 0..self.nodes.len() {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
            let node = &self.nodes[idx];
            if node.healthy.load(Ordering::Relaxed) {
                node.req_count.fetch_add(1, Ordering::Relaxed);
                debug!(url = %node.url, "node selected");
                return (idx, node.url.clone());
            }
        }

        warn!("no healthy summarizer nodes, picking one at random");
        let idx = rand::rng().random_range(0..self.nodes.len());
        let node = &self.nodes[idx];
        node.req_count.fetch_add(1, Ordering::Relaxed);
        (idx, node.url.clone())
    }

    pub fn mark_healthy(&self, idx: usize) {
        if let Some(node) = self.nodes.get(idx) {
            let was_down = !node.healthy.swap(true, Ordering::Relaxed);
            if was_down {
                info!(url = %node.url, "node recovered");
            }
        }
    }

    pub fn mark_unhealthy(&self, idx: usize) {
        if let Some(node) = self.nodes.get(idx) {
            node.healthy.store(false, Ordering::Relaxed);
            let errors = node.err_count.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(url = %node.url, errors, "node marked unhealthy");
        }
    }

    pub fn stats(&self) -> LbStats {
        let endpoints: Vec<NodeStats> = self
            .nodes
            .iter()
            .map(|node| NodeStats {
                url: node.url.clone(),
                healthy: node.healthy.load(Ordering::Relaxed),
                request_count: node.req_count.load(Ordering::Relaxed),
                error_count: node.err_count.load(Ordering::Relaxed),
            })
            .collect();
        LbStats {
            total_endpoints: endpoints.len(),
            healthy_endpoints: endpoints.iter().filter(|n| n.healthy).count(),
            endpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lb(n: usize) -> LoadBalancer {
        LoadBalancer::new((0..n).map(|i| format!("http://node-{i}")).collect())
    }

    #[test]
    fn round_robin_cycles_through_healthy_nodes() {
        let lb = lb(3);
        let picks: Vec<String> = (0..6).map(|_| lb.next().1).collect();
        assert_eq!(
            picks,
            vec![
                "http://node-0",
                "http://node-1",
                "http://node-2",
                "http://node-0",
                "http://node-1",
                "http://node-2",
            ]
        );
    }

    #[test]
    fn unhealthy_nodes_are_skipped_until_recovery() {
        let lb = lb(3);
        lb.mark_unhealthy(1);
        let picks: Vec<String> = (0..4).map(|_| lb.next().1).collect();
        assert!(picks.iter().all(|u| u != "http://node-1"));

        lb.mark_healthy(1);
        let later: Vec<String> = (0..3).map(|_| lb.next().1).collect();
        assert!(later.contains(&"http://node-1".to_string()));
    }

    #[test]
    fn all_down_still_yields_a_node() {
        let lb = lb(3);
        for idx in 0..3 {
            lb.mark_unhealthy(idx);
        }
        let (idx, url) = lb.next();
        assert!(idx < 3);
        assert!(url.starts_with("http://node-"));
    }

    #[test]
    fn stats_track_requests_and_errors() {
        let lb = lb(2);
        let _ = lb.next();
        let _ = lb.next();
        lb.mark_unhealthy(0);

        let stats = lb.stats();
        assert_eq!(stats.total_endpoints, 2);
        assert_eq!(stats.healthy_endpoints, 1);
        let total_reqs: u64 = stats.endpoints.iter().map(|n| n.request_count).sum();
        assert_eq!(total_reqs, 2);
        assert_eq!(stats.endpoints[0].error_count, 1);
        assert!(!stats.endpoints[0].healthy);
    }
}
