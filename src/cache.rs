//! TTL response cache used by [`SimplePipeline`](crate::pipeline::SimplePipeline).

use crate::types::{Request, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// In-memory cache of successful responses with a fixed time-to-live.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Response)>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache key: provider plus every request field that changes the output.
    pub fn key(provider: &str, request: &Request) -> String {
        let mut params: Vec<_> = request.parameters.iter().collect();
        params.sort_by(|a, b| a.0.cmp(b.0));
        let params: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!(
            "{}\u{1f}{:?}\u{1f}{:?}\u{1f}{}\u{1f}{}",
            provider,
            request.temperature,
            request.max_tokens,
            params.join("&"),
            request.prompt
        )
    }

    /// Fetch a live entry, evicting it if expired.
    pub fn get(&self, key: &str) -> Option<Response> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((stored, resp)) if stored.elapsed() < self.ttl => Some(resp.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, response: Response) {
        self.entries.lock().insert(key, (Instant::now(), response));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hit_and_miss() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let req = Request::new("hi");
        let key = ResponseCache::key("p", &req);
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), Response::new("hello", "p", "m"));
        assert_eq!(cache.get(&key).unwrap().content, "hello");
    }

    #[test]
    fn test_expired_entry_evicted() {
        let cache = ResponseCache::new(Duration::ZERO);
        let key = ResponseCache::key("p", &Request::new("hi"));
        cache.insert(key.clone(), Response::new("hello", "p", "m"));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_depends_on_settings() {
        let a = ResponseCache::key("p", &Request::new("hi"));
        let b = ResponseCache::key("p", &Request::new("hi").with_temperature(0.1));
        let c = ResponseCache::key("q", &Request::new("hi"));
        let d = ResponseCache::key("p", &Request::new("hi").with_parameter("k", json!(1)));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
