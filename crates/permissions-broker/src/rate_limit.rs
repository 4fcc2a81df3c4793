use std::time::{Duration, Instant};

use dashmap::DashMap;
use flexquery_core_types::{Caller, OperationKind};
use flexquery_policy_center::RateLimitSpec;

/// Most specific limit wins: role, then entity, then the global setting.
pub fn resolve_limit(
    role: Option<&RateLimitSpec>,
    entity: Option<&RateLimitSpec>,
    global: Option<u32>,
    op: OperationKind,
) -> Option<u32> {
    role.and_then(|spec| spec.limit_for(op))
        .or_else(|| entity.and_then(|spec| spec.limit_for(op)))
        .or(global)
}

/// A zero limit rejects every request and asks the caller to wait one window.
const REFILL_WINDOW: Duration = Duration::from_secs(60);

/// Token buckets keyed by caller identity, role, entity and operation.
///
/// Refill is computed from elapsed time on each call; nothing runs in the background.
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    trust_forwarded_for: bool,
}

impl RateLimiter {
    pub fn new(trust_forwarded_for: bool) -> Self {
        Self {
            buckets: DashMap::new(),
            trust_forwarded_for,
        }
    }

    /// Authenticated callers by id, everyone else by network address.
    pub fn identity(&self, caller: &Caller) -> String {
        if let Some(id) = caller.identity_key() {
            return format!("user:{id}");
        }
        match caller.client_address(self.trust_forwarded_for) {
            Some(addr) => format!("addr:{addr}"),
            None => "addr:unknown".to_string(),
        }
    }

    pub fn bucket_key(&self, caller: &Caller, role: &str, entity: &str, op: OperationKind) -> String {
        format!("{}:{role}:{entity}:{op}", self.identity(caller))
    }

    /// Takes one token, or returns how long until one is available.
    pub fn acquire(&self, key: &str, per_minute: u32) -> Result<(), Duration> {
        self.acquire_at(key, per_minute, Instant::now())
    }

    pub fn acquire_at(&self, key: &str, per_minute: u32, now: Instant) -> Result<(), Duration> {
        if per_minute == 0 {
            return Err(REFILL_WINDOW);
        }
        let refill = per_minute as f64 / 60.0;
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(per_minute, now));
        entry.take(per_minute, refill, now)
    }

    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        if max_idle.is_zero() {
            return 0;
        }
        let now = Instant::now();
        let stale: Vec<String> = self
            .buckets
            .iter()
            .filter_map(|entry| {
                if entry.value().is_idle(now, max_idle) {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect();
        let mut removed = 0;
        for key in stale {
            if self.buckets.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[derive(Clone)]
struct TokenBucket {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: capacity as f64,
            last: now,
        }
    }

    fn take(&mut self, capacity: u32, refill_per_sec: f64, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity as f64);
        self.last = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / refill_per_sec))
        }
    }

    fn is_idle(&self, now: Instant, max_idle: Duration) -> bool {
        now.saturating_duration_since(self.last) >= max_idle
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_limit, RateLimiter, TokenBucket};
    use flexquery_core_types::{Caller, OperationKind};
    use flexquery_policy_center::RateLimitSpec;
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    #[test]
    fn bucket_drains_then_refills() {
        let limiter = RateLimiter::new(false);
        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.acquire_at("k", 3, start).is_ok());
        }
        let retry = limiter.acquire_at("k", 3, start).unwrap_err();
        assert!(retry > Duration::from_secs(19) && retry <= Duration::from_secs(20));
        assert!(limiter
            .acquire_at("k", 3, start + Duration::from_secs(21))
            .is_ok());
    }

    #[test]
    fn zero_limit_rejects_every_request() {
        let limiter = RateLimiter::new(false);
        for _ in 0..5 {
            assert_eq!(limiter.acquire("k", 0), Err(Duration::from_secs(60)));
        }
        assert!(limiter.is_empty());
    }

    #[test]
    fn zero_role_limit_shadows_looser_limits() {
        let role = RateLimitSpec::PerMinute(0);
        let entity = RateLimitSpec::PerMinute(100);
        assert_eq!(
            resolve_limit(Some(&role), Some(&entity), Some(1_000), OperationKind::List),
            Some(0)
        );
    }

    #[test]
    fn precedence_prefers_the_role_operation() {
        let role = RateLimitSpec::PerOperation {
            default: None,
            ops: BTreeMap::from([(OperationKind::List, 5)]),
        };
        let entity = RateLimitSpec::PerMinute(30);
        assert_eq!(
            resolve_limit(Some(&role), Some(&entity), Some(100), OperationKind::List),
            Some(5)
        );
        assert_eq!(
            resolve_limit(Some(&role), Some(&entity), Some(100), OperationKind::Get),
            Some(30)
        );
        assert_eq!(
            resolve_limit(None, None, Some(100), OperationKind::Get),
            Some(100)
        );
        assert_eq!(resolve_limit(None, None, None, OperationKind::Get), None);
    }

    #[test]
    fn anonymous_callers_key_by_address() {
        let caller = Caller::anonymous()
            .with_remote_addr("10.0.0.7".parse().unwrap())
            .with_forwarded_for("203.0.113.9");
        assert_eq!(RateLimiter::new(false).identity(&caller), "addr:10.0.0.7");
        assert_eq!(RateLimiter::new(true).identity(&caller), "addr:203.0.113.9");
        assert_eq!(RateLimiter::new(false).identity(&Caller::anonymous()), "addr:unknown");
        assert_eq!(
            RateLimiter::new(false).bucket_key(&Caller::user(4), "staff", "article", OperationKind::List),
            "user:4:staff:article:list"
        );
    }

    #[test]
    fn prune_idle_removes_stale_buckets() {
        let limiter = RateLimiter::new(false);
        let now = Instant::now();
        limiter
            .buckets
            .insert("fresh".into(), TokenBucket::new(5, now));
        limiter.buckets.insert(
            "stale".into(),
            TokenBucket {
                tokens: 1.0,
                last: now - Duration::from_secs(2),
            },
        );
        assert_eq!(limiter.prune_idle(Duration::from_secs(1)), 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.prune_idle(Duration::ZERO), 0);
    }
}
