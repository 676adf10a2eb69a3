//! Prometheus collector for connection pool health
//!
//! Gauges are read from the pool at scrape time; counters mirror the
//! [`PoolStats`] event counts.

use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntCounter, IntGauge, Opts};

use crate::pool::{PoolStats, RedisPool};

pub const DEFAULT_NAMESPACE: &str = "kv";
pub const DEFAULT_SUBSYSTEM: &str = "redis";

struct Metrics {
    idle: IntGauge,
    total: IntGauge,
    stale: IntCounter,
    hits: IntCounter,
    misses: IntCounter,
    timeouts: IntCounter,
}

struct Inner {
    pool: RedisPool,
    stats: Arc<PoolStats>,
    metrics: Metrics,
    descs: Vec<Desc>,
}

/// Pool health collector, cheap to clone.
#[derive(Clone)]
pub struct PoolCollector {
    inner: Arc<Inner>,
}

impl PoolCollector {
    pub fn new(pool: RedisPool, stats: Arc<PoolStats>) -> prometheus::Result<Self> {
        Self::with_namespace(pool, stats, DEFAULT_NAMESPACE, DEFAULT_SUBSYSTEM)
    }

    pub fn with_namespace(
        pool: RedisPool,
        stats: Arc<PoolStats>,
        namespace: &str,
        subsystem: &str,
    ) -> prometheus::Result<Self> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace(namespace)
                .subsystem(subsystem)
        };

        let metrics = Metrics {
            idle: IntGauge::with_opts(opts(
                "pool_conn_idle_current",
                "Current number of idle connections in the pool",
            ))?,
            total: IntGauge::with_opts(opts(
                "pool_conn_total_current",
                "Current number of connections in the pool",
            ))?,
            stale: IntCounter::with_opts(opts(
                "pool_conn_stale_total",
                "Number of stale connections removed from the pool",
            ))?,
            hits: IntCounter::with_opts(opts(
                "pool_hit_total",
                "Number of times a free connection was found in the pool",
            ))?,
            misses: IntCounter::with_opts(opts(
                "pool_miss_total",
                "Number of times a free connection was not found in the pool",
            ))?,
            timeouts: IntCounter::with_opts(opts(
                "pool_timeout_total",
                "Number of times a wait for a connection timed out",
            ))?,
        };

        let descs = metrics
            .collectors()
            .iter()
            .flat_map(|c| c.desc())
            .cloned()
            .collect();

        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                stats,
                metrics,
                descs,
            }),
        })
    }
}

impl Metrics {
    fn collectors(&self) -> [&dyn Collector; 6] {
        [
            &self.idle,
            &self.total,
            &self.stale,
            &self.hits,
            &self.misses,
            &self.timeouts,
        ]
    }
}

fn catch_up(counter: &IntCounter, observed: u64) {
    let current = counter.get();
    if observed > current {
        counter.inc_by(observed - current);
    }
}

fn as_gauge<T: TryInto<i64>>(value: T) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

impl Collector for PoolCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.inner.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let Inner {
            pool,
            stats,
            metrics,
            ..
        } = &*self.inner;

        let status = pool.status();
        metrics.idle.set(as_gauge(status.available));
        metrics.total.set(as_gauge(status.size));
        catch_up(&metrics.stale, stats.stale());
        catch_up(&metrics.hits, stats.hits());
        catch_up(&metrics.misses, stats.misses());
        catch_up(&metrics.timeouts, stats.timeouts());

        metrics
            .collectors()
            .iter()
            .flat_map(|c| c.collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;
    use crate::pool::{Role, build_pool};

    fn collector(namespace: &str) -> (PoolCollector, Arc<PoolStats>) {
        let mut config = RedisConfig::standalone("127.0.0.1:1").with_pool_size(4);
        config.init_defaults();
        let stats = Arc::new(PoolStats::default());
        let pool = build_pool(Arc::new(config), None, Arc::clone(&stats), Role::Primary).unwrap();
        let collector =
            PoolCollector::with_namespace(pool, Arc::clone(&stats), namespace, "redis").unwrap();
        (collector, stats)
    }

    fn render(collector: &PoolCollector) -> String {
        prometheus::TextEncoder::new()
            .encode_to_string(&collector.collect())
            .unwrap()
    }

    #[test]
    fn exposes_six_pool_metrics() {
        let (collector, _) = collector("kv");
        let registry = prometheus::Registry::new();
        registry.register(Box::new(collector.clone())).unwrap();
        assert_eq!(registry.gather().len(), 6);

        let text = render(&collector);
        for name in [
            "kv_redis_pool_conn_idle_current",
            "kv_redis_pool_conn_total_current",
            "kv_redis_pool_conn_stale_total",
            "kv_redis_pool_hit_total",
            "kv_redis_pool_miss_total",
            "kv_redis_pool_timeout_total",
        ] {
            assert!(text.contains(&format!("# TYPE {name} ")), "missing {name}");
        }
    }

    #[test]
    fn counters_follow_pool_stats() {
        let (collector, stats) = collector("rr");
        stats.record_hit();
        stats.record_hit();
        stats.record_timeout();

        let text = render(&collector);
        assert!(text.contains("rr_redis_pool_hit_total 2\n"));
        assert!(text.contains("rr_redis_pool_timeout_total 1\n"));
        assert!(text.contains("rr_redis_pool_miss_total 0\n"));
        assert!(text.contains("rr_redis_pool_conn_total_current 0\n"));

        stats.record_hit();
        assert!(render(&collector).contains("rr_redis_pool_hit_total 3\n"));
    }
}
