use std::collections::HashMap;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::state::AppState;

#[derive(Clone, Default)]
struct RouteStats {
    hits: u64,
    errors: u64,
    total_latency_ms: u128,
}

/// Per-route request counters and cumulative latency.
#[derive(Default)]
pub struct GatewayMetrics {
    routes: Mutex<HashMap<String, RouteStats>>,
}

impl GatewayMetrics {
    pub fn record(&self, route: &str, status: u16, elapsed_ms: u128) {
        let mut routes = self.routes.lock();
        let stats = routes.entry(route.to_string()).or_default();
        stats.hits += 1;
        if status >= 400 {
            stats.errors += 1;
        }
        stats.total_latency_ms += elapsed_ms;
    }

    pub fn snapshot(&self) -> Value {
        let routes = self.routes.lock();
        let mut out = serde_json::Map::new();
        for (route, stats) in routes.iter() {
            let avg = if stats.hits > 0 {
                stats.total_latency_ms / stats.hits as u128
            } else {
                0
            };
            out.insert(
                route.clone(),
                json!({
                    "hits": stats.hits,
                    "errors": stats.errors,
                    "avg_latency_ms": avg as u64,
                }),
            );
        }
        Value::Object(out)
    }
}

pub async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let route = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    state.metrics.record(
        &route,
        response.status().as_u16(),
        started.elapsed().as_millis(),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_hits_errors_and_latency() {
        let metrics = GatewayMetrics::default();
        metrics.record("/chat-processor", 200, 30);
        metrics.record("/chat-processor", 402, 10);
        metrics.record("/health", 200, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["/chat-processor"]["hits"], 2);
        assert_eq!(snapshot["/chat-processor"]["errors"], 1);
        assert_eq!(snapshot["/chat-processor"]["avg_latency_ms"], 20);
        assert_eq!(snapshot["/health"]["errors"], 0);
    }
}
