use futures_util::future::BoxFuture;
use std::time::Duration;
use tracing::debug;

/// `http://{host}:{port}/health`
pub fn health_url(host: &str, port: u16) -> String {
    format!("http://{}:{}/health", host, port)
}

/// One liveness check. Implementations never retry; the caller decides when
/// to probe again.
pub trait HealthProbe: Send + Sync {
    fn probe<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, bool>;
}

/// GET `/health`, healthy iff the status is exactly 200.
#[derive(Debug, Clone)]
pub struct HttpProber {
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn check(&self, host: &str, port: u16) -> bool {
        let url = health_url(host, port);
        let client = match reqwest::Client::builder()
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                debug!(error = %e, "building HTTP client");
                return false;
            }
        };

        match client.get(&url).send().await {
            Ok(response) => {
                let healthy = response.status() == reqwest::StatusCode::OK;
                debug!(url = %url, status = %response.status(), healthy, "health probe");
                healthy
            }
            Err(e) => {
                debug!(url = %url, error = %e, "health probe failed");
                false
            }
        }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl HealthProbe for HttpProber {
    fn probe<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, bool> {
        Box::pin(self.check(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    async fn serve(status: StatusCode) -> u16 {
        let app = Router::new().route("/health", get(move || async move { status }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[test]
    fn url_format() {
        assert_eq!(health_url("localhost", 3000), "http://localhost:3000/health");
    }

    #[tokio::test]
    async fn ok_is_healthy() {
        let port = serve(StatusCode::OK).await;
        assert!(HttpProber::default().probe("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn other_success_codes_are_unhealthy() {
        let port = serve(StatusCode::NO_CONTENT).await;
        assert!(!HttpProber::default().probe("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn server_error_is_unhealthy() {
        let port = serve(StatusCode::SERVICE_UNAVAILABLE).await;
        assert!(!HttpProber::default().probe("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn refused_connection_is_unhealthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = HttpProber::new(Duration::from_millis(500));
        assert!(!prober.probe("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn missing_route_is_unhealthy() {
        let app = Router::new().route("/", get(|| async { "root" }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        assert!(!HttpProber::default().probe("127.0.0.1", port).await);
    }
}
