use hrefscan_core::{
    strip_trailing_slash, Error, FetchBackend, FetchConfig, FetchRequest, FetchResult,
    FetchSource, Method, Result,
};

pub mod links;
pub mod render_playwright;

pub use links::extract_links;
pub use render_playwright::BrowserFetcher;

/// Direct HTTP fetch through `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(cfg: &FetchConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(cfg.max_redirects))
            .danger_accept_invalid_certs(cfg.accept_invalid_certs);
        // No default timeout: a stalled server blocks until the operator interrupts.
        if let Some(to) = cfg.timeout() {
            builder = builder.timeout(to);
        }
        let client = builder.build().map_err(network_error)?;
        Ok(Self { client })
    }
}

fn reqwest_method(m: Method) -> reqwest::Method {
    match m {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Options => reqwest::Method::OPTIONS,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// reqwest's top-level message hides the cause (DNS, refused, TLS); keep the chain.
fn network_error(e: reqwest::Error) -> Error {
    let mut msg = e.to_string();
    let mut src = std::error::Error::source(&e);
    while let Some(s) = src {
        let s_msg = s.to_string();
        if !msg.contains(&s_msg) {
            msg.push_str(": ");
            msg.push_str(&s_msg);
        }
        src = std::error::Error::source(s);
    }
    Error::Network(msg)
}

#[async_trait::async_trait]
impl FetchBackend for HttpFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResult> {
        let url = req.target()?;
        let t0 = std::time::Instant::now();
        tracing::debug!(method = %req.method, url = %url, "sending request");

        let resp = self
            .client
            .request(reqwest_method(req.method), url)
            .send()
            .await
            .map_err(network_error)?;
        let final_url = strip_trailing_slash(resp.url().as_str());
        let status = resp.status().as_u16();

        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).to_string(),
                )
            })
            .collect();

        let mut body = Vec::new();
        let mut stream = resp.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(network_error)?;
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(
            status,
            final_url = %final_url,
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "response received"
        );

        Ok(FetchResult {
            url: req.url.clone(),
            final_url,
            status,
            headers,
            body,
            source: FetchSource::Http,
        })
    }
}

/// The backend `req` asks for: browser driver with `-w`, plain HTTP otherwise.
pub fn backend_for(req: &FetchRequest, cfg: &FetchConfig) -> Result<Box<dyn FetchBackend>> {
    if req.use_browser_driver {
        Ok(Box::new(BrowserFetcher::new(cfg)))
    } else {
        Ok(Box::new(HttpFetcher::new(cfg)?))
    }
}

pub async fn fetch(req: &FetchRequest, cfg: &FetchConfig) -> Result<FetchResult> {
    backend_for(req, cfg)?.fetch(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{header, HeaderMap, StatusCode},
        response::Redirect,
        routing::{any, get},
        Router,
    };
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn http_fetcher_follows_redirects_and_strips_trailing_slash() {
        let app = Router::new()
            .route("/old", get(|| async { Redirect::temporary("/new/") }))
            .route(
                "/new/",
                get(|| async {
                    (
                        [
                            (header::CONTENT_TYPE, "text/html"),
                            (header::SERVER, "fixture"),
                        ],
                        "<a href=\"next\">next</a>",
                    )
                }),
            );
        let addr = serve(app).await;

        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let req = FetchRequest::new("GET", format!("http://{addr}/old"), false).unwrap();
        let resp = fetcher.fetch(&req).await.unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.url, format!("http://{addr}/old"));
        assert_eq!(resp.final_url, format!("http://{addr}/new"));
        assert_eq!(resp.source, FetchSource::Http);
        assert!(resp
            .headers
            .iter()
            .any(|(k, v)| k == "server" && v == "fixture"));
        assert_eq!(resp.text_lossy(), "<a href=\"next\">next</a>");
    }

    #[tokio::test]
    async fn http_fetcher_sends_the_requested_method() {
        let app = Router::new().route(
            "/",
            any(|method: axum::http::Method, headers: HeaderMap| async move {
                let ua = headers
                    .get(header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                (StatusCode::ACCEPTED, format!("{method} {ua}"))
            }),
        );
        let addr = serve(app).await;

        let cfg = FetchConfig {
            user_agent: "fixture-agent/1".to_string(),
            ..FetchConfig::default()
        };
        let fetcher = HttpFetcher::new(&cfg).unwrap();
        for m in ["post", "PUT", "Delete", "OPTIONS"] {
            let req = FetchRequest::new(m, format!("http://{addr}/"), false).unwrap();
            let resp = fetcher.fetch(&req).await.unwrap();
            assert_eq!(resp.status, 202);
            assert_eq!(
                resp.text_lossy(),
                format!("{} fixture-agent/1", m.to_ascii_uppercase())
            );
        }
    }

    #[tokio::test]
    async fn http_fetcher_reports_error_statuses_as_results() {
        let app = Router::new().route(
            "/",
            get(|| async { (StatusCode::NOT_FOUND, "<a href=\"/home\">home</a>") }),
        );
        let addr = serve(app).await;

        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let req = FetchRequest::new("GET", format!("http://{addr}/"), false).unwrap();
        let resp = fetcher.fetch(&req).await.unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.final_url, format!("http://{addr}"));
    }

    #[tokio::test]
    async fn http_fetcher_maps_connection_failures_to_network_errors() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let req = FetchRequest::new("GET", format!("http://{addr}/"), false).unwrap();
        let err = fetch(&req, &FetchConfig::default()).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn http_fetcher_rejects_unparseable_target() {
        let req = FetchRequest::new("GET", "example.com/no-scheme", false).unwrap();
        let err = fetch(&req, &FetchConfig::default()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)), "got {err:?}");
    }
}
