use hrefscan_core::{
    env_truthy, strip_trailing_slash, Error, FetchBackend, FetchConfig, FetchRequest, FetchResult,
    FetchSource, Result,
};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub html: String,
    pub elapsed_ms: u64,
    pub console_error_count: u64,
}

fn node_path_candidates() -> Vec<String> {
    // Common global module roots. `npm root -g` is tried first; these cover
    // machines where npm is not on PATH.
    let mut out: Vec<String> = Vec::new();

    if let Some(home) = std::env::var_os("HOME").map(std::path::PathBuf::from) {
        out.push(
            home.join(".npm-global")
                .join("lib")
                .join("node_modules")
                .to_string_lossy()
                .to_string(),
        );
    }
    out.push("/opt/homebrew/lib/node_modules".to_string());
    out.push("/usr/local/lib/node_modules".to_string());
    out.push("/usr/lib/node_modules".to_string());

    out
}

fn detect_node_path_for_playwright() -> Option<String> {
    fn node_path_has_playwright(np: &str) -> bool {
        np.split(':')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .any(|p| std::path::PathBuf::from(p).join("playwright").is_dir())
    }

    fn npm_root_g() -> Option<String> {
        let out = std::process::Command::new("npm")
            .args(["root", "-g"])
            .output()
            .ok()?;
        if !out.status.success() {
            return None;
        }
        let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if !s.is_empty() && std::path::PathBuf::from(&s).join("playwright").is_dir() {
            Some(s)
        } else {
            None
        }
    }

    if let Ok(v) = std::env::var("HREFSCAN_NODE_PATH") {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }

    let existing = std::env::var("NODE_PATH").ok().unwrap_or_default();
    if node_path_has_playwright(&existing) {
        return None;
    }

    let found = npm_root_g().or_else(|| {
        node_path_candidates()
            .into_iter()
            .find(|root| std::path::PathBuf::from(root).join("playwright").is_dir())
    })?;

    if existing.trim().is_empty() {
        Some(found)
    } else {
        Some(format!("{existing}:{found}"))
    }
}

// The driver script keeps stdout JSON-only so the Rust side can parse it
// regardless of exit status.
const JS: &str = r#"
const fs = require('fs');

function ok(obj) { process.stdout.write(JSON.stringify(obj)); }
function bad(code, message, hint) { ok({ ok: false, error: { code, message, hint } }); }

async function main() {
  let arg = '';
  try { arg = fs.readFileSync(0, 'utf8'); } catch (_) {}
  let req;
  try { req = JSON.parse(arg); } catch (e) { return bad('invalid_params', 'bad JSON args', ''); }

  let pw;
  try { pw = require('playwright'); } catch (e) {
    return bad('not_configured',
      'Playwright is not installed for Node.js (require("playwright") failed)',
      'Install it with `npm i -g playwright` and then `npx playwright install chromium`.');
  }

  const url = String(req.url || '').trim();
  if (!url) return bad('invalid_params', 'url must be non-empty', 'Pass an absolute URL like https://example.com.');

  const method = String(req.method || 'GET').toUpperCase();
  // 0 disables Playwright's own navigation timeout.
  const timeoutMs = Number(req.timeout_ms || 0);

  let consoleErrorCount = 0;
  const t0 = Date.now();
  let browser;
  try {
    browser = await pw.chromium.launch({ headless: true });
    const contextOpts = { ignoreHTTPSErrors: !!req.ignore_https_errors };
    if (req.user_agent) contextOpts.userAgent = String(req.user_agent);
    const context = await browser.newContext(contextOpts);
    const page = await context.newPage();
    page.on('console', (msg) => { if (msg.type && msg.type() === 'error') consoleErrorCount += 1; });

    if (method !== 'GET') {
      // Only the top-level navigation carries the caller's method.
      let rewritten = false;
      await page.route('**/*', (route) => {
        const r = route.request();
        if (!rewritten && r.isNavigationRequest()) {
          rewritten = true;
          return route.continue({ method });
        }
        return route.continue();
      });
    }

    const resp = await page.goto(url, { waitUntil: 'load', timeout: timeoutMs });
    try { await page.waitForLoadState('networkidle', { timeout: 5000 }); } catch (_) {}

    const html = await page.content();
    const headers = resp ? (await resp.headersArray()).map((h) => [h.name, h.value]) : [];
    ok({
      ok: true,
      final_url: page.url(),
      status: resp ? resp.status() : null,
      headers,
      html,
      elapsed_ms: Date.now() - t0,
      console_error_count: consoleErrorCount,
    });
  } catch (e) {
    bad('fetch_failed', String(e && e.message ? e.message : e), '');
  } finally {
    try { if (browser) await browser.close(); } catch (_) {}
  }
}

main().catch((e) => bad('fetch_failed', String(e && e.message ? e.message : e), ''));
"#;

/// Turn the driver's JSON line into a page, mapping its error codes onto [`Error`].
fn parse_driver_output(stdout: &str, stderr: &str, requested_url: &str) -> Result<RenderedPage> {
    let v: serde_json::Value = serde_json::from_str(stdout.trim()).map_err(|e| {
        let stderr = stderr.trim();
        if stderr.is_empty() {
            Error::Driver(format!("Playwright returned invalid JSON: {e}"))
        } else {
            Error::Driver(format!(
                "Playwright returned invalid JSON: {e}. stderr: {stderr}"
            ))
        }
    })?;

    if v.get("ok").and_then(|x| x.as_bool()) != Some(true) {
        let code = v
            .pointer("/error/code")
            .and_then(|x| x.as_str())
            .unwrap_or("fetch_failed");
        let message = v
            .pointer("/error/message")
            .and_then(|x| x.as_str())
            .unwrap_or("Playwright render failed");
        let hint = v
            .pointer("/error/hint")
            .and_then(|x| x.as_str())
            .unwrap_or("")
            .trim();
        let message = if hint.is_empty() {
            message.to_string()
        } else {
            format!("{message}. {hint}")
        };

        return Err(match code {
            "invalid_params" => Error::InvalidUrl(message),
            "fetch_failed" => Error::Network(message),
            _ => Error::Driver(message),
        });
    }

    let final_url = v
        .get("final_url")
        .and_then(|x| x.as_str())
        .unwrap_or(requested_url)
        .to_string();
    let status = v.get("status").and_then(|x| x.as_u64()).map(|n| n as u16);
    let headers = v
        .get("headers")
        .and_then(|x| x.as_array())
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|p| {
                    let name = p.get(0)?.as_str()?;
                    let value = p.get(1)?.as_str()?;
                    Some((name.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();
    let html = v
        .get("html")
        .and_then(|x| x.as_str())
        .unwrap_or("")
        .to_string();
    let elapsed_ms = v.get("elapsed_ms").and_then(|x| x.as_u64()).unwrap_or(0);
    let console_error_count = v
        .get("console_error_count")
        .and_then(|x| x.as_u64())
        .unwrap_or(0);

    Ok(RenderedPage {
        final_url,
        status,
        headers,
        html,
        elapsed_ms,
        console_error_count,
    })
}

/// Load `req.url` in headless Chromium via Node + Playwright and capture the
/// DOM after scripts have run.
///
/// Expected setup: `node` on PATH (or `HREFSCAN_NODE`), the `playwright` npm
/// package resolvable by Node, and a Chromium build (`npx playwright install chromium`).
pub async fn render_html_playwright(req: &FetchRequest, cfg: &FetchConfig) -> Result<RenderedPage> {
    if env_truthy("HREFSCAN_RENDER_DISABLE") {
        return Err(Error::Driver(
            "browser driver disabled (HREFSCAN_RENDER_DISABLE)".to_string(),
        ));
    }

    let args_json = serde_json::json!({
        "url": req.url,
        "method": req.method.as_str(),
        "timeout_ms": cfg.timeout_ms.unwrap_or(0),
        "ignore_https_errors": cfg.accept_invalid_certs,
        "user_agent": cfg.user_agent,
    })
    .to_string();

    // Unbounded unless a timeout is configured, mirroring the HTTP path.
    let hard_timeout = std::env::var("HREFSCAN_RENDER_HARD_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .or_else(|| cfg.timeout_ms.map(|ms| ms.saturating_add(10_000)))
        .map(Duration::from_millis);

    let node_bin = std::env::var("HREFSCAN_NODE").unwrap_or_else(|_| "node".to_string());
    tracing::debug!(node = %node_bin, url = %req.url, method = %req.method, "starting browser driver");

    let mut cmd = tokio::process::Command::new(&node_bin);
    if let Some(node_path) = detect_node_path_for_playwright() {
        cmd.env("NODE_PATH", node_path);
    }
    let mut child = cmd
        .arg("-e")
        .arg(JS)
        .kill_on_drop(true)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| {
            Error::Driver(format!(
                "the browser driver requires Node.js (`{node_bin}`) and the Playwright npm package: {e}"
            ))
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // A failed write surfaces as a JSON error from the script.
        let _ = stdin.write_all(args_json.as_bytes()).await;
        let _ = stdin.shutdown().await;
    }

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Driver("missing stdout pipe".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Driver("missing stderr pipe".to_string()))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = tokio::io::AsyncReadExt::read_to_end(&mut stdout, &mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = tokio::io::AsyncReadExt::read_to_end(&mut stderr, &mut buf).await;
        buf
    });

    let waited = match hard_timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(r) => r,
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(Error::Network(format!(
                    "browser driver timed out after {}ms",
                    limit.as_millis()
                )));
            }
        },
        None => child.wait().await,
    };
    let status = waited.map_err(|e| Error::Driver(format!("waiting for node failed: {e}")))?;

    let out_stdout = stdout_task.await.unwrap_or_default();
    let out_stderr = stderr_task.await.unwrap_or_default();
    tracing::debug!(exit = %status, stdout_bytes = out_stdout.len(), "browser driver exited");

    parse_driver_output(
        &String::from_utf8_lossy(&out_stdout),
        &String::from_utf8_lossy(&out_stderr),
        &req.url,
    )
}

/// [`FetchBackend`] over [`render_html_playwright`].
#[derive(Debug, Clone)]
pub struct BrowserFetcher {
    cfg: FetchConfig,
}

impl BrowserFetcher {
    pub fn new(cfg: &FetchConfig) -> Self {
        Self { cfg: cfg.clone() }
    }
}

#[async_trait::async_trait]
impl FetchBackend for BrowserFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResult> {
        req.target()?;
        let page = render_html_playwright(req, &self.cfg).await?;
        if page.console_error_count > 0 {
            tracing::debug!(
                count = page.console_error_count,
                "page logged console errors"
            );
        }
        tracing::debug!(elapsed_ms = page.elapsed_ms, "page rendered");
        Ok(FetchResult {
            url: req.url.clone(),
            final_url: strip_trailing_slash(&page.final_url),
            status: page.status.unwrap_or(0),
            headers: page.headers,
            body: page.html.into_bytes(),
            source: FetchSource::Browser,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn parses_successful_driver_output() {
        let stdout = serde_json::json!({
            "ok": true,
            "final_url": "https://example.com/landing/",
            "status": 200,
            "headers": [["content-type", "text/html"], ["x-powered-by", "fixture"]],
            "html": "<html><body><a href=\"/x\">x</a></body></html>",
            "elapsed_ms": 42,
            "console_error_count": 1,
        })
        .to_string();
        let page = parse_driver_output(&stdout, "", "https://example.com/").unwrap();
        assert_eq!(page.final_url, "https://example.com/landing/");
        assert_eq!(page.status, Some(200));
        assert_eq!(
            page.headers,
            vec![
                ("content-type".to_string(), "text/html".to_string()),
                ("x-powered-by".to_string(), "fixture".to_string()),
            ]
        );
        assert!(page.html.contains("href=\"/x\""));
        assert_eq!(page.console_error_count, 1);
    }

    #[test]
    fn maps_driver_error_codes() {
        let out = |code: &str| {
            serde_json::json!({"ok": false, "error": {"code": code, "message": "boom", "hint": "try again"}})
                .to_string()
        };
        let e = parse_driver_output(&out("not_configured"), "", "u").unwrap_err();
        assert!(matches!(e, Error::Driver(ref m) if m == "boom. try again"));
        let e = parse_driver_output(&out("fetch_failed"), "", "u").unwrap_err();
        assert!(matches!(e, Error::Network(_)));
        let e = parse_driver_output(&out("invalid_params"), "", "u").unwrap_err();
        assert!(matches!(e, Error::InvalidUrl(_)));
    }

    #[test]
    fn invalid_json_includes_stderr() {
        let e = parse_driver_output("", "node: bad option", "u").unwrap_err();
        assert!(matches!(e, Error::Driver(ref m) if m.contains("node: bad option")));
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn disabled_driver_fails_without_spawning() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::set_var("HREFSCAN_RENDER_DISABLE", "1");
        std::env::set_var("HREFSCAN_NODE", "/nonexistent/node-for-hrefscan-tests");

        let req = FetchRequest::new("GET", "https://example.com/", true).unwrap();
        let err = BrowserFetcher::new(&FetchConfig::default())
            .fetch(&req)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Driver(ref m) if m.contains("HREFSCAN_RENDER_DISABLE")));

        std::env::remove_var("HREFSCAN_RENDER_DISABLE");
        std::env::remove_var("HREFSCAN_NODE");
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn missing_node_binary_is_a_driver_error() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::remove_var("HREFSCAN_RENDER_DISABLE");
        std::env::set_var("HREFSCAN_NODE", "/nonexistent/node-for-hrefscan-tests");

        let req = FetchRequest::new("POST", "https://example.com/", true).unwrap();
        let err = render_html_playwright(&req, &FetchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Driver(ref m) if m.contains("Node.js")), "got {err:?}");

        std::env::remove_var("HREFSCAN_NODE");
    }
}
