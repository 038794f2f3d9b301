//! The fetch -> extract -> print pipeline.

use hrefscan_core::{
    Error, ExtractionResult, FetchConfig, FetchRequest, FetchResult, FetchSource, Result,
};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::io::{self, Write};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Raw `--method` value; validated when the request is built.
    pub method: String,
    pub url: Option<String>,
    pub use_browser_driver: bool,
    pub fetch: FetchConfig,
    /// Emit one JSON document instead of the console text.
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseSummary {
    pub final_url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub source: FetchSource,
}

impl From<&FetchResult> for ResponseSummary {
    fn from(r: &FetchResult) -> Self {
        Self {
            final_url: r.final_url.clone(),
            status: r.status,
            headers: r.headers.clone(),
            source: r.source,
        }
    }
}

/// Everything one run produced. `links` is empty when `error` is set.
#[derive(Debug, Default)]
pub struct Report {
    pub request: Option<FetchRequest>,
    pub response: Option<ResponseSummary>,
    pub error: Option<Error>,
    pub links: ExtractionResult,
}

#[derive(Serialize)]
struct JsonError {
    kind: &'static str,
    message: String,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    schema_version: u32,
    kind: &'static str,
    request: Option<&'a FetchRequest>,
    response: Option<&'a ResponseSummary>,
    error: Option<JsonError>,
    unique_links: &'a std::collections::BTreeSet<String>,
    total_links_found: usize,
    duplicate_count: usize,
}

impl Report {
    pub fn to_json(&self) -> serde_json::Value {
        let doc = JsonReport {
            schema_version: 1,
            kind: "hrefscan_report",
            request: self.request.as_ref(),
            response: self.response.as_ref(),
            error: self.error.as_ref().map(|e| JsonError {
                kind: e.kind(),
                message: e.to_string(),
            }),
            unique_links: &self.links.unique_links,
            total_links_found: self.links.total_links_found,
            duplicate_count: self.links.duplicate_count,
        };
        serde_json::to_value(doc).unwrap_or(serde_json::Value::Null)
    }
}

/// Line writer that stays quiet in JSON mode and remembers the first IO error
/// instead of aborting the pipeline mid-flight.
struct Console<'a, W: Write> {
    out: &'a mut W,
    quiet: bool,
    err: Option<io::Error>,
}

impl<W: Write> Console<'_, W> {
    fn line(&mut self, s: impl Display) {
        if self.quiet || self.err.is_some() {
            return;
        }
        if let Err(e) = writeln!(self.out, "{s}") {
            self.err = Some(e);
        }
    }
}

async fn fetch_and_extract<W: Write>(
    opts: &RunOptions,
    console: &mut Console<'_, W>,
    report: &mut Report,
) -> Result<()> {
    let req = FetchRequest::new(
        &opts.method,
        opts.url.clone().unwrap_or_default(),
        opts.use_browser_driver,
    )?;
    report.request = Some(req.clone());
    if req.url.trim().is_empty() {
        return Err(Error::InvalidUrl("no URL given (pass --url)".to_string()));
    }

    if req.use_browser_driver {
        console.line("[+] Starting up a webdriver");
    }
    console.line(format_args!("[+] Retrieving {}", req.url));
    let resp = hrefscan_local::fetch(&req, &opts.fetch).await?;

    console.line(format_args!(
        "[+] Received the response HTTP {}",
        resp.status
    ));
    for (name, value) in &resp.headers {
        console.line(format_args!("{name}: {value}"));
    }
    report.response = Some(ResponseSummary::from(&resp));

    console.line("[+] Tidying up the links");
    report.links = hrefscan_local::extract_links(&resp.body, &resp.final_url)?;
    Ok(())
}

/// Fetch, extract and print, always ending with the link summary.
///
/// Failures (including `interrupt` resolving first) are reported as a single
/// diagnostic line and the summary is printed from whatever was gathered. The
/// only error returned is a failure to write to `out`.
pub async fn run<W, I>(opts: &RunOptions, out: &mut W, interrupt: I) -> io::Result<Report>
where
    W: Write,
    I: Future<Output = ()>,
{
    let mut report = Report::default();
    let mut console = Console {
        out,
        quiet: opts.json,
        err: None,
    };
    console.line("[*] Starting the main module");

    let outcome = tokio::select! {
        biased;
        _ = interrupt => Err(Error::Interrupted),
        r = fetch_and_extract(opts, &mut console, &mut report) => r,
    };

    if let Err(e) = outcome {
        tracing::debug!(kind = e.kind(), error = %e, "pipeline stopped early");
        match e {
            Error::Interrupted => console.line("[x] Exiting by user command"),
            ref other => console.line(format_args!("[-] Something went wrong: {other}")),
        }
        report.error = Some(e);
        // Extraction is all-or-nothing, so a failure leaves no links behind.
        report.links = ExtractionResult::default();
    }

    console.line(format_args!(
        "[+] {} unique links extracted ({} duplicates removed):",
        report.links.unique_links.len(),
        report.links.duplicate_count
    ));
    for link in &report.links.unique_links {
        console.line(link);
    }

    if let Some(e) = console.err.take() {
        return Err(e);
    }
    if opts.json {
        serde_json::to_writer_pretty(&mut *console.out, &report.to_json())?;
        writeln!(console.out)?;
    }
    console.out.flush()?;
    Ok(report)
}
