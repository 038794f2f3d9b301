use anyhow::Result;
use clap::Parser;
use hrefscan::core::FetchConfig;
use hrefscan::RunOptions;

#[derive(Parser, Debug)]
#[command(name = "hrefscan", version)]
#[command(
    about = "Fetch one page and list every link (script src, a/link href, form action) it points at",
    long_about = None
)]
struct Cli {
    /// What method to use in the request (GET, POST, OPTIONS, PUT, DELETE).
    #[arg(short = 'm', long, default_value = "GET")]
    method: String,

    /// URL to call with the specified method.
    #[arg(short = 'u', long)]
    url: Option<String>,

    /// Fetch through a headless browser (Node.js + Playwright) so page scripts run first.
    #[arg(short = 'w')]
    webdriver: bool,

    /// Enforce TLS certificate validation. By default invalid certificates are trusted.
    #[arg(long, env = "HREFSCAN_VERIFY_CERTS")]
    verify_certs: bool,

    /// Print one JSON report instead of the console listing.
    #[arg(long)]
    json: bool,
}

async fn interrupted() {
    // If the handler can't be installed, never report an interrupt.
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    hrefscan::logging::init_logging()?;

    let mut fetch = FetchConfig::from_env();
    if cli.verify_certs {
        fetch.accept_invalid_certs = false;
    }
    let opts = RunOptions {
        method: cli.method,
        url: cli.url,
        use_browser_driver: cli.webdriver,
        fetch,
        json: cli.json,
    };
    tracing::debug!(?opts, "starting");

    let mut stdout = std::io::stdout();
    hrefscan::run(&opts, &mut stdout, interrupted()).await?;
    Ok(())
}
