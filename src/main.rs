use clap::Parser;
use pdf_narrator::config_loader;
use pdf_narrator::control;
use pdf_narrator::events::NarrationEvent;
use pdf_narrator::navigator::TextPages;
use pdf_narrator::session::ReaderSession;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pdf-narrator")]
#[command(about = "Read a document page by page with cloud narration", long_about = None)]
struct Cli {
    /// Extracted document text, pages separated by form feeds
    #[arg(long)]
    pages: PathBuf,

    /// Page to open instead of the last one read
    #[arg(long)]
    page: Option<usize>,

    /// Also accept control commands over TCP, e.g. 127.0.0.1:6561
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = config_loader::SETTINGS
        .read()
        .map_err(|e| format!("Settings lock poisoned: {}", e))?
        .clone();

    let pages = TextPages::from_file(&cli.pages)?;
    let session = ReaderSession::open(&settings);
    let navigator = session.navigator(Box::new(pages), cli.page)?;
    tracing::info!(
        "Opened {} at page {}/{}",
        cli.pages.display(),
        navigator.current_page(),
        navigator.page_count()
    );

    // Notices are the reader's toasts; print them until dismissed.
    let mut events = session.bus().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(NarrationEvent::Notice(notice)) => {
                    eprintln!("[{}] {}", notice.kind, notice.message);
                }
                Ok(NarrationEvent::StateChanged(state)) => tracing::debug!("state: {}", state),
                Ok(NarrationEvent::Interaction(_)) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!("Dropped {} narration events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let navigator = Arc::new(Mutex::new(navigator));

    if let Some(addr) = cli.listen {
        let remote = navigator.clone();
        tokio::spawn(async move {
            if let Err(e) = control::serve(&addr, remote).await {
                tracing::error!("Control listener on {} stopped: {}", addr, e);
            }
        });
    }

    let stdin = BufReader::new(tokio::io::stdin());
    control::run_session(stdin, tokio::io::stdout(), navigator.clone()).await?;

    navigator.lock().await.close();
    Ok(())
}
