//! Download every answer sheet of one exam paper
//!
//! Usage:
//!
//! ```text
//! cargo run --example download_exam -- <config.json> <examination id> [course code]
//! ```
//!
//! Set `RUST_LOG=answersheet_dl=debug` for per-request logging.

use answersheet_dl::{Config, Event, ExamImageDownloader, ExamRequest};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("answersheet_dl=info,warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let (Some(config_path), Some(examination)) = (args.next(), args.next()) else {
        eprintln!("usage: download_exam <config.json> <examination id> [course code]");
        std::process::exit(2);
    };

    let config = Config::from_json_file(&config_path)?;
    let downloader = ExamImageDownloader::new(config)?;

    let mut events = downloader.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::BatchStarted {
                    index,
                    total_batches,
                    students,
                } => println!(
                    "batch {}/{}: {} students",
                    index + 1,
                    total_batches,
                    students.len()
                ),
                Event::Authenticated { generation } => {
                    println!("logged in (session {generation})")
                }
                Event::ImageFailed { url, error } => eprintln!("failed {url}: {error}"),
                _ => {}
            }
        }
    });

    let mut request = ExamRequest::new(examination);
    if let Some(course) = args.next() {
        request = request.course(course);
    }

    let report = downloader.download_exam(request).await?;
    println!("{}", report.run);
    match &report.downloads {
        Some(downloads) => println!(
            "{} images written to {}, {} failed",
            downloads.written.len(),
            report.directory.display(),
            downloads.failed.len()
        ),
        None => println!("no images to download"),
    }

    Ok(())
}
