use clap::Parser;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use uqload_dl::downloader::TaskId;
use uqload_dl::util::convert_size;
use uqload_dl::{QueueEvent, QueueManager, Settings, UqloadResolver};

#[derive(Parser)]
#[command(name = "uqload-dl")]
#[command(about = "Download videos hosted on uqload")]
struct Cli {
    /// Uqload page URLs (or bare 12-character video ids)
    #[arg(required = true)]
    urls: Vec<String>,

    /// Directory downloaded files are written to
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Number of simultaneous downloads
    #[arg(short, long, default_value = "2")]
    concurrent: usize,

    /// Ceiling on outstanding downloads (active + queued)
    #[arg(long, default_value = "10")]
    max_queue: usize,

    /// Only resolve and print video information, without downloading
    #[arg(long)]
    info: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::from_env()
        .with_max_queue(cli.max_queue)
        .with_concurrent_downloads(cli.concurrent);
    if let Some(dir) = cli.output_dir {
        settings = settings.with_output_dir(dir);
    }

    let resolver = UqloadResolver::new();
    let mut descriptors = Vec::new();
    for url in &cli.urls {
        match resolver.resolve(url).await {
            Ok(descriptor) => {
                println!("{}", descriptor.title);
                println!("  url:    {}", descriptor.media_url);
                println!("  size:   {}", convert_size(descriptor.size_bytes));
                println!("  type:   {}", descriptor.content_type);
                if let Some(resolution) = &descriptor.resolution {
                    println!("  video:  {resolution}");
                }
                if let Some(duration) = &descriptor.duration {
                    println!("  length: {duration}");
                }
                descriptors.push(descriptor);
            }
            Err(err) => eprintln!("{url}: {err}"),
        }
    }

    if cli.info || descriptors.is_empty() {
        return Ok(());
    }

    let (manager, mut events) = QueueManager::new(&settings);

    let mut titles: HashMap<TaskId, String> = HashMap::new();
    for descriptor in descriptors {
        let title = descriptor.title.clone();
        match manager.enqueue(descriptor)? {
            Some(task_id) => {
                titles.insert(task_id, title);
            }
            None => eprintln!("{title}: the queue is full, skipped"),
        }
    }

    let mut remaining = titles.len();
    while remaining > 0 {
        let Some(event) = events.recv().await else {
            break;
        };
        match event {
            QueueEvent::TaskStarted { task_id } => {
                println!("{}: started", label(&titles, task_id));
            }
            QueueEvent::TaskProgress {
                task_id,
                bytes_downloaded,
                total_bytes,
            } => {
                let percent = bytes_downloaded as f64 / total_bytes.max(1) as f64 * 100.0;
                print!(
                    "\r{}: {} / {} ({percent:.1}%)",
                    label(&titles, task_id),
                    convert_size(bytes_downloaded),
                    convert_size(total_bytes),
                );
                let _ = std::io::stdout().flush();
            }
            QueueEvent::TaskCompleted { task_id, .. } => {
                println!("\n{}: completed", label(&titles, task_id));
                remaining -= 1;
            }
            QueueEvent::TaskCancelled { task_id, .. } => {
                println!("\n{}: cancelled", label(&titles, task_id));
                remaining -= 1;
            }
            QueueEvent::TaskFailed {
                task_id, message, ..
            } => {
                eprintln!("\n{}: {message}", label(&titles, task_id));
                remaining -= 1;
            }
            QueueEvent::TaskRemoved { task_id, .. } => {
                println!("{}: removed", label(&titles, task_id));
                remaining -= 1;
            }
            QueueEvent::QueueFull { message } => eprintln!("{message}"),
        }
    }

    let errors = manager.error_count();
    if errors > 0 {
        eprintln!("{errors} download(s) failed");
        std::process::exit(1);
    }
    Ok(())
}

fn label(titles: &HashMap<TaskId, String>, task_id: TaskId) -> &str {
    titles
        .get(&task_id)
        .map(String::as_str)
        .unwrap_or("download")
}
