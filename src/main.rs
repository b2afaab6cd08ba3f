use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use youtube_audio_downloader_lib::downloader::models::AudioFormat;
use youtube_audio_downloader_lib::{
    DownloadError, DownloadId, DownloadSettings, DownloadStatus, Engine, NetworkConfig, QueueEvent,
    ToolPaths,
};

/// Download YouTube audio in bulk and search for official uploads
#[derive(Parser)]
#[command(name = "youtube-audio-downloader")]
#[command(version)]
struct Cli {
    /// Proxy for yt-dlp and web lookups (e.g. socks5://127.0.0.1:1080)
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// Socket timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download audio from videos or playlists
    Download {
        /// mp3, flac, opus, aac or wav
        #[arg(long, default_value = "mp3")]
        format: AudioFormat,

        /// Bitrate in kbps for lossy formats (128, 192, 256 or 320)
        #[arg(long, default_value_t = 320, value_parser = parse_bitrate)]
        bitrate: u32,

        /// Simultaneous downloads
        #[arg(long, short = 'j', default_value_t = 3)]
        jobs: usize,

        /// Output directory
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Only the linked video, even when the URL names a playlist
        #[arg(long)]
        no_playlist: bool,

        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Search for tracks, official audio first
    Search {
        #[arg(long, short = 'n', default_value_t = 10)]
        limit: usize,

        #[arg(required = true)]
        query: Vec<String>,
    },
}

fn parse_bitrate(value: &str) -> Result<u32, String> {
    let bitrate: u32 = value.parse().map_err(|_| format!("not a number: {}", value))?;
    if DownloadSettings::AVAILABLE_BITRATES.contains(&bitrate) {
        Ok(bitrate)
    } else {
        Err(format!(
            "expected one of {:?}",
            DownloadSettings::AVAILABLE_BITRATES
        ))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, DownloadError> {
    let network = NetworkConfig {
        proxy: cli.proxy,
        timeout: Some(cli.timeout),
    };
    let tools = ToolPaths::discover()?;
    let engine = Engine::new(tools, network.clone())?;

    match cli.command {
        Command::Download {
            format,
            bitrate,
            jobs,
            output,
            no_playlist,
            urls,
        } => {
            let defaults = DownloadSettings::default();
            let settings = DownloadSettings {
                output_dir: output.unwrap_or(defaults.output_dir.clone()),
                audio_format: format,
                audio_bitrate: bitrate,
                download_playlist: !no_playlist,
                max_concurrent_downloads: jobs,
                network,
                ..defaults
            };
            download(&engine, urls, &settings).await
        }
        Command::Search { limit, query } => search(&engine, &query.join(" "), limit).await,
    }
}

async fn download(
    engine: &Engine,
    urls: Vec<String>,
    settings: &DownloadSettings,
) -> Result<ExitCode, DownloadError> {
    let mut events = engine.subscribe();
    let mut last_status = HashMap::new();
    let mut interrupted = false;

    let run = engine.start_queue(urls, settings);
    tokio::pin!(run);

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            event = events.recv() => match event {
                Ok(event) => print_event(&mut last_status, event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Dropped queue events");
                }
                Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprintln!("Cancelling...");
                for item in engine.items() {
                    if !item.status.is_terminal() {
                        engine.cancel(item.id);
                    }
                }
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        print_event(&mut last_status, event);
    }
    result?;

    let items = engine.items();
    let count = |status: DownloadStatus| items.iter().filter(|i| i.status == status).count();
    let failed = count(DownloadStatus::Error);
    println!(
        "\n{} completed, {} failed, {} cancelled",
        count(DownloadStatus::Completed),
        failed,
        count(DownloadStatus::Cancelled)
    );

    for item in &items {
        if let Some(path) = &item.output_path {
            println!("  {}", path.display());
        }
    }

    Ok(if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// One line per status change; progress ticks within a status are skipped
fn print_event(last_status: &mut HashMap<DownloadId, DownloadStatus>, event: QueueEvent) {
    let item = match event {
        QueueEvent::Added(item) | QueueEvent::Updated(item) => item,
        QueueEvent::Removed(_) => return,
    };
    if last_status.insert(item.id, item.status) != Some(item.status) {
        println!("{}  {}", item.title, item.status_text());
    }
}

async fn search(engine: &Engine, query: &str, limit: usize) -> Result<ExitCode, DownloadError> {
    let cancel = CancellationToken::new();
    let results = tokio::select! {
        results = engine.search_with_limit(query, limit, &cancel) => results?,
        // Dropping the search future kills its yt-dlp children
        _ = tokio::signal::ctrl_c() => return Ok(ExitCode::FAILURE),
    };

    if results.is_empty() {
        println!("No results for \"{}\"", query);
        return Ok(ExitCode::SUCCESS);
    }

    for (n, result) in results.iter().enumerate() {
        println!(
            "{:>2}. [{}] {} - {} ({})",
            n + 1,
            result.provenance_label(),
            result.artist,
            result.display_track(),
            result.duration
        );
        println!("    {}", result.url);
    }
    Ok(ExitCode::SUCCESS)
}
