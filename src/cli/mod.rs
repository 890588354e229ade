//! CLI mode for segfetch: segmented downloads and streamed uploads from the terminal.

mod progress;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::http::ReqwestClient;
use crate::{AppConfig, DownloadEngine, Error, TransferConfig, TransferEvents, TransferHandle};
use crate::{UploadRequest, UploadStream};

use progress::{BarEvents, make_progress_bar, print_summary};

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Download(DownloadArgs),
    Upload(UploadArgs),
    Help,
}

/// Download flags; unset values fall back to the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadArgs {
    pub url: String,
    pub directory: Option<PathBuf>,
    pub filename: Option<String>,
    pub segments: Option<usize>,
    pub buffer_size: Option<usize>,
    pub sha256: Option<String>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadArgs {
    pub path: PathBuf,
    pub url: String,
    pub content_type: Option<String>,
}

fn value(args: &[String], i: &mut usize, flag: &str) -> crate::Result<String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| Error::Config(format!("{flag} requires a value")))
}

fn number(args: &[String], i: &mut usize, flag: &str) -> crate::Result<usize> {
    let raw = value(args, i, flag)?;
    raw.parse()
        .map_err(|_| Error::Config(format!("{flag} expects a number, got {raw:?}")))
}

/// Parses arguments (without the program name).
///
/// # Errors
///
/// Returns [`Error::Config`] for unknown flags, missing values or missing positionals.
pub fn parse_args(args: &[String]) -> crate::Result<Command> {
    if args.first().is_some_and(|a| a == "upload") {
        return parse_upload(&args[1..]);
    }

    let mut parsed = DownloadArgs::default();
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-o" | "--output" => parsed.directory = Some(value(args, &mut i, "--output")?.into()),
            "-n" | "--name" => parsed.filename = Some(value(args, &mut i, "--name")?),
            "-s" | "--segments" => parsed.segments = Some(number(args, &mut i, "--segments")?),
            "-b" | "--buffer" => parsed.buffer_size = Some(number(args, &mut i, "--buffer")?),
            "--sha256" => parsed.sha256 = Some(value(args, &mut i, "--sha256")?),
            "-c" | "--config" => parsed.config = Some(value(args, &mut i, "--config")?.into()),
            "-h" | "--help" => return Ok(Command::Help),
            arg if !arg.starts_with('-') => positional.push(arg.to_string()),
            other => return Err(Error::Config(format!("Unknown option: {other}"))),
        }
        i += 1;
    }

    match positional.as_slice() {
        [] => Ok(Command::Help),
        [url] => {
            parsed.url.clone_from(url);
            Ok(Command::Download(parsed))
        }
        _ => Err(Error::Config("expected exactly one URL".into())),
    }
}

fn parse_upload(args: &[String]) -> crate::Result<Command> {
    let mut content_type = None;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-t" | "--content-type" => content_type = Some(value(args, &mut i, "--content-type")?),
            "-h" | "--help" => return Ok(Command::Help),
            arg if !arg.starts_with('-') => positional.push(arg.to_string()),
            other => return Err(Error::Config(format!("Unknown option: {other}"))),
        }
        i += 1;
    }

    match positional.as_slice() {
        [path, url] => Ok(Command::Upload(UploadArgs {
            path: path.into(),
            url: url.clone(),
            content_type,
        })),
        _ => Err(Error::Config("upload expects <file> <url>".into())),
    }
}

/// Applies command-line flags on top of the config file defaults.
#[must_use]
pub fn merge(app: &AppConfig, args: &DownloadArgs) -> TransferConfig {
    let mut config = app.transfer.clone();
    config.filename.clear();
    if let Some(directory) = &args.directory {
        config.directory.clone_from(directory);
    }
    if let Some(name) = &args.filename {
        config.filename.clone_from(name);
    }
    if let Some(segments) = args.segments {
        config.segment_count = segments;
    }
    if let Some(size) = args.buffer_size {
        config.buffer_size = size;
    }
    if args.sha256.is_some() {
        config.expected_sha256.clone_from(&args.sha256);
    }
    config.with_url(args.url.clone())
}

pub fn print_usage() {
    eprintln!("Usage: segfetch [OPTIONS] <url>");
    eprintln!("       segfetch upload [-t TYPE] <file> <url>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -o, --output <DIR>       Destination directory (default: .)");
    eprintln!("  -n, --name <FILE>        Target filename (default: last URL segment)");
    eprintln!("  -s, --segments <N>       Concurrent segments (default: 3)");
    eprintln!("  -b, --buffer <BYTES>     Read/write piece size (default: 8192)");
    eprintln!("      --sha256 <HEX>       Verify the completed file");
    eprintln!("  -c, --config <PATH>      Config file (default: {})", AppConfig::default_path().display());
    eprintln!("  -t, --content-type <T>   Upload content type");
    eprintln!("  -h, --help               Show this help");
    eprintln!();
    eprintln!("While downloading, type p + Enter to pause, r to resume, c to cancel.");
    eprintln!("Ctrl-C cancels and removes the partial file.");
}

/// Reads interactive commands on a detached thread; a blocking stdin read
/// would otherwise hold up runtime shutdown.
fn stdin_commands() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line.trim().to_lowercase()).is_err() {
                break;
            }
        }
    });
    rx
}

fn apply_command(handle: &TransferHandle, command: &str) {
    let result = match command {
        "p" | "pause" => handle.pause(),
        "r" | "resume" => handle.resume(),
        "c" | "cancel" => handle.cancel(),
        "" => return,
        other => {
            eprintln!("Unknown command {other:?} (p = pause, r = resume, c = cancel)");
            return;
        }
    };
    if let Err(e) = result {
        eprintln!("{e}");
    }
}

async fn run_download(args: &DownloadArgs) -> crate::Result<()> {
    let app = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    let config = merge(&app, args);
    config.validate()?;

    let bar = make_progress_bar(&config.filename);
    bar.enable_steady_tick(Duration::from_millis(250));
    let events = Arc::new(BarEvents::new(bar));
    let name = config.filename.clone();

    let engine = Arc::new(DownloadEngine::new(
        config,
        Arc::clone(&events) as Arc<dyn TransferEvents>,
    )?);
    let handle = engine.handle();

    let controls = tokio::spawn({
        let handle = handle.clone();
        let events = Arc::clone(&events);
        async move {
            let mut commands = stdin_commands();
            loop {
                tokio::select! {
                    signal = tokio::signal::ctrl_c() => {
                        if signal.is_ok() {
                            events.set_message("cancelling...");
                            apply_command(&handle, "c");
                        }
                        break;
                    }
                    command = commands.recv() => match command {
                        Some(command) => apply_command(&handle, &command),
                        None => break,
                    },
                }
            }
        }
    });

    let result = engine.start().await;
    controls.abort();

    match result {
        Ok(stats) => {
            print_summary("Downloaded", &name, &stats);
            Ok(())
        }
        Err(Error::Cancelled) => {
            println!("Transfer cancelled, partial files removed.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn run_upload(args: &UploadArgs) -> crate::Result<()> {
    let name = args
        .path
        .file_name()
        .map_or_else(|| args.path.display().to_string(), |n| n.to_string_lossy().into_owned());
    let bar = make_progress_bar(&name);
    bar.enable_steady_tick(Duration::from_millis(250));

    let mut request = UploadRequest::new(args.url.clone(), args.path.clone());
    if let Some(content_type) = &args.content_type {
        request = request.with_content_type(content_type.clone());
    }

    let uploader = UploadStream::new(
        Arc::new(ReqwestClient::new()?),
        Arc::new(BarEvents::new(bar)) as Arc<dyn TransferEvents>,
    );
    let stats = uploader.send(&request).await?;
    print_summary("Uploaded", &name, &stats);
    Ok(())
}

/// Runs the CLI with the process arguments.
///
/// # Errors
///
/// Returns an error if the arguments are invalid or the transfer fails.
pub async fn run() -> crate::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args)? {
        Command::Help => {
            print_usage();
            Ok(())
        }
        Command::Download(download) => run_download(&download).await,
        Command::Upload(upload) => run_upload(&upload).await,
    }
}
