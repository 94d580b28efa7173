#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # sluice
//!
//! Command-line front end for the sluice transfer library.
//!
//! ## Subcommands
//!
//! - `sluice get <url>... [-o dir] [--parallel N]`: fetch concurrently on a poll-driven set
//! - `sluice info <url> [--json]`: run one transfer and print what the engine reports
//! - `sluice post <url> --field k=v --file k=path`: multipart upload
//! - `sluice watch`: fetch URLs read from stdin on the tokio reactor
//! - `sluice version`: library and engine build details
//!
//! Every subcommand loads the configuration (see `config.rs`), sets up
//! tracing on stderr and holds the engine's global guard for its whole run.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use sluice::config::Config;
use sluice::registry::InfoValue;
use sluice::{
    CompletionRecord, Global, InfoKey, InitFlags, Introspect, MimeBuilder, Reactor, Transfer,
    TransferKey, TransferSet, VersionInfo,
};

/// Type-checked libcurl transfers from the command line.
#[derive(Parser)]
#[command(name = "sluice", version)]
struct Cli {
    /// Path to TOML config file (default: ./sluice.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one or more URLs concurrently.
    Get {
        #[arg(required = true)]
        urls: Vec<String>,
        /// Write each body into this directory instead of stdout.
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        /// Transfers in flight at once (default: engine.max_concurrent).
        #[arg(long)]
        parallel: Option<usize>,
    },
    /// Fetch a URL and print the introspection table.
    Info {
        url: String,
        #[arg(long)]
        json: bool,
    },
    /// Multipart form upload.
    Post {
        url: String,
        /// Form field, `name=value`. Repeatable.
        #[arg(long = "field")]
        fields: Vec<String>,
        /// File upload, `name=path`. Repeatable.
        #[arg(long = "file")]
        files: Vec<String>,
    },
    /// Read URLs from stdin, one per line, and fetch them as they arrive.
    Watch,
    /// Print library and engine version details.
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("sluice: {e}");
            return ExitCode::from(2);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let global = match Global::init(InitFlags::DEFAULT) {
        Ok(global) => global,
        Err(e) => {
            error!("engine initialization failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = match cli.command {
        Commands::Get {
            urls,
            output,
            parallel,
        } => run_get(&config, &urls, output.as_deref(), parallel),
        Commands::Info { url, json } => run_info(&config, &url, json),
        Commands::Post { url, fields, files } => run_post(&config, &url, &fields, &files),
        Commands::Watch => run_watch(&config),
        Commands::Version => run_version(),
    };
    drop(global);

    match outcome {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            warn!(failed, "some transfers failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// A transfer with the configured defaults applied.
fn configured(config: &Config, url: &str) -> sluice::Result<Transfer> {
    let mut transfer = Transfer::new()?;
    config.transfer.apply(&mut transfer)?;
    transfer.url(url)?;
    Ok(transfer)
}

/// Where a fetched body goes.
enum Output {
    Stdout(sluice::Buffer),
    File(PathBuf),
}

/// File name for `url` inside the output directory, unique within one run.
fn output_name(url: &str, used: &mut HashSet<String>) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let base = match path.rsplit('/').next() {
        Some(last) if !last.is_empty() && path.matches('/').count() > 2 => last.to_string(),
        _ => "index.html".to_string(),
    };
    let mut name = base.clone();
    let mut n = 1;
    while !used.insert(name.clone()) {
        name = format!("{base}.{n}");
        n += 1;
    }
    name
}

fn run_get(
    config: &Config,
    urls: &[String],
    output: Option<&Path>,
    parallel: Option<usize>,
) -> sluice::Result<usize> {
    let limit = parallel.unwrap_or(config.engine.max_concurrent).max(1);
    let wait = Duration::from_millis(config.engine.poll_timeout_ms);
    if let Some(dir) = output {
        std::fs::create_dir_all(dir)?;
    }

    let mut set = TransferSet::new()?;
    set.max_total_connections(u32::try_from(limit).unwrap_or(u32::MAX))?;

    let mut pending: VecDeque<&String> = urls.iter().collect();
    let mut outputs: HashMap<TransferKey, (&String, Output)> = HashMap::new();
    let mut used = HashSet::new();
    let mut failed = 0;

    while !pending.is_empty() || !set.is_empty() {
        while set.len() < limit {
            let Some(url) = pending.pop_front() else {
                break;
            };
            let mut transfer = configured(config, url)?;
            let out = match output {
                Some(dir) => {
                    let path = dir.join(output_name(url, &mut used));
                    transfer.set_response(std::fs::File::create(&path)?);
                    Output::File(path)
                }
                None => {
                    let buffer = sluice::Buffer::new();
                    transfer.set_response(buffer.clone());
                    Output::Stdout(buffer)
                }
            };
            let key = set.add(transfer)?;
            debug!(%key, %url, "queued");
            outputs.insert(key, (url, out));
        }

        set.poll(wait, &mut [])?;

        for done in set.drain_completions() {
            let Some((url, out)) = outputs.remove(&done.key) else {
                continue;
            };
            if !report(url, &done) {
                failed += 1;
                continue;
            }
            match out {
                Output::Stdout(buffer) => std::io::stdout().lock().write_all(&buffer.take())?,
                Output::File(path) => info!(path = %path.display(), "saved"),
            }
        }
    }
    Ok(failed)
}

/// Log one completion; `true` on success.
fn report(url: &str, done: &CompletionRecord) -> bool {
    match &done.result {
        Ok(()) => {
            let status = done.transfer.response_code().unwrap_or(0);
            let bytes = done
                .transfer
                .info_large(InfoKey::SizeDownload)
                .unwrap_or(0);
            info!(key = %done.key, %url, status, bytes, "done");
            true
        }
        Err(e) => {
            error!(key = %done.key, %url, code = e.code, "{}", e.message);
            false
        }
    }
}

fn info_json(value: InfoValue) -> Value {
    match value {
        InfoValue::String(s) => json!(s),
        InfoValue::Integer(n) | InfoValue::LargeInteger(n) => json!(n),
        InfoValue::Double(d) => json!(d),
        InfoValue::Pointer(p) => json!(p),
        InfoValue::List(list) => json!(list
            .iter()
            .map(|item| String::from_utf8_lossy(item).into_owned())
            .collect::<Vec<_>>()),
        InfoValue::CertificateChain(chain) => json!(chain.certificates),
        InfoValue::TlsSessionInfo(tls) => json!(tls.map(|t| t.backend)),
        InfoValue::Socket(s) => json!(s),
    }
}

fn run_info(config: &Config, url: &str, as_json: bool) -> sluice::Result<usize> {
    let mut transfer = configured(config, url)?;
    transfer.set_response(sluice::sink_fn(<[u8]>::len));
    transfer.execute()?;

    let mut table = Map::new();
    for &key in InfoKey::ALL {
        // Connection-bound keys may be gone once the transfer is over.
        match transfer.get_info(key) {
            Ok(value) => {
                table.insert(format!("{key:?}"), info_json(value));
            }
            Err(e) => debug!(?key, "unavailable: {e}"),
        }
    }

    if as_json {
        let text =
            serde_json::to_string_pretty(&Value::Object(table)).map_err(std::io::Error::from)?;
        println!("{text}");
    } else {
        let width = table.keys().map(String::len).max().unwrap_or(0);
        for (key, value) in &table {
            println!("{key:<width$}  {value}");
        }
    }
    Ok(0)
}

/// `name=value` from a repeatable flag.
fn split_pair(arg: &str) -> std::io::Result<(&str, &str)> {
    arg.split_once('=').ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("expected name=value, got {arg:?}"),
        )
    })
}

fn run_post(
    config: &Config,
    url: &str,
    fields: &[String],
    files: &[String],
) -> sluice::Result<usize> {
    let mut form = MimeBuilder::new();
    for field in fields {
        let (name, value) = split_pair(field)?;
        form.field(name, value);
    }
    for file in files {
        let (name, path) = split_pair(file)?;
        form.file(name, path);
    }

    let mut transfer = configured(config, url)?;
    transfer.mime(form)?;
    let body = sluice::Buffer::new();
    transfer.set_response(body.clone());
    transfer.execute()?;

    info!(url, status = transfer.response_code()?, "posted");
    std::io::stdout().lock().write_all(&body.take())?;
    Ok(0)
}

fn run_watch(config: &Config) -> sluice::Result<usize> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(watch(config))
}

async fn watch(config: &Config) -> sluice::Result<usize> {
    let mut reactor = Reactor::new(TransferSet::new()?)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut urls: HashMap<TransferKey, String> = HashMap::new();
    let mut stdin_open = true;
    let mut failed = 0;

    info!("reading URLs from stdin");
    loop {
        if !stdin_open && reactor.is_empty() {
            break;
        }
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    debug!(in_flight = reactor.len(), "stdin closed");
                    continue;
                };
                let url = line.trim();
                if url.is_empty() || url.starts_with('#') {
                    continue;
                }
                let mut transfer = configured(config, url)?;
                transfer.set_response(sluice::sink_fn(<[u8]>::len));
                let key = reactor.add(transfer)?;
                debug!(%key, url, "watching");
                urls.insert(key, url.to_string());
            }
            done = reactor.turn(), if !reactor.is_empty() => {
                for record in done? {
                    let url = urls.remove(&record.key).unwrap_or_default();
                    if !report(&url, &record) {
                        failed += 1;
                    }
                }
            }
            else => break,
        }
    }
    Ok(failed)
}

fn run_version() -> sluice::Result<usize> {
    let info = VersionInfo::get();
    println!("sluice {}", env!("CARGO_PKG_VERSION"));
    println!("{}", sluice::global::version());
    println!("host: {}", info.host);
    println!(
        "features: ipv6={} ssl={} libz={} http2={} async-dns={}",
        info.ipv6(),
        info.ssl(),
        info.libz(),
        info.http2(),
        info.async_dns()
    );
    println!("protocols: {}", info.protocols.join(" "));
    Ok(0)
}
