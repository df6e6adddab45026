// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// ultrathink-replay: run a captured upstream response through the sanitizer.
//
// Usage:
//   ultrathink-replay --input capture.sse
//   ultrathink-replay --input capture.sse --chunk-size 7
//   ultrathink-replay --input response.json --json

use std::convert::Infallible;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use clap::Parser;
use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;

use ultrathink::sanitize::{sanitize_json_body, sanitize_sse_stream, SanitizeOptions};

#[derive(Parser)]
#[command(
    name = "ultrathink-replay",
    about = "Replay a captured SSE stream or JSON body through the tool-call sanitizer."
)]
struct Cli {
    /// Captured response body.
    #[arg(long, value_name = "FILE")]
    input: PathBuf,

    /// Treat the input as a buffered JSON body instead of an event stream.
    #[arg(long)]
    json: bool,

    /// Bytes per simulated transport chunk.
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let raw = match std::fs::read(&cli.input) {
        Ok(b) => Bytes::from(b),
        Err(e) => {
            tracing::error!(input = %cli.input.display(), "failed to read input: {e}");
            std::process::exit(1);
        }
    };

    let recovered: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = recovered.clone();
    let options = SanitizeOptions::default()
        .with_observer(move |name: &str| {
            if let Ok(mut names) = sink.lock() {
                names.push(name.to_string());
            }
        })
        .likely_sse(!cli.json);

    let output: Vec<u8> = if cli.json {
        sanitize_json_body(&raw, &options).to_vec()
    } else {
        let chunk_size = usize::try_from(cli.chunk_size).unwrap_or(usize::MAX);
        let chunks: Vec<Result<Bytes, Infallible>> = raw
            .chunks(chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let mut stream = Box::pin(sanitize_sse_stream(tokio_stream::iter(chunks), options));
        let mut out = Vec::with_capacity(raw.len());
        while let Some(Ok(chunk)) = stream.next().await {
            out.extend_from_slice(&chunk);
        }
        out
    };

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(&output).and_then(|_| stdout.flush()) {
        tracing::error!("failed to write output: {e}");
        std::process::exit(1);
    }

    let names = recovered.lock().map(|n| n.clone()).unwrap_or_default();
    eprintln!("recovered {} tool call(s)", names.len());
    for name in &names {
        eprintln!("  {name}");
    }
}
