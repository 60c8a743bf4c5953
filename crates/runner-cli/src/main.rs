use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use opentelemetry_otlp::WithExportConfig;
use clap::{Args, Parser, Subcommand};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use runner_backend::mock::MockRunner;
use runner_common::config::Config;
use runner_core::SamplingParams;
use runner_engine::Engine;

#[derive(Parser, Debug)]
#[command(name = "runner", version, about = "Batched inference scheduler CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server.
    Serve,
    /// Run a single prompt to completion against an in-process engine.
    Run(RunArgs),
    /// Print host CPU/memory (and GPU, if NVML is available) usage.
    Stats,
    /// Print the CLI version.
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Comma-separated prompt token ids, e.g. "10,11,12".
    #[arg(short, long)]
    prompt_tokens: String,
    #[arg(short = 'n', long, default_value_t = 32)]
    max_tokens: usize,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve().await,
        Commands::Run(args) => run_local(args).await,
        Commands::Stats => stats(),
        Commands::Version => println!("{}", env!("CARGO_PKG_VERSION")),
    }
}

async fn serve() {
    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let engine = Engine::new(
        cfg.max_num_seqs,
        cfg.max_num_batched_tokens,
        cfg.eos,
        cfg.num_kvcache_blocks,
        cfg.kvcache_block_size,
        Arc::new(MockRunner::new(cfg.eos)),
    );
    let handle = runner_engine::spawn(engine, Duration::from_millis(2));

    let app: Router = runner_api::app(handle);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", 8080)).await.unwrap();
    tracing::info!("listening on http://0.0.0.0:8080");
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap();
}

async fn run_local(args: RunArgs) {
    let cfg = Config::load().unwrap_or_default();
    let prompt_tokens: Vec<u32> = args
        .prompt_tokens
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.trim().parse().expect("prompt token ids must be integers"))
        .collect();

    let mut engine = Engine::new(
        cfg.max_num_seqs,
        cfg.max_num_batched_tokens,
        cfg.eos,
        cfg.num_kvcache_blocks,
        cfg.kvcache_block_size,
        Arc::new(MockRunner::new(cfg.eos)),
    );

    let sampling_params = SamplingParams {
        max_tokens: args.max_tokens,
        ..SamplingParams::default()
    };
    let seq_id = engine
        .add_request(prompt_tokens, sampling_params)
        .expect("request exceeds pool capacity");

    while !engine.is_idle() {
        match engine.step() {
            Ok(finished) => {
                for out in finished {
                    if out.seq_id == seq_id {
                        println!("{:?}", out.token_ids);
                        return;
                    }
                }
            }
            Err(e) => {
                eprintln!("engine step failed: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn stats() {
    let host = runner_obs::host_stats();
    println!("CPU: {:.1}%", host.cpu_avg_percent);
    println!(
        "Memory: {} / {} MiB",
        host.used_memory_mib, host.total_memory_mib
    );
    println!("GPU: see /metrics for NVML-based GPU stats if NVIDIA is present");
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .install_simple()
            .ok();
        if let Some(tracer) = tracer {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .with(OpenTelemetryLayer::new(tracer))
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
