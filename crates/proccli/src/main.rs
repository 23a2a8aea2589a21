// crates/proccli/src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use proccore::sinks::{IggySinkConfig, IggySpanSink, JsonLinesSink};
use proccore::{
    data_from_json, DataMap, EngineError, InstanceStatus, ProcessDescription, ProcessLoader, SpanRecord,
    SpanStatus,
};
use procruntime::{EngineConfig, ExecutionControl, ProcessEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "procflow")]
#[command(about = "Process engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a process definition file
    Run {
        /// Path to process definition JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial instance data as JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Engine configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Append exported spans to this JSON lines file
        #[arg(long)]
        spans_out: Option<PathBuf>,

        /// Publish spans to an Iggy collector (connection string);
        /// defaults to PROCFLOW_IGGY_URL when set
        #[arg(long)]
        iggy: Option<String>,

        /// Maximum service tasks in flight at once
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a process definition file
    Validate {
        /// Path to process definition JSON file
        file: PathBuf,
    },

    /// List available service task handlers
    Handlers,

    /// Create an example process definition
    Init {
        /// Output file path
        #[arg(short, long, default_value = "process.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            spans_out,
            iggy,
            parallel,
            verbose,
        } => {
            init_logging(verbose);
            let sinks = SinkOptions { spans_out, iggy };
            let status = run_process(file, input, config, sinks, parallel).await?;
            if status == InstanceStatus::Failed {
                std::process::exit(1);
            }
        }

        Commands::Validate { file } => {
            if !validate_process(file)? {
                std::process::exit(1);
            }
        }

        Commands::Handlers => {
            list_handlers();
        }

        Commands::Init { output } => {
            create_example_process(output)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_input(input: Option<String>) -> Result<DataMap> {
    let Some(input) = input else {
        return Ok(DataMap::new());
    };
    let json: serde_json::Value = serde_json::from_str(&input)?;
    data_from_json(json).ok_or_else(|| anyhow::anyhow!("Input must be a JSON object"))
}

fn print_span(span: &SpanRecord) {
    let marker = match span.status {
        SpanStatus::Ok => "✅",
        SpanStatus::Error => "❌",
    };
    println!(
        "  {} {} ({}) {}ms",
        marker, span.node_id, span.node_type, span.duration_ms
    );
    for (key, value) in &span.attributes {
        if key != "node_id" && key != "node_type" {
            println!("       {}: {:?}", key, value);
        }
    }
}

/// Span sinks attached on top of the live console feed
struct SinkOptions {
    spans_out: Option<PathBuf>,
    iggy: Option<String>,
}

async fn attach_sinks(engine: &ProcessEngine, options: SinkOptions) -> Result<()> {
    if let Some(path) = options.spans_out {
        let sink = JsonLinesSink::open(&path).await?;
        engine.add_sink(Arc::new(sink)).await;
    }

    let iggy = match options.iggy {
        Some(url) => Some(IggySinkConfig::with_connection_string(url)),
        None => IggySinkConfig::from_env(),
    };
    if let Some(config) = iggy {
        println!("📡 Publishing spans to Iggy {}/{}", config.stream_name, config.topic_name);
        let sink = IggySpanSink::connect(config).await?;
        engine.add_sink(Arc::new(sink)).await;
    }
    Ok(())
}

async fn run_process(
    file: PathBuf,
    input: Option<String>,
    config: Option<PathBuf>,
    sinks: SinkOptions,
    parallel: Option<usize>,
) -> Result<InstanceStatus> {
    println!("🚀 Loading process from: {}", file.display());

    let mut config = match config {
        Some(path) => EngineConfig::from_file(path)?.with_env_overrides()?,
        None => EngineConfig::from_env()?,
    };
    if let Some(parallel) = parallel {
        config.max_parallel_branches = parallel;
    }

    let data = parse_input(input)?;

    let engine = ProcessEngine::with_config(prochandlers::standard_registry(), config)?;
    attach_sinks(&engine, sinks).await?;

    let definition = engine.deploy_file(&file).await?;
    println!("📋 Process: {}", definition.name().unwrap_or(definition.id()));
    println!("   Nodes: {}", definition.node_count());
    println!("   Flows: {}", definition.flows().len());
    println!();

    // Subscribe to spans for real-time output
    let mut spans = engine.subscribe_spans();
    let span_task = tokio::spawn(async move {
        while let Ok(span) = spans.recv().await {
            print_span(&span);
        }
    });

    let response = engine.run(definition, data, ExecutionControl::new()).await;

    // Let the listener drain what was already sent
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    span_task.abort();

    println!();
    println!("📊 Execution Summary:");
    println!("   Instance ID: {}", response.instance_id);
    println!("   Status: {}", response.status);
    println!("   Spans: {}", response.spans.len());
    if let Some(failure) = &response.failure {
        println!("   Failure: {}", failure);
    }
    if let Some(code) = response.error_code() {
        println!("   Error code: {}", code);
    }

    if !response.data.is_empty() {
        println!();
        println!("📤 Data:");
        for (key, value) in &response.data {
            println!("   {}: {}", key, value);
        }
    }

    println!();
    println!("{}", serde_json::to_string_pretty(&response.export_spans())?);

    Ok(response.status)
}

fn validate_process(file: PathBuf) -> Result<bool> {
    println!("🔍 Validating process: {}", file.display());

    let registry = prochandlers::standard_registry();
    let loader = ProcessLoader::new(&registry);

    match loader.load_file(&file) {
        Ok(definition) => {
            println!("✅ Process is valid:");
            println!("   Id: {}", definition.id());
            println!("   Nodes: {}", definition.node_count());
            println!("   Flows: {}", definition.flows().len());
            Ok(true)
        }
        Err(EngineError::Definition(error)) => {
            println!("❌ Process '{}' is invalid:", error.process_id);
            for violation in &error.violations {
                println!("   - {}", violation);
            }
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn list_handlers() {
    println!("📦 Available Handlers:");
    println!();

    let registry = prochandlers::standard_registry();

    for name in registry.list_handlers() {
        if let Some(metadata) = registry.metadata(&name) {
            println!("  • {} ({})", name, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", name);
        }
    }
}

fn create_example_process(output: PathBuf) -> Result<()> {
    let description = ProcessDescription::new("fetch-and-log")
        .with_name("Fetch and log")
        .start("start")
        .task("fetch", "http.request", 2)
        .exclusive("check")
        .task("log", "debug.log", 0)
        .end("done")
        .error_end("failed", "FETCH_FAILED")
        .flow("f1", "start", "fetch")
        .flow("f2", "fetch", "check")
        .conditional_flow("f3", "check", "log", "status == 200")
        .default_flow("f4", "check", "failed")
        .flow("f5", "log", "done");

    std::fs::write(&output, description.to_json()?)?;

    println!("✨ Created example process: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  procflow run --file {} --input '{{\"url\": \"https://api.github.com/zen\", \"message\": \"fetched\"}}'",
        output.display()
    );

    Ok(())
}
