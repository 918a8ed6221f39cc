//! Cubesync CLI - Map OLAP cube query results to upsert records
//!
//! # Main Commands
//!
//! ```bash
//! cubesync run daily_sales --slicer fiscal_period --var year=2025 --each period=1..13
//! cubesync transform daily_sales response.xml -o records.jsonl
//! cubesync pipelines list
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! cubesync check                          # Compile every pipeline
//! cubesync check daily_sales --sample r.xml   # Also check a sample for ambiguous mappings
//! cubesync render-mdx daily_sales --var slicer='[Calendar].[Year].&[2025]'
//! cubesync parse response.xml             # Structural decode as JSON
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use cubesync::{
    check_ambiguities, parse_assignment, parse_bytes, parse_each, ChunkRunner, CsvSink,
    ErrorPolicy, JsonLinesSink, ParseOutcome, PipelineConfig, PipelineRegistry, RecordSink,
    RunOptions, RunSummary, Settings, Variables, XmlaClient,
};
use futures::{stream, StreamExt};
use serde_json::json;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "cubesync")]
#[command(about = "Map XMLA cube query results to upsert records", long_about = None)]
struct Cli {
    /// Pipelines file (default: $CUBESYNC_PIPELINES or pipelines/pipelines.yaml)
    #[arg(long, global = true)]
    pipelines: Option<PathBuf>,

    /// Log as JSON lines instead of text
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List or inspect configured pipelines
    Pipelines {
        #[command(subcommand)]
        action: PipelineAction,
    },

    /// Compile pipelines and report configuration errors
    Check {
        /// Pipeline to check (default: all)
        name: Option<String>,

        /// Sample response to check for ambiguous hierarchy mappings
        #[arg(long, requires = "name")]
        sample: Option<PathBuf>,
    },

    /// Print the MDX a pipeline would send
    RenderMdx {
        name: String,

        #[arg(long)]
        slicer: Option<String>,

        /// Template variable, key=value (repeatable)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },

    /// Decode a response file and print its axes and cells as JSON
    Parse {
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Map saved response files through a pipeline
    Transform {
        name: String,

        /// Response files, processed in order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Query the server and map the results
    Run {
        name: String,

        #[arg(long)]
        slicer: Option<String>,

        /// Template variable, key=value (repeatable)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Split the query into chunks: key=1..13 or key=a,b,c
        #[arg(long, value_name = "KEY=RANGE")]
        each: Option<String>,

        /// Chunks in flight at once
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Print each rendered statement before sending it
        #[arg(long)]
        print_mdx: bool,

        #[command(flatten)]
        out: OutputArgs,
    },
}

#[derive(Subcommand)]
enum PipelineAction {
    /// List pipeline names
    List,

    /// Show a compiled pipeline as JSON
    Show { name: String },
}

#[derive(clap::Args)]
struct OutputArgs {
    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Jsonl)]
    format: OutputFormat,

    /// What to do with a record that fails to build
    #[arg(long, value_enum, default_value_t = OnError::Skip)]
    on_error: OnError,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Jsonl,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnError {
    Skip,
    Abort,
}

impl From<OnError> for ErrorPolicy {
    fn from(value: OnError) -> Self {
        match value {
            OnError::Skip => ErrorPolicy::Skip,
            OnError::Abort => ErrorPolicy::Abort,
        }
    }
}

#[tokio::main]
async fn main() {
    let settings = Settings::from_env();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let pipelines_file = cli.pipelines.unwrap_or_else(|| settings.pipelines_file.clone());

    let result = match cli.command {
        Commands::Pipelines { action } => cmd_pipelines(&pipelines_file, action),

        Commands::Check { name, sample } => {
            cmd_check(&pipelines_file, name.as_deref(), sample.as_deref())
        }

        Commands::RenderMdx { name, slicer, vars } => {
            cmd_render_mdx(&pipelines_file, &name, slicer.as_deref(), &vars)
        }

        Commands::Parse { input, output } => cmd_parse(&input, output.as_deref()).await,

        Commands::Transform { name, inputs, out } => {
            cmd_transform(&pipelines_file, &name, &inputs, &out).await
        }

        Commands::Run {
            name,
            slicer,
            vars,
            each,
            concurrency,
            print_mdx,
            out,
        } => {
            let query = QueryArgs {
                slicer: slicer.as_deref(),
                vars: &vars,
                each: each.as_deref(),
                concurrency,
                print_mdx,
            };
            cmd_run(&settings, &pipelines_file, &name, query, &out).await
        }
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// =============================================================================
// Commands
// =============================================================================

fn cmd_pipelines(pipelines_file: &Path, action: PipelineAction) -> CliResult {
    let registry = PipelineRegistry::load(pipelines_file)?;

    match action {
        PipelineAction::List => {
            eprintln!("📋 Pipelines in {}:", registry.path().display());
            for (name, definition) in registry.list() {
                match &definition.description {
                    Some(description) => println!("{name}\t{}\t{description}", definition.catalog),
                    None => println!("{name}\t{}", definition.catalog),
                }
            }
        }
        PipelineAction::Show { name } => {
            let config = registry.compile(&name)?;
            println!("{}", serde_json::to_string_pretty(&config.describe())?);
        }
    }
    Ok(())
}

fn cmd_check(pipelines_file: &Path, name: Option<&str>, sample: Option<&Path>) -> CliResult {
    let registry = PipelineRegistry::load(pipelines_file)?;

    let results = match name {
        Some(name) => vec![(name.to_string(), registry.compile(name))],
        None => registry.compile_all(),
    };

    let mut failed = 0;
    for (name, result) in &results {
        match result {
            Ok(config) => eprintln!("   ✅ {config}"),
            Err(e) => {
                failed += 1;
                eprintln!("   ❌ {name}: {e}");
            }
        }
    }

    match (sample, results.first()) {
        (Some(sample), Some((_, Ok(config)))) => check_sample(config, sample)?,
        (Some(sample), Some((name, Err(_)))) => eprintln!("{}", sample_skipped(sample, name)),
        _ => {}
    }

    if failed > 0 {
        return Err(format!("{failed} of {} pipelines failed to compile", results.len()).into());
    }
    eprintln!("\n✨ {} pipelines OK", results.len());
    Ok(())
}

fn sample_skipped(sample: &Path, name: &str) -> String {
    format!(
        "   ⏭️  Skipped ambiguity check of {}: {name} did not compile",
        sample.display()
    )
}

fn check_sample(config: &PipelineConfig, sample: &Path) -> CliResult {
    let body = cubesync::decode_body(&std::fs::read(sample)?)?;
    let ambiguities = check_ambiguities(config, &body)?;
    if ambiguities.is_empty() {
        eprintln!("   ✅ No ambiguous hierarchy mappings in {}", sample.display());
    }
    for a in &ambiguities {
        eprintln!(
            "   ⚠️  {} matches {} (using '{}')",
            a.hierarchy,
            a.fields.join(", "),
            a.fields[0]
        );
    }
    Ok(())
}

fn cmd_render_mdx(
    pipelines_file: &Path,
    name: &str,
    slicer: Option<&str>,
    vars: &[String],
) -> CliResult {
    let config = PipelineRegistry::load(pipelines_file)?.compile(name)?;
    let vars = parse_vars(vars)?;
    println!("{}", config.render_query(slicer, &vars)?);
    Ok(())
}

async fn cmd_parse(input: &Path, output: Option<&Path>) -> CliResult {
    eprintln!("📄 Parsing response: {}", input.display());

    let bytes = tokio::fs::read(input).await?;
    let value = match parse_bytes(&bytes)? {
        ParseOutcome::Data(parsed) => {
            eprintln!(
                "✅ Parsed {} rows x {} measures ({} cells)",
                parsed.row_count(),
                parsed.measure_count(),
                parsed.cells.len()
            );
            serde_json::to_value(&parsed)?
        }
        ParseOutcome::NoData { measures } => {
            eprintln!("✅ No rows ({} measures)", measures.len());
            json!({ "rows": [], "measures": measures, "cells": [] })
        }
    };

    let text = serde_json::to_string_pretty(&value)?;
    match output {
        Some(path) => {
            std::fs::write(path, text)?;
            eprintln!("   💾 Saved to: {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

async fn cmd_transform(
    pipelines_file: &Path,
    name: &str,
    inputs: &[PathBuf],
    out: &OutputArgs,
) -> CliResult {
    let config = PipelineRegistry::load(pipelines_file)?.compile(name)?;
    let mut sink = open_sink(out)?;
    let options = RunOptions {
        policy: out.on_error.into(),
        refreshed_at: Some(Utc::now()),
    };

    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("transform", %run_id, pipeline = name);
    let _guard = span.enter();

    let mut runner = ChunkRunner::new(&config, sink.as_mut(), options);
    for input in inputs {
        eprintln!("📄 Processing: {}", input.display());
        let bytes = std::fs::read(input)?;
        runner.push_bytes(&bytes)?;
        let so_far = runner.summary();
        eprintln!("   {} records, {} failed so far", so_far.records, so_far.failed);
    }
    let summary = runner.finish()?;

    report(&config, &summary, out.output.as_deref());
    Ok(())
}

struct QueryArgs<'a> {
    slicer: Option<&'a str>,
    vars: &'a [String],
    each: Option<&'a str>,
    concurrency: usize,
    print_mdx: bool,
}

async fn cmd_run(
    settings: &Settings,
    pipelines_file: &Path,
    name: &str,
    query: QueryArgs<'_>,
    out: &OutputArgs,
) -> CliResult {
    let config = PipelineRegistry::load(pipelines_file)?.compile(name)?;
    let base = parse_vars(query.vars)?;

    let chunks: Vec<Variables> = match query.each {
        None => vec![base],
        Some(each) => {
            let (key, values) = parse_each(each)?;
            values
                .into_iter()
                .map(|value| {
                    let mut vars = base.clone();
                    vars.insert(key.clone(), value);
                    vars
                })
                .collect()
        }
    };

    // Render everything first so a bad variable fails before any query is sent
    let statements = chunks
        .iter()
        .map(|vars| config.render_query(query.slicer, vars))
        .collect::<Result<Vec<_>, _>>()?;

    if query.print_mdx {
        for (i, mdx) in statements.iter().enumerate() {
            eprintln!("--- chunk {} ---\n{}", i, mdx);
        }
    }

    let client = XmlaClient::new(&settings.olap)?;
    let mut sink = open_sink(out)?;
    let options = RunOptions {
        policy: out.on_error.into(),
        refreshed_at: Some(Utc::now()),
    };

    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", %run_id, pipeline = name);

    eprintln!(
        "📡 Querying {} ({} chunk{}, catalog {})",
        client.endpoint(),
        statements.len(),
        if statements.len() == 1 { "" } else { "s" },
        config.catalog
    );

    let summary = async {
        let mut runner = ChunkRunner::new(&config, sink.as_mut(), options);
        let mut bodies = stream::iter(statements.iter())
            .map(|mdx| client.execute(&config.catalog, mdx))
            .buffered(query.concurrency.max(1));

        let mut chunk = 0;
        while let Some(body) = bodies.next().await {
            let body = body?;
            tracing::info!(chunk, bytes = body.len(), "chunk received");
            runner.push_bytes(&body)?;
            chunk += 1;
        }
        Ok::<RunSummary, Box<dyn std::error::Error>>(runner.finish()?)
    }
    .instrument(span)
    .await?;

    report(&config, &summary, out.output.as_deref());
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_vars(raw: &[String]) -> Result<Variables, String> {
    raw.iter()
        .map(|v| parse_assignment(v))
        .collect::<Result<BTreeMap<_, _>, _>>()
}

fn open_sink(out: &OutputArgs) -> io::Result<Box<dyn RecordSink>> {
    let writer: Box<dyn Write> = match &out.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout()),
    };
    Ok(match out.format {
        OutputFormat::Jsonl => Box::new(JsonLinesSink::new(writer)),
        OutputFormat::Csv => Box::new(CsvSink::new(writer)),
    })
}

fn report(config: &PipelineConfig, summary: &RunSummary, output: Option<&Path>) {
    eprintln!("\n⚙️  {} → {}", config.name, config.target_table);
    eprintln!(
        "   Chunks: {} ({} empty), rows: {}",
        summary.chunks, summary.empty_chunks, summary.rows
    );
    eprintln!("   ✅ Records: {}", summary.records);
    if summary.failed > 0 {
        eprintln!("   ❌ Failed: {}", summary.failed);
        for failure in summary.failures.iter().take(5) {
            eprintln!("     - chunk {}: {}", failure.chunk, failure.error);
        }
    }
    if let Some(path) = output {
        eprintln!("   💾 Saved to: {}", path.display());
    }
    eprintln!("\n✨ Done!");
}
