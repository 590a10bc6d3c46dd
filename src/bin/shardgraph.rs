//! Command-line front end: builds a partitioned graph and prints how it was laid out.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use shardgraph::{
    init_logging, BadRecordPolicy, BuildOptions, BuildReport, EdgeListParser, GraphBuilder,
    InputSource, MirrorGraph, RecordParser, UndeclaredVertexPolicy, WmdParser,
};

#[derive(Parser, Debug)]
#[command(
    name = "shardgraph",
    version,
    about = "Builds master/mirror graph partitions from edge files",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "SHARDGRAPH_LOG",
        default_value = "warn",
        help = "Tracing filter directive (e.g. info, shardgraph=debug)"
    )]
    log_level: String,
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Options file (defaults to <config dir>/shardgraph/config.toml)"
    )]
    config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for the build report"
    )]
    output: OutputFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Partition the given inputs and report the result.
    Build(BuildCmd),
}

#[derive(Args, Debug)]
struct BuildCmd {
    #[arg(value_name = "FILE", required = true, help = "Input files, read in order")]
    inputs: Vec<PathBuf>,
    #[arg(long, value_enum, default_value_t = InputFormat::El, help = "Record format")]
    format: InputFormat,
    #[arg(
        long,
        value_name = "N",
        help = "Vertex count for edge lists; tokens are 0..N"
    )]
    num_vertices: Option<u64>,
    #[arg(long, help = "Number of hosts")]
    hosts: Option<usize>,
    #[arg(long, help = "Virtual hosts per physical host")]
    scale_factor: Option<usize>,
    #[arg(long, help = "Ingest threads per host")]
    workers_per_host: Option<usize>,
    #[arg(long, help = "Segments each worker reads per file")]
    segments_per_worker: Option<usize>,
    #[arg(long, help = "Log and drop malformed records instead of failing")]
    skip_bad_records: bool,
    #[arg(long, help = "Fail on edges whose endpoints were never declared")]
    reject_undeclared: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum InputFormat {
    /// Whitespace separated `src dst` pairs.
    El,
    /// Ten-column typed CSV.
    Wmd,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    let options = load_options(cli.config)?;

    match cli.command {
        Command::Build(cmd) => {
            let options = apply_flags(options, &cmd);
            let sources = cmd.inputs.iter().cloned().map(InputSource::file);
            let builder = GraphBuilder::new(options).inputs(sources);
            let report = match cmd.format {
                InputFormat::El => {
                    let num_vertices = cmd
                        .num_vertices
                        .ok_or("--num-vertices is required for edge lists")?;
                    build_report(builder, &EdgeListParser::new(num_vertices))?
                }
                InputFormat::Wmd => build_report(builder, &WmdParser::new())?,
            };
            emit(cli.output, &report, print_build_text)?;
        }
    }
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("shardgraph").join("config.toml"))
}

/// An explicit file must exist; the default one is optional.
fn load_options(explicit: Option<PathBuf>) -> Result<BuildOptions, Box<dyn Error>> {
    let options = BuildOptions::default();
    if let Some(path) = explicit {
        return Ok(BuildOptions::load(path)?);
    }
    match default_config_path() {
        Some(path) if path.exists() => Ok(options.apply_toml(&fs::read_to_string(path)?)?),
        _ => Ok(options),
    }
}

fn apply_flags(mut options: BuildOptions, cmd: &BuildCmd) -> BuildOptions {
    if let Some(hosts) = cmd.hosts {
        options = options.num_hosts(hosts);
    }
    if let Some(factor) = cmd.scale_factor {
        options = options.scale_factor(factor);
    }
    if let Some(workers) = cmd.workers_per_host {
        options = options.workers_per_host(workers);
    }
    if let Some(segments) = cmd.segments_per_worker {
        options = options.segments_per_worker(segments);
    }
    if cmd.skip_bad_records {
        options = options.bad_records(BadRecordPolicy::Skip);
    }
    if cmd.reject_undeclared {
        options = options.undeclared_vertices(UndeclaredVertexPolicy::Reject);
    }
    options
}

fn build_report<P>(builder: GraphBuilder, parser: &P) -> Result<BuildReport, Box<dyn Error>>
where
    P: RecordParser,
    P::VertexPayload: Sync,
    P::EdgePayload: Sync,
{
    let graph: MirrorGraph<(), ()> = builder.build(parser, |_, _| (), |_| ())?;
    Ok(graph.into_report())
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(&T),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(value),
    }
    Ok(())
}

fn print_build_text(report: &BuildReport) {
    println!(
        "Graph: hosts={} virtual_hosts={} masters={} mirrors={} edges={}",
        report.num_hosts,
        report.num_virtual_hosts,
        report.total_masters(),
        report.total_mirrors(),
        report.total_edges()
    );
    println!(
        "Ingest: lines={} ignored={} skipped={} rejected={} vertices={} edges={}",
        report.ingest.lines,
        report.ingest.ignored,
        report.ingest.skipped,
        report.ingest.rejected,
        report.ingest.vertices,
        report.ingest.edges
    );
    println!();
    println!("Hosts:");
    for host in &report.hosts {
        println!(
            "  host{} masters={} mirrors={} edges={} implicit={}",
            host.host, host.masters, host.mirrors, host.edges, host.implicit_vertices
        );
    }
    println!();
    let map: Vec<String> = report
        .virtual_to_physical
        .iter()
        .enumerate()
        .map(|(vhost, host)| format!("{vhost}->{host}"))
        .collect();
    println!("Virtual hosts: {}", map.join(" "));
    println!(
        "Timings (ms): ingest={:.2} assign={:.2} partition={:.2} mirrors={:.2} total={:.2}",
        report.timings.ingest_ms,
        report.timings.assign_ms,
        report.timings.partition_ms,
        report.timings.mirror_ms,
        report.timings.total_ms
    );
}
