mod analyser;
mod ui;

use analyser::containers::NetworkScope;
use analyser::error::Result;
use analyser::tables::DEFAULT_TABLES;
use analyser::tshark::{CaptureSource, TsharkSource};
use analyser::{endpoints, layers, metrics, phs, resolver, stats};
use clap::{ArgAction, Parser, Subcommand};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use ui::output;

/// IoTSniff classifies protocols and attributes traffic in smart-home packet captures
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to write result files
    #[arg(short = 'o', long, default_value = "results", value_parser)]
    output_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract per-device protocol metrics from pcap files
    Extract {
        /// CSV mapping pcap files to a comma-separated list of MACs
        #[arg(value_parser)]
        config: String,

        /// Also dump each capture's classified protocols as JSON
        #[arg(short = 'j', long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Summarize extracted protocol CSVs per MAC and scope
    ProtocolStats {
        /// Directory of extracted protocol CSVs
        #[arg(value_parser)]
        input_dir: String,
    },
    /// Aggregate annotated endpoint inventories into distribution views
    EndpointStats {
        /// CSV mapping devices to endpoint and protocol files
        #[arg(value_parser)]
        config: String,
    },
    /// Collapse hostname-annotated endpoint CSVs across captures
    Collapse {
        /// Directory of endpoint CSVs to collapse
        #[arg(value_parser)]
        data_dir: String,
    },
}

fn main() {
    simple_logger::init_with_env().unwrap();

    let args = Args::parse();
    let out_dir = PathBuf::from(&args.output_dir);
    if let Err(err) = fs::create_dir_all(&out_dir) {
        log::error!("Could not create output directory {}: {err}", out_dir.display());
        std::process::exit(1);
    }

    let outcome = match &args.command {
        Command::Extract { config, json } => run_extract(Path::new(config), &out_dir, *json),
        Command::ProtocolStats { input_dir } => run_protocol_stats(Path::new(input_dir)),
        Command::EndpointStats { config } => run_endpoint_stats(Path::new(config), &out_dir),
        Command::Collapse { data_dir } => run_collapse(Path::new(data_dir), &out_dir),
    };

    if let Err(err) = outcome {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn parse_capture_config(path: &Path) -> Result<Vec<(PathBuf, Vec<String>)>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut mapping = Vec::new();
    for record in reader.records() {
        let record = record?;
        let pcap = record.get(0).unwrap_or_default();
        let macs: Vec<String> = record
            .get(1)
            .unwrap_or_default()
            .split(',')
            .map(|mac| mac.trim().to_string())
            .filter(|mac| !mac.is_empty())
            .collect();
        if !pcap.is_empty() {
            mapping.push((PathBuf::from(pcap), macs));
        }
    }
    Ok(mapping)
}

fn extract_capture(pcap: &Path, macs: &[String], out_dir: &Path, json: bool) -> Result<()> {
    let capture = pcap
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string();
    log::info!("Processing {capture}");

    let source = TsharkSource::new(pcap);
    let report = source.protocol_hierarchy()?;
    let chains = phs::unwind_tree(&report)?;
    let mut layered = layers::classify_chains(&chains, &DEFAULT_TABLES);

    let resolution = resolver::resolve_unknowns(&source, &mut layered, &DEFAULT_TABLES);
    for identity in &resolution.flagged {
        log::warn!("{capture}: ambiguous protocol {identity}, verify manually");
    }
    for name in &resolution.unresolved {
        log::warn!("{capture}: could not resolve {name}");
    }

    if json {
        let dump = output::data_as_json(&layered)?;
        output::data_to_file(dump, &out_dir.join(format!("{capture}-protocols.json")))?;
    }

    let rows = metrics::extract_device_metrics(&source, &layered, macs);
    for scope in [NetworkScope::All, NetworkScope::Lan, NetworkScope::Wan] {
        output::write_device_metrics(out_dir, &capture, scope, &rows)?;
    }
    Ok(())
}

fn run_extract(config: &Path, out_dir: &Path, json: bool) -> Result<()> {
    let mapping = parse_capture_config(config)?;
    log::info!("Extracting protocols from {} captures", mapping.len());

    // Captures are independent; one failure must not sink the batch.
    mapping.par_iter().for_each(|(pcap, macs)| {
        if let Err(err) = extract_capture(pcap, macs, out_dir, json) {
            log::error!("Could not process {}: {err}", pcap.display());
        }
    });
    Ok(())
}

fn run_protocol_stats(input_dir: &Path) -> Result<()> {
    let rows = output::read_usage_rows(input_dir)?;
    log::info!("Summarizing {} protocol rows", rows.len());
    let summary = stats::summarize_usage(&rows, &DEFAULT_TABLES);
    output::write_usage_summary(input_dir, &summary)
}

fn run_endpoint_stats(config: &Path, out_dir: &Path) -> Result<()> {
    let configs = output::read_device_config(config)?;
    let mut views = Vec::new();

    for device in &configs {
        log::info!("Aggregating endpoint data for {}", device.device);
        let endpoints = output::read_endpoint_inventory(&device.endpoint_files)?;
        let protocols = output::read_protocol_inventory(&device.protocol_files, &DEFAULT_TABLES)?;
        let data = stats::DeviceData {
            name: device.device.clone(),
            endpoints,
            protocols,
        };
        views.push((
            device.device.clone(),
            stats::compute_device_views(&data, &DEFAULT_TABLES),
        ));
    }

    output::write_party_distribution(&out_dir.join("endpoint_type_distribution.csv"), &views)?;
    output::write_local_distribution(&out_dir.join("local_endpoint_distribution.csv"), &views)?;
    output::write_category_distribution(
        &out_dir.join("endpoint_protocol_distribution.csv"),
        &views,
    )?;
    Ok(())
}

fn run_collapse(data_dir: &Path, out_dir: &Path) -> Result<()> {
    let captures = output::read_capture_endpoints(data_dir)?;
    log::info!("Collapsing endpoints across {} captures", captures.len());
    let collapsed = endpoints::collapse_all(&captures);

    for (capture, records) in &collapsed.per_file {
        output::write_merged_endpoints(&out_dir.join(format!("{capture}-merged.csv")), records)?;
    }
    output::write_overall_endpoints(&out_dir.join("overall-endpoints.csv"), &collapsed.overall)
}
