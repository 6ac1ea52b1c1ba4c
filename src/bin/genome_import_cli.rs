use anyhow::{Context, Result, anyhow, bail};
use genome_import::{GenomeImporter, GenomeRecord, ImportConfig, SizeGuard, size_guard};
use serde::Serialize;
use std::{env, fs};
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct TaxonSummary {
    lineage: String,
    reference: String,
    domain: String,
    genetic_code: u32,
    unconfirmed: bool,
}

#[derive(Serialize)]
struct ValidationSummary {
    path: String,
    size: u64,
    max_genome_size: u64,
}

fn usage() {
    eprintln!(
        "Usage:\n  \
  genome_import_cli --version\n  \
  genome_import_cli [--config PATH] resolve-taxon NAMESPACE ORGANISM NAME...\n  \
  genome_import_cli [--config PATH] validate GENOME.json\n\n  \
  Without --config, the file named by $GENOME_IMPORT_CONFIG is used if set."
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Could not serialize JSON output")?;
    println!("{text}");
    Ok(())
}

fn parse_global_config_arg(args: &[String]) -> (Option<String>, usize) {
    if args.len() >= 3 && args[1] == "--config" {
        return (Some(args[2].clone()), 3);
    }
    (None, 1)
}

fn load_config(path: Option<&str>) -> Result<ImportConfig> {
    let config = match path {
        Some(path) => ImportConfig::from_json_file(path)?,
        None => ImportConfig::from_env()?,
    };
    Ok(config)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        bail!("Missing command");
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("genome_import_cli {}", genome_import::version());
        return Ok(());
    }

    let (config_path, cmd_idx) = parse_global_config_arg(&args);
    if args.len() <= cmd_idx {
        usage();
        bail!("Missing command");
    }
    let command = &args[cmd_idx];

    match command.as_str() {
        "resolve-taxon" => {
            if args.len() <= cmd_idx + 2 {
                usage();
                bail!("resolve-taxon requires: NAMESPACE ORGANISM NAME...");
            }
            let namespace = &args[cmd_idx + 1];
            let organism = args[cmd_idx + 2..].join(" ");
            let config = load_config(config_path.as_deref())?;
            let importer = GenomeImporter::from_config(&config)?;
            let taxon = importer.retrieve_taxon(namespace, &organism)?;
            print_json(&TaxonSummary {
                lineage: taxon.lineage_string(),
                unconfirmed: taxon.is_unconfirmed(),
                reference: taxon.reference,
                domain: taxon.domain.to_string(),
                genetic_code: taxon.genetic_code,
            })
        }
        "validate" => {
            let path = args
                .get(cmd_idx + 1)
                .ok_or_else(|| anyhow!("Missing path for {command}"))?;
            let config = load_config(config_path.as_deref())?;
            let text = fs::read_to_string(path)
                .with_context(|| format!("Could not read genome JSON '{path}'"))?;
            let genome = GenomeRecord::from_json_str(&text)
                .with_context(|| format!("Invalid genome JSON in '{path}'"))?;
            let guard = SizeGuard::new(config.max_genome_size);
            let size = size_guard::serialized_size(&genome)?;
            guard.validate(&genome)?;
            print_json(&ValidationSummary {
                path: path.to_string(),
                size,
                max_genome_size: guard.max_genome_size(),
            })
        }
        _ => {
            usage();
            Err(anyhow!("Unknown command '{command}'"))
        }
    }
}
