// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use irp_config::{PipelineConfig, ProviderCredentials, load_config, validate_config};
use irp_contract::FieldContract;
use irp_core::RawPacket;
use irp_photos::{NoopOcr, purge_trash};
use irp_policy::OverrideInput;
use irp_render::Template;
use irp_runtime::{DeliveryPackager, Pipeline, RunLogStore};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit code for a rejected or failed run.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "irp", version, about = "Inspection report pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline against a job directory.
    Run {
        /// Job directory (created on first run).
        #[arg(long)]
        job_dir: PathBuf,

        /// Field-contract file.
        #[arg(long)]
        contract: PathBuf,

        /// Template folder (template.toml plus the files it names).
        #[arg(long)]
        template: PathBuf,

        /// Raw inputs as a JSON file (`values`, `measurement_rows`).
        #[arg(long)]
        inputs: PathBuf,

        /// Pipeline config TOML (defaults apply when omitted).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override as `key=CODE: detail` or `key=free text`. Repeatable.
        #[arg(long = "override")]
        overrides: Vec<String>,

        /// Overall wall-clock budget in seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Validate a field-contract file and print its shape.
    Check {
        /// Field-contract file.
        contract: PathBuf,
    },

    /// Run a retention purge over a job directory's photo trash.
    Purge {
        /// Job directory.
        #[arg(long)]
        job_dir: PathBuf,

        /// Field-contract file (for its retention block).
        #[arg(long)]
        contract: PathBuf,

        /// Pipeline config TOML (retention fallback).
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Assemble deliverables into a single bundle.tar.gz.
    Bundle {
        /// Job directory.
        #[arg(long)]
        job_dir: PathBuf,
    },

    /// List a job directory's run records, oldest first.
    Runs {
        /// Job directory.
        #[arg(long)]
        job_dir: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("irp=debug")
    } else {
        EnvFilter::new("irp=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match dispatch(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}

fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            job_dir,
            contract,
            template,
            inputs,
            config,
            overrides,
            deadline_secs,
        } => cmd_run(
            job_dir,
            contract,
            template,
            inputs,
            config,
            &overrides,
            deadline_secs,
        ),
        Commands::Check { contract } => cmd_check(contract),
        Commands::Purge {
            job_dir,
            contract,
            config,
        } => cmd_purge(job_dir, contract, config),
        Commands::Bundle { job_dir } => cmd_bundle(&job_dir),
        Commands::Runs { job_dir } => cmd_runs(&job_dir),
    }
}

fn cmd_bundle(job_dir: &std::path::Path) -> Result<i32> {
    let packager = DeliveryPackager::new(job_dir.join("deliverables"));
    let bundle = packager.bundle().context("assemble bundle")?;
    println!("{}", bundle.display());
    Ok(0)
}

fn cmd_runs(job_dir: &std::path::Path) -> Result<i32> {
    let store = RunLogStore::new(job_dir.join("logs"));
    for record in store.load_all().context("load run logs")? {
        println!(
            "{}  {}  {:?}  {}",
            record.started_at.format("%Y-%m-%dT%H:%M:%SZ"),
            record.run_id,
            record.result,
            record.reject_reason.as_deref().unwrap_or("-")
        );
    }
    Ok(0)
}

fn cmd_run(
    job_dir: PathBuf,
    contract_path: PathBuf,
    template_path: PathBuf,
    inputs: PathBuf,
    config_path: Option<PathBuf>,
    override_args: &[String],
    deadline_secs: Option<u64>,
) -> Result<i32> {
    let contract = FieldContract::load(&contract_path)
        .with_context(|| format!("load contract {}", contract_path.display()))?;
    let config = load_pipeline_config(config_path)?;
    for warning in ProviderCredentials::from_env().warnings() {
        eprintln!("warning: {warning}");
    }

    let template = Template::load(&template_path)
        .with_context(|| format!("load template {}", template_path.display()))?;

    let raw_text = std::fs::read_to_string(&inputs)
        .with_context(|| format!("read inputs {}", inputs.display()))?;
    let raw: RawPacket =
        serde_json::from_str(&raw_text).with_context(|| "parse inputs JSON".to_string())?;

    let overrides = parse_override_args(override_args)?;

    let pipeline = Pipeline::new(&contract, &config, &template);
    let report = pipeline.run(
        &job_dir,
        &raw,
        &overrides,
        &NoopOcr,
        deadline_secs.map(Duration::from_secs),
    );

    match &report.error {
        None => {
            println!("run {} succeeded", report.record.run_id);
            if let Some(manifest) = &report.manifest {
                for entry in &manifest.entries {
                    println!("  {}  {} bytes", entry.path, entry.size);
                }
            }
            if let Some(path) = &report.log_path {
                println!("run log: {}", path.display());
            }
            Ok(0)
        }
        Some(err) => {
            eprintln!("run {} rejected: {err}", report.record.run_id);
            Ok(EXIT_RUNTIME_ERROR)
        }
    }
}

fn cmd_check(contract_path: PathBuf) -> Result<i32> {
    let contract = FieldContract::load(&contract_path)
        .with_context(|| format!("load contract {}", contract_path.display()))?;
    println!("contract version: {}", contract.version());
    println!("fields:");
    for field in contract.fields() {
        println!(
            "  {}  type={:?} importance={:?} aliases={}",
            field.key,
            field.field_type,
            field.importance,
            field.aliases.len()
        );
    }
    println!("slots:");
    for slot in contract.slots() {
        println!(
            "  {}  basename={} required={} override_allowed={}",
            slot.key, slot.basename, slot.required, slot.override_allowed
        );
    }
    Ok(0)
}

fn cmd_purge(job_dir: PathBuf, contract_path: PathBuf, config_path: Option<PathBuf>) -> Result<i32> {
    let contract = FieldContract::load(&contract_path)
        .with_context(|| format!("load contract {}", contract_path.display()))?;
    let config = load_pipeline_config(config_path)?;
    let policy = contract
        .retention()
        .cloned()
        .unwrap_or_else(|| config.retention.clone());

    let report = purge_trash(&job_dir.join("photos"), &policy, Utc::now())?;
    println!(
        "kept {}  deleted {}  compressed {}  flagged {}",
        report.kept.len(),
        report.deleted.len(),
        report.compressed.len(),
        report.flagged.len()
    );
    Ok(0)
}

fn load_pipeline_config(path: Option<PathBuf>) -> Result<PipelineConfig> {
    let config = load_config(path.as_deref()).context("load pipeline config")?;
    for warning in validate_config(&config).context("validate pipeline config")? {
        eprintln!("warning: {warning}");
    }
    Ok(config)
}

/// Parse repeated `key=value` override flags into override inputs.
fn parse_override_args(args: &[String]) -> Result<BTreeMap<String, OverrideInput>> {
    let mut out = BTreeMap::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .with_context(|| format!("override '{arg}' is not key=value"))?;
        anyhow::ensure!(!key.trim().is_empty(), "override '{arg}' has an empty key");
        out.insert(
            key.trim().to_string(),
            OverrideInput::Legacy(value.trim().to_string()),
        );
    }
    Ok(out)
}
