//! scanvox CLI - Command-line interface for scanvox
//!
//! Commands:
//! - analyze: Assess session batches into analysis records
//! - decide: Turn fused scores into an intervention verdict
//! - validate: Validate session batch schema
//! - profiles: Print the condition threshold profiles
//! - init-model: Build a freshly initialized model and save its artifacts
//! - summary: Print a model's architecture and parameter counts
//! - doctor: Diagnose configuration and model artifacts

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use scanvox::config::EngineConfig;
use scanvox::decision::DecisionEngine;
use scanvox::model::{artifact_paths, EngagementModel};
use scanvox::pipeline::EngagementProcessor;
use scanvox::profile::{Condition, DiagnosedConditions, ProfileRegistry};
use scanvox::schema::{SessionBatch, SCHEMA_VERSION};
use scanvox::types::{AuxiliarySignals, EngagementScores, HybridEngagementAnalysis};
use scanvox::{EngageError, PRODUCER_NAME, SCANVOX_VERSION};

/// scanvox - Multimodal engagement inference with condition-aware interventions
#[derive(Parser)]
#[command(name = "scanvox")]
#[command(version = SCANVOX_VERSION)]
#[command(about = "Estimate learner engagement from gaze and voice", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assess session batches into analysis records
    Analyze {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Engine config JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Model artifact stem (overrides the config's model_path)
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Turn fused scores into an intervention verdict
    Decide {
        /// Scores JSON file (use - for stdin)
        #[arg(short, long)]
        scores: PathBuf,

        /// Diagnosed condition (repeatable)
        #[arg(long = "condition")]
        conditions: Vec<Condition>,

        /// Auxiliary microexpression/gesture signals JSON file
        #[arg(long)]
        auxiliary: Option<PathBuf>,
    },

    /// Validate session batch schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the condition threshold profiles
    Profiles {
        /// Only print the profile selected for these conditions
        #[arg(long = "condition")]
        conditions: Vec<Condition>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build a freshly initialized model and save its artifacts
    InitModel {
        /// Artifact stem to write
        #[arg(short, long)]
        output: PathBuf,

        /// Engine config JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the initialization seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print a model's architecture and parameter counts
    Summary {
        /// Model artifact stem; builds from config when omitted
        #[arg(long)]
        model: Option<PathBuf>,

        /// Engine config JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and model artifacts
    Doctor {
        /// Engine config JSON file to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Model artifact stem to check
        #[arg(long)]
        model: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one batch per line)
    Ndjson,
    /// JSON array of batches
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), ScanvoxCliError> {
    match cli.command {
        Commands::Analyze {
            input,
            output,
            input_format,
            output_format,
            config,
            model,
        } => cmd_analyze(
            &input,
            &output,
            input_format,
            output_format,
            config.as_deref(),
            model,
        ),

        Commands::Decide {
            scores,
            conditions,
            auxiliary,
        } => cmd_decide(&scores, &conditions, auxiliary.as_deref()),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Profiles { conditions, json } => cmd_profiles(&conditions, json),

        Commands::InitModel {
            output,
            config,
            seed,
        } => cmd_init_model(&output, config.as_deref(), seed),

        Commands::Summary {
            model,
            config,
            json,
        } => cmd_summary(model.as_deref(), config.as_deref(), json),

        Commands::Doctor {
            config,
            model,
            json,
        } => cmd_doctor(config.as_deref(), model.as_deref(), json),
    }
}

fn cmd_analyze(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
    model: Option<PathBuf>,
) -> Result<(), ScanvoxCliError> {
    let mut engine_config = load_config(config)?;
    if model.is_some() {
        engine_config.model_path = model;
    }

    let batches = parse_batches(&read_input(input)?, &input_format)?;
    if batches.is_empty() {
        return Err(ScanvoxCliError::NoBatches);
    }

    let processor = EngagementProcessor::new(engine_config)?;
    let records = processor
        .assess_many(&batches)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    let output_data = format_output(&records, &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_decide(
    scores: &Path,
    conditions: &[Condition],
    auxiliary: Option<&Path>,
) -> Result<(), ScanvoxCliError> {
    let scores: EngagementScores = serde_json::from_str(&read_input(scores)?)?;
    let auxiliary: AuxiliarySignals = match auxiliary {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => AuxiliarySignals::default(),
    };

    let flags = condition_flags(conditions);
    let registry = ProfileRegistry::standard();
    let engine = DecisionEngine::default();
    let aux = (!auxiliary.is_empty()).then_some(&auxiliary);
    let verdict = engine.decide(&scores, registry.select(&flags), aux);

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), ScanvoxCliError> {
    let batches = parse_batches(&read_input(input)?, &input_format)?;

    let errors: Vec<ValidationErrorDetail> = batches
        .iter()
        .enumerate()
        .filter_map(|(index, batch)| {
            batch.validate().err().map(|e| ValidationErrorDetail {
                index,
                session_id: batch.session_id.clone(),
                error: e.to_string(),
            })
        })
        .collect();

    let report = ValidationReport {
        total_batches: batches.len(),
        valid_batches: batches.len() - errors.len(),
        invalid_batches: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Schema:          {}", SCHEMA_VERSION);
        println!("Total batches:   {}", report.total_batches);
        println!("Valid batches:   {}", report.valid_batches);
        println!("Invalid batches: {}", report.invalid_batches);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Session {} (index {}): {}",
                    err.session_id, err.index, err.error
                );
            }
        }
    }

    if report.invalid_batches > 0 {
        Err(ScanvoxCliError::ValidationFailed(report.invalid_batches))
    } else {
        Ok(())
    }
}

fn cmd_profiles(conditions: &[Condition], json: bool) -> Result<(), ScanvoxCliError> {
    let registry = ProfileRegistry::standard();
    let profiles: Vec<_> = if conditions.is_empty() {
        registry.iter().collect()
    } else {
        vec![registry.select(&condition_flags(conditions))]
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }

    println!(
        "{:<16} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>8} {:>8}",
        "condition", "attn.min", "attn.crit", "eng.min", "eng.crit", "frus.max", "frus.crit",
        "session", "break"
    );
    for p in profiles {
        println!(
            "{:<16} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>5}min {:>5}min",
            p.condition.as_str(),
            p.min_attention_score,
            p.critical_attention_score,
            p.min_engagement_score,
            p.critical_engagement_score,
            p.max_frustration_level,
            p.critical_frustration_level,
            p.recommended_session_length,
            p.break_duration
        );
    }
    Ok(())
}

fn cmd_init_model(
    output: &Path,
    config: Option<&Path>,
    seed: Option<u64>,
) -> Result<(), ScanvoxCliError> {
    let mut engine_config = load_config(config)?;
    if let Some(seed) = seed {
        engine_config.model.seed = seed;
    }

    let model = EngagementModel::built(engine_config.model)?;
    model.save(output)?;

    let (weights, metadata) = artifact_paths(output);
    println!("Wrote {}", weights.display());
    println!("Wrote {}", metadata.display());
    println!("Parameters: {}", model.parameter_count());
    Ok(())
}

fn cmd_summary(
    model: Option<&Path>,
    config: Option<&Path>,
    json: bool,
) -> Result<(), ScanvoxCliError> {
    let model = match model {
        Some(stem) => EngagementModel::from_artifact(stem)?,
        None => EngagementModel::built(load_config(config)?.model)?,
    };
    let summary = model.summary()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Hybrid Engagement Model");
    println!("=======================");
    println!("Scanpath shape: {:?}", summary.metadata.scanpath_shape);
    println!("MFCC shape:     {:?}", summary.metadata.mfcc_shape);
    println!("Classes:        {}", summary.metadata.num_classes);
    println!("Embedding dim:  {}", summary.embedding_dim);
    println!("Visual dropout: {:?}", summary.visual_dropout);
    println!("Fusion dropout: {:?}", summary.fusion_dropout);
    println!(
        "Loss weights:   class={} attention={} frustration={}",
        summary.loss_weights.engagement_class,
        summary.loss_weights.attention_score,
        summary.loss_weights.frustration_level
    );
    println!("\nParameters:");
    for p in &summary.parameters {
        println!("  {:<36} {:>14} {:>10}", p.name, format!("{:?}", p.shape), p.count);
    }
    println!("\nTotal parameters: {}", summary.total_parameters);
    Ok(())
}

fn cmd_doctor(
    config: Option<&Path>,
    model: Option<&Path>,
    json: bool,
) -> Result<(), ScanvoxCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck {
            name: "scanvox_version".to_string(),
            status: CheckStatus::Ok,
            message: format!("scanvox version {}", SCANVOX_VERSION),
        },
        DoctorCheck {
            name: "schema_version".to_string(),
            status: CheckStatus::Ok,
            message: format!("Input schema: {}", SCHEMA_VERSION),
        },
    ];

    if let Some(config_path) = config {
        checks.push(match EngineConfig::from_file(config_path) {
            Ok(cfg) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid (grid {}, sequence {}x{})",
                    cfg.features.grid_size, cfg.features.target_length, cfg.features.coefficients
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        });
    }

    if let Some(stem) = model {
        let (weights, metadata) = artifact_paths(stem);
        checks.push(if !weights.exists() || !metadata.exists() {
            DoctorCheck {
                name: "model".to_string(),
                status: CheckStatus::Warning,
                message: format!(
                    "Model artifacts missing ({} / {})",
                    weights.display(),
                    metadata.display()
                ),
            }
        } else {
            match EngagementModel::from_artifact(stem) {
                Ok(m) => DoctorCheck {
                    name: "model".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Model loads ({} parameters)", m.parameter_count()),
                },
                Err(e) => DoctorCheck {
                    name: "model".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                },
            }
        });
    }

    // Check stdin is available (for piped batches)
    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: if atty::is(atty::Stream::Stdin) {
            "stdin is a TTY (interactive mode)".to_string()
        } else {
            "stdin is a pipe (batch input ready)".to_string()
        },
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: SCANVOX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("scanvox Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    if report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error))
    {
        Err(ScanvoxCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(input: &Path) -> Result<String, ScanvoxCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, ScanvoxCliError> {
    match path {
        Some(p) => Ok(EngineConfig::from_file(p)?),
        None => Ok(EngineConfig::default()),
    }
}

fn parse_batches(data: &str, format: &InputFormat) -> Result<Vec<SessionBatch>, ScanvoxCliError> {
    match format {
        InputFormat::Json => Ok(serde_json::from_str(data)?),
        InputFormat::Ndjson => data
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line.trim()).map_err(|e| {
                    ScanvoxCliError::ParseError(format!("line {}: {}", n + 1, e))
                })
            })
            .collect(),
    }
}

fn condition_flags(conditions: &[Condition]) -> DiagnosedConditions {
    let mut flags = DiagnosedConditions::none();
    for condition in conditions {
        flags.set(*condition, true);
    }
    flags
}

fn format_output(
    records: &[HybridEngagementAnalysis],
    format: &OutputFormat,
) -> Result<String, ScanvoxCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)?),
    }
}

// Error types

#[derive(Debug)]
enum ScanvoxCliError {
    Io(io::Error),
    Engine(EngageError),
    Json(serde_json::Error),
    NoBatches,
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for ScanvoxCliError {
    fn from(e: io::Error) -> Self {
        ScanvoxCliError::Io(e)
    }
}

impl From<EngageError> for ScanvoxCliError {
    fn from(e: EngageError) -> Self {
        ScanvoxCliError::Engine(e)
    }
}

impl From<serde_json::Error> for ScanvoxCliError {
    fn from(e: serde_json::Error) -> Self {
        ScanvoxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ScanvoxCliError> for CliError {
    fn from(e: ScanvoxCliError) -> Self {
        match e {
            ScanvoxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ScanvoxCliError::Engine(EngageError::Validation(e)) => CliError {
                code: "VALIDATION_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'scanvox validate' for details".to_string()),
            },
            ScanvoxCliError::Engine(e @ EngageError::ModelLoad { .. }) => CliError {
                code: "MODEL_LOAD_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'scanvox doctor --model <stem>' to inspect the artifacts".to_string()),
            },
            ScanvoxCliError::Engine(e @ EngageError::InvalidConfig(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Feature sizes must match the model shapes".to_string()),
            },
            ScanvoxCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            ScanvoxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            ScanvoxCliError::NoBatches => CliError {
                code: "NO_BATCHES".to_string(),
                message: "No session batches found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            ScanvoxCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} batches failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            ScanvoxCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            ScanvoxCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some(format!("Ensure input matches {} schema", SCHEMA_VERSION)),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_batches: usize,
    valid_batches: usize,
    invalid_batches: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    session_id: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
