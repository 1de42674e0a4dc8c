//! xtprobe - iptables feature and backend detection CLI
//!
//! stdout carries the command payload; logs go to stderr.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use xt_common::{Backend, BackendPreference, OutputFormat, SCHEMA_VERSION};
use xt_config::{load_config, validate_config, ConfigOptions, ResolvedConfig, ValidationError};
use xt_core::backend::{detect_backend, find_best_binary, BinaryKind, IpVersion};
use xt_core::exit_codes::ExitCode;
use xt_core::features::FeatureDetector;
use xt_core::log_event;
use xt_core::logging::{
    event_names, generate_run_id, get_host_id, init_logging, LogConfig, LogContext, LogFormat,
    LogLevel, Stage,
};
use xt_core::probe::{PathResolver, ToolCommandRunner};
use xt_core::report::{
    BackendReport, BinariesReport, BinaryEntry, FeaturesReport, ReportHeader,
};
use xt_core::schema;

/// xtprobe - detect iptables capabilities and the active backend
#[derive(Parser)]
#[command(name = "xtprobe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to xtprobe.toml (otherwise XTPROBE_CONFIG, XDG, /etc)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Feature override, e.g. SNATFullyRandom=false (repeatable)
    #[arg(long = "override", value_name = "NAME=VALUE", global = true)]
    overrides: Vec<String>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Log format on stderr (overrides XTPROBE_LOG_FORMAT)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect iptables features from tool and kernel versions (default)
    Features(FeaturesArgs),

    /// Detect the iptables backend in use (legacy or nft)
    Backend(BackendArgs),

    /// Print the save/restore binaries for a backend
    Binaries(BinariesArgs),

    /// Validate the configuration
    Check,

    /// Print JSON Schema for xtprobe payloads
    Schema(SchemaArgs),

    /// Print version information
    Version,
}

#[derive(Args, Debug, Default)]
struct FeaturesArgs {
    /// Re-probe even though a detection already ran
    #[arg(long)]
    refresh: bool,
}

#[derive(Args, Debug)]
struct BackendArgs {
    /// auto, legacy or nft (overrides [backend] preferred)
    #[arg(long, value_name = "PREFERENCE")]
    preferred: Option<BackendPreference>,
}

#[derive(Args, Debug)]
struct BinariesArgs {
    /// legacy or nft; detected when omitted
    #[arg(long)]
    backend: Option<Backend>,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Type to print
    #[arg(value_name = "TYPE")]
    type_name: Option<String>,

    /// List available types
    #[arg(long)]
    list: bool,
}

fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env(
        LogLevel::from_verbosity(cli.global.verbose, cli.global.quiet),
        cli.global.log_format,
    );
    init_logging(&log_config);

    let ctx = LogContext::new(generate_run_id(), get_host_id());
    log_event!(
        ctx,
        DEBUG,
        event_names::RUN_STARTED,
        Stage::Init,
        "xtprobe starting",
        version = env!("CARGO_PKG_VERSION")
    );

    let exit_code = match cli.command {
        None => run_features(&cli.global, &ctx, &FeaturesArgs::default()),
        Some(Commands::Features(args)) => run_features(&cli.global, &ctx, &args),
        Some(Commands::Backend(args)) => run_backend(&cli.global, &ctx, &args),
        Some(Commands::Binaries(args)) => run_binaries(&cli.global, &ctx, &args),
        Some(Commands::Check) => run_check(&cli.global, &ctx),
        Some(Commands::Schema(args)) => run_schema(&cli.global, &ctx, &args),
        Some(Commands::Version) => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    log_event!(
        ctx,
        DEBUG,
        event_names::RUN_FINISHED,
        Stage::Report,
        "xtprobe finished",
        exit_code = %exit_code
    );
    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_features(global: &GlobalOpts, ctx: &LogContext, args: &FeaturesArgs) -> ExitCode {
    let resolved = match load(global, ctx, None) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let detector = FeatureDetector::from_config(&resolved.config);
    let mut features = detector.get_features();
    if args.refresh {
        detector.refresh_features();
        features = detector.get_features();
    }

    let report = FeaturesReport::new(
        ReportHeader::new(&ctx.run_id),
        features,
        detector.probed_versions(),
        resolved.config.features.overrides.clone(),
        args.refresh,
    );
    log_event!(
        ctx,
        INFO,
        event_names::PROBE_RESULT,
        Stage::Probe,
        "features detected",
        features = %features
    );

    emit(global, ctx, &report, || report.summary(), || report.markdown())
}

fn run_backend(global: &GlobalOpts, ctx: &LogContext, args: &BackendArgs) -> ExitCode {
    let resolved = match load(global, ctx, args.preferred) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let runner = ToolCommandRunner::from_probe_config(&resolved.config.probe);
    let decision = match detect_backend(&PathResolver, &runner, resolved.config.backend.preferred)
    {
        Ok(d) => d,
        Err(e) => return output_error(global, ctx, &e.into()),
    };
    log_event!(
        ctx,
        INFO,
        event_names::BACKEND_DETECTED,
        Stage::Backend,
        "iptables backend selected",
        selected = %decision.selected,
        detected = %decision.detected
    );

    let report = BackendReport {
        header: ReportHeader::new(&ctx.run_id),
        decision,
    };
    emit(global, ctx, &report, || report.summary(), || report.markdown())
}

fn run_binaries(global: &GlobalOpts, ctx: &LogContext, args: &BinariesArgs) -> ExitCode {
    let resolved = match load(global, ctx, None) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let backend = match args.backend {
        Some(b) => b,
        None => {
            let runner = ToolCommandRunner::from_probe_config(&resolved.config.probe);
            match detect_backend(&PathResolver, &runner, resolved.config.backend.preferred) {
                Ok(d) => d.selected,
                Err(e) => return output_error(global, ctx, &e.into()),
            }
        }
    };

    let mut binaries = Vec::new();
    for ip_version in [IpVersion::V4, IpVersion::V6] {
        for kind in [BinaryKind::Save, BinaryKind::Restore] {
            match find_best_binary(&PathResolver, ip_version, backend, kind) {
                Ok(command) => binaries.push(BinaryEntry {
                    ip_version,
                    kind,
                    command,
                }),
                Err(e) => return output_error(global, ctx, &e.into()),
            }
        }
    }

    let report = BinariesReport {
        header: ReportHeader::new(&ctx.run_id),
        backend,
        binaries,
    };
    emit(global, ctx, &report, || report.summary(), || report.markdown())
}

fn run_check(global: &GlobalOpts, ctx: &LogContext) -> ExitCode {
    let resolved = match load(global, ctx, None) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let validation = validate_config(&resolved.config);
    for warning in &validation.warnings {
        log_event!(
            ctx,
            WARN,
            event_names::CONFIG_ERROR,
            Stage::Init,
            warning.message.as_str(),
            field = %warning.field
        );
    }

    let errors: Vec<serde_json::Value> = validation
        .errors
        .iter()
        .map(|e| match e {
            ValidationError::InvalidValue { field, message } => {
                serde_json::json!({ "field": field, "message": message })
            }
        })
        .collect();
    let valid = validation.is_ok();

    let response = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "run_id": ctx.run_id,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "config_path": resolved.path,
        "source": resolved.source.to_string(),
        "valid": valid,
        "errors": errors,
        "warnings": validation.warnings,
    });

    let exit = if valid {
        ExitCode::Clean
    } else {
        ExitCode::ConfigError
    };

    let summary = || {
        if valid {
            format!("config ok ({} warnings)", validation.warnings.len())
        } else {
            format!("config invalid: {} errors", validation.errors.len())
        }
    };
    let markdown = || {
        let mut md = String::from("# Configuration check\n\n");
        md.push_str(&format!("- source: {}\n", resolved.source));
        if let Some(p) = &resolved.path {
            md.push_str(&format!("- path: `{}`\n", p.display()));
        }
        for e in &validation.errors {
            md.push_str(&format!("- error: {e}\n"));
        }
        for w in &validation.warnings {
            md.push_str(&format!("- warning: {}: {}\n", w.field, w.message));
        }
        md
    };

    match emit(global, ctx, &response, summary, markdown) {
        ExitCode::Clean => exit,
        failed => failed,
    }
}

fn run_schema(global: &GlobalOpts, ctx: &LogContext, args: &SchemaArgs) -> ExitCode {
    if args.list {
        for (name, description) in schema::available_schemas() {
            println!("{name:<16} {description}");
        }
        return ExitCode::Clean;
    }

    let name = args.type_name.as_deref().unwrap_or(schema::DEFAULT_SCHEMA);
    let Some(value) = schema::generate_schema(name) else {
        eprintln!("unknown schema type {name:?}; use --list to see available types");
        return ExitCode::ArgsError;
    };
    let written = write_payload(
        &mut std::io::stdout().lock(),
        OutputFormat::Json,
        &value,
        String::new,
        String::new,
    );
    match written {
        Ok(()) => ExitCode::Clean,
        Err(e) => output_error(global, ctx, &e),
    }
}

fn print_version(global: &GlobalOpts) {
    let version_info = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "xtprobe_version": env!("CARGO_PKG_VERSION"),
        "rust_version": env!("CARGO_PKG_RUST_VERSION"),
    });

    match global.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&version_info).unwrap_or_default()
            );
        }
        OutputFormat::Exitcode => {}
        _ => {
            println!("xtprobe {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {}", SCHEMA_VERSION);
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolve configuration, reporting failures on stderr.
fn load(
    global: &GlobalOpts,
    ctx: &LogContext,
    cli_backend: Option<BackendPreference>,
) -> Result<ResolvedConfig, ExitCode> {
    let options = ConfigOptions {
        config_path: global.config.clone(),
        cli_overrides: global.overrides.clone(),
        cli_backend,
    };

    match load_config(&options) {
        Ok(resolved) => {
            log_event!(
                ctx,
                DEBUG,
                event_names::CONFIG_LOADED,
                Stage::Init,
                "configuration resolved",
                source = %resolved.source,
                overrides = resolved.config.features.overrides.len()
            );
            Ok(resolved)
        }
        Err(e) => {
            log_event!(
                ctx,
                ERROR,
                event_names::CONFIG_ERROR,
                Stage::Init,
                "failed to load configuration",
                error = %e
            );
            Err(output_error(global, ctx, &e.into()))
        }
    }
}

fn output_error(global: &GlobalOpts, ctx: &LogContext, error: &xt_common::Error) -> ExitCode {
    let exit_code = ExitCode::for_error(error);
    if exit_code.is_internal_error() {
        log_event!(
            ctx,
            ERROR,
            event_names::INTERNAL_ERROR,
            Stage::Report,
            "internal error",
            error = %error,
            code = error.code()
        );
    }

    let response = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "run_id": ctx.run_id,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "status": "error",
        "exit_code": exit_code.code_name(),
        "error": error.to_structured(),
    });

    match global.format {
        OutputFormat::Json => {
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&response).unwrap_or_default()
            );
        }
        OutputFormat::Summary => {
            eprintln!("[{}] {}", ctx.run_id, error);
        }
        OutputFormat::Exitcode => {}
        OutputFormat::Md => {
            eprintln!("{}", error.format_human());
        }
    }

    exit_code
}

/// Print a payload on stdout in the requested format.
fn emit<T, S, M>(
    global: &GlobalOpts,
    ctx: &LogContext,
    payload: &T,
    summary: S,
    markdown: M,
) -> ExitCode
where
    T: Serialize,
    S: FnOnce() -> String,
    M: FnOnce() -> String,
{
    let written = write_payload(
        &mut std::io::stdout().lock(),
        global.format,
        payload,
        summary,
        markdown,
    );
    match written {
        Ok(()) => ExitCode::Clean,
        Err(e) => output_error(global, ctx, &e),
    }
}

fn write_payload<W, T, S, M>(
    out: &mut W,
    format: OutputFormat,
    payload: &T,
    summary: S,
    markdown: M,
) -> xt_common::Result<()>
where
    W: Write,
    T: Serialize,
    S: FnOnce() -> String,
    M: FnOnce() -> String,
{
    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(payload)?)?,
        OutputFormat::Summary => writeln!(out, "{}", summary())?,
        OutputFormat::Md => write!(out, "{}", markdown())?,
        OutputFormat::Exitcode => {}
    }
    out.flush()?;
    Ok(())
}
