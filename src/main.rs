use clap::Parser;
use log::LevelFilter;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use policy_risk_lib::{
    AnalysisPipeline, DocumentInput, PipelineConfig, RunRegistry, StageProgress, UserProfile,
    PIPELINE_CONFIG,
};

/// Analyze an insurance policy and print the risk report as JSON.
#[derive(Debug, clap::Parser)]
#[clap(about, version)]
struct Args {
    /// Policy declarations document (plain text is read directly).
    #[arg(short = 'd', long = "document")]
    document: Option<PathBuf>,

    /// JSON object of manually entered policy fields.
    #[arg(short = 'f', long = "fields")]
    fields: Option<PathBuf>,

    /// JSON user profile (income, assets, emergency fund, claims).
    #[arg(short = 'p', long = "profile")]
    profile: Option<PathBuf>,

    /// Pipeline configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Print stage progress to stderr.
    #[arg(long = "progress")]
    progress: bool,

    /// More logging; repeat for more.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "text/plain",
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| format!("{}: {}", path.display(), e))
}

async fn run(args: Args) -> Result<bool, String> {
    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => PIPELINE_CONFIG.clone(),
    };
    let registry = RunRegistry::new(config.max_concurrent_runs);
    let pipeline = AnalysisPipeline::new(config)
        .map_err(|e| e.to_string())?
        .with_registry(registry);

    let document = match &args.document {
        Some(path) => {
            let bytes = fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
            let mut input = DocumentInput::new(bytes, mime_for(path));
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                input = input.with_file_name(name);
            }
            Some(input)
        }
        None => None,
    };
    let fields: Option<BTreeMap<String, String>> =
        args.fields.as_deref().map(read_json).transpose()?;
    let profile: Option<UserProfile> = args.profile.as_deref().map(read_json).transpose()?;

    let report = |event: &StageProgress| {
        eprintln!(
            "[{:>5.1}%] {:<20} {}",
            event.overall_percent, event.stage, event.message
        );
    };
    let observer: Option<&(dyn Fn(&StageProgress) + Send + Sync)> =
        if args.progress { Some(&report) } else { None };

    let outcome = pipeline.run(document, fields, profile, observer).await;
    let rendered = serde_json::to_string_pretty(&outcome).map_err(|e| e.to_string())?;
    println!("{}", rendered);
    Ok(outcome.success)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(level_for(args.verbose))
        .init();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(message) => {
            log::error!("{}", message);
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}
