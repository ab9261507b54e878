use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use wikimirror_core::client::WikidotClient;
use wikimirror_core::config::{MirrorConfig, load_config, read_override_list};
use wikimirror_core::runtime::{
    MirrorSettings, PathOverrides, ResolutionContext, ResolvedPaths, SettingsOverrides,
    load_api_key, resolve_paths, resolve_settings,
};
use wikimirror_core::sync::{SyncReport, fetch_override, mirror_site};

#[derive(Debug, Parser)]
#[command(
    name = "wikimirror",
    version,
    about = "Incremental local mirror of a Wikidot site"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "NAME", help = "Wikidot site to mirror")]
    site: Option<String>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    site: Option<String>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            site: cli.site.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Bring the local mirror up to date")]
    Sync(SyncArgs),
    #[command(about = "Download the named pages unconditionally")]
    Fetch(FetchArgs),
    #[command(about = "Show resolved settings and local mirror statistics")]
    Status(StatusArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(
        long,
        value_name = "N",
        help = "Stop after more than N consecutive up-to-date pages (0 = never)"
    )]
    stop_after: Option<usize>,
    #[arg(long = "override", value_name = "PATH", help = "Override list file")]
    override_file: Option<PathBuf>,
    #[arg(long, help = "Run a normal sync even if the override list exists")]
    ignore_override: bool,
    #[arg(long, help = "Print the sync report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct FetchArgs {
    #[arg(required = true, value_name = "PAGE")]
    pages: Vec<String>,
    #[arg(long, help = "Print the sync report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(long, help = "Print status as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Sync(args)) => run_sync(&runtime, args),
        Some(Commands::Fetch(args)) => run_fetch(&runtime, args),
        Some(Commands::Status(args)) => run_status(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn run_sync(runtime: &RuntimeOptions, args: SyncArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let settings = resolve_settings(
        &paths,
        &config,
        &SettingsOverrides {
            site: runtime.site.clone(),
            stopping_threshold: args.stop_after,
            override_file: args.override_file.clone(),
        },
    )?;
    print_diagnostics(runtime, &paths, &settings);

    let override_pages = if !args.ignore_override && settings.override_path.exists() {
        log::info!(
            "Override list found at {}",
            normalize_path(&settings.override_path)
        );
        Some(read_override_list(&settings.override_path)?)
    } else {
        None
    };

    let mut client = open_client(&settings)?;
    let report = mirror_site(
        &mut client,
        &settings.layout(),
        &settings.sync_options(),
        override_pages.as_deref(),
    )?;
    print_report(&settings, &report, args.json)
}

fn run_fetch(runtime: &RuntimeOptions, args: FetchArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let settings = resolve_settings(
        &paths,
        &config,
        &SettingsOverrides {
            site: runtime.site.clone(),
            ..SettingsOverrides::default()
        },
    )?;
    print_diagnostics(runtime, &paths, &settings);

    let layout = settings.layout();
    layout.ensure_root()?;
    let mut client = open_client(&settings)?;
    let report = fetch_override(&mut client, &layout, &settings.sync_options(), &args.pages)?;
    print_report(&settings, &report, args.json)
}

fn run_status(runtime: &RuntimeOptions, args: StatusArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let settings = status_settings(runtime, &paths, &config);

    let stats = match &settings {
        Ok(settings) => Some(settings.layout().scan_stats()?),
        Err(_) => None,
    };

    if args.json {
        let value = serde_json::json!({
            "project_root": normalize_path(&paths.project_root),
            "config_path": normalize_path(&paths.config_path),
            "config_exists": paths.config_path.exists(),
            "settings": settings.as_ref().ok(),
            "settings_error": settings.as_ref().err().map(|error| format!("{error:#}")),
            "mirror": stats,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("mirror status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("config_exists: {}", format_flag(paths.config_path.exists()));
    match &settings {
        Ok(settings) => {
            println!("site: {}", settings.site);
            println!("mirror_root: {}", normalize_path(&settings.mirror_root));
            println!(
                "mirror_exists: {}",
                format_flag(settings.mirror_root.exists())
            );
            println!(
                "override_pending: {}",
                format_flag(settings.override_path.exists())
            );
            println!(
                "api_key_file_exists: {}",
                format_flag(settings.api_key_path.exists())
            );
        }
        Err(error) => {
            println!("site: <unresolved>");
            println!("warnings:");
            println!("  - {error:#}");
        }
    }
    if let Some(stats) = stats {
        println!("pages: {}", stats.pages);
        println!("html_documents: {}", stats.html_documents);
        println!("metadata_documents: {}", stats.metadata_documents);
        println!("attachment_dirs: {}", stats.attachment_dirs);
        println!("attachment_files: {}", stats.attachment_files);
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
        if let Ok(settings) = &settings {
            println!("{}", settings.diagnostics());
        }
    }
    Ok(())
}

fn status_settings(
    runtime: &RuntimeOptions,
    paths: &ResolvedPaths,
    config: &MirrorConfig,
) -> Result<MirrorSettings> {
    resolve_settings(
        paths,
        config,
        &SettingsOverrides {
            site: runtime.site.clone(),
            ..SettingsOverrides::default()
        },
    )
}

fn open_client(settings: &MirrorSettings) -> Result<WikidotClient> {
    let api_key = load_api_key(settings)?;
    WikidotClient::new(settings.client_config(api_key))
        .with_context(|| format!("failed to open Wikidot client for {}", settings.site))
}

fn print_report(settings: &MirrorSettings, report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("mirror sync");
    println!("site: {}", settings.site);
    println!("mirror_root: {}", normalize_path(&settings.mirror_root));
    println!("mode: {:?}", report.mode);
    println!("remote_pages: {}", report.remote_pages);
    println!("local_pages: {}", report.local_pages);
    println!("downloaded: {}", report.downloaded);
    println!("up_to_date: {}", report.up_to_date);
    println!("stopped_early: {}", format_flag(report.stopped_early));
    println!(
        "missing: {} ({} downloaded)",
        report.missing.len(),
        report.missing_downloaded
    );
    println!("deleted: {}", report.deleted.len());
    println!("attachments_saved: {}", report.attachments_saved);
    println!("requests: {}", report.request_count);
    if !report.failures.is_empty() || !report.attachment_failures.is_empty() {
        println!("warnings:");
        for failure in report.failures.iter().chain(&report.attachment_failures) {
            println!("  - {failure}");
        }
    }
    Ok(())
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths, settings: &MirrorSettings) {
    if runtime.diagnostics {
        println!("[diagnostics]\n{}\n{}\n", paths.diagnostics(), settings.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    load_project_env(&initial.project_root.join(".env"))?;

    resolve_paths(&context, &overrides)
}

fn load_project_env(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    dotenvy::from_path_override(path)
        .with_context(|| format!("failed to load {}", normalize_path(path)))
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
