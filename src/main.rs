//! Halldyll CLI entrypoint.
//!
//! This is the main entrypoint for the halldyll command-line tool.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use halldyll_stack::cli::{Cli, Commands, OutputFormatter, StateCommands};
use halldyll_stack::config::{
    find_config_file, ConfigParser, ConfigSource, ConfigValidator, ProviderKind, StackConfig,
    StateBackend,
};
use halldyll_stack::error::{HalldyllError, Result};
use halldyll_stack::graph::ResourceId;
use halldyll_stack::planner::Teardown;
use halldyll_stack::provider::{
    HttpProvider, LocalProvider, Provider, ProviderRouter, TimeoutProvider,
};
use halldyll_stack::reconciler::StackReconciler;
use halldyll_stack::stack::{kinds, StackInputs, K8S_PROVIDER_NAME};
use halldyll_stack::state::{LocalStateStore, StateStore};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Base delay between retries of the HTTP provider.
const HTTP_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence over the
/// verbosity flag.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Preview { detailed } => cmd_preview(config_path, detailed, &formatter).await,
        Commands::Up { yes } => cmd_up(config_path, yes, &formatter).await,
        Commands::Destroy { yes, targets } => {
            cmd_destroy(config_path, yes, &targets, &formatter).await
        }
        Commands::Kubeconfig => cmd_kubeconfig(config_path).await,
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Initialize a new stack directory.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new Halldyll stack in: {}", path.display());

    let config_path = path.join("halldyll.stack.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Stack file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/halldyll.stack.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    // Keep secrets and local state out of version control.
    let gitignore_content = ".env\n.halldyll/\n";
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(".halldyll") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Halldyll")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(".halldyll") {
                writeln!(file, ".halldyll/")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, gitignore_content)?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized successfully!");
    eprintln!("\nNext steps:");
    eprintln!("  1. Copy .env.example to .env and fill in the stack values");
    eprintln!("  2. Edit halldyll.stack.yaml");
    eprintln!("  3. Run 'halldyll preview' to see what will be created");
    eprintln!("  4. Run 'halldyll up' to deploy");
    Ok(())
}

/// Validate configuration and stack inputs.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating configuration: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&config)?;
    StackInputs::load(&ConfigSource::from_config(&config))?;

    emit(&formatter.format_validation(&config, &result, show_warnings))
}

/// Show what `up` would do.
async fn cmd_preview(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let loaded = load_stack(config_path)?;
    let source = ConfigSource::from_config(&loaded.config);
    let provider = create_provider(&loaded.config)?;
    let reconciler = StackReconciler::new(&loaded.config, &source, &loaded.state_store, provider);

    let plan = reconciler.preview().await?;
    emit(&formatter.format_plan(&plan, detailed))
}

/// Create or update the stack.
async fn cmd_up(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let loaded = load_stack(config_path)?;
    let source = ConfigSource::from_config(&loaded.config);
    let provider = create_provider(&loaded.config)?;
    let cancel = cancel_on_ctrl_c();
    let reconciler = StackReconciler::new(&loaded.config, &source, &loaded.state_store, provider)
        .with_cancellation(cancel);

    let plan = reconciler.preview().await?;
    if !plan.has_changes() {
        return emit(&formatter.format_plan(&plan, false));
    }

    if !auto_approve {
        eprintln!("{}", formatter.format_plan(&plan, false));
        if !confirm("Do you want to apply these changes? [y/N]: ", "y")? {
            eprintln!("Update cancelled.");
            return Ok(());
        }
    }

    let report = reconciler.up().await?;
    emit(&formatter.format_up(&report))?;
    report.into_result()?;
    Ok(())
}

/// Delete recorded resources.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    targets: &[String],
    formatter: &OutputFormatter,
) -> Result<()> {
    let loaded = load_stack(config_path)?;
    let source = ConfigSource::from_config(&loaded.config);
    let provider = create_provider(&loaded.config)?;
    let reconciler = StackReconciler::new(&loaded.config, &source, &loaded.state_store, provider)
        .with_cancellation(cancel_on_ctrl_c());

    let targets = parse_targets(targets)?;
    let state = reconciler.load_state().await?;
    if state.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }

    let doomed = targets
        .as_ref()
        .map(|t| Teardown::with_dependents(&state, t));
    eprintln!("The following resources will be destroyed:");
    for record in state.resources.values() {
        if doomed.as_ref().is_none_or(|t| t.contains(&record.id)) {
            let dependent = targets.as_ref().is_some_and(|t| !t.contains(&record.id));
            let note = if dependent { " (depends on a target)" } else { "" };
            eprintln!("  - {}{note}", record.id);
        }
    }

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let report = reconciler.destroy(targets.as_ref()).await?;
    emit(&formatter.format_destroy(&report))?;
    report.into_result()?;
    Ok(())
}

/// Print the recorded kubeconfig.
async fn cmd_kubeconfig(config_path: Option<&PathBuf>) -> Result<()> {
    let loaded = load_stack(config_path)?;
    let state = loaded
        .state_store
        .load()
        .await?
        .ok_or_else(|| HalldyllError::internal("Stack has not been deployed"))?;

    let id = ResourceId::new(kinds::KUBERNETES_PROVIDER, K8S_PROVIDER_NAME);
    let kubeconfig = state
        .get(&id)
        .and_then(|record| record.outputs.get("kubeconfig"))
        .and_then(|value| value.as_str())
        .ok_or_else(|| HalldyllError::internal(format!("No kubeconfig recorded for {id}")))?;

    emit(kubeconfig.trim_end())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let loaded = load_stack(config_path)?;
    let state_store = &loaded.state_store;

    match command {
        StateCommands::Show { show_secrets } => {
            if let Some(state) = state_store.load().await? {
                emit(&formatter.format_state(&state, show_secrets))?;
            } else {
                eprintln!("No state found.");
            }
        }
        StateCommands::Lock { holder } => {
            let lock = state_store
                .acquire_lock(holder.as_deref().unwrap_or(""), "manual")
                .await?;
            emit(&formatter.format_lock(&lock))?;
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match state_store.force_unlock().await? {
                    Some(lock) => {
                        warn!("Removed lock held by {}", lock.holder);
                        emit(&formatter.message(true, "State forcefully unlocked."))?;
                    }
                    None => eprintln!("State is not locked."),
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                emit(&formatter.message(true, "State unlocked."))?;
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// A parsed stack file with its state store.
struct LoadedStack {
    config: StackConfig,
    state_store: LocalStateStore,
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Directory of the stack file.
fn base_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Loads and validates configuration and opens the state store.
fn load_stack(config_path: Option<&PathBuf>) -> Result<LoadedStack> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let base = base_dir(&config_file);
    let parser = ConfigParser::new().with_base_path(base);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    let state_store = match config.state.backend {
        StateBackend::Local => LocalStateStore::with_state_path(base.join(config.state_path())),
    };
    debug!("Using {} state at {}", state_store.backend_type(), state_store.state_path().display());

    Ok(LoadedStack {
        config,
        state_store,
    })
}

/// Builds the provider chain configured for the stack.
///
/// Random values are always generated locally; everything else goes to the
/// configured backend. Every call is bounded by the configured timeout.
fn create_provider(config: &StackConfig) -> Result<Arc<dyn Provider>> {
    let local: Arc<dyn Provider> = Arc::new(LocalProvider::new(
        config.project.name.as_str(),
        config.project.region.as_str(),
    ));

    let router = match config.provider.kind {
        ProviderKind::Local => ProviderRouter::new().fallback(local),
        ProviderKind::Http => {
            let endpoint = config.provider.endpoint.as_deref().ok_or_else(|| {
                HalldyllError::internal("provider.endpoint is required for the http provider")
            })?;
            let api_key = ConfigParser::provider_api_key(config).ok();
            if api_key.is_none() {
                warn!(
                    "{} is not set; calling the provider without credentials",
                    config.provider.api_key_env
                );
            }
            let http = HttpProvider::with_timeout(endpoint, api_key, config.provider.timeout_secs)?
                .with_retries(config.provider.max_retries, HTTP_RETRY_DELAY);
            ProviderRouter::new()
                .route("random", local)
                .fallback(Arc::new(http))
        }
    };

    Ok(Arc::new(TimeoutProvider::new(
        router,
        Duration::from_secs(config.provider.timeout_secs),
    )))
}

/// Parses `--target` identities.
fn parse_targets(targets: &[String]) -> Result<Option<BTreeSet<ResourceId>>> {
    if targets.is_empty() {
        return Ok(None);
    }
    targets
        .iter()
        .map(|t| {
            ResourceId::parse(t).ok_or_else(|| {
                HalldyllError::internal(format!("Invalid target '{t}': expected type::name"))
            })
        })
        .collect::<Result<BTreeSet<_>>>()
        .map(Some)
}

/// Cancels the returned token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; waiting for in-flight calls to finish");
            cancel.cancel();
        }
    });
    token
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    stdout.flush()?;
    Ok(())
}
