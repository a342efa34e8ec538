//! Chronicle CLI - sync and file migration for a Chronicle journal.

mod cli;
mod credentials;
mod error;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chronicle_core::credentials::CredentialStore;
use chronicle_core::db::{Database, SyncConfigStore};
use chronicle_core::models::SyncConfig;
use chronicle_core::sync::WebDavTransportFactory;
use chronicle_core::{
    FileMigrator, MigrationProgressCallback, OperationLocks, StatusCallback, SyncService,
    SyncStores,
};

use crate::cli::{Cli, Commands, ConfigCommands, MigrateCommands};
use crate::credentials::KeyringCredentialStore;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

struct App {
    service: Arc<SyncService>,
    migrator: Arc<FileMigrator>,
    credentials: Arc<dyn CredentialStore>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chronicle")
}

fn open_app(db_path: Option<PathBuf>, file_root: Option<PathBuf>) -> Result<App, CliError> {
    let db_path = db_path.unwrap_or_else(|| default_data_dir().join("chronicle.db"));
    let file_root = file_root.unwrap_or_else(|| default_data_dir().join("files"));
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&file_root)?;

    tracing::debug!(db = %db_path.display(), files = %file_root.display(), "opening local store");
    let db = Arc::new(Database::open(&db_path)?);
    let locks = Arc::new(OperationLocks::new());
    let credentials: Arc<dyn CredentialStore> = Arc::new(KeyringCredentialStore::new());
    let stores = SyncStores::sqlite(&db);
    let attachments = Arc::clone(&stores.attachments);

    let service = Arc::new(SyncService::new(
        stores,
        Arc::clone(&credentials),
        Arc::new(WebDavTransportFactory::default()),
        Arc::clone(&locks),
        file_root.clone(),
    ));
    let migrator = Arc::new(FileMigrator::new(attachments, locks, file_root));

    Ok(App {
        service,
        migrator,
        credentials,
    })
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let app = open_app(cli.db_path, cli.file_root)?;
    match cli.command {
        Commands::Config { command } => run_config(&app, command),
        Commands::Sync { config } => run_sync(&app, config).await,
        Commands::TestConnection { id } => run_test_connection(&app, &id).await,
        Commands::Status { json } => run_status(&app, json),
        Commands::Migrate { command } => run_migrate(&app, command).await,
    }
}

/// Resolve a config ID or unique ID prefix against the store.
fn resolve_config(
    configs: &Arc<dyn SyncConfigStore>,
    id_or_prefix: &str,
) -> Result<SyncConfig, CliError> {
    let needle = id_or_prefix.trim();
    if needle.is_empty() {
        return Err(CliError::ConfigNotFound(id_or_prefix.to_string()));
    }
    let matches: Vec<SyncConfig> = configs
        .list()?
        .into_iter()
        .filter(|config| config.id.as_str().starts_with(needle))
        .collect();
    match matches.len() {
        0 => Err(CliError::ConfigNotFound(needle.to_string())),
        1 => Ok(matches.into_iter().next().ok_or_else(|| {
            CliError::ConfigNotFound(needle.to_string())
        })?),
        n => Err(CliError::AmbiguousConfigId(format!(
            "Prefix '{needle}' matches {n} configs; use more characters"
        ))),
    }
}

fn run_config(app: &App, command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Add {
            server,
            user,
            name,
            password,
            no_attachments,
        } => {
            let secret = password
                .or_else(|| std::env::var("CHRONICLE_PASSWORD").ok())
                .filter(|secret| !secret.trim().is_empty())
                .ok_or(CliError::MissingCredential)?;
            let display_name = name.unwrap_or_else(|| display_name_for(&server));
            let mut config = SyncConfig::new(server, user, display_name)?;
            config.sync_attachments = !no_attachments;
            app.service.add_config(&config, &secret)?;
            println!("Added sync config {} ({})", config.id, config.display_name);
            Ok(())
        }
        ConfigCommands::List { json } => {
            let configs = app.service.configs().list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&configs)?);
                return Ok(());
            }
            if configs.is_empty() {
                println!("No sync configurations.");
                return Ok(());
            }
            for config in configs {
                println!(
                    "{}  {}  {}  {}  last sync: {}",
                    config.id,
                    config.display_name,
                    config.server_url,
                    if config.enabled { "enabled" } else { "disabled" },
                    config
                        .last_sync_at
                        .map_or_else(|| "never".to_string(), format_timestamp),
                );
            }
            Ok(())
        }
        ConfigCommands::Remove { id } => {
            let config = resolve_config(app.service.configs(), &id)?;
            app.service.delete_config(&config.id)?;
            println!("Removed sync config {}", config.id);
            Ok(())
        }
        ConfigCommands::Enable { id } => set_enabled(app, &id, true),
        ConfigCommands::Disable { id } => set_enabled(app, &id, false),
        ConfigCommands::Reset { id } => {
            let config = resolve_config(app.service.configs(), &id)?;
            app.service.clear_local_manifest(&config.id)?;
            println!("Cleared manifest for {}; next sync re-diffs everything", config.id);
            Ok(())
        }
    }
}

fn set_enabled(app: &App, id: &str, enabled: bool) -> Result<(), CliError> {
    let mut config = resolve_config(app.service.configs(), id)?;
    config.enabled = enabled;
    config.updated_at = chrono::Utc::now().timestamp_millis();
    app.service.configs().update(&config)?;
    println!(
        "{} sync config {}",
        if enabled { "Enabled" } else { "Disabled" },
        config.id
    );
    Ok(())
}

async fn run_sync(app: &App, config: Option<String>) -> Result<(), CliError> {
    let targets: Vec<SyncConfig> = match config {
        Some(id) => vec![resolve_config(app.service.configs(), &id)?],
        None => app.service.configs().list_enabled()?,
    };
    if targets.is_empty() {
        return Err(CliError::NoConfigs);
    }

    for config in targets {
        println!("Syncing {} ({})", config.display_name, config.server_url);
        let status = app
            .service
            .perform_sync(config.id, Some(print_status_updates()))
            .await?;
        match status.error_message {
            Some(errors) => println!("  {}: {} [{}]", status.state, status.message, errors),
            None => println!("  {}: {}", status.state, status.message),
        }
    }
    Ok(())
}

fn print_status_updates() -> StatusCallback {
    let last = Mutex::new(String::new());
    Box::new(move |status| {
        let line = format!("{}: {}", status.state, status.message);
        if let Ok(mut last) = last.lock() {
            if *last != line {
                println!("  {line}");
                *last = line;
            }
        }
    })
}

async fn run_test_connection(app: &App, id: &str) -> Result<(), CliError> {
    let config = resolve_config(app.service.configs(), id)?;
    let Some(credential) = app.credentials.get(&config.id)? else {
        println!("No credential stored for {}", config.id);
        std::process::exit(1);
    };
    if app.service.test_connection(&config, &credential).await {
        println!("Connection OK: {}", config.server_url);
        Ok(())
    } else {
        println!("Connection FAILED: {}", config.server_url);
        std::process::exit(1);
    }
}

fn run_status(app: &App, json: bool) -> Result<(), CliError> {
    let configs = app.service.configs().list()?;
    if json {
        let statuses = configs
            .iter()
            .map(|config| app.service.status(&config.id))
            .collect::<chronicle_core::Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }
    if configs.is_empty() {
        println!("No sync configurations.");
        return Ok(());
    }
    for config in configs {
        let status = app.service.status(&config.id)?;
        println!(
            "{}  {}  {}  {}",
            config.id,
            config.display_name,
            status.state,
            status.error_message.as_deref().unwrap_or(&status.message),
        );
    }
    Ok(())
}

async fn run_migrate(app: &App, command: MigrateCommands) -> Result<(), CliError> {
    match command {
        MigrateCommands::Run { dry_run } => {
            let on_progress: MigrationProgressCallback =
                Box::new(|current, total, status| println!("[{current}/{total}] {status}"));
            let result = app
                .migrator
                .migrate_all_files(Some(on_progress), dry_run)
                .await?;
            println!(
                "{}: {} migrated, {} already modern, {} failed ({:.0}% success) in {} ms",
                if dry_run { "Dry run" } else { "Migration" },
                result.migrated,
                result.already_modern,
                result.failed,
                result.success_rate() * 100.0,
                result.duration_ms,
            );
            for failure in &result.errors {
                println!("  failed {}: {}", failure.attachment_id, failure.reason);
            }
            Ok(())
        }
        MigrateCommands::Count => {
            let count = app.migrator.migration_count()?;
            println!("{count} attachments on legacy paths");
            Ok(())
        }
        MigrateCommands::Validate { json } => {
            let report = app.migrator.validate_migration().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!(
                "{} of {} attachment files accessible ({:.0}%)",
                report.accessible,
                report.total,
                report.success_rate() * 100.0,
            );
            for (id, path) in &report.inaccessible_files {
                println!("  inaccessible {id}: {path}");
            }
            Ok(())
        }
    }
}

fn display_name_for(server: &str) -> String {
    server
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or(server)
        .to_string()
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map_or_else(|| millis.to_string(), |dt| dt.format("%Y-%m-%d %H:%M").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::db::SqliteSyncConfigStore;
    use pretty_assertions::assert_eq;

    fn store_with(configs: &[SyncConfig]) -> Arc<dyn SyncConfigStore> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = SqliteSyncConfigStore::new(db);
        for config in configs {
            store.create(config).unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn test_resolve_config_by_prefix() {
        let config = SyncConfig::new("https://dav.example.com", "anna", "Home").unwrap();
        let store = store_with(&[config.clone()]);

        let resolved = resolve_config(&store, &config.id.as_str()[..8]).unwrap();
        assert_eq!(resolved.id, config.id);

        assert!(matches!(
            resolve_config(&store, "zzzzzzzz"),
            Err(CliError::ConfigNotFound(_))
        ));
        assert!(matches!(
            resolve_config(&store, ""),
            Err(CliError::ConfigNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_config_rejects_ambiguous_prefix() {
        let one = SyncConfig::new("https://dav.example.com", "anna", "One").unwrap();
        let two = SyncConfig::new("https://dav.example.com", "anna", "Two").unwrap();
        let store = store_with(&[one.clone(), two.clone()]);

        // UUID v7 ids created in the same process share a timestamp prefix
        let shared: String = one
            .id
            .as_str()
            .chars()
            .zip(two.id.as_str().chars())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a)
            .collect();
        if !shared.is_empty() {
            assert!(matches!(
                resolve_config(&store, &shared),
                Err(CliError::AmbiguousConfigId(_))
            ));
        }
    }

    #[test]
    fn test_display_name_for_server() {
        assert_eq!(
            display_name_for("https://dav.example.com/remote.php/dav"),
            "dav.example.com"
        );
        assert_eq!(display_name_for("http://localhost:8080"), "localhost:8080");
    }
}
