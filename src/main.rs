use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{miette, Result};
use routegate::rbac::{RbacService, SnapshotCache};
use routegate::{seed, settings, storage, web};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "routegate",
    version,
    about = "Role-based access control for HTTP routes"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the admin API (default)
    Serve,
    /// Apply a seed file of roles and permissions
    Seed {
        /// Falls back to `rbac.seed_file` from the configuration
        file: Option<PathBuf>,
    },
    /// Print every registered route
    Routes,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Routes => {
            // Malformed routes fail here, before anything listens
            let app = web::admin_routes()?;
            for def in app.registry().routes() {
                println!(
                    "{:<8} {:<7} {:<32} {}",
                    def.module,
                    def.method.to_string().to_uppercase(),
                    def.path,
                    def.description.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Command::Seed { file } => {
            let settings = settings::Settings::load(&cli.config)?;
            let path = file
                .or(settings.rbac.seed_file.clone())
                .ok_or_else(|| miette!("no seed file given and rbac.seed_file is not set"))?;

            let db = storage::init(&settings.database).await?;
            let cache = Arc::new(SnapshotCache::load(&db).await?);
            let service = RbacService::new(db, cache);

            let file = seed::SeedFile::load(&path)?;
            let report = seed::apply(&service, &file).await?;
            tracing::info!(
                path = %path.display(),
                roles = report.roles_created,
                permissions = report.permissions_created,
                "Seeding complete"
            );
            Ok(())
        }
        Command::Serve => {
            let settings = settings::Settings::load(&cli.config)?;
            tracing::info!(?settings, "Loaded configuration");

            let db = storage::init(&settings.database).await?;
            web::serve(settings, db).await
        }
    }
}
