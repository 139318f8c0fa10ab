use anyhow::Context;
use careflow_core::{config::resolve_registry, AuthorizationEngine, Principal};
use careflow_registry::{Permission, PermissionRegistry, Role};
use careflow_types::UserId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "careflow")]
#[command(about = "Careflow permission registry tooling")]
struct Cli {
    /// Registry file to use instead of the built-in catalogue (overrides CAREFLOW_REGISTRY)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List roles and their descriptions
    Roles,
    /// List permissions, optionally only those granted to a role
    Permissions {
        /// Role name, e.g. `doctor`
        #[arg(long)]
        role: Option<String>,
    },
    /// Check whether a role is granted a permission
    Check {
        /// Role name
        role: String,
        /// Permission name
        permission: String,
        /// Permissions revoked for this user (comma-separated)
        #[arg(long, value_delimiter = ',')]
        disabled: Vec<String>,
    },
    /// Validate a registry file without using it
    Validate {
        /// Path to the YAML file
        path: PathBuf,
    },
    /// Print the active registry as YAML
    Export,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("careflow=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let override_path = cli
        .registry
        .or_else(|| std::env::var_os("CAREFLOW_REGISTRY").map(PathBuf::from));

    match cli.command {
        Some(Commands::Roles) => {
            let registry = resolve_registry(override_path)?;
            for def in registry.roles() {
                println!("{:<16} {}", def.role.as_str(), def.description.as_str());
            }
        }
        Some(Commands::Permissions { role }) => {
            let registry = resolve_registry(override_path)?;
            match role {
                Some(name) => {
                    let role = Role::parse(&name)?;
                    for name in registry.permission_names_of(role) {
                        println!("{name}");
                    }
                }
                None => {
                    for info in registry.permissions() {
                        println!(
                            "{:<32} {:<14} {}",
                            info.permission.as_str(),
                            info.category.as_str(),
                            info.description.as_str()
                        );
                    }
                }
            }
        }
        Some(Commands::Check {
            role,
            permission,
            disabled,
        }) => {
            let registry = resolve_registry(override_path)?;
            let role = Role::parse(&role)?;
            let permission = Permission::parse(&permission)?;
            let disabled = disabled
                .iter()
                .map(|name| Permission::parse(name.trim()))
                .collect::<Result<Vec<_>, _>>()?;

            let engine = AuthorizationEngine::new(Arc::new(registry));
            let principal = Principal::new(UserId::new(), role).with_disabled(disabled);
            let verdict = match engine.require_permission(&principal, permission) {
                Ok(()) => "granted".to_string(),
                Err(e) => format!("denied ({e})"),
            };
            println!("{role} {permission}: {verdict}");
        }
        Some(Commands::Validate { path }) => {
            let registry = PermissionRegistry::from_path(&path)
                .with_context(|| format!("registry {} is invalid", path.display()))?;
            println!(
                "{}: version {}, {} permissions, {} roles",
                path.display(),
                registry.version(),
                registry.permissions().count(),
                registry.roles().count()
            );
        }
        Some(Commands::Export) => {
            let registry = resolve_registry(override_path)?;
            print!("{}", registry.render()?);
        }
        None => {
            println!("Use 'careflow --help' for commands");
        }
    }

    Ok(())
}
