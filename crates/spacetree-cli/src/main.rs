//! The `spacetree` command line tool.
//!
//! It provisions the topology described in a description file, registers
//! the device identities of that topology, and removes both again.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use spacetree::description::EndpointConnection;
use spacetree::users::UserObjectIds;

use spacetree_provisioner::client::TopologyClient;
use spacetree_provisioner::config::ProvisionerConfig;
use spacetree_provisioner::loader::{Definition, load};
use spacetree_provisioner::output::{export_artifact_path, write_json};
use spacetree_provisioner::provisioner::Provisioner;
use spacetree_provisioner::registrar::{Registrar, registry_device_ids};
use spacetree_provisioner::registry_client::HttpDeviceRegistry;
use spacetree_provisioner::removal::{DeletionWait, Remover};

use tokio_util::sync::CancellationToken;

use tracing::{Level, error, info, warn};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Provisioner(#[from] spacetree_provisioner::error::Error),
    #[error("No space named `{0}` in the description")]
    SubTenant(String),
    #[error("Failed to read the user object identifiers from `{}`: {source}", path.display())]
    UsersFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed user object identifiers in `{}`: {source}", path.display())]
    UsersFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Parser)]
#[command(name = "spacetree")]
#[command(version)]
#[command(about = "Provisions facility topologies from declarative descriptions")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Prints debug messages
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Creates the spaces, devices, and resources of a description
    Provision(ProvisionArgs),
    /// Removes the topology of a description
    Remove(RemoveArgs),
    /// Registers or removes the device identities of a description
    Devices(DevicesArgs),
}

#[derive(Args)]
struct DescriptionArgs {
    /// Description file, in YAML or JSON
    #[arg(long, short = 'f')]
    file: PathBuf,

    /// Restricts the run to the subtree rooted at the first space with this
    /// name
    #[arg(long)]
    sub_tenant: Option<String>,
}

#[derive(Args)]
struct ManagementArgs {
    /// Address of the management API, for example
    /// https://{name}.{location}.example.net/management/api/v1.0
    #[arg(long, env = "SPACETREE_ENDPOINT")]
    endpoint: String,

    /// Bearer token for the management API
    #[arg(long, env = "SPACETREE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,
}

#[derive(Args)]
struct ProvisionArgs {
    #[command(flatten)]
    description: DescriptionArgs,

    #[command(flatten)]
    management: ManagementArgs,

    /// Directory tenant of the users
    #[arg(long, short = 't', env = "SPACETREE_TENANT")]
    tenant: Option<String>,

    /// JSON file mapping user names to directory object identifiers
    #[arg(long)]
    users_file: Option<PathBuf>,

    /// Primary connection string of the created endpoints
    #[arg(long, env = "SPACETREE_ENDPOINT_CONNECTION_STRING", hide_env_values = true)]
    endpoint_connection_string: Option<String>,

    /// Secondary connection string of the created endpoints
    #[arg(
        long,
        env = "SPACETREE_ENDPOINT_SECONDARY_CONNECTION_STRING",
        hide_env_values = true
    )]
    endpoint_secondary_connection_string: Option<String>,

    /// Path of the created endpoints
    #[arg(long)]
    endpoint_path: Option<String>,

    /// Provisions sibling spaces concurrently
    #[arg(long)]
    parallel: bool,

    /// File receiving the devices grouped by device-id prefix
    #[arg(long, short = 'o', default_value = "provisioning-output.json")]
    output: PathBuf,
}

#[derive(Args)]
struct RemoveArgs {
    #[command(flatten)]
    description: DescriptionArgs,

    #[command(flatten)]
    management: ManagementArgs,

    /// Also removes every endpoint
    #[arg(long)]
    remove_endpoints: bool,
}

#[derive(Args)]
struct DevicesArgs {
    #[command(flatten)]
    description: DescriptionArgs,

    /// Host name of the device registry
    #[arg(long, env = "SPACETREE_REGISTRY_HOST")]
    registry_host: String,

    /// Shared access signature for the device registry
    #[arg(long, env = "SPACETREE_REGISTRY_TOKEN", hide_env_values = true)]
    registry_token: String,

    /// Blob container address, with its signature, receiving the exports
    #[arg(long, env = "SPACETREE_EXPORT_CONTAINER", hide_env_values = true)]
    export_container: String,

    /// Registers every device instead of one identity per device-id prefix
    #[arg(long)]
    all_devices: bool,

    /// Removes the identities instead of registering them
    #[arg(long)]
    remove_devices: bool,

    /// File receiving the device connection strings
    #[arg(long, short = 'o', default_value = "iot-device-connectionstring.json")]
    output: PathBuf,
}

fn load_description(
    args: &DescriptionArgs,
    config: &ProvisionerConfig,
) -> Result<Definition, CliError> {
    let mut definition = load(&args.file, config)?;

    if let Some(name) = &args.sub_tenant {
        if !definition.description.retain_sub_tenant(name) {
            return Err(CliError::SubTenant(name.clone()));
        }
        info!(
            "Restricted the description to `{name}`: {} spaces",
            definition.description.space_count()
        );
    }

    Ok(definition)
}

async fn read_users(path: &Path) -> Result<UserObjectIds, CliError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CliError::UsersFile {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&contents).map_err(|source| CliError::UsersFormat {
        path: path.to_path_buf(),
        source,
    })
}

async fn provision(args: ProvisionArgs) -> Result<(), CliError> {
    let connection = EndpointConnection {
        connection_string: args.endpoint_connection_string.unwrap_or_default(),
        secondary_connection_string: args.endpoint_secondary_connection_string.unwrap_or_default(),
        path: args.endpoint_path.unwrap_or_default(),
    };
    let config = ProvisionerConfig::new()
        .parallel(args.parallel)
        .endpoint_connection(connection);

    let Definition {
        mut description,
        directory,
    } = load_description(&args.description, &config)?;

    let users = match &args.users_file {
        Some(path) => read_users(path).await?,
        None => UserObjectIds::new(),
    };
    if users.is_empty() {
        warn!("No user object identifiers given");
    } else {
        info!("Read {} user object identifiers", users.len());
    }

    let client = TopologyClient::new(&args.management.endpoint, args.management.access_token)?;
    let mut provisioner = Provisioner::new(&client, &config)
        .directory(directory)
        .users(users);
    if let Some(tenant) = args.tenant {
        provisioner = provisioner.tenant_id(tenant);
    }

    let report = provisioner.run(&mut description).await?;
    info!(
        "Created {} spaces, {} keystores, and {} devices",
        report.created_spaces, report.created_keystores, report.created_devices
    );
    for (root, id) in description.spaces.iter().zip(&report.roots) {
        if id.is_none() {
            warn!("Space `{}` was not provisioned", root.name);
        }
    }

    write_json(&args.output, &description.devices_by_prefix()).await?;
    Ok(())
}

async fn remove(args: RemoveArgs) -> Result<(), CliError> {
    let config = ProvisionerConfig::new();
    let definition = load_description(&args.description, &config)?;
    let client = TopologyClient::new(&args.management.endpoint, args.management.access_token)?;

    let token = CancellationToken::new();
    let interrupt = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, no longer waiting for deletions");
                token.cancel();
            }
        })
    };

    let report = Remover::new(&client, &config)
        .cancellation(token)
        .endpoints(args.remove_endpoints)
        .run(&definition.description)
        .await;
    interrupt.abort();

    info!(
        "Removed {} devices, {} resources, {} spaces, and {} endpoints",
        report.removed_devices,
        report.removed_resources,
        report.removed_spaces.len(),
        report.removed_endpoints
    );
    if report.deletion_wait != DeletionWait::Confirmed {
        warn!("Some resources may still be deleting");
    }
    Ok(())
}

async fn devices(args: DevicesArgs) -> Result<(), CliError> {
    let config = ProvisionerConfig::new();
    let definition = load_description(&args.description, &config)?;
    let ids = registry_device_ids(&definition.description, args.all_devices);

    let registry = HttpDeviceRegistry::new(
        args.registry_host,
        args.registry_token,
        &args.export_container,
    )?;
    let registrar = Registrar::new(&registry, &config);
    let artifact = export_artifact_path(&args.output);

    if args.remove_devices {
        let removed = registrar.remove_devices(&ids, &artifact).await?;
        info!("Removed {removed} device identities");
    } else {
        let connections = registrar.create_devices(&ids, &artifact).await?;
        write_json(&args.output, &connections).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let result = match cli.command {
        Command::Provision(args) => provision(args).await,
        Command::Remove(args) => remove(args).await,
        Command::Devices(args) => devices(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
