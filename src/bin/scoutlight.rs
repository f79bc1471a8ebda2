//! scoutlight command line

use clap::{Parser, Subcommand};
use scoutlight::common::parse_duration;
use scoutlight::discovery::{Properties, ServiceDiscovery, ServiceLocator};
use scoutlight::registry::{LeaseBackedRegistry, LocalStore, Registry};
use scoutlight::Config;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scoutlight")]
#[command(about = "Service registration and discovery over a lease-capable store")]
#[command(version = scoutlight::VERSION)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,

    /// Register instances against an in-process store and exercise discovery
    Simulate {
        /// Number of service instances to register
        #[arg(long, default_value = "3")]
        instances: usize,

        /// Number of locator lookups
        #[arg(long, default_value = "12")]
        lookups: usize,

        /// Cluster identifier
        #[arg(long, default_value = "demo")]
        cluster: String,

        /// Service name
        #[arg(long, default_value = "echo")]
        service: String,

        /// Lease TTL override (e.g. "2s", "500ms")
        #[arg(long)]
        ttl: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Simulate {
            instances,
            lookups,
            cluster,
            service,
            ttl,
        } => {
            let mut settings = config.lease.settings();
            if let Some(ttl) = ttl {
                let ttl = parse_duration(&ttl)?;
                settings.ttl = ttl;
                settings.refresh_interval = settings.refresh_interval.min(ttl);
            }
            let root = config.root()?;
            let store = Arc::new(LocalStore::new());
            tracing::info!(
                configured_store = %config.store.endpoint(),
                root = %root,
                "Simulating against an in-process store"
            );

            let new_registry = || -> Arc<dyn Registry> {
                Arc::new(LeaseBackedRegistry::new(store.clone(), settings, root.clone()))
            };

            let mut providers = Vec::with_capacity(instances);
            for index in 0..instances {
                let registry = new_registry();
                registry.setup().await?;

                let mut properties = Properties::new();
                properties.insert("index".to_string(), index.to_string());
                let instance = ServiceDiscovery::new(registry.clone())
                    .register_service(&cluster, &service, properties)
                    .await?;
                println!("Registered instance {} ({})", index, instance.instance_id);
                providers.push((registry, instance));
            }

            let consumer = ServiceDiscovery::new(new_registry());
            consumer.registry().setup().await?;
            println!("Clusters: {:?}", consumer.list_clusters().await?);
            println!("Services in '{}': {:?}", cluster, consumer.list_services(&cluster).await?);

            let locator = consumer.create_service_locator(&cluster, &service)?;
            let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
            for _ in 0..lookups {
                let instance_id = locator.find_service().await?;
                *distribution.entry(instance_id).or_default() += 1;
            }
            println!("Distribution over {} lookups:", lookups);
            for (instance_id, hits) in &distribution {
                println!("  {}  {}", instance_id, hits);
            }

            if let Some((registry, instance)) = providers.first() {
                registry.destroy().await?;
                let remaining = consumer.list_service_instances(&cluster, &service).await?;
                println!(
                    "Destroyed registry of {}; {} instance(s) remain",
                    instance.instance_id,
                    remaining.len()
                );
            }

            for (registry, _) in providers.iter().skip(1) {
                registry.destroy().await?;
            }
            consumer.registry().destroy().await?;
        }
    }

    Ok(())
}
