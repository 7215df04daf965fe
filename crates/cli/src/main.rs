// CoopGrid CLI entry point

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, info};

use coopgrid_cluster::{ClusterEngine, DeadlineTicker, EquipmentRequest, NewCluster, ReturnsBasis};
use coopgrid_common::config::{Configuration, EngineConfig};
use coopgrid_common::logging::init_logging;
use coopgrid_governance::{ProposalType, VoteChoice};
use coopgrid_storage::JsonRecordStore;

#[derive(Parser, Debug)]
#[clap(author, version, about = "CoopGrid energy cooperative engine")]
struct Cli {
    /// Verbose mode (-v, -vv)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// TOML configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overriding the configuration
    #[clap(short, long)]
    data_dir: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cluster operations
    Cluster {
        #[clap(subcommand)]
        command: ClusterCommands,
    },

    /// Add capital as an existing member
    Contribute {
        cluster_id: String,
        #[clap(short, long)]
        user: String,
        /// Amount in ZMW
        amount: f64,
    },

    /// Correct an earlier contribution by a signed amount
    Correct {
        cluster_id: String,
        #[clap(short, long)]
        user: String,
        /// Contribution being corrected
        #[clap(short, long)]
        original: String,
        /// Signed amount in ZMW
        #[clap(allow_hyphen_values = true)]
        delta: f64,
        #[clap(short, long)]
        reason: Option<String>,
    },

    /// List a cluster's ledger entries
    Contributions { cluster_id: String },

    /// Show ownership folded from the ledger
    Ownership { cluster_id: String },

    /// Set a member's expected energy usage
    Usage {
        cluster_id: String,
        #[clap(short, long)]
        member: String,
        /// kWh per period
        kwh: f64,
    },

    /// Propose a group equipment purchase
    Purchase {
        cluster_id: String,
        #[clap(short, long)]
        proposed_by: String,
        #[clap(long)]
        asset_type: String,
        #[clap(long, default_value = "")]
        brand: String,
        #[clap(long, default_value = "")]
        model: String,
        /// Estimated cost in ZMW
        #[clap(long)]
        cost: f64,
        /// Capacity in kW
        #[clap(long, default_value_t = 0.0)]
        capacity: f64,
        #[clap(long, default_value_t = 0)]
        warranty_years: u32,
    },

    /// List purchase requests
    Purchases { cluster_id: String },

    /// Open a governance proposal
    Propose {
        cluster_id: String,
        /// new_member, budget_allocation, maintenance, rule_change or dissolution
        #[clap(short = 't', long = "type")]
        proposal_type: ProposalType,
        #[clap(long)]
        title: String,
        #[clap(long, default_value = "")]
        description: String,
        #[clap(short, long)]
        proposed_by: String,
        /// Extra attributes as key=value
        #[clap(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },

    /// List a cluster's proposals
    Proposals { cluster_id: String },

    /// Vote on a proposal
    Vote {
        cluster_id: String,
        proposal_id: String,
        #[clap(short, long)]
        member: String,
        #[clap(value_enum)]
        choice: VoteArg,
        #[clap(short, long)]
        reason: Option<String>,
    },

    /// Resolve a proposal if its votes or deadline settle it
    Resolve {
        cluster_id: String,
        proposal_id: String,
    },

    /// Carry out a passed decision
    Implement {
        cluster_id: String,
        proposal_id: String,
    },

    /// Resolve every proposal past its deadline once
    Tick,

    /// Keep resolving expired proposals until interrupted
    Watch {
        /// Seconds between ticks, overriding the configuration
        #[clap(short, long)]
        interval: Option<u64>,
    },

    /// Distribute a period's generation
    Distribute {
        cluster_id: String,
        /// kWh generated
        generated: f64,
    },

    /// List past distributions
    Distributions { cluster_id: String },

    /// Calculate member returns
    Returns {
        cluster_id: String,
        #[clap(short, long, value_enum, default_value_t = BasisArg::Usage)]
        basis: BasisArg,
    },
}

#[derive(Subcommand, Debug)]
enum ClusterCommands {
    /// Found a new cluster
    Create {
        #[clap(long)]
        name: String,
        #[clap(short = 't', long = "type")]
        cluster_type: String,
        #[clap(long)]
        location: String,
        /// Founder's initial funding in ZMW
        #[clap(long)]
        funding: f64,
        #[clap(short, long)]
        founder: String,
        /// Installed capacity in kW
        #[clap(long)]
        capacity: Option<f64>,
    },

    /// Join a cluster with a contribution
    Join {
        cluster_id: String,
        #[clap(short, long)]
        user: String,
        /// Contribution in ZMW
        contribution: f64,
    },

    /// Show a cluster
    Show { cluster_id: String },

    /// List all clusters
    List,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VoteArg {
    Yes,
    No,
}

impl From<VoteArg> for VoteChoice {
    fn from(arg: VoteArg) -> Self {
        match arg {
            VoteArg::Yes => VoteChoice::Yes,
            VoteArg::No => VoteChoice::No,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BasisArg {
    Usage,
    LatestDistribution,
}

impl From<BasisArg> for ReturnsBasis {
    fn from(arg: BasisArg) -> Self {
        match arg {
            BasisArg::Usage => ReturnsBasis::EnergyUsage,
            BasisArg::LatestDistribution => ReturnsBasis::LatestDistribution,
        }
    }
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {}", s))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    }
    .apply_env()?;

    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    match cli.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging)?;
    debug!("Using data directory {}", config.storage.data_dir.display());

    let engine = Arc::new(ClusterEngine::open(config).await?);
    run(engine, cli.command).await
}

async fn run(engine: Arc<ClusterEngine<JsonRecordStore>>, command: Commands) -> Result<()> {
    match command {
        Commands::Cluster { command } => handle_cluster_command(&engine, command).await?,
        Commands::Contribute { cluster_id, user, amount } => {
            print_json(&engine.contribute(&cluster_id, &user, amount).await?)?
        }
        Commands::Correct {
            cluster_id,
            user,
            original,
            delta,
            reason,
        } => print_json(
            &engine
                .correct_contribution(&cluster_id, &user, &original, delta, reason)
                .await?,
        )?,
        Commands::Contributions { cluster_id } => {
            print_json(&engine.list_contributions(&cluster_id).await?)?
        }
        Commands::Ownership { cluster_id } => print_json(&engine.ownership(&cluster_id).await?)?,
        Commands::Usage { cluster_id, member, kwh } => {
            print_json(&engine.record_energy_usage(&cluster_id, &member, kwh).await?)?
        }
        Commands::Purchase {
            cluster_id,
            proposed_by,
            asset_type,
            brand,
            model,
            cost,
            capacity,
            warranty_years,
        } => {
            let mut equipment = EquipmentRequest::new(asset_type, brand, model, cost, capacity);
            equipment.warranty_years = warranty_years;
            let (request, proposal) = engine
                .initiate_group_purchase(&cluster_id, equipment, &proposed_by)
                .await?;
            print_json(&serde_json::json!({
                "purchaseRequest": request,
                "proposal": proposal,
            }))?
        }
        Commands::Purchases { cluster_id } => {
            print_json(&engine.list_purchase_requests(&cluster_id).await?)?
        }
        Commands::Propose {
            cluster_id,
            proposal_type,
            title,
            description,
            proposed_by,
            metadata,
        } => {
            let metadata: BTreeMap<String, String> = metadata.into_iter().collect();
            print_json(
                &engine
                    .create_proposal(&cluster_id, proposal_type, &title, &description, &proposed_by, metadata)
                    .await?,
            )?
        }
        Commands::Proposals { cluster_id } => print_json(&engine.list_proposals(&cluster_id).await?)?,
        Commands::Vote {
            cluster_id,
            proposal_id,
            member,
            choice,
            reason,
        } => print_json(
            &engine
                .vote_on_proposal(&cluster_id, &proposal_id, &member, choice.into(), reason)
                .await?,
        )?,
        Commands::Resolve { cluster_id, proposal_id } => {
            print_json(&engine.resolve_proposal(&cluster_id, &proposal_id).await?)?
        }
        Commands::Implement { cluster_id, proposal_id } => {
            print_json(&engine.implement_decision(&cluster_id, &proposal_id).await?)?
        }
        Commands::Tick => print_json(&engine.resolve_expired().await?)?,
        Commands::Watch { interval } => {
            let secs = interval.unwrap_or(engine.config().ticker.interval_secs);
            if secs == 0 {
                return Err(anyhow!("interval must be at least one second"));
            }
            let ticker = DeadlineTicker::spawn(engine.clone(), Duration::from_secs(secs));
            tokio::signal::ctrl_c().await?;
            info!("Interrupted, stopping");
            ticker.shutdown().await;
        }
        Commands::Distribute { cluster_id, generated } => {
            print_json(&engine.distribute_energy(&cluster_id, generated).await?)?
        }
        Commands::Distributions { cluster_id } => {
            print_json(&engine.list_distributions(&cluster_id).await?)?
        }
        Commands::Returns { cluster_id, basis } => {
            print_json(&engine.calculate_returns(&cluster_id, basis.into()).await?)?
        }
    }
    Ok(())
}

async fn handle_cluster_command(
    engine: &ClusterEngine<JsonRecordStore>,
    command: ClusterCommands,
) -> Result<()> {
    match command {
        ClusterCommands::Create {
            name,
            cluster_type,
            location,
            funding,
            founder,
            capacity,
        } => {
            let mut data = NewCluster::new(name, cluster_type, location, funding);
            data.energy_capacity = capacity;
            print_json(&engine.create_cluster(data, &founder).await?)
        }
        ClusterCommands::Join {
            cluster_id,
            user,
            contribution,
        } => print_json(&engine.join_cluster(&user, &cluster_id, contribution).await?),
        ClusterCommands::Show { cluster_id } => print_json(&engine.get_cluster(&cluster_id).await?),
        ClusterCommands::List => print_json(&engine.list_clusters().await?),
    }
}
