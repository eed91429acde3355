use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use saga_common::{load_config, Config, FileConfig, SagaError, Topic};
use saga_curator::{
    read_articles_file, spawn_notifier, Curator, GraphFlagSink, Notifier, SpoolSource, TickOutcome,
};
use saga_graph::{migrate::migrate, GraphClient, GraphWriter};
use saga_oracle::ClaudeOracle;

#[derive(Parser)]
#[command(name = "saga")]
#[command(about = "Capacity-bounded topic knowledge graph curator")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loop until interrupted
    Run,

    /// Refresh the single most overdue topic, then exit
    Tick,

    /// Ingest a JSON-lines file of articles into one topic
    Ingest {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        file: PathBuf,
    },

    /// Propose one new relationship edge for a topic
    Link {
        #[arg(long)]
        topic: String,
    },

    /// Propose a new topic, subject to the topic capacity guard
    ProposeTopic {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 3)]
        priority: u8,
    },

    /// Create constraints and indexes (idempotent)
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("saga=info".parse()?);
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Config::from_env()?;
    let file_config = load_config(&config.config_path)?;

    let client = GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password).await?;
    migrate(&client).await?;
    if let Commands::Migrate = cli.command {
        info!("Migration complete");
        return Ok(());
    }

    let writer = Arc::new(GraphWriter::new(client));
    let api_key = config
        .anthropic_api_key
        .clone()
        .ok_or_else(|| anyhow!("ANTHROPIC_API_KEY must be set for '{}'", command_name(&cli.command)))?;
    let backend = Arc::new(ClaudeOracle::new(api_key, file_config.oracle.model.clone()));

    let (notifier, rx) = Notifier::channel();
    let notifications = spawn_notifier(rx, Arc::new(GraphFlagSink::new(writer.clone())));

    let source = Arc::new(SpoolSource::new(config.spool_dir.clone()));
    let curator = Curator::new(writer.clone(), backend, source, &file_config, notifier);

    let result = execute(cli.command, &curator, &writer, &file_config).await;

    // Dropping the curator closes the notifier channel; wait for pending flags.
    drop(curator);
    notifications.await?;
    result
}

async fn execute(command: Commands, curator: &Curator, writer: &GraphWriter, config: &FileConfig) -> Result<()> {
    match command {
        Commands::Run => {
            info!(workers = config.scheduler.workers, "Starting scheduler");
            curator
                .scheduler
                .run(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
        }
        Commands::Tick => match curator.scheduler.tick_once().await? {
            TickOutcome::Refreshed(report) => info!("{report}"),
            TickOutcome::Lost(id) => info!(topic_id = id.as_str(), "Claim lost, nothing refreshed"),
            TickOutcome::Idle(sleep) => info!(next_due_secs = sleep.as_secs(), "Nothing due"),
        },
        Commands::Ingest { topic, file } => {
            let topic = writer
                .get_topic(&topic)
                .await?
                .ok_or_else(|| SagaError::TopicNotFound(topic.clone()))?;
            let articles = read_articles_file(&file).await?;
            info!(topic_id = topic.id.as_str(), count = articles.len(), "Ingesting file");
            for article in articles {
                let article_id = article.id.clone();
                let outcome = curator.ingestor.ingest(&topic, article).await?;
                info!(topic_id = topic.id.as_str(), article_id = article_id.as_str(), outcome = ?outcome, "Ingested");
            }
        }
        Commands::Link { topic } => {
            let outcome = curator.linker.link(&topic).await?;
            info!(topic_id = topic.as_str(), outcome = ?outcome, "Linking complete");
        }
        Commands::ProposeTopic { id, name, priority } => {
            let outcome = curator.topic_guard.propose_topic(Topic::new(id.clone(), name, priority)).await?;
            info!(topic_id = id.as_str(), outcome = ?outcome, "Topic proposal complete");
        }
        Commands::Migrate => {}
    }
    Ok(())
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Run => "run",
        Commands::Tick => "tick",
        Commands::Ingest { .. } => "ingest",
        Commands::Link { .. } => "link",
        Commands::ProposeTopic { .. } => "propose-topic",
        Commands::Migrate => "migrate",
    }
}
