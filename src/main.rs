use std::path::PathBuf;
use std::sync::Arc;

use anime_sync::config::TopicsConfig;
use anime_sync::entity::{Anime, AnimeEpisode, AnimeKind, AnimeSeason, EntityKind, EpisodeKind, SeasonKind};
use anime_sync::fanout::{Dispatcher, ImageRoutes, Publisher, TopicImageSender};
use anime_sync::flags::{self, FlagService};
use anime_sync::kafka::{CdcConsumer, KafkaProducer, KafkaRetryQueue, TopicManager};
use anime_sync::store::{EntityStore, PgStore};
use anime_sync::tags::TagReconciler;
use anime_sync::{Config, EngineOptions, ReconcileEngine, Replicator};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "anime-sync")]
#[command(about = "Replicates anime CDC events into PostgreSQL and downstream topics", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs", global = true)]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Consume the anime change topic
    ServeAnime,
    /// Consume the anime season change topic
    ServeAnimeSeason,
    /// Consume the anime episode change topic
    ServeAnimeEpisode,
}

/// Clients shared by every entity pipeline.
struct Services {
    store: Arc<PgStore>,
    producer: Arc<KafkaProducer>,
    flags: Arc<dyn FlagService>,
    dispatcher: Arc<Dispatcher>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting anime-sync");
    info!("Loading configuration from {:?}", args.config);

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    info!(
        postgres_host = %config.postgres.host,
        postgres_port = %config.postgres.port,
        postgres_database = %config.postgres.database,
        kafka_brokers = ?config.kafka.brokers,
        kafka_group_id = %config.kafka.group_id,
        flagsmith = config.flags.flagsmith.is_some(),
        retry_queue = config.sync.retry_queue,
        "Configuration summary"
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let services = connect(&config).await?;

    let result = match args.command {
        Command::ServeAnime => {
            let tags = TagReconciler::new(services.store.clone(), services.store.clone());
            let store: Arc<dyn EntityStore<Anime>> = services.store.clone();
            serve(AnimeKind::new(tags), store, &config.topics.anime, &config, &services, cancel).await
        }
        Command::ServeAnimeSeason => {
            let store: Arc<dyn EntityStore<AnimeSeason>> = services.store.clone();
            serve(SeasonKind, store, &config.topics.anime_season, &config, &services, cancel).await
        }
        Command::ServeAnimeEpisode => {
            let store: Arc<dyn EntityStore<AnimeEpisode>> = services.store.clone();
            serve(EpisodeKind, store, &config.topics.anime_episode, &config, &services, cancel).await
        }
    };

    if let Err(e) = &result {
        error!("Replication failed: {:#}", e);
    }
    info!("anime-sync stopped");
    result
}

async fn connect(config: &Config) -> anyhow::Result<Services> {
    let store = Arc::new(
        PgStore::connect(&config.postgres)
            .await
            .context("Failed to connect to PostgreSQL")?,
    );
    let producer = Arc::new(KafkaProducer::new(&config.kafka).context("Failed to create Kafka producer")?);
    let flags = flags::from_config(&config.flags).context("Failed to create flag service")?;
    let dispatcher = Arc::new(dispatcher(&config.topics, producer.clone()));

    Ok(Services {
        store,
        producer,
        flags,
        dispatcher,
    })
}

fn dispatcher(topics: &TopicsConfig, producer: Arc<KafkaProducer>) -> Dispatcher {
    let publisher: Arc<dyn Publisher> = producer;
    let routes = ImageRoutes::new(
        Arc::new(TopicImageSender::new(publisher.clone(), topics.message_bus.clone())),
        Arc::new(TopicImageSender::new(publisher.clone(), topics.image.clone())),
    );
    Dispatcher::new(publisher, topics.search_index.clone(), routes)
}

async fn serve<K: EntityKind>(
    kind: K,
    store: Arc<dyn EntityStore<K::Entity>>,
    source_topic: &str,
    config: &Config,
    services: &Services,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let retry_topic = Config::retry_topic(source_topic);

    if config.kafka.ensure_topics {
        let mut topics = vec![
            config.topics.search_index.as_str(),
            config.topics.image.as_str(),
            config.topics.message_bus.as_str(),
        ];
        if config.sync.retry_queue {
            topics.push(retry_topic.as_str());
        }
        TopicManager::new(&config.kafka)?
            .ensure_topics(&topics)
            .await
            .context("Failed to ensure output topics")?;
    }

    let engine = ReconcileEngine::new(
        kind,
        store,
        services.flags.clone(),
        services.dispatcher.clone(),
        EngineOptions {
            ignore_missing_on_delete: config.sync.ignore_missing_on_delete,
        },
    );

    let mut replicator =
        Replicator::new(engine, config.sync.retry_policy()).with_pacing(config.sync.pacing());
    if config.sync.retry_queue {
        replicator = replicator.with_retry_queue(Arc::new(KafkaRetryQueue::new(
            services.producer.clone(),
            retry_topic.clone(),
        )));
    }

    info!(
        kind = K::NAME,
        source_topic,
        retry_topic = ?config.sync.retry_queue.then_some(retry_topic.as_str()),
        "Starting replication"
    );

    let consumer = CdcConsumer::new(&config.kafka, source_topic).context("Failed to create Kafka consumer")?;
    consumer.run(&replicator, cancel).await?;

    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("anime_sync=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("anime_sync=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
}
