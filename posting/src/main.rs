// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::error::Error;
use std::sync::Arc;

use posting::config::{CliConfig, EngineConfig};
use posting::schema::Schema;
use posting::storage::{LogStore, Store, data_prefix, index_prefix};
use posting::{CommitPipeline, Engine};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: posting rebuild <attribute>... | posting stats";

/// File name of the store's log inside the data directory.
const LOG_FILE_NAME: &str = "posting.log";

type CommandResult = Result<(), Box<dyn Error + Send + Sync>>;

enum Command {
    /// Rebuild the value index of each attribute.
    Rebuild(Vec<String>),
    /// Print key counts per attribute.
    Stats,
}

impl Command {
    fn parse(args: &[String]) -> Option<Self> {
        match args.split_first() {
            Some((command, attributes)) if command == "rebuild" && !attributes.is_empty() => {
                Some(Self::Rebuild(attributes.to_vec()))
            }
            Some((command, rest)) if command == "stats" && rest.is_empty() => Some(Self::Stats),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "posting=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = Command::parse(&args) else {
        tracing::error!("{USAGE}");
        std::process::exit(2);
    };

    // Load configuration from environment variables
    let (cli, config) = match (CliConfig::from_env(), EngineConfig::from_env()) {
        (Ok(cli), Ok(config)) => (cli, config),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Loaded configuration: data_directory={}, schema_file={}",
        cli.data_directory.display(),
        cli.schema_file.display()
    );

    if let Err(e) = std::fs::create_dir_all(&cli.data_directory) {
        tracing::error!("Failed to create data directory: {e}");
        std::process::exit(1);
    }

    let log_path = cli.data_directory.join(LOG_FILE_NAME);
    let store = match LogStore::open(&log_path, false) {
        Ok((store, recovery)) => {
            tracing::info!(
                "Opened {}: {} records replayed, {} bytes discarded",
                log_path.display(),
                recovery.records_replayed,
                recovery.bytes_discarded
            );
            Arc::new(store)
        }
        Err(e) => {
            tracing::error!("Failed to open store {}: {e}", log_path.display());
            std::process::exit(1);
        }
    };

    let schema = match std::fs::read_to_string(&cli.schema_file)
        .map_err(|e| e.to_string())
        .and_then(|text| Schema::parse(&text).map_err(|e| e.to_string()))
    {
        Ok(schema) => schema,
        Err(e) => {
            tracing::error!("Failed to load schema {}: {e}", cli.schema_file.display());
            std::process::exit(1);
        }
    };

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    let engine = Engine::new(Arc::clone(&store) as Arc<dyn Store>, Arc::new(schema), config);

    let result = match command {
        Command::Rebuild(attributes) => rebuild(&engine, attributes).await,
        Command::Stats => stats(&engine),
    };
    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }

    if let Err(e) = store.sync() {
        tracing::error!("Failed to sync store: {e}");
        std::process::exit(1);
    }
}

/// Rebuild each attribute in turn with the commit pipeline running.
///
/// Ctrl-C cancels the rebuild in progress; the pipeline is drained and
/// remaining dirty lists are checkpointed either way.
async fn rebuild(engine: &Arc<Engine>, attributes: Vec<String>) -> CommandResult {
    let pipeline = CommitPipeline::start(engine);
    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling rebuild");
                cancel.cancel();
            }
        }
    });

    let mut outcome: CommandResult = Ok(());
    for attribute in attributes {
        match engine.spawn_rebuild(attribute.clone(), cancel.clone()).await {
            Ok(Ok(stats)) => tracing::info!(
                "'{attribute}': {} entities scanned, {} tokens written, {} tokens deleted",
                stats.entities_scanned,
                stats.tokens_written,
                stats.tokens_deleted
            ),
            Ok(Err(e)) => {
                outcome = Err(format!("Rebuild of '{attribute}' failed: {e}").into());
                break;
            }
            Err(e) => {
                outcome = Err(format!("Rebuild of '{attribute}' panicked: {e}").into());
                break;
            }
        }
    }

    interrupt.abort();
    pipeline.shutdown().await;
    while engine.cache().dirty_len()? > 0 {
        engine.commit_all(engine.config().commit_batch_size)?;
    }
    outcome
}

/// Print the number of data and index keys of every attribute.
#[allow(clippy::print_stdout)]
fn stats(engine: &Engine) -> CommandResult {
    let mut attributes = engine.schema().attributes();
    attributes.sort();
    for attribute in attributes {
        let data = engine.store().scan_prefix(&data_prefix(&attribute))?.len();
        let index = engine.store().scan_prefix(&index_prefix(&attribute))?.len();
        println!("{attribute}\tdata={data}\tindex={index}");
    }
    Ok(())
}
