//! Line-oriented console over stdin/stdout.

pub mod app;
pub mod commands;
pub mod render;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use crate::api::backend::RagBackend;
use crate::api::client::RagClient;
use crate::core::config::ClientConfig;
use crate::core::errors::ClientResult;
use crate::storage::kv_store::{KvStore, MemoryKvStore, SqliteKvStore};

pub use app::Console;
pub use commands::{Command, CommandError, SessionRef, parse_command};

/// Run the console until `/quit` or end of input.
///
/// # Errors
/// Returns an error if the backend client or the store cannot be set up,
/// or if stdin fails.
pub async fn run(config: ClientConfig) -> ClientResult<()> {
    let backend: Arc<dyn RagBackend> = Arc::new(RagClient::new(&config.api)?);
    let store: Arc<dyn KvStore> = if config.storage.is_in_memory() {
        Arc::new(MemoryKvStore::new())
    } else {
        Arc::new(SqliteKvStore::open(&config.storage).await?)
    };
    info!(
        api = %config.api.base_url,
        db = %config.storage.sqlite_path.display(),
        "Console starting"
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            let written = async {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            };
            if written.await.is_err() {
                break;
            }
        }
    });

    let mut console = Console::start(&config, backend, store, tx.clone()).await?;
    let _ = tx.send(format!(
        "RAG console on {}. Type /help for commands.",
        config.api.base_url
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let outcome = match parse_command(&line) {
            Ok(command) => console.handle(command).await,
            Err(e) => {
                let _ = tx.send(format!("error: {e}"));
                continue;
            }
        };
        match outcome {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                let _ = tx.send(format!("error: {e}"));
            }
        }
    }

    console.shutdown().await;
    drop(tx);
    let _ = printer.await;
    info!("Console stopped");
    Ok(())
}
