use {
    crate::{
        config::{StorageBackend, TallyServerConfig},
        grpc_server::start_grpc_service,
        http_server::start_http_service,
        ledger::{
            Ledger, error::LedgerError, interface::LedgerStore, memory::MemoryStore,
            notifier::Notifier,
        },
        metrics::handler::start_metrics_pusher,
        persistence::SqliteStore,
        transaction_processor::TransactionProcessor,
    },
    std::sync::Arc,
    tokio::{signal::ctrl_c, sync::broadcast::error::RecvError},
    tracing::{debug, error, info, warn},
};

pub mod config;
pub mod grpc_server;
pub mod http_server;
pub mod ledger;
pub mod logging;
pub mod macros;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod transaction_processor;

#[cfg(test)]
mod test_utils;

pub struct Tally {
    pub transaction_processor: Arc<TransactionProcessor>,
    pub config: TallyServerConfig,
    ledger: Arc<Ledger>,
}

impl Tally {
    pub fn new(config: TallyServerConfig) -> Result<Self, LedgerError> {
        let store: Arc<dyn LedgerStore> = match config.persistence.backend {
            StorageBackend::Sqlite => Arc::new(SqliteStore::open(
                &config.persistence.db_path,
                config.persistence.busy_timeout(),
            )?),
            StorageBackend::Memory => {
                warn!("Using the in-memory store, balances will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        let notifier = Notifier::new(config.ledger.notification_capacity);
        let ledger = Arc::new(Ledger::new(store, notifier));
        let transaction_processor = Arc::new(TransactionProcessor::new(ledger.clone()));

        Ok(Tally {
            transaction_processor,
            config,
            ledger,
        })
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub async fn run(&mut self) -> Result<(), String> {
        let (shutdown_sender, _) = tokio::sync::broadcast::channel::<()>(1);
        let mut services = tokio::task::JoinSet::new();

        match self.ledger.statistics() {
            Ok(stats) => info!(
                "Initializing with {} accounts holding {} points",
                stats.accounts, stats.total_points
            ),
            Err(e) => return Err(format!("Failed to read initial ledger state: {}", e)),
        }

        {
            let grpc_processor = Arc::clone(&self.transaction_processor);
            let grpc_config = self.config.grpc.clone();
            let shutdown_receiver = shutdown_sender.subscribe();
            services.spawn(async move {
                start_grpc_service(grpc_config, grpc_processor, shutdown_receiver).await
            });
        }

        {
            let http_ledger = Arc::clone(&self.ledger);
            let http_config = self.config.http.clone();
            let shutdown_receiver = shutdown_sender.subscribe();
            services.spawn(async move {
                start_http_service(http_config, http_ledger, shutdown_receiver).await
            });
        }

        if let Some(metrics_config) = self.config.victoria_metrics.clone() {
            let shutdown_receiver = shutdown_sender.subscribe();
            services.spawn(async move {
                start_metrics_pusher(metrics_config, shutdown_receiver).await
            });
        }

        {
            let mut notifications = self.ledger.subscribe();
            let mut shutdown_receiver = shutdown_sender.subscribe();
            services.spawn(async move {
                loop {
                    tokio::select! {
                        received = notifications.recv() => match received {
                            Ok(notification) => match serde_json::to_string(&notification) {
                                Ok(payload) => debug!("Notification: {}", payload),
                                Err(e) => error!("Failed to serialize notification: {}", e),
                            },
                            Err(RecvError::Lagged(skipped)) => {
                                warn!("Notification log lagged, {} notifications skipped", skipped)
                            }
                            Err(RecvError::Closed) => break,
                        },
                        _ = shutdown_receiver.recv() => break,
                    }
                }
            });
        }

        tokio::select! {
            _ = ctrl_c() => {
                info!("Shutdown signal received, stopping services...");
                shutdown_sender.send(()).map_err(|e| e.to_string())?;
                services.abort_all();
            }
            Some(res) = services.join_next() => {
                error!("Error in task: {:?}", res);
            }
        }

        Ok(())
    }
}
