use db::provider::InternalDataProvider;
use std::sync::Arc;
use warp::Filter;

use crate::{
    config::IndexerConfig,
    error::handle_rejection,
    indexer::{shutdown_channel, Indexer},
    routes::*,
};

pub(crate) struct Server {
    config: IndexerConfig,
    internal_data_provider: Arc<InternalDataProvider>,
}

impl Server {
    pub async fn new(config: IndexerConfig) -> Result<Server, std::io::Error> {
        Ok(Server {
            config,
            internal_data_provider: Arc::new(InternalDataProvider::new().await?),
        })
    }

    pub async fn start(self) -> Result<(), std::io::Error> {
        let listening_port = self.config.listening_port;
        let network = self.config.network.clone();

        let (shutdown_handle, shutdown) = shutdown_channel();
        let indexer = Indexer::new(
            self.config,
            (*self.internal_data_provider).clone(),
            shutdown,
        );
        indexer.run().await;

        let warp_serve = warp::serve(
            index_route()
                .or(sync_status(
                    self.internal_data_provider.clone(),
                    network.clone(),
                ))
                .or(sync_errors(self.internal_data_provider.clone(), network))
                .recover(handle_rejection)
                .with(warp::cors().allow_any_origin()),
        );

        let (_, server) =
            warp_serve.bind_with_graceful_shutdown(([0, 0, 0, 0], listening_port), async move {
                wait_for_signal().await;
                shutdown_handle.trigger();
            });

        server.await;

        Ok(())
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to listen to shutdown signal");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen to shutdown signal");
    }
}
