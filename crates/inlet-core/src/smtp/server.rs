//! SMTP server implementation

use crate::smtp::handler::{SessionSettings, SmtpHandler};
use crate::smtp::{RecipientDirectory, SmtpDelivery};
use anyhow::Result;
use inlet_common::config::SmtpConfig;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// SMTP Server
pub struct SmtpServer {
    config: SmtpConfig,
    handler: Arc<SmtpHandler>,
    connection_semaphore: Arc<Semaphore>,
}

impl SmtpServer {
    /// Create a new SMTP server
    pub fn new(
        config: SmtpConfig,
        directory: Arc<dyn RecipientDirectory>,
        delivery: Arc<dyn SmtpDelivery>,
    ) -> Self {
        let handler = SmtpHandler::new(SessionSettings::from_config(&config), directory, delivery);
        let max_connections = config.max_connections.max(1);
        Self {
            config,
            handler: Arc::new(handler),
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("SMTP server listening on {}", addr);
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` is cancelled.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (mut stream, peer_addr) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept SMTP connection: {}", e);
                    continue;
                }
            };

            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Max connections reached, rejecting {}", peer_addr);
                    tokio::spawn(async move {
                        let _ = stream
                            .write_all(b"421 4.3.2 Too many connections, try again later\r\n")
                            .await;
                    });
                    continue;
                }
            };

            let handler = self.handler.clone();
            let span = info_span!("smtp_session", peer = %peer_addr);
            tokio::spawn(
                async move {
                    if let Err(e) = handler.handle_stream(stream, peer_addr).await {
                        warn!("SMTP session error: {}", e);
                    }
                    drop(permit);
                }
                .instrument(span),
            );
        }

        info!("SMTP server stopped accepting connections");
        Ok(())
    }
}
