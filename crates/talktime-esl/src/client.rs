//! Reconnecting event socket client
//!
//! One client per configured switch. Each connected client registers its
//! command channel with the shared [`EslCallControl`] and hands every mapped
//! event to the engine on its own task, so a slow event never holds up the
//! socket.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use talktime_core::{
    config::{FreeSwitchConfig, FreeSwitchServer},
    models::CallEvent,
    traits::CallEventHandler,
    AppResult,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::EslConnection;
use crate::control::EslCallControl;
use crate::event::EslEvent;
use crate::mapping;

pub struct EslClient {
    server: FreeSwitchServer,
    reconnect_delay: Duration,
    control: Arc<EslCallControl>,
    handler: Arc<dyn CallEventHandler>,
}

impl EslClient {
    pub fn new(
        server: FreeSwitchServer,
        reconnect_delay: Duration,
        control: Arc<EslCallControl>,
        handler: Arc<dyn CallEventHandler>,
    ) -> Self {
        Self {
            server,
            reconnect_delay,
            control,
            handler,
        }
    }

    /// Spawn one client per configured server
    pub fn spawn_all(
        config: &FreeSwitchConfig,
        control: Arc<EslCallControl>,
        handler: Arc<dyn CallEventHandler>,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let delay = Duration::from_secs(config.reconnect_delay_secs);

        config
            .servers
            .iter()
            .cloned()
            .map(|server| {
                let client = Self::new(server, delay, control.clone(), handler.clone());
                tokio::spawn(client.run(shutdown.clone()))
            })
            .collect()
    }

    /// Connect, serve and reconnect until shutdown
    pub async fn run(self, shutdown: CancellationToken) {
        let server_id = self.server.label();

        loop {
            let session = async {
                let conn = EslConnection::connect(&self.server).await?;
                self.serve(conn, shutdown.clone()).await
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = session => match result {
                    Ok(()) => info!("FreeSWITCH ESL connection closed: {}", server_id),
                    Err(e) => error!("FreeSWITCH ESL error for {}: {}", server_id, e),
                },
            }

            if shutdown.is_cancelled() {
                break;
            }

            warn!(
                "Reconnecting to {} in {} seconds...",
                server_id,
                self.reconnect_delay.as_secs()
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.reconnect_delay) => {}
            }
        }

        self.control.detach(&server_id);
        info!("ESL client for {} stopped", server_id);
    }

    /// Pump one established connection until it closes
    pub async fn serve<T>(&self, conn: EslConnection<T>, shutdown: CancellationToken) -> AppResult<()>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let server_id = conn.server_id().to_string();
        let (mut sink, mut stream) = conn.split();

        let (commands, mut pending) = mpsc::unbounded_channel::<String>();
        self.control.attach(&server_id, commands);

        let writer_id = server_id.clone();
        let writer = tokio::spawn(async move {
            while let Some(command) = pending.recv().await {
                if let Err(e) = sink.send(command).await {
                    error!("Failed to write command to {}: {}", writer_id, e);
                    break;
                }
            }
        });

        let result = loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                frame = stream.next() => frame,
            };

            match frame {
                None => break Ok(()),
                Some(Err(e)) => break Err(e.into()),
                Some(Ok(frame)) if frame.is_disconnect_notice() => {
                    info!("Disconnect notice from {}", server_id);
                    break Ok(());
                }
                Some(Ok(frame)) => self.on_frame(&server_id, frame),
            }
        };

        self.control.detach(&server_id);
        writer.abort();
        result
    }

    fn on_frame(&self, server_id: &str, frame: EslEvent) {
        if frame.is_error() {
            warn!("Command rejected by {}: {}", server_id, frame.error_message().unwrap_or_default());
            return;
        }

        let Some(event) = frame.inner_event() else {
            debug!("Ignoring {} from {}", frame, server_id);
            return;
        };

        let Some(call_event) = mapping::to_call_event(&event) else {
            return;
        };

        match &call_event {
            CallEvent::Hangup(hangup) => self.control.forget(&hangup.call_id),
            other => self.control.route(other.call_id(), server_id),
        }

        let handler = self.handler.clone();
        tokio::spawn(async move {
            handler.handle_event(call_event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{accept_handshake, read_command, send_event};
    use async_trait::async_trait;
    use talktime_core::traits::CallControl;
    use tokio::io::{duplex, AsyncWriteExt};

    struct Collect(mpsc::UnboundedSender<CallEvent>);

    #[async_trait]
    impl CallEventHandler for Collect {
        async fn handle_event(&self, event: CallEvent) {
            let _ = self.0.send(event);
        }
    }

    fn client(handler: Arc<dyn CallEventHandler>, control: Arc<EslCallControl>) -> EslClient {
        let server = FreeSwitchServer {
            host: "127.0.0.1".to_string(),
            port: 8021,
            password: "ClueCon".to_string(),
            id: Some("fs1".to_string()),
        };
        EslClient::new(server, Duration::from_millis(10), control, handler)
    }

    #[tokio::test]
    async fn test_events_in_commands_out() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let control = Arc::new(EslCallControl::new(&FreeSwitchConfig::default()));
        let client = Arc::new(client(Arc::new(Collect(events_tx)), control.clone()));

        let (io, mut switch) = duplex(8192);
        let script = tokio::spawn(async move {
            accept_handshake(&mut switch).await;
            send_event(
                &mut switch,
                &[
                    ("Event-Name", "CHANNEL_PARK"),
                    ("Unique-ID", "call-1"),
                    ("Caller-Destination-Number", "01811000000"),
                    ("Caller-ANI", "01711000000"),
                ],
            )
            .await;
            send_event(&mut switch, &[("Event-Name", "HEARTBEAT")]).await;

            let command = read_command(&mut switch).await;
            switch
                .write_all(b"Content-Type: text/disconnect-notice\nContent-Length: 0\n\n")
                .await
                .unwrap();
            command
        });

        let conn = EslConnection::establish("fs1".to_string(), io, "ClueCon")
            .await
            .unwrap();
        let serving = {
            let client = client.clone();
            tokio::spawn(async move { client.serve(conn, CancellationToken::new()).await })
        };

        let Some(CallEvent::Park(park)) = events.recv().await else {
            panic!("expected park");
        };
        assert_eq!(park.call_id, "call-1");
        assert_eq!(control.connected_servers(), 1);

        control.terminate("call-1").await.unwrap();
        assert_eq!(script.await.unwrap(), "bgapi uuid_kill call-1");

        serving.await.unwrap().unwrap();
        assert_eq!(control.connected_servers(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (events_tx, _events) = mpsc::unbounded_channel();
        let control = Arc::new(EslCallControl::new(&FreeSwitchConfig::default()));
        let client = client(Arc::new(Collect(events_tx)), control);

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(client.run(shutdown.clone()));

        shutdown.cancel();
        running.await.unwrap();
    }
}
