//! Authenticated event socket connection

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use talktime_core::{config::FreeSwitchServer, AppError, AppResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::codec::EslCodec;
use crate::constants::{AUTH_COMMAND, COMMAND_TIMEOUT_SECS, EVENT_COMMAND};
use crate::event::EslEvent;
use crate::events::SUBSCRIBED_EVENTS;

pub type EslSink<T> = SplitSink<Framed<T, EslCodec>, String>;
pub type EslStream<T> = SplitStream<Framed<T, EslCodec>>;

pub struct EslConnection<T = TcpStream> {
    server_id: String,
    framed: Framed<T, EslCodec>,
}

impl EslConnection<TcpStream> {
    pub async fn connect(server: &FreeSwitchServer) -> AppResult<Self> {
        let server_id = server.label();
        info!("Connecting to FreeSWITCH ESL: {}", server_id);

        let stream = TcpStream::connect((server.host.as_str(), server.port))
            .await
            .map_err(|e| AppError::EslConnection(format!("{}: {}", server_id, e)))?;

        Self::establish(server_id, stream, &server.password).await
    }
}

impl<T> EslConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Authenticate and subscribe over an already open stream
    pub async fn establish(server_id: String, io: T, password: &str) -> AppResult<Self> {
        let mut conn = Self {
            server_id,
            framed: Framed::new(io, EslCodec::new()),
        };

        let greeting = conn.next_frame().await?;
        if !greeting.is_auth_request() {
            return Err(AppError::EslConnection(format!(
                "{}: unexpected greeting {}",
                conn.server_id, greeting
            )));
        }
        debug!("Received auth request from {}", conn.server_id);

        let reply = conn.command(&format!("{} {}", AUTH_COMMAND, password)).await?;
        if !reply.is_ok() {
            return Err(AppError::EslConnection(format!(
                "{}: authentication failed",
                conn.server_id
            )));
        }
        info!("Authenticated to FreeSWITCH: {}", conn.server_id);

        let subscription = format!("{} plain {}", EVENT_COMMAND, SUBSCRIBED_EVENTS.join(" "));
        let reply = conn.command(&subscription).await?;
        if !reply.is_ok() {
            return Err(AppError::EslConnection(format!(
                "{}: event subscription failed: {}",
                conn.server_id,
                reply.error_message().unwrap_or_default()
            )));
        }
        info!("Subscribed to events: {}", conn.server_id);

        Ok(conn)
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn split(self) -> (EslSink<T>, EslStream<T>) {
        self.framed.split()
    }

    /// Send a command and wait for its reply, skipping interleaved events
    async fn command(&mut self, command: &str) -> AppResult<EslEvent> {
        self.framed.send(command.to_string()).await?;

        loop {
            let frame = self.next_frame().await?;
            if frame.is_command_reply() {
                return Ok(frame);
            }
            debug!("Skipping {} while waiting for command reply", frame);
        }
    }

    async fn next_frame(&mut self) -> AppResult<EslEvent> {
        let next = timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS), self.framed.next())
            .await
            .map_err(|_| {
                AppError::EslConnection(format!("{}: timed out waiting for reply", self.server_id))
            })?;

        match next {
            Some(frame) => Ok(frame?),
            None => Err(AppError::EslConnection(format!(
                "{}: connection closed",
                self.server_id
            ))),
        }
    }
}
