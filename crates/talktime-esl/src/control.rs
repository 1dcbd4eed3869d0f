//! Outbound call control over the event socket
//!
//! Every connected switch registers a command channel drained by its
//! connection's writer task. Commands for a call go to the switch that
//! reported it; unknown calls go to any connected switch.

use async_trait::async_trait;
use dashmap::DashMap;
use talktime_core::{
    config::FreeSwitchConfig,
    traits::{CallControl, EffectCommand},
    AppError, AppResult,
};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::constants::BGAPI_COMMAND;

pub struct EslCallControl {
    voice_changer_command: String,
    transfer_dialplan: String,
    transfer_context: String,
    /// server id -> command channel
    links: DashMap<String, mpsc::UnboundedSender<String>>,
    /// call id -> server id
    routes: DashMap<String, String>,
}

impl EslCallControl {
    pub fn new(config: &FreeSwitchConfig) -> Self {
        Self {
            voice_changer_command: config.voice_changer_command.clone(),
            transfer_dialplan: config.transfer_dialplan.clone(),
            transfer_context: config.transfer_context.clone(),
            links: DashMap::new(),
            routes: DashMap::new(),
        }
    }

    pub fn attach(&self, server_id: &str, commands: mpsc::UnboundedSender<String>) {
        self.links.insert(server_id.to_string(), commands);
    }

    /// Forget a disconnected switch and the calls it owned
    pub fn detach(&self, server_id: &str) {
        self.links.remove(server_id);
        self.routes.retain(|_, owner| owner != server_id);
    }

    pub fn route(&self, call_id: &str, server_id: &str) {
        self.routes
            .insert(call_id.to_string(), server_id.to_string());
    }

    pub fn forget(&self, call_id: &str) {
        self.routes.remove(call_id);
    }

    pub fn connected_servers(&self) -> usize {
        self.links.len()
    }

    fn link_for(&self, call_id: &str) -> Option<mpsc::UnboundedSender<String>> {
        if let Some(owner) = self.routes.get(call_id) {
            if let Some(link) = self.links.get(owner.value()) {
                return Some(link.clone());
            }
        }
        self.links.iter().next().map(|link| link.value().clone())
    }

    fn send(&self, call_id: &str, command: String) -> AppResult<()> {
        let link = self.link_for(call_id).ok_or_else(|| {
            AppError::TransportCommand(format!("no connected switch for call {}", call_id))
        })?;

        let line = format!("{} {}", BGAPI_COMMAND, command);
        debug!("-> {}", line);
        link.send(line)
            .map_err(|_| AppError::TransportCommand(format!("command channel closed for {}", call_id)))
    }
}

#[async_trait]
impl CallControl for EslCallControl {
    #[instrument(skip(self))]
    async fn apply_effect(&self, call_id: &str, effect: &EffectCommand) -> AppResult<()> {
        self.send(
            call_id,
            format!("{} {} start", self.voice_changer_command, call_id),
        )?;

        if !effect.params.is_empty() {
            self.send(
                call_id,
                format!(
                    "{} {} params {}",
                    self.voice_changer_command,
                    call_id,
                    effect.params.join(" ")
                ),
            )?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn transfer(&self, call_id: &str, destination: &str) -> AppResult<()> {
        self.send(
            call_id,
            format!(
                "uuid_transfer {} {} {} {}",
                call_id, destination, self.transfer_dialplan, self.transfer_context
            ),
        )
    }

    #[instrument(skip(self))]
    async fn terminate(&self, call_id: &str) -> AppResult<()> {
        let result = self.send(call_id, format!("uuid_kill {}", call_id));
        if result.is_ok() {
            self.forget(call_id);
        } else {
            warn!("Could not deliver kill for {}", call_id);
        }
        result
    }
}
