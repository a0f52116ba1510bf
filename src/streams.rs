//! Per-pane output streaming collectors.
//!
//! Enabling a stream starts a collector task that polls the pane through the
//! opaque command layer and pushes captured output to the hub under
//! `<session>:<pane>` and onto the event bus. Disabling (or server shutdown)
//! cancels the task.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{
    bus::{Bus, Event},
    commands::CommandRegistry,
    hub::Hub,
};

const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Active collectors keyed by (session, pane).
pub struct PaneStreams {
    active: DashMap<(String, String), CancellationToken>,
    hub: Hub,
    bus: Bus,
    commands: Arc<CommandRegistry>,
}

impl PaneStreams {
    pub fn new(hub: Hub, bus: Bus, commands: Arc<CommandRegistry>) -> Arc<Self> {
        Arc::new(Self {
            active: DashMap::new(),
            hub,
            bus,
            commands,
        })
    }

    /// Starts a collector; returns false if one is already running.
    pub fn start(&self, session: &str, pane: &str) -> bool {
        let key = (session.to_string(), pane.to_string());
        if self.active.contains_key(&key) {
            return false;
        }

        let token = CancellationToken::new();
        self.active.insert(key, token.clone());

        let hub = self.hub.clone();
        let bus = self.bus.clone();
        let commands = self.commands.clone();
        let session = session.to_string();
        let pane = pane.to_string();

        tokio::spawn(async move {
            let topic = format!("{session}:{pane}");
            let mut tick = tokio::time::interval(POLL_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(%session, %pane, "pane stream started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        let captured = commands
                            .invoke(
                                "panes.capture",
                                json!({"session": session, "pane": pane}),
                            )
                            .await;
                        match captured {
                            Ok(output) => {
                                hub.publish(topic.clone(), "pane_output", output.clone());
                                bus.emit(Event::new(
                                    "pane_output",
                                    Some(session.clone()),
                                    output,
                                ))
                                .await;
                            }
                            Err(err) => {
                                tracing::debug!(%session, %pane, %err, "pane capture failed");
                            }
                        }
                    }
                }
            }
            tracing::info!(%session, %pane, "pane stream stopped");
        });

        true
    }

    /// Stops a collector; returns false if none was running.
    pub fn stop(&self, session: &str, pane: &str) -> bool {
        let key = (session.to_string(), pane.to_string());
        match self.active.remove(&key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, session: &str, pane: &str) -> bool {
        self.active
            .contains_key(&(session.to_string(), pane.to_string()))
    }

    /// Cancels every collector; used on shutdown.
    pub fn stop_all(&self) {
        for entry in self.active.iter() {
            entry.value().cancel();
        }
        self.active.clear();
    }
}
