//! Opaque domain command layer.
//!
//! Domain behavior (session/pane/agent manipulation, scans, dependency
//! checks) is reached through one narrow contract: a named command takes a
//! JSON parameter map and returns a JSON value or an error. The control
//! plane never interprets the payloads beyond wrapping them in the response
//! envelope; deployments replace or extend the registry to plug in the real
//! multiplexer driver.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Failed(String),
}

/// A single domain operation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn invoke(&self, params: Value) -> Result<Value, CommandError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(Value) -> BoxFuture<'static, Result<Value, CommandError>> + Send + Sync,
{
    async fn invoke(&self, params: Value) -> Result<Value, CommandError> {
        (self.0)(params).await
    }
}

/// Name → handler table.
pub struct CommandRegistry {
    handlers: DashMap<String, Arc<dyn CommandHandler>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, CommandError>> + Send + 'static,
    {
        let wrapped = move |params: Value| -> BoxFuture<'static, Result<Value, CommandError>> {
            Box::pin(f(params))
        };
        self.register(name, Arc::new(FnHandler(wrapped)));
    }

    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value, CommandError> {
        let handler = self
            .handlers
            .get(name)
            .map(|h| h.clone())
            .ok_or_else(|| CommandError::Unknown(name.to_string()))?;
        handler.invoke(params).await
    }
}

/// Registry pre-populated with in-memory reference handlers.
///
/// The built-ins keep session records in a process-local map so the HTTP
/// surface is fully exercisable without a multiplexer attached.
pub fn builtin_registry() -> Arc<CommandRegistry> {
    let registry = Arc::new(CommandRegistry::new());
    let sessions: Arc<DashMap<String, Value>> = Arc::new(DashMap::new());

    {
        let sessions = sessions.clone();
        registry.register_fn("sessions.list", move |_params| {
            let sessions = sessions.clone();
            async move {
                let list: Vec<Value> = sessions.iter().map(|s| s.value().clone()).collect();
                let count = list.len();
                Ok(json!({"sessions": list, "count": count}))
            }
        });
    }
    {
        let sessions = sessions.clone();
        registry.register_fn("sessions.create", move |params| {
            let sessions = sessions.clone();
            async move {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CommandError::InvalidParams("name is required".into()))?
                    .to_string();
                let record = json!({"name": name, "panes": 1, "attached": false});
                sessions.insert(name.clone(), record.clone());
                Ok(json!({"session": record}))
            }
        });
    }
    {
        let sessions = sessions.clone();
        registry.register_fn("sessions.get", move |params| {
            let sessions = sessions.clone();
            async move {
                let name = require_str(&params, "name")?;
                sessions
                    .get(&name)
                    .map(|s| json!({"session": s.value().clone()}))
                    .ok_or(CommandError::NotFound(name))
            }
        });
    }
    {
        let sessions = sessions.clone();
        registry.register_fn("sessions.delete", move |params| {
            let sessions = sessions.clone();
            async move {
                let name = require_str(&params, "name")?;
                sessions
                    .remove(&name)
                    .map(|_| json!({"deleted": name}))
                    .ok_or_else(|| CommandError::NotFound("session".into()))
            }
        });
    }

    registry.register_fn("panes.list", |params| async move {
        let session = require_str(&params, "session")?;
        Ok(json!({"session": session, "panes": [], "count": 0}))
    });
    registry.register_fn("panes.capture", |params| async move {
        let session = require_str(&params, "session")?;
        let pane = require_str(&params, "pane")?;
        Ok(json!({"session": session, "pane": pane, "lines": []}))
    });
    registry.register_fn("agents.list", |_params| async move {
        Ok(json!({"agents": [], "count": 0}))
    });

    registry.register_fn("deps.check", |_params| async move {
        Ok(json!({"dependencies": [
            {"name": "tmux", "required": true, "found": which("tmux")},
            {"name": "git", "required": false, "found": which("git")},
        ]}))
    });
    registry.register_fn("doctor.run", |_params| async move {
        Ok(json!({"checks": [
            {"name": "multiplexer", "ok": which("tmux")},
            {"name": "event-loop", "ok": true},
        ]}))
    });

    // Job work: each valid job type maps to one command.
    registry.register_fn("jobs.scan", |_params| async move {
        Ok(json!({"scanned_sessions": 0, "orphaned_panes": 0}))
    });
    registry.register_fn("jobs.sync", |_params| async move {
        Ok(json!({"synced": true, "conflicts": 0}))
    });
    registry.register_fn("jobs.prune", |_params| async move {
        Ok(json!({"pruned": 0}))
    });

    registry
}

fn require_str(params: &Value, key: &str) -> Result<String, CommandError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CommandError::InvalidParams(format!("{key} is required")))
}

fn which(binary: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| {
                let candidate = dir.join(binary);
                candidate.is_file()
            })
        })
        .unwrap_or(false)
}
