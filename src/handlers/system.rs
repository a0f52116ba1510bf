//! System information and runtime configuration endpoints.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::{
    app::App,
    envelope::{self, ErrorCode},
    origin::OriginPolicy,
    types::{Request, Response},
};

/// Unauthenticated liveness probe.
pub async fn health(req: Request) -> Response {
    envelope::success(&req, json!({"status": "healthy"}))
}

pub async fn api_health(req: Request, app: Arc<App>) -> Response {
    envelope::success(
        &req,
        json!({
            "status": "healthy",
            "uptime_secs": app.started_at.elapsed().as_secs(),
            "auth_mode": app.config.auth.mode.as_str(),
        }),
    )
}

pub async fn version(req: Request, _app: Arc<App>) -> Response {
    envelope::success(
        &req,
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

pub async fn capabilities(req: Request, app: Arc<App>) -> Response {
    envelope::success(
        &req,
        json!({
            "capabilities": [
                "sessions", "panes", "agents", "jobs",
                "events", "websocket", "pane-streams", "idempotency",
            ],
            "auth_mode": app.config.auth.mode.as_str(),
            "job_types": crate::jobs::VALID_JOB_TYPES,
        }),
    )
}

pub async fn deps(req: Request, app: Arc<App>) -> Response {
    let result = app.commands.invoke("deps.check", Value::Null).await;
    super::command_response(&req, result)
}

pub async fn doctor(req: Request, app: Arc<App>) -> Response {
    let result = app.commands.invoke("doctor.run", Value::Null).await;
    super::command_response(&req, result)
}

fn config_view(app: &App) -> Value {
    json!({
        "bind": app.config.bind.to_string(),
        "auth_mode": app.config.auth.mode.as_str(),
        "allowed_origins": app.origins.load().raw_entries(),
        "project_dir": app.project_dir.read().display().to_string(),
        "idempotency_ttl_secs": app.config.idempotency_ttl_secs,
    })
}

pub async fn config_get(req: Request, app: Arc<App>) -> Response {
    envelope::success(&req, json!({"config": config_view(&app)}))
}

/// Applies the runtime-mutable subset: `allowed_origins` and `project_dir`.
/// Anything else in the patch is rejected with the offending field named.
pub async fn config_patch(mut req: Request, app: Arc<App>) -> Response {
    let body = match super::read_json(&mut req).await {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => {
            return envelope::failure(&req, ErrorCode::BadRequest, "patch body must be an object");
        }
        Err(res) => return res,
    };

    for (field, value) in &body {
        match field.as_str() {
            "allowed_origins" => {
                let Some(entries) = value.as_array().map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                }) else {
                    return envelope::failure_with(
                        &req,
                        ErrorCode::BadRequest,
                        "allowed_origins must be an array of strings",
                        Some(json!({"field": "allowed_origins"})),
                        None,
                    );
                };
                app.origins.replace(OriginPolicy::new(&entries));
                tracing::info!(count = entries.len(), "origin allowlist replaced");
            }
            "project_dir" => {
                let Some(dir) = value.as_str() else {
                    return envelope::failure_with(
                        &req,
                        ErrorCode::BadRequest,
                        "project_dir must be a string",
                        Some(json!({"field": "project_dir"})),
                        None,
                    );
                };
                *app.project_dir.write() = std::path::PathBuf::from(dir);
                tracing::info!(project_dir = dir, "project directory updated");
            }
            other => {
                return envelope::failure_with(
                    &req,
                    ErrorCode::BadRequest,
                    "field is not runtime-mutable",
                    Some(json!({"field": other})),
                    None,
                );
            }
        }
    }

    envelope::success(&req, json!({"config": config_view(&app)}))
}
