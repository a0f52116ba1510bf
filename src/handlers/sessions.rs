//! Session, pane and pane-stream endpoints.
//!
//! Session and pane lifecycle is delegated wholesale to the command layer;
//! this module owns parameter plumbing, the envelope, and the pane-stream
//! collector lifecycle.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::{
    app::App,
    bus::Event,
    envelope::{self, ErrorCode},
    types::{Request, Response},
};

pub async fn list(req: Request, app: Arc<App>) -> Response {
    let result = app.commands.invoke("sessions.list", Value::Null).await;
    super::command_response(&req, result)
}

pub async fn create(mut req: Request, app: Arc<App>) -> Response {
    let body = match super::read_json(&mut req).await {
        Ok(body) => body,
        Err(res) => return res,
    };

    match app.commands.invoke("sessions.create", body).await {
        Ok(result) => {
            let session = result
                .get("session")
                .and_then(|s| s.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string);
            app.bus
                .emit(Event::new("session_created", session, result.clone()))
                .await;
            envelope::success_with_status(&req, http::StatusCode::CREATED, result)
        }
        Err(err) => super::command_failure(&req, err),
    }
}

pub async fn get(req: Request, app: Arc<App>) -> Response {
    let Some(id) = super::path_param(&req, "id") else {
        return envelope::failure(&req, ErrorCode::BadRequest, "missing session id");
    };
    let result = app
        .commands
        .invoke("sessions.get", json!({"name": id}))
        .await;
    super::command_response(&req, result)
}

pub async fn delete(req: Request, app: Arc<App>) -> Response {
    let Some(id) = super::path_param(&req, "id") else {
        return envelope::failure(&req, ErrorCode::BadRequest, "missing session id");
    };
    match app
        .commands
        .invoke("sessions.delete", json!({"name": id.clone()}))
        .await
    {
        Ok(result) => {
            app.bus
                .emit(Event::new("session_closed", Some(id), result.clone()))
                .await;
            envelope::success(&req, result)
        }
        Err(err) => super::command_failure(&req, err),
    }
}

pub async fn panes(req: Request, app: Arc<App>) -> Response {
    let Some(id) = super::path_param(&req, "id") else {
        return envelope::failure(&req, ErrorCode::BadRequest, "missing session id");
    };
    let result = app
        .commands
        .invoke("panes.list", json!({"session": id}))
        .await;
    super::command_response(&req, result)
}

fn stream_params(req: &Request) -> Option<(String, String)> {
    Some((
        super::path_param(req, "id")?,
        super::path_param(req, "index")?,
    ))
}

/// `POST …/stream` — start publishing pane output under `<session>:<pane>`.
pub async fn stream_start(req: Request, app: Arc<App>) -> Response {
    let Some((session, pane)) = stream_params(&req) else {
        return envelope::failure(&req, ErrorCode::BadRequest, "missing session or pane");
    };

    if !app.streams.start(&session, &pane) {
        return envelope::failure_with(
            &req,
            ErrorCode::Conflict,
            "stream already enabled",
            Some(json!({"session": session, "pane": pane})),
            None,
        );
    }

    envelope::success(
        &req,
        json!({
            "streaming": true,
            "topic": format!("{session}:{pane}"),
        }),
    )
}

/// `DELETE …/stream` — stop the collector.
pub async fn stream_stop(req: Request, app: Arc<App>) -> Response {
    let Some((session, pane)) = stream_params(&req) else {
        return envelope::failure(&req, ErrorCode::BadRequest, "missing session or pane");
    };

    if !app.streams.stop(&session, &pane) {
        return envelope::failure(&req, ErrorCode::NotFound, "no active stream for this pane");
    }

    envelope::success(&req, json!({"streaming": false}))
}
