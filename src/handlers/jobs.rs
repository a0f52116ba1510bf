//! Async job endpoints.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::{
    app::App,
    envelope::{self, ErrorCode},
    jobs::{CancelOutcome, VALID_JOB_TYPES, spawn_executor},
    types::{Request, Response},
};

/// `POST /api/v1/jobs` — accept a job and start its executor. Honors
/// `Idempotency-Key` through the route-level replay middleware.
pub async fn create(mut req: Request, app: Arc<App>) -> Response {
    let body = match super::read_json(&mut req).await {
        Ok(body) => body,
        Err(res) => return res,
    };

    let Some(job_type) = body.get("type").and_then(Value::as_str) else {
        return envelope::failure_with(
            &req,
            ErrorCode::BadRequest,
            "job type is required",
            Some(json!({"field": "type"})),
            None,
        );
    };

    match app.jobs.create(job_type) {
        Ok(job) => {
            spawn_executor(
                app.jobs.clone(),
                app.commands.clone(),
                app.bus.clone(),
                job.clone(),
            );
            envelope::success_with_status(
                &req,
                http::StatusCode::ACCEPTED,
                json!({"job": job}),
            )
        }
        Err(err) => envelope::failure_with(
            &req,
            ErrorCode::BadRequest,
            &err.to_string(),
            None,
            Some(json!({"valid_types": VALID_JOB_TYPES})),
        ),
    }
}

pub async fn list(req: Request, app: Arc<App>) -> Response {
    let jobs = app.jobs.list();
    let count = jobs.len();
    envelope::success(&req, json!({"jobs": jobs, "count": count}))
}

pub async fn get(req: Request, app: Arc<App>) -> Response {
    let Some(id) = super::path_param(&req, "id") else {
        return envelope::failure(&req, ErrorCode::BadRequest, "missing job id");
    };
    match app.jobs.get(&id) {
        Some(job) => envelope::success(&req, json!({"job": job})),
        None => envelope::failure(&req, ErrorCode::NotFound, "job not found"),
    }
}

/// `DELETE /api/v1/jobs/{id}` — cancel. Terminal jobs answer 409 with the
/// current status in details.
pub async fn cancel(mut req: Request, app: Arc<App>) -> Response {
    let Some(id) = super::path_param(&req, "id") else {
        return envelope::failure(&req, ErrorCode::BadRequest, "missing job id");
    };

    let message = match super::read_json(&mut req).await {
        Ok(body) => body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("cancelled by caller")
            .to_string(),
        Err(res) => return res,
    };

    match app.jobs.cancel(&id, &message) {
        CancelOutcome::NotFound => envelope::failure(&req, ErrorCode::NotFound, "job not found"),
        CancelOutcome::Conflict(status) => envelope::failure_with(
            &req,
            ErrorCode::Conflict,
            "job already finished",
            Some(json!({"status": status.as_str()})),
            None,
        ),
        CancelOutcome::Cancelled(job) => {
            app.bus
                .emit(crate::bus::Event::new(
                    "job_status",
                    None,
                    json!({
                        "job_id": job.id.clone(),
                        "status": job.status.as_str(),
                    }),
                ))
                .await;
            envelope::success(&req, json!({"job": job}))
        }
    }
}
