//! Authorization stage.
//!
//! Routes declare their required permission at registration; the router
//! stamps it into request extensions and this stage checks it against the
//! caller's role. No claims means the caller came through `local` mode and
//! gets the anonymous role (all reads).

use serde_json::json;

use crate::{
    auth::Claims,
    auth::roles::{RequiredPermission, Role, role_from_claims},
    envelope::{self, ErrorCode},
    middleware::Next,
    types::{Request, Response},
};

pub async fn apply(req: Request, next: Next) -> Response {
    let Some(RequiredPermission(permission)) = req.extensions().get::<RequiredPermission>().copied()
    else {
        return next.run(req).await;
    };

    let role = req
        .extensions()
        .get::<Claims>()
        .map(role_from_claims)
        .unwrap_or(Role::Anonymous);

    if role.allows(permission) {
        next.run(req).await
    } else {
        tracing::debug!(
            role = role.as_str(),
            permission = permission.as_str(),
            path = req.uri().path(),
            "permission denied"
        );
        envelope::failure_with(
            &req,
            ErrorCode::Forbidden,
            "permission denied",
            Some(json!({"required_permission": permission.as_str(), "role": role.as_str()})),
            None,
        )
    }
}
