//! HTTP control plane: the thin command surface over a running node.

use axum::{Json, extract::Extension, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::engine::MembershipView;
use super::service::MembershipService;
use super::types::NodeId;

pub const ENDPOINT_STATUS: &str = "/status";
pub const ENDPOINT_MEMBERS: &str = "/members";
pub const ENDPOINT_SUSPICION: &str = "/suspicion";
pub const ENDPOINT_LEAVE: &str = "/leave";

#[derive(Debug, Serialize, Deserialize)]
pub struct SuspicionRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuspicionResponse {
    pub enabled: bool,
    pub suspects: Vec<NodeId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub success: bool,
    pub error: Option<String>,
}

pub async fn handle_status(
    Extension(service): Extension<Arc<MembershipService>>,
) -> (StatusCode, String) {
    match service.status().await {
        Ok(rendered) => (StatusCode::OK, rendered),
        Err(e) => {
            tracing::error!("Failed to render status: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

pub async fn handle_members(
    Extension(service): Extension<Arc<MembershipService>>,
) -> Result<Json<MembershipView>, StatusCode> {
    service.view().await.map(Json).map_err(|e| {
        tracing::error!("Failed to read membership: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })
}

pub async fn handle_get_suspicion(
    Extension(service): Extension<Arc<MembershipService>>,
) -> Result<Json<SuspicionResponse>, StatusCode> {
    match service.view().await {
        Ok(view) => Ok(Json(SuspicionResponse {
            enabled: view.suspicion_enabled,
            suspects: view.suspects,
        })),
        Err(e) => {
            tracing::error!("Failed to read suspicion state: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

pub async fn handle_set_suspicion(
    Extension(service): Extension<Arc<MembershipService>>,
    Json(req): Json<SuspicionRequest>,
) -> Result<Json<SuspicionResponse>, StatusCode> {
    if let Err(e) = service.set_suspicion(req.enabled).await {
        tracing::error!("Failed to toggle suspicion: {}", e);
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    handle_get_suspicion(Extension(service)).await
}

pub async fn handle_leave(
    Extension(service): Extension<Arc<MembershipService>>,
) -> (StatusCode, Json<LeaveResponse>) {
    match service.leave().await {
        Ok(()) => (
            StatusCode::OK,
            Json(LeaveResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!("Leave request failed: {}", e);
            (
                StatusCode::CONFLICT,
                Json(LeaveResponse {
                    success: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::audit::NullAuditLog;
    use crate::membership::config::MembershipConfig;
    use crate::membership::seed::StaticSeeds;

    async fn start_service() -> Arc<MembershipService> {
        let config = MembershipConfig::with_bind("127.0.0.1:0".parse().unwrap());
        MembershipService::join(config, &StaticSeeds::new(vec![]), Arc::new(NullAuditLog))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_suspicion_toggle_round_trip() {
        let service = start_service().await;

        let Json(enabled) = handle_set_suspicion(
            Extension(service.clone()),
            Json(SuspicionRequest { enabled: true }),
        )
        .await
        .unwrap();
        assert!(enabled.enabled);
        assert!(enabled.suspects.is_empty());

        let Json(current) = handle_get_suspicion(Extension(service.clone()))
            .await
            .unwrap();
        assert!(current.enabled);

        handle_set_suspicion(
            Extension(service.clone()),
            Json(SuspicionRequest { enabled: false }),
        )
        .await
        .unwrap();
        let Json(current) = handle_get_suspicion(Extension(service.clone()))
            .await
            .unwrap();
        assert!(!current.enabled);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_and_members() {
        let service = start_service().await;

        let (code, body) = handle_status(Extension(service.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.contains("(self)"));

        let Json(view) = handle_members(Extension(service.clone())).await.unwrap();
        assert_eq!(view.local, service.local_id);
        assert_eq!(view.members.len(), 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_leave_then_reject_second_leave() {
        let service = start_service().await;

        let (code, Json(response)) = handle_leave(Extension(service.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert!(response.success);
        assert!(response.error.is_none());

        let (code, Json(response)) = handle_leave(Extension(service.clone())).await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert!(!response.success);
        assert!(response.error.is_some());

        let (code, _) = handle_status(Extension(service.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(handle_get_suspicion(Extension(service)).await.is_err());
    }
}
