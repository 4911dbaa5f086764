//! Route handlers for the admin HTTP surface (§6).
//!
//! Each handler takes `State(Arc<Orchestrator>)` directly — unlike the
//! teacher's `RuntimeApiProvider` trait indirection, nothing here needs a
//! second implementation to swap in for tests: `Orchestrator` is already
//! buildable from an in-memory `Store` and a mock `CapabilitySet`.

use std::sync::Arc;

use axum::extract::{Json, State};
use axum::http::StatusCode;

use crate::api::types::{
    CadenceStatusResponse, EligibilityReasonDto, ErrorResponse, GenerateEpisodeRequest,
    GenerateEpisodeResponse, GroupCadenceStatus, HealthResponse, OverallHealth,
    ProductionActionResponse, ProductionStatusResponse, QueueStatusResponse,
    ReviewerConfigResponse, UpdateReviewerConfigRequest,
};
use crate::error::OrchestratorError;
use crate::Orchestrator;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn error_response(err: OrchestratorError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err.kind() {
        crate::error::ErrorKind::Capacity => StatusCode::CONFLICT,
        crate::error::ErrorKind::Semantic => StatusCode::UNPROCESSABLE_ENTITY,
        crate::error::ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        crate::error::ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorResponse {
        error: err.to_string(),
        code: err.reason_code().to_string(),
    };
    (status, Json(body))
}

pub async fn generate_episode(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<GenerateEpisodeRequest>,
) -> ApiResult<GenerateEpisodeResponse> {
    let episode_id = orchestrator
        .generate_episode(request.group_id, request.force)
        .await
        .map_err(error_response)?;
    Ok(Json(GenerateEpisodeResponse {
        episode_id,
        status: "accepted".to_string(),
    }))
}

pub async fn cadence_status(State(orchestrator): State<Arc<Orchestrator>>) -> ApiResult<CadenceStatusResponse> {
    let statuses = orchestrator.cadence_status().await.map_err(error_response)?;
    let groups = statuses
        .into_iter()
        .map(|(group, reason)| GroupCadenceStatus {
            group_id: group.id,
            group_name: group.name,
            eligible: reason == crate::cadence::EligibilityReason::Eligible,
            reason: EligibilityReasonDto::from(reason),
            last_episode_at: group.last_episode_at,
        })
        .collect();
    Ok(Json(CadenceStatusResponse { groups }))
}

pub async fn get_reviewer_config(State(orchestrator): State<Arc<Orchestrator>>) -> Json<ReviewerConfigResponse> {
    let config = orchestrator.reviewer_config();
    Json(ReviewerConfigResponse {
        light_conf_threshold: config.light_conf_threshold,
        heavy_conf_threshold: config.heavy_conf_threshold,
        pause_backoff_secs: config.pause_backoff.as_secs(),
    })
}

pub async fn put_reviewer_config(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<UpdateReviewerConfigRequest>,
) -> ApiResult<ReviewerConfigResponse> {
    for (label, value) in [
        ("light_conf_threshold", request.light_conf_threshold),
        ("heavy_conf_threshold", request.heavy_conf_threshold),
    ] {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: format!("{label} must be between 0.0 and 1.0"),
                        code: "invalid_value".to_string(),
                    }),
                ));
            }
        }
    }

    let config = orchestrator.update_reviewer_config(
        request.light_conf_threshold,
        request.heavy_conf_threshold,
        request.pause_backoff_secs,
    );
    Ok(Json(ReviewerConfigResponse {
        light_conf_threshold: config.light_conf_threshold,
        heavy_conf_threshold: config.heavy_conf_threshold,
        pause_backoff_secs: config.pause_backoff.as_secs(),
    }))
}

pub async fn pause_production(State(orchestrator): State<Arc<Orchestrator>>) -> ApiResult<ProductionActionResponse> {
    orchestrator.pause_production().await.map_err(error_response)?;
    Ok(Json(ProductionActionResponse { paused: true }))
}

pub async fn resume_production(State(orchestrator): State<Arc<Orchestrator>>) -> ApiResult<ProductionActionResponse> {
    orchestrator.resume_production().await.map_err(error_response)?;
    Ok(Json(ProductionActionResponse { paused: false }))
}

pub async fn production_status(State(orchestrator): State<Arc<Orchestrator>>) -> Json<ProductionStatusResponse> {
    let (any_lease_active, active_lease_count) = orchestrator.production_status();
    Json(ProductionStatusResponse {
        any_lease_active,
        active_lease_count,
    })
}

pub async fn queue_status(State(orchestrator): State<Arc<Orchestrator>>) -> Json<QueueStatusResponse> {
    let (depth, dead_letter_count) = orchestrator.queue_status();
    Json(QueueStatusResponse { depth, dead_letter_count })
}

pub async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> (StatusCode, Json<HealthResponse>) {
    let (store_ok, capabilities) = orchestrator.health_snapshot().await;
    let all_healthy = store_ok && capabilities.values().all(|ok| *ok);
    let status = if all_healthy { OverallHealth::Healthy } else { OverallHealth::Degraded };
    let http_status = if all_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        http_status,
        Json(HealthResponse {
            status,
            store: store_ok,
            capabilities,
        }),
    )
}

pub async fn metrics(State(orchestrator): State<Arc<Orchestrator>>) -> String {
    orchestrator.metrics.render_prometheus()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::config::OrchestratorConfig;
    use crate::store::SqliteStore;
    use crate::types::{CadenceBucket, Group, GroupId};
    use std::convert::identity;

    async fn setup() -> Arc<Orchestrator> {
        let store: Arc<dyn crate::store::Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let config = OrchestratorConfig::default();
        let capabilities = Arc::new(CapabilitySet::mock());
        Orchestrator::new(config, store, capabilities)
    }

    #[tokio::test]
    async fn generate_episode_rejects_group_with_no_ready_collection() {
        let orchestrator = setup().await;
        let group = Group {
            id: GroupId::new(),
            name: "Weekly Roundup".to_string(),
            presenter_ids: vec!["p1".to_string()],
            writer_id: "w1".to_string(),
            feed_ids: vec![],
            min_articles: 3,
            cadence_bucket: CadenceBucket::Low,
            last_episode_at: None,
            tag_filter: vec![],
        };
        orchestrator.store.upsert_group(&group).await.unwrap();

        let response = generate_episode(
            State(orchestrator),
            Json(GenerateEpisodeRequest { group_id: group.id, force: false }),
        )
        .await;

        assert!(response.is_err());
    }

    #[tokio::test]
    async fn get_then_put_reviewer_config_round_trips() {
        let orchestrator = setup().await;
        let before = get_reviewer_config(State(orchestrator.clone())).await.0;
        assert!((before.light_conf_threshold - 0.75).abs() < f64::EPSILON);

        let updated = put_reviewer_config(
            State(orchestrator.clone()),
            Json(UpdateReviewerConfigRequest {
                light_conf_threshold: Some(0.6),
                heavy_conf_threshold: None,
                pause_backoff_secs: None,
            }),
        )
        .await
        .unwrap()
        .0;

        assert!((updated.light_conf_threshold - 0.6).abs() < f64::EPSILON);
        assert!((updated.heavy_conf_threshold - before.heavy_conf_threshold).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn put_reviewer_config_rejects_out_of_range_threshold() {
        let orchestrator = setup().await;
        let response = put_reviewer_config(
            State(orchestrator),
            Json(UpdateReviewerConfigRequest {
                light_conf_threshold: Some(1.5),
                heavy_conf_threshold: None,
                pause_backoff_secs: None,
            }),
        )
        .await;

        assert!(response.is_err());
    }

    #[tokio::test]
    async fn pause_then_resume_production_round_trips() {
        let orchestrator = setup().await;
        pause_production(State(orchestrator.clone())).await.unwrap();
        let status = production_status(State(orchestrator.clone())).await.0;
        assert!(status.any_lease_active);

        resume_production(State(orchestrator.clone())).await.unwrap();
        let status = production_status(State(orchestrator)).await.0;
        assert!(!status.any_lease_active);
    }

    #[tokio::test]
    async fn health_reports_ok_with_mock_capabilities() {
        let orchestrator = setup().await;
        let (status, Json(body)) = health(State(orchestrator)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, OverallHealth::Healthy);
        assert!(body.capabilities.values().all(|ok| *ok));
    }

    #[tokio::test]
    async fn metrics_renders_prometheus_text() {
        let orchestrator = setup().await;
        let body = metrics(State(orchestrator)).await;
        assert!(body.contains("orchestrator_articles_ingested_total"));
    }
}
