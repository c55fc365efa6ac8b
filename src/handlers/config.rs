use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

/// Apply a partial JSON update.
///
/// Audio and sink changes reach media streams that connect afterwards; calls
/// already in progress keep the settings they started with.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> AppResult<HttpResponse> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut updated = state.get_config();
    updated
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(updated.clone())
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    tracing::info!(
        mixing_policy = ?updated.audio.mixing_policy,
        sink = ?updated.sink.kind,
        max_sessions = updated.performance.max_concurrent_sessions,
        "Configuration updated"
    );

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": updated
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{http::StatusCode, test, App};

    fn app_state() -> web::Data<AppState> {
        web::Data::new(AppState::new(AppConfig::default()))
    }

    #[actix_web::test]
    async fn test_get_config_returns_current_values() {
        let app = test::init_service(
            App::new()
                .app_data(app_state())
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["audio"]["sample_rate"], 8000);
        assert_eq!(body["config"]["sink"]["kind"], "discard");
    }

    #[actix_web::test]
    async fn test_update_config_applies_partial_change() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"audio": {"mixing_policy": "stereo", "channels": 2}}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.get_config().audio.channels, 2);
    }

    #[actix_web::test]
    async fn test_invalid_update_leaves_config_untouched() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"sink": {"kind": "forward"}}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_config().sink.kind, crate::config::SinkKind::Discard);
    }

    #[actix_web::test]
    async fn test_oversized_chunk_update_is_rejected() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"audio": {"frames_per_chunk": 9_223_372_036_854_775_808u64}}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_config().audio.chunk_bytes(), 320);
        assert!(state.get_config().audio.session_settings().is_ok());
    }
}
