use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

/// List live media-stream connections.
pub async fn list_sessions(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let summary = state.registry.summary();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active": summary.active,
        "max_sessions": summary.max_sessions,
        "sessions": summary.sessions
    })))
}

/// Look up one live connection by its id.
pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let raw_id = path.into_inner();
    let connection_id = Uuid::parse_str(&raw_id)
        .map_err(|_| AppError::BadRequest(format!("Invalid session id '{}'", raw_id)))?;

    let info = state
        .registry
        .get(&connection_id)
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", connection_id)))?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "session": info
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_list_sessions() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let id = state.registry.register("stereo").unwrap();
        state
            .registry
            .mark_streaming(&id, Some("MZabc".to_string()), None);

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/sessions", web::get().to(list_sessions)),
        )
        .await;

        let req = test::TestRequest::get().uri("/sessions").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["active"], 1);
        assert_eq!(body["max_sessions"], 50);
        assert_eq!(body["sessions"][0]["stream_sid"], "MZabc");
        assert_eq!(body["sessions"][0]["phase"], "streaming");
        assert_eq!(body["sessions"][0]["policy"], "stereo");
    }

    #[actix_web::test]
    async fn test_get_session_by_id() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let id = state.registry.register("sum").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/sessions/{id}", web::get().to(get_session)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/sessions/{}", id))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["session"]["connection_id"], id.to_string());
        assert_eq!(body["session"]["phase"], "awaiting_start");

        let missing = test::TestRequest::get()
            .uri(&format!("/sessions/{}", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, missing).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let malformed = test::TestRequest::get().uri("/sessions/not-a-uuid").to_request();
        let resp = test::call_service(&app, malformed).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
