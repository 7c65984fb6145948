//! HTTP API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! REST routes are nested under `/api/`; the push channel lives at
//! `/ws/notifications`.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;
use crate::api::websocket;
use crate::core_state::CoreState;

/// Build the API router.
pub fn api_router(core: Arc<CoreState>) -> Router {
    build_router(ApiContext::new(core))
}

fn build_router(ctx: ApiContext) -> Router {
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/flows", get(endpoints::flows::list))
        .route("/flows/:flow_id/sessions", post(endpoints::flows::start))
        .route("/sessions/:id", get(endpoints::sessions::snapshot))
        .route("/sessions/:id/messages", post(endpoints::sessions::message))
        .route("/sessions/:id/confirm", post(endpoints::sessions::confirm))
        .route("/quiz/preview", post(endpoints::quiz::preview))
        .route("/quiz/launch", post(endpoints::quiz::launch))
        .route("/jobs/:id", get(endpoints::jobs::detail))
        .route("/notifications", get(endpoints::notifications::list))
        .route(
            "/notifications/:key",
            delete(endpoints::notifications::dismiss),
        )
        .with_state(ctx.clone());

    let ws_routes = Router::new()
        .route("/ws/notifications", get(websocket::ws_upgrade))
        .with_state(ctx);

    Router::new()
        .nest("/api", api)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::core_state::testing;

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(core: &Arc<CoreState>, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = api_router(core.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn start_quiz_setup(core: &Arc<CoreState>) -> String {
        let (status, json) = send(
            core,
            json_request(
                "POST",
                "/api/flows/quiz_setup/sessions",
                serde_json::json!({"userId": "u1", "subjectId": "bio", "docIds": ["d1"]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        json["sessionId"].as_str().unwrap().to_string()
    }

    async fn say(core: &Arc<CoreState>, session_id: &str, text: &str) -> serde_json::Value {
        let (status, json) = send(
            core,
            json_request(
                "POST",
                &format!("/api/sessions/{session_id}/messages"),
                serde_json::json!({ "text": text }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        json
    }

    async fn fill_quiz_setup(core: &Arc<CoreState>) -> String {
        let session_id = start_quiz_setup(core).await;
        say(core, &session_id, "mcq and true/false").await;
        say(core, &session_id, "mixed").await;
        let reply = say(core, &session_id, "15").await;
        assert_eq!(reply["done"], true);
        session_id
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let core = testing::core();
        let (status, json) = send(&core, get_request("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["fallbackEnabled"], false);
    }

    #[tokio::test]
    async fn flows_lists_builtin_flows() {
        let core = testing::core();
        let (_, json) = send(&core, get_request("/api/flows")).await;
        let flows: Vec<&str> = json["flows"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f.as_str().unwrap())
            .collect();
        assert!(flows.contains(&"quiz_setup"));
        assert!(flows.contains(&"highlights"));
    }

    #[tokio::test]
    async fn start_unknown_flow_is_404() {
        let core = testing::core();
        let (status, json) = send(
            &core,
            json_request("POST", "/api/flows/nope/sessions", serde_json::json!({"userId": "u1"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn start_requires_user_id() {
        let core = testing::core();
        let (status, _) = send(
            &core,
            json_request("POST", "/api/flows/quiz_setup/sessions", serde_json::json!({"userId": " "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_returns_greeting_and_first_question() {
        let core = testing::core();
        let (_, json) = send(
            &core,
            json_request("POST", "/api/flows/quiz_setup/sessions", serde_json::json!({"userId": "u1"})),
        )
        .await;
        assert_eq!(json["prompts"][0]["kind"], "greeting");
        assert_eq!(json["prompts"][1]["kind"], "question");
        assert_eq!(json["stage"], "collecting_types");
    }

    #[tokio::test]
    async fn message_to_unknown_session_is_404() {
        let core = testing::core();
        let (status, _) = send(
            &core,
            json_request("POST", "/api/sessions/missing/messages", serde_json::json!({"text": "mcq"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unparseable_answer_returns_clarification() {
        let core = testing::core();
        let session_id = start_quiz_setup(&core).await;
        let reply = say(&core, &session_id, "banana").await;
        assert_eq!(reply["prompts"][0]["kind"], "clarification");
        assert_eq!(reply["stage"], "collecting_types");
        assert_eq!(reply["done"], false);
    }

    #[tokio::test]
    async fn snapshot_reflects_filled_slots() {
        let core = testing::core();
        let session_id = start_quiz_setup(&core).await;
        say(&core, &session_id, "mcq").await;

        let (status, json) = send(&core, get_request(&format!("/api/sessions/{session_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stage"], "collecting_difficulty");
        assert_eq!(json["status"], "in_progress");
        let types = json["slots"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["name"] == "types")
            .unwrap();
        assert_eq!(types["value"]["value"][0], "mcq");
    }

    #[tokio::test]
    async fn confirm_before_summary_is_conflict() {
        let core = testing::core();
        let session_id = start_quiz_setup(&core).await;
        let (status, json) = send(
            &core,
            json_request(
                "POST",
                &format!("/api/sessions/{session_id}/confirm"),
                serde_json::json!({"action": "start"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn confirm_start_launches_job() {
        let core = testing::core();
        let session_id = fill_quiz_setup(&core).await;

        let (status, json) = send(
            &core,
            json_request(
                "POST",
                &format!("/api/sessions/{session_id}/confirm"),
                serde_json::json!({"action": "start"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["outcome"], "launched");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["config"]["total"], 15);
        assert!(core.tracker.record("job-1").is_some());

        let (status, json) = send(&core, get_request("/api/jobs/job-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["state"], "queued");
    }

    #[tokio::test]
    async fn confirm_edit_returns_first_stage() {
        let core = testing::core();
        let session_id = fill_quiz_setup(&core).await;
        let (status, json) = send(
            &core,
            json_request(
                "POST",
                &format!("/api/sessions/{session_id}/confirm"),
                serde_json::json!({"action": "edit"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["outcome"], "editing");
        assert_eq!(json["stage"], "collecting_types");
    }

    #[tokio::test]
    async fn failed_launch_returns_event_for_resubmission() {
        let core = testing::core_with(Arc::new(testing::CountingGenerator::failing()));
        let session_id = fill_quiz_setup(&core).await;

        let (status, json) = send(
            &core,
            json_request(
                "POST",
                &format!("/api/sessions/{session_id}/confirm"),
                serde_json::json!({"action": "start"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["outcome"], "submission_failed");
        assert_eq!(json["notificationKey"], format!("submit:{session_id}"));
        assert_eq!(json["event"]["flowId"], "quiz_setup");

        let (_, list) = send(&core, get_request("/api/notifications")).await;
        assert_eq!(list["notifications"][0]["key"], format!("submit:{session_id}"));
        assert_eq!(list["notifications"][0]["view"]["kind"], "error");

        // Resubmitting the returned event still fails against a dead generator.
        let (status, json) = send(&core, json_request("POST", "/api/quiz/launch", json["event"].clone())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"]["code"], "GENERATOR_UNAVAILABLE");
    }

    #[tokio::test]
    async fn launch_accepts_completed_event() {
        let core = testing::core();
        let event = serde_json::json!({
            "sessionId": "s-9",
            "flowId": "quiz_setup",
            "context": {"userId": "u1", "docIds": ["d1"]},
            "slots": {
                "types": {"kind": "text_set", "value": ["short_answer"]},
                "count": {"kind": "integer", "value": {"value": 4, "min": 1, "max": 50}}
            },
            "completedAt": "2026-01-01T00:00:00Z"
        });
        let (status, json) = send(&core, json_request("POST", "/api/quiz/launch", event)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["config"]["difficulty"], "mixed");
        assert_eq!(json["config"]["total"], 4);
    }

    #[tokio::test]
    async fn launch_rejects_tampered_event() {
        let core = testing::core();
        let event = serde_json::json!({
            "sessionId": "s-9",
            "flowId": "quiz_setup",
            "context": {"userId": "u1"},
            "slots": {
                "types": {"kind": "text_set", "value": ["mcq"]},
                "count": {"kind": "integer", "value": {"value": 100000, "min": 1, "max": 4294967295u32}}
            },
            "completedAt": "2026-01-01T00:00:00Z"
        });
        let (status, json) = send(&core, json_request("POST", "/api/quiz/launch", event)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
        assert!(core.tracker.records().is_empty());
    }

    #[tokio::test]
    async fn preview_computes_distribution() {
        let core = testing::core();
        let (status, json) = send(
            &core,
            json_request(
                "POST",
                "/api/quiz/preview",
                serde_json::json!({"count": 10, "types": ["mcq", "true_false"], "difficulty": "mixed"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let per_type = json["distribution"]["perType"].as_array().unwrap();
        let total: u64 = per_type.iter().map(|t| t["count"].as_u64().unwrap()).sum();
        assert_eq!(total, 10);
        assert_eq!(per_type[0]["count"], 7);
    }

    #[tokio::test]
    async fn preview_rejects_bad_input() {
        let core = testing::core();
        let cases = [
            serde_json::json!({"count": 0, "types": ["mcq"]}),
            serde_json::json!({"count": 51, "types": ["mcq"]}),
            serde_json::json!({"count": 5, "types": []}),
            serde_json::json!({"count": 5, "types": ["essay"]}),
            serde_json::json!({"count": 5, "types": ["mcq"], "difficulty": "brutal"}),
        ];
        for body in cases {
            let (status, json) = send(&core, json_request("POST", "/api/quiz/preview", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["error"]["code"], "BAD_REQUEST");
        }
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let core = testing::core();
        let (status, _) = send(&core, get_request("/api/jobs/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dismiss_notification() {
        let core = testing::core();
        core.notifications.apply(crate::notify::NotificationInput::Status(
            crate::jobs::JobStatus::failed("job-3", "boom"),
        ));

        let req = Request::builder()
            .method("DELETE")
            .uri("/api/notifications/job-3")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&core, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["updates"][0]["type"], "removed");
        assert!(core.notifications.visible().is_empty());

        let req = Request::builder()
            .method("DELETE")
            .uri("/api/notifications/job-3")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&core, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
