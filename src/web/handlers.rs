//! HTTP request handlers.

use super::AppState;
use crate::db::{AddMonitorError, EpochMillis, MonitorRequest, MonitorStatus};
use crate::engine::{CycleError, CycleReport};

use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::{header, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Json, Response},
    Form,
};
use chrono::DateTime;

// ============================================================================
// Templates (simple string replacement)
// ============================================================================

const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");
const HOME_TEMPLATE: &str = include_str!("templates/home.html");
const STATUS_TEMPLATE: &str = include_str!("templates/status.html");
const ADD_MONITOR_TEMPLATE: &str = include_str!("templates/add_monitor.html");

fn render_page(title: &str, content: &str) -> String {
    LAYOUT_TEMPLATE
        .replace("{{title}}", title)
        .replace("{{content}}", content)
}

/// Escape text for safe inclusion in HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `dd/mm/YYYY HH:MM` in UTC, or `-` when unset.
pub fn format_status_time(at: Option<EpochMillis>) -> String {
    at.and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

// ============================================================================
// Pages
// ============================================================================

pub async fn handle_home(State(state): State<AppState>) -> impl IntoResponse {
    let count = match state.coordinator.registry().load() {
        Ok(snapshot) => snapshot.monitors.len().to_string(),
        Err(e) => {
            tracing::error!("Web: failed to load monitors: {}", e);
            "?".to_string()
        }
    };
    let content = HOME_TEMPLATE.replace("{{monitor_count}}", &count);
    Html(render_page("pulsewatch", &content))
}

fn status_row(status: &MonitorStatus, frequency: Option<u64>) -> String {
    let (class, label) = if status.is_failing() {
        ("down", "DOWN")
    } else if status.is_healthy() {
        ("up", "UP")
    } else {
        ("pending", "PENDING")
    };
    let frequency = frequency
        .map(|f| format!("{}s", f))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "        <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr>",
        escape_html(&status.url),
        format_status_time(status.last_success),
        format_status_time(status.last_failure),
        frequency,
        class,
        label
    )
}

pub async fn handle_status_page(State(state): State<AppState>) -> Response {
    let status = match state.coordinator.status_snapshot() {
        Ok(Some(status)) => status,
        Ok(None) => {
            return Html(render_page(
                "Status",
                "<p>No status found, try again soon</p>",
            ))
            .into_response()
        }
        Err(e) => {
            tracing::error!("Web: failed to load status: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    // frequency column only
    let snapshot = state.coordinator.registry().load().unwrap_or_default();

    let mut rows = status
        .iter()
        .map(|s| status_row(s, snapshot.find(&s.url).map(|m| m.frequency_secs)))
        .collect::<Vec<_>>();
    // added since the last cycle
    for monitor in &snapshot.monitors {
        if let Some(url) = monitor.url().filter(|url| status.get(url).is_none()) {
            rows.push(status_row(&MonitorStatus::new(url), Some(monitor.frequency_secs)));
        }
    }
    let rows = if rows.is_empty() {
        "        <tr><td colspan=\"5\">No monitors configured</td></tr>".to_string()
    } else {
        rows.join("\n")
    };

    let content = STATUS_TEMPLATE.replace("{{rows}}", &rows);
    Html(render_page("Status", &content)).into_response()
}

pub async fn handle_add_monitor_form(State(state): State<AppState>) -> impl IntoResponse {
    let content = ADD_MONITOR_TEMPLATE.replace(
        "{{min_frequency}}",
        &state.config.min_frequency_secs.to_string(),
    );
    Html(render_page("Add monitor", &content))
}

// ============================================================================
// API: Monitors
// ============================================================================

/// How an add-monitor request was encoded; the response mirrors it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Form,
    Json,
}

/// Add-monitor input taken from a urlencoded form, a multipart form or a JSON body.
#[derive(Debug)]
pub struct MonitorInput {
    pub format: InputFormat,
    pub request: MonitorRequest,
}

impl<S> FromRequest<S> for MonitorInput
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let Json(request) = Json::<MonitorRequest>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Self {
                format: InputFormat::Json,
                request,
            })
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(request) = Form::<MonitorRequest>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Self {
                format: InputFormat::Form,
                request,
            })
        } else if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(Self {
                format: InputFormat::Form,
                request: read_multipart(multipart).await?,
            })
        } else {
            Err((
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!(
                    "Unsupported content type {:?}, expected application/json, application/x-www-form-urlencoded or multipart/form-data",
                    content_type
                ),
            )
                .into_response())
        }
    }
}

/// Collect the add-monitor fields from a multipart body; unknown fields are ignored.
async fn read_multipart(mut multipart: Multipart) -> Result<MonitorRequest, Response> {
    let mut request = MonitorRequest::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(IntoResponse::into_response)?
    {
        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await.map_err(IntoResponse::into_response)?;
        match name.as_str() {
            "url_to_monitor" => request.url_to_monitor = Some(value),
            "frequency" => {
                request.frequency = Some(value.trim().to_string()).filter(|v| !v.is_empty())
            }
            "alert-email" => request.alert_email = Some(value),
            _ => {}
        }
    }
    Ok(request)
}

pub async fn handle_add_monitor(State(state): State<AppState>, input: MonitorInput) -> Response {
    let result = state
        .coordinator
        .registry()
        .add_monitor(input.request, state.config.min_frequency_secs);

    match (result, input.format) {
        (Ok(config), InputFormat::Json) => Json(config).into_response(),
        (Ok(config), InputFormat::Form) => {
            let content = format!(
                "<p>Now monitoring <strong>{}</strong> every {} seconds. Alerts go to {}.</p>\n<p><a href=\"/ui/v1/addMonitorForm\">Add another</a></p>",
                escape_html(config.url().unwrap_or_default()),
                config.frequency_secs,
                escape_html(&config.alert_email)
            );
            Html(render_page("Monitor saved", &content)).into_response()
        }
        (Err(AddMonitorError::Invalid(e)), InputFormat::Json) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
        (Err(AddMonitorError::Invalid(e)), InputFormat::Form) => {
            let content = format!(
                "<p class=\"error\">{}</p>\n<p><a href=\"/ui/v1/addMonitorForm\">Back to the form</a></p>",
                escape_html(&e.to_string())
            );
            (
                StatusCode::BAD_REQUEST,
                Html(render_page("Monitor not saved", &content)),
            )
                .into_response()
        }
        (Err(AddMonitorError::Store(e)), _) => {
            tracing::error!("Web: failed to store monitor: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn handle_list_monitors(State(state): State<AppState>) -> Response {
    match state.coordinator.registry().load() {
        Ok(snapshot) => Json(snapshot.monitors).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Status and cycles
// ============================================================================

pub async fn handle_status_json(State(state): State<AppState>) -> Response {
    match state.coordinator.status_snapshot() {
        Ok(Some(status)) => Json(status).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "No status found, try again soon").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn summary_response(result: Result<CycleReport, CycleError>) -> Response {
    match result {
        Ok(report) => report.summary().into_response(),
        Err(e) => {
            tracing::error!("Web: triggered run failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn handle_cron_trigger(State(state): State<AppState>) -> Response {
    tracing::info!("Web: cycle triggered over HTTP");
    summary_response(state.coordinator.run_cycle_now().await)
}

/// Probe due monitors without sending any alert.
pub async fn handle_check_urls(State(state): State<AppState>) -> Response {
    tracing::info!("Web: checks triggered over HTTP");
    summary_response(state.coordinator.run_checks_now().await)
}

pub async fn handle_not_found(method: Method, uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        format!("URL {} not recognised for request type {}", uri, method),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::db::Store;
    use crate::email::{Emailer, LogEmailer};
    use crate::engine::{Coordinator, EngineSettings};
    use crate::test_helpers::{never_shutdown, FailingStore, RecordingEmailer, ScriptedProber};

    use axum::body::Body;
    use std::sync::Arc;
    use tokio::sync::watch;

    fn state_with(
        store: Arc<dyn crate::db::KeyValueStore>,
        emailer: Arc<dyn Emailer>,
    ) -> (AppState, watch::Sender<bool>) {
        let (tx, rx) = never_shutdown();
        let coordinator = Coordinator::new(
            store,
            Arc::new(ScriptedProber::new().status("https://a.example", 200)),
            emailer,
            EngineSettings::default(),
            rx,
        );
        let state = AppState {
            config: ServerConfig::default(),
            coordinator: Arc::new(coordinator),
        };
        (state, tx)
    }

    fn state() -> (AppState, watch::Sender<bool>) {
        state_with(Arc::new(Store::new(":memory:").unwrap()), Arc::new(LogEmailer))
    }

    fn post(content_type: &str, body: &'static str) -> Request {
        axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/v1/addmonitor")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_format_status_time() {
        assert_eq!(format_status_time(Some(1_634_243_688_666)), "14/10/2021 20:34");
        assert_eq!(format_status_time(None), "-");
    }

    #[tokio::test]
    async fn test_extract_form() {
        let input = MonitorInput::from_request(
            post(
                "application/x-www-form-urlencoded",
                "url_to_monitor=https%3A%2F%2Fa.example&frequency=120&alert-email=ops%40example.com",
            ),
            &(),
        )
        .await
        .unwrap();

        assert_eq!(input.format, InputFormat::Form);
        assert_eq!(input.request.url_to_monitor.as_deref(), Some("https://a.example"));
        assert_eq!(input.request.frequency.as_deref(), Some("120"));
        assert_eq!(input.request.alert_email.as_deref(), Some("ops@example.com"));
    }

    #[tokio::test]
    async fn test_extract_json_with_numeric_frequency() {
        let input = MonitorInput::from_request(
            post(
                "application/json; charset=utf-8",
                r#"{"url_to_monitor":"https://a.example","frequency":90,"alert-email":"ops@example.com"}"#,
            ),
            &(),
        )
        .await
        .unwrap();

        assert_eq!(input.format, InputFormat::Json);
        assert_eq!(input.request.frequency.as_deref(), Some("90"));
    }

    #[tokio::test]
    async fn test_extract_multipart_form() {
        let body = "--XB\r\n\
Content-Disposition: form-data; name=\"url_to_monitor\"\r\n\r\n\
https://a.example\r\n\
--XB\r\n\
Content-Disposition: form-data; name=\"frequency\"\r\n\r\n\
120\r\n\
--XB\r\n\
Content-Disposition: form-data; name=\"alert-email\"\r\n\r\n\
ops@example.com\r\n\
--XB--\r\n";

        let input = MonitorInput::from_request(post("multipart/form-data; boundary=XB", body), &())
            .await
            .unwrap();

        assert_eq!(input.format, InputFormat::Form);
        assert_eq!(input.request.url_to_monitor.as_deref(), Some("https://a.example"));
        assert_eq!(input.request.frequency.as_deref(), Some("120"));
        assert_eq!(input.request.alert_email.as_deref(), Some("ops@example.com"));
    }

    #[tokio::test]
    async fn test_extract_rejects_other_content_types() {
        let rejection = MonitorInput::from_request(post("text/plain", "hello"), &())
            .await
            .unwrap_err();
        assert_eq!(rejection.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_add_monitor_json_and_list() {
        let (state, _tx) = state();
        let input = MonitorInput {
            format: InputFormat::Json,
            request: MonitorRequest {
                url_to_monitor: Some("https://a.example".to_string()),
                frequency: Some("60".to_string()),
                alert_email: Some("ops@example.com".to_string()),
            },
        };

        let response = handle_add_monitor(State(state.clone()), input).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains(r#""url_to_monitor":"https://a.example""#));

        let listed = body_text(handle_list_monitors(State(state)).await).await;
        assert!(listed.contains("ops@example.com"));
    }

    #[tokio::test]
    async fn test_add_monitor_form_validation_error() {
        let (state, _tx) = state();
        let input = MonitorInput {
            format: InputFormat::Form,
            request: MonitorRequest {
                url_to_monitor: Some("https://a.example".to_string()),
                frequency: Some("5".to_string()),
                alert_email: Some("ops@example.com".to_string()),
            },
        };

        let response = handle_add_monitor(State(state), input).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("at least 60 seconds"));
    }

    #[tokio::test]
    async fn test_status_before_and_after_cycle() {
        let (state, _tx) = state();

        let page = body_text(handle_status_page(State(state.clone())).await).await;
        assert!(page.contains("No status found, try again soon"));
        assert_eq!(
            handle_status_json(State(state.clone())).await.status(),
            StatusCode::NOT_FOUND
        );

        state
            .coordinator
            .registry()
            .add_monitor(
                MonitorRequest {
                    url_to_monitor: Some("https://a.example".to_string()),
                    frequency: Some("60".to_string()),
                    alert_email: Some("ops@example.com".to_string()),
                },
                60,
            )
            .unwrap();
        let summary = body_text(handle_cron_trigger(State(state.clone())).await).await;
        assert_eq!(summary, "https://a.example OK");

        let page = body_text(handle_status_page(State(state.clone())).await).await;
        assert!(page.contains("https://a.example"));
        assert!(page.contains("UP"));
        assert!(page.contains("60s"));
        assert_eq!(
            handle_status_json(State(state)).await.status(),
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_check_urls_sends_no_email() {
        let emailer = Arc::new(RecordingEmailer::new());
        let (state, _tx) = state_with(Arc::new(Store::new(":memory:").unwrap()), emailer.clone());
        state
            .coordinator
            .registry()
            .add_monitor(
                MonitorRequest {
                    url_to_monitor: Some("https://b.example".to_string()),
                    frequency: Some("60".to_string()),
                    alert_email: Some("ops@example.com".to_string()),
                },
                60,
            )
            .unwrap();

        let response = handle_check_urls(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.starts_with("https://b.example BAD"));
        assert!(emailer.sent().is_empty());

        let status = state.coordinator.status_snapshot().unwrap().unwrap();
        assert!(status.get("https://b.example").unwrap().is_failing());
    }

    #[tokio::test]
    async fn test_status_page_lists_monitors_added_since_last_cycle() {
        let (state, _tx) = state();
        let summary = body_text(handle_cron_trigger(State(state.clone())).await).await;
        assert_eq!(summary, "No monitors configured");

        state
            .coordinator
            .registry()
            .add_monitor(
                MonitorRequest {
                    url_to_monitor: Some("https://new.example".to_string()),
                    frequency: Some("300".to_string()),
                    alert_email: Some("ops@example.com".to_string()),
                },
                60,
            )
            .unwrap();

        let page = body_text(handle_status_page(State(state)).await).await;
        assert!(page.contains("https://new.example"));
        assert!(page.contains("300s"));
        assert!(page.contains("PENDING"));
    }

    #[tokio::test]
    async fn test_cron_trigger_reports_store_failure() {
        let (state, _tx) = state_with(Arc::new(FailingStore), Arc::new(LogEmailer));
        let response = handle_cron_trigger(State(state)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_not_found_message() {
        let response = handle_not_found(Method::DELETE, Uri::from_static("/nope"))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_text(response).await,
            "URL /nope not recognised for request type DELETE"
        );
    }
}
