use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dailyreview_core::config::Settings;
use dailyreview_core::error::ReviewError;
use dailyreview_core::pipeline::{Clients, PipelineOptions, ReviewPipeline, RunSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let runner = match Runner::from_settings(&settings) {
        Ok(runner) => Some(Arc::new(runner)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(
                error = %format!("{e:#}"),
                "review clients unavailable; starting in degraded mode"
            );
            None
        }
    };

    let app = router(AppState { runner });

    let port: u16 = std::env::var("FUNCTIONS_CUSTOMHANDLER_PORT")
        .or_else(|_| std::env::var("PORT"))
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "custom handler listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/daily_review", post(daily_review_timer))
        .route("/api/runreview", get(run_review_http).post(run_review_http))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

/// Process-wide collaborators plus the immutable options every invocation runs with.
struct Runner {
    clients: Clients,
    options: PipelineOptions,
    utc_offset_hours: i32,
}

impl Runner {
    fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            clients: Clients::from_settings(settings, None, false)?,
            options: PipelineOptions::from_settings(settings, false)?,
            utc_offset_hours: settings.report_utc_offset_hours,
        })
    }

    async fn run_once(&self, trigger: &'static str) -> anyhow::Result<RunSummary> {
        let invocation_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("invocation", %invocation_id, trigger);
        async {
            let as_of_date = dailyreview_core::time::resolve_as_of_date(
                None,
                chrono::Utc::now(),
                self.utc_offset_hours,
            )?;
            let result = ReviewPipeline::from_clients(&self.clients, &self.options)
                .run(as_of_date)
                .await;
            if let Err(err) = &result {
                sentry_anyhow::capture_anyhow(err);
                tracing::error!(
                    kind = ?ReviewError::kind_of(err),
                    error = %format!("{err:#}"),
                    "daily review failed"
                );
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[derive(Clone)]
struct AppState {
    runner: Option<Arc<Runner>>,
}

/// Timer invocation payload sent by the Functions host. Only the past-due flag is used.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InvokeRequest {
    #[serde(default)]
    data: InvokeData,
}

#[derive(Debug, Default, Deserialize)]
struct InvokeData {
    #[serde(default, rename = "myTimer")]
    my_timer: Option<TimerInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TimerInfo {
    #[serde(default)]
    is_past_due: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InvokeResponse {
    outputs: serde_json::Map<String, serde_json::Value>,
    logs: Vec<String>,
    return_value: Option<serde_json::Value>,
}

impl InvokeResponse {
    fn with_logs(logs: Vec<String>) -> Self {
        Self {
            outputs: serde_json::Map::new(),
            logs,
            return_value: None,
        }
    }
}

async fn daily_review_timer(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let invoke = serde_json::from_slice::<InvokeRequest>(&body).unwrap_or_default();
    if invoke.data.my_timer.map(|t| t.is_past_due).unwrap_or(false) {
        tracing::info!("the timer is past due");
    }

    let Some(runner) = &state.runner else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(InvokeResponse::with_logs(vec![
                "review clients are not configured".to_string(),
            ])),
        );
    };

    match runner.run_once("timer").await {
        Ok(summary) => (
            StatusCode::OK,
            Json(InvokeResponse::with_logs(vec![format!(
                "daily review for {} sent ({} holdings)",
                summary.as_of_date, summary.holdings
            )])),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(InvokeResponse::with_logs(vec![format!(
                "daily review failed: {err:#}"
            )])),
        ),
    }
}

async fn run_review_http(State(state): State<AppState>) -> (StatusCode, String) {
    let Some(runner) = &state.runner else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Review clients are not configured.".to_string(),
        );
    };

    match runner.run_once("http").await {
        Ok(_) => (
            StatusCode::OK,
            "Daily report has been manually triggered.".to_string(),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error while triggering daily report: {err:#}"),
        ),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(settings.run_mode.as_str().into()),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use dailyreview_core::error::Service;
    use dailyreview_core::llm::usage::{Pricing, TokenUsage};
    use dailyreview_core::llm::{json, GenerateInput, Generation, LlmClient};
    use dailyreview_core::notify::{EmailMessage, Notifier, Recipient};
    use dailyreview_core::portfolio::{PortfolioDocument, PortfolioSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    struct StaticSource;

    #[async_trait::async_trait]
    impl PortfolioSource for StaticSource {
        fn describe(&self) -> String {
            "static".to_string()
        }

        async fn fetch(&self) -> anyhow::Result<PortfolioDocument> {
            Ok(PortfolioDocument {
                name: "portfolio.tsv".to_string(),
                content: "symbol\tquantity\nAAPL\t10\nMSFT\t5\n".to_string(),
            })
        }
    }

    struct FixedModel(Option<&'static str>);

    #[async_trait::async_trait]
    impl LlmClient for FixedModel {
        fn provider(&self) -> &'static str {
            "fixed"
        }

        async fn generate_review(&self, input: GenerateInput) -> anyhow::Result<Generation> {
            let Some(text) = self.0 else {
                return Err(ReviewError::external(Service::Model, "http", "status=500").into());
            };
            Ok(Generation {
                review: json::parse_review(text, &input.portfolio)?,
                usage: TokenUsage::default(),
            })
        }
    }

    #[derive(Default)]
    struct CountingNotifier(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Notifier for CountingNotifier {
        fn channel(&self) -> &'static str {
            "counting"
        }

        async fn send(&self, _message: &EmailMessage) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn state(model: Option<&'static str>, sent: Arc<AtomicUsize>) -> AppState {
        let runner = Runner {
            clients: Clients {
                source: Box::new(StaticSource),
                llm: Box::new(FixedModel(model)),
                notifier: Some(Box::new(CountingNotifier(sent))),
            },
            options: PipelineOptions {
                recipients: vec![Recipient::new("me@example.com")],
                run_mode: "Development".to_string(),
                pricing: Pricing {
                    input_per_1k: 0.01,
                    output_per_1k: 0.03,
                },
                focus: "dividends".to_string(),
                new_ideas: 5,
                dry_run: false,
            },
            utc_offset_hours: 0,
        };
        AppState {
            runner: Some(Arc::new(runner)),
        }
    }

    async fn body_text(res: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = router(AppState { runner: None });
        let res = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn http_trigger_runs_the_pipeline() {
        let sent = Arc::new(AtomicUsize::new(0));
        let app = router(state(Some(r#"{"AAPL":"hold","MSFT":"sell"}"#), sent.clone()));

        let res = app
            .oneshot(Request::post("/api/runreview").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_text(res).await, "Daily report has been manually triggered.");
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_trigger_reports_model_failure() {
        let sent = Arc::new(AtomicUsize::new(0));
        let app = router(state(None, sent.clone()));

        let res = app
            .oneshot(Request::get("/api/runreview").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(res).await.starts_with("Error while triggering daily report"));
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timer_trigger_returns_invoke_response() {
        let sent = Arc::new(AtomicUsize::new(0));
        let app = router(state(Some(r#"{"AAPL":"hold","MSFT":"sell"}"#), sent.clone()));

        let payload = serde_json::json!({
            "Data": {"myTimer": {"IsPastDue": true}},
            "Metadata": {}
        });
        let res = app
            .oneshot(
                Request::post("/daily_review")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(res).await).unwrap();
        assert!(body["Outputs"].is_object());
        assert!(body["ReturnValue"].is_null());
        assert!(body["Logs"][0].as_str().unwrap().contains("2 holdings"));
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn degraded_mode_returns_unavailable() {
        let app = router(AppState { runner: None });
        let res = app
            .oneshot(Request::post("/daily_review").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn degraded_mode_rejects_manual_trigger() {
        let app = router(AppState { runner: None });
        let res = app
            .oneshot(Request::get("/api/runreview").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(res).await, "Review clients are not configured.");
    }
}
