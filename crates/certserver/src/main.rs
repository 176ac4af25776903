use actix_cors::Cors;
use actix_web::{
    get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use actix_ws::Message as WsMessage;
use certcore::{OrchestratorError, Value, WorkflowDefinition};
use certruntime::Orchestrator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Request body for workflow execution
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    input: serde_json::Value,
}

/// Structured error per the routing-failure contract
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorBody,
}

impl ErrorResponse {
    fn from(error: &OrchestratorError) -> Self {
        Self {
            success: false,
            error: ErrorBody {
                code: error.code(),
                message: error.to_string(),
            },
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "certserver"
    }))
}

/// List registered workflow definitions
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let workflows = data.orchestrator.list_workflows().await;
    let summaries: Vec<_> = workflows
        .iter()
        .map(|w| {
            serde_json::json!({
                "id": w.id,
                "name": w.name,
                "description": w.description,
                "steps": w.steps.len(),
                "timeout_ms": w.timeout_ms,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(summaries))
}

/// Register a workflow definition
#[post("/api/workflows")]
async fn register_workflow(
    data: web::Data<AppState>,
    definition: web::Json<WorkflowDefinition>,
) -> ActixResult<impl Responder> {
    let definition = definition.into_inner();
    let workflow_id = definition.id.clone();

    info!("registering workflow: {} ({})", definition.name, workflow_id);

    match data.orchestrator.register_workflow(definition).await {
        Ok(()) => Ok(HttpResponse::Created().json(serde_json::json!({
            "id": workflow_id,
            "message": "workflow registered"
        }))),
        Err(e) => Ok(HttpResponse::BadRequest().json(ErrorResponse::from(&e))),
    }
}

/// Get a specific workflow definition
#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    match data.orchestrator.get_workflow(&workflow_id).await {
        Some(definition) => Ok(HttpResponse::Ok().json(definition)),
        None => Ok(HttpResponse::NotFound().json(ErrorResponse::from(
            &OrchestratorError::WorkflowNotFound(workflow_id),
        ))),
    }
}

/// Execute a workflow to a terminal status
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<ExecuteRequest>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    let input = Value::from_json(req.into_inner().input);

    info!("executing workflow: {}", workflow_id);

    match data.orchestrator.execute_workflow(&workflow_id, input).await {
        // Success and failure both come back as the execution record.
        Ok(execution) => Ok(HttpResponse::Ok().json(execution)),
        Err(e) => {
            let mut builder = match e {
                OrchestratorError::WorkflowNotFound(_) => HttpResponse::NotFound(),
                _ => HttpResponse::InternalServerError(),
            };
            Ok(builder.json(ErrorResponse::from(&e)))
        }
    }
}

/// Cancel a running execution
#[post("/api/executions/{id}/cancel")]
async fn cancel_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    let execution_id = path.into_inner();
    let cancelled = data.orchestrator.cancel_execution(execution_id).await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "cancelled": cancelled })))
}

#[get("/api/executions/active")]
async fn active_executions(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.orchestrator.get_active_executions().await))
}

#[get("/api/executions/completed")]
async fn completed_executions(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.orchestrator.get_completed_executions().await))
}

#[get("/api/executions/{id}")]
async fn get_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<impl Responder> {
    match data.orchestrator.get_execution(path.into_inner()).await {
        Some(execution) => Ok(HttpResponse::Ok().json(execution)),
        None => Ok(HttpResponse::NotFound().json(serde_json::json!({
            "success": false,
            "error": { "code": "ExecutionNotFound", "message": "unknown execution id" }
        }))),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    message_type: Option<String>,
    source: Option<String>,
}

/// Retained bus messages, optionally filtered
#[get("/api/messages")]
async fn message_history(
    data: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> ActixResult<impl Responder> {
    let query = query.into_inner();
    let filter = if query.message_type.is_some() || query.source.is_some() {
        Some(certcore::MessagePattern {
            message_type: query.message_type,
            source: query.source,
            ..Default::default()
        })
    } else {
        None
    };
    let history = data.orchestrator.bus().history(filter.as_ref()).await;
    Ok(HttpResponse::Ok().json(history))
}

/// Orchestration statistics
#[get("/api/stats")]
async fn stats(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.orchestrator.get_stats().await))
}

/// Registered workers with their current health
#[get("/api/workers")]
async fn list_workers(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.orchestrator.registry();
    let workers = registry.get_all().await;
    let health = registry.health_check().await;

    let listing: Vec<_> = workers
        .iter()
        .map(|worker| {
            let healthy = health
                .iter()
                .find(|h| h.worker_id == worker.id())
                .map(|h| h.healthy);
            serde_json::json!({
                "id": worker.id(),
                "name": worker.name(),
                "version": worker.version(),
                "capabilities": worker.capabilities(),
                "healthy": healthy,
                "metrics": worker.metrics(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(listing))
}

/// WebSocket endpoint streaming bus lifecycle events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.orchestrator.bus().subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        WsMessage::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        WsMessage::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("starting certification orchestrator server");

    let orchestrator = Arc::new(Orchestrator::new());
    certworkers::register_all(orchestrator.registry()).await;

    info!("runtime initialized with built-in workers");

    let app_state = web::Data::new(AppState {
        orchestrator: Arc::clone(&orchestrator),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_workflows)
            .service(register_workflow)
            .service(get_workflow)
            .service(execute_workflow)
            .service(cancel_execution)
            .service(active_executions)
            .service(completed_executions)
            .service(get_execution)
            .service(message_history)
            .service(stats)
            .service(list_workers)
            .service(websocket_events)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
