use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use proccore::sinks::{IggySinkConfig, IggySpanSink};
use proccore::{data_from_json, DataMap, EngineError, ProcessDescription};
use procruntime::{EngineConfig, ProcessEngine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    engine: Arc<ProcessEngine>,
}

/// Request body for process execution
#[derive(Debug, Default, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Response for process deployment
#[derive(Debug, Serialize)]
struct DeployResponse {
    id: String,
    message: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            violations: Vec::new(),
        }
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "procflow"
    }))
}

/// List deployed processes
#[get("/api/processes")]
async fn list_processes(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let processes: Vec<_> = data
        .engine
        .list()
        .await
        .iter()
        .map(|p| {
            serde_json::json!({
                "id": p.id(),
                "name": p.name(),
                "nodes": p.node_count(),
                "flows": p.flows().len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(processes))
}

/// Load and deploy a process description
#[post("/api/processes")]
async fn deploy_process(
    data: web::Data<AppState>,
    description: web::Json<ProcessDescription>,
) -> ActixResult<impl Responder> {
    let description = description.into_inner();

    let definition = match data.engine.loader().load(&description) {
        Ok(definition) => definition,
        Err(e) => {
            warn!("Rejected process {}: {} violation(s)", e.process_id, e.violations.len());
            return Ok(HttpResponse::BadRequest().json(ErrorResponse {
                error: format!("Invalid process definition '{}'", e.process_id),
                violations: e.violations.iter().map(ToString::to_string).collect(),
            }));
        }
    };

    let definition = data.engine.deploy(definition).await;

    Ok(HttpResponse::Created().json(DeployResponse {
        id: definition.id().to_string(),
        message: "Process deployed successfully".to_string(),
    }))
}

/// Get a deployed process
#[get("/api/processes/{id}")]
async fn get_process(data: web::Data<AppState>, path: web::Path<String>) -> ActixResult<impl Responder> {
    let process_id = path.into_inner();

    match data.engine.definition(&process_id).await {
        Some(definition) => Ok(HttpResponse::Ok().json(definition.as_ref())),
        None => Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Process {} not found",
            process_id
        )))),
    }
}

/// Undeploy a process
#[actix_web::delete("/api/processes/{id}")]
async fn delete_process(data: web::Data<AppState>, path: web::Path<String>) -> ActixResult<impl Responder> {
    let process_id = path.into_inner();

    if data.engine.undeploy(&process_id).await {
        Ok(HttpResponse::Ok().json(serde_json::json!({
            "message": "Process undeployed successfully"
        })))
    } else {
        Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Process {} not found",
            process_id
        ))))
    }
}

/// Execute a deployed process
#[post("/api/processes/{id}/execute")]
async fn execute_process(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: Option<web::Json<ExecuteRequest>>,
) -> ActixResult<impl Responder> {
    let process_id = path.into_inner();
    let request = req.map(web::Json::into_inner).unwrap_or_default();

    let input = match request.data {
        None | Some(serde_json::Value::Null) => DataMap::new(),
        Some(json) => match data_from_json(json) {
            Some(input) => input,
            None => {
                return Ok(HttpResponse::BadRequest().json(ErrorResponse::new("data must be a JSON object")));
            }
        },
    };

    info!("Executing process: {}", process_id);

    match data.engine.execute(&process_id, input).await {
        Ok(response) => {
            info!(
                "Process {} instance {} finished: {}",
                process_id, response.instance_id, response.status
            );
            Ok(HttpResponse::Ok().json(response.report()))
        }
        Err(EngineError::ProcessNotFound(id)) => Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Process {} not found",
            id
        )))),
        Err(e) => {
            error!("Process {} execution failed: {}", process_id, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse::new(e.to_string())))
        }
    }
}

/// Instance summaries from the store
#[get("/api/instances")]
async fn list_instances(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    Ok(HttpResponse::Ok().json(data.engine.store().list().await))
}

#[get("/api/instances/{id}")]
async fn get_instance(data: web::Data<AppState>, path: web::Path<Uuid>) -> ActixResult<impl Responder> {
    let instance_id = path.into_inner();

    match data.engine.store().get(&instance_id).await {
        Some(instance) => Ok(HttpResponse::Ok().json(instance)),
        None => Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Instance {} not found",
            instance_id
        )))),
    }
}

#[actix_web::delete("/api/instances/{id}")]
async fn delete_instance(data: web::Data<AppState>, path: web::Path<Uuid>) -> ActixResult<impl Responder> {
    let instance_id = path.into_inner();

    match data.engine.store().remove(&instance_id).await {
        Some(_) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "message": "Instance removed"
        }))),
        None => Ok(HttpResponse::NotFound().json(ErrorResponse::new(format!(
            "Instance {} not found",
            instance_id
        )))),
    }
}

/// WebSocket endpoint streaming exported spans
#[get("/api/spans")]
async fn websocket_spans(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut spans = data.engine.subscribe_spans();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                span = spans.recv() => {
                    match span {
                        Ok(span) => {
                            if let Ok(json) = serde_json::to_string(&span.export()) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, skipped {} spans", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                // Handle incoming WebSocket messages (ping/pong)
                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
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

/// List registered handlers
#[get("/api/handlers")]
async fn list_handlers(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.engine.registry();

    let handlers: Vec<_> = registry
        .list_handlers()
        .iter()
        .map(|name| {
            let metadata = registry.metadata(name);
            serde_json::json!({
                "name": name,
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(handlers))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting procflow server");

    let config = EngineConfig::from_env()?;
    let engine = ProcessEngine::with_config(prochandlers::standard_registry(), config)?;

    info!(
        "✅ Engine initialized with {} handlers",
        engine.registry().len()
    );

    if let Some(iggy) = IggySinkConfig::from_env() {
        info!("📡 Publishing spans to Iggy {}/{}", iggy.stream_name, iggy.topic_name);
        let sink = IggySpanSink::connect(iggy).await?;
        engine.add_sink(Arc::new(sink)).await;
    }

    let app_state = web::Data::new(AppState {
        engine: Arc::new(engine),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

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
            .service(list_processes)
            .service(deploy_process)
            .service(get_process)
            .service(delete_process)
            .service(execute_process)
            .service(list_instances)
            .service(get_instance)
            .service(delete_instance)
            .service(websocket_spans)
            .service(list_handlers)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
