use axum::http::StatusCode;
use axum::response::Json;
use serde_json::json;

#[utoipa::path(
    get,
    path = "/health",
    summary = "健康检查",
    description = "用于探活的健康检查端点，返回服务状态与版本信息。",
    responses((status = 200, description = "服务健康", body = serde_json::Value)),
    tag = "Health"
)]
pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "image-on-demand-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
