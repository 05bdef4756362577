use axum::Json;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::config::ImageServiceConfig;
use crate::error::AppError;

use super::resolver::ResolvedImage;

/// 把解析好的图片转成 HTTP 响应。
///
/// `wants_json` 时返回 `{"publicUrl": ...}`，指向静态目录里的生成文件；
/// 否则返回图片二进制，带 Content-Type 与 Content-Length。
pub async fn build(
    resolved: &ResolvedImage,
    wants_json: bool,
    cfg: &ImageServiceConfig,
) -> Result<Response, AppError> {
    if wants_json {
        let url = public_url(resolved, cfg)?;
        return Ok(Json(json!({ "publicUrl": url })).into_response());
    }

    let bytes = tokio::fs::read(&resolved.path)
        .await
        .map_err(|e| AppError::Io(format!("读取生成文件 {:?} 失败: {}", resolved.path, e)))?;

    let mut res = bytes.into_response();
    if let Ok(ct) = HeaderValue::from_str(&resolved.mime) {
        res.headers_mut().insert(header::CONTENT_TYPE, ct);
    }
    res.headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(resolved.size));
    Ok(res)
}

/// 生成文件在静态目录下的公开 URL。
fn public_url(resolved: &ResolvedImage, cfg: &ImageServiceConfig) -> Result<String, AppError> {
    let file_name = resolved
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            AppError::Internal(format!("生成文件路径异常: {:?}", resolved.path))
        })?;
    Ok(format!(
        "{}/{}",
        cfg.public_base_url.trim_end_matches('/'),
        file_name
    ))
}
