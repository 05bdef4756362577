use axum::extract::{Path, State};
use axum::response::Response;

use crate::error::AppError;
use crate::features::image::params::{
    DEFAULT_BACKGROUND_COLOR, DEFAULT_FONT_COLOR, sanitize_color,
};
use crate::features::image::resolver::ResolvedImage;
use crate::features::image::response;
use crate::state::AppState;

/// DummyImage 端点固定绘制的文字
const DUMMY_TEXT: &str = "DummyImage";

#[utoipa::path(
    get,
    path = "/dummyimage/{width}/{height}/{bg_color}/{text_color}",
    summary = "合成占位图",
    description = "按路径参数即时合成一张占位图（PNG）。不查资源目录、不写结果缓存，\
                   每次请求都重新渲染。非法尺寸回落为默认值，非法颜色回落为默认色。",
    params(
        ("width" = String, Path, description = "图片宽度（像素）"),
        ("height" = String, Path, description = "图片高度（像素）"),
        ("bg_color" = String, Path, description = "背景色，6 位十六进制"),
        ("text_color" = String, Path, description = "文字颜色，6 位十六进制"),
    ),
    responses(
        (status = 200, description = "PNG 图片", body = Vec<u8>, content_type = "image/png"),
        (status = 500, description = "渲染失败", body = crate::error::ProblemDetails),
    ),
    tag = "Image"
)]
pub async fn dummy_image(
    State(state): State<AppState>,
    Path((width, height, bg_color, text_color)): Path<(String, String, String, String)>,
) -> Result<Response, AppError> {
    let cfg = &state.config.image_service;
    let width = parse_dimension(&width, cfg.default_width, cfg.max_width);
    let height = parse_dimension(&height, cfg.default_height, cfg.max_height);
    let bg = sanitize_color(&bg_color, DEFAULT_BACKGROUND_COLOR);
    let fg = sanitize_color(&text_color, DEFAULT_FONT_COLOR);

    let path = state
        .resolver
        .synthesize_placeholder(width, height, &bg, &fg, DUMMY_TEXT)
        .await?;
    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|e| AppError::Io(format!("读取生成文件 {:?} 元数据失败: {}", path, e)))?;

    let resolved = ResolvedImage {
        size: meta.len(),
        mime: mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string(),
        path,
    };
    response::build(&resolved, false, cfg).await
}

/// DummyImage 端点不做步长规整，只校验与截断。
fn parse_dimension(raw: &str, default: u32, max: u32) -> u32 {
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|v| *v > 0)
        .unwrap_or(default)
        .min(max)
}
