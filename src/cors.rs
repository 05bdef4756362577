use axum::http::{HeaderValue, Method, header::HeaderName};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::CorsConfig;

/// 根据配置构建 CORS 中间件。
///
/// 图片服务的典型消费方是其他站点的 `<img>` / fetch，因此保留可配置的
/// CORS 层；默认关闭，启用但配置非法时拒绝启用并记录日志。
pub fn build_cors_layer(cors: &CorsConfig) -> Option<CorsLayer> {
    if !cors.enabled {
        return None;
    }

    let (any_origin, origins) = split_wildcard(&cors.allowed_origins, |v| {
        HeaderValue::from_str(v)
            .map_err(|_| tracing::warn!("CORS allowed_origins 含无效值: {}", v))
            .ok()
    });
    if !any_origin && origins.is_empty() {
        tracing::warn!("CORS 已启用但 allowed_origins 为空，已跳过启用");
        return None;
    }

    let (any_methods, methods) = split_wildcard(&cors.allowed_methods, |v| {
        Method::from_bytes(v.to_ascii_uppercase().as_bytes())
            .map_err(|_| tracing::warn!("CORS allowed_methods 含无效值: {}", v))
            .ok()
    });
    let (any_headers, headers) = split_wildcard(&cors.allowed_headers, |v| {
        HeaderName::from_bytes(v.to_ascii_lowercase().as_bytes())
            .map_err(|_| tracing::warn!("CORS allowed_headers 含无效值: {}", v))
            .ok()
    });

    if cors.allow_credentials && (any_origin || any_methods || any_headers) {
        tracing::error!("CORS 配置无效：allow_credentials=true 不能与 \"*\" 同时使用，已跳过启用");
        return None;
    }

    let mut layer = CorsLayer::new();

    if any_origin {
        layer = layer.allow_origin(Any);
    } else {
        layer = layer.allow_origin(origins);
    }

    if any_methods {
        layer = layer.allow_methods(Any);
    } else if !methods.is_empty() {
        layer = layer.allow_methods(methods);
    }

    if any_headers {
        layer = layer.allow_headers(Any);
    } else if !headers.is_empty() {
        layer = layer.allow_headers(headers);
    }

    if cors.allow_credentials {
        layer = layer.allow_credentials(true);
    }

    if let Some(secs) = cors.max_age_secs
        && secs > 0
    {
        layer = layer.max_age(Duration::from_secs(secs));
    }

    Some(layer)
}

/// 将配置值拆为「是否出现 "*"」与「可解析的具体值」两部分，空白值跳过。
fn split_wildcard<T>(values: &[String], parse: impl Fn(&str) -> Option<T>) -> (bool, Vec<T>) {
    let mut any = false;
    let mut parsed = Vec::new();
    for raw in values {
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        if value == "*" {
            any = true;
            continue;
        }
        if let Some(v) = parse(value) {
            parsed.push(v);
        }
    }
    (any, parsed)
}
