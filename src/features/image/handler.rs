use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

use super::{cache, params, response};

/// 图片按需生成拦截中间件。
///
/// 命中 `{base_path}{width}/{height}` 时直接产出图片响应，
/// 其余请求原样放行给下游路由。
pub async fn image_on_demand_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    let transform = match params::extract(&path, &query, &state.config.image_service) {
        params::RouteMatch::NotMine => return next.run(req).await,
        params::RouteMatch::Matched(t) => t,
    };

    let key = cache::build_key(&transform);
    tracing::debug!(
        "拦截图片请求 {}x{} id={} key={}",
        transform.width,
        transform.height,
        transform.file_reference_id,
        key
    );

    let resolved = match state.resolver.resolve(&transform, &key).await {
        Ok(resolved) => resolved,
        Err(e) => return e.into_response(),
    };

    match response::build(&resolved, transform.wants_json, &state.config.image_service).await {
        Ok(res) => res,
        Err(e) => e.into_response(),
    }
}
