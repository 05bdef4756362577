use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use uuid::Uuid;

/// 请求上下文中的 request_id，通过 extension 向下游 handler 暴露。
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

tokio::task_local! {
    /// 当前异步任务绑定的 request_id，错误响应透传用。
    static TASK_REQUEST_ID: String;
}

/// 获取当前请求上下文中的 request_id。
pub fn current_request_id() -> Option<String> {
    TASK_REQUEST_ID.try_with(|v| v.clone()).ok()
}

/// 客户端自带 request_id 的长度上限。超长的值多半是滥用或误接了别的字段，
/// 直接丢弃改为服务端生成。
const MAX_CLIENT_ID_LEN: usize = 128;

/// 客户端提供的 request_id 只接受安全字符集，避免日志注入与响应头畸形。
fn is_acceptable_request_id(v: &str) -> bool {
    let safe_byte = |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.');
    (1..=MAX_CLIENT_ID_LEN).contains(&v.len()) && v.bytes().all(safe_byte)
}

fn incoming_or_generated_id(req: &Request) -> String {
    let claimed = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    match claimed {
        Some(raw) if is_acceptable_request_id(raw) => raw.to_string(),
        _ => format!("req_{}", Uuid::new_v4().simple()),
    }
}

/// 全局 request_id 中间件：
/// - 优先透传客户端传入的 `X-Request-Id`
/// - 缺失或非法时服务端自动生成
/// - 回写到响应头，并注入任务上下文供错误响应使用
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = incoming_or_generated_id(&req);
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut res = TASK_REQUEST_ID
        .scope(request_id.clone(), async move { next.run(req).await })
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        res.headers_mut().insert("x-request-id", value);
    }

    res
}
