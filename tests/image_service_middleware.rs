use axum::body::to_bytes;
use axum::http::{Request, StatusCode, header};
use axum::routing::get;
use axum::{Router, body::Body, middleware};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower::ServiceExt;

use image_on_demand_service::AppConfig;
use image_on_demand_service::features::health::handler::health_check;
use image_on_demand_service::features::image::ImageResolver;
use image_on_demand_service::features::image::assets::AssetCatalog;
use image_on_demand_service::features::image::handler::image_on_demand_middleware;
use image_on_demand_service::features::image::renderer::SvgRenderer;
use image_on_demand_service::state::AppState;

/// 构建带临时输出目录的完整流水线应用
fn test_app() -> Router {
    let output_dir = std::env::temp_dir().join(format!(
        "iods-it-{}",
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::create_dir_all(&output_dir).unwrap();

    let mut config = AppConfig::default();
    config.image_service.output_dir = output_dir.to_string_lossy().into_owned();

    let renderer = Arc::new(SvgRenderer::new(
        output_dir,
        "resources/templates".into(),
        config.render.clone(),
    ));
    let resolver = Arc::new(ImageResolver::new(
        Arc::new(AssetCatalog::default()),
        renderer,
        Some(moka::future::Cache::builder().max_capacity(64).build()),
        Arc::new(Semaphore::new(2)),
    ));
    let state = AppState {
        config: Arc::new(config),
        resolver,
    };

    Router::new()
        .route("/health", get(health_check))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state,
            image_on_demand_middleware,
        ))
}

async fn get_response(app: Router, uri: &str) -> axum::response::Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn png_dimensions(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(bytes).unwrap();
    (img.width(), img.height())
}

#[tokio::test]
async fn unrelated_routes_pass_through() {
    let app = test_app();
    let res = get_response(app.clone(), "/health").await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = get_response(app, "/definitely/not/ours").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn placeholder_is_rendered_at_requested_dimensions() {
    let app = test_app();
    let res = get_response(
        app,
        "/image-service/400/300?bgColor=ff0000&textColor=ffffff&text=HELLO",
    )
    .await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    let len: u64 = res
        .headers()
        .get(header::CONTENT_LENGTH)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.len() as u64, len);
    assert_eq!(png_dimensions(&body), (400, 300));
}

#[tokio::test]
async fn dimensions_are_rounded_up_to_step() {
    let app = test_app();
    let res = get_response(app, "/image-service/401/295").await;
    assert_eq!(res.status(), StatusCode::OK);

    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(png_dimensions(&body), (410, 300));
}

#[tokio::test]
async fn missing_dimensions_use_defaults() {
    let app = test_app();
    let res = get_response(app, "/image-service/").await;
    assert_eq!(res.status(), StatusCode::OK);

    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(png_dimensions(&body), (400, 400));
}

#[tokio::test]
async fn explicit_zero_id_takes_the_placeholder_path() {
    let app = test_app();
    let res = get_response(app, "/image-service/400/400?id=0").await;
    assert_eq!(res.status(), StatusCode::OK);

    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(png_dimensions(&body), (400, 400));
}

#[tokio::test]
async fn unknown_asset_id_still_returns_an_image() {
    let app = test_app();
    let res = get_response(app, "/image-service/200/100?id=999").await;
    assert_eq!(res.status(), StatusCode::OK);

    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(png_dimensions(&body), (200, 100));
}

#[tokio::test]
async fn json_mode_returns_public_url() {
    let app = test_app();
    let res = get_response(app, "/image-service/400/300?json=true").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(
        res.headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("application/json")
    );

    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let url = value["publicUrl"].as_str().unwrap();
    assert!(url.starts_with("/generated/"));
    assert!(url.ends_with(".png"));
}

#[tokio::test]
async fn request_id_flows_through_intercepted_responses() {
    let app = test_app().layer(middleware::from_fn(
        image_on_demand_service::request_id::request_id_middleware,
    ));

    let res = app
        .oneshot(
            Request::builder()
                .uri("/image-service/400/300")
                .header("x-request-id", "it-test-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-request-id").unwrap(), "it-test-42");
}

#[tokio::test]
async fn repeated_request_is_served_from_cache() {
    let app = test_app();
    let uri = "/image-service/400/300?text=CACHED";

    let first = get_response(app.clone(), uri).await;
    let first_body = to_bytes(first.into_body(), usize::MAX).await.unwrap();

    let second = get_response(app, uri).await;
    let second_body = to_bytes(second.into_body(), usize::MAX).await.unwrap();

    // 命中缓存时返回的是同一个生成文件，字节必然一致
    assert_eq!(first_body, second_body);
}
