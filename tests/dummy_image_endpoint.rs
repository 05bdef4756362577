use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::routing::get;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower::ServiceExt;

use image_on_demand_service::AppConfig;
use image_on_demand_service::features::dummy::handler::dummy_image;
use image_on_demand_service::features::image::ImageResolver;
use image_on_demand_service::features::image::assets::AssetCatalog;
use image_on_demand_service::features::image::renderer::SvgRenderer;
use image_on_demand_service::state::AppState;

fn test_app() -> Router {
    let output_dir = std::env::temp_dir().join(format!(
        "iods-dummy-{}",
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
    // DummyImage 不经过缓存，这里也不挂缓存
    let resolver = Arc::new(ImageResolver::new(
        Arc::new(AssetCatalog::default()),
        renderer,
        None,
        Arc::new(Semaphore::new(2)),
    ));
    let state = AppState {
        config: Arc::new(config),
        resolver,
    };

    Router::new()
        .route(
            "/dummyimage/:width/:height/:bg_color/:text_color",
            get(dummy_image),
        )
        .with_state(state)
}

async fn fetch_png(app: Router, uri: &str) -> (u32, u32) {
    let res = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let img = image::load_from_memory(&body).unwrap();
    (img.width(), img.height())
}

#[tokio::test]
async fn dummy_image_renders_requested_size() {
    let app = test_app();
    assert_eq!(
        fetch_png(app, "/dummyimage/300/200/00ff00/000000").await,
        (300, 200)
    );
}

#[tokio::test]
async fn invalid_parameters_fall_back_to_defaults() {
    let app = test_app();
    // 尺寸非法回落 400x400，颜色非法回落默认色（不影响状态码）
    assert_eq!(
        fetch_png(app, "/dummyimage/abc/0/red/zzz").await,
        (400, 400)
    );
}

#[tokio::test]
async fn oversized_dimensions_are_capped() {
    let app = test_app();
    assert_eq!(
        fetch_png(app, "/dummyimage/999999/50/000000/ffffff").await,
        (4096, 50)
    );
}
