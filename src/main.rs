use axum::{Router, routing::get};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use image_on_demand_service::features::dummy::handler::dummy_image;
use image_on_demand_service::features::health::handler::health_check;
use image_on_demand_service::features::image::assets::AssetCatalog;
use image_on_demand_service::features::image::handler::image_on_demand_middleware;
use image_on_demand_service::features::image::renderer::SvgRenderer;
use image_on_demand_service::features::image::ImageResolver;
use image_on_demand_service::startup::run_startup_checks;
use image_on_demand_service::state::AppState;
use image_on_demand_service::{AppConfig, AppError, ShutdownManager, cors::build_cors_layer};

fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    // 压缩策略：明确排除不该压缩的响应，而不是全局默认。
    //
    // 本服务的主要产物是 png/jpeg/webp，全部已经压缩过，再压缩只浪费 CPU；
    // JSON（publicUrl 响应、错误响应）与 Swagger 静态资源仍然受益。
    SizeAbove::default()
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::const_new("application/octet-stream"))
        .and(NotForContentType::const_new("application/zip"))
        .and(NotForContentType::const_new("application/gzip"))
}


#[derive(OpenApi)]
#[openapi(
    paths(
        image_on_demand_service::features::health::handler::health_check,
        image_on_demand_service::features::dummy::handler::dummy_image,
    ),
    components(schemas(AppError, image_on_demand_service::error::ProblemDetails)),
    tags(
        (name = "Image", description = "图片生成 APIs"),
        (name = "Health", description = "健康检查 APIs"),
    ),
    info(
        title = "Image On Demand Service",
        version = "0.1.0",
        description = "按需图片生成服务（Axum）。除下列路由外，服务还以中间件形式拦截 \
                       `{base_path}{width}/{height}` 形状的请求并即时生成/变换图片，\
                       详见配置中的 image_service 小节。"
    )
)]
pub struct ApiDoc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_on_demand_service=info,tower_http=info".into()),
        )
        .init();

    // 创建优雅退出管理器
    let shutdown_manager = ShutdownManager::new();

    // 加载配置
    if let Err(e) = AppConfig::init_global() {
        tracing::error!("配置初始化失败: {}", e);
        std::process::exit(1);
    }
    let config = AppConfig::global();

    // 启动信号处理器
    if let Err(e) = shutdown_manager.start_signal_handler() {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    // 启动检查（步长校验 / 输出目录 / 模板 / 字体预热）
    if let Err(e) = run_startup_checks(config).await {
        tracing::error!("启动检查失败: {}", e);
        std::process::exit(1);
    }

    // 加载资源目录（清单缺失时为空目录，所有 id 回落占位图）
    let assets = match AssetCatalog::load(&config.assets_manifest_path()) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            tracing::error!("资源目录加载失败: {}", e);
            std::process::exit(1);
        }
    };

    // 结果缓存：键 -> 生成文件路径
    let result_cache = config.cache.enabled.then(|| {
        Cache::builder()
            .max_capacity(config.cache.max_entries)
            .time_to_live(Duration::from_secs(config.cache.ttl_secs))
            .time_to_idle(Duration::from_secs(config.cache.tti_secs))
            .build()
    });

    let render_gate = Arc::new(Semaphore::new({
        let m = config.render.max_parallel as usize;
        if m == 0 { num_cpus::get() } else { m }
    }));

    let renderer = Arc::new(SvgRenderer::new(
        config.output_path(),
        "resources/templates".into(),
        config.render.clone(),
    ));

    let app_state = AppState {
        config: Arc::new(config.clone()),
        resolver: Arc::new(ImageResolver::new(
            assets,
            renderer,
            result_cache,
            render_gate,
        )),
    };

    // 路由：常规端点 + 生成目录静态服务 + Swagger
    let public_prefix = config.image_service.public_base_url.clone();
    let mut app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/dummyimage/:width/:height/:bg_color/:text_color",
            get(dummy_image),
        )
        .nest_service(&public_prefix, ServeDir::new(config.output_path()))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(app_state.clone());

    // 图片拦截中间件包住整个路由器，未注册的 {base_path} 路径也能命中
    app = app.layer(axum::middleware::from_fn_with_state(
        app_state,
        image_on_demand_middleware,
    ));

    // request_id 贯穿所有请求（含拦截路径）
    app = app.layer(axum::middleware::from_fn(
        image_on_demand_service::request_id::request_id_middleware,
    ));

    if let Some(cors) = build_cors_layer(&config.cors) {
        tracing::info!("CORS 已启用");
        app = app.layer(cors);
    }

    app = app.layer(CompressionLayer::new().compress_when(compression_predicate()));

    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("监听地址绑定失败 {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!(
        "Interceptor: http://{}{}{{width}}/{{height}}",
        addr,
        config.image_service.base_path
    );
    tracing::info!("Generated files: {:?}", config.output_path());

    // 启动服务器并等待优雅退出信号
    let shutdown_timeout = config.shutdown.timeout_duration();
    let sm = shutdown_manager.clone();
    let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
        let reason = sm.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅退出...", reason);

        // 超时兜底：在途请求迟迟不结束时强制退出
        tokio::spawn(async move {
            tokio::time::sleep(shutdown_timeout).await;
            tracing::warn!("优雅退出超时（{}秒），强制退出", shutdown_timeout.as_secs());
            std::process::exit(1);
        });
    });

    if let Err(e) = graceful.await {
        tracing::error!("服务器运行错误: {}", e);
        std::process::exit(1);
    }

    tracing::info!("服务器已优雅关闭");
}
