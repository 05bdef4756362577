use moka::future::Cache;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::spawn_blocking;

use crate::error::AppError;

use super::assets::AssetCatalog;
use super::params::TransformRequest;
use super::renderer::{PlaceholderSpec, Renderer, TransformInstructions};

/// 资源处理失败时的占位文字
pub const NOT_FOUND_TEXT: &str = "Image not found!";

/// 一张已就绪、可直接响应的图片
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub path: PathBuf,
    pub size: u64,
    pub mime: String,
}

/// 解析流水线：缓存查询 -> 生成 -> 缓存回填。
///
/// 同一个键的并发未命中会各自渲染并先后写缓存（后写覆盖先写），
/// 不做按键加锁；代价是偶发的重复渲染，产物彼此等价。
pub struct ImageResolver<R: Renderer> {
    assets: Arc<AssetCatalog>,
    renderer: Arc<R>,
    /// 键 -> 生成文件路径。None 表示缓存被配置关闭。
    cache: Option<Cache<String, String>>,
    /// 渲染并发闸门，避免 CPU 密集任务挤占 runtime
    render_gate: Arc<Semaphore>,
}

impl<R: Renderer> ImageResolver<R> {
    pub fn new(
        assets: Arc<AssetCatalog>,
        renderer: Arc<R>,
        cache: Option<Cache<String, String>>,
        render_gate: Arc<Semaphore>,
    ) -> Self {
        Self {
            assets,
            renderer,
            cache,
            render_gate,
        }
    }

    /// 解析一次图片请求。
    ///
    /// 缓存命中但文件已被外部删除时按未命中处理并丢弃该缓存项；
    /// 任何资源侧失败都在此降级为占位图，调用方拿到的 Err 只剩基础设施错误。
    pub async fn resolve(
        &self,
        req: &TransformRequest,
        key: &str,
    ) -> Result<ResolvedImage, AppError> {
        if let Some(cache) = &self.cache
            && let Some(cached_path) = cache.get(key).await
        {
            match tokio::fs::metadata(&cached_path).await {
                Ok(meta) if meta.is_file() => {
                    tracing::debug!("缓存命中: {}", key);
                    return Ok(describe(PathBuf::from(cached_path), meta.len()));
                }
                _ => {
                    tracing::warn!("缓存指向的文件 {} 已不存在，按未命中处理", cached_path);
                    cache.invalidate(key).await;
                }
            }
        }

        let path = self.generate(req).await?;
        let meta = tokio::fs::metadata(&path).await.map_err(|e| {
            AppError::Io(format!("读取生成文件 {:?} 元数据失败: {}", path, e))
        })?;

        if let Some(cache) = &self.cache {
            // 回填尽力而为，覆盖同键旧值
            cache
                .insert(key.to_string(), path.to_string_lossy().into_owned())
                .await;
        }

        Ok(describe(path, meta.len()))
    }

    async fn generate(&self, req: &TransformRequest) -> Result<PathBuf, AppError> {
        if req.file_reference_id == 0 {
            return self
                .synthesize_placeholder(
                    req.width,
                    req.height,
                    &req.background_color,
                    &req.font_color,
                    &req.text,
                )
                .await;
        }

        match self.transform_asset(req).await {
            Ok(path) => Ok(path),
            Err(e) => {
                tracing::warn!(
                    "资源 uid={} 处理失败（{}），回落为占位图",
                    req.file_reference_id,
                    e
                );
                self.synthesize_placeholder(
                    req.width,
                    req.height,
                    &req.background_color,
                    &req.font_color,
                    NOT_FOUND_TEXT,
                )
                .await
            }
        }
    }

    async fn transform_asset(&self, req: &TransformRequest) -> Result<PathBuf, AppError> {
        let entry = self
            .assets
            .get(req.file_reference_id)
            .ok_or_else(|| {
                AppError::Renderer(format!("资源目录中不存在 uid={}", req.file_reference_id))
            })?
            .clone();

        let crop = entry.crop_variant(&req.crop_variant);
        let extension = req
            .file_extension
            .clone()
            .unwrap_or_else(|| default_extension_for(&entry.path));

        let instructions = TransformInstructions {
            width: req.width,
            height: req.height,
            crop,
            extension,
        };

        let renderer = self.renderer.clone();
        let source = entry.path.clone();
        self.run_render(move || renderer.apply_transform(&source, &instructions))
            .await
    }

    /// 直接合成占位图，不经过缓存（DummyImage 端点亦使用此入口）。
    pub async fn synthesize_placeholder(
        &self,
        width: u32,
        height: u32,
        background_color: &str,
        font_color: &str,
        text: &str,
    ) -> Result<PathBuf, AppError> {
        let spec = PlaceholderSpec {
            width,
            height,
            background_color: background_color.to_string(),
            font_color: font_color.to_string(),
            text: text.to_string(),
        };
        let renderer = self.renderer.clone();
        self.run_render(move || renderer.draw_placeholder(&spec))
            .await
    }

    /// 在并发闸门内把阻塞渲染丢给 blocking 线程池。
    async fn run_render<T, F>(&self, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, AppError> + Send + 'static,
    {
        let permit = self
            .render_gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("渲染信号量已关闭".to_string()))?;

        spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| AppError::Internal(format!("渲染任务执行失败: {e}")))?
    }
}

fn describe(path: PathBuf, size: u64) -> ResolvedImage {
    let mime = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .to_string();
    ResolvedImage { path, size, mime }
}

fn default_extension_for(source: &std::path::Path) -> String {
    match source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
    {
        Some(ext) if matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "gif" | "webp") => ext,
        _ => "png".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageServiceConfig;
    use crate::features::image::assets::{AssetCatalog, AssetEntry};
    use crate::features::image::params::{RouteMatch, extract};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 计数用的桩渲染器：每次调用写一个新文件并记录参数。
    struct StubRenderer {
        dir: PathBuf,
        placeholder_calls: AtomicUsize,
        transform_calls: AtomicUsize,
        last_placeholder_text: Mutex<Option<String>>,
    }

    impl StubRenderer {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!(
                "resolver-{}",
                uuid::Uuid::new_v4().simple()
            ));
            std::fs::create_dir_all(&dir).unwrap();
            Self {
                dir,
                placeholder_calls: AtomicUsize::new(0),
                transform_calls: AtomicUsize::new(0),
                last_placeholder_text: Mutex::new(None),
            }
        }

        fn write_file(&self, name: &str) -> PathBuf {
            let path = self
                .dir
                .join(format!("{name}-{}.png", uuid::Uuid::new_v4().simple()));
            std::fs::write(&path, b"stub-image-bytes").unwrap();
            path
        }

        fn renders(&self) -> usize {
            self.placeholder_calls.load(Ordering::SeqCst)
                + self.transform_calls.load(Ordering::SeqCst)
        }
    }

    impl Renderer for StubRenderer {
        fn draw_placeholder(&self, spec: &PlaceholderSpec) -> Result<PathBuf, AppError> {
            self.placeholder_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_placeholder_text.lock().unwrap() = Some(spec.text.clone());
            Ok(self.write_file("placeholder"))
        }

        fn apply_transform(
            &self,
            _source: &Path,
            _instructions: &TransformInstructions,
        ) -> Result<PathBuf, AppError> {
            self.transform_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.write_file("asset"))
        }
    }

    fn resolver_with(
        renderer: Arc<StubRenderer>,
        catalog: AssetCatalog,
        cached: bool,
    ) -> ImageResolver<StubRenderer> {
        let cache = cached.then(|| Cache::builder().max_capacity(64).build());
        ImageResolver::new(
            Arc::new(catalog),
            renderer,
            cache,
            Arc::new(Semaphore::new(2)),
        )
    }

    fn request(path: &str, query: &str) -> TransformRequest {
        match extract(path, query, &ImageServiceConfig::default()) {
            RouteMatch::Matched(req) => req,
            RouteMatch::NotMine => panic!("应命中路由"),
        }
    }

    #[tokio::test]
    async fn zero_id_synthesizes_placeholder() {
        let renderer = Arc::new(StubRenderer::new());
        let resolver = resolver_with(renderer.clone(), AssetCatalog::default(), true);

        let req = request("/image-service/400/300", "text=HELLO");
        let resolved = resolver.resolve(&req, "key-a").await.unwrap();

        assert_eq!(renderer.placeholder_calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolved.mime, "image/png");
        assert_eq!(resolved.size, "stub-image-bytes".len() as u64);
    }

    #[tokio::test]
    async fn second_resolve_hits_cache_without_rendering() {
        let renderer = Arc::new(StubRenderer::new());
        let resolver = resolver_with(renderer.clone(), AssetCatalog::default(), true);

        let req = request("/image-service/400/300", "");
        let first = resolver.resolve(&req, "key-b").await.unwrap();
        let second = resolver.resolve(&req, "key-b").await.unwrap();

        assert_eq!(renderer.renders(), 1);
        assert_eq!(first.path, second.path);
    }

    #[tokio::test]
    async fn stale_cache_entry_triggers_regeneration() {
        let renderer = Arc::new(StubRenderer::new());
        let resolver = resolver_with(renderer.clone(), AssetCatalog::default(), true);

        let req = request("/image-service/400/300", "");
        let first = resolver.resolve(&req, "key-c").await.unwrap();
        std::fs::remove_file(&first.path).unwrap();

        let second = resolver.resolve(&req, "key-c").await.unwrap();
        assert_eq!(renderer.renders(), 2);
        assert_ne!(first.path, second.path);
    }

    #[tokio::test]
    async fn disabled_cache_renders_every_time() {
        let renderer = Arc::new(StubRenderer::new());
        let resolver = resolver_with(renderer.clone(), AssetCatalog::default(), false);

        let req = request("/image-service/400/300", "");
        resolver.resolve(&req, "key-d").await.unwrap();
        resolver.resolve(&req, "key-d").await.unwrap();

        assert_eq!(renderer.renders(), 2);
    }

    #[tokio::test]
    async fn unknown_asset_falls_back_to_not_found_placeholder() {
        let renderer = Arc::new(StubRenderer::new());
        let resolver = resolver_with(renderer.clone(), AssetCatalog::default(), true);

        let req = request("/image-service/400/300", "id=42");
        resolver.resolve(&req, "key-e").await.unwrap();

        assert_eq!(renderer.placeholder_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            renderer.last_placeholder_text.lock().unwrap().as_deref(),
            Some(NOT_FOUND_TEXT)
        );
    }

    #[tokio::test]
    async fn known_asset_goes_through_transform() {
        let renderer = Arc::new(StubRenderer::new());
        let catalog = AssetCatalog::from_entries([AssetEntry {
            uid: 7,
            path: PathBuf::from("./irrelevant/source.jpg"),
            crops: HashMap::new(),
        }]);
        let resolver = resolver_with(renderer.clone(), catalog, true);

        let req = request("/image-service/400/300", "id=7");
        resolver.resolve(&req, "key-f").await.unwrap();

        assert_eq!(renderer.transform_calls.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.placeholder_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn output_extension_follows_source_when_unspecified() {
        assert_eq!(default_extension_for(Path::new("a/b/photo.JPG")), "jpg");
        assert_eq!(default_extension_for(Path::new("a/b/photo.webp")), "webp");
        assert_eq!(default_extension_for(Path::new("a/b/vector.svg")), "png");
        assert_eq!(default_extension_for(Path::new("a/b/noext")), "png");
    }
}
