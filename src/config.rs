use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 日志格式
    pub format: String,
}

/// CORS 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// 是否启用 CORS（图片服务通常跨域引用，但默认仍保持关闭）
    #[serde(default)]
    pub enabled: bool,
    /// 允许的 Origin 列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// 允许的方法列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    /// 允许的请求头列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    /// 是否允许携带凭证（与 "*" 互斥）
    #[serde(default)]
    pub allow_credentials: bool,
    /// 预检结果缓存时长（秒）
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Vec::new(),
            allowed_methods: Vec::new(),
            allowed_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: None,
        }
    }
}

/// 图片按需服务配置（对应原扩展的 image_on_demand_service 命名空间）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageServiceConfig {
    /// 拦截的基础路径（以 / 结尾）
    #[serde(default = "ImageServiceConfig::default_base_path")]
    pub base_path: String,
    /// 宽度取整步长（像素），必须大于 0
    #[serde(default = "ImageServiceConfig::default_step")]
    pub step_width: u32,
    /// 高度取整步长（像素），必须大于 0
    #[serde(default = "ImageServiceConfig::default_step")]
    pub step_height: u32,
    /// 路径缺省时使用的默认宽度
    #[serde(default = "ImageServiceConfig::default_dimension")]
    pub default_width: u32,
    /// 路径缺省时使用的默认高度
    #[serde(default = "ImageServiceConfig::default_dimension")]
    pub default_height: u32,
    /// 允许请求的最大宽度（取整前裁断，防止超大画布拖垮渲染）
    #[serde(default = "ImageServiceConfig::default_max_dimension")]
    pub max_width: u32,
    /// 允许请求的最大高度
    #[serde(default = "ImageServiceConfig::default_max_dimension")]
    pub max_height: u32,
    /// fileExt 参数允许的扩展名白名单（全小写）
    #[serde(default = "ImageServiceConfig::default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// 占位文字的最大长度（字符数，超出截断）
    #[serde(default = "ImageServiceConfig::default_max_text_len")]
    pub max_text_len: usize,
    /// 生成图片的落盘目录
    #[serde(default = "ImageServiceConfig::default_output_dir")]
    pub output_dir: String,
    /// 生成图片的公开访问前缀（publicUrl 与静态目录挂载均使用）
    #[serde(default = "ImageServiceConfig::default_public_base_url")]
    pub public_base_url: String,
    /// 资源清单路径（uid -> 源文件 + 裁剪变体）
    #[serde(default = "ImageServiceConfig::default_assets_manifest")]
    pub assets_manifest: String,
}

impl ImageServiceConfig {
    fn default_base_path() -> String {
        "/image-service/".to_string()
    }
    fn default_step() -> u32 {
        10
    }
    fn default_dimension() -> u32 {
        400
    }
    fn default_max_dimension() -> u32 {
        4096
    }
    fn default_allowed_extensions() -> Vec<String> {
        ["gif", "jpg", "jpeg", "png", "webp"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
    fn default_max_text_len() -> usize {
        200
    }
    fn default_output_dir() -> String {
        "./generated".to_string()
    }
    fn default_public_base_url() -> String {
        "/generated".to_string()
    }
    fn default_assets_manifest() -> String {
        "./resources/assets.yaml".to_string()
    }

    /// 扩展名是否在白名单内（大小写不敏感）
    pub fn is_extension_allowed(&self, ext: &str) -> bool {
        let lower = ext.to_ascii_lowercase();
        self.allowed_extensions.iter().any(|e| e == &lower)
    }

    /// 校验配置的硬性约束。步长为 0 会让取整公式除零，属于致命配置错误。
    pub fn validate(&self) -> Result<(), String> {
        if self.step_width == 0 || self.step_height == 0 {
            return Err(format!(
                "step_width/step_height 必须大于 0（当前 {}x{}）",
                self.step_width, self.step_height
            ));
        }
        if self.default_width == 0 || self.default_height == 0 {
            return Err("default_width/default_height 必须大于 0".to_string());
        }
        if !self.base_path.starts_with('/') || !self.base_path.ends_with('/') {
            return Err(format!(
                "base_path 必须以 / 开头并以 / 结尾（当前 {:?}）",
                self.base_path
            ));
        }
        Ok(())
    }
}

impl Default for ImageServiceConfig {
    fn default() -> Self {
        Self {
            base_path: Self::default_base_path(),
            step_width: Self::default_step(),
            step_height: Self::default_step(),
            default_width: Self::default_dimension(),
            default_height: Self::default_dimension(),
            max_width: Self::default_max_dimension(),
            max_height: Self::default_max_dimension(),
            allowed_extensions: Self::default_allowed_extensions(),
            max_text_len: Self::default_max_text_len(),
            output_dir: Self::default_output_dir(),
            public_base_url: Self::default_public_base_url(),
            assets_manifest: Self::default_assets_manifest(),
        }
    }
}

/// 渲染配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// 是否优先速度渲染（OptimizeSpeed），提升栅格化性能，可能略降画质
    #[serde(default)]
    pub optimize_speed: bool,
    /// 自定义字体目录（与系统字体合并加载）
    #[serde(default = "RenderConfig::default_fonts_dir")]
    pub fonts_dir: String,
    /// 占位文字使用的字体族
    #[serde(default = "RenderConfig::default_font_family")]
    pub font_family: String,
    /// 并发渲染许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
}

impl RenderConfig {
    fn default_fonts_dir() -> String {
        "resources/fonts".to_string()
    }
    fn default_font_family() -> String {
        "DejaVu Sans".to_string()
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            optimize_speed: false,
            fonts_dir: Self::default_fonts_dir(),
            font_family: Self::default_font_family(),
            max_parallel: 0,
        }
    }
}

/// 结果缓存配置（key -> 生成文件路径）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 是否启用结果缓存
    #[serde(default = "CacheConfig::default_enabled")]
    pub enabled: bool,
    /// 缓存最大条目数
    #[serde(default = "CacheConfig::default_max_entries")]
    pub max_entries: u64,
    /// 缓存 TTL（秒）
    #[serde(default = "CacheConfig::default_ttl")]
    pub ttl_secs: u64,
    /// 缓存 TTI（秒）
    #[serde(default = "CacheConfig::default_tti")]
    pub tti_secs: u64,
}

impl CacheConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_max_entries() -> u64 {
        10_000
    }
    fn default_ttl() -> u64 {
        24 * 3600
    }
    fn default_tti() -> u64 {
        3600
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_entries: Self::default_max_entries(),
            ttl_secs: Self::default_ttl(),
            tti_secs: Self::default_tti(),
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    /// CORS 配置
    #[serde(default)]
    pub cors: CorsConfig,
    /// 图片按需服务配置
    #[serde(default)]
    pub image_service: ImageServiceConfig,
    /// 渲染配置
    #[serde(default)]
    pub render: RenderConfig,
    /// 结果缓存配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 优雅退出配置
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let builder = ConfigBuilder::builder()
            // 加载配置文件（缺失时退回默认值，便于零配置启动）
            .add_source(File::with_name(config_path.to_str().unwrap_or("config")).required(false))
            // 支持环境变量覆盖，例如：APP_SERVER_PORT
            .add_source(
                Environment::with_prefix("APP")
                    .separator("_")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = builder.try_deserialize().or_else(|e| {
            // 配置文件不存在时 try_deserialize 会因缺失必填字段失败，此时使用默认配置
            tracing::warn!("配置反序列化失败（{}），使用内置默认配置", e);
            Ok::<_, ConfigError>(Self::default())
        })?;

        Ok(config)
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径
    fn get_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 生成图片的落盘目录
    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.image_service.output_dir)
    }

    /// 自定义字体目录
    pub fn fonts_path(&self) -> PathBuf {
        PathBuf::from(&self.render.fonts_dir)
    }

    /// 资源清单路径
    pub fn assets_manifest_path(&self) -> PathBuf {
        PathBuf::from(&self.image_service.assets_manifest)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3940,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "full".to_string(),
            },
            cors: CorsConfig::default(),
            image_service: ImageServiceConfig::default(),
            render: RenderConfig::default(),
            cache: CacheConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ImageServiceConfig;

    #[test]
    fn zero_step_is_rejected() {
        let cfg = ImageServiceConfig {
            step_width: 0,
            ..ImageServiceConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn base_path_must_be_slash_delimited() {
        let cfg = ImageServiceConfig {
            base_path: "/image-service".to_string(),
            ..ImageServiceConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn extension_allow_list_is_case_insensitive() {
        let cfg = ImageServiceConfig::default();
        assert!(cfg.is_extension_allowed("WEBP"));
        assert!(cfg.is_extension_allowed("png"));
        assert!(!cfg.is_extension_allowed("svg"));
        assert!(!cfg.is_extension_allowed("exe"));
    }

    #[test]
    fn default_config_passes_validation() {
        assert!(ImageServiceConfig::default().validate().is_ok());
    }
}
