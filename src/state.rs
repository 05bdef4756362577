use std::sync::Arc;

use crate::config::AppConfig;
use crate::features::image::ImageResolver;
use crate::features::image::renderer::SvgRenderer;

/// 应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Arc<AppConfig>,
    /// 图片解析流水线
    pub resolver: Arc<ImageResolver<SvgRenderer>>,
}
