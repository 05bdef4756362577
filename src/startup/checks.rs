use std::fs;
use std::path::Path;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::features::image::renderer::global_font_db;

/// 执行启动检查
///
/// 1. 校验图片服务配置（步长为 0 等属致命错误）
/// 2. 检查并创建生成图片目录，验证可写
/// 3. 检查占位图 SVG 模板存在
/// 4. 预热字体数据库（为空仅告警，占位图将缺少文字）
pub async fn run_startup_checks(config: &AppConfig) -> Result<(), AppError> {
    tracing::info!("🔍 开始执行启动检查...");

    config
        .image_service
        .validate()
        .map_err(AppError::Configuration)?;

    ensure_output_dir(&config.output_path())?;
    ensure_placeholder_template()?;
    prewarm_font_db(config);

    tracing::info!("✅ 启动检查完成");
    Ok(())
}

/// 确保生成图片目录存在且可写
fn ensure_output_dir(output_dir: &Path) -> Result<(), AppError> {
    if !output_dir.exists() {
        tracing::warn!("📁 未找到生成图片目录，正在创建: {:?}", output_dir);
        fs::create_dir_all(output_dir)
            .map_err(|e| AppError::Configuration(format!("创建生成图片目录失败: {e}")))?;
    }

    // 写探针验证权限，立即删除
    let probe = output_dir.join(".write-probe");
    fs::write(&probe, b"probe")
        .map_err(|e| AppError::Configuration(format!("生成图片目录不可写 {:?}: {}", output_dir, e)))?;
    fs::remove_file(&probe).ok();

    tracing::info!("✅ 生成图片目录就绪: {:?}", output_dir);
    Ok(())
}

/// 占位图模板缺失会让每个渲染请求都失败，按致命配置处理
fn ensure_placeholder_template() -> Result<(), AppError> {
    let template = Path::new("resources/templates").join("placeholder.svg.jinja");
    if !template.exists() {
        return Err(AppError::Configuration(format!(
            "未找到占位图模板: {:?}",
            template
        )));
    }
    tracing::info!("✅ 占位图模板存在: {:?}", template);
    Ok(())
}

/// 预热全局字体数据库，避免首个请求承担加载延迟
fn prewarm_font_db(config: &AppConfig) {
    let db = global_font_db(&config.fonts_path());
    if db.len() == 0 {
        tracing::warn!("⚠️ 字体数据库为空，占位图将只有背景没有文字");
    } else {
        tracing::info!("✅ 字体数据库加载完成，共 {} 个字体面", db.len());
    }
}
