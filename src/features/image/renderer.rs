use image::ColorType;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use minijinja::Environment;
use resvg::render;
use resvg::usvg::{self, Options as UsvgOptions, fontdb};
use tiny_skia::{Pixmap, Transform};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use crate::config::RenderConfig;
use crate::error::AppError;

use super::assets::CropRect;

/// 占位图合成参数
#[derive(Debug, Clone)]
pub struct PlaceholderSpec {
    pub width: u32,
    pub height: u32,
    /// 6 位十六进制背景色（不含 #）
    pub background_color: String,
    /// 6 位十六进制文字颜色
    pub font_color: String,
    /// 绘制时统一转为大写
    pub text: String,
}

/// 真实图片变换参数
#[derive(Debug, Clone)]
pub struct TransformInstructions {
    pub width: u32,
    pub height: u32,
    /// 相对裁剪矩形，None 表示不裁剪
    pub crop: Option<CropRect>,
    /// 输出扩展名（已在白名单内，全小写）
    pub extension: String,
}

/// 渲染能力的抽象，也是解析流水线的测试接缝。
///
/// 两个方法都是阻塞调用，调用方负责放进 `spawn_blocking`。
pub trait Renderer: Send + Sync + 'static {
    /// 合成占位图（始终输出 PNG），返回落盘路径。
    fn draw_placeholder(&self, spec: &PlaceholderSpec) -> Result<PathBuf, AppError>;

    /// 裁剪/缩放真实图片并按指定扩展名编码，返回落盘路径。
    fn apply_transform(
        &self,
        source: &Path,
        instructions: &TransformInstructions,
    ) -> Result<PathBuf, AppError>;
}

// 全局字体数据库单例，系统字体 + 配置目录下的自定义字体
static GLOBAL_FONT_DB: OnceLock<Arc<fontdb::Database>> = OnceLock::new();

fn init_font_db(fonts_dir: &Path) -> Arc<fontdb::Database> {
    let mut font_db = fontdb::Database::new();
    font_db.load_system_fonts();

    if fonts_dir.exists()
        && let Ok(entries) = fs::read_dir(fonts_dir)
    {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file()
                && (path.extension() == Some("ttf".as_ref())
                    || path.extension() == Some("otf".as_ref()))
                && let Err(e) = font_db.load_font_file(&path)
            {
                tracing::error!("加载字体文件失败 '{}': {}", path.display(), e);
            }
        }
    }

    Arc::new(font_db)
}

/// 获取全局字体数据库（首次调用时初始化）
pub fn global_font_db(fonts_dir: &Path) -> Arc<fontdb::Database> {
    GLOBAL_FONT_DB
        .get_or_init(|| init_font_db(fonts_dir))
        .clone()
}

/// 占位文字字号：随宽度缩放，夹在 [20, 80] 区间内。
pub fn placeholder_font_size(width: u32) -> f64 {
    (width as f64 / 15.0).clamp(20.0, 80.0)
}

#[derive(Serialize)]
struct PlaceholderContext {
    width: u32,
    height: u32,
    background_color: String,
    font_color: String,
    text: String,
    font_family: String,
    font_size: f64,
    text_x: f64,
    text_y: f64,
}

/// 基于 SVG 模板 + resvg 栅格化的默认渲染器。
pub struct SvgRenderer {
    output_dir: PathBuf,
    render_cfg: RenderConfig,
    templates: Environment<'static>,
}

impl SvgRenderer {
    pub fn new(output_dir: PathBuf, templates_dir: PathBuf, render_cfg: RenderConfig) -> Self {
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(templates_dir));
        // 模板输出是 SVG（XML），强制转义以免占位文字注入标记
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::Html);
        Self {
            output_dir,
            render_cfg,
            templates: env,
        }
    }

    fn render_template(&self, spec: &PlaceholderSpec) -> Result<String, AppError> {
        let font_size = placeholder_font_size(spec.width);
        let ctx = PlaceholderContext {
            width: spec.width,
            height: spec.height,
            background_color: format!("#{}", spec.background_color),
            font_color: format!("#{}", spec.font_color),
            text: spec.text.to_uppercase(),
            font_family: self.render_cfg.font_family.clone(),
            font_size,
            text_x: spec.width as f64 / 2.0,
            // 基线下移 1/3 字号，让文字在垂直方向视觉居中
            text_y: spec.height as f64 / 2.0 + font_size / 3.0,
        };

        let tpl = self
            .templates
            .get_template("placeholder.svg.jinja")
            .map_err(|e| AppError::Renderer(format!("加载 SVG 模板失败: {e}")))?;
        tpl.render(&ctx)
            .map_err(|e| AppError::Renderer(format!("渲染 SVG 模板失败: {e}")))
    }

    fn rasterize_svg(&self, svg_data: &str, width: u32, height: u32) -> Result<Vec<u8>, AppError> {
        let speed = self.render_cfg.optimize_speed;
        let opts = UsvgOptions {
            fontdb: global_font_db(Path::new(&self.render_cfg.fonts_dir)),
            font_family: self.render_cfg.font_family.clone(),
            shape_rendering: if speed {
                usvg::ShapeRendering::OptimizeSpeed
            } else {
                usvg::ShapeRendering::GeometricPrecision
            },
            text_rendering: if speed {
                usvg::TextRendering::OptimizeSpeed
            } else {
                usvg::TextRendering::OptimizeLegibility
            },
            image_rendering: if speed {
                usvg::ImageRendering::OptimizeSpeed
            } else {
                usvg::ImageRendering::OptimizeQuality
            },
            ..Default::default()
        };

        let tree = usvg::Tree::from_data(svg_data.as_bytes(), &opts)
            .map_err(|e| AppError::Renderer(format!("解析 SVG 失败: {e}")))?;

        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| AppError::Renderer("创建 Pixmap 失败".to_string()))?;
        render(&tree, Transform::default(), &mut pixmap.as_mut());

        // 使用 png crate 进行快速编码
        let mut out = Vec::with_capacity((width * height * 4) as usize);
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            if speed {
                encoder.set_compression(png::Compression::Fast);
                encoder.set_filter(png::FilterType::NoFilter);
            } else {
                encoder.set_compression(png::Compression::Default);
                encoder.set_filter(png::FilterType::Paeth);
            }
            let mut writer = encoder
                .write_header()
                .map_err(|e| AppError::Renderer(format!("PNG 编码失败: {e}")))?;
            writer
                .write_image_data(pixmap.data())
                .map_err(|e| AppError::Renderer(format!("PNG 编码失败: {e}")))?;
        }
        Ok(out)
    }

    fn unique_output_path(&self, prefix: &str, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("{prefix}_{}.{extension}", Uuid::new_v4().simple()))
    }

    fn resize_filter(&self) -> FilterType {
        if self.render_cfg.optimize_speed {
            FilterType::Triangle
        } else {
            FilterType::Lanczos3
        }
    }
}

impl Renderer for SvgRenderer {
    fn draw_placeholder(&self, spec: &PlaceholderSpec) -> Result<PathBuf, AppError> {
        let svg = self.render_template(spec)?;
        let png_bytes = self.rasterize_svg(&svg, spec.width, spec.height)?;

        let out_path = self.unique_output_path("placeholder", "png");
        fs::write(&out_path, png_bytes)
            .map_err(|e| AppError::Io(format!("写入占位图 {:?} 失败: {}", out_path, e)))?;
        Ok(out_path)
    }

    fn apply_transform(
        &self,
        source: &Path,
        instructions: &TransformInstructions,
    ) -> Result<PathBuf, AppError> {
        let img = image::open(source)
            .map_err(|e| AppError::Renderer(format!("打开源图片 {:?} 失败: {}", source, e)))?;

        let img = match instructions.crop {
            Some(rect) => {
                let (x, y, w, h) = rect.to_absolute(img.width(), img.height());
                img.crop_imm(x, y, w, h)
            }
            None => img,
        };

        let resized = img.resize_to_fill(
            instructions.width,
            instructions.height,
            self.resize_filter(),
        );

        let out_path = self.unique_output_path("asset", &instructions.extension);
        match instructions.extension.as_str() {
            "jpg" | "jpeg" => {
                let file = fs::File::create(&out_path)
                    .map_err(|e| AppError::Io(format!("创建 {:?} 失败: {}", out_path, e)))?;
                let rgb = resized.to_rgb8();
                let mut enc = JpegEncoder::new_with_quality(std::io::BufWriter::new(file), 85);
                enc.encode(&rgb, rgb.width(), rgb.height(), ColorType::Rgb8.into())
                    .map_err(|e| AppError::Renderer(format!("JPEG 编码失败: {e}")))?;
            }
            "webp" => {
                use image::codecs::webp::WebPEncoder;
                let file = fs::File::create(&out_path)
                    .map_err(|e| AppError::Io(format!("创建 {:?} 失败: {}", out_path, e)))?;
                let rgba = resized.to_rgba8();
                let enc = WebPEncoder::new_lossless(std::io::BufWriter::new(file));
                enc.encode(&rgba, rgba.width(), rgba.height(), ColorType::Rgba8.into())
                    .map_err(|e| AppError::Renderer(format!("WebP 编码失败: {e}")))?;
            }
            "gif" => {
                resized
                    .save_with_format(&out_path, image::ImageFormat::Gif)
                    .map_err(|e| AppError::Renderer(format!("GIF 编码失败: {e}")))?;
            }
            // 白名单内剩余的只有 png
            _ => {
                resized
                    .save_with_format(&out_path, image::ImageFormat::Png)
                    .map_err(|e| AppError::Renderer(format!("PNG 编码失败: {e}")))?;
            }
        }

        Ok(out_path)
    }
}
