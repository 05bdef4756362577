use url::form_urlencoded;

use crate::config::ImageServiceConfig;

/// 默认占位文字
pub const DEFAULT_TEXT: &str = "Dummy Image";
/// 默认背景色（6 位十六进制，不含 #）
pub const DEFAULT_BACKGROUND_COLOR: &str = "000000";
/// 默认文字颜色
pub const DEFAULT_FONT_COLOR: &str = "ffffff";
/// 默认裁剪变体名
pub const DEFAULT_CROP_VARIANT: &str = "default";

/// 一次图片请求的全部参数，提取后不再修改，
/// 贯穿 提取 -> 解析 -> 响应 全流程。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    /// 规整后的目标宽度（步长的正整数倍）
    pub width: u32,
    /// 规整后的目标高度
    pub height: u32,
    /// 资源 uid，0 表示未指定（直接合成占位图）
    pub file_reference_id: u32,
    /// 裁剪变体名
    pub crop_variant: String,
    /// 请求的输出扩展名（已通过白名单校验，全小写）
    pub file_extension: Option<String>,
    /// 占位文字
    pub text: String,
    /// 背景色（6 位十六进制）
    pub background_color: String,
    /// 文字颜色
    pub font_color: String,
    /// 是否以 JSON（publicUrl）形式响应
    pub wants_json: bool,
    /// 原始查询串，缓存键使用
    pub raw_query: String,
}

/// 路由判定结果。不匹配不是错误，用枚举分支表达而不是 Err。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch {
    /// 命中本服务，携带提取好的参数
    Matched(TransformRequest),
    /// 与本服务无关，调用方应放行给下游
    NotMine,
}

/// 从请求路径与查询串提取参数。
///
/// 路径形如 `{base_path}{width}/{height}`，两段尺寸均可缺省（取默认值）。
/// 识别的查询键：`fileExt` `json` `text` `bgColor` `textColor` `id` `crop`，
/// 其余键忽略；同名键以最后一个值为准。
pub fn extract(path: &str, query: &str, cfg: &ImageServiceConfig) -> RouteMatch {
    let Some(rest) = path.strip_prefix(cfg.base_path.as_str()) else {
        return RouteMatch::NotMine;
    };

    let mut segments = rest.split('/');
    let raw_width = segments.next().unwrap_or("");
    let raw_height = segments.next().unwrap_or("");

    let width = normalize_dimension(raw_width, cfg.default_width, cfg.max_width, cfg.step_width);
    let height = normalize_dimension(
        raw_height,
        cfg.default_height,
        cfg.max_height,
        cfg.step_height,
    );

    let mut file_reference_id = 0u32;
    let mut crop_variant = DEFAULT_CROP_VARIANT.to_string();
    let mut file_extension = None;
    let mut text = DEFAULT_TEXT.to_string();
    let mut background_color = DEFAULT_BACKGROUND_COLOR.to_string();
    let mut font_color = DEFAULT_FONT_COLOR.to_string();
    let mut wants_json = false;

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "id" => {
                file_reference_id = value.trim().parse().unwrap_or(0);
            }
            "crop" => {
                if !value.trim().is_empty() {
                    crop_variant = value.trim().to_string();
                }
            }
            "fileExt" => {
                let ext = value.trim().to_ascii_lowercase();
                if cfg.is_extension_allowed(&ext) {
                    file_extension = Some(ext);
                } else {
                    tracing::warn!("忽略不在白名单内的 fileExt: {}", value);
                    file_extension = None;
                }
            }
            "text" => {
                text = truncate_chars(value.trim(), cfg.max_text_len);
            }
            "bgColor" => {
                background_color = sanitize_color(&value, DEFAULT_BACKGROUND_COLOR);
            }
            "textColor" => {
                font_color = sanitize_color(&value, DEFAULT_FONT_COLOR);
            }
            "json" => {
                wants_json = parse_bool(&value);
            }
            _ => {}
        }
    }

    if text.is_empty() {
        text = DEFAULT_TEXT.to_string();
    }

    RouteMatch::Matched(TransformRequest {
        width,
        height,
        file_reference_id,
        crop_variant,
        file_extension,
        text,
        background_color,
        font_color,
        wants_json,
        raw_query: query.to_string(),
    })
}

/// 解析一段原始尺寸并按步长向上取整。
///
/// 非数字、0、负数一律回落到默认值；超过上限的先截断再取整，
/// 保证产出始终是步长的正整数倍。
fn normalize_dimension(raw: &str, default: u32, max: u32, step: u32) -> u32 {
    let parsed = raw.trim().parse::<u32>().ok().filter(|v| *v > 0);
    let value = parsed.unwrap_or(default).min(max);
    round_up_to_step(value, step)
}

/// `ceil(value / step) * step`
pub fn round_up_to_step(value: u32, step: u32) -> u32 {
    debug_assert!(step > 0);
    value.div_ceil(step) * step
}

/// 颜色值必须是恰好 6 位十六进制，否则回落到默认色。
pub fn sanitize_color(value: &str, default: &str) -> String {
    let v = value.trim();
    if v.len() == 6 && v.bytes().all(|b| b.is_ascii_hexdigit()) {
        v.to_ascii_lowercase()
    } else {
        if !v.is_empty() {
            tracing::warn!("颜色值非法（{}），使用默认色 {}", value, default);
        }
        default.to_string()
    }
}

fn parse_bool(value: &str) -> bool {
    let v = value.trim();
    v.eq_ignore_ascii_case("true") || v == "1"
}

/// 按字符数截断，避免在多字节边界截断造成畸形 UTF-8。
fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
