/// 请求参数提取（路径/查询参数 -> TransformRequest）
pub mod params;

/// 缓存键构造
pub mod cache;

/// 资源目录（uid -> 源图片 + 裁剪变体）
pub mod assets;

/// 图像渲染（占位图合成与真实图片变换）
pub mod renderer;

/// 解析流水线（缓存查询 -> 生成 -> 回填）
pub mod resolver;

/// 响应构造（二进制图片 / publicUrl JSON）
pub mod response;

/// axum 拦截中间件
pub mod handler;

pub use params::{RouteMatch, TransformRequest};
pub use resolver::{ImageResolver, ResolvedImage};
