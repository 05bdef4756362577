/// 图片按需生成功能模块
pub mod image;

/// DummyImage 独立端点模块
pub mod dummy;

/// 健康检查模块
pub mod health;
