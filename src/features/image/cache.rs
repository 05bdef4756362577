use sha2::{Digest, Sha256};

use super::params::TransformRequest;

/// 构造结果缓存键。
///
/// 格式：`image_cache_{width}_{height}_{sha256(raw_query) 的十六进制}`。
/// 同尺寸、同查询串的请求稳定命中同一个键；查询串参与哈希意味着
/// 未识别的查询键也会产生不同的键，这是可接受的过度细分。
pub fn build_key(req: &TransformRequest) -> String {
    let digest = Sha256::digest(req.raw_query.as_bytes());
    format!(
        "image_cache_{}_{}_{}",
        req.width,
        req.height,
        hex::encode(digest)
    )
}
