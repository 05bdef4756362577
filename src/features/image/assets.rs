use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// 相对裁剪矩形，各分量取值 0..=1，变换时再按源图尺寸换算为像素。
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRect {
    /// 按源图尺寸换算为像素矩形 `(x, y, width, height)`，并裁剪到图内。
    pub fn to_absolute(&self, src_width: u32, src_height: u32) -> (u32, u32, u32, u32) {
        let clamp01 = |v: f64| v.clamp(0.0, 1.0);
        let x = (clamp01(self.x) * src_width as f64).round() as u32;
        let y = (clamp01(self.y) * src_height as f64).round() as u32;
        let w = (clamp01(self.width) * src_width as f64).round() as u32;
        let h = (clamp01(self.height) * src_height as f64).round() as u32;
        let x = x.min(src_width.saturating_sub(1));
        let y = y.min(src_height.saturating_sub(1));
        let w = w.clamp(1, src_width - x);
        let h = h.clamp(1, src_height - y);
        (x, y, w, h)
    }
}

/// 单个可引用的图片资源
#[derive(Debug, Clone, Deserialize)]
pub struct AssetEntry {
    /// 资源 uid
    pub uid: u32,
    /// 源图片路径
    pub path: PathBuf,
    /// 命名裁剪变体
    #[serde(default)]
    pub crops: HashMap<String, CropRect>,
}

impl AssetEntry {
    /// 查找裁剪变体，未定义的变体视为不裁剪。
    pub fn crop_variant(&self, name: &str) -> Option<CropRect> {
        self.crops.get(name).copied()
    }
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    assets: Vec<AssetEntry>,
}

/// 内存中的资源目录，启动时从 YAML 清单一次性构建。
#[derive(Debug, Default)]
pub struct AssetCatalog {
    by_uid: HashMap<u32, AssetEntry>,
}

impl AssetCatalog {
    /// 从 YAML 清单加载资源目录。
    ///
    /// 清单缺失不是错误（返回空目录并告警），清单存在但格式非法才报错：
    /// 前者是常见的「纯占位图」部署形态，后者说明配置出了问题。
    pub fn load(manifest_path: &Path) -> Result<Self, AppError> {
        if !manifest_path.exists() {
            tracing::warn!(
                "资源清单 {:?} 不存在，所有 id 请求都将回落为占位图",
                manifest_path
            );
            return Ok(Self::default());
        }

        let file = std::fs::File::open(manifest_path).map_err(|e| {
            AppError::Configuration(format!("打开资源清单 {:?} 失败: {}", manifest_path, e))
        })?;
        let manifest: ManifestFile = serde_yaml::from_reader(file).map_err(|e| {
            AppError::Configuration(format!("解析资源清单 {:?} 失败: {}", manifest_path, e))
        })?;

        let mut by_uid = HashMap::new();
        for entry in manifest.assets {
            if by_uid.insert(entry.uid, entry).is_some() {
                tracing::warn!("资源清单存在重复 uid，后者覆盖前者");
            }
        }

        tracing::info!("资源目录加载完成，共 {} 条", by_uid.len());
        Ok(Self { by_uid })
    }

    /// 由内存条目直接构建目录（测试与内嵌场景使用）
    pub fn from_entries(entries: impl IntoIterator<Item = AssetEntry>) -> Self {
        Self {
            by_uid: entries.into_iter().map(|e| (e.uid, e)).collect(),
        }
    }

    pub fn get(&self, uid: u32) -> Option<&AssetEntry> {
        self.by_uid.get(&uid)
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }
}
