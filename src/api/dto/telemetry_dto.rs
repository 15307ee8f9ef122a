//! 遥测与模板 DTO

use serde::{Deserialize, Serialize};

use crate::models::metrics::MetricsSnapshot;
use crate::services::prompt::TemplateInfo;

/// 指标历史响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsHistoryResponse {
    pub count: usize,
    pub capacity: usize,
    pub snapshots: Vec<MetricsSnapshot>,
}

/// 清除指标历史响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearMetricsResponse {
    pub status: String,
    pub cleared: usize,
}

/// 可用模板列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesResponse {
    /// 默认类别的键
    pub default: String,
    pub templates: Vec<TemplateInfo>,
}
