use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 系统资源读数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SystemMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_usage_percent: Option<f32>,
}

/// 单张 GPU 读数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpuMetrics {
    pub id: u32,
    pub name: String,
    /// 负载百分比
    pub load_percent: f32,
    /// 已用显存（MB）
    pub memory_used_mb: f32,
    /// 总显存（MB）
    pub memory_total_mb: f32,
    /// 温度（摄氏）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f32>,
}

/// 单次请求的指标快照
///
/// 量测失败的字段直接省略，不会中断请求。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_metrics: Option<SystemMetrics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpu_metrics: Vec<GpuMetrics>,
    /// 处理时间（秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_length: Option<usize>,
    /// (输入长度 + 输出长度) / 处理时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    /// 附加指标
    #[serde(default, flatten, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MetricsSnapshot {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            system_metrics: None,
            gpu_metrics: Vec::new(),
            processing_time: None,
            message_length: None,
            response_length: None,
            tokens_per_second: None,
            extra: serde_json::Map::new(),
        }
    }
}
