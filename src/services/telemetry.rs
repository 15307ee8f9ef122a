//! 遥测收集
//!
//! 记录每次请求的处理时间、吞吐量与系统资源读数。记录本身永不失败，
//! 量测不到的字段直接省略。
//!
//! 资源读数分两步：`sample` 可能等待（并且有时限），`commit` 是同步的，
//! 因此调用方可以先取得读数，再与其他状态变更一起提交。

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Disks, System};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::config::TelemetryConfig;
use crate::models::metrics::{GpuMetrics, MetricsSnapshot, SystemMetrics};
use crate::storage::{JsonlLog, METRICS_LOG};

/// nvidia-smi 查询时限
const GPU_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// 系统资源探测能力
#[async_trait]
pub trait ResourceProbe: Send + Sync + 'static {
    async fn system(&self) -> Option<SystemMetrics>;

    async fn gpus(&self) -> Vec<GpuMetrics>;
}

/// 不探测任何资源
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledProbe;

#[async_trait]
impl ResourceProbe for DisabledProbe {
    async fn system(&self) -> Option<SystemMetrics> {
        None
    }

    async fn gpus(&self) -> Vec<GpuMetrics> {
        Vec::new()
    }
}

/// 本机探测：sysinfo 读取 CPU / 内存 / 根目录磁盘，nvidia-smi 读取 GPU
pub struct HostProbe {
    // CPU 使用率需要两次刷新之间的差值，所以保留同一个 System
    system: Arc<Mutex<System>>,
    gpu_enabled: bool,
}

impl HostProbe {
    pub fn new(gpu_enabled: bool) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();

        Self {
            system: Arc::new(Mutex::new(system)),
            gpu_enabled,
        }
    }

    fn read_system(system: &Mutex<System>) -> SystemMetrics {
        let mut system = system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpus = system.cpus();
        let cpu_percent = if cpus.is_empty() {
            None
        } else {
            Some(cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32)
        };

        let total_memory = system.total_memory();
        let memory_percent = if total_memory == 0 {
            None
        } else {
            Some(system.used_memory() as f32 / total_memory as f32 * 100.0)
        };

        SystemMetrics {
            cpu_percent,
            memory_percent,
            disk_usage_percent: Self::disk_usage_percent(),
        }
    }

    fn disk_usage_percent() -> Option<f32> {
        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .or_else(|| disks.iter().next())?;

        let total = root.total_space();
        if total == 0 {
            return None;
        }
        let used = total.saturating_sub(root.available_space());
        Some(used as f32 / total as f32 * 100.0)
    }
}

#[async_trait]
impl ResourceProbe for HostProbe {
    async fn system(&self) -> Option<SystemMetrics> {
        let system = Arc::clone(&self.system);
        match tokio::task::spawn_blocking(move || Self::read_system(&system)).await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!("System probe failed: {}", e);
                None
            }
        }
    }

    async fn gpus(&self) -> Vec<GpuMetrics> {
        if !self.gpu_enabled {
            return Vec::new();
        }

        let mut command = Command::new("nvidia-smi");
        command
            .arg("--query-gpu=index,name,utilization.gpu,memory.used,memory.total,temperature.gpu")
            .arg("--format=csv,noheader,nounits")
            .kill_on_drop(true);

        match tokio::time::timeout(GPU_QUERY_TIMEOUT, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                debug!("nvidia-smi exited with {}", output.status);
                Vec::new()
            }
            Ok(Err(e)) => {
                debug!("nvidia-smi unavailable: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "nvidia-smi did not respond within {}s",
                    GPU_QUERY_TIMEOUT.as_secs()
                );
                Vec::new()
            }
        }
    }
}

/// 解析 `nvidia-smi --format=csv,noheader,nounits` 输出；无法解析的行略过
pub fn parse_nvidia_smi(output: &str) -> Vec<GpuMetrics> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 5 {
                return None;
            }
            Some(GpuMetrics {
                id: fields[0].parse().ok()?,
                name: fields[1].to_string(),
                load_percent: fields[2].parse().ok()?,
                memory_used_mb: fields[3].parse().ok()?,
                memory_total_mb: fields[4].parse().ok()?,
                temperature_c: fields.get(5).and_then(|t| t.parse().ok()),
            })
        })
        .collect()
}

/// 一次探测得到的资源读数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceReadings {
    pub system: Option<SystemMetrics>,
    pub gpus: Vec<GpuMetrics>,
}

pub struct TelemetryCollector {
    probe: Arc<dyn ResourceProbe>,
    probe_timeout: Duration,
    history: Mutex<VecDeque<MetricsSnapshot>>,
    capacity: usize,
    log: Option<Arc<JsonlLog>>,
}

impl TelemetryCollector {
    pub fn new(probe: Arc<dyn ResourceProbe>, capacity: usize, log: Option<Arc<JsonlLog>>) -> Self {
        let capacity = capacity.max(1);
        Self {
            probe,
            probe_timeout: Duration::from_millis(TelemetryConfig::default().probe_timeout_ms),
            history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            log,
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        let probe: Arc<dyn ResourceProbe> = if config.probe_enabled {
            Arc::new(HostProbe::new(config.gpu_enabled))
        } else {
            Arc::new(DisabledProbe)
        };
        let log = JsonlLog::in_dir(config.log_dir.as_deref(), METRICS_LOG);

        Self::new(probe, config.history_capacity, log)
            .with_probe_timeout(Duration::from_millis(config.probe_timeout_ms))
    }

    /// 读取系统资源；超过时限时返回空读数
    pub async fn sample(&self) -> ResourceReadings {
        let probe = async {
            let (system, gpus) = tokio::join!(self.probe.system(), self.probe.gpus());
            ResourceReadings { system, gpus }
        };

        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(readings) => readings,
            Err(_) => {
                warn!(
                    "Resource probe exceeded {}ms, recording without readings",
                    self.probe_timeout.as_millis()
                );
                ResourceReadings::default()
            }
        }
    }

    /// 由读数与计时生成快照并放入历史，不等待任何 I/O
    pub fn commit(
        &self,
        readings: ResourceReadings,
        start: Instant,
        end: Instant,
        input_len: usize,
        output_len: usize,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> MetricsSnapshot {
        let seconds = end.saturating_duration_since(start).as_secs_f64();
        let tokens_per_second = if seconds > 0.0 {
            Some((input_len + output_len) as f64 / seconds)
        } else {
            None
        };

        let snapshot = MetricsSnapshot {
            timestamp: Utc::now(),
            system_metrics: readings.system,
            gpu_metrics: readings.gpus,
            processing_time: Some(seconds),
            message_length: Some(input_len),
            response_length: Some(output_len),
            tokens_per_second,
            extra,
        };

        self.push(snapshot.clone());
        snapshot
    }

    /// 写入指标日志；失败只记录警告
    pub async fn persist(&self, snapshot: &MetricsSnapshot) {
        if let Some(log) = &self.log {
            log.append_or_warn(snapshot).await;
        }
    }

    /// 探测、提交并写入日志
    pub async fn record(
        &self,
        start: Instant,
        end: Instant,
        input_len: usize,
        output_len: usize,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> MetricsSnapshot {
        let readings = self.sample().await;
        let snapshot = self.commit(readings, start, end, input_len, output_len, extra);
        self.persist(&snapshot).await;
        snapshot
    }

    fn push(&self, snapshot: MetricsSnapshot) {
        let mut history = self.history.lock();
        history.push_back(snapshot);
        while history.len() > self.capacity {
            history.pop_front();
        }
    }

    /// 由旧到新的快照副本
    pub fn history(&self) -> Vec<MetricsSnapshot> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
