//! 查询路由
//!
//! 最佳相似度严格大于门槛才使用检索上下文。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Route {
    /// 以检索结果组合提示词
    Augmented,
    /// 直接将原始问题交给语言模型
    Direct,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Augmented => "AUGMENTED",
            Route::Direct => "DIRECT",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryRouter {
    threshold: f32,
}

impl QueryRouter {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// 没有检索结果（空语料库）时走 Direct
    pub fn route(&self, best_score: Option<f32>) -> Route {
        match best_score {
            Some(score) if score > self.threshold => Route::Augmented,
            _ => Route::Direct,
        }
    }
}
