use serde::{Deserialize, Serialize};

/// 学群资料记录
///
/// 启动时从 CSV 载入，之后不可变，只由语料库持有。
/// 对应的向量存放在语料库索引中相同 id 的位置。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusRecord {
    /// 稳定序号（CSV 行序，从 0 开始）
    pub id: usize,
    /// 学群名称
    pub group_name: String,
    /// 学群介绍
    pub introduction: String,
    /// 学习内容
    pub learning_content: String,
    /// 相关学群
    pub related_groups: Option<String>,
    /// 详细资料链接
    pub link: String,
}

/// CSV 中的一行，尚未编码
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CorpusEntry {
    pub group_name: String,
    pub introduction: String,
    pub learning_content: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub related_groups: Option<String>,
    pub link: String,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

impl CorpusEntry {
    pub fn new(group_name: &str, introduction: &str, learning_content: &str) -> Self {
        Self {
            group_name: group_name.to_string(),
            introduction: introduction.to_string(),
            learning_content: learning_content.to_string(),
            related_groups: None,
            link: String::new(),
        }
    }

    pub fn with_related_groups(mut self, related_groups: &str) -> Self {
        self.related_groups = Some(related_groups.to_string());
        self
    }

    pub fn with_link(mut self, link: &str) -> Self {
        self.link = link.to_string();
        self
    }

    /// 组合用于编码的文本：名称、介绍、学习内容以单一空格连接，空字段略过
    pub fn composite_text(&self, include_related_groups: bool, include_link: bool) -> String {
        let mut parts: Vec<&str> = vec![
            self.group_name.trim(),
            self.introduction.trim(),
            self.learning_content.trim(),
        ];
        if include_related_groups {
            if let Some(related) = &self.related_groups {
                parts.push(related.trim());
            }
        }
        if include_link {
            parts.push(self.link.trim());
        }

        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn into_record(self, id: usize) -> CorpusRecord {
        CorpusRecord {
            id,
            group_name: self.group_name,
            introduction: self.introduction,
            learning_content: self.learning_content,
            related_groups: self.related_groups,
            link: self.link,
        }
    }
}

/// 单次检索结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    /// 语料记录 id
    pub record_id: usize,
    /// 学群名称
    pub group_name: String,
    /// 学群介绍
    pub introduction: String,
    /// 学习内容
    pub learning_content: String,
    /// 余弦相似度，范围 [-1, 1]
    pub similarity_score: f32,
}

impl RetrievalResult {
    pub fn from_record(record: &CorpusRecord, similarity_score: f32) -> Self {
        Self {
            record_id: record.id,
            group_name: record.group_name.clone(),
            introduction: record.introduction.clone(),
            learning_content: record.learning_content.clone(),
            similarity_score,
        }
    }

    /// 提示词上下文中的单个学群段落
    pub fn context_block(&self) -> String {
        format!(
            "【{}】\n{}\n{}",
            self.group_name, self.introduction, self.learning_content
        )
    }
}
