// 上传批次
//
// 一次提交的所有文件共享同一份元数据（描述、分组、标签、来源）和流水线选择

use crate::api::{Origin, PipelineSelection, SampleRequest};
use crate::error::ValidationError;
use crate::uploader::reaction::ReactionStatus;
use crate::uploader::task::{UploadTask, UploadTaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// 用户选中的单个文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSelection {
    pub path: PathBuf,
    pub size: u64,
    /// 只属于这个文件的标签（如按目录名生成的标签），与批次标签合并
    #[serde(default)]
    pub tags: BTreeMap<String, BTreeSet<String>>,
}

impl FileSelection {
    pub fn new<P: Into<PathBuf>>(path: P, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            tags: BTreeMap::new(),
        }
    }

    /// 追加一个文件级标签
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags
            .entry(key.to_string())
            .or_default()
            .insert(value.to_string());
        self
    }

    /// 从本地路径读取文件大小
    pub async fn from_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("不是普通文件: {}", path.display()),
            ));
        }
        Ok(Self::new(path, metadata.len()))
    }

    /// 任务 key
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// 上传使用的文件名
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.key())
    }
}

/// 批次共享的元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub description: Option<String>,
    pub groups: Vec<String>,
    pub tags: BTreeMap<String, BTreeSet<String>>,
    pub origin: Option<Origin>,
    #[serde(default)]
    pub trigger_depth: u8,
}

impl BatchMetadata {
    /// 为一个文件构建上传请求，文件级标签并入批次标签
    pub fn request_for(&self, file: &FileSelection) -> SampleRequest {
        let mut tags = self.tags.clone();
        for (key, values) in &file.tags {
            tags.entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
        SampleRequest {
            path: file.path.clone(),
            file_name: file.file_name(),
            groups: self.groups.clone(),
            description: self.description.clone(),
            tags,
            origin: self.origin.clone(),
            trigger_depth: self.trigger_depth,
        }
    }
}

/// 批次统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub files_total: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub files_cancelled: usize,
    pub files_in_progress: usize,
    pub reactions_succeeded: usize,
    pub reactions_failed: usize,
    pub reactions_pending: usize,
}

/// 上传批次
#[derive(Debug, Clone)]
pub struct UploadBatch {
    pub id: Uuid,
    pub metadata: BatchMetadata,
    pub pipelines: Vec<PipelineSelection>,
    /// 按提交顺序排列的任务
    pub tasks: Vec<UploadTask>,
    /// key -> tasks 下标
    index: HashMap<String, usize>,
    pub total_bytes: u64,
    pub created_at: i64,
}

impl UploadBatch {
    /// 校验并创建批次
    ///
    /// 重复的文件 key 只保留第一个
    pub fn new(
        files: Vec<FileSelection>,
        metadata: BatchMetadata,
        pipelines: Vec<PipelineSelection>,
    ) -> Result<Self, ValidationError> {
        if files.is_empty() {
            return Err(ValidationError::NoFiles);
        }
        if metadata.groups.is_empty() {
            return Err(ValidationError::NoGroups);
        }

        let mut tasks = Vec::with_capacity(files.len());
        let mut index = HashMap::with_capacity(files.len());
        let mut total_bytes = 0u64;
        for file in files {
            let key = file.key();
            if index.contains_key(&key) {
                warn!("批次中存在重复文件，已忽略: {}", key);
                continue;
            }
            total_bytes += file.size;
            index.insert(key.clone(), tasks.len());
            tasks.push(UploadTask::new(key, file.size, metadata.request_for(&file)));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            metadata,
            pipelines,
            tasks,
            index,
            total_bytes,
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    pub fn task(&self, key: &str) -> Option<&UploadTask> {
        self.index.get(key).map(|&i| &self.tasks[i])
    }

    pub fn task_mut(&mut self, key: &str) -> Option<&mut UploadTask> {
        self.index.get(key).map(|&i| &mut self.tasks[i])
    }

    /// 处于指定状态的任务 key
    pub fn keys_where<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&UploadTask) -> bool,
    {
        self.tasks
            .iter()
            .filter(|t| predicate(t))
            .map(|t| t.key.clone())
            .collect()
    }

    /// 由当前任务状态重新计算统计
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            files_total: self.tasks.len(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.status {
                UploadTaskStatus::Completed => summary.files_succeeded += 1,
                UploadTaskStatus::Failed => summary.files_failed += 1,
                UploadTaskStatus::Cancelled => summary.files_cancelled += 1,
                UploadTaskStatus::Queued
                | UploadTaskStatus::Uploading
                | UploadTaskStatus::Uploaded
                | UploadTaskStatus::SubmittingReactions => summary.files_in_progress += 1,
            }
            summary.reactions_succeeded += task.reaction_count(ReactionStatus::Submitted);
            summary.reactions_failed += task.reaction_count(ReactionStatus::Failed);
            summary.reactions_pending += task.reaction_count(ReactionStatus::Pending);
        }
        summary
    }
}
