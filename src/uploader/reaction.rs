// 反应提交集合
//
// 文件上传成功后，为每条选中的流水线各提交一个反应
// 每条流水线独立跟踪，重试只覆盖该 (sha256, 流水线) 的上一次结果

use crate::api::{PipelineSelection, ReactionOutcome, ReactionRequest};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 单条反应的提交状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionStatus {
    /// 等待提交
    Pending,
    /// 已成功创建
    Submitted,
    /// 提交失败
    Failed,
}

impl fmt::Display for ReactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactionStatus::Pending => write!(f, "pending"),
            ReactionStatus::Submitted => write!(f, "submitted"),
            ReactionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 单条流水线的反应提交记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEntry {
    pub pipeline: String,
    pub group: String,
    pub status: ReactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 已尝试次数
    pub attempts: u32,
    /// 已发出请求、尚未拿到结果
    #[serde(skip)]
    in_flight: bool,
}

impl ReactionEntry {
    fn new(selection: &PipelineSelection) -> Self {
        Self {
            pipeline: selection.name.clone(),
            group: selection.group.clone(),
            status: ReactionStatus::Pending,
            reaction_id: None,
            error: None,
            attempts: 0,
            in_flight: false,
        }
    }

    fn selection(&self) -> PipelineSelection {
        PipelineSelection::new(self.pipeline.clone(), self.group.clone())
    }
}

/// 一个样本的全部反应提交
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionSubmissionSet {
    /// 样本 sha256
    pub sha256: String,
    pub entries: Vec<ReactionEntry>,
}

impl ReactionSubmissionSet {
    /// 为样本创建提交集合，同名流水线只保留第一条
    pub fn new(sha256: &str, pipelines: &[PipelineSelection]) -> Self {
        let mut entries: Vec<ReactionEntry> = Vec::with_capacity(pipelines.len());
        for selection in pipelines {
            if entries.iter().any(|e| e.pipeline == selection.name) {
                continue;
            }
            entries.push(ReactionEntry::new(selection));
        }
        Self {
            sha256: sha256.to_string(),
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, pipeline: &str) -> Option<&ReactionEntry> {
        self.entries.iter().find(|e| e.pipeline == pipeline)
    }

    /// 为尚未发出请求的 Pending 记录生成请求，并记一次尝试
    pub fn take_pending(&mut self) -> Vec<ReactionRequest> {
        let sha256 = self.sha256.clone();
        self.entries
            .iter_mut()
            .filter(|e| e.status == ReactionStatus::Pending && !e.in_flight)
            .map(|e| {
                e.in_flight = true;
                e.attempts += 1;
                ReactionRequest::for_sample(&e.selection(), &sha256)
            })
            .collect()
    }

    /// 在途中的记录
    fn in_flight_entry(&mut self, pipeline: &str) -> Option<&mut ReactionEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.pipeline == pipeline && e.status == ReactionStatus::Pending && e.in_flight)
    }

    /// 应用一次提交调用的结果，返回实际更新的记录（用于发事件）
    ///
    /// 请求了但服务器没有返回结果的流水线视为失败
    pub fn apply(
        &mut self,
        requested: &[ReactionRequest],
        outcomes: &[ReactionOutcome],
    ) -> Vec<ReactionEntry> {
        let mut applied = Vec::new();
        for request in requested {
            let Some(entry) = self.in_flight_entry(&request.pipeline) else {
                continue;
            };
            entry.in_flight = false;
            match outcomes.iter().find(|o| o.pipeline == request.pipeline) {
                Some(ReactionOutcome { result: Ok(id), .. }) => {
                    entry.status = ReactionStatus::Submitted;
                    entry.reaction_id = Some(*id);
                    entry.error = None;
                }
                Some(ReactionOutcome { result: Err(err), .. }) => {
                    entry.status = ReactionStatus::Failed;
                    entry.reaction_id = None;
                    entry.error = Some(err.clone());
                }
                None => {
                    entry.status = ReactionStatus::Failed;
                    entry.error = Some("服务器未返回该流水线的提交结果".to_string());
                }
            }
            applied.push(entry.clone());
        }
        applied
    }

    /// 整个提交调用失败，本次请求的记录全部标记为失败
    pub fn mark_failed(&mut self, requested: &[ReactionRequest], error: &str) -> Vec<ReactionEntry> {
        let mut failed = Vec::new();
        for request in requested {
            let Some(entry) = self.in_flight_entry(&request.pipeline) else {
                continue;
            };
            entry.in_flight = false;
            entry.status = ReactionStatus::Failed;
            entry.error = Some(error.to_string());
            failed.push(entry.clone());
        }
        failed
    }

    /// 把失败的记录重置为 Pending，`pipeline` 为 None 时重置全部失败记录
    ///
    /// 返回被重置的流水线名
    pub fn reset_for_retry(&mut self, pipeline: Option<&str>) -> Vec<String> {
        self.entries
            .iter_mut()
            .filter(|e| e.status == ReactionStatus::Failed)
            .filter(|e| pipeline.map_or(true, |p| e.pipeline == p))
            .map(|e| {
                e.status = ReactionStatus::Pending;
                e.error = None;
                e.pipeline.clone()
            })
            .collect()
    }

    /// 所有记录都已有结果（成功或失败）
    pub fn is_resolved(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.status != ReactionStatus::Pending)
    }

    pub fn count(&self, status: ReactionStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}
