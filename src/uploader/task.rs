// 上传任务定义
//
// 每个文件一个任务，状态只能通过下面的迁移方法改变：
// Queued -> Uploading -> Uploaded -> SubmittingReactions -> Completed
// Uploading -> Failed / Cancelled
// 反应提交失败不影响任务完成，只记录在对应的反应条目上
// 不合法的迁移返回 false，调用方据此忽略过期的回调

use crate::api::{PipelineSelection, ReactionRequest, SampleRequest};
use crate::uploader::reaction::{ReactionStatus, ReactionSubmissionSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 上传任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadTaskStatus {
    /// 等待准入
    Queued,
    /// 上传中
    Uploading,
    /// 上传成功，尚未提交反应
    Uploaded,
    /// 提交反应中
    SubmittingReactions,
    /// 已完成（所有反应都已有结果，包括提交失败的）
    Completed,
    /// 上传失败，重试需要重新上传
    Failed,
    /// 已取消
    Cancelled,
}

impl UploadTaskStatus {
    /// 是否已进入反应阶段（此后按完整大小计入进度）
    pub fn in_reaction_phase(&self) -> bool {
        matches!(
            self,
            UploadTaskStatus::SubmittingReactions | UploadTaskStatus::Completed
        )
    }

    /// 是否还在自动推进中（无需用户操作）
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            UploadTaskStatus::Uploading
                | UploadTaskStatus::Uploaded
                | UploadTaskStatus::SubmittingReactions
        )
    }
}

impl fmt::Display for UploadTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadTaskStatus::Queued => write!(f, "queued"),
            UploadTaskStatus::Uploading => write!(f, "uploading"),
            UploadTaskStatus::Uploaded => write!(f, "uploaded"),
            UploadTaskStatus::SubmittingReactions => write!(f, "submitting_reactions"),
            UploadTaskStatus::Completed => write!(f, "completed"),
            UploadTaskStatus::Failed => write!(f, "failed"),
            UploadTaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 上传任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    /// 任务 key（文件路径）
    pub key: String,
    /// 文件大小
    pub size: u64,
    /// 已上传字节数
    pub bytes_transferred: u64,
    pub status: UploadTaskStatus,
    /// 上传成功后的样本 sha256
    pub sha256: Option<String>,
    /// 错误信息
    pub error: Option<String>,
    /// 创建时构建的上传请求，重试时原样复用
    pub request: SampleRequest,
    /// 反应提交记录，上传成功后才存在
    pub reactions: Option<ReactionSubmissionSet>,
    /// 上传尝试次数
    pub attempts: u32,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 最近一次开始上传的时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,
}

impl UploadTask {
    /// 创建新的上传任务
    pub fn new(key: String, size: u64, request: SampleRequest) -> Self {
        Self {
            key,
            size,
            bytes_transferred: 0,
            status: UploadTaskStatus::Queued,
            sha256: None,
            error: None,
            request,
            reactions: None,
            attempts: 0,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 获得准入：Queued -> Uploading
    pub fn begin_upload(&mut self) -> bool {
        if self.status != UploadTaskStatus::Queued {
            return false;
        }
        self.status = UploadTaskStatus::Uploading;
        self.attempts += 1;
        self.started_at = Some(chrono::Utc::now().timestamp());
        true
    }

    /// 记录上传进度，返回进度是否有变化
    ///
    /// 只在 Uploading 时生效；字节数截断到文件大小且不回退
    pub fn record_progress(&mut self, bytes: u64) -> bool {
        if self.status != UploadTaskStatus::Uploading {
            return false;
        }
        let bytes = bytes.min(self.size);
        if bytes <= self.bytes_transferred {
            return false;
        }
        self.bytes_transferred = bytes;
        true
    }

    /// 上传成功：Uploading -> Uploaded，创建反应提交集合
    pub fn mark_uploaded(&mut self, sha256: &str, pipelines: &[PipelineSelection]) -> bool {
        if self.status != UploadTaskStatus::Uploading {
            return false;
        }
        self.status = UploadTaskStatus::Uploaded;
        self.bytes_transferred = self.size;
        self.sha256 = Some(sha256.to_string());
        self.error = None;
        self.reactions = Some(ReactionSubmissionSet::new(sha256, pipelines));
        true
    }

    /// 进入反应阶段：Uploaded -> SubmittingReactions
    ///
    /// 没有选中任何流水线时直接完成
    pub fn begin_reactions(&mut self) -> bool {
        if self.status != UploadTaskStatus::Uploaded {
            return false;
        }
        if self.reactions.as_ref().map_or(true, |r| r.is_empty()) {
            self.complete();
        } else {
            self.status = UploadTaskStatus::SubmittingReactions;
        }
        true
    }

    /// 取出待提交的反应请求
    pub fn take_reaction_requests(&mut self) -> Vec<ReactionRequest> {
        if self.status != UploadTaskStatus::SubmittingReactions {
            return Vec::new();
        }
        self.reactions
            .as_mut()
            .map(|r| r.take_pending())
            .unwrap_or_default()
    }

    /// 重新打开失败的反应，`pipeline` 为 None 时重开全部失败的反应
    ///
    /// 返回被重开的流水线名，非空时任务回到 SubmittingReactions
    pub fn reopen_reactions(&mut self, pipeline: Option<&str>) -> Vec<String> {
        if !self.status.in_reaction_phase() {
            return Vec::new();
        }
        let Some(reactions) = self.reactions.as_mut() else {
            return Vec::new();
        };
        let reopened = reactions.reset_for_retry(pipeline);
        if !reopened.is_empty() {
            self.status = UploadTaskStatus::SubmittingReactions;
            self.error = None;
            self.completed_at = None;
        }
        reopened
    }

    /// 所有反应都有结果后完成任务，返回状态是否变化
    ///
    /// 提交失败的反应不阻止完成，只计入反应失败数
    pub fn settle_reactions(&mut self) -> bool {
        if self.status != UploadTaskStatus::SubmittingReactions {
            return false;
        }
        if !self.reactions.as_ref().map_or(true, |r| r.is_resolved()) {
            return false;
        }
        self.complete();
        true
    }

    /// 上传失败：Uploading -> Failed
    pub fn mark_upload_failed(&mut self, error: String) -> bool {
        if self.status != UploadTaskStatus::Uploading {
            return false;
        }
        self.status = UploadTaskStatus::Failed;
        self.error = Some(error);
        true
    }

    /// 上传被取消：Uploading -> Cancelled，保留已上传字节数
    pub fn mark_cancelled(&mut self) -> bool {
        if self.status != UploadTaskStatus::Uploading {
            return false;
        }
        self.status = UploadTaskStatus::Cancelled;
        true
    }

    /// 重新排队：Failed / Cancelled -> Queued
    ///
    /// 上传请求保持不变，字节数从 0 开始
    pub fn requeue(&mut self) -> bool {
        if !matches!(
            self.status,
            UploadTaskStatus::Failed | UploadTaskStatus::Cancelled
        ) {
            return false;
        }
        self.status = UploadTaskStatus::Queued;
        self.bytes_transferred = 0;
        self.error = None;
        true
    }

    fn complete(&mut self) {
        self.status = UploadTaskStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }

    /// 计入批次进度的字节数
    ///
    /// 进入反应阶段前最多计 99%，避免上传完但反应未提交时显示 100%
    pub fn weighted_bytes(&self) -> u64 {
        if self.status.in_reaction_phase() {
            return self.size;
        }
        let cap = (self.size as u128 * 99 / 100) as u64;
        self.bytes_transferred.min(cap)
    }

    /// 按状态统计反应数量
    pub fn reaction_count(&self, status: ReactionStatus) -> usize {
        self.reactions.as_ref().map_or(0, |r| r.count(status))
    }

    /// 计算进度百分比
    pub fn progress(&self) -> f64 {
        if self.size == 0 {
            return if self.status.in_reaction_phase() { 100.0 } else { 0.0 };
        }
        (self.bytes_transferred as f64 / self.size as f64) * 100.0
    }
}
