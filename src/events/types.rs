//! 上传事件类型定义
//!
//! 编排器在状态变化的同一临界区内广播这些事件，订阅者（CLI、上层界面）据此渲染

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 上传批次事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 任务创建
    Created {
        batch_id: Uuid,
        key: String,
        file_name: String,
        total_size: u64,
    },
    /// 状态变更
    StatusChanged {
        batch_id: Uuid,
        key: String,
        old_status: String,
        new_status: String,
    },
    /// 进度更新
    Progress {
        batch_id: Uuid,
        key: String,
        bytes_transferred: u64,
        total_size: u64,
        /// 批次整体进度 (0 - 100)
        batch_percent: u8,
    },
    /// 文件上传成功
    Uploaded {
        batch_id: Uuid,
        key: String,
        sha256: String,
        /// 服务器已有该文件，本次没有新建提交
        #[serde(default)]
        already_exists: bool,
    },
    /// 文件上传失败
    UploadFailed {
        batch_id: Uuid,
        key: String,
        error: String,
    },
    /// 上传被取消
    Cancelled {
        batch_id: Uuid,
        key: String,
        bytes_transferred: u64,
    },
    /// 某条流水线的反应创建成功
    ReactionSubmitted {
        batch_id: Uuid,
        key: String,
        pipeline: String,
        reaction_id: Uuid,
    },
    /// 某条流水线的反应创建失败
    ReactionFailed {
        batch_id: Uuid,
        key: String,
        pipeline: String,
        error: String,
    },
    /// 任务完成（所有反应都已有结果）
    Completed {
        batch_id: Uuid,
        key: String,
        completed_at: i64,
    },
    /// 批次被取消
    BatchCancelled { batch_id: Uuid },
    /// 批次被清空
    BatchReset { batch_id: Uuid },
}

impl UploadEvent {
    /// 获取批次 ID
    pub fn batch_id(&self) -> Uuid {
        match self {
            UploadEvent::Created { batch_id, .. }
            | UploadEvent::StatusChanged { batch_id, .. }
            | UploadEvent::Progress { batch_id, .. }
            | UploadEvent::Uploaded { batch_id, .. }
            | UploadEvent::UploadFailed { batch_id, .. }
            | UploadEvent::Cancelled { batch_id, .. }
            | UploadEvent::ReactionSubmitted { batch_id, .. }
            | UploadEvent::ReactionFailed { batch_id, .. }
            | UploadEvent::Completed { batch_id, .. }
            | UploadEvent::BatchCancelled { batch_id }
            | UploadEvent::BatchReset { batch_id } => *batch_id,
        }
    }

    /// 获取任务 key，批次级事件返回 None
    pub fn key(&self) -> Option<&str> {
        match self {
            UploadEvent::Created { key, .. }
            | UploadEvent::StatusChanged { key, .. }
            | UploadEvent::Progress { key, .. }
            | UploadEvent::Uploaded { key, .. }
            | UploadEvent::UploadFailed { key, .. }
            | UploadEvent::Cancelled { key, .. }
            | UploadEvent::ReactionSubmitted { key, .. }
            | UploadEvent::ReactionFailed { key, .. }
            | UploadEvent::Completed { key, .. } => Some(key),
            UploadEvent::BatchCancelled { .. } | UploadEvent::BatchReset { .. } => None,
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            UploadEvent::Created { .. } => "created",
            UploadEvent::StatusChanged { .. } => "status_changed",
            UploadEvent::Progress { .. } => "progress",
            UploadEvent::Uploaded { .. } => "uploaded",
            UploadEvent::UploadFailed { .. } => "upload_failed",
            UploadEvent::Cancelled { .. } => "cancelled",
            UploadEvent::ReactionSubmitted { .. } => "reaction_submitted",
            UploadEvent::ReactionFailed { .. } => "reaction_failed",
            UploadEvent::Completed { .. } => "completed",
            UploadEvent::BatchCancelled { .. } => "batch_cancelled",
            UploadEvent::BatchReset { .. } => "batch_reset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let batch_id = Uuid::new_v4();
        let event = UploadEvent::Progress {
            batch_id,
            key: "/tmp/a.exe".to_string(),
            bytes_transferred: 10,
            total_size: 20,
            batch_percent: 50,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "progress");
        assert_eq!(json["batch_percent"], 50);
        assert_eq!(event.event_type_name(), "progress");

        let back: UploadEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_batch_events_have_no_key() {
        let batch_id = Uuid::new_v4();
        let event = UploadEvent::BatchCancelled { batch_id };
        assert_eq!(event.key(), None);
        assert_eq!(event.batch_id(), batch_id);
    }
}
