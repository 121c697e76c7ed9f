// 错误类型定义
//
// 按影响范围划分：
// - ValidationError：批次级，提交前直接拒绝，不发起任何网络请求
// - TransferError：单个任务（或单次反应提交调用）级，不影响同批次其他任务
// - BatchError：编排器操作本身的错误（任务不存在、状态不允许重试等）

use thiserror::Error;

/// 批次校验错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// 未选择任何文件
    #[error("未选择任何文件")]
    NoFiles,
    /// 未选择任何分组
    #[error("至少需要选择一个分组")]
    NoGroups,
}

/// 传输错误（上传调用或反应提交调用）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// 连接、DNS、超时等网络层错误
    #[error("网络错误: {0}")]
    Network(String),
    /// 服务器返回非成功状态码
    #[error("服务器错误 {status}: {message}")]
    Server { status: u16, message: String },
    /// 读取本地文件失败
    #[error("读取文件失败: {0}")]
    Io(String),
    /// 响应体无法解析
    #[error("解析响应失败: {0}")]
    Decode(String),
    /// 批次被主动取消（不是真正的失败）
    #[error("上传已取消")]
    Cancelled,
}

impl TransferError {
    /// 是否值得重试
    ///
    /// 仅用于日志提示，实际重试始终由用户手动触发
    pub fn is_retriable(&self) -> bool {
        match self {
            TransferError::Network(_) => true,
            TransferError::Server { status, .. } => *status >= 500 || *status == 429,
            TransferError::Io(_) | TransferError::Decode(_) => false,
            TransferError::Cancelled => false,
        }
    }

    /// 是否为取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransferError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransferError::Server {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            TransferError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}

/// 编排器操作错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// 批次校验失败
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// 当前没有活跃批次
    #[error("当前没有活跃的上传批次")]
    NoActiveBatch,
    /// 任务不存在
    #[error("任务不存在: {0}")]
    TaskNotFound(String),
    /// 任务下没有该流水线的反应
    #[error("任务 {key} 没有流水线 {pipeline} 的反应提交记录")]
    ReactionNotFound { key: String, pipeline: String },
    /// 当前状态不允许重试
    #[error("任务 {key} 当前状态 {status} 不支持重试")]
    NotRetryable { key: String, status: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(TransferError::Network("reset".to_string()).is_retriable());
        assert!(TransferError::Server {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_retriable());
        assert!(TransferError::Server {
            status: 429,
            message: "slow down".to_string()
        }
        .is_retriable());
        assert!(!TransferError::Server {
            status: 400,
            message: "bad group".to_string()
        }
        .is_retriable());
        assert!(!TransferError::Cancelled.is_retriable());
        assert!(TransferError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_validation_converts_into_batch_error() {
        let err: BatchError = ValidationError::NoGroups.into();
        assert_eq!(err, BatchError::Validation(ValidationError::NoGroups));
        assert_eq!(err.to_string(), "至少需要选择一个分组");
    }
}
