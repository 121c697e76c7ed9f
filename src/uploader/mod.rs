// 批量上传模块
//
// - admission：同一批次的并发上传上限（公平信号量，无轮询）
// - task / reaction：单个文件的状态机和反应提交记录
// - progress：按字节加权的批次进度
// - cancel：批次取消令牌
// - orchestrator：对外的提交 / 重试 / 取消 / 统计入口

pub mod admission;
pub mod batch;
pub mod cancel;
pub mod folder;
pub mod orchestrator;
pub mod progress;
pub mod reaction;
pub mod task;

pub use admission::{AdmissionController, AdmissionPermit, DEFAULT_MAX_CONCURRENT_UPLOADS};
pub use batch::{BatchMetadata, BatchSummary, FileSelection, UploadBatch};
pub use cancel::CancellationController;
pub use folder::{format_bytes, FolderScanner, ScanOptions};
pub use orchestrator::{BatchOrchestrator, BatchSnapshot};
pub use progress::{compute_percent, ProgressAggregator};
pub use reaction::{ReactionEntry, ReactionStatus, ReactionSubmissionSet};
pub use task::{UploadTask, UploadTaskStatus};
