// Thorium Uploader Library
// Thorium 批量上传核心库

// Thorium API 模块
pub mod api;

// 配置管理模块
pub mod config;

// 错误类型
pub mod error;

// 事件模块
pub mod events;

// 日志模块
pub mod logging;

// 批量上传模块
pub mod uploader;

// 导出常用类型
pub use api::{
    Origin, PipelineSelection, SampleRequest, ThoriumClient, TransferClient,
};
pub use config::AppConfig;
pub use error::{BatchError, TransferError, ValidationError};
pub use events::UploadEvent;
pub use uploader::{
    BatchMetadata, BatchOrchestrator, BatchSummary, FileSelection, FolderScanner, UploadTask,
    UploadTaskStatus,
};
