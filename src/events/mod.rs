//! 事件模块
//!
//! 批次内所有任务的状态变化都会以事件形式广播出去
//! - `types.rs`: 上传事件类型定义
//! - `throttle.rs`: 进度事件节流，控制进度事件的发布频率

mod throttle;
mod types;

pub use throttle::*;
pub use types::*;
