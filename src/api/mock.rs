// 测试用的脚本化传输客户端
//
// 按文件名 / 流水线名预设每次调用的结果，未预设时默认成功

use crate::api::{
    ProgressCallback, ReactionOutcome, ReactionRequest, SampleRequest, SampleSubmissionResponse,
    TransferClient,
};
use crate::error::TransferError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 单次上传调用的行为
#[derive(Debug, Clone)]
pub enum UploadScript {
    /// 正常完成
    Succeed,
    /// 返回网络错误
    Fail(String),
    /// 挂起直到批次取消
    HangUntilCancelled,
    /// 永远挂起且不响应取消
    HangForever,
    /// 服务器已有该文件
    AlreadyExists,
}

/// 单条流水线提交的行为
#[derive(Debug, Clone)]
pub enum ReactionScript {
    Accept,
    Reject(String),
    /// 整个提交调用失败
    TransportError,
}

/// 在途计数守卫，上传 future 被丢弃时同样会减计数
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockClient {
    upload_scripts: Mutex<HashMap<String, VecDeque<UploadScript>>>,
    reaction_scripts: Mutex<HashMap<String, VecDeque<ReactionScript>>>,
    upload_requests: Mutex<Vec<SampleRequest>>,
    reaction_requests: Mutex<Vec<(String, Vec<String>)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    /// 为某个文件预设后续上传调用的行为
    pub fn script_upload(&self, file_name: &str, scripts: Vec<UploadScript>) {
        self.upload_scripts
            .lock()
            .entry(file_name.to_string())
            .or_default()
            .extend(scripts);
    }

    /// 为某条流水线预设后续提交的行为
    pub fn script_reaction(&self, pipeline: &str, scripts: Vec<ReactionScript>) {
        self.reaction_scripts
            .lock()
            .entry(pipeline.to_string())
            .or_default()
            .extend(scripts);
    }

    /// 清空所有尚未消费的上传脚本
    pub fn clear_upload_scripts(&self) {
        self.upload_scripts.lock().clear();
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_requests.lock().len()
    }

    pub fn reaction_calls(&self) -> usize {
        self.reaction_requests.lock().len()
    }

    /// 某个文件收到的全部上传请求
    pub fn uploads_of(&self, file_name: &str) -> Vec<SampleRequest> {
        self.upload_requests
            .lock()
            .iter()
            .filter(|r| r.file_name == file_name)
            .cloned()
            .collect()
    }

    /// 全部反应提交记录 (sha256, 流水线列表)
    pub fn reaction_log(&self) -> Vec<(String, Vec<String>)> {
        self.reaction_requests.lock().clone()
    }

    /// 观察到的最大并发上传数
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn next_upload(&self, file_name: &str) -> UploadScript {
        self.upload_scripts
            .lock()
            .get_mut(file_name)
            .and_then(|q| q.pop_front())
            .unwrap_or(UploadScript::Succeed)
    }

    fn next_reaction(&self, pipeline: &str) -> ReactionScript {
        self.reaction_scripts
            .lock()
            .get_mut(pipeline)
            .and_then(|q| q.pop_front())
            .unwrap_or(ReactionScript::Accept)
    }
}

#[async_trait]
impl TransferClient for MockClient {
    async fn upload_sample(
        &self,
        request: &SampleRequest,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<SampleSubmissionResponse, TransferError> {
        self.upload_requests.lock().push(request.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        match self.next_upload(&request.file_name) {
            UploadScript::Succeed => {
                progress(1024);
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                }
                progress(2048);
                Ok(SampleSubmissionResponse {
                    sha256: format!("sha256-{}", request.file_name),
                    sha1: String::new(),
                    md5: String::new(),
                    id: Some(Uuid::new_v4()),
                })
            }
            UploadScript::AlreadyExists => {
                progress(1024);
                Ok(SampleSubmissionResponse::already_exists(format!(
                    "sha256-{}",
                    request.file_name
                )))
            }
            UploadScript::Fail(msg) => {
                tokio::time::sleep(self.delay).await;
                Err(TransferError::Network(msg))
            }
            UploadScript::HangUntilCancelled => {
                progress(512);
                cancel.cancelled().await;
                Err(TransferError::Cancelled)
            }
            UploadScript::HangForever => {
                progress(512);
                futures::future::pending::<()>().await;
                Err(TransferError::Cancelled)
            }
        }
    }

    async fn submit_reactions(
        &self,
        sha256: &str,
        requests: &[ReactionRequest],
    ) -> Result<Vec<ReactionOutcome>, TransferError> {
        self.reaction_requests.lock().push((
            sha256.to_string(),
            requests.iter().map(|r| r.pipeline.clone()).collect(),
        ));
        tokio::task::yield_now().await;

        let scripts: Vec<_> = requests
            .iter()
            .map(|r| (r.pipeline.clone(), self.next_reaction(&r.pipeline)))
            .collect();
        if scripts
            .iter()
            .any(|(_, s)| matches!(s, ReactionScript::TransportError))
        {
            return Err(TransferError::Network("connection reset".to_string()));
        }

        Ok(scripts
            .into_iter()
            .map(|(pipeline, script)| ReactionOutcome {
                pipeline,
                result: match script {
                    ReactionScript::Reject(msg) => Err(msg),
                    _ => Ok(Uuid::new_v4()),
                },
            })
            .collect())
    }
}
