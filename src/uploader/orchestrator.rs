// 批次编排器
//
// 持有当前批次的全部状态，对外提供提交、重试、取消、统计等操作
// - 所有状态在一把 parking_lot::Mutex 下修改，锁从不跨 .await 持有
// - 状态迁移、进度重算和事件广播在同一个临界区内完成
// - 上传许可在任务离开 Uploading 之后才归还
// - 每个上传驱动带编号和启动时的取消令牌，过期驱动的进度和结果一律丢弃

use crate::api::{PipelineSelection, ProgressCallback, TransferClient};
use crate::config::UploadConfig;
use crate::error::{BatchError, TransferError};
use crate::events::{ProgressThrottler, UploadEvent};
use crate::uploader::admission::AdmissionController;
use crate::uploader::batch::{BatchMetadata, BatchSummary, FileSelection, UploadBatch};
use crate::uploader::cancel::CancellationController;
use crate::uploader::progress::ProgressAggregator;
use crate::uploader::reaction::{ReactionEntry, ReactionStatus};
use crate::uploader::task::{UploadTask, UploadTaskStatus};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 批次快照，用于展示
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub batch_id: Uuid,
    /// 批次整体进度 (0 - 100)
    pub percent: u8,
    pub cancelled: bool,
    /// 并发上传上限
    pub max_concurrent: usize,
    /// 当前持有上传许可的任务 key
    pub admitted: Vec<String>,
    pub summary: BatchSummary,
    pub tasks: Vec<UploadTask>,
}

/// 一次上传驱动的身份
struct UploadDriver {
    batch_id: Uuid,
    key: String,
    id: u64,
    token: CancellationToken,
}

/// 当前批次及其运行时状态
struct ActiveBatch {
    batch: UploadBatch,
    admission: AdmissionController,
    cancel: CancellationController,
    progress: ProgressAggregator,
    throttlers: HashMap<String, ProgressThrottler>,
    /// key -> (驱动编号, 驱动使用的令牌)
    drivers: HashMap<String, (u64, CancellationToken)>,
    next_driver: u64,
}

impl ActiveBatch {
    fn new(batch: UploadBatch, limit: usize) -> Self {
        Self {
            batch,
            admission: AdmissionController::new(limit),
            cancel: CancellationController::new(),
            progress: ProgressAggregator::new(),
            throttlers: HashMap::new(),
            drivers: HashMap::new(),
            next_driver: 0,
        }
    }

    /// 为任务登记新的上传驱动，旧驱动随之失效
    fn register_driver(&mut self, key: &str) -> UploadDriver {
        self.next_driver += 1;
        let token = self.cancel.token();
        self.drivers
            .insert(key.to_string(), (self.next_driver, token.clone()));
        UploadDriver {
            batch_id: self.batch.id,
            key: key.to_string(),
            id: self.next_driver,
            token,
        }
    }

    fn is_current_driver(&self, key: &str, id: u64) -> bool {
        self.drivers.get(key).map(|(current, _)| *current) == Some(id)
    }

    fn has_live_driver(&self, key: &str) -> bool {
        self.drivers
            .get(key)
            .map_or(false, |(_, token)| !token.is_cancelled())
    }

    /// 没有任务能在无人干预下继续推进
    fn is_idle(&self) -> bool {
        self.batch.tasks.iter().all(|t| match t.status {
            UploadTaskStatus::Queued => !self.has_live_driver(&t.key),
            status => !status.is_active(),
        })
    }

    fn percent(&self) -> u8 {
        self.progress
            .observe(&self.batch.tasks, self.batch.total_bytes)
    }
}

/// 批次编排器
#[derive(Clone)]
pub struct BatchOrchestrator {
    client: Arc<dyn TransferClient>,
    config: UploadConfig,
    state: Arc<Mutex<Option<ActiveBatch>>>,
    events: broadcast::Sender<UploadEvent>,
    /// 任意任务状态变化时唤醒 wait_idle
    changed: Arc<Notify>,
}

impl BatchOrchestrator {
    pub fn new(client: Arc<dyn TransferClient>, config: UploadConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            client,
            config,
            state: Arc::new(Mutex::new(None)),
            events,
            changed: Arc::new(Notify::new()),
        }
    }

    /// 订阅批次事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// 提交新批次
    ///
    /// 校验失败时不会发起任何网络请求；已有批次会被取消并替换。
    /// 需要在 tokio 运行时内调用
    pub fn submit_batch(
        &self,
        files: Vec<FileSelection>,
        metadata: BatchMetadata,
        pipelines: Vec<PipelineSelection>,
    ) -> Result<Uuid, BatchError> {
        let batch = UploadBatch::new(files, metadata, pipelines)?;
        let batch_id = batch.id;

        let drivers = {
            let mut guard = self.state.lock();
            if let Some(previous) = guard.take() {
                previous.cancel.abort();
                info!("新批次替换旧批次: old={}, new={}", previous.batch.id, batch_id);
                self.emit(UploadEvent::BatchReset {
                    batch_id: previous.batch.id,
                });
            }

            let mut active = ActiveBatch::new(batch, self.config.max_concurrent_uploads);
            info!(
                "提交上传批次: id={}, 文件数={}, 总大小={}, 流水线数={}",
                batch_id,
                active.batch.tasks.len(),
                active.batch.total_bytes,
                active.batch.pipelines.len()
            );
            for task in &active.batch.tasks {
                self.emit(UploadEvent::Created {
                    batch_id,
                    key: task.key.clone(),
                    file_name: task.request.file_name.clone(),
                    total_size: task.size,
                });
            }
            let keys = active.batch.keys_where(|_| true);
            let drivers: Vec<_> = keys.iter().map(|k| active.register_driver(k)).collect();
            *guard = Some(active);
            drivers
        };

        for driver in drivers {
            self.spawn_upload(driver);
        }
        self.changed.notify_waiters();
        Ok(batch_id)
    }

    /// 重试单个任务
    ///
    /// Failed / Cancelled 重新上传原始请求；有失败反应的任务只重新提交失败的反应
    pub fn retry_task(&self, key: &str) -> Result<(), BatchError> {
        enum Retry {
            Upload(UploadDriver),
            Reactions(Uuid),
        }

        let retry = {
            let mut guard = self.state.lock();
            let active = guard.as_mut().ok_or(BatchError::NoActiveBatch)?;
            let batch_id = active.batch.id;
            let (status, failed_reactions) = active
                .batch
                .task(key)
                .map(|t| (t.status, t.reaction_count(ReactionStatus::Failed)))
                .ok_or_else(|| BatchError::TaskNotFound(key.to_string()))?;

            match status {
                UploadTaskStatus::Failed | UploadTaskStatus::Cancelled => {
                    active.cancel.renew();
                    Retry::Upload(self.requeue(active, key))
                }
                status if status.in_reaction_phase() && failed_reactions > 0 => {
                    self.reopen(active, key, None);
                    Retry::Reactions(batch_id)
                }
                other => {
                    return Err(BatchError::NotRetryable {
                        key: key.to_string(),
                        status: other.to_string(),
                    })
                }
            }
        };

        match retry {
            Retry::Upload(driver) => self.spawn_upload(driver),
            Retry::Reactions(batch_id) => self.spawn_reactions(batch_id, key.to_string()),
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// 重试所有上传失败的任务，返回被重试的 key
    pub fn retry_all_failed_tasks(&self) -> Result<Vec<String>, BatchError> {
        let (keys, drivers) = {
            let mut guard = self.state.lock();
            let active = guard.as_mut().ok_or(BatchError::NoActiveBatch)?;
            let keys = active
                .batch
                .keys_where(|t| t.status == UploadTaskStatus::Failed);
            if !keys.is_empty() {
                active.cancel.renew();
            }
            let drivers: Vec<_> = keys.iter().map(|k| self.requeue(active, k)).collect();
            (keys, drivers)
        };

        info!("重试上传失败的任务: {} 个", keys.len());
        for driver in drivers {
            self.spawn_upload(driver);
        }
        self.changed.notify_waiters();
        Ok(keys)
    }

    /// 重试单条失败的反应
    pub fn retry_reaction(&self, key: &str, pipeline: &str) -> Result<(), BatchError> {
        let batch_id = {
            let mut guard = self.state.lock();
            let active = guard.as_mut().ok_or(BatchError::NoActiveBatch)?;
            let task = active
                .batch
                .task(key)
                .ok_or_else(|| BatchError::TaskNotFound(key.to_string()))?;
            let entry = task
                .reactions
                .as_ref()
                .and_then(|r| r.entry(pipeline))
                .ok_or_else(|| BatchError::ReactionNotFound {
                    key: key.to_string(),
                    pipeline: pipeline.to_string(),
                })?;
            if entry.status != ReactionStatus::Failed {
                return Err(BatchError::NotRetryable {
                    key: key.to_string(),
                    status: format!("{}:{}", pipeline, entry.status),
                });
            }
            self.reopen(active, key, Some(pipeline));
            active.batch.id
        };

        self.spawn_reactions(batch_id, key.to_string());
        self.changed.notify_waiters();
        Ok(())
    }

    /// 重试所有失败的反应，返回被重试的 (任务, 流水线) 数量
    pub fn retry_all_failed_reactions(&self) -> Result<usize, BatchError> {
        let (batch_id, keys, count) = {
            let mut guard = self.state.lock();
            let active = guard.as_mut().ok_or(BatchError::NoActiveBatch)?;
            let keys = active.batch.keys_where(|t| {
                t.status.in_reaction_phase()
                    && t.reactions
                        .as_ref()
                        .map_or(false, |r| r.count(ReactionStatus::Failed) > 0)
            });
            let count: usize = keys.iter().map(|k| self.reopen(active, k, None)).sum();
            (active.batch.id, keys, count)
        };

        info!("重试失败的反应: {} 条", count);
        for key in keys {
            self.spawn_reactions(batch_id, key);
        }
        self.changed.notify_waiters();
        Ok(count)
    }

    /// 取消批次
    ///
    /// 上传中的任务立即变为 Cancelled，排队中的任务不再被准入；已开始的反应提交不受影响
    pub fn cancel_batch(&self) -> Result<(), BatchError> {
        {
            let mut guard = self.state.lock();
            let active = guard.as_mut().ok_or(BatchError::NoActiveBatch)?;
            if !active.cancel.abort() {
                return Ok(());
            }
            let batch_id = active.batch.id;
            let mut cancelled = 0;
            for task in active.batch.tasks.iter_mut() {
                if task.mark_cancelled() {
                    cancelled += 1;
                    self.emit_status(
                        batch_id,
                        &task.key,
                        UploadTaskStatus::Uploading,
                        UploadTaskStatus::Cancelled,
                    );
                    self.emit(UploadEvent::Cancelled {
                        batch_id,
                        key: task.key.clone(),
                        bytes_transferred: task.bytes_transferred,
                    });
                }
            }
            active.progress.reset();
            info!("批次已取消: id={}, 中断上传 {} 个", batch_id, cancelled);
            self.emit(UploadEvent::BatchCancelled { batch_id });
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// 恢复已取消的批次：换发令牌，重新准入排队中和已取消的任务
    ///
    /// 返回重新启动的任务数
    pub fn restart_batch(&self) -> Result<usize, BatchError> {
        let drivers = {
            let mut guard = self.state.lock();
            let active = guard.as_mut().ok_or(BatchError::NoActiveBatch)?;
            active.cancel.renew();

            let cancelled = active
                .batch
                .keys_where(|t| t.status == UploadTaskStatus::Cancelled);
            let mut drivers: Vec<_> = cancelled
                .iter()
                .map(|k| self.requeue(active, k))
                .collect();

            // 只为失去驱动的排队任务补驱动
            let orphaned: Vec<_> = active
                .batch
                .keys_where(|t| t.status == UploadTaskStatus::Queued)
                .into_iter()
                .filter(|k| !active.has_live_driver(k))
                .collect();
            drivers.extend(orphaned.iter().map(|k| active.register_driver(k)));
            drivers
        };

        info!("恢复批次: 重新启动 {} 个任务", drivers.len());
        let restarted = drivers.len();
        for driver in drivers {
            self.spawn_upload(driver);
        }
        self.changed.notify_waiters();
        Ok(restarted)
    }

    /// 取消并丢弃当前批次
    pub fn reset(&self) -> Result<(), BatchError> {
        {
            let mut guard = self.state.lock();
            let active = guard.take().ok_or(BatchError::NoActiveBatch)?;
            active.cancel.abort();
            active.progress.reset();
            info!("批次已清空: id={}", active.batch.id);
            self.emit(UploadEvent::BatchReset {
                batch_id: active.batch.id,
            });
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// 由当前任务状态计算统计，没有批次时全为 0
    pub fn compute_summary(&self) -> BatchSummary {
        self.state
            .lock()
            .as_ref()
            .map(|a| a.batch.summary())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<BatchSnapshot> {
        let guard = self.state.lock();
        let active = guard.as_ref()?;
        Some(BatchSnapshot {
            batch_id: active.batch.id,
            percent: active.percent(),
            cancelled: active.cancel.is_aborted(),
            max_concurrent: active.admission.limit(),
            admitted: active.admission.holders(),
            summary: active.batch.summary(),
            tasks: active.batch.tasks.clone(),
        })
    }

    /// 等待批次进入没有任务能自动推进的状态
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let idle = self
                .state
                .lock()
                .as_ref()
                .map_or(true, |a| a.is_idle());
            if idle {
                return;
            }
            notified.await;
        }
    }

    // ---------------------------------------------------------------
    // 上传驱动
    // ---------------------------------------------------------------

    fn spawn_upload(&self, driver: UploadDriver) {
        let this = self.clone();
        tokio::spawn(async move {
            let (batch_id, key, id) = (driver.batch_id, driver.key.clone(), driver.id);
            this.drive_upload(driver).await;
            this.with_batch(batch_id, |active| {
                if active.is_current_driver(&key, id) {
                    active.drivers.remove(&key);
                }
            });
            this.changed.notify_waiters();
        });
    }

    async fn drive_upload(&self, driver: UploadDriver) {
        let UploadDriver {
            batch_id,
            key,
            id,
            token,
        } = driver;

        let Some(admission) = self.with_batch(batch_id, |a| a.admission.clone()) else {
            return;
        };
        let Some(permit) = admission.acquire_or_cancel(&key, &token).await else {
            debug!("任务未获准入即退出: key={}", key);
            return;
        };

        // Queued -> Uploading
        let interval = self.config.progress_interval_ms;
        let request = self
            .with_batch(batch_id, |active| {
                if token.is_cancelled() || !active.is_current_driver(&key, id) {
                    return None;
                }
                let task = active.batch.task_mut(&key)?;
                if !task.begin_upload() {
                    return None;
                }
                let request = task.request.clone();
                info!("开始上传: key={}, 第 {} 次尝试", key, task.attempts);
                active
                    .throttlers
                    .entry(key.clone())
                    .or_insert_with(|| ProgressThrottler::with_millis(interval))
                    .reset();
                self.emit_status(
                    batch_id,
                    &key,
                    UploadTaskStatus::Queued,
                    UploadTaskStatus::Uploading,
                );
                Some(request)
            })
            .flatten();
        let Some(request) = request else {
            return;
        };
        self.changed.notify_waiters();

        let progress: ProgressCallback = {
            let this = self.clone();
            let key = key.clone();
            Arc::new(move |bytes| this.on_progress(batch_id, &key, id, bytes))
        };

        // 客户端不响应取消时由这里中断
        let result = tokio::select! {
            result = self.client.upload_sample(&request, progress, token.clone()) => result,
            _ = token.cancelled() => Err(TransferError::Cancelled),
        };

        let reactions_ready = self
            .with_batch(batch_id, |active| self.finish_upload(active, &key, id, result))
            .unwrap_or(false);
        // 任务已离开 Uploading
        debug!("归还上传许可: key={}", permit.key());
        permit.release();
        self.changed.notify_waiters();

        if reactions_ready {
            self.submit_reactions(batch_id, &key).await;
        }
    }

    /// 处理上传结果，返回是否需要提交反应
    fn finish_upload(
        &self,
        active: &mut ActiveBatch,
        key: &str,
        driver_id: u64,
        result: Result<crate::api::SampleSubmissionResponse, TransferError>,
    ) -> bool {
        // 任务已被重试接管，这个结果属于上一次尝试
        if !active.is_current_driver(key, driver_id) {
            debug!("忽略过期驱动的上传结果: key={}, driver={}", key, driver_id);
            return false;
        }
        let batch_id = active.batch.id;
        let pipelines = active.batch.pipelines.clone();
        let Some(task) = active.batch.task_mut(key) else {
            return false;
        };

        match result {
            Ok(response) => {
                if !task.mark_uploaded(&response.sha256, &pipelines) {
                    debug!("忽略过期的上传结果: key={}", key);
                    return false;
                }
                if response.is_existing() {
                    info!("文件已存在，直接提交反应: key={}, sha256={}", key, response.sha256);
                } else {
                    info!("上传成功: key={}, sha256={}", key, response.sha256);
                }
                self.emit_status(
                    batch_id,
                    key,
                    UploadTaskStatus::Uploading,
                    UploadTaskStatus::Uploaded,
                );
                self.emit(UploadEvent::Uploaded {
                    batch_id,
                    key: key.to_string(),
                    sha256: response.sha256.clone(),
                    already_exists: response.is_existing(),
                });

                task.begin_reactions();
                let status = task.status;
                let completed_at = task.completed_at;
                self.emit_status(batch_id, key, UploadTaskStatus::Uploaded, status);
                if let Some(completed_at) = completed_at {
                    info!("任务完成（未选择流水线）: key={}", key);
                    self.emit(UploadEvent::Completed {
                        batch_id,
                        key: key.to_string(),
                        completed_at,
                    });
                }
                self.emit_progress(active, key);
                status == UploadTaskStatus::SubmittingReactions
            }
            Err(e) if e.is_cancelled() => {
                if task.mark_cancelled() {
                    info!("上传已取消: key={}", key);
                    let bytes_transferred = task.bytes_transferred;
                    self.emit_status(
                        batch_id,
                        key,
                        UploadTaskStatus::Uploading,
                        UploadTaskStatus::Cancelled,
                    );
                    self.emit(UploadEvent::Cancelled {
                        batch_id,
                        key: key.to_string(),
                        bytes_transferred,
                    });
                }
                false
            }
            Err(e) => {
                let error = e.to_string();
                if task.mark_upload_failed(error.clone()) {
                    warn!(
                        "上传失败: key={}, 错误: {}, 可重试: {}",
                        key,
                        error,
                        e.is_retriable()
                    );
                    self.emit_status(
                        batch_id,
                        key,
                        UploadTaskStatus::Uploading,
                        UploadTaskStatus::Failed,
                    );
                    self.emit(UploadEvent::UploadFailed {
                        batch_id,
                        key: key.to_string(),
                        error,
                    });
                }
                false
            }
        }
    }

    fn on_progress(&self, batch_id: Uuid, key: &str, driver_id: u64, bytes: u64) {
        let interval = self.config.progress_interval_ms;
        self.with_batch(batch_id, |active| {
            if !active.is_current_driver(key, driver_id) {
                return;
            }
            let Some(task) = active.batch.task_mut(key) else {
                return;
            };
            if !task.record_progress(bytes) {
                return;
            }
            let done = task.bytes_transferred >= task.size;
            let throttler = active
                .throttlers
                .entry(key.to_string())
                .or_insert_with(|| ProgressThrottler::with_millis(interval));
            // 最后一次进度一定发出
            let emit = if done {
                throttler.force_emit()
            } else {
                throttler.should_emit()
            };
            if emit {
                self.emit_progress(active, key);
            }
        });
    }

    // ---------------------------------------------------------------
    // 反应提交
    // ---------------------------------------------------------------

    fn spawn_reactions(&self, batch_id: Uuid, key: String) {
        let this = self.clone();
        tokio::spawn(async move {
            this.submit_reactions(batch_id, &key).await;
        });
    }

    /// 提交任务中所有待提交的反应（一次调用）
    async fn submit_reactions(&self, batch_id: Uuid, key: &str) {
        let pending = self
            .with_batch(batch_id, |active| {
                let task = active.batch.task_mut(key)?;
                let sha256 = task.sha256.clone()?;
                let requests = task.take_reaction_requests();
                (!requests.is_empty()).then_some((sha256, requests))
            })
            .flatten();
        let Some((sha256, requests)) = pending else {
            return;
        };

        info!(
            "提交反应: key={}, sha256={}, 流水线={:?}",
            key,
            sha256,
            requests.iter().map(|r| r.pipeline.as_str()).collect::<Vec<_>>()
        );
        let result = self.client.submit_reactions(&sha256, &requests).await;

        self.with_batch(batch_id, |active| {
            let Some(task) = active.batch.task_mut(key) else {
                return;
            };
            let Some(reactions) = task.reactions.as_mut() else {
                return;
            };
            let entries = match result {
                Ok(outcomes) => reactions.apply(&requests, &outcomes),
                Err(e) => {
                    warn!(
                        "反应提交调用失败: key={}, 错误: {}, 可重试: {}",
                        key,
                        e,
                        e.is_retriable()
                    );
                    reactions.mark_failed(&requests, &e.to_string())
                }
            };
            for entry in &entries {
                self.emit_reaction(batch_id, key, entry);
            }

            let old = task.status;
            if task.settle_reactions() {
                let new = task.status;
                self.emit_status(batch_id, key, old, new);
                if let Some(completed_at) = task.completed_at {
                    let failed = task.reaction_count(ReactionStatus::Failed);
                    if failed > 0 {
                        warn!("任务完成，{} 条反应提交失败: key={}", failed, key);
                    } else {
                        info!("任务完成: key={}", key);
                    }
                    self.emit(UploadEvent::Completed {
                        batch_id,
                        key: key.to_string(),
                        completed_at,
                    });
                }
            }
        });
        self.changed.notify_waiters();
    }

    // ---------------------------------------------------------------
    // 内部工具
    // ---------------------------------------------------------------

    /// 在锁内操作指定批次；批次已被替换或清空时返回 None
    fn with_batch<R>(&self, batch_id: Uuid, f: impl FnOnce(&mut ActiveBatch) -> R) -> Option<R> {
        let mut guard = self.state.lock();
        match guard.as_mut() {
            Some(active) if active.batch.id == batch_id => Some(f(active)),
            _ => None,
        }
    }

    /// 任务重新排队并登记新驱动
    fn requeue(&self, active: &mut ActiveBatch, key: &str) -> UploadDriver {
        let batch_id = active.batch.id;
        if let Some(task) = active.batch.task_mut(key) {
            let old = task.status;
            if task.requeue() {
                info!("任务重新排队: key={}, 原状态={}", key, old);
                self.emit_status(batch_id, key, old, UploadTaskStatus::Queued);
            }
        }
        active.register_driver(key)
    }

    /// 重开失败的反应，返回重开的数量
    fn reopen(&self, active: &mut ActiveBatch, key: &str, pipeline: Option<&str>) -> usize {
        let batch_id = active.batch.id;
        let Some(task) = active.batch.task_mut(key) else {
            return 0;
        };
        let old = task.status;
        let reopened = task.reopen_reactions(pipeline);
        if !reopened.is_empty() {
            info!("重新提交反应: key={}, 流水线={:?}", key, reopened);
            if old != task.status {
                self.emit_status(batch_id, key, old, task.status);
            }
        }
        reopened.len()
    }

    fn emit(&self, event: UploadEvent) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.events.send(event);
    }

    fn emit_status(&self, batch_id: Uuid, key: &str, old: UploadTaskStatus, new: UploadTaskStatus) {
        self.emit(UploadEvent::StatusChanged {
            batch_id,
            key: key.to_string(),
            old_status: old.to_string(),
            new_status: new.to_string(),
        });
    }

    fn emit_progress(&self, active: &ActiveBatch, key: &str) {
        let Some(task) = active.batch.task(key) else {
            return;
        };
        let percent = active.percent();
        debug!(
            "进度: key={}, {}/{}, 批次 {}%",
            key, task.bytes_transferred, task.size, percent
        );
        self.emit(UploadEvent::Progress {
            batch_id: active.batch.id,
            key: key.to_string(),
            bytes_transferred: task.bytes_transferred,
            total_size: task.size,
            batch_percent: percent,
        });
    }

    fn emit_reaction(&self, batch_id: Uuid, key: &str, entry: &ReactionEntry) {
        match (entry.status, entry.reaction_id) {
            (ReactionStatus::Submitted, Some(reaction_id)) => {
                self.emit(UploadEvent::ReactionSubmitted {
                    batch_id,
                    key: key.to_string(),
                    pipeline: entry.pipeline.clone(),
                    reaction_id,
                })
            }
            _ => {
                let error = entry.error.clone().unwrap_or_default();
                warn!(
                    "反应创建失败: key={}, 流水线={}, 错误: {}",
                    key, entry.pipeline, error
                );
                self.emit(UploadEvent::ReactionFailed {
                    batch_id,
                    key: key.to_string(),
                    pipeline: entry.pipeline.clone(),
                    error,
                })
            }
        }
    }
}
