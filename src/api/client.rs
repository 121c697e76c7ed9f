// Thorium 客户端实现
//
// 编排器只依赖 TransferClient trait：
// - upload_sample：上传单个文件，带字节级进度回调和取消令牌；文件已存在（409）视为成功
// - submit_reactions：为一个样本批量创建反应，每条流水线一个结果

use crate::api::hash::sha256_file;
use crate::api::{
    BulkReactionResponse, ReactionOutcome, ReactionRequest, SampleRequest,
    SampleSubmissionResponse,
};
use crate::config::ApiConfig;
use crate::error::TransferError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart;
use reqwest::{Body, Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 上传进度回调，参数为累计已发送字节数
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// 传输客户端
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// 上传一个文件
    ///
    /// 实现需要在 I/O 边界检查 `cancel`，被取消时返回 `TransferError::Cancelled`
    async fn upload_sample(
        &self,
        request: &SampleRequest,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<SampleSubmissionResponse, TransferError>;

    /// 为一个样本提交反应
    ///
    /// 调用整体失败时返回 Err；否则每条请求对应一个结果
    async fn submit_reactions(
        &self,
        sha256: &str,
        requests: &[ReactionRequest],
    ) -> Result<Vec<ReactionOutcome>, TransferError>;
}

/// 基于 reqwest 的 Thorium 客户端
#[derive(Debug, Clone)]
pub struct ThoriumClient {
    /// HTTP客户端
    client: Client,
    /// API 地址，如 https://thorium.example.com
    host: String,
    /// authorization 头的值
    token: String,
}

impl ThoriumClient {
    /// 根据配置创建客户端
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("创建 HTTP 客户端失败")?;

        info!("初始化 Thorium 客户端: host={}", config.host);

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// 构建文件数据分片
    ///
    /// 文件以流的方式读取，每读出一块就累加并回调进度
    async fn build_data_part(
        request: &SampleRequest,
        progress: ProgressCallback,
    ) -> Result<multipart::Part, TransferError> {
        let file = tokio::fs::File::open(&request.path).await?;
        let length = file.metadata().await?.len();

        let mut sent: u64 = 0;
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                progress(sent);
            }
            chunk
        });

        let part = multipart::Part::stream_with_length(Body::wrap_stream(stream), length)
            .file_name(request.file_name.clone())
            .mime_str("multipart/form-data")?;
        Ok(part)
    }

    /// 服务器已有该文件：本地计算 sha256，后续照常提交反应
    async fn resolve_existing(
        request: &SampleRequest,
    ) -> Result<SampleSubmissionResponse, TransferError> {
        let sha256 = sha256_file(&request.path)
            .await
            .map_err(|e| TransferError::Io(format!("{:#}", e)))?;
        info!("文件已存在: file={}, sha256={}", request.file_name, sha256);
        Ok(SampleSubmissionResponse::already_exists(sha256))
    }

    /// 检查响应状态码，非 2xx 时读取响应体作为错误信息
    async fn check_status(response: Response) -> Result<Response, TransferError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(TransferError::Server {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl TransferClient for ThoriumClient {
    async fn upload_sample(
        &self,
        request: &SampleRequest,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<SampleSubmissionResponse, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let url = format!("{}/api/files/", self.host);
        let form = request
            .form_fields()
            .into_iter()
            .fold(multipart::Form::new(), |form, (key, value)| {
                form.text(key, value)
            });
        let form = form.part("data", Self::build_data_part(request, progress).await?);

        debug!("上传样本: file={}, url={}", request.file_name, url);

        let send = async {
            let response = self
                .client
                .post(&url)
                .header("authorization", &self.token)
                .multipart(form)
                // 大文件上传耗时很长，单独放宽超时
                .timeout(Duration::from_secs(86_400))
                .send()
                .await?;
            if response.status() == StatusCode::CONFLICT {
                return Self::resolve_existing(request).await;
            }
            let response = Self::check_status(response).await?;
            let body = response.json::<SampleSubmissionResponse>().await?;
            Ok::<_, TransferError>(body)
        };

        tokio::select! {
            result = send => {
                if let Err(e) = &result {
                    warn!("上传样本失败: file={}, 错误: {}", request.file_name, e);
                }
                result
            }
            _ = cancel.cancelled() => {
                info!("上传已取消: file={}", request.file_name);
                Err(TransferError::Cancelled)
            }
        }
    }

    async fn submit_reactions(
        &self,
        sha256: &str,
        requests: &[ReactionRequest],
    ) -> Result<Vec<ReactionOutcome>, TransferError> {
        let url = format!("{}/api/reactions/bulk/", self.host);

        debug!("提交反应: sha256={}, count={}", sha256, requests.len());

        let response = self
            .client
            .post(&url)
            .header("authorization", &self.token)
            .json(requests)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let bulk = response.json::<BulkReactionResponse>().await?;

        Ok(bulk.into_outcomes(requests))
    }
}
