//! 分片上传协调器
//!
//! 分片上传分为三个阶段：初始化分片上传获取上传 ID，并行上传所有分片，最后按分片号顺序提交分片列表完成上传。
//! 上传分片阶段失败时，可以自动中止分片上传，释放存储服务上已经上传的分片。

use super::{
    chunk::{ChunkReader, ChunkSize},
    config::UploadConfig,
    error::{ProtocolError, UploadError, UploadResult},
    storage_client::{Headers, Query, RequestMethod, StorageClient, StorageResponse},
    thread_pool::WorkerPool,
    xml::{QuickXmlFieldExtractor, XmlFieldExtractor},
    ObjectUri,
};
use log::{debug, info, warn};
use std::{fmt, io::Read, num::NonZeroUsize, sync::Arc};
use tap::TapFallible;

mod session;
use session::UploadSession;
pub use session::{InitiatedUpload, UploadedPart};

/// 分片上传状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadState {
    /// 尚未初始化
    Uninitiated,
    /// 已经获取上传 ID
    Initiated,
    /// 正在上传分片
    PartsInFlight,
    /// 所有分片均已上传
    PartsComplete,
    /// 已经提交分片列表
    Finalized,
    /// 上传分片失败
    Failed,
    /// 已经中止
    Aborted,
}

/// 分片上传
///
/// 每个实例只能用于一次对象上传。
///
/// ### 代码示例
///
/// ```no_run
/// use s3_multipart::{Credential, MultiPartUpload, ObjectUri, UploadConfig, UreqStorageClient};
/// use std::fs::File;
///
/// # fn example() -> anyhow::Result<()> {
/// let client = UreqStorageClient::builder(Credential::new("access-key", "secret-key")).build();
/// let uri: ObjectUri = "s3://test-bucket/test-object".parse()?;
/// let mut upload = MultiPartUpload::new(client, File::open("/home/s3/test.bin")?, uri);
/// let response = upload.upload(&UploadConfig::default())?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
pub struct MultiPartUpload<C, R> {
    client: Arc<C>,
    extractor: Arc<dyn XmlFieldExtractor>,
    session: Arc<UploadSession>,
    source: R,
    state: UploadState,
    abort_on_failure: bool,
}

impl<C: StorageClient + 'static, R: Read> MultiPartUpload<C, R> {
    /// 创建分片上传，使用 [`QuickXmlFieldExtractor`] 解析存储服务的响应
    #[inline]
    pub fn new(client: C, source: R, uri: ObjectUri) -> Self {
        Self::with_extractor(client, source, uri, QuickXmlFieldExtractor)
    }

    /// 创建分片上传，使用指定的 XML 字段提取器解析存储服务的响应
    pub fn with_extractor(
        client: C,
        source: R,
        uri: ObjectUri,
        extractor: impl XmlFieldExtractor + 'static,
    ) -> Self {
        Self {
            client: Arc::new(client),
            extractor: Arc::new(extractor),
            session: Arc::new(UploadSession::new(uri)),
            source,
            state: UploadState::Uninitiated,
            abort_on_failure: true,
        }
    }

    /// 初始化分片上传
    ///
    /// 从存储服务的响应中提取 `Bucket`，`Key` 和 `UploadId`，上传 ID 会被保存在会话中。
    pub fn initiate(&mut self) -> UploadResult<InitiatedUpload> {
        self.expect_state(&[UploadState::Uninitiated], "Uninitiated")?;
        let request = self.client.create_request(
            RequestMethod::ObjectPost,
            self.session.uri(),
            Headers::new(),
            Query::new().flag("uploads"),
        );
        let response = self.client.send_request(request, None)?;
        let bucket = self.extractor.extract_field(response.data(), "Bucket")?;
        let key = self.extractor.extract_field(response.data(), "Key")?;
        let upload_id = self.extractor.extract_field(response.data(), "UploadId")?;
        if upload_id.is_empty() {
            return Err(ProtocolError::MissingField("UploadId".to_owned()).into());
        }
        if !self.session.set_upload_id(upload_id.to_owned()) {
            return Err(UploadError::InvalidState {
                expected: "Uninitiated",
                actual: self.state,
            });
        }
        self.state = UploadState::Initiated;
        info!("Initiated multipart upload {} for {}", upload_id, self.session.uri());
        Ok(InitiatedUpload::new(bucket, key, upload_id))
    }

    /// 并行上传所有分片
    ///
    /// 由当前线程顺序读取数据源，每个分片作为一个任务提交给 `concurrency` 个工作线程上传。
    /// 分片尺寸小于 [`crate::MIN_CHUNK_SIZE`] 时会被提升。
    /// 任一分片上传失败后，不再读取新的分片，等待正在上传的分片结束后返回第一个错误。
    pub fn upload_all_parts(&mut self, concurrency: NonZeroUsize, chunk_size: ChunkSize) -> UploadResult<()> {
        let upload_id = self.session.upload_id().ok_or(UploadError::NotInitiated)?.to_owned();
        self.expect_state(&[UploadState::Initiated], "Initiated")?;

        match self.upload_parts_in_pool(concurrency, chunk_size) {
            Ok(num_parts) => {
                self.state = UploadState::PartsComplete;
                info!("Uploaded all {} parts of {}", num_parts, upload_id);
                Ok(())
            }
            Err(err) => {
                self.state = UploadState::Failed;
                warn!("Failed to upload parts of {}: {}", upload_id, err);
                if self.abort_on_failure {
                    self.abort()
                        .tap_err(|abort_err| warn!("Failed to abort multipart upload {}: {}", upload_id, abort_err))
                        .ok();
                }
                Err(err)
            }
        }
    }

    fn upload_parts_in_pool(&mut self, concurrency: NonZeroUsize, chunk_size: ChunkSize) -> UploadResult<usize> {
        let pool = WorkerPool::<UploadError>::new(concurrency)?;
        self.state = UploadState::PartsInFlight;

        let mut reader = ChunkReader::new(&mut self.source, chunk_size);
        let mut read_result = Ok(());
        while !pool.has_failed() {
            let chunk = match reader.next_chunk() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(err) => {
                    read_result = Err(err);
                    break;
                }
            };
            let (part_number, data) = chunk.into_parts();
            let client = self.client.to_owned();
            let session = self.session.to_owned();
            let submitted = pool.submit(move || {
                upload_part(client.as_ref(), &session, part_number, &data)
                    .tap_err(|err| warn!("Failed to upload part {}: {}", part_number, err))
                    .map(|_| ())
            });
            if submitted.is_err() {
                break;
            }
        }
        let num_parts = reader.chunks_read();
        debug!(
            "Thread pool with {} threads and {} tasks awaiting completion",
            pool.num_threads(),
            pool.unfinished()
        );
        pool.wait_completion()?;
        read_result?;

        if let Some(part_number) = (1..=num_parts)
            .filter_map(NonZeroUsize::new)
            .find(|&part_number| !self.session.has_part(part_number))
        {
            return Err(ProtocolError::MissingETag {
                part_number: part_number.get(),
            }
            .into());
        }
        if let Some(part_number) = self.session.first_part_beyond(num_parts) {
            return Err(UploadError::UnexpectedPart {
                part_number: part_number.get(),
            });
        }
        Ok(num_parts)
    }

    /// 上传一个分片，并记录存储服务返回的 ETag
    ///
    /// 仅在初始化之后，并行上传所有分片之前可以调用。重复上传同一分片时，以最后一次上传的 ETag 为准。
    pub fn upload_part(&self, data: &[u8], part_number: NonZeroUsize) -> UploadResult<UploadedPart> {
        self.session.upload_id().ok_or(UploadError::NotInitiated)?;
        self.expect_state(&[UploadState::Initiated], "Initiated")?;
        upload_part(self.client.as_ref(), &self.session, part_number, data)
    }

    /// 提交按分片号升序排列的分片列表，完成分片上传
    ///
    /// 返回存储服务的原始响应，由调用者自行解析。
    pub fn complete(&mut self) -> UploadResult<StorageResponse> {
        let upload_id = self.session.upload_id().ok_or(UploadError::NotInitiated)?.to_owned();
        self.expect_state(
            &[UploadState::Initiated, UploadState::PartsComplete],
            "Initiated or PartsComplete",
        )?;
        let body = self.session.manifest();
        let request = self.client.create_request(
            RequestMethod::ObjectPost,
            self.session.uri(),
            Headers::from([("Content-Length".to_owned(), body.len().to_string())]),
            Query::new().pair("uploadId", upload_id.as_str()),
        );
        let response = self.client.send_request(request, Some(body.as_bytes()))?;
        self.state = UploadState::Finalized;
        info!(
            "Completed multipart upload {} with {} parts",
            upload_id,
            self.session.num_parts()
        );
        Ok(response)
    }

    /// 中止分片上传，存储服务将释放已经上传的分片
    pub fn abort(&mut self) -> UploadResult<StorageResponse> {
        let upload_id = self.session.upload_id().ok_or(UploadError::NotInitiated)?.to_owned();
        self.expect_state(
            &[
                UploadState::Initiated,
                UploadState::PartsInFlight,
                UploadState::PartsComplete,
                UploadState::Failed,
            ],
            "an unfinished upload",
        )?;
        let request = self.client.create_request(
            RequestMethod::ObjectDelete,
            self.session.uri(),
            Headers::new(),
            Query::new().pair("uploadId", upload_id.as_str()),
        );
        let response = self.client.send_request(request, None)?;
        self.state = UploadState::Aborted;
        info!("Aborted multipart upload {}", upload_id);
        Ok(response)
    }

    /// 依次初始化分片上传，上传所有分片，完成分片上传
    pub fn upload(&mut self, config: &UploadConfig) -> UploadResult<StorageResponse> {
        self.abort_on_failure = config.abort_on_failure();
        self.initiate()?;
        self.upload_all_parts(config.concurrency(), config.chunk_size())?;
        self.complete()
    }

    fn expect_state(&self, allowed: &[UploadState], expected: &'static str) -> UploadResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(UploadError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }
}

impl<C, R> MultiPartUpload<C, R> {
    /// 获取当前状态
    #[inline]
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// 获取分片上传 ID，尚未初始化时返回 [`None`]
    #[inline]
    pub fn upload_id(&self) -> Option<&str> {
        self.session.upload_id()
    }

    /// 获取对象地址
    #[inline]
    pub fn uri(&self) -> &ObjectUri {
        self.session.uri()
    }

    /// 获取已上传的分片，按分片号升序排列
    #[inline]
    pub fn parts(&self) -> Vec<UploadedPart> {
        self.session.parts()
    }

    /// 获取完成分片上传时提交的请求体
    #[inline]
    pub fn manifest(&self) -> String {
        self.session.manifest()
    }

    /// 上传分片失败时是否自动中止分片上传
    #[inline]
    pub fn abort_on_failure(&self) -> bool {
        self.abort_on_failure
    }

    /// 设置上传分片失败时是否自动中止分片上传，默认为 `true`
    #[inline]
    pub fn set_abort_on_failure(&mut self, abort_on_failure: bool) -> &mut Self {
        self.abort_on_failure = abort_on_failure;
        self
    }

    /// 取回数据源
    #[inline]
    pub fn into_source(self) -> R {
        self.source
    }
}

impl<C: fmt::Debug, R> fmt::Debug for MultiPartUpload<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiPartUpload")
            .field("client", &self.client)
            .field("extractor", &self.extractor)
            .field("session", &self.session)
            .field("state", &self.state)
            .field("abort_on_failure", &self.abort_on_failure)
            .finish_non_exhaustive()
    }
}

fn upload_part<C: StorageClient + ?Sized>(
    client: &C,
    session: &UploadSession,
    part_number: NonZeroUsize,
    data: &[u8],
) -> UploadResult<UploadedPart> {
    let upload_id = session.upload_id().ok_or(UploadError::NotInitiated)?;
    debug!("Uploading part {} of {} ({} bytes)", part_number, upload_id, data.len());
    let request = client.create_request(
        RequestMethod::ObjectPut,
        session.uri(),
        Headers::from([("Content-Length".to_owned(), data.len().to_string())]),
        Query::new()
            .pair("partNumber", part_number.to_string())
            .pair("uploadId", upload_id),
    );
    let response = client.send_request(request, Some(data))?;
    let etag = response
        .header("ETag")
        .ok_or(ProtocolError::MissingETag {
            part_number: part_number.get(),
        })?
        .to_owned();
    if let Some(replaced) = session.record_part(part_number, etag.to_owned()) {
        debug!(
            "Part {} of {} was uploaded again, ETag {} is replaced by {}",
            part_number, upload_id, replaced, etag
        );
    }
    Ok(UploadedPart::new(part_number, etag))
}
