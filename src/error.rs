use super::{multipart::UploadState, storage_client::TransportError, thread_pool::WorkerPanic};
use std::io::Error as IoError;
use thiserror::Error;

/// 分片上传结果
pub type UploadResult<T> = Result<T, UploadError>;

/// 分片上传错误
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UploadError {
    /// 分片上传尚未初始化
    #[error("Attempting to use a multipart upload that has not been initiated")]
    NotInitiated,

    /// 存储服务响应不符合协议
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 存储客户端调用错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 读取数据源错误
    #[error("Failed to read source data: {0}")]
    Io(#[from] IoError),

    /// 分片上传任务崩溃
    #[error("{0}")]
    WorkerPanicked(#[from] WorkerPanic),

    /// 无法创建线程池
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// 会话中记录了不是从数据源读出的分片
    #[error("Part {part_number} was recorded but not read from the source")]
    UnexpectedPart {
        /// 分片号
        part_number: usize,
    },

    /// 在错误的状态下调用了分片上传操作
    #[error("Multipart upload is {actual:?}, but {expected} is required")]
    InvalidState {
        /// 期望的状态描述
        expected: &'static str,
        /// 实际所处的状态
        actual: UploadState,
    },
}

/// 存储服务响应中的协议错误
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    /// 响应体中缺少指定字段
    #[error("Field `{0}` is missing from the response body")]
    MissingField(String),

    /// 响应体不是合法的 XML
    #[error("Malformed xml response: {0}")]
    MalformedXml(#[from] quick_xml::Error),

    /// 分片上传响应中缺少 ETag
    #[error("ETag of part {part_number} is missing")]
    MissingETag {
        /// 分片号
        part_number: usize,
    },
}
