#![deny(
    absolute_paths_not_starting_with_crate,
    anonymous_parameters,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    meta_variable_misuse,
    non_ascii_idents,
    trivial_numeric_casts,
    unsafe_code,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

//! # s3-multipart
//!
//! ## S3 兼容存储的并行分片上传
//!
//! 将数据源按固定尺寸切分为分片，使用有界工作线程池并行上传分片，
//! 最后按分片号顺序提交分片列表完成对象上传。

mod chunk;
mod config;
mod error;
mod multipart;
mod object_uri;
mod storage_client;
mod thread_pool;
mod xml;

pub use chunk::{Chunk, ChunkReader, ChunkSize, MAX_CHUNKS, MAX_CHUNK_SIZE, MAX_FILE_SIZE, MIN_CHUNK_SIZE};
pub use config::{ConfigError, UploadConfig, UploadConfigBuilder};
pub use error::{ProtocolError, UploadError, UploadResult};
pub use multipart::{InitiatedUpload, MultiPartUpload, UploadState, UploadedPart};
pub use object_uri::{ObjectUri, ObjectUriParseError};
pub use storage_client::{
    Credential, Headers, Query, RequestMethod, StorageClient, StorageRequest, StorageResponse, TransportError,
    TransportResult, UreqStorageClient, UreqStorageClientBuilder,
};
pub use thread_pool::{Rejected, WorkerPanic, WorkerPool};
pub use xml::{QuickXmlFieldExtractor, XmlFieldExtractor};

/// 将所有 Trait 全部重新导出，方便统一导入
pub mod prelude {
    pub use super::{StorageClient, XmlFieldExtractor};
}
