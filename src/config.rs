use super::chunk::ChunkSize;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use std::{fs, io::Error as IoError, num::NonZeroUsize, path::Path};
use thiserror::Error;

/// 分片上传配置
///
/// 可以通过 [`UploadConfig::builder`] 构建，也可以从 JSON 中加载，缺少的字段使用默认值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    concurrency: NonZeroUsize,
    chunk_size: ChunkSize,
    abort_on_failure: bool,
}

impl UploadConfig {
    /// 创建分片上传配置构建器
    #[inline]
    pub fn builder() -> UploadConfigBuilder {
        Default::default()
    }

    /// 从 JSON 数据中加载配置
    pub fn from_json_slice(json: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(json)?)
    }

    /// 从 JSON 文件中加载配置
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_slice(&fs::read(path)?)
    }

    /// 获取上传分片的并发数
    #[inline]
    pub fn concurrency(&self) -> NonZeroUsize {
        self.concurrency
    }

    /// 获取分片尺寸
    #[inline]
    pub fn chunk_size(&self) -> ChunkSize {
        self.chunk_size
    }

    /// 上传分片失败时是否中止分片上传
    #[inline]
    pub fn abort_on_failure(&self) -> bool {
        self.abort_on_failure
    }
}

impl Default for UploadConfig {
    #[inline]
    fn default() -> Self {
        Self {
            concurrency: default::concurrency(),
            chunk_size: default::chunk_size(),
            abort_on_failure: default::abort_on_failure(),
        }
    }
}

mod default {
    use super::*;

    pub(super) fn concurrency() -> NonZeroUsize {
        NonZeroUsize::MIN.saturating_add(3)
    }

    pub(super) fn chunk_size() -> ChunkSize {
        ChunkSize::default()
    }

    pub(super) fn abort_on_failure() -> bool {
        true
    }
}

/// 分片上传配置构建器
#[derive(Debug, Default)]
pub struct UploadConfigBuilder(UploadConfig);

impl UploadConfigBuilder {
    /// 设置上传分片的并发数
    #[inline]
    pub fn concurrency(mut self, concurrency: NonZeroUsize) -> Self {
        self.0.concurrency = concurrency;
        self
    }

    /// 设置分片尺寸
    #[inline]
    pub fn chunk_size(mut self, chunk_size: ChunkSize) -> Self {
        self.0.chunk_size = chunk_size;
        self
    }

    /// 设置上传分片失败时是否中止分片上传
    #[inline]
    pub fn abort_on_failure(mut self, abort_on_failure: bool) -> Self {
        self.0.abort_on_failure = abort_on_failure;
        self
    }

    /// 构建分片上传配置
    #[inline]
    pub fn build(self) -> UploadConfig {
        self.0
    }
}

/// 加载配置错误
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// 无法读取配置文件
    #[error("Failed to read config file: {0}")]
    Io(#[from] IoError),

    /// 配置内容不是合法的 JSON，或字段取值不合法
    #[error("Failed to parse config: {0}")]
    Parse(#[from] JsonError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = UploadConfig::default();
        assert_eq!(config.concurrency().get(), 4);
        assert_eq!(config.chunk_size().as_u64(), 15 << 20);
        assert!(config.abort_on_failure());
        assert_eq!(UploadConfig::builder().build(), config);
    }

    #[test]
    fn test_build_config() {
        let config = UploadConfig::builder()
            .concurrency(NonZeroUsize::new(8).unwrap())
            .chunk_size(ChunkSize::new(1 << 23).unwrap())
            .abort_on_failure(false)
            .build();
        assert_eq!(config.concurrency().get(), 8);
        assert_eq!(config.chunk_size().as_u64(), 1 << 23);
        assert!(!config.abort_on_failure());
    }

    #[test]
    fn test_load_config_from_json() -> anyhow::Result<()> {
        let config = UploadConfig::from_json_slice(br#"{"concurrency": 2}"#)?;
        assert_eq!(config.concurrency().get(), 2);
        assert_eq!(config.chunk_size(), default::chunk_size());
        assert!(config.abort_on_failure());

        let config = UploadConfig::from_json_slice(br#"{"chunk_size": 6291456, "abort_on_failure": false}"#)?;
        assert_eq!(config.concurrency(), default::concurrency());
        assert_eq!(config.chunk_size().as_u64(), 6 << 20);
        assert!(!config.abort_on_failure());

        assert_eq!(
            UploadConfig::from_json_slice(&serde_json::to_vec(&config)?)?,
            config
        );
        Ok(())
    }

    #[test]
    fn test_reject_invalid_config() {
        assert!(matches!(
            UploadConfig::from_json_slice(br#"{"concurrency": 0}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            UploadConfig::from_json_slice(br#"{"chunk_size": 0}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            UploadConfig::from_json_slice(b"not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_config_from_file() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(br#"{"concurrency": 3, "chunk_size": 10485760}"#)?;
        file.flush()?;
        let config = UploadConfig::from_json_file(file.path())?;
        assert_eq!(config.concurrency().get(), 3);
        assert_eq!(config.chunk_size().as_u64(), 10 << 20);

        assert!(matches!(
            UploadConfig::from_json_file(file.path().with_extension("missing")),
            Err(ConfigError::Io(_))
        ));
        Ok(())
    }
}
