use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

const SCHEME: &str = "s3://";

/// 对象地址
///
/// 由存储空间名称和对象名称组成，字符串形式为 `s3://<bucket>/<key>`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectUri {
    bucket: String,
    key: String,
}

impl ObjectUri {
    /// 创建对象地址
    #[inline]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// 获取存储空间名称
    #[inline]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// 获取对象名称
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ObjectUri {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.key)
    }
}

/// 对象地址解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ObjectUriParseError {
    /// 缺少 `s3://` 前缀
    #[error("Object uri must start with `s3://`: {0}")]
    InvalidScheme(String),

    /// 缺少存储空间名称
    #[error("Bucket is missing in object uri: {0}")]
    MissingBucket(String),

    /// 缺少对象名称
    #[error("Object key is missing in object uri: {0}")]
    MissingKey(String),
}

impl FromStr for ObjectUri {
    type Err = ObjectUriParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| ObjectUriParseError::InvalidScheme(s.to_owned()))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(ObjectUriParseError::MissingBucket(s.to_owned()));
        }
        if key.is_empty() {
            return Err(ObjectUriParseError::MissingKey(s.to_owned()));
        }
        Ok(Self::new(bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_uri() {
        let uri: ObjectUri = "s3://fakebucket/dir/fakeobject.bin".parse().unwrap();
        assert_eq!(uri.bucket(), "fakebucket");
        assert_eq!(uri.key(), "dir/fakeobject.bin");
        assert_eq!(uri.to_string(), "s3://fakebucket/dir/fakeobject.bin");
    }

    #[test]
    fn test_parse_invalid_object_uri() {
        assert_eq!(
            "http://fakebucket/key".parse::<ObjectUri>(),
            Err(ObjectUriParseError::InvalidScheme("http://fakebucket/key".to_owned()))
        );
        assert_eq!(
            "s3:///key".parse::<ObjectUri>(),
            Err(ObjectUriParseError::MissingBucket("s3:///key".to_owned()))
        );
        assert_eq!(
            "s3://fakebucket".parse::<ObjectUri>(),
            Err(ObjectUriParseError::MissingKey("s3://fakebucket".to_owned()))
        );
        assert_eq!(
            "s3://fakebucket/".parse::<ObjectUri>(),
            Err(ObjectUriParseError::MissingKey("s3://fakebucket/".to_owned()))
        );
    }
}
