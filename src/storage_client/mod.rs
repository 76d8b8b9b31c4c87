use super::ObjectUri;
use anyhow::Error as AnyError;
use auto_impl::auto_impl;
use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Debug},
};
use thiserror::Error;
use url::{form_urlencoded::byte_serialize, ParseError as UrlParseError};

/// HTTP 头
pub type Headers = BTreeMap<String, String>;

/// 存储客户端调用结果
pub type TransportResult<T> = Result<T, TransportError>;

/// 存储客户端
///
/// 负责构建请求，为请求签名，并将其发送给存储服务。
#[auto_impl(&, Box, Arc)]
pub trait StorageClient: Debug + Send + Sync {
    /// 构建针对对象的请求
    ///
    /// 默认实现仅仅将参数组装为 [`StorageRequest`]，签名可以在发送时完成。
    fn create_request(&self, method: RequestMethod, uri: &ObjectUri, headers: Headers, query: Query) -> StorageRequest {
        StorageRequest::new(method, uri.to_owned(), headers, query)
    }

    /// 发送请求，`body` 为请求体
    ///
    /// 响应状态码不是 2xx 时应该返回 [`TransportError::Status`]。
    fn send_request(&self, request: StorageRequest, body: Option<&[u8]>) -> TransportResult<StorageResponse>;
}

/// 对象请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    /// 对对象发送 POST 请求
    ObjectPost,
    /// 对对象发送 PUT 请求
    ObjectPut,
    /// 对对象发送 DELETE 请求
    ObjectDelete,
}

impl RequestMethod {
    /// 获取 HTTP 方法名
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectPost => "POST",
            Self::ObjectPut => "PUT",
            Self::ObjectDelete => "DELETE",
        }
    }
}

impl fmt::Display for RequestMethod {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 查询参数
///
/// 保持添加顺序，参数可以没有值（例如 `?uploads`）。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query(Vec<(String, Option<String>)>);

impl Query {
    /// 创建空的查询参数
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// 添加没有值的查询参数
    #[inline]
    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.0.push((name.into(), None));
        self
    }

    /// 添加查询参数对
    #[inline]
    pub fn pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((name.into(), Some(value.into())));
        self
    }

    /// 是否包含指定名称的参数
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }

    /// 获取指定名称的参数值
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, value)| value.as_deref())
    }

    /// 遍历所有参数
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    /// 是否没有任何参数
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            f.write_str(&byte_serialize(name.as_bytes()).collect::<String>())?;
            if let Some(value) = value {
                f.write_str("=")?;
                f.write_str(&byte_serialize(value.as_bytes()).collect::<String>())?;
            }
        }
        Ok(())
    }
}

/// 对象请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRequest {
    method: RequestMethod,
    uri: ObjectUri,
    headers: Headers,
    query: Query,
}

impl StorageRequest {
    /// 创建对象请求
    #[inline]
    pub fn new(method: RequestMethod, uri: ObjectUri, headers: Headers, query: Query) -> Self {
        Self {
            method,
            uri,
            headers,
            query,
        }
    }

    /// 获取请求方法
    #[inline]
    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// 获取对象地址
    #[inline]
    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    /// 获取请求头
    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// 获取请求头的可变引用
    #[inline]
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// 获取请求头，忽略大小写
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// 获取查询参数
    #[inline]
    pub fn query(&self) -> &Query {
        &self.query
    }
}

/// 对象请求的响应
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StorageResponse {
    status: u16,
    headers: HashMap<String, String>,
    data: Vec<u8>,
}

impl StorageResponse {
    /// 创建响应，响应头名称会被转换为小写
    pub fn new(status: u16, headers: impl IntoIterator<Item = (String, String)>, data: Vec<u8>) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
            data,
        }
    }

    /// 获取状态码
    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// 获取全部响应头，名称均为小写
    #[inline]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// 获取响应头，忽略大小写
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|value| value.as_str())
    }

    /// 获取响应体
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 取出响应体
    #[inline]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl Debug for StorageResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// 存储客户端调用错误
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// 存储服务返回了非 2xx 的状态码
    #[error("{method} {url} responded with status code {status}")]
    Status {
        /// 请求方法
        method: RequestMethod,
        /// 请求地址
        url: String,
        /// 状态码
        status: u16,
        /// 响应体
        body: Vec<u8>,
    },

    /// 无法构建请求地址
    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] UrlParseError),

    /// 网络或其他传输错误
    #[error("Failed to call storage service: {0}")]
    Transport(#[source] AnyError),
}

impl TransportError {
    /// 存储服务返回的状态码
    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

mod credential;
pub use credential::Credential;

mod ureq_client;
pub use ureq_client::{UreqStorageClient, UreqStorageClientBuilder};
