use super::{
    credential::string_to_sign, Credential, StorageClient, StorageRequest, StorageResponse, TransportError,
    TransportResult,
};
use anyhow::Error as AnyError;
use chrono::Utc;
use std::io::Read;
use ureq::{Agent, Error as UreqError, Response as UreqResponse};
use url::Url;

const DEFAULT_HOST: &str = "s3.amazonaws.com";

/// 参与签名的子资源名称
const SUB_RESOURCES: &[&str] = &["partNumber", "uploadId", "uploads"];

/// 基于 Ureq 的存储客户端
///
/// 使用 S3 V2 签名算法为请求签名。
#[derive(Debug, Clone)]
pub struct UreqStorageClient {
    agent: Agent,
    credential: Credential,
    host: String,
    use_https: bool,
    path_style: bool,
}

impl UreqStorageClient {
    /// 创建存储客户端构建器
    #[inline]
    pub fn builder(credential: Credential) -> UreqStorageClientBuilder {
        UreqStorageClientBuilder::new(credential)
    }

    /// 获取存储服务域名
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 生成请求地址
    pub fn url_of(&self, request: &StorageRequest) -> TransportResult<Url> {
        let scheme = if self.use_https { "https" } else { "http" };
        let uri = request.uri();
        let mut url = if self.path_style {
            Url::parse(&format!("{}://{}/{}/", scheme, self.host, uri.bucket()))?
        } else {
            Url::parse(&format!("{}://{}.{}/", scheme, uri.bucket(), self.host))?
        };
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(uri.key().split('/'));
        }
        if !request.query().is_empty() {
            url.set_query(Some(&request.query().to_string()));
        }
        Ok(url)
    }

    fn canonical_resource(&self, request: &StorageRequest, url: &Url) -> String {
        let mut resource = if self.path_style {
            url.path().to_owned()
        } else {
            format!("/{}{}", request.uri().bucket(), url.path())
        };
        let mut sub_resources = request
            .query()
            .iter()
            .filter(|(name, _)| SUB_RESOURCES.contains(name))
            .collect::<Vec<_>>();
        sub_resources.sort_unstable_by_key(|(name, _)| *name);
        for (i, (name, value)) in sub_resources.into_iter().enumerate() {
            resource.push(if i == 0 { '?' } else { '&' });
            resource.push_str(name);
            if let Some(value) = value {
                resource.push('=');
                resource.push_str(value);
            }
        }
        resource
    }

    fn authorization(&self, request: &StorageRequest, url: &Url, date: &str) -> String {
        let string_to_sign = string_to_sign(
            request.method().as_str(),
            request.header("content-md5").unwrap_or_default(),
            request.header("content-type").unwrap_or_default(),
            date,
            request
                .headers()
                .iter()
                .filter(|(name, _)| name.to_ascii_lowercase().starts_with("x-amz-"))
                .map(|(name, value)| (name.as_str(), value.as_str())),
            &self.canonical_resource(request, url),
        );
        self.credential.authorization(&string_to_sign)
    }
}

impl StorageClient for UreqStorageClient {
    fn send_request(&self, request: StorageRequest, body: Option<&[u8]>) -> TransportResult<StorageResponse> {
        let url = self.url_of(&request)?;
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut ureq_request = self
            .agent
            .request_url(request.method().as_str(), &url)
            .set("Date", &date)
            .set("Authorization", &self.authorization(&request, &url, &date));
        for (name, value) in request.headers() {
            ureq_request = ureq_request.set(name, value);
        }
        let result = match body {
            Some(body) => ureq_request.send_bytes(body),
            None => ureq_request.call(),
        };
        match result {
            Ok(response) => make_storage_response(response),
            Err(UreqError::Status(status, response)) => {
                let mut body = Vec::new();
                response.into_reader().read_to_end(&mut body).ok();
                Err(TransportError::Status {
                    method: request.method(),
                    url: url.to_string(),
                    status,
                    body,
                })
            }
            Err(UreqError::Transport(transport)) => Err(TransportError::Transport(AnyError::new(transport))),
        }
    }
}

fn make_storage_response(response: UreqResponse) -> TransportResult<StorageResponse> {
    let status = response.status();
    let headers = response
        .headers_names()
        .into_iter()
        .filter_map(|name| response.header(&name).map(|value| (name.to_owned(), value.to_owned())))
        .collect::<Vec<_>>();
    let mut data = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut data)
        .map_err(|err| TransportError::Transport(err.into()))?;
    Ok(StorageResponse::new(status, headers, data))
}

/// 基于 Ureq 的存储客户端构建器
#[derive(Debug)]
pub struct UreqStorageClientBuilder {
    agent: Option<Agent>,
    credential: Credential,
    host: String,
    use_https: bool,
    path_style: bool,
}

impl UreqStorageClientBuilder {
    /// 创建存储客户端构建器
    #[inline]
    pub fn new(credential: Credential) -> Self {
        Self {
            agent: None,
            credential,
            host: DEFAULT_HOST.to_owned(),
            use_https: true,
            path_style: false,
        }
    }

    /// 设置 Ureq Agent
    #[inline]
    pub fn agent(&mut self, agent: Agent) -> &mut Self {
        self.agent = Some(agent);
        self
    }

    /// 设置存储服务域名，可以包含端口
    #[inline]
    pub fn host(&mut self, host: impl Into<String>) -> &mut Self {
        self.host = host.into();
        self
    }

    /// 设置是否使用 HTTPS
    #[inline]
    pub fn use_https(&mut self, use_https: bool) -> &mut Self {
        self.use_https = use_https;
        self
    }

    /// 设置是否将存储空间名称放在路径中，而不是域名中
    #[inline]
    pub fn path_style(&mut self, path_style: bool) -> &mut Self {
        self.path_style = path_style;
        self
    }

    /// 构建存储客户端
    pub fn build(&mut self) -> UreqStorageClient {
        UreqStorageClient {
            agent: self.agent.take().unwrap_or_else(ureq::agent),
            credential: self.credential.to_owned(),
            host: self.host.to_owned(),
            use_https: self.use_https,
            path_style: self.path_style,
        }
    }
}
