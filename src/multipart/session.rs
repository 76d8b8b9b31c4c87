use super::super::{xml::complete_multipart_upload_body, ObjectUri};
use assert_impl::assert_impl;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use tap::Tap;

/// 已上传的分片
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadedPart {
    part_number: NonZeroUsize,
    etag: String,
}

impl UploadedPart {
    /// 创建已上传的分片
    #[inline]
    pub fn new(part_number: NonZeroUsize, etag: String) -> Self {
        Self { part_number, etag }
    }

    /// 获取分片号
    #[inline]
    pub fn part_number(&self) -> NonZeroUsize {
        self.part_number
    }

    /// 获取存储服务返回的 ETag
    #[inline]
    pub fn etag(&self) -> &str {
        &self.etag
    }
}

/// 初始化分片上传后，存储服务返回的信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedUpload {
    bucket: String,
    key: String,
    upload_id: String,
}

impl InitiatedUpload {
    #[inline]
    pub(super) fn new(bucket: String, key: String, upload_id: String) -> Self {
        Self { bucket, key, upload_id }
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

    /// 获取分片上传 ID
    #[inline]
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }
}

/// 分片上传会话
///
/// 上传 ID 只能被设置一次，分片表可以被多个工作线程同时写入。
#[derive(Debug)]
pub(super) struct UploadSession {
    uri: ObjectUri,
    upload_id: OnceCell<String>,
    parts: DashMap<NonZeroUsize, String>,
}

impl UploadSession {
    pub(super) fn new(uri: ObjectUri) -> Self {
        Self {
            uri,
            upload_id: OnceCell::new(),
            parts: DashMap::new(),
        }
    }

    #[inline]
    pub(super) fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    #[inline]
    pub(super) fn upload_id(&self) -> Option<&str> {
        self.upload_id.get().map(String::as_str)
    }

    /// 上传 ID 已被设置过时返回 `false`
    #[inline]
    pub(super) fn set_upload_id(&self, upload_id: String) -> bool {
        self.upload_id.set(upload_id).is_ok()
    }

    /// 同一分片号以最后一次上传的 ETag 为准，返回被替换的 ETag
    #[inline]
    pub(super) fn record_part(&self, part_number: NonZeroUsize, etag: String) -> Option<String> {
        self.parts.insert(part_number, etag)
    }

    #[inline]
    pub(super) fn has_part(&self, part_number: NonZeroUsize) -> bool {
        self.parts.contains_key(&part_number)
    }

    /// 分片号大于 `num_parts` 的最小分片号
    pub(super) fn first_part_beyond(&self, num_parts: usize) -> Option<NonZeroUsize> {
        self.parts
            .iter()
            .map(|entry| *entry.key())
            .filter(|part_number| part_number.get() > num_parts)
            .min()
    }

    #[inline]
    pub(super) fn num_parts(&self) -> usize {
        self.parts.len()
    }

    /// 按分片号升序排列的分片快照
    pub(super) fn parts(&self) -> Vec<UploadedPart> {
        self.parts
            .iter()
            .map(|entry| UploadedPart::new(*entry.key(), entry.value().to_owned()))
            .collect::<Vec<_>>()
            .tap_mut(|parts| parts.sort_unstable_by_key(|part| part.part_number()))
    }

    pub(super) fn manifest(&self) -> String {
        complete_multipart_upload_body(&self.parts())
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    fn part_number(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_upload_id_is_set_once() {
        let session = UploadSession::new(ObjectUri::new("fakebucket", "fakeobject"));
        assert_eq!(session.upload_id(), None);
        assert!(session.set_upload_id("first".to_owned()));
        assert!(!session.set_upload_id("second".to_owned()));
        assert_eq!(session.upload_id(), Some("first"));
    }

    #[test]
    fn test_manifest_is_sorted_by_part_number() {
        let session = UploadSession::new(ObjectUri::new("fakebucket", "fakeobject"));
        for n in [3, 1, 2] {
            assert_eq!(session.record_part(part_number(n), format!("etag-{}", n)), None);
        }
        assert_eq!(session.first_part_beyond(3), None);
        assert_eq!(session.first_part_beyond(1), Some(part_number(2)));
        assert_eq!(
            session.manifest(),
            "<CompleteMultipartUpload>\
             <Part><PartNumber>1</PartNumber><ETag>etag-1</ETag></Part>\
             <Part><PartNumber>2</PartNumber><ETag>etag-2</ETag></Part>\
             <Part><PartNumber>3</PartNumber><ETag>etag-3</ETag></Part>\
             </CompleteMultipartUpload>"
        );
    }

    #[test]
    fn test_latest_etag_wins() {
        let session = UploadSession::new(ObjectUri::new("fakebucket", "fakeobject"));
        assert_eq!(session.record_part(part_number(1), "old".to_owned()), None);
        assert_eq!(
            session.record_part(part_number(1), "new".to_owned()),
            Some("old".to_owned())
        );
        assert_eq!(session.num_parts(), 1);
        assert_eq!(
            session.manifest(),
            "<CompleteMultipartUpload><Part><PartNumber>1</PartNumber><ETag>new</ETag></Part></CompleteMultipartUpload>"
        );
    }

    #[test]
    fn test_concurrent_record_parts() {
        let session = Arc::new(UploadSession::new(ObjectUri::new("fakebucket", "fakeobject")));
        let threads = (0..8)
            .map(|t| {
                let session = session.to_owned();
                thread::spawn(move || {
                    for n in (1..=400).filter(|n| n % 8 == t) {
                        session.record_part(part_number(n), format!("etag-{}", n));
                    }
                })
            })
            .collect::<Vec<_>>();
        threads.into_iter().for_each(|thread| thread.join().unwrap());

        assert_eq!(session.num_parts(), 400);
        let parts = session.parts();
        assert!(parts
            .iter()
            .enumerate()
            .all(|(i, part)| part.part_number().get() == i + 1 && part.etag() == format!("etag-{}", i + 1)));
        assert!(session.has_part(part_number(400)));
        assert!(!session.has_part(part_number(401)));
    }
}
