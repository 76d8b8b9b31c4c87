use super::{error::ProtocolError, multipart::UploadedPart};
use auto_impl::auto_impl;
use quick_xml::{escape::partial_escape, events::Event, Reader};
use std::fmt::{Debug, Write as _};

/// XML 字段提取器
#[auto_impl(&, Box, Arc)]
pub trait XmlFieldExtractor: Debug + Send + Sync {
    /// 提取 XML 文档中第一个名为 `field_name` 的元素的文本内容
    ///
    /// 元素不存在时返回 [`ProtocolError::MissingField`]。
    fn extract_field(&self, xml: &[u8], field_name: &str) -> Result<String, ProtocolError>;
}

/// 基于 quick-xml 的 XML 字段提取器
#[derive(Debug, Default, Clone, Copy)]
pub struct QuickXmlFieldExtractor;

impl XmlFieldExtractor for QuickXmlFieldExtractor {
    fn extract_field(&self, xml: &[u8], field_name: &str) -> Result<String, ProtocolError> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text_start = true;
        reader.config_mut().trim_text_end = true;

        let mut depth = 0usize;
        let mut text = String::new();
        loop {
            match reader.read_event()? {
                Event::Start(e) if e.local_name().as_ref() == field_name.as_bytes() => {
                    depth += 1;
                }
                Event::Empty(e) if depth == 0 && e.local_name().as_ref() == field_name.as_bytes() => {
                    return Ok(String::new());
                }
                Event::Text(e) if depth > 0 => {
                    text.push_str(&e.unescape().map_err(quick_xml::Error::from)?);
                }
                Event::CData(e) if depth > 0 => {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
                Event::End(e) if depth > 0 && e.local_name().as_ref() == field_name.as_bytes() => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(text);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Err(ProtocolError::MissingField(field_name.to_owned()))
    }
}

/// 生成完成分片上传的请求体，分片需已按分片号排序
pub(crate) fn complete_multipart_upload_body<'a>(parts: impl IntoIterator<Item = &'a UploadedPart>) -> String {
    let mut body = String::from("<CompleteMultipartUpload>");
    for part in parts {
        write!(
            body,
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            part.part_number(),
            partial_escape(part.etag())
        )
        .ok();
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    const INITIATE_RESPONSE: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>example-bucket</Bucket>
  <Key>example-object &amp; more</Key>
  <UploadId>VXBsb2FkIElEIGZvciA2aWWpbmcncyBteS1tb3ZpZS5tMnRzIHVwbG9hZA</UploadId>
</InitiateMultipartUploadResult>"#;

    #[test]
    fn test_extract_fields() -> anyhow::Result<()> {
        let extractor = QuickXmlFieldExtractor;
        assert_eq!(extractor.extract_field(INITIATE_RESPONSE, "Bucket")?, "example-bucket");
        assert_eq!(extractor.extract_field(INITIATE_RESPONSE, "Key")?, "example-object & more");
        assert_eq!(
            extractor.extract_field(INITIATE_RESPONSE, "UploadId")?,
            "VXBsb2FkIElEIGZvciA2aWWpbmcncyBteS1tb3ZpZS5tMnRzIHVwbG9hZA"
        );
        Ok(())
    }

    #[test]
    fn test_extract_missing_field() {
        let err = QuickXmlFieldExtractor
            .extract_field(INITIATE_RESPONSE, "Location")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField(field) if field == "Location"));
    }

    #[test]
    fn test_extract_empty_and_cdata_fields() -> anyhow::Result<()> {
        let xml = b"<Result><Empty/><Data><![CDATA[<raw>]]></Data></Result>";
        assert_eq!(QuickXmlFieldExtractor.extract_field(xml, "Empty")?, "");
        assert_eq!(QuickXmlFieldExtractor.extract_field(xml, "Data")?, "<raw>");
        Ok(())
    }

    #[test]
    fn test_extract_from_malformed_xml() {
        let err = QuickXmlFieldExtractor
            .extract_field(b"<Result><Bucket>b</Key></Result>", "UploadId")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedXml(_)));
    }

    #[test]
    fn test_complete_multipart_upload_body() {
        let parts = [
            UploadedPart::new(NonZeroUsize::new(1).unwrap(), "\"etag-1\"".to_owned()),
            UploadedPart::new(NonZeroUsize::new(2).unwrap(), "a<b&c".to_owned()),
        ];
        assert_eq!(
            complete_multipart_upload_body(&parts),
            "<CompleteMultipartUpload>\
             <Part><PartNumber>1</PartNumber><ETag>\"etag-1\"</ETag></Part>\
             <Part><PartNumber>2</PartNumber><ETag>a&lt;b&amp;c</ETag></Part>\
             </CompleteMultipartUpload>"
        );
        assert_eq!(
            complete_multipart_upload_body(&Vec::new()),
            "<CompleteMultipartUpload></CompleteMultipartUpload>"
        );
    }
}
