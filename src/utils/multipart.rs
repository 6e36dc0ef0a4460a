use std::{collections::HashMap, str::FromStr};

use actix_multipart::Multipart;
use futures_util::TryStreamExt;

use crate::error::{ApiError, ApiResult};

/// Text parts longer than this are refused.
const MAX_TEXT_FIELD_BYTES: usize = 1024;
/// Bodies with more text parts than this are refused.
const MAX_TEXT_FIELDS: usize = 16;

#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A drained `multipart/form-data` body: text fields plus at most one file part.
#[derive(Debug, Default)]
pub struct FormUpload {
    fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
}

impl FormUpload {
    /// Trimmed value of a text field; blank counts as absent.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    #[cfg(test)]
    pub fn insert_text(&mut self, name: &str, value: &str) {
        self.fields.insert(name.to_string(), value.to_string());
    }

    pub fn parse<T: FromStr>(&self, name: &str) -> ApiResult<Option<T>> {
        match self.text(name) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ApiError::bad_request(format!("Invalid value for {name}"))),
            None => Ok(None),
        }
    }
}

/// Reads every part of `payload`. The part named `file_field` is buffered as
/// the upload (capped at `max_file_bytes`); other named parts are text.
pub async fn collect_form(
    mut payload: Multipart,
    file_field: &str,
    max_file_bytes: usize,
) -> ApiResult<FormUpload> {
    let mut form = FormUpload::default();
    let mut text_parts = 0usize;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        let disposition = field.content_disposition();
        let name = disposition.get_name().unwrap_or("").to_string();
        let file_name = disposition.get_filename().map(str::to_string);

        if name == file_field {
            if form.file.is_some() {
                return Err(ApiError::bad_request(format!("Only one {file_field} part is allowed")));
            }
            let content_type = field.content_type().map(|m| m.essence_str().to_string());
            let bytes = read_capped(&mut field, max_file_bytes).await.map_err(|e| match e {
                Capped::Limit => ApiError::PayloadTooLarge(format!(
                    "{file_field} exceeds the {max_file_bytes} byte limit"
                )),
                Capped::Stream(msg) => ApiError::bad_request(msg),
            })?;
            form.file = Some(UploadedFile {
                file_name,
                content_type,
                bytes,
            });
        } else {
            text_parts += 1;
            if text_parts > MAX_TEXT_FIELDS {
                return Err(ApiError::bad_request("Too many form fields"));
            }
            let bytes = read_capped(&mut field, MAX_TEXT_FIELD_BYTES).await.map_err(|e| match e {
                Capped::Limit => ApiError::bad_request(format!("Field {name} is too long")),
                Capped::Stream(msg) => ApiError::bad_request(msg),
            })?;
            if name.is_empty() {
                continue;
            }
            let value = String::from_utf8(bytes)
                .map_err(|_| ApiError::bad_request(format!("Field {name} must be UTF-8 text")))?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}

enum Capped {
    Limit,
    Stream(String),
}

async fn read_capped(field: &mut actix_multipart::Field, limit: usize) -> Result<Vec<u8>, Capped> {
    let mut buf = Vec::new();
    while let Some(chunk) = field
        .try_next()
        .await
        .map_err(|e| Capped::Stream(format!("Malformed multipart body: {e}")))?
    {
        if buf.len() + chunk.len() > limit {
            return Err(Capped::Limit);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

#[cfg(test)]
pub mod test_support {
    pub const BOUNDARY: &str = "----hrm-test-boundary";

    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    /// Builds a multipart body from text fields and an optional `(name, filename, mime, bytes)` file.
    pub fn body(fields: &[(&str, &str)], file: Option<(&str, &str, &str, &[u8])>) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in fields {
            out.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((name, filename, mime, bytes)) = file {
            out.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {mime}\r\n\r\n"
                )
                .as_bytes(),
            );
            out.extend_from_slice(bytes);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{body, content_type};
    use super::*;
    use actix_web::{
        error::PayloadError,
        http::header::{self, HeaderMap, HeaderValue},
        web::Bytes,
    };

    fn multipart(raw: Vec<u8>) -> Multipart {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&content_type()).unwrap(),
        );
        let stream = futures::stream::once(async move { Ok::<_, PayloadError>(Bytes::from(raw)) });
        Multipart::new(&headers, stream)
    }

    #[actix_web::test]
    async fn collects_fields_and_file() {
        let raw = body(
            &[("latitude", " 23.81 "), ("network_type", "wifi"), ("note", "")],
            Some(("photo", "selfie.png", "image/png", b"\x89PNG\r\n\x1a\nabc")),
        );
        let form = collect_form(multipart(raw), "photo", 1024).await.unwrap();

        assert_eq!(form.text("latitude"), Some("23.81"));
        assert_eq!(form.parse::<f64>("latitude").unwrap(), Some(23.81));
        assert_eq!(form.text("network_type"), Some("wifi"));
        assert_eq!(form.text("note"), None);
        assert_eq!(form.text("missing"), None);

        let file = form.file.unwrap();
        assert_eq!(file.file_name.as_deref(), Some("selfie.png"));
        assert_eq!(file.content_type.as_deref(), Some("image/png"));
        assert_eq!(file.bytes, b"\x89PNG\r\n\x1a\nabc");
    }

    #[actix_web::test]
    async fn bad_number_is_bad_request() {
        let raw = body(&[("latitude", "north")], None);
        let form = collect_form(multipart(raw), "photo", 1024).await.unwrap();
        assert!(matches!(form.parse::<f64>("latitude"), Err(ApiError::BadRequest(_))));
    }

    #[actix_web::test]
    async fn oversized_file_is_rejected() {
        let big = vec![0u8; 2048];
        let raw = body(&[], Some(("photo", "big.jpg", "image/jpeg", &big)));
        let err = collect_form(multipart(raw), "photo", 1024).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge(_)));
    }

    #[actix_web::test]
    async fn duplicate_file_parts_are_rejected() {
        let mut raw = body(&[], Some(("photo", "a.png", "image/png", b"a")));
        // splice a second file part in front of the closing boundary
        let second = body(&[], Some(("photo", "b.png", "image/png", b"b")));
        let closing = format!("--{}--\r\n", test_support::BOUNDARY);
        raw.truncate(raw.len() - closing.len());
        raw.extend_from_slice(&second);

        let err = collect_form(multipart(raw), "photo", 1024).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[actix_web::test]
    async fn too_many_text_fields_are_rejected() {
        let names: Vec<String> = (0..=MAX_TEXT_FIELDS).map(|i| format!("f{i}")).collect();
        let fields: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "x")).collect();

        let err = collect_form(multipart(body(&fields, None)), "photo", 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let form = collect_form(multipart(body(&fields[1..], None)), "photo", 1024)
            .await
            .unwrap();
        assert_eq!(form.text("f16"), Some("x"));
    }
}
