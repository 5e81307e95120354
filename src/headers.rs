//! HTTP 头部辅助函数
//!
//! 编解码层与内容解码管道共用的头部解析工具：
//!
//! - `Connection` 头中 `close` / `keep-alive` 的识别（决定 HTTP/1.1 连接能否复用）
//! - `Content-Length` 的严格解析（多个值必须一致，只接受十进制数字）
//! - `Transfer-Encoding` 最后一个编码是否为 `chunked`
//! - `Content-Encoding` 编码列表的拆分（决定响应体的解压链）

use http::header::{HeaderValue, ValueIter, CONTENT_ENCODING, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method};

pub(super) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_has(value, "keep-alive")
}

pub(super) fn connection_close(value: &HeaderValue) -> bool {
    connection_has(value, "close")
}

fn connection_has(value: &HeaderValue, needle: &str) -> bool {
    if let Ok(s) = value.to_str() {
        for val in s.split(',') {
            if val.trim().eq_ignore_ascii_case(needle) {
                return true;
            }
        }
    }
    false
}

/// 解析所有 `Content-Length` 头。
///
/// 任意一个值非法，或者多个值互相矛盾，都返回 `None`，由调用方视为解析错误。
pub(super) fn content_length_parse_all(headers: &HeaderMap) -> Option<u64> {
    content_length_parse_all_values(headers.get_all(CONTENT_LENGTH).into_iter())
}

fn content_length_parse_all_values(values: ValueIter<'_, HeaderValue>) -> Option<u64> {
    // If multiple Content-Length headers were sent, everything can still
    // be alright if they all contain the same value, and all parse
    // correctly. If not, then it's an error.
    let mut content_length: Option<u64> = None;
    for h in values {
        if let Ok(line) = h.to_str() {
            for v in line.split(',') {
                if let Some(n) = from_digits(v.trim().as_bytes()) {
                    if content_length.is_none() {
                        content_length = Some(n)
                    } else if content_length != Some(n) {
                        return None;
                    }
                } else {
                    return None;
                }
            }
        } else {
            return None;
        }
    }

    content_length
}

fn from_digits(bytes: &[u8]) -> Option<u64> {
    // cannot use FromStr for u64, since it allows a signed prefix
    let mut result = 0u64;
    const RADIX: u64 = 10;

    if bytes.is_empty() {
        return None;
    }

    for &b in bytes {
        match b {
            b'0'..=b'9' => {
                result = result.checked_mul(RADIX)?;
                result = result.checked_add((b - b'0') as u64)?;
            }
            _ => {
                return None;
            }
        }
    }

    Some(result)
}

/// GET/HEAD/DELETE/CONNECT 的请求体没有定义语义，空 body 时不需要写 `content-length: 0`。
pub(super) fn method_has_defined_payload_semantics(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::DELETE | Method::CONNECT
    )
}

pub(super) fn set_content_length_if_missing(headers: &mut HeaderMap, len: u64) {
    headers
        .entry(CONTENT_LENGTH)
        .or_insert_with(|| HeaderValue::from(len));
}

pub(super) fn transfer_encoding_is_chunked(headers: &HeaderMap) -> bool {
    is_chunked(headers.get_all(TRANSFER_ENCODING).into_iter())
}

fn is_chunked(mut encodings: ValueIter<'_, HeaderValue>) -> bool {
    // chunked must always be the last encoding, per RFC 9112
    if let Some(line) = encodings.next_back() {
        return is_chunked_(line);
    }

    false
}

fn is_chunked_(value: &HeaderValue) -> bool {
    // chunked must always be the last encoding, per RFC 9112
    if let Ok(s) = value.to_str() {
        if let Some(encoding) = s.rsplit(',').next() {
            return encoding.trim().eq_ignore_ascii_case("chunked");
        }
    }

    false
}

/// 按出现顺序返回所有内容编码（小写），`identity` 与空项会被跳过。
///
/// 返回 `Err(())` 表示头部值不是合法的可见 ASCII。
pub(super) fn content_encodings(headers: &HeaderMap) -> Result<Vec<String>, ()> {
    let mut codings = Vec::new();
    for value in headers.get_all(CONTENT_ENCODING) {
        let s = value.to_str().map_err(|_| ())?;
        for coding in s.split(',') {
            let coding = coding.trim();
            if coding.is_empty() || coding.eq_ignore_ascii_case("identity") {
                continue;
            }
            codings.push(coding.to_ascii_lowercase());
        }
    }
    Ok(codings)
}
