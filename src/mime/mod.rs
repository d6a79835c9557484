//! MIME 编解码原语
//!
//! 所有函数均为无状态的纯函数：quoted-printable、base64、RFC 2047 编码字、
//! RFC 5322 头部折叠以及 RFC 2045/2231 Content-Type 参数解析。

pub mod base64;
pub mod content_type;
pub mod encoded_word;
pub mod header;
pub mod multipart;
pub mod quoted_printable;

use thiserror::Error;

pub use self::base64::{decode_base64, encode_base64};
pub use content_type::{parse_content_type_value, ContentType};
pub use encoded_word::{build_unstructured_value, parse_unstructured_value};
pub use header::{get_date_time_specification, Headers};
pub use multipart::{parse_entity, MimeEntity, MultipartWriter, OutgoingPart, TransferEncoding};
pub use quoted_printable::{decode_quoted_printable, encode_quoted_printable};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MimeError {
    #[error("Malformed Content-Type value: {0}")]
    MalformedContentType(String),

    #[error("Multipart entity without a boundary parameter")]
    MissingBoundary,

    #[error("No delimiter line for boundary {0}")]
    MissingDelimiter(String),

    #[error("Multipart nesting too deep")]
    TooDeeplyNested,

    #[error("Archive root is not multipart")]
    NotMultipart,

    #[error("Archive has no parts")]
    Empty,
}
