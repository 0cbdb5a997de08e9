//! 多模态信封层：规范形状、构造器、归一化与探测

pub mod envelope;
pub mod normalize;

pub use envelope::{MediaEnvelope, MediaKind};
pub use normalize::{
    infer_kind_from_mime, mime_from_data_url, mime_from_path, normalize, probe,
    try_parse_envelope_from_string,
};
