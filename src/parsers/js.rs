//! JavaScript 相关处理
//!
//! 快照中不保留任何脚本：外部脚本与内联脚本都被替换为空占位，
//! 事件处理属性（`on*`）可以一并删除。

/// Media types under which a `<script>` element is executable.
const SCRIPT_MEDIA_TYPES: &[&str] = &[
    "text/javascript",
    "application/javascript",
    "application/ecmascript",
    "text/ecmascript",
    "module",
];

/// 检查属性是否为 DOM 事件处理器
///
/// Any attribute of the form `on<letters>` is treated as a handler, so that
/// non-standard events are removed too.
pub fn attr_is_event_handler(attr_name: &str) -> bool {
    let name = attr_name.as_bytes();
    name.len() > 2
        && name[..2].eq_ignore_ascii_case(b"on")
        && name[2..].iter().all(u8::is_ascii_alphabetic)
}

/// True when a `<script type>` value runs code. Data blocks such as
/// `application/ld+json` are kept.
pub fn is_executable_script(type_attr: Option<&str>) -> bool {
    match type_attr.map(str::trim) {
        None | Some("") => true,
        Some(value) => SCRIPT_MEDIA_TYPES
            .iter()
            .any(|media_type| value.eq_ignore_ascii_case(media_type)),
    }
}
