//! # 归档模块
//!
//! - `bundle` - 资源注册表（去重与修改副本的唯一化）
//! - `naming` - 本地文件名分配
//! - `writer` - 将资源集合写为 MHTML 或文件夹
//! - `reader` - 读取 MHTML 并解析其内部引用

pub mod bundle;
pub mod naming;
pub mod reader;
pub mod writer;

pub use bundle::{Resource, ResourceBundle, ResourceId, ResourceStatus};
pub use naming::NameAllocator;
pub use reader::{ArchiveReader, ExtractedArchive};
pub use writer::{ArchiveLayout, ArchiveWriter};
