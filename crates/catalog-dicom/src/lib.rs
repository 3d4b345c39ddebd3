//! # DICOM发现模块
//!
//! 遍历目录树发现DICOM影像（DICOMDIR索引与散落的单个文件），构建影像目录。

pub mod discovery;
pub mod explore;
pub mod parser;
pub mod reader;
pub mod tree;

pub use discovery::{DirectoryReport, Discovery, Step};
pub use explore::{explore, run_exploration, ExploreEvent, ExploreOutcome, ExploreStatus};
pub use parser::DicomParser;
pub use reader::{
    Attribute, Container, ExtractError, ImageAttributes, IndexedInstance, MetadataReader,
    StructuredIndex,
};
pub use tree::{Case, CaseTree, ImageNode, PatientNode, SeriesNode, StudyNode, TextFilter};
