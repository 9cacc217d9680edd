//! Text input and sentence segmentation.

pub mod segmenter;
pub mod source;

pub use segmenter::{SegmentMode, Segmenter, SegmenterConfig, Sentences};
pub use source::{ChannelSource, ReaderSource, StaticText, TextSource};
