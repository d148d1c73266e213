pub mod backend;
pub mod batch;
pub mod capture;
pub mod config;
pub mod crossing;
pub mod detection;
pub mod error;
pub mod pipeline;
pub mod preview;
pub mod roi;
pub mod simulate;
pub mod timer;
pub mod track;
pub mod tracker;
pub mod utils;
pub mod visualization;

// Re-export main types
pub use crate::batch::{BatchAggregator, Report};
pub use crate::config::{Config, Mode};
pub use crate::crossing::{CrossingDetector, CrossingEvent};
pub use crate::detection::{Detection, Detector, YoloV5Detector};
pub use crate::error::{Error, Result};
pub use crate::pipeline::{LoopState, Pipeline, PipelineSettings, Step};
pub use crate::roi::{is_inside, Roi};
pub use crate::track::{BBox, Track};
pub use crate::tracker::CentroidTracker;
