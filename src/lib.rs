pub mod assistant;
pub mod chart;
pub mod config;
pub mod dashboard;
pub mod dataset;
pub mod error;
pub mod llm;

pub use chart::{ChartFigure, ChartPipeline, ChartRun, PipelineStage};
pub use dataset::{FilterSelection, SalesTable};
pub use error::{DashboardError, Result};
