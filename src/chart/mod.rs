//! Natural-language to chart synthesis.

pub mod bind;
pub mod figure;
pub mod grammar;
pub mod pipeline;
pub mod prompt;

pub use bind::{evaluate, TABLE_IDENT};
pub use figure::{Axis, ChartFigure, ChartKind, ChartPoint, ChartSeries};
pub use grammar::{parse_chart_call, ChartCall, GrammarError, Value};
pub use pipeline::{ChartPipeline, ChartRun, PipelineStage};
