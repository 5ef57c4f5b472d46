//! Natural-language chart requests: prompt, generate, validate, evaluate.
//!
//! Every call to [`ChartPipeline::run`] walks a fresh state machine
//! (`Idle → PromptBuilt → Requested → Validated → Evaluated → Succeeded`,
//! or `Failed` from any step) and returns the full [`ChartRun`] record.
//! Nothing is carried over between runs.

use crate::chart::bind::{evaluate, TABLE_IDENT};
use crate::chart::figure::ChartFigure;
use crate::chart::grammar::{
    extract_code, has_figure_marker, parse_chart_call, ChartCall, FIGURE_IDENT, PLOT_MODULE,
};
use crate::chart::prompt::build_chart_prompt;
use crate::dataset::column_names;
use crate::error::{DashboardError, Result};
use crate::llm::TextGenerator;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Idle,
    PromptBuilt,
    Requested,
    Validated,
    Evaluated,
    Succeeded,
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Succeeded | PipelineStage::Failed)
    }
}

/// Everything one request produced, for display and diagnostics.
#[derive(Debug)]
pub struct ChartRun {
    pub id: Uuid,
    pub request: String,
    pub prompt: Option<String>,
    pub response: Option<String>,
    /// The statement that was parsed, once the response passed the marker check.
    pub code: Option<String>,
    /// Stages in the order they were entered; the last one is terminal.
    pub stages: Vec<PipelineStage>,
    pub outcome: Result<ChartFigure>,
}

impl ChartRun {
    fn new(request: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            request: request.to_string(),
            prompt: None,
            response: None,
            code: None,
            stages: vec![PipelineStage::Idle],
            outcome: Err(DashboardError::EmptyRequest),
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stages.last().copied().unwrap_or(PipelineStage::Idle)
    }

    pub fn reached(&self, stage: PipelineStage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn succeeded(&self) -> bool {
        self.stage() == PipelineStage::Succeeded
    }

    pub fn figure(&self) -> Option<&ChartFigure> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&DashboardError> {
        self.outcome.as_ref().err()
    }

    fn enter(&mut self, stage: PipelineStage) {
        info!("chart run {} -> {:?}", self.id, stage);
        self.stages.push(stage);
    }

    fn fail(mut self, error: DashboardError) -> Self {
        warn!("chart run {} failed after {:?}: {}", self.id, self.stage(), error);
        self.stages.push(PipelineStage::Failed);
        self.outcome = Err(error);
        self
    }
}

pub struct ChartPipeline<G: TextGenerator> {
    generator: G,
    timeout: Duration,
    table_name: String,
}

impl<G: TextGenerator> ChartPipeline<G> {
    pub fn new(generator: G, timeout: Duration) -> Self {
        Self {
            generator,
            timeout,
            table_name: TABLE_IDENT.to_string(),
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Runs one chart request against the current view. Never panics on bad
    /// service output; failures end up in `ChartRun::outcome`.
    pub async fn run(&self, request: &str, view: &DataFrame) -> ChartRun {
        let mut run = ChartRun::new(request);
        let span = info_span!("chart_run", id = %run.id);
        async move {
            if request.trim().is_empty() {
                return run;
            }

            let prompt = build_chart_prompt(&column_names(view), request, &self.table_name);
            run.prompt = Some(prompt.clone());
            run.enter(PipelineStage::PromptBuilt);

            run.enter(PipelineStage::Requested);
            let response = match tokio::time::timeout(self.timeout, self.generator.generate(&prompt)).await {
                Ok(Ok(text)) => text,
                Ok(Err(DashboardError::Generation(message))) => {
                    return run.fail(DashboardError::Generation(message))
                }
                Ok(Err(other)) => return run.fail(DashboardError::Generation(other.to_string())),
                Err(_) => {
                    return run.fail(DashboardError::Generation(format!(
                        "no response within {}s",
                        self.timeout.as_secs_f64()
                    )))
                }
            };
            run.response = Some(response.clone());

            let call = match validate_response(&response) {
                Ok((code, call)) => {
                    run.code = Some(code);
                    call
                }
                Err(e) => return run.fail(e),
            };
            run.enter(PipelineStage::Validated);

            run.enter(PipelineStage::Evaluated);
            match evaluate(&call, &self.table_name, view) {
                Ok(figure) => {
                    info!(
                        "chart run {} produced a {} chart with {} points",
                        run.id,
                        figure.kind,
                        figure.point_count()
                    );
                    run.outcome = Ok(figure);
                    run.stages.push(PipelineStage::Succeeded);
                    run
                }
                Err(e) => run.fail(e),
            }
        }
        .instrument(span)
        .await
    }
}

/// Marker check, then a parse through the restricted grammar. Returns the
/// extracted statement alongside the parsed call.
pub fn validate_response(response: &str) -> Result<(String, ChartCall)> {
    if !has_figure_marker(response) {
        return Err(DashboardError::InvalidResponse(format!(
            "the model did not return a chart construction ('{} = {}.' not found)",
            FIGURE_IDENT, PLOT_MODULE
        )));
    }
    let code = extract_code(response);
    let call = parse_chart_call(&code).map_err(|e| {
        DashboardError::InvalidResponse(format!("the returned code is outside the chart grammar: {}", e))
    })?;
    Ok((code, call))
}
