use std::collections::HashMap;

use tracing::info;

use crate::artifacts::RunArtifacts;
use crate::error::Result;
use crate::llm::ChatModel;
use crate::prompts::fence_language;
use crate::schema::{AnalysisResult, decode};

use super::{Phase, PhaseContext};

/// Inputs to the analysis phase: the trace and the file it points at.
#[derive(Debug, Clone)]
pub struct AnalysisInput<'a> {
    pub trace: &'a str,
    pub relpath: &'a str,
    pub content: &'a str,
}

/// Diagnose the failure. Persists `phase1_output.json` on success.
pub async fn run<M: ChatModel>(
    ctx: &PhaseContext<'_, M>,
    input: &AnalysisInput<'_>,
    artifacts: &RunArtifacts,
) -> Result<AnalysisResult> {
    let system = ctx.prompts.render("analysis-system", &HashMap::new())?;
    let vars = HashMap::from([
        ("fence", fence_language(&ctx.extension).to_string()),
        ("trace", input.trace.to_string()),
        ("file_path", input.relpath.to_string()),
        ("file_content", input.content.to_string()),
    ]);
    let request = ctx.prompts.render("analysis-request", &vars)?;

    let analysis = ctx
        .drive(Phase::Analysis, system, request, |value| {
            let result: AnalysisResult = decode(value)?;
            result.validate(input.relpath)?;
            Ok(result)
        })
        .await?;

    let path = artifacts.write_analysis(&analysis)?;
    info!(root_cause = %analysis.root_cause, output = %path.display(), "analysis complete");
    Ok(analysis)
}
