use std::collections::HashMap;
use std::path::PathBuf;

use tracing::info;

use crate::artifacts::RunArtifacts;
use crate::diff::unified_diff;
use crate::error::{Error, Result};
use crate::llm::ChatModel;
use crate::prompts::fence_language;
use crate::schema::{AnalysisResult, FixResult, decode};

use super::{Phase, PhaseContext};

/// Accepted fix plus the artifacts recorded for it.
#[derive(Debug, Clone)]
pub struct FixOutcome {
    pub fix: FixResult,
    pub fixed_path: PathBuf,
    pub diff_path: PathBuf,
    pub diff: String,
}

/// Produce replacement content for `relpath`. Only the analysis result is
/// carried over; the analysis dialogue is not.
pub async fn run<M: ChatModel>(
    ctx: &PhaseContext<'_, M>,
    relpath: &str,
    original: &str,
    analysis: &AnalysisResult,
    artifacts: &RunArtifacts,
) -> Result<FixOutcome> {
    let system = ctx.prompts.render("fix-system", &HashMap::new())?;
    let vars = HashMap::from([
        ("fence", fence_language(&ctx.extension).to_string()),
        ("file_path", relpath.to_string()),
        ("file_content", original.to_string()),
        ("root_cause", analysis.root_cause.clone()),
        ("proposed_fix_details", analysis.proposed_fix_details.clone()),
    ]);
    let request = ctx.prompts.render("fix-request", &vars)?;

    let fix = ctx
        .drive(Phase::Fix, system, request, |value| {
            let result: FixResult = decode(value)?;
            if result.fixed_code == original {
                return Err(Error::InvalidOutput(
                    "FixedCode is identical to the original file".to_string(),
                ));
            }
            Ok(result)
        })
        .await?;

    let diff = unified_diff(original, &fix.fixed_code, "original", "fixed");
    let fixed_path = artifacts.write_fixed(relpath, &fix.fixed_code)?;
    artifacts.write_fix(&fix)?;
    let diff_path = artifacts.write_diff(relpath, &diff)?;
    info!(file = relpath, diff = %diff_path.display(), "fix complete");

    Ok(FixOutcome {
        fix,
        fixed_path,
        diff_path,
        diff,
    })
}
