use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Diagnosis produced by the analysis phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(rename = "RootCause")]
    pub root_cause: String,
    #[serde(rename = "ProposedFixDetails")]
    pub proposed_fix_details: String,
    #[serde(rename = "GithubFilePathHavingError")]
    pub file_path: String,
}

impl AnalysisResult {
    /// Reject blank diagnoses and any echoed path that differs from the
    /// located file.
    pub fn validate(&self, located_path: &str) -> Result<()> {
        if self.root_cause.trim().is_empty() {
            return Err(Error::InvalidOutput("RootCause is empty".to_string()));
        }
        if self.proposed_fix_details.trim().is_empty() {
            return Err(Error::InvalidOutput(
                "ProposedFixDetails is empty".to_string(),
            ));
        }
        if normalize_path(&self.file_path) != normalize_path(located_path) {
            return Err(Error::InvalidOutput(format!(
                "GithubFilePathHavingError {:?} does not match the analyzed file {:?}",
                self.file_path, located_path
            )));
        }
        Ok(())
    }
}

/// Full replacement content produced by the fix phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixResult {
    #[serde(rename = "FixedCode")]
    pub fixed_code: String,
}

/// Deserialize an extracted JSON object into a phase result. Missing or
/// null required fields are reported as invalid output.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::InvalidOutput(e.to_string()))
}

fn normalize_path(path: &str) -> String {
    let forward = path.trim().replace('\\', "/");
    let mut rest = forward.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analysis(path: &str) -> AnalysisResult {
        AnalysisResult {
            root_cause: "days can be zero".to_string(),
            proposed_fix_details: "return 0 when days == 0".to_string(),
            file_path: path.to_string(),
        }
    }

    #[test]
    fn test_decode_analysis() {
        let value = json!({
            "RootCause": "days can be zero",
            "ProposedFixDetails": "return 0 when days == 0",
            "GithubFilePathHavingError": "app/calc.py"
        });
        let result: AnalysisResult = decode(value).unwrap();
        assert_eq!(result, analysis("app/calc.py"));
    }

    #[test]
    fn test_decode_missing_field_is_invalid() {
        let value = json!({"RootCause": "x", "ProposedFixDetails": "y"});
        let err = decode::<AnalysisResult>(value).unwrap_err();
        assert!(matches!(err, Error::InvalidOutput(_)));
        assert!(err.to_string().contains("GithubFilePathHavingError"));
    }

    #[test]
    fn test_decode_null_field_is_invalid() {
        let value = json!({"FixedCode": null});
        assert!(matches!(
            decode::<FixResult>(value),
            Err(Error::InvalidOutput(_))
        ));
    }

    #[test]
    fn test_decode_empty_fixed_code_is_accepted() {
        let result: FixResult = decode(json!({"FixedCode": ""})).unwrap();
        assert!(result.fixed_code.is_empty());
    }

    #[test]
    fn test_extra_keys_are_ignored() {
        let result: FixResult =
            decode(json!({"FixedCode": "x = 1\n", "Explanation": "added guard"})).unwrap();
        assert_eq!(result.fixed_code, "x = 1\n");
    }

    #[test]
    fn test_serializes_with_wire_names() {
        let value = serde_json::to_value(analysis("app/calc.py")).unwrap();
        assert_eq!(value["RootCause"], "days can be zero");
        assert_eq!(value["GithubFilePathHavingError"], "app/calc.py");
    }

    #[test]
    fn test_validate_accepts_equivalent_paths() {
        assert!(analysis("app/calc.py").validate("app/calc.py").is_ok());
        assert!(analysis("./app/calc.py").validate("app/calc.py").is_ok());
        assert!(analysis(r"app\calc.py").validate("app/calc.py").is_ok());
    }

    #[test]
    fn test_validate_rejects_path_mismatch() {
        let err = analysis("app/other.py").validate("app/calc.py").unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_validate_rejects_blank_root_cause() {
        let mut result = analysis("app/calc.py");
        result.root_cause = "  ".to_string();
        assert!(result.validate("app/calc.py").is_err());
    }
}
