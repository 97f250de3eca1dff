use std::cmp::Reverse;
use std::path::{Component, Path};

use regex::Regex;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Resolves an error trace to a single repository-relative source file.
pub struct TraceLocator {
    extension: String,
    frame_re: Regex,
    bare_re: Regex,
}

impl TraceLocator {
    pub fn new(extension: &str) -> Result<Self> {
        let ext = regex::escape(extension);
        let frame_re = Regex::new(&format!(r#"File "(.+?\.{ext})""#))
            .map_err(|e| Error::ConfigValidation(format!("invalid source extension: {e}")))?;
        let bare_re = Regex::new(&format!(r"([\w\-/\\.]+\.{ext})\b"))
            .map_err(|e| Error::ConfigValidation(format!("invalid source extension: {e}")))?;
        Ok(Self {
            extension: extension.to_string(),
            frame_re,
            bare_re,
        })
    }

    /// Find the file reference in a trace: the first frame header, else the
    /// first bare path-like token with the expected extension.
    pub fn extract_candidate(&self, trace: &str) -> Result<String> {
        if let Some(caps) = self.frame_re.captures(trace) {
            return Ok(caps[1].to_string());
        }
        if let Some(caps) = self.bare_re.captures(trace) {
            return Ok(caps[1].to_string());
        }
        Err(Error::NoFileReferenceFound(self.extension.clone()))
    }

    /// Resolve a candidate path against the repository tree.
    pub fn resolve(&self, repo_root: &Path, candidate: &str) -> Result<String> {
        let normalized = normalize_candidate(candidate);

        if !is_absolute_candidate(candidate) && !escapes_root(&normalized) {
            let direct = repo_root.join(&normalized);
            if direct.is_file() {
                debug!(candidate, "resolved trace path directly");
                return Ok(normalized);
            }
        }

        find_by_basename(repo_root, &normalized)
            .ok_or_else(|| Error::FileNotFound(candidate.to_string()))
    }

    /// Extract and resolve in one step.
    pub fn locate(&self, repo_root: &Path, trace: &str) -> Result<String> {
        let candidate = self.extract_candidate(trace)?;
        info!(candidate = %candidate, "trace references file");
        let resolved = self.resolve(repo_root, &candidate)?;
        info!(path = %resolved, "located file in repository");
        Ok(resolved)
    }
}

fn normalize_candidate(candidate: &str) -> String {
    let forward = candidate.replace('\\', "/");
    let mut rest = forward.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest.to_string()
}

/// Treat POSIX roots, Windows roots and drive letters as absolute regardless
/// of the host platform, since traces are often captured elsewhere.
fn is_absolute_candidate(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    candidate.starts_with('/')
        || candidate.starts_with('\\')
        || (bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'\\' || bytes[2] == b'/'))
}

fn escapes_root(relative: &str) -> bool {
    Path::new(relative)
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

/// Search the tree for files named like the candidate's basename.
///
/// Among several matches the one sharing the longest trailing run of path
/// components with the candidate wins; then the shallowest; then the
/// lexicographically smallest.
fn find_by_basename(repo_root: &Path, candidate: &str) -> Option<String> {
    let wanted: Vec<&str> = candidate.split('/').filter(|s| !s.is_empty()).collect();
    let basename = *wanted.last()?;

    let mut matches: Vec<Vec<String>> = WalkDir::new(repo_root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == basename)
        .filter_map(|e| {
            e.path().strip_prefix(repo_root).ok().map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect()
            })
        })
        .collect();

    if matches.len() > 1 {
        debug!(count = matches.len(), basename, "multiple basename matches");
    }

    matches.sort_by_key(|parts| {
        let shared = parts
            .iter()
            .rev()
            .zip(wanted.iter().rev())
            .take_while(|(a, b)| a.as_str() == **b)
            .count();
        (Reverse(shared), parts.len(), parts.join("/"))
    });

    matches.into_iter().next().map(|parts| parts.join("/"))
}
