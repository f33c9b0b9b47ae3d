// ABOUTME: Recursive text search inside the sandbox workspace
// ABOUTME: Runs grep in the container and parses file:line:text matches

use crate::error::SandboxError;
use crate::lifecycle::{SandboxLifecycle, CONTAINER_WORKSPACE};
use crate::types::{SearchMatch, SearchRequest, SearchResult};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct WorkspaceSearch {
    lifecycle: Arc<SandboxLifecycle>,
}

impl WorkspaceSearch {
    pub fn new(lifecycle: Arc<SandboxLifecycle>) -> Self {
        Self { lifecycle }
    }

    pub async fn search(&self, request: SearchRequest) -> SearchResult {
        if request.pattern.is_empty() {
            return failure("Search pattern cannot be empty".to_string());
        }

        let argv = build_grep_argv(&request);
        debug!("Searching sandbox: {:?}", argv);

        let exec = match self.lifecycle.exec_in_active(argv, None).await {
            Ok(exec) => exec,
            Err(e) => return failure(e.to_string()),
        };

        match exec.exit_code {
            // 1 is grep's "no lines selected"
            Some(1) => SearchResult {
                success: true,
                matches: Vec::new(),
                truncated: false,
                error: None,
            },
            Some(127) => failure(SandboxError::ToolUnavailable("grep".to_string()).to_string()),
            // 2 can still carry matches alongside unreadable-file noise
            Some(0) | Some(2) | None => {
                let mut matches = parse_grep_output(&exec.output);
                if matches.is_empty() && exec.exit_code == Some(2) {
                    warn!("grep failed: {}", exec.output.trim());
                    return failure(exec.output.trim().to_string());
                }
                let truncated = matches.len() > request.max_results;
                matches.truncate(request.max_results);
                SearchResult {
                    success: true,
                    matches,
                    truncated,
                    error: None,
                }
            }
            Some(code) => failure(format!("grep exited with {}: {}", code, exec.output.trim())),
        }
    }
}

fn failure(error: String) -> SearchResult {
    SearchResult {
        success: false,
        matches: Vec::new(),
        truncated: false,
        error: Some(error),
    }
}

fn build_grep_argv(request: &SearchRequest) -> Vec<String> {
    let mut argv = vec!["grep".to_string(), "-rn".to_string()];
    if request.ignore_case {
        argv.push("-i".to_string());
    }
    if let Some(include) = request.include.as_deref().filter(|g| !g.is_empty()) {
        argv.push(format!("--include={}", include));
    }
    argv.push("-e".to_string());
    argv.push(request.pattern.clone());
    argv.push(
        request
            .path
            .clone()
            .unwrap_or_else(|| CONTAINER_WORKSPACE.to_string()),
    );
    argv
}

/// Parse `file:line:text` lines; anything else (stderr noise) is skipped
pub fn parse_grep_output(output: &str) -> Vec<SearchMatch> {
    output
        .lines()
        .filter_map(|line| {
            let (file, rest) = line.split_once(':')?;
            let (line_no, text) = rest.split_once(':')?;
            Some(SearchMatch {
                file: file.to_string(),
                line: line_no.parse().ok()?,
                text: text.to_string(),
            })
        })
        .collect()
}
