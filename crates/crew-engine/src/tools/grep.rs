use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};

use crew_core::tools::{ArgSpec, ArgType, Tool, ToolArgs, ToolContext, ToolDescriptor, ToolError, ToolOutput};

use super::read_dir_logged;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "grep",
            "Search files for a keyword or regex. Provide root_path (searched recursively) or files.",
        )
        .arg(ArgSpec::required("pattern", ArgType::String, "Keyword or regex pattern"))
        .arg(ArgSpec::optional("root_path", ArgType::String, "Directory or file to search"))
        .arg(ArgSpec::optional("files", ArgType::StringList, "Specific file(s) to search"))
        .arg(
            ArgSpec::optional("use_regex", ArgType::Boolean, "Treat pattern as a regex (default false)")
                .with_default(false),
        )
        .arg(
            ArgSpec::optional("case_sensitive", ArgType::Boolean, "Case-sensitive match (default true)")
                .with_default(true),
        )
        .arg(ArgSpec::optional(
            "file_extensions",
            ArgType::StringList,
            "Only search these extensions, e.g. [\".py\"]",
        ))
    }

    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let regex = build_regex(
            args.str("pattern")?,
            args.bool_or("use_regex", false),
            args.bool_or("case_sensitive", true),
        )?;

        let target = match (args.string_list("files"), args.opt_str("root_path")) {
            (Some(files), _) if !files.is_empty() => {
                Target::Files(files.iter().map(|f| ctx.resolve(f)).collect())
            }
            (_, Some(root)) if !root.is_empty() => Target::Root(ctx.resolve(root)),
            _ => {
                return Err(ToolError::Validation(
                    "either root_path or files must be provided".into(),
                ))
            }
        };
        let extensions = args.string_list("file_extensions").unwrap_or_default();

        let matches = tokio::task::spawn_blocking(move || {
            let files = target.collect()?;
            Ok::<_, ToolError>(search(&regex, &files, &extensions))
        })
        .await
        .map_err(|e| ToolError::Execution(format!("search failed: {e}")))??;

        Ok(ToolOutput::json(Value::Array(matches)))
    }
}

fn build_regex(pattern: &str, use_regex: bool, case_sensitive: bool) -> Result<Regex, ToolError> {
    let source = if use_regex {
        pattern.to_string()
    } else {
        regex::escape(pattern)
    };
    RegexBuilder::new(&source)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| ToolError::Validation(format!("invalid regex: {e}")))
}

enum Target {
    Files(Vec<PathBuf>),
    Root(PathBuf),
}

impl Target {
    /// Candidate paths. Explicit files keep their order; a root is walked
    /// with an explicit stack and sorted.
    fn collect(self) -> Result<Vec<PathBuf>, ToolError> {
        match self {
            Target::Files(files) => Ok(files),
            Target::Root(root) => {
                if !root.exists() {
                    return Err(ToolError::NotFound(root.display().to_string()));
                }
                if root.is_file() {
                    return Ok(vec![root]);
                }
                let mut found = Vec::new();
                let mut stack = vec![root];
                while let Some(dir) = stack.pop() {
                    let Some(read) = read_dir_logged(&dir) else {
                        continue;
                    };
                    for entry in read.filter_map(Result::ok) {
                        let path = entry.path();
                        let is_link = entry.file_type().map(|t| t.is_symlink()).unwrap_or(false);
                        if path.is_dir() && !is_link {
                            stack.push(path);
                        } else {
                            found.push(path);
                        }
                    }
                }
                found.sort();
                Ok(found)
            }
        }
    }
}

fn extension_allowed(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    match path.extension() {
        Some(ext) => {
            let suffix = format!(".{}", ext.to_string_lossy());
            extensions.iter().any(|e| *e == suffix)
        }
        None => false,
    }
}

/// Matching lines in file-then-line order. Unreadable files are skipped.
fn search(regex: &Regex, files: &[PathBuf], extensions: &[String]) -> Vec<Value> {
    let mut matches = Vec::new();
    for path in files {
        if !path.is_file() || !extension_allowed(path, extensions) {
            continue;
        }
        let Ok(bytes) = fs::read(path) else {
            continue;
        };
        let content = String::from_utf8_lossy(&bytes);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for (i, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(json!({
                    "file": path.display().to_string(),
                    "file_name": file_name,
                    "line_number": i + 1,
                    "line": line.trim_end(),
                }));
            }
        }
    }
    matches
}
