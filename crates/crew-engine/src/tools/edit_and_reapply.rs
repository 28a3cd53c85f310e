use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crew_core::tools::{ArgSpec, ArgType, Tool, ToolArgs, ToolContext, ToolDescriptor, ToolError, ToolOutput};

use super::{io_error, line_arg};

/// Replaces an inclusive line range. Calls on the same file are serialized
/// through its resolved path.
pub struct EditAndReapplyTool;

#[async_trait]
impl Tool for EditAndReapplyTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "edit_and_reapply",
            "Replace an inclusive 1-based line range of a file with new code, optionally writing a .bak backup first",
        )
        .arg(ArgSpec::required("file_path", ArgType::String, "File to edit"))
        .arg(ArgSpec::required("start_line", ArgType::Integer, "First line to replace (1-based)"))
        .arg(ArgSpec::required("end_line", ArgType::Integer, "Last line to replace, inclusive"))
        .arg(ArgSpec::required("new_code", ArgType::String, "Replacement text"))
        .arg(
            ArgSpec::optional("create_backup", ArgType::Boolean, "Write <file>.bak first (default true)")
                .with_default(true),
        )
    }

    fn resource_key(&self, args: &ToolArgs, ctx: &ToolContext) -> Option<String> {
        args.opt_str("file_path")
            .map(|p| ctx.resolve(p).display().to_string())
    }

    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = line_arg(args.i64("start_line")?, "start_line")?;
        let end = line_arg(args.i64("end_line")?, "end_line")?;
        if end < start {
            return Err(ToolError::Validation(format!(
                "invalid line range {start}-{end}"
            )));
        }
        let path = ctx.resolve(args.str("file_path")?);
        let new_code = args.str("new_code")?;
        let create_backup = args.bool_or("create_backup", true);

        let original = tokio::fs::read(&path).await.map_err(|e| io_error(&path, e))?;
        let text = String::from_utf8(original.clone()).map_err(|_| {
            ToolError::Validation(format!("{} is not valid UTF-8", path.display()))
        })?;

        let edit = apply_edit(&text, start, end, new_code)?;

        if create_backup {
            let backup = backup_path(&path);
            tokio::fs::write(&backup, &original)
                .await
                .map_err(|e| io_error(&backup, e))?;
        }
        tokio::fs::write(&path, edit.content.as_bytes())
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!(file = %path.display(), start, end, new_lines = edit.new_line_count, "file edited");

        Ok(ToolOutput::json(json!({
            "file": path.display().to_string(),
            "lines_replaced": format!("{start}-{end}"),
            "old_line_count": edit.old_line_count,
            "new_line_count": edit.new_line_count,
            "backup_created": create_backup,
        })))
    }
}

struct Edit {
    content: String,
    old_line_count: usize,
    new_line_count: usize,
}

fn apply_edit(text: &str, start: usize, end: usize, new_code: &str) -> Result<Edit, ToolError> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    if start > lines.len() {
        return Err(ToolError::Validation(format!(
            "start_line {start} exceeds file length ({} lines)",
            lines.len()
        )));
    }
    let end = end.min(lines.len());

    let mut replacement = new_code.to_string();
    if !replacement.is_empty() && !replacement.ends_with('\n') {
        replacement.push('\n');
    }
    let new_line_count = replacement.split_inclusive('\n').count();

    let mut content = String::with_capacity(text.len() + replacement.len());
    content.extend(lines[..start - 1].iter().copied());
    content.push_str(&replacement);
    content.extend(lines[end..].iter().copied());

    Ok(Edit {
        content,
        old_line_count: end - start + 1,
        new_line_count,
    })
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}
