use async_trait::async_trait;
use crew_core::tools::{ArgSpec, ArgType, Tool, ToolArgs, ToolContext, ToolDescriptor, ToolError, ToolOutput};

use super::{io_error, line_arg};

pub struct ReadCodeTool;

#[async_trait]
impl Tool for ReadCodeTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "read_code",
            "Read an inclusive 1-based line range from a file, keeping original line endings",
        )
        .arg(ArgSpec::required("file_path", ArgType::String, "Path to the file"))
        .arg(ArgSpec::required("start_line", ArgType::Integer, "First line to read (1-based)"))
        .arg(ArgSpec::required("end_line", ArgType::Integer, "Last line to read, inclusive"))
    }

    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = line_arg(args.i64("start_line")?, "start_line")?;
        let end = line_arg(args.i64("end_line")?, "end_line")?;
        if start > end {
            return Err(ToolError::Validation(format!(
                "start_line ({start}) is after end_line ({end})"
            )));
        }

        let path = ctx.resolve(args.str("file_path")?);
        let bytes = tokio::fs::read(&path).await.map_err(|e| io_error(&path, e))?;
        let content = String::from_utf8_lossy(&bytes);

        Ok(ToolOutput::text(line_range(&content, start, end)))
    }
}

/// Lines `start..=end`. Past-the-end starts give an empty string; the end clamps.
fn line_range(content: &str, start: usize, end: usize) -> String {
    content
        .split_inclusive('\n')
        .skip(start - 1)
        .take(end - start + 1)
        .collect()
}
