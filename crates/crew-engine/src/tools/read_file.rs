use async_trait::async_trait;
use crew_core::tools::{ArgSpec, ArgType, Tool, ToolArgs, ToolContext, ToolDescriptor, ToolError, ToolOutput};

use super::io_error;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("read_file", "Read the full text content of a file").arg(ArgSpec::required(
            "file_path",
            ArgType::String,
            "Path to the file, absolute or relative to the working directory",
        ))
    }

    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let path = ctx.resolve(args.str("file_path")?);
        let bytes = tokio::fs::read(&path).await.map_err(|e| io_error(&path, e))?;
        Ok(ToolOutput::text(String::from_utf8_lossy(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{call, ctx, temp_dir};
    use serde_json::json;
    use std::fs;

    #[tokio::test]
    async fn reads_whole_file() {
        let dir = temp_dir("read_file");
        fs::write(dir.join("notes.md"), "line 1\nline 2\n").unwrap();

        let out = call(&ReadFileTool, json!({"file_path": "notes.md"}), &ctx(&dir)).await.unwrap();
        assert_eq!(out.payload.as_text(), "line 1\nline 2\n");

        let abs = dir.join("notes.md").display().to_string();
        let out = call(&ReadFileTool, json!({"file_path": abs}), &ctx(&std::env::temp_dir()))
            .await
            .unwrap();
        assert!(out.is_success());

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = temp_dir("read_file_missing");
        let err = call(&ReadFileTool, json!({"file_path": "nope.txt"}), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_argument_is_validation() {
        let err = call(&ReadFileTool, json!({}), &ctx(&std::env::temp_dir())).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }
}
