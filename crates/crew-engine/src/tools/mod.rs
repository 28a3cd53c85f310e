pub mod edit_and_reapply;
pub mod fetch_url;
pub mod grep;
pub mod html;
pub mod list_dir;
pub mod read_code;
pub mod read_file;
pub mod run_terminal;
pub mod search_files;
pub mod web_search;

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crew_core::tools::ToolError;

use crate::error::EngineError;
use crate::registry::ToolRegistry;

/// Every built-in tool. Agents receive subsets of this registry.
pub fn create_default_registry() -> Result<ToolRegistry, EngineError> {
    let mut registry = ToolRegistry::new();

    // Files
    registry.register(Arc::new(read_file::ReadFileTool))?;
    registry.register(Arc::new(read_code::ReadCodeTool))?;
    registry.register(Arc::new(edit_and_reapply::EditAndReapplyTool))?;

    // Search
    registry.register(Arc::new(list_dir::ListDirTool))?;
    registry.register(Arc::new(grep::GrepTool))?;
    registry.register(Arc::new(search_files::SearchFilesTool))?;

    // Shell
    registry.register(Arc::new(run_terminal::RunTerminalTool))?;

    // Web
    registry.register(Arc::new(fetch_url::FetchUrlTool::new()))?;
    registry.register(Arc::new(web_search::WebSearchTool::new()))?;

    Ok(registry)
}

/// Missing paths are `NotFound`; anything else is an execution failure.
pub(crate) fn io_error(path: &Path, err: io::Error) -> ToolError {
    match err.kind() {
        io::ErrorKind::NotFound => ToolError::NotFound(path.display().to_string()),
        _ => ToolError::Execution(format!("{}: {err}", path.display())),
    }
}

/// Entries of `dir` for a tree walk. An unreadable directory is logged and
/// yields `None` so the walk can carry on without it.
pub(crate) fn read_dir_logged(dir: &Path) -> Option<fs::ReadDir> {
    match fs::read_dir(dir) {
        Ok(read) => Some(read),
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "skipping unreadable directory");
            None
        }
    }
}

/// Line-number arguments are 1-based.
pub(crate) fn line_arg(value: i64, name: &str) -> Result<usize, ToolError> {
    if value < 1 {
        return Err(ToolError::Validation(format!("{name} must be >= 1, got {value}")));
    }
    usize::try_from(value).map_err(|_| ToolError::Validation(format!("{name} out of range")))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_tools() {
        let registry = create_default_registry().unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "edit_and_reapply",
                "fetch_url_content",
                "grep",
                "list_dir",
                "read_code",
                "read_file",
                "run_terminal",
                "search_files",
                "search_web",
            ]
        );
    }

    #[test]
    fn unreadable_directories_are_skipped() {
        let dir = test_support::temp_dir("read_dir_logged");
        std::fs::write(dir.join("plain.txt"), "x").unwrap();

        assert_eq!(read_dir_logged(&dir).unwrap().count(), 1);
        assert!(read_dir_logged(&dir.join("plain.txt")).is_none());
        assert!(read_dir_logged(&dir.join("gone")).is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn line_arg_rejects_zero() {
        assert_eq!(line_arg(3, "start_line").unwrap(), 3);
        assert!(matches!(line_arg(0, "start_line"), Err(ToolError::Validation(_))));
        assert!(matches!(line_arg(-2, "end_line"), Err(ToolError::Validation(_))));
    }
}
