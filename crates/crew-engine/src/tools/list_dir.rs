use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crew_core::tools::{ArgSpec, ArgType, Tool, ToolArgs, ToolContext, ToolDescriptor, ToolError, ToolOutput};

use super::{io_error, read_dir_logged};

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "list_dir",
            "Recursively list a directory as {files, directories} without reading file contents",
        )
        .arg(ArgSpec::required("root_path", ArgType::String, "Directory to list"))
    }

    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let root = ctx.resolve(args.str("root_path")?);
        let tree = tokio::task::spawn_blocking(move || build_tree(&root))
            .await
            .map_err(|e| ToolError::Execution(format!("directory walk failed: {e}")))??;
        Ok(ToolOutput::json(tree))
    }
}

#[derive(Default)]
struct Node {
    files: Vec<String>,
    dirs: Vec<(String, usize)>,
}

/// Walk `root` with an explicit stack. Nodes live in an arena; children always
/// get higher indices than their parent, so assembling in reverse index order
/// sees every child before its parent.
fn build_tree(root: &Path) -> Result<Value, ToolError> {
    let meta = fs::metadata(root).map_err(|e| io_error(root, e))?;
    if !meta.is_dir() {
        return Err(ToolError::Validation(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let mut arena = vec![Node::default()];
    let mut stack: Vec<(PathBuf, usize)> = vec![(root.to_path_buf(), 0)];

    while let Some((dir, idx)) = stack.pop() {
        // The root must be readable; deeper failures only prune that subtree.
        let read = if idx == 0 {
            fs::read_dir(&dir).map_err(|e| io_error(&dir, e))?
        } else {
            let Some(read) = read_dir_logged(&dir) else {
                continue;
            };
            read
        };
        for entry in sorted_entries(read) {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_file() {
                arena[idx].files.push(name);
            } else if path.is_dir() {
                let child = arena.len();
                arena.push(Node::default());
                arena[idx].dirs.push((name, child));
                let is_link = entry.file_type().map(|t| t.is_symlink()).unwrap_or(false);
                if !is_link {
                    stack.push((path, child));
                }
            }
        }
    }

    let mut built: Vec<Option<Value>> = vec![None; arena.len()];
    for idx in (0..arena.len()).rev() {
        let node = std::mem::take(&mut arena[idx]);
        let mut directories = Map::new();
        for (name, child) in node.dirs {
            let subtree = built[child].take().unwrap_or_else(empty_tree);
            directories.insert(name, subtree);
        }
        built[idx] = Some(serde_json::json!({
            "files": node.files,
            "directories": directories,
        }));
    }

    Ok(built[0].take().unwrap_or_else(empty_tree))
}

fn empty_tree() -> Value {
    serde_json::json!({"files": [], "directories": {}})
}

/// Directories first, then files, each by case-insensitive name.
fn sorted_entries(read: fs::ReadDir) -> Vec<fs::DirEntry> {
    let mut entries: Vec<fs::DirEntry> = read.filter_map(Result::ok).collect();
    entries.sort_by_cached_key(|e| {
        (
            e.path().is_file(),
            e.file_name().to_string_lossy().to_lowercase(),
        )
    });
    entries
}
