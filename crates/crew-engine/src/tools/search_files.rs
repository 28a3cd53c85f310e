use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crew_core::tools::{ArgSpec, ArgType, Tool, ToolArgs, ToolContext, ToolDescriptor, ToolError, ToolOutput};

use super::read_dir_logged;

pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("search_files", "Find files by name using fuzzy matching")
            .arg(ArgSpec::required("root_path", ArgType::String, "Directory to search recursively"))
            .arg(ArgSpec::required("query", ArgType::String, "Partial or fuzzy file name"))
            .arg(
                ArgSpec::optional("min_score", ArgType::Number, "Minimum similarity 0.0-1.0 (default 0.6)")
                    .with_default(0.6),
            )
            .arg(
                ArgSpec::optional("include_dirs", ArgType::Boolean, "Also match directories (default false)")
                    .with_default(false),
            )
    }

    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let root = ctx.resolve(args.str("root_path")?);
        let query = args.str("query")?.to_lowercase();
        let min_score = args.f64("min_score")?;
        let include_dirs = args.bool_or("include_dirs", false);

        let results = tokio::task::spawn_blocking(move || {
            fuzzy_search(&root, &query, min_score, include_dirs)
        })
        .await
        .map_err(|e| ToolError::Execution(format!("search failed: {e}")))??;

        Ok(ToolOutput::json(Value::Array(results)))
    }
}

fn fuzzy_search(
    root: &Path,
    query: &str,
    min_score: f64,
    include_dirs: bool,
) -> Result<Vec<Value>, ToolError> {
    if !root.exists() {
        return Err(ToolError::NotFound(root.display().to_string()));
    }

    let query: Vec<char> = query.chars().collect();
    let mut scored: Vec<(PathBuf, String, f64)> = Vec::new();
    for path in walk(root) {
        if path.is_dir() && !include_dirs {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let candidate: Vec<char> = name.to_lowercase().chars().collect();
        let score = similarity(&query, &candidate);
        if score >= min_score {
            scored.push((path, name, (score * 1000.0).round() / 1000.0));
        }
    }

    // stable: equal scores keep walk order
    scored.sort_by(|a, b| b.2.total_cmp(&a.2));

    Ok(scored
        .into_iter()
        .map(|(path, name, score)| {
            json!({
                "path": path.display().to_string(),
                "name": name,
                "score": score,
            })
        })
        .collect())
}

/// Every entry under `root`, sorted by path. Symlinked directories are not
/// descended.
fn walk(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Some(read) = read_dir_logged(&dir) else {
            continue;
        };
        for entry in read.filter_map(Result::ok) {
            let path = entry.path();
            let is_link = entry.file_type().map(|t| t.is_symlink()).unwrap_or(false);
            if path.is_dir() && !is_link {
                stack.push(path.clone());
            }
            found.push(path);
        }
    }
    found.sort();
    found
}

/// Ratcliff/Obershelp similarity `2*M/T`, where M counts characters in the
/// recursively found longest common blocks.
pub(crate) fn similarity(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(a, b) as f64 / total as f64
}

fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        b2j.entry(*c).or_default().push(j);
    }

    let mut matched = 0;
    let mut stack = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = stack.pop() {
        let (i, j, k) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            stack.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            stack.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest block `a[i..i+k] == b[j..j+k]` inside the given ranges. Ties go to
/// the earliest `i`, then the earliest `j`.
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    let mut j2len: HashMap<usize, usize> = HashMap::new();
    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| j2len.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next.insert(j, k);
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            }
        }
        j2len = next;
    }
    (best_i, best_j, best_k)
}
