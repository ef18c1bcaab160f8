use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

/// Write a value as pretty JSON via a temp file and atomic rename.
///
/// Crashed runs never leave a half-written artifact behind; readers see
/// either the previous file or the complete new one.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    write_atomic(path, body.as_bytes()).await
}

/// Write bytes via a temp file in the same directory and atomic rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("Path has no parent directory: {}", path.display()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    // Temp file must live on the same filesystem as the target for rename
    // to be atomic.
    let tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    std::fs::write(tmp.path(), bytes)
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Append one JSON record plus newline to a JSONL log, creating it if needed.
pub async fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let mut line = serde_json::to_string(record).context("Failed to serialize JSONL record")?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open log for append: {}", path.display()))?;
    file.write_all(line.as_bytes())
        .await
        .with_context(|| format!("Failed to append to log: {}", path.display()))?;
    Ok(())
}

/// Read up to `max_lines` complete lines from the end of a file without
/// loading the whole file, oldest first.
///
/// At most `max_bytes` are read from the tail; when the read starts
/// mid-file the first (partial) line is discarded. A missing file yields
/// an empty list.
pub async fn tail_lines(path: &Path, max_lines: usize, max_bytes: u64) -> Result<Vec<String>> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open log: {}", path.display()))
        }
    };

    let len = file
        .metadata()
        .await
        .with_context(|| format!("Failed to stat log: {}", path.display()))?
        .len();
    let start = len.saturating_sub(max_bytes);
    if start > 0 {
        file.seek(std::io::SeekFrom::Start(start))
            .await
            .with_context(|| format!("Failed to seek log: {}", path.display()))?;
    }

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .await
        .with_context(|| format!("Failed to read log tail: {}", path.display()))?;
    // The seek may land inside a multi-byte character; lossy decoding only
    // affects the partial line dropped below.
    let text = String::from_utf8_lossy(&buf);

    let mut lines: Vec<&str> = text.lines().collect();
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(max_lines);
    Ok(lines[skip..].iter().map(ToString::to_string).collect())
}

/// Recursively collect files under `root` whose names match a prefix and suffix.
///
/// Returns an empty list when the root does not exist. Results are sorted by
/// path so callers get a stable order.
pub async fn collect_files(root: &Path, prefix: &str, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !root.exists() {
        return Ok(found);
    }

    // Async recursion is not allowed without boxing; use an explicit stack.
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                stack.push(path);
                continue;
            }

            if file_type.is_file() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with(prefix) && name.ends_with(suffix) {
                    found.push(path);
                }
            }
        }
    }

    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_json_atomic_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("value.json");

        write_json_atomic(&path, &serde_json::json!({"a": 1}))
            .await
            .unwrap();

        let body = tokio::fs::read_to_string(&path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn test_append_jsonl_accumulates_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");

        append_jsonl(&path, &serde_json::json!({"n": 1})).await.unwrap();
        append_jsonl(&path, &serde_json::json!({"n": 2})).await.unwrap();

        let body = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(body.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_tail_lines_returns_newest_complete_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");

        let body: String = (0..100).map(|n| format!("{{\"n\":{n}}}\n")).collect();
        tokio::fs::write(&path, &body).await.unwrap();

        // A byte cap far smaller than the file still yields the last lines.
        let lines = tail_lines(&path, 5, 256).await.unwrap();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "{\"n\":95}");
        assert_eq!(lines[4], "{\"n\":99}");

        // Each returned line parses; no partial line survives the seek.
        for line in &lines {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }

    #[tokio::test]
    async fn test_tail_lines_short_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        tokio::fs::write(&path, "{\"n\":1}\n{\"n\":2}\n").await.unwrap();

        let lines = tail_lines(&path, 10, 1024 * 1024).await.unwrap();
        assert_eq!(lines, vec!["{\"n\":1}", "{\"n\":2}"]);
    }

    #[tokio::test]
    async fn test_tail_lines_missing_file() {
        let dir = TempDir::new().unwrap();
        let lines = tail_lines(&dir.path().join("absent.jsonl"), 10, 1024)
            .await
            .unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_collect_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("2025").join("12");
        tokio::fs::create_dir_all(&sub).await.unwrap();
        tokio::fs::write(sub.join("output_b.html"), "x").await.unwrap();
        tokio::fs::write(sub.join("output_a.html"), "x").await.unwrap();
        tokio::fs::write(sub.join("other.txt"), "x").await.unwrap();

        let found = collect_files(dir.path(), "output_", ".html").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("output_a.html"));
    }

    #[tokio::test]
    async fn test_collect_files_missing_root() {
        let dir = TempDir::new().unwrap();
        let found = collect_files(&dir.path().join("missing"), "output_", ".html")
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
