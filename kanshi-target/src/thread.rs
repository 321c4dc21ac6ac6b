//! スレッド管理機能

use crate::Result;
use std::path::Path;

/// スレッドID
pub type ThreadId = i32;

/// プロセスが存在するか確認する
pub fn process_exists(pid: i32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

/// /proc/pid/task からスレッドID一覧を取得する
///
/// 返されるリストは昇順にソートされています。
pub fn list_threads(pid: i32) -> Result<Vec<ThreadId>> {
    let task_dir = format!("/proc/{}/task", pid);
    let entries = std::fs::read_dir(&task_dir)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", task_dir, e))?;

    let mut tids = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse::<ThreadId>().ok()) {
            tids.push(tid);
        }
    }

    tids.sort_unstable();
    Ok(tids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_own_threads() {
        let pid = std::process::id() as i32;
        let tids = list_threads(pid).unwrap();
        assert!(tids.contains(&pid));
    }

    #[test]
    fn test_process_exists() {
        assert!(process_exists(std::process::id() as i32));
        assert!(!process_exists(i32::MAX));
    }
}
