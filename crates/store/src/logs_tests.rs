// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tempfile::tempdir;

use super::*;

#[test]
fn appends_are_offset_ordered() {
    let dir = tempdir().unwrap();
    let logs = ConsoleLogs::new(dir.path(), 1024 * 1024);

    logs.append("VEA-cam", "exec-1", LogStream::Out, "first").unwrap();
    logs.append("VEA-cam", "exec-1", LogStream::Err, "second").unwrap();
    logs.append("VEA-cam", "exec-1", LogStream::Out, "third").unwrap();

    let tail = logs.tail("VEA-cam", 10);
    let offsets: Vec<u64> = tail.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2]);
    assert_eq!(tail[1].stream, LogStream::Err);
    assert_eq!(tail[2].line, "third");
    assert!(tail.iter().all(|r| r.app_id == "VEA-cam"));
}

#[test]
fn tail_limits_to_n_newest() {
    let dir = tempdir().unwrap();
    let logs = ConsoleLogs::new(dir.path(), 1024 * 1024);
    for i in 0..20 {
        logs.append("VEA-cam", "exec-1", LogStream::Out, &format!("line {i}")).unwrap();
    }
    let tail = logs.tail("VEA-cam", 5);
    assert_eq!(tail.len(), 5);
    assert_eq!(tail[0].line, "line 15");
    assert_eq!(tail[4].line, "line 19");
}

#[test]
fn offsets_recover_after_restart() {
    let dir = tempdir().unwrap();
    {
        let logs = ConsoleLogs::new(dir.path(), 1024 * 1024);
        logs.append("VEA-cam", "exec-1", LogStream::Out, "before").unwrap();
        logs.append("VEA-cam", "exec-1", LogStream::Out, "restart").unwrap();
    }
    // Fresh instance, same directory: the offset counter continues.
    let logs = ConsoleLogs::new(dir.path(), 1024 * 1024);
    let record = logs.append("VEA-cam", "exec-1", LogStream::Out, "after").unwrap();
    assert_eq!(record.offset, 2);
}

#[test]
fn ring_drops_oldest_half() {
    let dir = tempdir().unwrap();
    // Tiny cap so a handful of lines trigger compaction.
    let logs = ConsoleLogs::new(dir.path(), 2_000);
    for i in 0..100 {
        logs.append("VEA-cam", "exec-1", LogStream::Out, &format!("spam {i}")).unwrap();
    }
    let tail = logs.tail("VEA-cam", 1000);
    assert!(!tail.is_empty());
    assert!(tail.len() < 100, "ring should have dropped old records, kept {}", tail.len());
    // The newest line always survives.
    assert_eq!(tail.last().unwrap().line, "spam 99");
}

#[test]
fn tail_reads_newest_execution() {
    let dir = tempdir().unwrap();
    let logs = ConsoleLogs::new(dir.path(), 1024 * 1024);
    logs.append("VEA-cam", "exec-1", LogStream::Out, "old run").unwrap();
    // Ensure a distinct mtime for the newer file.
    std::thread::sleep(std::time::Duration::from_millis(20));
    logs.append("VEA-cam", "exec-2", LogStream::Out, "new run").unwrap();

    let tail = logs.tail("VEA-cam", 10);
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].execution_id, "exec-2");
}

#[test]
fn remove_app_deletes_all_logs() {
    let dir = tempdir().unwrap();
    let logs = ConsoleLogs::new(dir.path(), 1024 * 1024);
    logs.append("VEA-cam", "exec-1", LogStream::Out, "x").unwrap();
    logs.remove_app("VEA-cam");
    assert!(logs.tail("VEA-cam", 10).is_empty());
}

#[test]
fn unknown_app_tails_empty() {
    let dir = tempdir().unwrap();
    let logs = ConsoleLogs::new(dir.path(), 1024 * 1024);
    assert!(logs.tail("VEA-ghost", 10).is_empty());
}
