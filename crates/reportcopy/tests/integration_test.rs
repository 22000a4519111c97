use reportcopy::helper::CopyRequest;
use reportcopy::node::{LocalNode, SourceNode};
use reportcopy::publish::{copy_fanout, ReportCopier};
use reportcopy::{copy_report_directory, NodeAgent, ScanPattern, TransferError, WorkerPool};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_filesystem() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    // Create a nested directory structure for testing
    fs::write(root.join("file1.txt"), b"hello world").unwrap();
    fs::write(root.join("file2.txt"), b"test data").unwrap();

    fs::create_dir(root.join("subdir")).unwrap();
    fs::write(root.join("subdir/file3.txt"), b"nested file").unwrap();
    fs::write(root.join("subdir/large.bin"), vec![0u8; 1024]).unwrap();

    fs::create_dir(root.join("subdir/nested")).unwrap();
    fs::write(root.join("subdir/nested/deep.txt"), b"deep file content").unwrap();

    fs::create_dir(root.join("empty_dir")).unwrap();

    // Skipped by the default excludes
    fs::create_dir(root.join(".git")).unwrap();
    fs::write(root.join(".git/HEAD"), b"ref: refs/heads/main").unwrap();
    fs::write(root.join("file1.txt~"), b"backup").unwrap();

    temp_dir
}

fn request(source: &Path, target: &Path, workers: usize, pattern: ScanPattern) -> CopyRequest {
    CopyRequest {
        source_dir: source.to_path_buf(),
        pattern,
        target_dir: target.to_path_buf(),
        number_of_workers: workers,
        timeout: Duration::from_secs(30),
    }
}

fn assert_same_tree(target: &Path) {
    assert_eq!(fs::read(target.join("file1.txt")).unwrap(), b"hello world");
    assert_eq!(fs::read(target.join("file2.txt")).unwrap(), b"test data");
    assert_eq!(fs::read(target.join("subdir/file3.txt")).unwrap(), b"nested file");
    assert_eq!(fs::read(target.join("subdir/large.bin")).unwrap().len(), 1024);
    assert_eq!(
        fs::read(target.join("subdir/nested/deep.txt")).unwrap(),
        b"deep file content"
    );
    assert!(!target.join(".git").exists());
    assert!(!target.join("file1.txt~").exists());
    // Only files are transferred
    assert!(!target.join("empty_dir").exists());
}

#[test]
fn test_local_copy_end_to_end() {
    let source = create_test_filesystem();
    let target = TempDir::new().unwrap();

    let copied = copy_report_directory(source.path(), "", target.path(), 3, 30).unwrap();

    assert_eq!(copied, 5);
    assert_same_tree(target.path());
}

#[test]
fn test_copy_through_node_agent() {
    let source = create_test_filesystem();
    let target = TempDir::new().unwrap();
    let node = LocalNode::new();

    let (remote, agent) = NodeAgent::spawn(node.clone()).unwrap();
    {
        let copier = ReportCopier::new(Arc::new(remote), 2).unwrap();
        let copied = copier
            .copy(&request(source.path(), target.path(), 2, ScanPattern::all()))
            .unwrap();
        assert_eq!(copied, 5);
    }
    agent.join();

    assert_same_tree(target.path());
    assert!(node.registry().is_empty());
}

#[test]
fn test_two_workers_five_files() {
    let source = TempDir::new().unwrap();
    for i in 0..5 {
        fs::write(source.path().join(format!("page{}.html", i)), b"<p/>").unwrap();
    }
    fs::write(source.path().join("style.css"), b"p {}").unwrap();
    let target = TempDir::new().unwrap();

    let copied =
        copy_report_directory(source.path(), "**/*.html", target.path(), 2, 30).unwrap();

    assert_eq!(copied, 5);
    assert!(!target.path().join("style.css").exists());
}

#[test]
fn test_registry_empty_after_every_outcome() {
    let source = create_test_filesystem();
    let node = LocalNode::new();
    let shared: Arc<dyn SourceNode> = Arc::new(node.clone());
    let copier = ReportCopier::new(shared.clone(), 2).unwrap();

    // Success
    let target = TempDir::new().unwrap();
    copier
        .copy(&request(source.path(), target.path(), 2, ScanPattern::all()))
        .unwrap();
    assert!(node.registry().is_empty());

    // Scan failure
    let missing = source.path().join("does-not-exist");
    let err = copier
        .copy(&request(&missing, target.path(), 2, ScanPattern::all()))
        .unwrap_err();
    assert!(matches!(err, TransferError::Scan { .. }));
    assert!(node.registry().is_empty());

    // Timeout while the only pool thread is busy
    let pool = WorkerPool::new(1).unwrap();
    let (release, blocked) = crossbeam::channel::bounded::<()>(0);
    let blocker = pool.submit(move |_| {
        let _ = blocked.recv();
    });
    let mut timed = request(source.path(), target.path(), 1, ScanPattern::all());
    timed.timeout = Duration::ZERO;
    let err = reportcopy::MultithreadedFileCopyHelper::new(shared)
        .copy_recursive_to(&timed, &pool)
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(node.registry().is_empty());

    drop(release);
    blocker.wait(Duration::from_secs(10)).unwrap();
}

#[test]
fn test_fanout_matches_queued_copy() {
    let source = create_test_filesystem();
    let queued = TempDir::new().unwrap();
    let fanned = TempDir::new().unwrap();

    let a = copy_report_directory(source.path(), "", queued.path(), 4, 30).unwrap();
    let b = copy_fanout(source.path(), &ScanPattern::all(), fanned.path(), 4).unwrap();

    assert_eq!(a, b);
    assert_same_tree(fanned.path());
}

#[test]
fn test_second_copy_overwrites() {
    let source = create_test_filesystem();
    let target = TempDir::new().unwrap();

    copy_report_directory(source.path(), "", target.path(), 2, 30).unwrap();
    fs::write(source.path().join("file1.txt"), b"updated").unwrap();
    copy_report_directory(source.path(), "", target.path(), 2, 30).unwrap();

    assert_eq!(fs::read(target.path().join("file1.txt")).unwrap(), b"updated");
    // No temporary files left behind
    let leftovers: Vec<_> = fs::read_dir(target.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
        .collect();
    assert!(leftovers.is_empty());
}

#[cfg(unix)]
#[test]
fn test_non_utf8_names_are_not_merged() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let source = TempDir::new().unwrap();
    let first = OsStr::from_bytes(b"a\xff.html");
    let second = OsStr::from_bytes(b"a\xfe.html");
    fs::write(source.path().join(first), b"one").unwrap();
    fs::write(source.path().join(second), b"two").unwrap();

    let local = TempDir::new().unwrap();
    let copied = copy_report_directory(source.path(), "", local.path(), 2, 10).unwrap();
    assert_eq!(copied, 2);
    assert_eq!(fs::read(local.path().join(first)).unwrap(), b"one");
    assert_eq!(fs::read(local.path().join(second)).unwrap(), b"two");

    let remote_target = TempDir::new().unwrap();
    let (remote, agent) = NodeAgent::spawn(LocalNode::new()).unwrap();
    {
        let copier = ReportCopier::new(Arc::new(remote), 2).unwrap();
        let copied = copier
            .copy(&request(source.path(), remote_target.path(), 2, ScanPattern::all()))
            .unwrap();
        assert_eq!(copied, 2);
    }
    agent.join();
    assert_eq!(fs::read(remote_target.path().join(first)).unwrap(), b"one");
    assert_eq!(fs::read(remote_target.path().join(second)).unwrap(), b"two");
}

#[test]
fn test_agent_timeout_leaves_registry_empty() {
    let source = create_test_filesystem();
    let target = TempDir::new().unwrap();
    let node = LocalNode::new();
    let (remote, _agent) = NodeAgent::spawn(node.clone()).unwrap();

    // The only pool thread is busy, so no worker ever reports back
    let pool = WorkerPool::new(1).unwrap();
    let (release, blocked) = crossbeam::channel::bounded::<()>(0);
    let blocker = pool.submit(move |_| {
        let _ = blocked.recv();
    });

    let mut timed = request(source.path(), target.path(), 1, ScanPattern::all());
    timed.timeout = Duration::ZERO;
    let err = reportcopy::MultithreadedFileCopyHelper::new(Arc::new(remote))
        .copy_recursive_to(&timed, &pool)
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(node.registry().is_empty());

    drop(release);
    blocker.wait(Duration::from_secs(10)).unwrap();
}

#[test]
fn test_agent_copy_failure_leaves_registry_empty() {
    let source = create_test_filesystem();
    let target = TempDir::new().unwrap();
    // A non-empty directory where file1.txt has to go
    fs::create_dir_all(target.path().join("file1.txt/keep")).unwrap();

    let node = LocalNode::new();
    let (remote, _agent) = NodeAgent::spawn(node.clone()).unwrap();
    let pool = WorkerPool::new(2).unwrap();

    let err = reportcopy::MultithreadedFileCopyHelper::new(Arc::new(remote))
        .copy_recursive_to(&request(source.path(), target.path(), 2, ScanPattern::all()), &pool)
        .unwrap_err();

    assert!(matches!(err, TransferError::Copy { .. }));
    assert!(node.registry().is_empty());
}
