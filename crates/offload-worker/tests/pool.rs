//! Pool tests against the real worker binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use offload_core::{
    Error, ErrorKind, Executor, ExecutorConfig, PoolConfig, PoolStats, Task, WorkerPool,
};
use serde_json::json;
use tempfile::TempDir;

fn pool_config(min_workers: usize, max_workers: usize) -> PoolConfig {
    PoolConfig {
        min_workers,
        max_workers,
        worker_binary: Some(PathBuf::from(env!("CARGO_BIN_EXE_offload-worker"))),
        ..PoolConfig::default()
    }
}

fn executor(scratch: &TempDir, max_workers: usize) -> Executor {
    Executor::new(ExecutorConfig {
        pool: pool_config(0, max_workers),
        scratch_dir: scratch.path().join("tmp"),
        esbuild_path: None,
    })
    .unwrap()
}

const SPIN: &str = r#"
function spin(ms, id) {
  const end = Date.now() + ms;
  while (Date.now() < end) {}
  return id;
}
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_is_bounded() {
    let pool = Arc::new(WorkerPool::start(pool_config(0, 4)).await.unwrap());

    let mut handles = Vec::new();
    for id in 0..10 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.submit(Task::injected_sync(SPIN, "spin", vec![json!(150), json!(id)], vec![]))
                .await
        }));
    }

    let mut max_busy = 0;
    let mut saw_pending = false;
    while !handles.iter().all(|h| h.is_finished()) {
        let stats = pool.stats();
        assert!(stats.busy_workers <= 4, "{:?}", stats);
        assert!(stats.total_workers <= 4, "{:?}", stats);
        max_busy = max_busy.max(stats.busy_workers);
        saw_pending |= stats.pending_tasks > 0;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut ids = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert!(result.success, "{:?}", result.error_message);
        ids.push(result.value.unwrap().as_u64().unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, (0..10).collect::<Vec<u64>>());
    assert!(max_busy >= 1);
    assert!(saw_pending);

    let stats = pool.stats();
    assert_eq!(stats.busy_workers, 0);
    assert_eq!(stats.pending_tasks, 0);
    assert!(stats.idle_workers <= 4);

    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_prestarted_workers_and_stats() {
    let pool = WorkerPool::start(pool_config(2, 3)).await.unwrap();

    let first = pool.stats();
    let second = pool.stats();
    assert_eq!(first, second);
    assert_eq!(
        first,
        PoolStats {
            total_workers: 2,
            busy_workers: 0,
            idle_workers: 2,
            pending_tasks: 0,
        }
    );

    pool.shutdown().await;
    assert_eq!(pool.stats().total_workers, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_reused_after_failure() {
    let scratch = TempDir::new().unwrap();
    let executor = executor(&scratch, 1);

    let failed = executor
        .execute_function("function broken( {", "broken", vec![], vec![], false)
        .await
        .unwrap();
    assert!(!failed.success);
    assert_eq!(failed.error_kind, Some(ErrorKind::Compile));

    let thrown = executor
        .execute_function("function fail() { throw new Error('nope') }", "fail", vec![], vec![], false)
        .await
        .unwrap();
    assert_eq!(thrown.error_kind, Some(ErrorKind::Runtime));
    assert_eq!(thrown.error_message.as_deref(), Some("nope"));

    let ok = executor
        .execute_function("function add(a, b) { return a + b }", "add", vec![json!(2), json!(3)], vec![], false)
        .await
        .unwrap();
    assert!(ok.success);
    assert_eq!(ok.value, Some(json!(5)));
    assert_eq!(ok.worker_pid, failed.worker_pid);
    assert_eq!(executor.stats().total_workers, 1);

    executor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unresolved_dependency() {
    let scratch = TempDir::new().unwrap();
    let executor = executor(&scratch, 1);

    let result = executor
        .execute_function(
            "function check(lib) { return lib === null }",
            "check",
            vec![],
            vec!["no-such-package".to_string()],
            false,
        )
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.value, Some(json!(true)));
    assert_eq!(result.dependencies_loaded, Some(vec!["no-such-package".to_string()]));

    executor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dependency_from_module_path() {
    let modules = TempDir::new().unwrap();
    std::fs::write(
        modules.path().join("shout.js"),
        "module.exports = (s) => s.toUpperCase() + '!';",
    )
    .unwrap();

    let mut config = pool_config(0, 1);
    config.module_paths = vec![modules.path().to_path_buf()];
    let pool = WorkerPool::start(config).await.unwrap();

    let result = pool
        .submit(Task::injected(
            "function greet(shout, name) { return shout(`hi ${name}`) }",
            "greet",
            vec![json!("there")],
            vec!["shout".to_string()],
        ))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.value, Some(json!("HI THERE!")));

    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bundle_tasks() {
    let pool = WorkerPool::start(pool_config(0, 1)).await.unwrap();
    let code = "let n = 0;\nmodule.exports = { f: () => ++n, g: () => ++n };";

    let f = pool.submit(Task::bundle(code, "f", vec![])).await.unwrap();
    let g = pool.submit(Task::bundle(code, "g", vec![])).await.unwrap();
    assert_eq!(f.value, Some(json!(1)));
    assert_eq!(g.value, Some(json!(1)));
    assert_eq!(f.worker_pid, g.worker_pid);
    assert_eq!(g.bundle_size_bytes, Some(code.len() as u64));

    let missing = pool.submit(Task::bundle(code, "h", vec![])).await.unwrap();
    assert!(!missing.success);
    assert_eq!(missing.error_kind, Some(ErrorKind::ExportNotFound));
    let message = missing.error_message.unwrap();
    assert!(message.contains("Function 'h' not found"));
    assert!(message.contains("f, g"));

    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_console_output_does_not_corrupt_channel() {
    let pool = WorkerPool::start(pool_config(0, 1)).await.unwrap();

    let source = r#"
function noisy(n) {
  for (let i = 0; i < n; i++) console.log("line", i);
  return n;
}
"#;
    let result = pool
        .submit(Task::injected(source, "noisy", vec![json!(100)], vec![]))
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.value, Some(json!(100)));

    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_and_recreate() {
    let scratch = TempDir::new().unwrap();
    let executor = executor(&scratch, 2);

    let before = executor
        .execute_function("function one() { return 1 }", "one", vec![], vec![], true)
        .await
        .unwrap();
    assert!(before.success);
    assert_eq!(executor.stats().total_workers, 1);

    executor.shutdown().await;
    assert_eq!(executor.stats(), PoolStats::default());

    let after = executor
        .execute_function("function two() { return 2 }", "two", vec![], vec![], true)
        .await
        .unwrap();
    assert_eq!(after.value, Some(json!(2)));
    assert_ne!(after.worker_pid, before.worker_pid);

    executor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_kills_busy_worker() {
    let pool = Arc::new(WorkerPool::start(pool_config(0, 1)).await.unwrap());

    let running = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.submit(Task::injected_sync(SPIN, "spin", vec![json!(30_000), json!(0)], vec![]))
                .await
        })
    };

    while pool.stats().busy_workers == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pool.shutdown().await;

    let outcome = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("in-flight task should end when its worker is killed")
        .unwrap();
    assert!(matches!(outcome, Err(Error::WorkerLost { .. })), "{:?}", outcome);

    let rejected = pool.submit(Task::injected(SPIN, "spin", vec![json!(0), json!(1)], vec![])).await;
    assert!(matches!(rejected, Err(Error::PoolClosed)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_idle_workers_are_retired() {
    let mut config = pool_config(0, 2);
    config.idle_timeout = Some(Duration::from_millis(200));
    let pool = WorkerPool::start(config).await.unwrap();

    let result = pool
        .submit(Task::injected("function id(x) { return x }", "id", vec![json!("x")], vec![]))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(pool.stats().idle_workers, 1);

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(pool.stats().total_workers, 0);

    pool.shutdown().await;
}

#[cfg(unix)]
fn kill_process(pid: u32) {
    // SAFETY: signal delivery to a worker this test started
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_dead_idle_worker_is_replaced() {
    let pool = WorkerPool::start(pool_config(0, 1)).await.unwrap();
    let task = || Task::injected("function id(x) { return x }", "id", vec![json!(7)], vec![]);

    let first = pool.submit(task()).await.unwrap();
    let first_pid = first.worker_pid.unwrap();
    assert_eq!(pool.stats().idle_workers, 1);

    kill_process(first_pid);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = pool.submit(task()).await.unwrap();
    assert!(second.success, "{:?}", second.error_message);
    assert_eq!(second.value, Some(json!(7)));
    assert_ne!(second.worker_pid, Some(first_pid));
    assert_eq!(pool.stats().total_workers, 1);

    pool.shutdown().await;
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_min_workers_restored_after_crash() {
    let pool = WorkerPool::start(pool_config(1, 2)).await.unwrap();
    let pid_of = |result: offload_core::ExecutionResult| result.worker_pid.unwrap();

    let task = || Task::injected("function one() { return 1 }", "one", vec![], vec![]);
    let killed = pid_of(pool.submit(task()).await.unwrap());
    kill_process(killed);

    // Maintenance runs every second without an idle timeout
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let stats = pool.stats();
    assert_eq!(stats.total_workers, 1, "{:?}", stats);
    assert_eq!(stats.idle_workers, 1, "{:?}", stats);

    let next = pid_of(pool.submit(task()).await.unwrap());
    assert_ne!(next, killed);

    pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "Requires esbuild binary"]
async fn test_execute_inline_entry() {
    let scratch = TempDir::new().unwrap();
    let executor = executor(&scratch, 1);

    let source = r#"
export function area(w, h) { return w * h; }
export const unit = "m2";
"#;
    let result = executor
        .execute_entry(
            offload_core::EntrySource::Inline(source.to_string()),
            "area",
            vec![json!(3), json!(4)],
            Default::default(),
        )
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.value, Some(json!(12)));
    assert_eq!(result.target_name.as_deref(), Some("area"));

    let leftovers = std::fs::read_dir(scratch.path().join("tmp")).unwrap().count();
    assert_eq!(leftovers, 0);

    executor.shutdown().await;
}
