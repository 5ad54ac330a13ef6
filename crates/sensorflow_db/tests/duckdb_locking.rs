//! Cross-process writer lock behavior.
//!
//! The test binary re-executes itself as a child process that holds the
//! store open, then checks what a second writer and a reader observe.

use sensorflow_db::{read_lock_owner, BackendError, DbConnection};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

const ROLE_ENV: &str = "SENSORFLOW_DB_LOCK_ROLE";
const DB_ENV: &str = "SENSORFLOW_DB_LOCK_DB";
const READY_ENV: &str = "SENSORFLOW_DB_LOCK_READY";
const RELEASE_ENV: &str = "SENSORFLOW_DB_LOCK_RELEASE";

fn maybe_run_child() {
    let role = match env::var(ROLE_ENV) {
        Ok(role) => role,
        Err(_) => return,
    };

    let db_path = PathBuf::from(env::var(DB_ENV).expect("child missing DB path"));
    match role.as_str() {
        "hold" => {
            let conn = DbConnection::open_duckdb(&db_path)
                .expect("child failed to open DB with exclusive lock");
            conn.execute_batch("CREATE TABLE IF NOT EXISTS t (id BIGINT)")
                .expect("child failed to create table");
            if let Ok(ready_path) = env::var(READY_ENV) {
                fs::write(ready_path, "ready").expect("child failed to write ready file");
            }
            let release_path =
                PathBuf::from(env::var(RELEASE_ENV).expect("child missing release path"));
            let start = Instant::now();
            while !release_path.exists() {
                if start.elapsed() > Duration::from_secs(20) {
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
            std::process::exit(0);
        }
        "rw" => match DbConnection::open_duckdb(&db_path) {
            Ok(_) => std::process::exit(0),
            Err(BackendError::Locked(_)) => std::process::exit(2),
            Err(err) => {
                eprintln!("Unexpected error: {err}");
                std::process::exit(3);
            }
        },
        other => {
            eprintln!("Unknown role: {other}");
            std::process::exit(4);
        }
    }
}

fn wait_for_file(path: &Path, timeout: Duration, child: &mut Child) {
    let start = Instant::now();
    while !path.exists() {
        if let Some(status) = child.try_wait().expect("failed to poll child") {
            panic!("lock holder exited early: {status}");
        }
        if start.elapsed() > timeout {
            panic!("timed out waiting for {}", path.display());
        }
        thread::sleep(Duration::from_millis(50));
    }
}

fn wait_for_exit(child: &mut Child, timeout: Duration) {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("failed to poll child") {
            assert!(status.success(), "lock holder exited with failure: {status}");
            break;
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            panic!("timed out waiting for lock holder to exit");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn second_writer_is_refused_while_store_is_held() {
    maybe_run_child();

    let temp_dir = tempfile::TempDir::new().expect("tempdir");
    let db_path = temp_dir.path().join("sensor.duckdb");
    let ready_path = temp_dir.path().join("ready");
    let release_path = temp_dir.path().join("release");

    let exe = env::current_exe().expect("test executable");
    let test_args = [
        "--exact",
        "second_writer_is_refused_while_store_is_held",
        "--nocapture",
    ];

    let mut holder = Command::new(&exe)
        .args(test_args)
        .env(ROLE_ENV, "hold")
        .env(DB_ENV, &db_path)
        .env(READY_ENV, &ready_path)
        .env(RELEASE_ENV, &release_path)
        .spawn()
        .expect("failed to spawn lock holder");

    wait_for_file(&ready_path, Duration::from_secs(10), &mut holder);

    let owner = read_lock_owner(&db_path).expect("holder wrote a lock sidecar");
    assert_eq!(owner.pid, holder.id());

    let rw_output = Command::new(&exe)
        .args(test_args)
        .env(ROLE_ENV, "rw")
        .env(DB_ENV, &db_path)
        .output()
        .expect("failed to spawn rw checker");
    assert_eq!(
        rw_output.status.code(),
        Some(2),
        "expected RW open to fail with Locked; stdout: {} stderr: {}",
        String::from_utf8_lossy(&rw_output.stdout),
        String::from_utf8_lossy(&rw_output.stderr)
    );

    fs::write(&release_path, "release").expect("failed to release lock holder");
    wait_for_exit(&mut holder, Duration::from_secs(10));

    // Lock is free again once the holder exits.
    let conn = DbConnection::open_duckdb(&db_path).expect("reopen after release");
    let count: i64 = conn
        .query_scalar("SELECT COUNT(*) FROM t", &[])
        .expect("table created by holder");
    assert_eq!(count, 0);
}
