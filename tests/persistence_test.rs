use assert_cmd::cargo_bin;
use std::process::Command;
use tempfile::tempdir;

mod common;

#[test]
fn test_file_store_persistence_recovery() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join("machine");

    // 1. First run: deposit and pick a product, then stop mid-interaction
    let session1 = common::session(&[("deposit", "", "100"), ("select", "A", "")]).unwrap();

    let mut cmd1 = Command::new(cargo_bin!());
    cmd1.arg(session1.path())
        .arg("--catalog")
        .arg("tests/fixtures/catalog.csv")
        .arg("--data-dir")
        .arg(&data_dir);

    let output1 = cmd1.output().expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("interacting,100,A"));
    assert!(data_dir.join("events.jsonl").exists());

    // 2. Second run: top up and buy using the recovered escrow and selection
    let session2 = common::session(&[("deposit", "", "25"), ("pay", "", ""), ("finish", "", "")])
        .unwrap();

    let mut cmd2 = Command::new(cargo_bin!());
    cmd2.arg(session2.path())
        .arg("--catalog")
        .arg("tests/fixtures/catalog.csv")
        .arg("--data-dir")
        .arg(&data_dir);

    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains("idle,0,"));
    assert!(stdout2.contains("A,4,1,125"));

    // 3. Third run: nothing to do, the sale is still on record
    let session3 = common::session(&[]).unwrap();
    let mut cmd3 = Command::new(cargo_bin!());
    cmd3.arg(session3.path())
        .arg("--catalog")
        .arg("tests/fixtures/catalog.csv")
        .arg("--data-dir")
        .arg(&data_dir);

    let output3 = cmd3.output().expect("Failed to execute command");
    assert!(output3.status.success());
    assert!(String::from_utf8_lossy(&output3.stdout).contains("A,4,1,125"));
}

#[test]
fn test_snapshot_threshold_from_config() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join("machine");
    let config = dir.path().join("config.json");
    common::write_config(&config, r#"{"snapshot_threshold": 2}"#).unwrap();

    let session = common::session(&[
        ("deposit", "", "100"),
        ("deposit", "", "100"),
        ("deposit", "", "100"),
        ("deposit", "", "100"),
    ])
    .unwrap();

    for _ in 0..2 {
        let mut cmd = Command::new(cargo_bin!());
        cmd.arg(session.path())
            .arg("--catalog")
            .arg("tests/fixtures/catalog.csv")
            .arg("--data-dir")
            .arg(&data_dir)
            .arg("--config")
            .arg(&config);
        let output = cmd.output().expect("Failed to execute command");
        assert!(output.status.success());
    }

    assert!(data_dir.join("snapshot.json").exists());

    let empty = common::session(&[]).unwrap();
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg(empty.path())
        .arg("--catalog")
        .arg("tests/fixtures/catalog.csv")
        .arg("--data-dir")
        .arg(&data_dir);
    let output = cmd.output().expect("Failed to execute command");
    assert!(String::from_utf8_lossy(&output.stdout).contains("idle,800,"));
}
