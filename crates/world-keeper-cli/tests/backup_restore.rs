use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::tempdir;

fn write_config(root: &Path, keep: usize) -> PathBuf {
    let worlds = root.join("worlds");
    let staging = root.join("staging");
    let store = root.join("store");

    let config_path = root.join("config.toml");
    let contents = format!(
        "[server]\ncandidates = [\"{}\"]\n\n[paths]\nworlds = \"{}\"\nstaging = \"{}\"\n\n[store]\nbackend = \"local\"\nkeep = {keep}\nlocal_root = \"{}\"\n",
        root.join("bedrock_server").display(),
        worlds.display(),
        staging.display(),
        store.display()
    );
    fs::write(&config_path, contents).unwrap();
    config_path
}

fn write_world(root: &Path) {
    let world = root.join("worlds/MyWorld");
    fs::create_dir_all(world.join("db")).unwrap();
    fs::write(world.join("level.dat"), [9u8; 10]).unwrap();
    fs::write(world.join("db/000001.ldb"), [8u8; 100]).unwrap();
}

fn run(config_path: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_world-keeper"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("PORT")
        .env_remove("HEROKU_APP_NAME")
        .output()
        .unwrap()
}

fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn backup_list_inspect_restore() {
    let tmp = tempdir().unwrap();
    let config_path = write_config(tmp.path(), 5);
    write_world(tmp.path());

    let output = run(&config_path, &["backup"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout_lines(&output)[0].starts_with("Backup stored: "));

    let output = run(&config_path, &["list"]);
    assert!(output.status.success());
    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 1);
    let fields: Vec<&str> = lines[0].split('\t').collect();
    let id = fields[0].to_string();
    assert!(fields[1].starts_with("world_backup_"));
    assert!(fields[1].ends_with(".zip"));

    let output = run(&config_path, &["inspect", &id]);
    assert!(output.status.success());
    let mut entries = stdout_lines(&output);
    entries.sort();
    assert_eq!(
        entries,
        vec!["MyWorld/db/000001.ldb\t100", "MyWorld/level.dat\t10"]
    );

    let worlds = tmp.path().join("worlds");
    fs::create_dir_all(worlds.join("OldWorld")).unwrap();
    fs::write(worlds.join("OldWorld/x.dat"), b"stale").unwrap();

    let output = run(&config_path, &["restore", &id]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(!worlds.join("OldWorld").exists());
    assert_eq!(fs::read(worlds.join("MyWorld/level.dat")).unwrap(), vec![9u8; 10]);
    assert_eq!(fs::read(worlds.join("MyWorld/db/000001.ldb")).unwrap(), vec![8u8; 100]);
}

#[test]
fn retention_keeps_newest_backups() {
    let tmp = tempdir().unwrap();
    let config_path = write_config(tmp.path(), 2);
    write_world(tmp.path());

    let mut stored = Vec::new();
    for _ in 0..3 {
        let output = run(&config_path, &["backup"]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let line = stdout_lines(&output)[0].clone();
        let id = line
            .trim_start_matches("Backup stored: ")
            .split(' ')
            .next()
            .unwrap()
            .to_string();
        stored.push(id);
    }

    let output = run(&config_path, &["list"]);
    let listed: Vec<String> = stdout_lines(&output)
        .iter()
        .map(|l| l.split('\t').next().unwrap().to_string())
        .collect();
    assert_eq!(listed, vec![stored[2].clone(), stored[1].clone()]);
}

#[test]
fn restore_of_unknown_backup_fails() {
    let tmp = tempdir().unwrap();
    let config_path = write_config(tmp.path(), 5);
    write_world(tmp.path());

    let output = run(&config_path, &["restore", "00000000000000000001_missing.zip"]);
    assert!(!output.status.success());
    assert!(tmp.path().join("worlds/MyWorld/level.dat").exists());
}

#[test]
fn locate_reports_missing_server() {
    let tmp = tempdir().unwrap();
    let config_path = write_config(tmp.path(), 5);

    let output = run(&config_path, &["locate"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bedrock_server"));
}
