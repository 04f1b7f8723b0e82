use std::error::Error;
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cli() -> Command {
    Command::cargo_bin("geotree-cli").unwrap()
}

fn stdout_line(output: &[u8]) -> String {
    String::from_utf8_lossy(output).trim().to_string()
}

fn add(file: &Path, parent: &str, node_type: &str, name: &str) -> String {
    let output = cli()
        .args([
            "add",
            file.to_str().unwrap(),
            "--parent",
            parent,
            "--type",
            node_type,
            "--name",
            name,
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    stdout_line(&output.stdout)
}

#[test]
fn build_inspect_and_prune_a_project() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let file = dir.path().join("site.json");
    let path = file.to_str().unwrap();

    cli()
        .args(["new", path, "--name", "Site"])
        .assert()
        .success();

    let scans = add(&file, "root", "Folder", "Scans");
    let scan = add(&file, &scans, "UDS", "Scan1");
    add(&file, "root", "POI", "Gate");

    cli()
        .args(["show", path])
        .assert()
        .success()
        .stdout(predicate::str::contains("Site [Folder]"))
        .stdout(predicate::str::contains("    Scan1 [UDS]"))
        .stdout(predicate::str::contains("  Gate [POI]"));

    cli()
        .args(["remove", path, &scans])
        .assert()
        .success();

    cli()
        .args(["show", path])
        .assert()
        .success()
        .stdout(predicate::str::contains("Scan1").not())
        .stdout(predicate::str::contains(scan.as_str()).not());

    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&file)?)?;
    assert_eq!(value["features"].as_array().map(Vec::len), Some(1));
    assert_eq!(value["features"][0]["properties"]["name"], "Gate");
    Ok(())
}

#[test]
fn move_and_metadata_round_trip_through_the_file() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let file = dir.path().join("site.json");
    let path = file.to_str().unwrap();

    cli().args(["new", path]).assert().success();
    let first = add(&file, "root", "Media", "First");
    let second = add(&file, "root", "Media", "Second");

    cli()
        .args(["move", path, &second, "--to", "root", "--before", &first])
        .assert()
        .success();
    cli()
        .args(["meta", path, &second, "frames", "240", "--kind", "uint32"])
        .assert()
        .success();
    cli()
        .args(["meta", path, &second, "frames"])
        .assert()
        .success()
        .stdout(predicate::str::contains("240 (uint32)"));

    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&file)?)?;
    assert_eq!(value["features"][0]["properties"]["name"], "Second");
    assert_eq!(
        value["features"][0]["properties"]["metadata"]["frames"]["uint32"],
        240
    );
    Ok(())
}

#[test]
fn rejected_edits_leave_the_file_untouched() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let file = dir.path().join("site.json");
    let path = file.to_str().unwrap();

    cli().args(["new", path]).assert().success();
    let folder = add(&file, "root", "Folder", "Outer");
    let inner = add(&file, &folder, "Folder", "Inner");
    let before = fs::read_to_string(&file)?;

    cli()
        .args(["move", path, &folder, "--to", &inner])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cycle"));
    cli()
        .args(["remove", path, "root"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("root node cannot be removed"));
    cli()
        .args(["geometry", path, &inner, "--type", "point", "--coords", "1,2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("do not fit a Point geometry"));

    assert_eq!(fs::read_to_string(&file)?, before);
    Ok(())
}

#[test]
fn new_refuses_to_overwrite_without_force() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let file = dir.path().join("site.json");
    let path = file.to_str().unwrap();

    cli().args(["new", path]).assert().success();
    cli()
        .args(["new", path])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    cli().args(["new", path, "--force"]).assert().success();
    Ok(())
}

#[test]
fn fmt_honours_config_and_depth_limit() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let source = dir.path().join("deep.json");
    let compact = dir.path().join("compact.json");
    let config = dir.path().join("codec.json");
    fs::write(
        &source,
        r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"itemtype":"Folder","name":"a"},"children":[
                {"type":"Feature","properties":{"itemtype":"Folder","name":"b"}}
            ]}
        ]}"#,
    )?;
    fs::write(&config, r#"{"pretty": false}"#)?;

    cli()
        .args([
            "--config",
            config.to_str().unwrap(),
            "fmt",
            source.to_str().unwrap(),
            "--output",
            compact.to_str().unwrap(),
        ])
        .assert()
        .success();
    let text = fs::read_to_string(&compact)?;
    assert!(!text.contains('\n'));
    assert!(text.contains("\"name\":\"b\""));

    fs::write(&config, r#"{"max_depth": 1}"#)?;
    cli()
        .args([
            "--config",
            config.to_str().unwrap(),
            "show",
            source.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("depth limit of 1"));
    Ok(())
}

#[test]
fn add_past_the_depth_limit_leaves_the_file_loadable() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let file = dir.path().join("site.json");
    let path = file.to_str().unwrap();
    let config = dir.path().join("codec.json");
    fs::write(&config, r#"{"max_depth": 1}"#)?;
    let config = config.to_str().unwrap();

    cli().args(["--config", config, "new", path]).assert().success();
    let output = cli()
        .args([
            "--config", config, "add", path, "--type", "Folder", "--name", "Outer",
        ])
        .output()?;
    assert!(output.status.success(), "{output:?}");
    let outer = stdout_line(&output.stdout);
    let before = fs::read_to_string(&file)?;

    cli()
        .args([
            "--config", config, "add", path, "--parent", &outer, "--type", "Folder", "--name",
            "Inner",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("depth limit of 1"));
    cli()
        .args(["add", path, "--type", "Holograph", "--name", "Wide"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid node type tag"));

    assert_eq!(fs::read_to_string(&file)?, before);
    cli()
        .args(["--config", config, "show", path])
        .assert()
        .success()
        .stdout(predicate::str::contains("  Outer [Folder]"));
    Ok(())
}
