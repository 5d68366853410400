use std::fs;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            cmd.env_remove("PICATALOG_ROOT").env_remove("PICATALOG_SHARE");
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

#[fixture]
fn conf_dir() -> assert_fs::TempDir {
    let conf_dir = assert_fs::TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("picatalog").unwrap();
    cmd.env_remove("PICATALOG_ROOT").env_remove("PICATALOG_SHARE");
    cmd.arg("-c").arg(conf_dir.path()).arg("import").arg("tests/dataset");
    cmd.assert().success();
    conf_dir
}

#[rstest]
fn import_and_count(conf_dir: assert_fs::TempDir) -> Result<()> {
    cargo_run!("picatalog", "-c", conf_dir.path(), "info")
        .success()
        .stdout(predicate::str::contains("records: 4"));
    Ok(())
}

#[rstest]
#[case::date_asc(&["-i", "date"], "(?s)b\\.jpg.*c\\.jpg.*a\\.jpg")]
#[case::date_desc(&["-i", "date", "-d", "descending"], "(?s)a\\.jpg.*c\\.jpg.*b\\.jpg")]
#[case::size_asc(&["-i", "size"], "(?s)a\\.jpg.*c\\.jpg.*b\\.jpg")]
#[case::name_desc(&["-i", "name", "-d", "descending"], "(?s)c\\.jpg.*b\\.jpg.*a\\.jpg")]
fn query_order(conf_dir: assert_fs::TempDir, #[case] args: &[&str], #[case] order: &str) -> Result<()> {
    let mut cmd = Command::cargo_bin("picatalog")?;
    cmd.env_remove("PICATALOG_ROOT").env_remove("PICATALOG_SHARE");
    cmd.arg("-c").arg(conf_dir.path()).args(["-r", "/photos/", "query"]).args(args);
    cmd.assert()
        .success()
        .stdout(predicate::str::is_match(order)?)
        .stdout(predicate::str::contains("/other/").not());
    Ok(())
}

#[rstest]
fn query_page_and_tag(conf_dir: assert_fs::TempDir) -> Result<()> {
    cargo_run!("picatalog", "-c", conf_dir.path(), "-r", "/photos/", "query", "--start", "2", "--end", "3")
        .success()
        .stdout(predicate::str::contains("c.jpg").and(predicate::str::contains("a.jpg")))
        .stdout(predicate::str::contains("b.jpg").not());

    cargo_run!("picatalog", "-c", conf_dir.path(), "-r", "/", "query", "-t", "category=cat", "--output-format", "json")
        .success()
        .stdout(predicate::str::contains("/other/d.jpg"))
        .stdout(predicate::str::contains("/photos/c.jpg"))
        .stdout(predicate::str::contains("/photos/b.jpg").not());
    Ok(())
}

#[rstest]
fn query_metrics(conf_dir: assert_fs::TempDir) -> Result<()> {
    cargo_run!("picatalog", "-c", conf_dir.path(), "-r", "/photos/", "query", "--metrics")
        .success()
        .stdout(predicate::str::contains("a.jpg"))
        .stderr(predicate::str::contains("picatalog_query_rows"))
        .stderr(predicate::str::contains("index=\"date\""));
    Ok(())
}

#[rstest]
fn query_without_root(conf_dir: assert_fs::TempDir) -> Result<()> {
    cargo_run!("picatalog", "-c", conf_dir.path(), "query").success().stdout(predicate::str::is_empty());
    Ok(())
}

#[rstest]
fn thumbnail_and_person(conf_dir: assert_fs::TempDir) -> Result<()> {
    let output = conf_dir.path().join("a.png");
    cargo_run!("picatalog", "-c", conf_dir.path(), "thumbnail", "/photos/a.jpg", "-o", &output).success();
    assert_eq!(fs::read(&output)?, b"\x89PNG\r\n\x1a\n");

    cargo_run!("picatalog", "-c", conf_dir.path(), "thumbnail", "/photos/b.jpg").failure();

    cargo_run!("picatalog", "-c", conf_dir.path(), "person", "/photos/c.jpg")
        .success()
        .stdout(predicate::str::contains("bob").and(predicate::str::contains("carol")));
    cargo_run!("picatalog", "-c", conf_dir.path(), "person", "/photos/a.jpg")
        .success()
        .stdout(predicate::str::contains("alice"));
    Ok(())
}

#[rstest]
fn reset_requires_confirm(conf_dir: assert_fs::TempDir) -> Result<()> {
    cargo_run!("picatalog", "-c", conf_dir.path(), "reset").failure();
    cargo_run!("picatalog", "-c", conf_dir.path(), "info")
        .success()
        .stdout(predicate::str::contains("records: 4"));

    cargo_run!("picatalog", "-c", conf_dir.path(), "reset", "--yes").success();
    cargo_run!("picatalog", "-c", conf_dir.path(), "info")
        .success()
        .stdout(predicate::str::contains("records: 0"));
    Ok(())
}

#[rstest]
fn repair_is_clean_after_import(conf_dir: assert_fs::TempDir) -> Result<()> {
    cargo_run!("picatalog", "-c", conf_dir.path(), "repair")
        .success()
        .stdout(predicate::str::contains("removed orphans: 0"));
    Ok(())
}

#[test]
fn selftest() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    cargo_run!("picatalog", "-c", conf_dir.path(), "-r", "/photos/", "selftest", "tests/dataset/part1.json")
        .success()
        .stdout(predicate::str::contains("ok"));
    Ok(())
}
