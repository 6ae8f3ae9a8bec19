// End-to-end tests of the chainstore binary
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const FRAGMENTS: &str = "\
# chain 1: two fragments, chain 2: one reverse fragment
1\tctg1\t100\t200\tchrX\t1000\t1100\t1e-30\t90\t99
1\tctg1\t300\t400\tchrX\t1200\t1300\t1e-20\t60\t97
2\tctg1\t350\t150\tchrY\t5000\t4800\t0.001\t20\t88
3\tctg2\t1\t50\tchrX\t1\t50\t0.5\t5\t80
";

fn chainstore() -> Command {
    Command::cargo_bin("chainstore").unwrap()
}

fn loaded_store(temp: &TempDir) -> anyhow::Result<std::path::PathBuf> {
    let input = temp.path().join("fragments.tsv");
    fs::write(&input, FRAGMENTS)?;
    let store = temp.path().join("store.tsv");
    chainstore()
        .arg("-s")
        .arg(&store)
        .arg("load")
        .arg(&input)
        .assert()
        .success();
    Ok(store)
}

fn store_lines(store: &Path) -> anyhow::Result<usize> {
    Ok(fs::read_to_string(store)?.lines().count())
}

#[test]
fn test_load_and_query() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let store = loaded_store(&temp)?;
    assert_eq!(store_lines(&store)?, 4);

    chainstore()
        .arg("-s")
        .arg(&store)
        .args(["query", "ctg1", "210", "290"])
        .assert()
        .success()
        .stdout("2\tctg1\t350\t150\tchrY\t5000\t4800\t0.001\t20\t88\n");

    chainstore()
        .arg("-s")
        .arg(&store)
        .arg("--no-index")
        .args(["query", "ctg1", "210", "290"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("2\tctg1"));
    Ok(())
}

#[test]
fn test_bad_input_leaves_store_untouched() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let store = loaded_store(&temp)?;
    let bad = temp.path().join("bad.tsv");
    fs::write(&bad, "9\tctg1\t1\t10\tchrX\t1\t10\t0.1\t5\t90\n9\tctg1\tten\t20\tchrX\t1\t10\t0.1\t5\t90\n")?;

    chainstore()
        .arg("-s")
        .arg(&store)
        .arg("load")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed record"));
    assert_eq!(store_lines(&store)?, 4);
    Ok(())
}

#[test]
fn test_join_next_id_and_collapse() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let store = loaded_store(&temp)?;

    chainstore()
        .arg("-s")
        .arg(&store)
        .args(["next-id"])
        .assert()
        .success()
        .stdout("4\n");

    chainstore()
        .arg("-s")
        .arg(&store)
        .args(["collapse", "1"])
        .assert()
        .success()
        .stdout("1\tctg1\t100\t400\tchrX\t1000\t1300\t1e-30\t150\t98\n");

    chainstore()
        .arg("-s")
        .arg(&store)
        .args(["join", "3", "1"])
        .assert()
        .success()
        .stdout("1\n");

    chainstore()
        .arg("-s")
        .arg(&store)
        .args(["get", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ctg2").and(predicate::str::contains("ctg1")));

    // chain 1 now spans two query sequences
    chainstore()
        .arg("-s")
        .arg(&store)
        .args(["collapse", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("integrity error"));
    Ok(())
}

#[test]
fn test_chains_view_and_filter_length() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let store = loaded_store(&temp)?;

    chainstore()
        .arg("-s")
        .arg(&store)
        .args(["chains", "ctg1", "250", "260"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("1\tctg1\t100\t400"));

    chainstore()
        .arg("-s")
        .arg(&store)
        .args(["filter-length", "--min-length", "0.2k"])
        .assert()
        .success();
    // chain 3 covers 50 bases
    assert_eq!(store_lines(&store)?, 3);

    chainstore()
        .arg("-s")
        .arg(&store)
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ok"));
    Ok(())
}

#[test]
fn test_split_prints_runs() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let anchors = temp.path().join("anchors.tsv");
    let input = temp.path().join("input.tsv");
    fs::write(&anchors, "A\tchr1\t100\t200\nB\tchr1\t500\t600\nC\tchr1\t900\t1000\n")?;
    fs::write(
        &input,
        "x\tchr1\t250\t300\ny\tchr1\t310\t400\nz\tchr1\t700\t800\nw\tchr1\t2000\t2100\n",
    )?;

    chainstore()
        .arg("split")
        .arg("--anchors")
        .arg(&anchors)
        .arg(&input)
        .assert()
        .success()
        .stdout("x\tchr1\t250\t300\ny\tchr1\t310\t400\n\nz\tchr1\t700\t800\n");
    Ok(())
}

#[test]
fn test_kind_is_required_for_a_new_empty_store() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let store = temp.path().join("missing.tsv");
    chainstore()
        .arg("-s")
        .arg(&store)
        .arg("next-id")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--kind"));

    chainstore()
        .arg("-s")
        .arg(&store)
        .args(["-k", "grouped", "next-id"])
        .assert()
        .success()
        .stdout("1\n");
    Ok(())
}

#[test]
fn test_verify_reports_a_chain_that_cannot_collapse() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let store = temp.path().join("store.tsv");
    fs::write(&store, "1\texon\tchr1\t10\t20\n1\texon\tchr2\t30\t40\n2\texon\tchr1\t50\t60\n")?;

    chainstore()
        .arg("-s")
        .arg(&store)
        .arg("verify")
        .assert()
        .failure()
        .stderr(predicate::str::contains("chain 1 spans query sequences chr1 and chr2"));
    Ok(())
}

#[test]
fn test_split_keeps_sequences_apart() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let anchors = temp.path().join("anchors.tsv");
    let input = temp.path().join("input.tsv");
    fs::write(&anchors, "A\tchrA\t100\t200\nB\tchrA\t500\t600\n")?;
    fs::write(&input, "x\tchrB\t300\t400\ny\tchrA\t250\t260\nz\tchrA\t210\t550\n")?;

    chainstore()
        .arg("split")
        .arg("--anchors")
        .arg(&anchors)
        .arg(&input)
        .assert()
        .success()
        .stdout("y\tchrA\t250\t260\n");
    Ok(())
}
