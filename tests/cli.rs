use assert_cmd::Command;
use predicates::prelude::*;

fn wc() -> Command {
    Command::cargo_bin("wc-pipeline").unwrap()
}

#[test]
fn counts_stdin_with_task_workers() {
    let output = wc()
        .args(["--mappers", "2", "--reducers", "2"])
        .write_stdin("the cat sat\nthe dog sat\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let mut lines: Vec<String> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    lines.sort();
    assert_eq!(lines, ["cat 1", "dog 1", "sat 2", "the 2"]);
}

#[test]
fn counts_stdin_with_process_workers() {
    let output = wc()
        .args(["--workers", "process", "--mappers", "3", "--reducers", "1"])
        .write_stdin("b a\nc b\na\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8(output).unwrap(), "a 2\nb 2\nc 1\n");
}

#[test]
fn sequential_mode_prints_one_sorted_table() {
    wc().arg("--sequential")
        .write_stdin("Zoo, apple! zoo\n")
        .assert()
        .success()
        .stdout("apple 1\nzoo 2\n");
}

#[test]
fn empty_input_exits_cleanly() {
    wc().write_stdin("").assert().success().stdout("");
}

#[test]
fn oversized_line_fails_with_a_diagnostic() {
    wc().args(["--max-line-len", "4"])
        .write_stdin("fine\nmuch too long\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("line too long"));
}

#[test]
fn zero_mappers_is_rejected() {
    wc().args(["--mappers", "0"])
        .write_stdin("the cat\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("num_mappers"));
}

#[test]
fn worker_subcommand_maps_stdin() {
    wc().args(["worker", "map"])
        .write_stdin("The cat\n")
        .assert()
        .success()
        .stdout("the 1\ncat 1\n");
}

#[test]
fn worker_subcommand_reduces_stdin() {
    wc().args(["worker", "reduce"])
        .write_stdin("b 1\na 1\nb 1\n")
        .assert()
        .success()
        .stdout("a 1\nb 2\n");
}

#[test]
fn reducer_count_overflow_fails_the_worker() {
    wc().args(["worker", "reduce"])
        .write_stdin("a 18446744073709551615\na 1\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("overflowed"));
}

#[test]
fn huge_line_limit_is_rejected() {
    wc().args(["--max-line-len", "18446744073709551615"])
        .write_stdin("the cat\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_line_len"));
}
