#![allow(deprecated)] // TODO: move from cargo_bin to the cargo_bin_cmd! macro

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;

const SHOP: &str = r#"
stack "shop"

variables {
    domain "example.com"
}

stage "dev" {
    variables { desired_count 1 }
}

stage "live" {
    variables { desired_count 3 }
}

resource "vpc" kind="network" {
    max_azs 2
}

resource "cluster" kind="cluster" {
    vpc "${vpc.id}"
}

resource "db" kind="database" {
    engine "mysql"
    vpc "${vpc.id}"
}

resource "app" kind="service" {
    cluster "${cluster.arn}"
    desired_count "{{ desired_count }}"
    environment {
        DB_HOST "${db.endpoint_address}"
        SITE_URL "https://{{ domain }}"
    }
}

export "AppUrl" "http://${app.load_balancer_dns}/"
export "DatabaseEndpoint" "${db.endpoint_address}"
"#;

fn shop() -> TestProject {
    let project = TestProject::new();
    project.write_stack_kdl(SHOP);
    project
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("stackflow").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dependency order"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("outputs"));
}

#[test]
fn test_apply_help() {
    let mut cmd = Command::cargo_bin("stackflow").unwrap();
    cmd.args(["apply", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--stage"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("stackflow").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_validate_without_stack_file() {
    let project = TestProject::new();
    let mut cmd = Command::cargo_bin("stackflow").unwrap();
    cmd.current_dir(project.path())
        .env_remove("STACKFLOW_FILE")
        .arg("validate")
        .assert()
        .failure();
}

#[test]
fn test_validate() {
    let project = shop();
    project
        .stackflow()
        .args(["--stage", "dev", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stack is valid"))
        .stdout(predicate::str::contains("shop-dev"))
        .stdout(predicate::str::contains("Resources: 4"))
        .stdout(predicate::str::contains("AppUrl"));
}

#[test]
fn test_validate_rejects_cycle() {
    let project = TestProject::new();
    project.write_stack_kdl(
        r#"
resource "a" kind="network" { peer "${b.id}" }
resource "b" kind="network" { peer "${a.id}" }
"#,
    );

    project
        .stackflow()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cycle"));
}

#[test]
fn test_validate_rejects_unknown_reference() {
    let project = TestProject::new();
    project.write_stack_kdl(r#"resource "app" kind="service" { cluster "${cluster.arn}" }"#);

    project
        .stackflow()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("${cluster.arn}"));
}

#[test]
fn test_unknown_stage() {
    let project = shop();
    project
        .stackflow()
        .args(["--stage", "staging", "plan"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown stage 'staging'"));
}

#[test]
fn test_graph_waves() {
    let project = shop();
    project
        .stackflow()
        .args(["--stage", "dev", "graph"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wave 1"))
        .stdout(predicate::str::contains("Wave 3"))
        .stdout(predicate::str::contains("after cluster, db"));
}

#[test]
fn test_plan_on_empty_state() {
    let project = shop();
    project
        .stackflow()
        .args(["--stage", "dev", "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("+ vpc"))
        .stdout(predicate::str::contains("4 to create"));
}

#[test]
fn test_apply_requires_yes() {
    let project = shop();
    project
        .stackflow()
        .args(["--stage", "dev", "apply"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--yes"));

    assert!(!project.state_file("shop-dev").exists());
}

#[test]
fn test_apply_outputs_and_destroy() {
    let project = shop();

    project
        .stackflow()
        .args(["--stage", "dev", "apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded"))
        .stdout(predicate::str::contains("4 created"))
        .stdout(predicate::str::contains("http://app.load-balancer-dns.sim/"));
    assert!(project.state_file("shop-dev").exists());

    // a second plan sees nothing to do
    project
        .stackflow()
        .args(["--stage", "dev", "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));

    let output = project
        .stackflow()
        .args(["--stage", "dev", "outputs", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let exports: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(exports["AppUrl"], "http://app.load-balancer-dns.sim/");
    assert_eq!(exports["DatabaseEndpoint"], "db.endpoint-address.sim");

    project
        .stackflow()
        .args(["--stage", "dev", "destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4 deleted"));

    project
        .stackflow()
        .args(["--stage", "dev", "outputs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not ready"));
}

#[test]
fn test_outputs_before_apply_are_not_ready() {
    let project = shop();
    project
        .stackflow()
        .args(["--stage", "dev", "outputs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not ready"));
}

#[test]
fn test_changed_attribute_plans_update_and_replace() {
    let project = shop();
    project
        .stackflow()
        .args(["--stage", "dev", "apply", "--yes"])
        .assert()
        .success();

    // the live stage has its own stack and state
    project
        .stackflow()
        .args(["--stage", "live", "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4 to create"));

    project.write_stack_kdl(
        &SHOP
            .replace("engine \"mysql\"", "engine \"postgres\"")
            .replace("max_azs 2", "max_azs 2\n    tags \"web\""),
    );
    project
        .stackflow()
        .args(["--stage", "dev", "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("~ vpc"))
        .stdout(predicate::str::contains("-/+ db"))
        .stdout(predicate::str::contains("forces replacement: engine"));
}

#[test]
fn test_destroy_without_state() {
    let project = shop();
    project
        .stackflow()
        .args(["--stage", "dev", "destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing recorded to destroy"));
}

#[test]
fn test_concurrency_from_settings() {
    let project = shop();
    project.write_settings("concurrency: 1\nretry:\n  max_attempts: 1\n");

    project
        .stackflow()
        .args(["--stage", "dev", "apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("concurrency 1"));
}

#[test]
fn test_zero_concurrency_rejected() {
    let project = shop();
    project
        .stackflow()
        .args(["--stage", "dev", "--concurrency", "0", "plan"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 1"));
}

#[test]
fn test_stages_keep_their_own_instances() {
    let project = shop();
    for stage in ["dev", "live"] {
        project
            .stackflow()
            .args(["--stage", stage, "apply", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("4 created"));
    }
    assert!(project.state_file("shop-dev").with_file_name("simulated.json").exists());
    assert!(project.state_file("shop-live").with_file_name("simulated.json").exists());

    for stage in ["dev", "live"] {
        project
            .stackflow()
            .args(["--stage", stage, "destroy", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("4 deleted"));
    }
}

#[test]
fn test_invalid_retry_settings_rejected() {
    let project = shop();
    project.write_settings("retry:\n  backoff_multiplier: -1\n");

    project
        .stackflow()
        .args(["--stage", "dev", "plan"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("backoff_multiplier"));
}
