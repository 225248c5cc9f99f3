use assert_cmd::Command;
use predicates::prelude::*;

fn gpu_sim() -> Command {
    let mut cmd = Command::cargo_bin("gpu-sim").unwrap();
    cmd.env_remove("GPU_SIM_RUNTIME");
    cmd
}

#[test]
fn help_lists_commands() {
    gpu_sim()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("delete"))
        .stdout(predicate::str::contains("model"));
}

#[test]
fn unsupported_vendor_exits_with_usage_error() {
    gpu_sim()
        .args(["create", "cuda"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unsupported vendor `cuda`"))
        .stderr(predicate::str::contains("rocm, nvidia"));
}

#[test]
fn unknown_subcommand_exits_with_usage_error() {
    gpu_sim()
        .arg("destroy")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("destroy"));
}

#[test]
fn invalid_registry_port_is_rejected() {
    gpu_sim()
        .args(["delete", "--registry-port", "70000"])
        .assert()
        .code(2);
}

#[test]
fn version_is_printed() {
    gpu_sim()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("gpu-sim "));
}
