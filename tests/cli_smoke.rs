use assert_cmd::Command;

#[test]
fn list_prints_the_workout_catalog() {
    let mut cmd = Command::cargo_bin("reps").unwrap();
    let out = cmd.arg("--list").assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("starter"));
    assert!(stdout.contains("touch-control"));
    assert!(stdout.contains("full-session"));
}

#[test]
fn help_lists_session_flags() {
    let mut cmd = Command::cargo_bin("reps").unwrap();
    let out = cmd.arg("--help").assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("--list"));
    assert!(stdout.contains("--records"));
    assert!(stdout.contains("--history"));
    assert!(stdout.contains("--user"));
}

#[test]
fn records_for_fresh_user_reports_nothing() {
    let home = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("reps").unwrap();
    let out = cmd
        .env("HOME", home.path())
        .arg("--records")
        .arg("--user")
        .arg("nobody-yet")
        .assert()
        .success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("no records yet"));
}
