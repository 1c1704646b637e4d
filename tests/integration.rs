use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

const NETWORK: &str = "
# reversible dimerization with a boundary source
begin parameters
    1 kf   0.001
    2 kr   0.1
    3 ks   5.0
end parameters
begin species
    1 M    200
    2 D    0
    3 $Src 1
end species
begin groups
    1 Mtot M,2*D
end groups
begin functions
    1 feed() ks*100/(100+Mtot)
end functions
begin reactions
    1 M,M  D    0.5*kf
    2 D    M,M  kr
    3 Src  M    feed
    4 M    0    kr
end reactions
";

fn run_bin(args: &[&str]) -> Output {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_rxnet"));
    Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command")
}

fn assert_success(args: &[&str]) {
    let output = run_bin(args);

    let stdout_str =
        std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
    let stderr_str =
        std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

    assert!(
        output.status.success(),
        "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
    );
}

fn setup(name: &str, config: &str, network: &str) -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    fs::write(test_dir.join("config.toml"), config).expect("failed to write config file");
    fs::write(test_dir.join("model.net"), network).expect("failed to write network file");

    test_dir
}

fn path_str(path: &Path) -> &str {
    path.to_str()
        .expect("failed to convert test directory to string")
}

#[test]
fn basic_workflow() {
    let config = String::new()
        + "network = \"model.net\"\n"
        + "\n"
        + "[simulation]\n"
        + "method = \"ssa\"\n"
        + "t_span = 5.0\n"
        + "n_saves = 50\n"
        + "seed = 1234\n"
        + "\n"
        + "[ssa]\n"
        + "update_interval = 1\n"
        + "recalc_interval = 10000\n";
    let test_dir = setup("basic_workflow", &config, NETWORK);
    let test_dir_str = path_str(&test_dir);

    assert_success(&["--sim-dir", test_dir_str, "create"]);
    assert_success(&["--sim-dir", test_dir_str, "create"]);

    assert_success(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]);
    assert_success(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]);
    assert_success(&["--sim-dir", test_dir_str, "resume", "--run-idx", "1"]);

    let run_0 = test_dir.join("run-0000");
    for file in ["trajectory-0000", "trajectory-0001", "trajectory-0002", "checkpoint"] {
        assert!(run_0.join(format!("{file}.msgpack")).is_file(), "missing {file}");
    }
    assert!(!test_dir.join("run-0001/trajectory-0002.msgpack").exists());

    assert!(!run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "5"]).status.success());

    assert_success(&["--sim-dir", test_dir_str, "analyze"]);
    assert!(run_0.join("results.msgpack").is_file());
    assert!(test_dir.join("run-0001/results.msgpack").is_file());

    assert_success(&["--sim-dir", test_dir_str, "clean"]);
    assert!(!run_0.exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn ode_workflow() {
    let config = String::new()
        + "network = \"model.net\"\n"
        + "\n"
        + "[simulation]\n"
        + "method = \"ode\"\n"
        + "t_span = 2.0\n"
        + "n_saves = 20\n"
        + "\n"
        + "[ode]\n"
        + "step = 0.001\n";
    let test_dir = setup("ode_workflow", &config, NETWORK);
    let test_dir_str = path_str(&test_dir);

    assert_success(&["--sim-dir", test_dir_str, "create"]);
    assert_success(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]);
    assert_success(&["--sim-dir", test_dir_str, "analyze"]);

    // Changing the config invalidates the checkpoint.
    let changed = config.replace("t_span = 2.0", "t_span = 3.0");
    fs::write(test_dir.join("config.toml"), changed).expect("failed to write config file");
    assert!(!run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]).status.success());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn invalid_network_fails() {
    let config = String::new()
        + "network = \"model.net\"\n"
        + "[simulation]\n"
        + "method = \"ssa\"\n"
        + "t_span = 1.0\n"
        + "n_saves = 10\n";
    let network = NETWORK.replace("0.5*kf", "0.5*kx");
    let test_dir = setup("invalid_network_fails", &config, &network);

    assert!(!run_bin(&["--sim-dir", path_str(&test_dir), "create"]).status.success());

    fs::remove_dir_all(&test_dir).ok();
}

#[cfg(unix)]
#[test]
fn expansion_through_child_process() {
    let network = "
begin parameters
    1 k 1.0
end parameters
begin species
    1 A 50
    2 B 0
end species
begin reactions
    1 A B k
end reactions
";
    let test_dir = setup("expansion_through_child_process", "", network);

    let oracle = test_dir.join("oracle.sh");
    let script = r#"
while read -r line; do
    case "$line" in
        "edgepop: B")
            printf 'read\nbegin species\n3 C 0\nend species\n'
            printf 'begin reactions\n2 B C k\nend reactions\n\n'
            ;;
        *)
            echo none
            ;;
    esac
done
"#;
    fs::write(&oracle, script).expect("failed to write oracle script");

    let config = String::new()
        + "network = \"model.net\"\n"
        + "[simulation]\n"
        + "method = \"ssa\"\n"
        + "t_span = 100.0\n"
        + "n_saves = 10\n"
        + "seed = 7\n"
        + "[expansion]\n"
        + &format!("command = [\"sh\", {:?}]\n", path_str(&oracle));
    fs::write(test_dir.join("config.toml"), config).expect("failed to write config file");

    let test_dir_str = path_str(&test_dir);
    let output = run_bin(&["--sim-dir", test_dir_str, "create"]);
    let stderr_str = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr:\n{stderr_str}");
    assert!(
        stderr_str.contains("added 1 species, 1 reactions"),
        "stderr:\n{stderr_str}"
    );

    fs::remove_dir_all(&test_dir).ok();
}
