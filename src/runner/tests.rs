use super::*;
use crate::command::CommandSpec;
use serial_test::serial;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Surface harness logs in test output when RUST_LOG is set.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_config() -> RunnerConfig {
    RunnerConfig {
        timeout: Some(Duration::from_secs(30)),
        retry: RetryPolicy::none(),
        kill_grace: Duration::from_millis(200),
        merge_stderr: false,
        log_file: None,
    }
}

fn runner() -> Runner {
    init_logging();
    Runner::new(fast_config())
}

fn no_retry() -> RetryPolicy {
    RetryPolicy::none()
}

#[test]
fn default_config_mirrors_documented_values() {
    let config = RunnerConfig::default();
    assert_eq!(config.timeout, Some(Duration::from_secs(300)));
    assert_eq!(config.kill_grace, Duration::from_secs(5));
    assert_eq!(config.retry.retries, 1);
    assert_eq!(config.retry.delay, Duration::from_secs(10));
    assert!(config.retry.retry_on_codes.is_empty());
}

#[test]
fn spawn_failure_is_a_distinct_error() {
    let mut runner = runner();
    let spec = CommandSpec::argv(["cmdexec-test-no-such-binary-xyz"]);
    // Even with a generous retry policy a spawn failure surfaces
    // immediately: it is never retried.
    let retry = RetryPolicy {
        retries: 5,
        delay: Duration::from_millis(1),
        retry_on_codes: vec![3],
    };
    match runner.run_raw_with(&spec, None, &retry) {
        Err(ExecError::Spawn { command, .. }) => {
            assert!(command.contains("cmdexec-test-no-such-binary-xyz"));
        }
        other => panic!("expected spawn failure, got {:?}", other),
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::continuity::{EnvChannel, EnvSnapshot};
    use crate::process::ProcessControl;
    use std::path::PathBuf;
    use std::time::Instant;

    /// Non-zombie processes whose command line contains `marker`.
    fn live_processes_matching(marker: &str) -> Vec<u32> {
        use sysinfo::{ProcessStatus, ProcessesToUpdate, System};

        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        sys.processes()
            .iter()
            .filter(|(_, process)| {
                process.status() != ProcessStatus::Zombie
                    && process
                        .cmd()
                        .iter()
                        .any(|arg| arg.to_string_lossy().contains(marker))
            })
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }

    #[test]
    fn argv_command_captures_stdout() {
        let mut runner = runner();
        let spec = CommandSpec::argv(["echo", "hello"]);
        let result = runner.run_raw_with(&spec, None, &no_retry()).unwrap();
        assert_eq!(
            result,
            ExecutionResult {
                stdout: "hello\n".to_string(),
                stderr: String::new(),
                code: 0,
            }
        );
    }

    #[test]
    fn argv_mode_does_no_shell_interpretation() {
        let mut runner = runner();
        let spec = CommandSpec::argv(["echo", "$HOME"]);
        let result = runner.run_raw_with(&spec, None, &no_retry()).unwrap();
        assert_eq!(result.stdout, "$HOME\n");
    }

    #[test]
    fn shell_mode_interprets_the_command_string() {
        let mut runner = runner();
        let spec = CommandSpec::shell("echo one && echo two");
        let result = runner.run_raw_with(&spec, None, &no_retry()).unwrap();
        assert_eq!(result.stdout, "one\ntwo\n");
        assert_eq!(result.code, 0);
    }

    #[test]
    fn run_raw_reports_non_zero_codes_without_failing() {
        let mut runner = runner();
        let result = runner
            .run_raw_with(&CommandSpec::shell("exit 3"), None, &no_retry())
            .unwrap();
        assert_eq!(result.code, 3);
    }

    #[test]
    fn run_wraps_non_zero_exit_with_partial_output() {
        let mut runner = runner();
        let spec = CommandSpec::shell("echo partial; exit 3");
        match runner.run_with(&spec, None, &no_retry()) {
            Err(ExecError::NonZeroExit(result)) => {
                assert_eq!(result.code, 3);
                assert_eq!(result.stdout, "partial\n");
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn timeout_kills_the_command_and_reaps_the_tree() {
        let mut runner = runner();
        let start = Instant::now();
        let result = runner
            .run_raw_with(
                &CommandSpec::shell("sleep 6.283"),
                Some(Duration::from_secs(1)),
                &no_retry(),
            )
            .unwrap();

        // Bounded by timeout + 2 * kill_grace plus scheduling slack.
        assert!(start.elapsed() < Duration::from_secs(3), "took {:?}", start.elapsed());
        // The graceful terminate lands first, so the natural code is the
        // SIGTERM one and carries more information than the sentinel.
        assert_eq!(result.code, -(nix::sys::signal::Signal::SIGTERM as i32));
        assert!(
            live_processes_matching("6.283").is_empty(),
            "timed-out command left processes behind"
        );
    }

    #[test]
    #[serial]
    fn natural_signal_code_is_preserved_on_timeout() {
        // The shell ignores SIGTERM, so the forced SIGKILL decides the
        // exit code; -9 carries more information than the sentinel and
        // must not be overridden.
        let mut runner = runner();
        let result = runner
            .run_raw_with(
                &CommandSpec::shell("trap '' TERM; sleep 6.457"),
                Some(Duration::from_millis(500)),
                &no_retry(),
            )
            .unwrap();
        assert_eq!(result.code, -(nix::sys::signal::Signal::SIGKILL as i32));
    }

    #[test]
    fn retry_set_forces_reinvocation() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let mut runner = runner();

        let spec = CommandSpec::shell(format!("echo attempt >> {}; exit 3", counter.display()));
        let retry = RetryPolicy {
            retries: 2,
            delay: Duration::from_millis(10),
            retry_on_codes: vec![3],
        };
        let result = runner.run_raw_with(&spec, None, &retry).unwrap();
        assert_eq!(result.code, 3);

        let invocations = std::fs::read_to_string(&counter).unwrap().lines().count();
        assert_eq!(invocations, 3, "retries=2 must mean exactly 3 invocations");
    }

    #[test]
    fn codes_outside_the_retry_set_do_not_retry() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let mut runner = runner();

        let spec = CommandSpec::shell(format!("echo attempt >> {}; exit 3", counter.display()));
        let retry = RetryPolicy {
            retries: 5,
            delay: Duration::from_millis(1),
            retry_on_codes: vec![9],
        };
        runner.run_raw_with(&spec, None, &retry).unwrap();

        let invocations = std::fs::read_to_string(&counter).unwrap().lines().count();
        assert_eq!(invocations, 1);
    }

    #[test]
    #[serial]
    fn timeout_code_is_retried_only_when_listed() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let mut runner = runner();

        let sigterm_code = -(nix::sys::signal::Signal::SIGTERM as i32);
        let spec = CommandSpec::shell(format!("echo attempt >> {}; sleep 6.4", counter.display()));
        let retry = RetryPolicy {
            retries: 1,
            delay: Duration::from_millis(10),
            retry_on_codes: vec![sigterm_code],
        };
        let result = runner
            .run_raw_with(&spec, Some(Duration::from_millis(300)), &retry)
            .unwrap();
        assert_eq!(result.code, sigterm_code);

        let invocations = std::fs::read_to_string(&counter).unwrap().lines().count();
        assert_eq!(invocations, 2);
    }

    #[test]
    fn run_checked_accepts_required_marker() {
        let mut runner = runner();
        let spec = CommandSpec::shell("echo deploy complete");
        let result = runner.run_checked(&spec, &["complete"], &["error"]).unwrap();
        assert!(result.stdout.contains("complete"));
    }

    #[test]
    fn run_checked_forbidden_marker_wins() {
        let mut runner = runner();
        let spec = CommandSpec::shell("echo complete but error in step 4");
        match runner.run_checked(&spec, &["complete"], &["error"]) {
            Err(ExecError::ValidationFailed(result)) => {
                assert_eq!(result.code, 0);
                assert!(result.stdout.contains("error in step 4"));
            }
            other => panic!("expected ValidationFailed, got {:?}", other),
        }
    }

    #[test]
    fn log_file_sink_appends_and_leaves_capture_empty() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("cmd.log");
        let mut runner = runner();

        let spec = CommandSpec::shell("echo logged line").log_file(&log);
        let result = runner.run_raw_with(&spec, None, &no_retry()).unwrap();
        assert_eq!(result.stdout, "");
        assert_eq!(result.code, 0);

        runner.run_raw_with(&spec, None, &no_retry()).unwrap();
        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents, "logged line\nlogged line\n");
    }

    #[test]
    fn runner_default_log_file_applies_when_spec_has_no_sink() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("default.log");
        let mut config = fast_config();
        config.log_file = Some(log.clone());
        let mut runner = Runner::new(config);

        runner
            .run_raw_with(&CommandSpec::shell("echo via default"), None, &no_retry())
            .unwrap();
        assert!(std::fs::read_to_string(&log).unwrap().contains("via default"));

        // An explicit in-memory sink still overrides the default.
        let result = runner
            .run_raw_with(&CommandSpec::shell("echo captured").capture(), None, &no_retry())
            .unwrap();
        assert_eq!(result.stdout, "captured\n");
    }

    #[test]
    fn merged_stderr_lands_in_stdout() {
        let mut runner = runner();
        let spec = CommandSpec::shell("echo out; echo err 1>&2").merge_stderr(true);
        let result = runner.run_raw_with(&spec, None, &no_retry()).unwrap();
        assert!(result.stdout.contains("out"));
        assert!(result.stdout.contains("err"));
        assert_eq!(result.stderr, "");
    }

    #[test]
    fn separate_streams_keep_stderr_apart() {
        let mut runner = runner();
        let spec = CommandSpec::shell("echo out; echo err 1>&2");
        let result = runner.run_raw_with(&spec, None, &no_retry()).unwrap();
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }

    #[test]
    fn environment_overlay_reaches_the_child() {
        let mut runner = runner();
        let spec = CommandSpec::shell("echo $CMDEXEC_TEST_VALUE").env("CMDEXEC_TEST_VALUE", "overlaid");
        let result = runner.run_raw_with(&spec, None, &no_retry()).unwrap();
        assert_eq!(result.stdout, "overlaid\n");
    }

    #[test]
    fn working_directory_override_applies() {
        let dir = TempDir::new().unwrap();
        let canonical = std::fs::canonicalize(dir.path()).unwrap();
        let mut runner = runner();
        let spec = CommandSpec::shell("pwd").current_dir(dir.path());
        let result = runner.run_raw_with(&spec, None, &no_retry()).unwrap();
        assert_eq!(result.stdout.trim(), canonical.to_string_lossy());
    }

    #[derive(Clone, Default)]
    struct RecordingControl {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingControl {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl ProcessControl for RecordingControl {
        fn descendants(&self, root: u32, _recursive: bool) -> Vec<u32> {
            self.push(format!("enumerate {root}"));
            vec![4242]
        }

        fn terminate(&self, pid: u32) {
            self.push(format!("terminate {pid}"));
        }

        fn kill(&self, pid: u32) {
            self.push(format!("kill {pid}"));
        }

        fn kill_tree(&self, root: u32, _kill_group: bool) {
            self.push(format!("kill_tree {root}"));
        }
    }

    #[test]
    #[serial]
    fn cleanup_enumerates_before_any_signal() {
        let control = RecordingControl::default();
        let mut config = fast_config();
        config.kill_grace = Duration::from_millis(50);
        let mut runner = Runner::with_process_control(config, Box::new(control.clone()));

        // The recorder never delivers real signals, so the worker stays
        // blocked and the attempt resolves through the abandonment path.
        let result = runner
            .run_raw_with(
                &CommandSpec::shell("sleep 6.6"),
                Some(Duration::from_millis(200)),
                &no_retry(),
            )
            .unwrap();
        assert_eq!(result.code, TIMEOUT_EXIT_CODE);

        let events = control.events.lock().unwrap().clone();
        assert_eq!(events.len(), 4, "events: {:?}", events);
        let pid: u32 = events[1].strip_prefix("terminate ").unwrap().parse().unwrap();
        assert_eq!(events[0], format!("enumerate {pid}"));
        assert_eq!(events[2], format!("kill {pid}"));
        assert_eq!(events[3], "kill 4242");

        // The recorder left the real child running; reap it for real.
        crate::process::kill(pid);
    }

    /// Test double for the external environment manager: the wrapped
    /// command dumps `pwd` and `env` to a state file the poll reads back.
    struct FileEnvChannel {
        state_file: PathBuf,
    }

    impl EnvChannel for FileEnvChannel {
        fn wrap_command(&self, command: &str) -> String {
            let path = self.state_file.display().to_string();
            format!("{command}; {{ pwd; env; }} > {}", shell_words::quote(&path))
        }

        fn poll(&mut self, _grace: Duration) -> Option<EnvSnapshot> {
            let data = std::fs::read_to_string(&self.state_file).ok()?;
            let mut lines = data.lines();
            let cwd = PathBuf::from(lines.next()?);
            let vars = lines
                .filter_map(|line| line.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Some(EnvSnapshot { vars, cwd })
        }
    }

    #[test]
    fn continuity_carries_cwd_and_exports_forward() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state");
        let workdir = dir.path().join("work");
        std::fs::create_dir(&workdir).unwrap();

        let channel = FileEnvChannel { state_file };
        let mut runner = Runner::with_continuity(fast_config(), Box::new(channel));

        let workdir_quoted = shell_words::quote(workdir.to_str().unwrap()).into_owned();
        runner
            .run_raw_with(
                &CommandSpec::shell(format!("cd {workdir_quoted} && export CMDEXEC_MARKER=hello42")),
                None,
                &no_retry(),
            )
            .unwrap();

        let snapshot = runner.snapshot().expect("snapshot after first command");
        assert_eq!(snapshot.vars.get("CMDEXEC_MARKER").map(String::as_str), Some("hello42"));

        // No cwd override and no overlay: both come from the snapshot.
        let result = runner
            .run_raw_with(
                &CommandSpec::shell("echo $CMDEXEC_MARKER && pwd"),
                None,
                &no_retry(),
            )
            .unwrap();
        assert!(result.stdout.contains("hello42"), "stdout: {}", result.stdout);
        assert!(result.stdout.contains("work"), "stdout: {}", result.stdout);
    }

    #[test]
    fn continuity_overlay_wins_over_snapshot() {
        let dir = TempDir::new().unwrap();
        let state_file = dir.path().join("state");
        let channel = FileEnvChannel { state_file };
        let mut runner = Runner::with_continuity(fast_config(), Box::new(channel));

        runner
            .run_raw_with(
                &CommandSpec::shell("export CMDEXEC_MARKER=from_shell"),
                None,
                &no_retry(),
            )
            .unwrap();

        let spec = CommandSpec::shell("echo $CMDEXEC_MARKER").env("CMDEXEC_MARKER", "from_caller");
        let result = runner.run_raw_with(&spec, None, &no_retry()).unwrap();
        assert!(result.stdout.contains("from_caller"));
    }
}
