//! Shared harness for the `ade` CLI specs: a thin wrapper over
//! `assert_cmd::Command` with the `cli()`/`.passes()`/`.stdout_has()`
//! chain the spec files use.

use assert_cmd::Command;

pub fn cli() -> Cli {
    Cli { command: Command::cargo_bin("ade").expect("ade binary not built") }
}

pub struct Cli {
    command: Command,
}

impl Cli {
    pub fn args(mut self, args: &[&str]) -> Self {
        self.command.args(args);
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.command.env(key, value);
        self
    }

    pub fn passes(mut self) -> Output {
        let assert = self.command.assert().success();
        Output { output: assert.get_output().clone() }
    }

    pub fn fails(mut self) -> Output {
        let assert = self.command.assert().failure();
        Output { output: assert.get_output().clone() }
    }
}

pub struct Output {
    output: std::process::Output,
}

impl Output {
    pub fn code(&self) -> i32 {
        self.output.status.code().unwrap_or(-1)
    }

    pub fn stdout_has(self, needle: &str) -> Self {
        let stdout = String::from_utf8_lossy(&self.output.stdout);
        assert!(stdout.contains(needle), "stdout did not contain {needle:?}:\n{stdout}");
        self
    }

    pub fn stderr_has(self, needle: &str) -> Self {
        let stderr = String::from_utf8_lossy(&self.output.stderr);
        assert!(stderr.contains(needle), "stderr did not contain {needle:?}:\n{stderr}");
        self
    }
}
