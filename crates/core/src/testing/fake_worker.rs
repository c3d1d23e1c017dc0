//! Scripted stand-in for the transcription worker.

use std::path::{Path, PathBuf};

use crate::config::{
    BatchConfig, Config, HelperCommandConfig, HelpersConfig, ProcessConfig, ProtocolConfig,
    StorageConfig, WorkerConfig,
};

/// Builds a POSIX `sh` script that speaks the worker protocol with the
/// default tokens.
///
/// Requests are numbered from 1 in arrival order. By default every request
/// is answered immediately with `<id>.mid`, which is created in the request's
/// work dir, and the script exits with 0 at end of input.
///
/// # Example
///
/// ```rust,ignore
/// let script = FakeWorker::new().skip_request(1).write_to(dir.path())?;
/// let config = testing::sh_config(&script, uploads.path());
/// ```
#[derive(Debug, Clone, Default)]
pub struct FakeWorker {
    never_ready: bool,
    exit_before_ready: Option<i32>,
    skip: Vec<usize>,
    without_output: Vec<usize>,
    bad_code: Vec<usize>,
    duplicate: Vec<usize>,
    stray_response: bool,
    exit_after: Option<(usize, i32)>,
    ignore_end_of_input: bool,
    reverse: bool,
    exit_code: i32,
}

impl FakeWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never print the ready sentinel.
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// Exit with `code` before printing the ready sentinel.
    pub fn exit_before_ready(mut self, code: i32) -> Self {
        self.exit_before_ready = Some(code);
        self
    }

    /// Never answer request `n`.
    pub fn skip_request(mut self, n: usize) -> Self {
        self.skip.push(n);
        self
    }

    /// Answer request `n` without creating the declared output file.
    pub fn without_output(mut self, n: usize) -> Self {
        self.without_output.push(n);
        self
    }

    /// Answer request `n` with a non-numeric `code`.
    pub fn bad_code(mut self, n: usize) -> Self {
        self.bad_code.push(n);
        self
    }

    /// Answer request `n` twice.
    pub fn duplicate_answer(mut self, n: usize) -> Self {
        self.duplicate.push(n);
        self
    }

    /// Send a response for an id that was never requested, right after ready.
    pub fn stray_response(mut self) -> Self {
        self.stray_response = true;
        self
    }

    /// Exit with `code` right after reading request `n`, without answering it.
    pub fn exit_after(mut self, n: usize, code: i32) -> Self {
        self.exit_after = Some((n, code));
        self
    }

    /// Keep running after stdin is closed.
    pub fn ignore_end_of_input(mut self) -> Self {
        self.ignore_end_of_input = true;
        self
    }

    /// Hold every answer until end of input, then answer in reverse order.
    pub fn answer_in_reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Exit code at end of input.
    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn script(&self) -> String {
        let mut script = String::from(
            r#"#!/bin/sh
respond() {
  if [ "$3" = 1 ]; then : > "$2/$1.mid"; fi
  printf '<<DATA>>{"id":"%s","code":0,"fnames":["%s.mid"]}<<END>>\n' "$1" "$1"
}
printf 'loading model<<END>>\n'
"#,
        );

        if let Some(code) = self.exit_before_ready {
            script.push_str(&format!("echo 'model failed to load' >&2\nexit {}\n", code));
            return script;
        }
        if self.never_ready {
            script.push_str("exec sleep 60\n");
            return script;
        }

        script.push_str(
            r#"printf '<<READY>><<END>>\n'
"#,
        );
        if self.stray_response {
            script.push_str("respond stray /nonexistent 0\n");
        }
        script.push_str(
            r#"n=0
deferred=""
while IFS= read -r line; do
  [ -z "$line" ] && continue
  n=$((n+1))
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  dir=$(printf '%s' "$line" | sed -n 's/.*"audio_dir_path":"\([^"]*\)".*/\1/p')
  printf 'received request %s<<END>>\n' "$n"
"#,
        );

        if let Some((n, code)) = self.exit_after {
            script.push_str(&format!("  if [ \"$n\" = {} ]; then exit {}; fi\n", n, code));
        }
        script.push_str("  case \"$n\" in\n");
        if !self.skip.is_empty() {
            script.push_str(&format!("    {}) ;;\n", cases(&self.skip)));
        }
        if !self.bad_code.is_empty() {
            script.push_str(&format!(
                "    {}) printf '<<DATA>>{{\"id\":\"%s\",\"code\":\"zero\",\"fnames\":[]}}<<END>>\\n' \"$id\" ;;\n",
                cases(&self.bad_code)
            ));
        }
        if !self.without_output.is_empty() {
            script.push_str(&format!(
                "    {}) respond \"$id\" \"$dir\" 0 ;;\n",
                cases(&self.without_output)
            ));
        }
        if !self.duplicate.is_empty() {
            script.push_str(&format!(
                "    {}) respond \"$id\" \"$dir\" 1; respond \"$id\" \"$dir\" 1 ;;\n",
                cases(&self.duplicate)
            ));
        }
        if self.reverse {
            script.push_str("    *) deferred=\"$id|$dir $deferred\" ;;\n");
        } else {
            script.push_str("    *) respond \"$id\" \"$dir\" 1 ;;\n");
        }
        script.push_str("  esac\ndone\n");

        script.push_str(
            r#"for entry in $deferred; do
  respond "${entry%%|*}" "${entry#*|}" 1
done
"#,
        );
        if self.ignore_end_of_input {
            script.push_str("exec sleep 60\n");
        }
        script.push_str(&format!("exit {}\n", self.exit_code));
        script
    }

    /// Writes the script as `fake_worker.sh` into `dir`.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join("fake_worker.sh");
        std::fs::write(&path, self.script())?;
        Ok(path)
    }
}

fn cases(requests: &[usize]) -> String {
    requests
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join("|")
}

/// A `sh` helper whose inline `script` sees the positional args as `$1..`.
pub fn sh_helper(script: &str) -> HelperCommandConfig {
    HelperCommandConfig {
        launcher: "sh".to_string(),
        launcher_args: vec!["-c".to_string(), script.to_string()],
        script: PathBuf::from("helper"),
        timeout_ms: 5_000,
        ready_sentinel: None,
    }
}

/// Configuration running `worker_script` under `sh` with short timeouts.
///
/// The score helper touches the PDF path it is given; the preview helper
/// does nothing.
pub fn sh_config(worker_script: &Path, upload_dir: &Path) -> Config {
    Config {
        process: ProcessConfig {
            allowed_launchers: vec!["sh".to_string()],
            success_exit_code: 0,
        },
        worker: WorkerConfig {
            launcher: "sh".to_string(),
            launcher_args: Vec::new(),
            script: worker_script.to_path_buf(),
            request_timeout_ms: 2_000,
            startup_timeout_ms: 2_000,
            shutdown_grace_ms: 500,
        },
        protocol: ProtocolConfig::default(),
        helpers: HelpersConfig {
            score: sh_helper("touch \"$2\""),
            preview: sh_helper("exit 0"),
        },
        storage: StorageConfig {
            upload_dir: upload_dir.to_path_buf(),
            ..StorageConfig::default()
        },
        batch: BatchConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_script_answers_everything() {
        let script = FakeWorker::new().script();
        assert!(script.contains("<<READY>>"));
        assert!(script.contains("*) respond \"$id\" \"$dir\" 1 ;;"));
        assert!(script.ends_with("exit 0\n"));
    }

    #[test]
    fn test_scripted_behaviors() {
        let script = FakeWorker::new()
            .skip_request(1)
            .skip_request(3)
            .without_output(2)
            .exit_after(4, 7)
            .script();
        assert!(script.contains("    1|3) ;;"));
        assert!(script.contains("    2) respond \"$id\" \"$dir\" 0 ;;"));
        assert!(script.contains("if [ \"$n\" = 4 ]; then exit 7; fi"));
    }

    #[test]
    fn test_exit_before_ready_never_prints_sentinel() {
        let script = FakeWorker::new().exit_before_ready(3).script();
        assert!(!script.contains("<<READY>>"));
        assert!(script.ends_with("exit 3\n"));
    }
}
