use super::{HookContext, HookResult, HookRunner, SnippetError};
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

/// Runs hook scripts found in the protocol's `snippets/` directory.
///
/// The script receives `{state, meta, projectDir}` as JSON on stdin. Every stdout
/// line must be a JSON object: `{"setState": {...}}` patches state, `{"log": "..",
/// "data": ..}` writes to the engine log, and the last object carrying `type` is the
/// hook result. Plain-text lines are logged verbatim.
#[derive(Debug, Clone)]
pub struct ScriptHookRunner {
    snippets_dir: PathBuf,
}

impl ScriptHookRunner {
    pub fn new(snippets_dir: impl Into<PathBuf>) -> Self {
        Self {
            snippets_dir: snippets_dir.into(),
        }
    }

    pub fn snippets_dir(&self) -> &Path {
        &self.snippets_dir
    }

    /// First file in `snippets/` whose stem equals `hook_id`, by file name order.
    pub fn resolve(&self, hook_id: &str) -> Option<PathBuf> {
        let exact = self.snippets_dir.join(hook_id);
        if exact.is_file() {
            return Some(exact);
        }
        let mut matches: Vec<PathBuf> = fs::read_dir(&self.snippets_dir)
            .ok()?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.is_file() && path.file_stem().and_then(|stem| stem.to_str()) == Some(hook_id)
            })
            .collect();
        matches.sort();
        matches.into_iter().next()
    }
}

fn interpreter_for(script: &Path) -> Option<&'static str> {
    match script.extension().and_then(|ext| ext.to_str()) {
        Some("sh") => Some("sh"),
        Some("bash") => Some("bash"),
        Some("py") => Some("python3"),
        Some("js") | Some("mjs") | Some("cjs") => Some("node"),
        _ => None,
    }
}

impl HookRunner for ScriptHookRunner {
    fn has_hook(&self, hook_id: &str) -> bool {
        self.resolve(hook_id).is_some()
    }

    fn execute(
        &self,
        hook_id: &str,
        ctx: &mut HookContext<'_>,
    ) -> Result<HookResult, SnippetError> {
        let resolved = self.resolve(hook_id).ok_or_else(|| SnippetError::NotFound {
            hook_id: hook_id.to_string(),
        })?;
        // The child runs inside the project dir, so relative paths would resolve twice.
        let script = fs::canonicalize(&resolved).map_err(|source| SnippetError::Io {
            path: resolved.display().to_string(),
            source,
        })?;
        let project_dir =
            fs::canonicalize(ctx.project_dir()).map_err(|source| SnippetError::Io {
                path: ctx.project_dir().display().to_string(),
                source,
            })?;
        let io_error = |source: std::io::Error| SnippetError::Io {
            path: script.display().to_string(),
            source,
        };

        let mut command = match interpreter_for(&script) {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&script);
                command
            }
            None => Command::new(&script),
        };
        command
            .current_dir(&project_dir)
            .env("ARCANUM_HOOK_ID", hook_id)
            .env("ARCANUM_PROJECT_DIR", &project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|err| match err.kind() {
            ErrorKind::NotFound => SnippetError::Failed {
                hook_id: hook_id.to_string(),
                reason: format!("cannot launch {}: {err}", script.display()),
            },
            _ => io_error(err),
        })?;

        let payload = serde_json::to_vec(&ctx.to_payload()).map_err(|err| io_error(err.into()))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io_error(std::io::Error::other("missing stdin pipe")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io_error(std::io::Error::other("missing stdout pipe")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io_error(std::io::Error::other("missing stderr pipe")))?;

        let writer = thread::spawn(move || {
            // A hook may exit without reading its input; a broken pipe is not an error.
            let _ = stdin.write_all(&payload);
        });
        let stdout_reader = thread::spawn(move || {
            let mut buf = String::new();
            let mut reader = std::io::BufReader::new(stdout);
            let _ = reader.read_to_string(&mut buf);
            buf
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = String::new();
            let mut reader = std::io::BufReader::new(stderr);
            let _ = reader.read_to_string(&mut buf);
            buf
        });

        let status = child.wait().map_err(io_error)?;
        let _ = writer.join();
        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        if !stderr.trim().is_empty() {
            ctx.log(&format!("stderr: {}", stderr.trim()), None);
        }
        if !status.success() {
            return Err(SnippetError::NonZeroExit {
                hook_id: hook_id.to_string(),
                exit_code: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        let mut result = None;
        for line in stdout.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(line) else {
                ctx.log(line, None);
                continue;
            };
            if object.contains_key("type") {
                result = Some(Value::Object(object));
                continue;
            }
            if let Some(Value::Object(patch)) = object.remove("setState") {
                ctx.set_state(patch);
            }
            if let Some(message) = object.remove("log") {
                let message = message
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| message.to_string());
                ctx.log(&message, object.get("data"));
            }
        }

        result
            .map(HookResult::from_value)
            .ok_or_else(|| SnippetError::MissingResult {
                hook_id: hook_id.to_string(),
            })
    }
}
