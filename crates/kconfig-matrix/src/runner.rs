//! Hands the generated graph to ninja.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;

use crate::error::{Error, ErrorKind, Result};
use crate::rules::ToolPaths;

const MAX_LINE_CHARS: usize = 4096;

#[derive(Debug, Clone, Default)]
pub struct NinjaOptions {
    /// Pass `-n`: ninja walks the graph without running commands.
    pub dry_run: bool,
    /// 0 = one job per CPU.
    pub jobs: usize,
    pub targets: Vec<String>,
}

pub fn ninja_command(tools: &ToolPaths, ninja_file: &Path, opts: &NinjaOptions) -> Command {
    let jobs = if opts.jobs == 0 {
        num_cpus::get().max(1)
    } else {
        opts.jobs
    };
    let mut cmd = Command::new(&tools.ninja);
    cmd.arg("-f").arg(ninja_file).arg("-j").arg(jobs.to_string());
    if opts.dry_run {
        cmd.arg("-n");
    }
    cmd.args(&opts.targets);
    cmd
}

pub fn run_ninja(tools: &ToolPaths, ninja_file: &Path, opts: &NinjaOptions) -> Result<()> {
    run_tool("ninja", ninja_command(tools, ninja_file, opts))
}

/// Runs `cmd` to completion, streaming its stdout and stderr into the log
/// line by line. A non-zero exit becomes an [`ErrorKind::ExternalTool`] error.
pub fn run_tool(name: &str, mut cmd: Command) -> Result<()> {
    tracing::debug!(tool = name, command = ?cmd, "spawning");
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::new(ErrorKind::ExternalTool, format!("failed to spawn {name}: {e}")))?;

    let (tx, rx) = mpsc::channel::<String>();
    if let Some(out) = child.stdout.take() {
        let tx = tx.clone();
        std::thread::spawn(move || read_output_stream(out, tx));
    }
    if let Some(err) = child.stderr.take() {
        let tx = tx.clone();
        std::thread::spawn(move || read_output_stream(err, tx));
    }
    drop(tx);

    for line in rx {
        let line = sanitize_line(&line);
        if !line.is_empty() {
            tracing::info!(tool = name, "{line}");
        }
    }

    let status = child
        .wait()
        .map_err(|e| Error::new(ErrorKind::ExternalTool, format!("wait for {name} failed: {e}")))?;
    if !status.success() {
        return Err(Error::external_tool(name, status));
    }
    Ok(())
}

fn read_output_stream<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    let mut r = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match r.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
        }
    }
}

/// Strips terminal escape sequences and control characters and caps the
/// length, so tool output cannot rewrite the operator's terminal.
pub fn sanitize_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut chars = input.chars().peekable();
    let mut count = 0usize;

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.next() {
                // CSI: parameters up to a final byte in '@'..='~'.
                Some('[') => {
                    for n in chars.by_ref() {
                        if ('@'..='~').contains(&n) {
                            break;
                        }
                    }
                }
                // OSC: up to BEL or ESC '\'.
                Some(']') => {
                    while let Some(n) = chars.next() {
                        if n == '\x07' {
                            break;
                        }
                        if n == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
            continue;
        }
        if c == '\t' {
            out.push(' ');
        } else if c.is_control() || is_bidi_control(c) {
            continue;
        } else {
            out.push(c);
        }
        count += 1;
        if count >= MAX_LINE_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
    }
    out
}

fn is_bidi_control(c: char) -> bool {
    c == '\u{061C}'
        || c == '\u{200E}'
        || c == '\u{200F}'
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ToolsConfig, resolve_tools};
    use crate::workspace::WorkspacePaths;

    #[test]
    fn sanitize_strips_escapes_and_controls() {
        assert_eq!(
            sanitize_line("ok \u{1b}[31mred\u{1b}[0m \u{1b}]0;title\u{7}done\r\n"),
            "ok red done"
        );
        assert_eq!(sanitize_line("a\tb\u{202e}c"), "a bc");
        let long = "x".repeat(MAX_LINE_CHARS + 10);
        assert!(sanitize_line(&long).ends_with(" ...[truncated]"));
    }

    #[test]
    fn ninja_command_passes_file_jobs_and_targets() {
        let ws = WorkspacePaths {
            root: "/top".into(),
            out_dir: "/top/out".into(),
            ninja_file: "/top/out/build.ninja".into(),
            named_dirs: Default::default(),
        };
        let tools = resolve_tools(&ToolsConfig::default(), &ws).expect("tools");
        let cmd = ninja_command(
            &tools,
            Path::new("/top/out/build.ninja"),
            &NinjaOptions {
                dry_run: true,
                jobs: 3,
                targets: vec!["p".into()],
            },
        );
        let args: Vec<_> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.get_program(), "ninja");
        assert_eq!(args, vec!["-f", "/top/out/build.ninja", "-j", "3", "-n", "p"]);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_an_external_tool_error() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo building; exit 3");
        let err = run_tool("sh", cmd).expect_err("exit 3");
        assert_eq!(err.kind(), ErrorKind::ExternalTool);
        assert!(err.to_string().contains("sh failed"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn successful_tool_is_ok() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo ok");
        run_tool("sh", cmd).expect("exit 0");
    }
}
