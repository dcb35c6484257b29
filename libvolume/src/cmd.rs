//! Invocation of external tools.

use tokio::process::Command;
use tracing::debug;

use crate::error::{CommandFailure, FailureKind};

const ENOENT: i32 = 2;
const EBUSY: i32 = 16;

/// Run `program` with `args` and return its trimmed stdout.
///
/// A non-zero exit is turned into a [`CommandFailure`] classified from the
/// exit status (the `rbd` tool exits with the errno of the failed call) and,
/// failing that, from the text on stderr.
pub(crate) async fn run(program: &str, args: &[String]) -> Result<String, CommandFailure> {
    debug!(%program, ?args, "exec");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| CommandFailure::other(format!("spawn {program}: {e}")))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    let code = output.status.code();
    Err(CommandFailure::new(
        classify(code, &stderr),
        format!("{program} {} exited with {code:?}: {stderr}", args.join(" ")),
    ))
}

pub(crate) fn classify(code: Option<i32>, stderr: &str) -> FailureKind {
    match code {
        Some(ENOENT) => return FailureKind::NotFound,
        Some(EBUSY) => return FailureKind::Busy,
        _ => {}
    }
    let stderr = stderr.to_ascii_lowercase();
    // Only errors rbd reports about the image itself count as missing; the
    // ceph client logs keyring and config lookups with the same errno text.
    let missing = stderr.lines().any(|line| {
        line.starts_with("rbd:")
            && (line.contains("(2) no such file or directory") || line.contains("does not exist"))
    });
    if missing {
        FailureKind::NotFound
    } else if stderr.contains("device or resource busy") || stderr.contains("still has watchers") {
        FailureKind::Busy
    } else {
        FailureKind::Other
    }
}
