use anyhow::{Context, Result, bail};
use std::process::Command;
use tracing::debug;

/// Run `argv` and fail on a non-zero exit status.
pub fn run(argv: &[String], context: &str) -> Result<()> {
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command ({context})");
    };
    debug!("running {}", argv.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| context.to_string())?;
    if !status.success() {
        bail!("{program} exited with status {:?} ({context})", status);
    }
    Ok(())
}
