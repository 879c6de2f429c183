//! Shell scripts standing in for the transcoder.
//!
//! The graceful fake records its arguments, copies the SDP it was given and
//! idles until SIGINT, then writes a small file to the output path (the last
//! argument) and exits 0. The failing fake exits 1 at once without output.

use anyhow::Context;
use std::path::{Path, PathBuf};

/// A transcoder stand-in installed in a directory.
#[derive(Debug, Clone)]
pub struct FakeTranscoder {
    script: PathBuf,
    args_file: PathBuf,
    sdp_copy: PathBuf,
}

impl FakeTranscoder {
    /// Install a fake that runs until interrupted and then produces output.
    pub fn graceful(dir: &Path) -> anyhow::Result<Self> {
        let fake = Self::paths(dir, "fake-transcoder.sh");
        let body = format!(
            r#"#!/bin/sh
out=""
prev=""
trap 'printf "fake mp4" > "$out"; exit 0' INT TERM
for arg in "$@"; do
  printf '%s\n' "$arg" >> '{args}'
  if [ "$prev" = "-i" ]; then cp "$arg" '{sdp}'; fi
  prev="$arg"
  out="$arg"
done
while :; do sleep 0.05; done
"#,
            args = fake.args_file.display(),
            sdp = fake.sdp_copy.display(),
        );
        write_script(&fake.script, &body)?;
        Ok(fake)
    }

    /// Install a fake that fails immediately.
    pub fn failing(dir: &Path) -> anyhow::Result<Self> {
        let fake = Self::paths(dir, "failing-transcoder.sh");
        let body = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" >> '{args}'\necho 'simulated failure' >&2\nexit 1\n",
            args = fake.args_file.display(),
        );
        write_script(&fake.script, &body)?;
        Ok(fake)
    }

    fn paths(dir: &Path, name: &str) -> Self {
        Self {
            script: dir.join(name),
            args_file: dir.join(format!("{name}.args")),
            sdp_copy: dir.join(format!("{name}.sdp")),
        }
    }

    /// Executable path to configure as the transcoder.
    #[must_use]
    pub fn path(&self) -> String {
        self.script.display().to_string()
    }

    /// Arguments of every invocation so far, one per line.
    #[must_use]
    pub fn recorded_args(&self) -> Vec<String> {
        std::fs::read_to_string(&self.args_file)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// The SDP the graceful fake was started with.
    #[must_use]
    pub fn captured_sdp(&self) -> Option<String> {
        std::fs::read_to_string(&self.sdp_copy).ok()
    }
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("chmod {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_script(path: &Path, _body: &str) -> anyhow::Result<()> {
    anyhow::bail!("fake transcoder scripts need a unix shell: {}", path.display())
}
