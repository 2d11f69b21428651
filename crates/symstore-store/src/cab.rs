//! CAB compression through external OS tools.
//!
//! Windows ships `makecab`/`expand`; elsewhere `gcab` is used. The tool is
//! located once when a store is opened; stores without one simply refuse
//! compressed entries.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Compress and decompress single-file cabinets.
pub trait CabCodec: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Write `src` as a cabinet at `dest`.
    fn compress(&self, src: &Path, dest: &Path) -> StoreResult<()>;

    /// Extract the file held by cabinet `src` into `dest_dir`.
    fn decompress(&self, src: &Path, dest_dir: &Path) -> StoreResult<()>;
}

/// `gcab` from the GNOME project.
#[derive(Clone, Debug)]
pub struct Gcab {
    program: PathBuf,
}

impl Gcab {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl CabCodec for Gcab {
    fn name(&self) -> &str {
        "gcab"
    }

    fn compress(&self, src: &Path, dest: &Path) -> StoreResult<()> {
        run(
            &self.program,
            &[OsStr::new("-z"), OsStr::new("-n"), OsStr::new("-c"), dest.as_os_str(), src.as_os_str()],
        )
    }

    fn decompress(&self, src: &Path, dest_dir: &Path) -> StoreResult<()> {
        run(
            &self.program,
            &[OsStr::new("-x"), OsStr::new("-C"), dest_dir.as_os_str(), src.as_os_str()],
        )
    }
}

/// Windows `makecab.exe` and `expand.exe`.
#[derive(Clone, Debug)]
pub struct Makecab {
    makecab: PathBuf,
    expand: PathBuf,
}

impl Makecab {
    pub fn new(makecab: impl Into<PathBuf>, expand: impl Into<PathBuf>) -> Self {
        Self {
            makecab: makecab.into(),
            expand: expand.into(),
        }
    }
}

impl CabCodec for Makecab {
    fn name(&self) -> &str {
        "makecab"
    }

    fn compress(&self, src: &Path, dest: &Path) -> StoreResult<()> {
        run(
            &self.makecab,
            &[
                OsStr::new("/D"),
                OsStr::new("CompressionType=LZX"),
                OsStr::new("/D"),
                OsStr::new("CompressionMemory=21"),
                src.as_os_str(),
                dest.as_os_str(),
            ],
        )
    }

    fn decompress(&self, src: &Path, dest_dir: &Path) -> StoreResult<()> {
        run(
            &self.expand,
            &[OsStr::new("-R"), src.as_os_str(), dest_dir.as_os_str()],
        )
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

fn run(program: &Path, args: &[&OsStr]) -> StoreResult<()> {
    debug!(program = %program.display(), ?args, "running CAB tool");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| StoreError::CabCompression {
            tool: tool_name(program),
            output: e.to_string(),
        })?;

    if !output.status.success() {
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(StoreError::CabCompression {
            tool: tool_name(program),
            output: text.trim().to_string(),
        });
    }
    Ok(())
}

/// Search `path_var` (a `PATH`-style list) for an executable called `name`.
pub fn find_program_in(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    let candidates: Vec<OsString> = if cfg!(windows) {
        vec![OsString::from(format!("{name}.exe")), OsString::from(name)]
    } else {
        vec![OsString::from(name)]
    };
    env::split_paths(path_var).find_map(|dir| {
        candidates
            .iter()
            .map(|candidate| dir.join(candidate))
            .find(|path| path.is_file())
    })
}

fn find_program(name: &str) -> Option<PathBuf> {
    env::var_os("PATH").and_then(|path| find_program_in(name, &path))
}

/// Locate a CAB tool for this platform.
pub fn probe() -> Option<Arc<dyn CabCodec>> {
    let codec: Option<Arc<dyn CabCodec>> = if cfg!(windows) {
        match (find_program("makecab"), find_program("expand")) {
            (Some(makecab), Some(expand)) => Some(Arc::new(Makecab::new(makecab, expand))),
            _ => None,
        }
    } else {
        find_program("gcab").map(|gcab| Arc::new(Gcab::new(gcab)) as Arc<dyn CabCodec>)
    };
    match &codec {
        Some(codec) => debug!(tool = codec.name(), "CAB compression available"),
        None => debug!("no CAB tool found, compression disabled"),
    }
    codec
}
