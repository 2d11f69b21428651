use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cab::CabCodec;
use crate::error::{StoreError, StoreResult};
use crate::layout::StoreLayout;

const MAGIC: &[u8] = b"FAKECAB\n";

/// Cabinet stand-in: a header line with the original name, then the bytes.
#[derive(Debug)]
pub(crate) struct FakeCab;

impl CabCodec for FakeCab {
    fn name(&self) -> &str {
        "fakecab"
    }

    fn compress(&self, src: &Path, dest: &Path) -> StoreResult<()> {
        let data = fs::read(src).map_err(|e| StoreError::read(src, e))?;
        let name = src.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(name.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(&data);
        fs::write(dest, out).map_err(|e| StoreError::write(dest, e))
    }

    fn decompress(&self, src: &Path, dest_dir: &Path) -> StoreResult<()> {
        let data = fs::read(src).map_err(|e| StoreError::read(src, e))?;
        let body = data.strip_prefix(MAGIC).ok_or_else(|| StoreError::CabCompression {
            tool: "fakecab".into(),
            output: "not a cabinet".into(),
        })?;
        let split = body.iter().position(|b| *b == b'\n').unwrap_or(body.len());
        let name = String::from_utf8_lossy(&body[..split]).into_owned();
        let dest: PathBuf = dest_dir.join(name);
        fs::write(&dest, &body[(split + 1).min(body.len())..]).map_err(|e| StoreError::write(&dest, e))
    }
}

pub(crate) fn plain_layout(root: impl Into<PathBuf>) -> Arc<StoreLayout> {
    Arc::new(StoreLayout::new(root, None))
}

pub(crate) fn fake_codec_layout(root: impl Into<PathBuf>) -> Arc<StoreLayout> {
    Arc::new(StoreLayout::new(root, Some(Arc::new(FakeCab))))
}
