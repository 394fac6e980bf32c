//! Auditable engine report artifacts with digest verification.
//!
//! Layout: `<dir>/<run_id>/report.json` plus `report.digest` holding the
//! lowercase hex SHA-256 of the JSON bytes.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::domain::{EngineError, EngineReport, Result};

const REPORT_FILE: &str = "report.json";
const DIGEST_FILE: &str = "report.digest";

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Write `data` to a temp file in `dir`, then rename it over `path`.
fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Persist a report and its digest; returns the report path.
///
/// Each file is replaced atomically, report first, so a reader never sees
/// a partial report. A crash between the two renames leaves a digest
/// mismatch, which [`read_report_artifact`] rejects.
pub fn write_report_artifact(report: &EngineReport, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(report.run_id.to_string());
    std::fs::create_dir_all(&run_dir)?;

    let artifact_path = run_dir.join(REPORT_FILE);
    let digest_path = run_dir.join(DIGEST_FILE);
    let json = serde_json::to_vec_pretty(report)?;
    let digest = sha256_hex(&json);

    write_atomic(&run_dir, &artifact_path, &json)?;
    write_atomic(&run_dir, &digest_path, digest.as_bytes())?;

    Ok(artifact_path)
}

/// Read `<dir>/<run_id>/report.json` and verify it against its digest.
pub fn read_report_artifact(run_id: &str, dir: &Path) -> Result<EngineReport> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join(REPORT_FILE))?;
    let digest = std::fs::read_to_string(run_dir.join(DIGEST_FILE))?;
    let actual = sha256_hex(&json);
    if digest.trim() != actual {
        return Err(EngineError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}
