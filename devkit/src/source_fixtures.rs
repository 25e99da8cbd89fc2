/*!
Source file fixtures

Stands in for the producer files under /proc: a temporary directory holding
one file per source (`cpu`, `ram`, `processes`). Writes go through a temp file
and a rename so a concurrent reader never sees half a document.
*/

use anyhow::Result;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CPU: &str = "cpu";
pub const RAM: &str = "ram";
pub const PROCESSES: &str = "processes";

pub struct SourceFixtures {
    dir: TempDir,
}

impl SourceFixtures {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, source: &str) -> PathBuf {
        self.dir.path().join(source)
    }

    pub fn cpu_path(&self) -> PathBuf {
        self.path(CPU)
    }

    pub fn ram_path(&self) -> PathBuf {
        self.path(RAM)
    }

    pub fn processes_path(&self) -> PathBuf {
        self.path(PROCESSES)
    }

    pub fn write_cpu(&self, usage: f64) -> Result<()> {
        self.write_json(CPU, &json!({ "usage": usage }))
    }

    /// Memory in kilobytes; the percentage is left for the reader to derive
    pub fn write_ram(&self, total: u64, free: u64, used: u64) -> Result<()> {
        self.write_json(RAM, &json!({ "total": total, "free": free, "used": used }))
    }

    pub fn write_processes(
        &self,
        running: u64,
        total: u64,
        sleeping: u64,
        zombie: u64,
        stopped: u64,
    ) -> Result<()> {
        self.write_json(
            PROCESSES,
            &json!({
                "running": running,
                "total": total,
                "sleeping": sleeping,
                "zombie": zombie,
                "stopped": stopped,
            }),
        )
    }

    pub fn write_json(&self, source: &str, value: &Value) -> Result<()> {
        self.write_raw(source, &serde_json::to_vec(value)?)
    }

    pub fn write_raw(&self, source: &str, bytes: &[u8]) -> Result<()> {
        let staging = self.dir.path().join(format!(".{source}.tmp"));
        std::fs::write(&staging, bytes)?;
        std::fs::rename(&staging, self.path(source))?;
        log::debug!("📝 wrote {} bytes to source {}", bytes.len(), source);
        Ok(())
    }

    /// Make a source disappear, as when its producer is unloaded
    pub fn remove(&self, source: &str) -> Result<()> {
        match std::fs::remove_file(self.path(source)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_are_readable_json() {
        let fixtures = SourceFixtures::new().unwrap();
        fixtures.write_cpu(42.0).unwrap();
        fixtures.write_ram(1000, 400, 600).unwrap();
        fixtures.write_processes(1, 10, 8, 1, 0).unwrap();

        let read = |path: PathBuf| -> Value {
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
        };
        assert_eq!(read(fixtures.cpu_path())["usage"], 42.0);
        assert_eq!(read(fixtures.ram_path())["free"], 400);
        assert_eq!(read(fixtures.processes_path())["zombie"], 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let fixtures = SourceFixtures::new().unwrap();
        fixtures.write_raw(CPU, b"garbage").unwrap();
        fixtures.remove(CPU).unwrap();
        fixtures.remove(CPU).unwrap();
        assert!(!fixtures.cpu_path().exists());
    }
}
