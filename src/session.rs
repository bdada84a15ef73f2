//! Run sessions for trace artifacts.
//!
//! Each run gets its own directory under the configured session base:
//! - `.session.json` metadata written on init
//! - `traces/<case>.zip` per traced case
//!
//! The directory is removed on drop unless the session is kept.

use std::fs;
use std::path::PathBuf;

use crate::config;

/// Artifact directory for one run
#[derive(Debug)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
    /// Whether to keep files after the session ends
    pub keep: bool,
}

impl Session {
    /// Create a session named after `name` under the configured base directory
    pub fn with_name(name: &str) -> Self {
        Self::under(config::session_base_dir(), name)
    }

    /// Create a session named after `name` under `base`
    pub fn under(base: impl Into<PathBuf>, name: &str) -> Self {
        let id = format!("{}_{}", sanitize_name(name), generate_timestamp_suffix());
        let dir = base.into().join(&id);
        Self {
            id,
            dir,
            keep: false,
        }
    }

    /// Use an explicit directory; kept by default
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(generate_timestamp_suffix);
        Self {
            id,
            dir,
            keep: true,
        }
    }

    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Create the session and trace directories and write metadata
    pub fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.dir.join("traces"))?;

        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
        });
        fs::write(
            self.dir.join(".session.json"),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        Ok(())
    }

    /// Trace artifact path for a case
    pub fn trace_path(&self, case_id: &str) -> PathBuf {
        self.dir
            .join("traces")
            .join(format!("{}.zip", sanitize_name(case_id)))
    }

    /// Trace artifacts written so far
    pub fn list_traces(&self) -> std::io::Result<Vec<PathBuf>> {
        let traces = self.dir.join("traces");
        let mut found = Vec::new();
        if traces.exists() {
            for entry in fs::read_dir(&traces)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "zip") {
                    found.push(path);
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// Remove the session directory unless kept
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.dir.exists() && !self.keep {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

fn generate_timestamp_suffix() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Sanitize a name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
