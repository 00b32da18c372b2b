use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Utc;
use tracing::warn;

/// Per-person transcript files: `{dir}/{name}_world_transcript.txt`.
///
/// Writes are best effort; a failing disk only costs the transcript.
#[derive(Debug, Default)]
pub struct Transcripts {
    dir: Option<PathBuf>,
    open: HashMap<String, BufWriter<std::fs::File>>,
}

impl Transcripts {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            open: HashMap::new(),
        }
    }

    pub fn path_for(&self, name: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        Some(dir.join(format!("{}_world_transcript.txt", name.to_lowercase())))
    }

    pub fn record(&mut self, name: &str, request: &str, response: &str) {
        let Some(path) = self.path_for(name) else {
            return;
        };
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        let text = format!("{stamp} {name}: {request}\n{stamp} World: {response}\n\n");
        if let Err(e) = self.write(name, path, &text) {
            warn!(person = %name, err = %e, "transcript write failed");
        }
    }

    fn write(&mut self, name: &str, path: PathBuf, text: &str) -> std::io::Result<()> {
        let key = name.to_lowercase();
        if !self.open.contains_key(&key) {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let f = OpenOptions::new().create(true).append(true).open(&path)?;
            self.open.insert(key.clone(), BufWriter::new(f));
        }
        if let Some(w) = self.open.get_mut(&key) {
            w.write_all(text.as_bytes())?;
            w.flush()?;
        }
        Ok(())
    }

    /// Close a person's transcript when they leave.
    pub fn close(&mut self, name: &str) {
        if let Some(mut w) = self.open.remove(&name.to_lowercase()) {
            let _ = w.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_request_and_response() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("orchestrator_transcripts_{nanos}"));
        let mut t = Transcripts::new(Some(dir.clone()));
        t.record("Alice", "look", "You look around.");
        t.record("Alice", "n", "You head north.");
        t.close("Alice");

        let body = std::fs::read_to_string(dir.join("alice_world_transcript.txt")).unwrap();
        assert!(body.contains("Alice: look\n"));
        assert!(body.contains("World: You head north.\n"));
        assert_eq!(body.matches("World:").count(), 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn disabled_without_dir() {
        let mut t = Transcripts::new(None);
        assert!(t.path_for("Alice").is_none());
        t.record("Alice", "look", "ok");
    }
}
