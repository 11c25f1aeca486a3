use anyhow::{
    Context,
    Result,
    anyhow,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    io::{
        self,
        Write,
    },
    path::{
        Path,
        PathBuf,
    },
};

pub const DEFAULT_DATA_ROOT: &str = ".guess-game";
const SESSION_DIR: &str = "session";
const SESSION_FILE: &str = "session.json";

/// The only thing that survives a restart: which accounts were connected.
/// Transient flags (`connecting`) are never stored.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub accounts: Vec<String>,
    pub connected: bool,
}

#[derive(Debug)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    /// Opens (creating if needed) the session slot under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let path = ensure_store(root.as_ref())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<StoredSession>> {
        read_session(&self.path)
    }

    pub fn save(&self, session: &StoredSession) -> Result<()> {
        write_session(&self.path, session)
    }

    /// Deletes the session file; a missing file is already cleared.
    /// The next `save` recreates it.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err)
                .with_context(|| {
                    format!("Failed to remove session file {}", self.path.display())
                }),
            _ => Ok(()),
        }
    }
}

fn ensure_store(root: &Path) -> Result<PathBuf> {
    let dir = root.join(SESSION_DIR);
    if !dir.exists() {
        fs::create_dir_all(&dir).with_context(|| {
            format!("Failed to create session directory {}", dir.display())
        })?;
    }

    let file_path = dir.join(SESSION_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).with_context(|| {
            format!("Failed to create session file at {:?}", file_path)
        })?;
        file.write_all(b"")
            .context("Failed to initialize session file")?;
    }

    Ok(file_path)
}

fn read_session(path: impl AsRef<Path>) -> Result<Option<StoredSession>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path).context("Failed to read session file")?;
    if data.is_empty() || data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice::<StoredSession>(&data).map(Some).map_err(|e| {
        anyhow!(
            "Failed to parse session JSON in {}; expected {{accounts, connected}}: {e}",
            path.display()
        )
    })
}

fn write_session(path: impl AsRef<Path>, session: &StoredSession) -> Result<()> {
    let json =
        serde_json::to_vec_pretty(session).context("Failed to serialize session")?;
    fs::write(path.as_ref(), json).context("Failed to write session file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn load__fresh_store__returns_none() {
        // given
        let dir = TempDir::new("session").unwrap();
        let store = SessionFile::open(dir.path()).unwrap();

        // when
        let loaded = store.load().unwrap();

        // then
        assert_eq!(loaded, None);
        assert!(store.path().exists());
    }

    #[test]
    fn save__then_reopen__restores_accounts_and_flag() {
        // given
        let dir = TempDir::new("session").unwrap();
        let session = StoredSession {
            accounts: vec!["0x00000000000000000000000000000000000000aa".to_string()],
            connected: true,
        };
        SessionFile::open(dir.path()).unwrap().save(&session).unwrap();

        // when
        let loaded = SessionFile::open(dir.path()).unwrap().load().unwrap();

        // then
        assert_eq!(loaded, Some(session));
    }

    #[test]
    fn clear__after_save__leaves_no_session() {
        // given
        let dir = TempDir::new("session").unwrap();
        let store = SessionFile::open(dir.path()).unwrap();
        store
            .save(&StoredSession {
                accounts: vec!["0xa".to_string()],
                connected: true,
            })
            .unwrap();

        // when
        store.clear().unwrap();

        // then
        assert_eq!(store.load().unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn clear__twice__is_not_an_error_and_save_recreates_file() {
        // given
        let dir = TempDir::new("session").unwrap();
        let store = SessionFile::open(dir.path()).unwrap();
        store.clear().unwrap();

        // when
        let second = store.clear();
        store
            .save(&StoredSession {
                accounts: vec!["0xb".to_string()],
                connected: false,
            })
            .unwrap();

        // then
        assert!(second.is_ok());
        assert!(store.path().exists());
        assert_eq!(store.load().unwrap().unwrap().accounts, vec!["0xb".to_string()]);
    }

    #[test]
    fn load__stored_json_uses_browser_field_names() {
        // given
        let dir = TempDir::new("session").unwrap();
        let store = SessionFile::open(dir.path()).unwrap();
        fs::write(store.path(), br#"{"accounts":["0xA"],"connected":true}"#).unwrap();

        // when
        let loaded = store.load().unwrap().unwrap();

        // then
        assert_eq!(loaded.accounts, vec!["0xA".to_string()]);
        assert!(loaded.connected);
    }

    #[test]
    fn load__garbage_file__is_an_error() {
        // given
        let dir = TempDir::new("session").unwrap();
        let store = SessionFile::open(dir.path()).unwrap();
        fs::write(store.path(), b"not json").unwrap();

        // when
        let result = store.load();

        // then
        assert!(result.is_err());
    }
}
