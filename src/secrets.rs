//! Workspace-local secret storage for the OpenAI API key.
//!
//! One secret, one file: `secrets/openai_api_key` under the workspace,
//! written with the key material only.

use std::path::{Path, PathBuf};

use crate::error::{ServiceError, ServiceResult};

fn key_path(workspace: &Path) -> PathBuf {
    workspace.join("secrets").join("openai_api_key")
}

pub fn store_api_key(workspace: &Path, value: &str) -> ServiceResult<()> {
    let path = key_path(workspace);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| ServiceError::Internal(format!("secrets dir: {}", e)))?;
    }
    std::fs::write(&path, value.trim())
        .map_err(|e| ServiceError::Internal(format!("secrets write: {}", e)))?;
    Ok(())
}

pub fn load_api_key(workspace: &Path) -> Option<String> {
    std::fs::read_to_string(key_path(workspace))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn api_key_exists(workspace: &Path) -> bool {
    key_path(workspace).is_file()
}

pub fn delete_api_key(workspace: &Path) -> ServiceResult<bool> {
    let path = key_path(workspace);
    if !path.is_file() {
        return Ok(false);
    }
    std::fs::remove_file(&path)
        .map_err(|e| ServiceError::Internal(format!("secrets delete: {}", e)))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("edutest-secrets-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp workspace");
        dir
    }

    #[test]
    fn store_load_delete_roundtrip() {
        let ws = temp_workspace();
        assert!(!api_key_exists(&ws));
        assert_eq!(load_api_key(&ws), None);

        store_api_key(&ws, "  sk-test-123  ").expect("store");
        assert!(api_key_exists(&ws));
        assert_eq!(load_api_key(&ws).as_deref(), Some("sk-test-123"));

        assert!(delete_api_key(&ws).expect("delete"));
        assert!(!api_key_exists(&ws));
        assert!(!delete_api_key(&ws).expect("second delete"));
    }
}
