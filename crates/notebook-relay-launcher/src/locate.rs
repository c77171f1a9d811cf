//! Finding kernel executables on disk.

use std::path::{Path, PathBuf};

/// Resolve a kernel executable by name.
///
/// Absolute paths short-circuit and only check that the file exists;
/// bare names are searched on the current PATH. Resolution runs on the
/// blocking pool so a slow filesystem never stalls the runtime.
pub async fn resolve_kernel_executable(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    which_async(executable).await
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_names_resolve_to_none() {
        assert!(resolve_kernel_executable("").await.is_none());
        assert!(resolve_kernel_executable("   ").await.is_none());
    }

    #[tokio::test]
    async fn unknown_tools_resolve_to_none() {
        assert!(
            resolve_kernel_executable("definitely-not-a-kernel-tool-xyzzy")
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn absolute_paths_short_circuit() {
        let path = std::env::temp_dir().join(format!("relay-kernel-{}", std::process::id()));
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();

        let resolved = resolve_kernel_executable(path.to_str().unwrap()).await;
        assert_eq!(resolved.as_deref(), Some(path.as_path()));

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn missing_absolute_paths_resolve_to_none() {
        assert!(
            resolve_kernel_executable("/definitely/not/here/kernel")
                .await
                .is_none()
        );
    }
}
