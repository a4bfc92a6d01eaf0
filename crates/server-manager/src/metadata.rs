//! 서버 메타데이터 저장소
//!
//! 서버마다 `<servers_dir>/<server_id>/.cubehost.json` 파일 하나를 둡니다.
//! 쓰기는 임시 파일에 기록한 뒤 rename 하므로 중간에 프로세스가 죽어도
//! 반쯤 쓰인 레코드가 남지 않습니다.

use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use cubehost_core::types::{ServerMetadata, validate_server_id};

use crate::error::ManagerError;

/// 메타데이터 파일 이름
pub const METADATA_FILE: &str = ".cubehost.json";

/// 디렉토리 스캔 결과: 손상된 레코드도 ID와 함께 보고합니다.
pub type ScanEntry = (String, Result<ServerMetadata, ManagerError>);

/// 파일 기반 메타데이터 저장소
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    /// 새 저장소를 생성합니다. 디렉토리는 첫 쓰기 시 생성됩니다.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 저장소 루트 디렉토리
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 서버 데이터 디렉토리 경로
    pub fn server_dir(&self, server_id: &str) -> PathBuf {
        self.root.join(server_id)
    }

    /// 메타데이터 파일 경로
    pub fn metadata_path(&self, server_id: &str) -> PathBuf {
        self.server_dir(server_id).join(METADATA_FILE)
    }

    /// 메타데이터 레코드가 존재하는지 확인합니다.
    pub async fn exists(&self, server_id: &str) -> bool {
        tokio::fs::try_exists(self.metadata_path(server_id))
            .await
            .unwrap_or(false)
    }

    /// 서버 데이터 디렉토리가 존재하는지 확인합니다.
    pub async fn dir_exists(&self, server_id: &str) -> bool {
        tokio::fs::metadata(self.server_dir(server_id))
            .await
            .is_ok_and(|m| m.is_dir())
    }

    /// 메타데이터를 읽고 검증합니다.
    ///
    /// # Errors
    /// - `NotFound`: 레코드 파일이 없음
    /// - `Metadata`: JSON 파싱 실패 또는 레코드의 ID가 디렉토리와 다름
    /// - `Validation`: 값이 허용 범위를 벗어남
    pub async fn read(&self, server_id: &str) -> Result<ServerMetadata, ManagerError> {
        validate_server_id(server_id)?;

        let path = self.metadata_path(server_id);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ManagerError::NotFound(server_id.to_owned())
            } else {
                ManagerError::Io(e)
            }
        })?;

        let mut metadata: ServerMetadata =
            serde_json::from_str(&content).map_err(|e| ManagerError::Metadata {
                server_id: server_id.to_owned(),
                reason: e.to_string(),
            })?;

        // 디렉토리 이름이 ID의 원천
        if metadata.server_id.is_empty() {
            metadata.server_id = server_id.to_owned();
        } else if metadata.server_id != server_id {
            return Err(ManagerError::Metadata {
                server_id: server_id.to_owned(),
                reason: format!(
                    "record id '{}' does not match directory",
                    metadata.server_id
                ),
            });
        }

        metadata.validate()?;
        Ok(metadata)
    }

    /// 메타데이터를 검증 후 원자적으로 기록합니다.
    pub async fn write(&self, metadata: &ServerMetadata) -> Result<(), ManagerError> {
        metadata.validate()?;

        let dir = self.server_dir(&metadata.server_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut record = metadata.clone();
        if record.created_at.is_none() {
            record.created_at = Some(unix_now());
        }

        let json = serde_json::to_vec_pretty(&record).map_err(|e| ManagerError::Metadata {
            server_id: metadata.server_id.clone(),
            reason: e.to_string(),
        })?;

        let final_path = dir.join(METADATA_FILE);
        let tmp_path = dir.join(format!("{METADATA_FILE}.tmp"));
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        debug!(server_id = %metadata.server_id, "metadata written");
        Ok(())
    }

    /// 서버 디렉토리 전체(데이터 포함)를 삭제합니다.
    pub async fn remove(&self, server_id: &str) -> Result<(), ManagerError> {
        validate_server_id(server_id)?;
        match tokio::fs::remove_dir_all(self.server_dir(server_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ManagerError::NotFound(server_id.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 메타데이터 파일이 있는 모든 서버 디렉토리를 스캔합니다.
    ///
    /// 손상된 레코드는 건너뛰지 않고 에러와 함께 반환합니다.
    /// 결과는 서버 ID 순으로 정렬됩니다.
    pub async fn scan(&self) -> Result<Vec<ScanEntry>, ManagerError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(path = %entry.path().display(), "skipping non-utf8 server directory");
                continue;
            };
            if validate_server_id(&id).is_err() {
                debug!(dir = %id, "skipping directory with invalid server id");
                continue;
            }
            if tokio::fs::try_exists(entry.path().join(METADATA_FILE))
                .await
                .unwrap_or(false)
            {
                ids.push(id);
            }
        }
        ids.sort();

        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            let record = self.read(&id).await;
            result.push((id, record));
        }
        Ok(result)
    }

    /// 서버 디렉토리 내부의 상대 경로를 안전한 절대 경로로 변환합니다.
    ///
    /// 절대 경로와 `..` 구성 요소는 거부하며, 정규화된 상대 경로를 함께 반환합니다.
    pub fn resolve_file(
        &self,
        server_id: &str,
        relative: &str,
    ) -> Result<(PathBuf, String), ManagerError> {
        validate_server_id(server_id)?;
        let normalized = normalize_relative(relative)?;
        Ok((self.server_dir(server_id).join(&normalized), normalized))
    }
}

/// 상대 경로를 정규화합니다 (`.` 제거, 구분자 통일).
pub fn normalize_relative(relative: &str) -> Result<String, ManagerError> {
    let invalid = |reason: &str| ManagerError::Validation {
        field: "path".to_owned(),
        reason: reason.to_owned(),
    };

    let mut parts = Vec::new();
    for component in Path::new(relative.trim()).components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| invalid("path must be valid utf-8"))?;
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("parent directory references are not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute paths are not allowed"));
            }
        }
    }

    if parts.is_empty() {
        return Err(invalid("path must not be empty"));
    }
    Ok(parts.join("/"))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
