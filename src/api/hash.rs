// 本地文件哈希
//
// 服务器返回 409（文件已存在）时不会给出 sha256，需要在本地计算后继续提交反应

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// 计算文件的 sha256（小写十六进制）
///
/// 在阻塞线程池中读取文件，不占用异步工作线程
pub async fn sha256_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_file_sync(&path))
        .await
        .context("计算哈希任务执行失败")?
}

fn sha256_file_sync(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path).with_context(|| format!("无法打开文件: {:?}", path))?;
    let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];
    loop {
        let bytes_read = reader.read(&mut buffer).context("读取文件失败")?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let sha256 = hex::encode(hasher.finalize());
    debug!("文件哈希计算完成: path={:?}, sha256={}", path, sha256);
    Ok(sha256)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sha256_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(
            sha256_file(&empty).await.unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        assert!(sha256_file(&dir.path().join("missing.bin")).await.is_err());
    }
}
