//! 文件夹扫描
//!
//! 把用户给出的路径（文件或文件夹）展开成待上传的文件列表
//!
//! 文件夹内的条目按名称过滤：包含模式为空时不限制，跳过模式优先；
//! 默认只过滤文件，`filter_dirs` 打开后文件夹不匹配时整棵子树都会跳过。
//! 直接给出的文件路径不参与过滤

use crate::config::UploadConfig;
use crate::uploader::batch::FileSelection;
use anyhow::{Context, Result};
use regex::RegexSet;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// 文件夹扫描配置
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// 是否跟随符号链接
    pub follow_symlinks: bool,
    /// 跳过隐藏文件（以.开头的文件和文件夹）
    pub skip_hidden: bool,
    /// 只保留名称匹配任一模式的条目
    pub filter: RegexSet,
    /// 跳过名称匹配任一模式的条目
    pub skip: RegexSet,
    /// 包含 / 跳过模式同样作用于文件夹
    pub filter_dirs: bool,
    /// 从扫描根目录往下，依次把各级目录名作为这些 key 的标签值
    pub folder_tags: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            skip_hidden: false,
            filter: RegexSet::empty(),
            skip: RegexSet::empty(),
            filter_dirs: false,
            folder_tags: Vec::new(),
        }
    }
}

impl From<&UploadConfig> for ScanOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            follow_symlinks: config.follow_symlinks,
            skip_hidden: config.skip_hidden_files,
            ..Default::default()
        }
    }
}

impl ScanOptions {
    /// 编译包含 / 跳过模式
    pub fn with_patterns(mut self, filter: &[String], skip: &[String]) -> Result<Self> {
        self.filter = RegexSet::new(filter).context("包含模式不是合法的正则表达式")?;
        self.skip = RegexSet::new(skip).context("跳过模式不是合法的正则表达式")?;
        Ok(self)
    }

    /// 名称是否通过包含 / 跳过模式
    fn matches(&self, name: &str) -> bool {
        (self.filter.is_empty() || self.filter.is_match(name)) && !self.skip.is_match(name)
    }

    /// 扫描时是否保留该条目（根目录之外）
    fn accepts(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if self.skip_hidden && name.starts_with('.') {
            return false;
        }
        if entry.file_type().is_dir() && !self.filter_dirs {
            return true;
        }
        self.matches(&name)
    }
}

/// 文件夹扫描器
#[derive(Debug, Default)]
pub struct FolderScanner {
    options: ScanOptions,
}

impl FolderScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ScanOptions) -> Self {
        Self { options }
    }

    /// 展开一组路径
    ///
    /// 文件直接加入，文件夹递归扫描；同一个文件只出现一次，保持输入顺序
    pub fn expand<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<FileSelection>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let found = if path.is_dir() {
                self.scan(path)?
            } else {
                let metadata = std::fs::metadata(path)
                    .with_context(|| format!("读取文件元数据失败: {}", path.display()))?;
                vec![FileSelection::new(path, metadata.len())]
            };
            for file in found {
                if seen.insert(file.path.clone()) {
                    files.push(file);
                }
            }
        }
        Ok(files)
    }

    /// 递归扫描文件夹，按路径排序
    pub fn scan<P: AsRef<Path>>(&self, root_path: P) -> Result<Vec<FileSelection>> {
        let root_path = root_path.as_ref();

        if !root_path.exists() {
            anyhow::bail!("扫描路径不存在: {}", root_path.display());
        }
        if !root_path.is_dir() {
            anyhow::bail!("扫描路径不是文件夹: {}", root_path.display());
        }

        info!("开始扫描文件夹: {}", root_path.display());

        let options = &self.options;
        let walker = WalkDir::new(root_path)
            .follow_links(options.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            // 根目录本身总是扫描
            .filter_entry(|entry| entry.depth() == 0 || options.accepts(entry));

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("跳过无法访问的路径: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                debug!("跳过非常规文件: {}", entry.path().display());
                continue;
            }
            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!("读取文件元数据失败: {}, 错误: {}", entry.path().display(), e);
                    continue;
                }
            };
            debug!(
                "发现文件: {}",
                display_relative(root_path, entry.path()).display()
            );
            files.push(self.tag_folders(root_path, FileSelection::new(entry.into_path(), size)));
        }

        info!(
            "文件夹扫描完成: {} 个文件，总大小 {}",
            files.len(),
            format_bytes(files.iter().map(|f| f.size).sum())
        );

        Ok(files)
    }
}

impl FolderScanner {
    /// 按目录层级加标签：root/emotet/2024/a.exe 配合 [family, year] 得到 family=emotet, year=2024
    fn tag_folders(&self, root: &Path, mut file: FileSelection) -> FileSelection {
        if self.options.folder_tags.is_empty() {
            return file;
        }
        let Some(parent) = file.path.parent().and_then(|p| p.strip_prefix(root).ok()) else {
            return file;
        };
        let folders: Vec<String> = parent
            .iter()
            .filter_map(|c| c.to_str().map(str::to_string))
            .collect();
        for (key, folder) in self.options.folder_tags.iter().zip(folders.iter()) {
            file = file.with_tag(key, folder);
        }
        file
    }
}

/// 格式化字节大小
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// 相对根目录的路径，仅用于展示
pub fn display_relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}
