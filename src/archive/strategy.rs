use anyhow::{Context, Error};
use regex::Regex;

use h5ar_container::StorageFeatures;

/// Default deflate level used for compressed entries.
pub const DEFAULT_DEFLATE_LEVEL: u8 = 6;

fn full_match(pattern: &str) -> Result<Regex, Error> {
    Regex::new(&format!("^(?:{pattern})$"))
        .with_context(|| format!("invalid path pattern {pattern:?}"))
}

fn matches_any(patterns: &[Regex], path: &str) -> bool {
    patterns.iter().any(|re| re.is_match(path))
}

/// Decides which paths are archived or extracted and how files are stored.
///
/// Patterns are regular expressions which have to match the complete archive path. An
/// empty include list admits everything, an exclude match always wins.
#[derive(Clone, Debug)]
pub struct ArchivingStrategy {
    file_include: Vec<Regex>,
    file_exclude: Vec<Regex>,
    dir_include: Vec<Regex>,
    dir_exclude: Vec<Regex>,
    compress: bool,
    compression_include: Vec<Regex>,
    compression_exclude: Vec<Regex>,
    deflate_level: u8,
}

impl Default for ArchivingStrategy {
    fn default() -> Self {
        Self {
            file_include: Vec::new(),
            file_exclude: Vec::new(),
            dir_include: Vec::new(),
            dir_exclude: Vec::new(),
            compress: false,
            compression_include: Vec::new(),
            compression_exclude: Vec::new(),
            deflate_level: DEFAULT_DEFLATE_LEVEL,
        }
    }
}

impl ArchivingStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only archive files matching one of the include patterns.
    pub fn include_files(mut self, pattern: &str) -> Result<Self, Error> {
        self.file_include.push(full_match(pattern)?);
        Ok(self)
    }

    pub fn exclude_files(mut self, pattern: &str) -> Result<Self, Error> {
        self.file_exclude.push(full_match(pattern)?);
        Ok(self)
    }

    /// Only archive directories matching one of the include patterns.
    pub fn include_dirs(mut self, pattern: &str) -> Result<Self, Error> {
        self.dir_include.push(full_match(pattern)?);
        Ok(self)
    }

    pub fn exclude_dirs(mut self, pattern: &str) -> Result<Self, Error> {
        self.dir_exclude.push(full_match(pattern)?);
        Ok(self)
    }

    /// Enable or disable compression for all files.
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn deflate_level(mut self, level: u8) -> Self {
        self.deflate_level = level.min(9);
        self
    }

    /// Restrict compression to files matching one of the patterns.
    pub fn compress_matching(mut self, pattern: &str) -> Result<Self, Error> {
        self.compress = true;
        self.compression_include.push(full_match(pattern)?);
        Ok(self)
    }

    /// Never compress files matching the pattern.
    pub fn never_compress(mut self, pattern: &str) -> Result<Self, Error> {
        self.compression_exclude.push(full_match(pattern)?);
        Ok(self)
    }

    /// Whether the entry at `path` is archived (or extracted).
    pub fn should_include(&self, path: &str, is_dir: bool) -> bool {
        let (include, exclude) = if is_dir {
            (&self.dir_include, &self.dir_exclude)
        } else {
            (&self.file_include, &self.file_exclude)
        };

        if matches_any(exclude, path) {
            return false;
        }

        include.is_empty() || matches_any(include, path)
    }

    /// Storage features for the file at `path`.
    pub fn compression_for(&self, path: &str) -> StorageFeatures {
        if !self.compress
            || matches_any(&self.compression_exclude, path)
            || !(self.compression_include.is_empty()
                || matches_any(&self.compression_include, path))
        {
            return StorageFeatures::UNCOMPRESSED;
        }

        StorageFeatures::deflate(self.deflate_level)
    }
}
