//! Target paths for downloaded files.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::expand_path;
use crate::error::AppError;
use crate::format::{Formatter, clean_path_segment};
use crate::job::JobScope;
use crate::message::Kwdict;
use crate::traits::DownloadTarget;

const DEFAULT_BASE_DIRECTORY: &str = "./sluice/";

/// Renders directory and file names from item metadata and writes the
/// downloaded bytes to disk.
pub struct PathFormat {
    base: PathBuf,
    directory_fmt: Vec<Formatter>,
    filename_fmt: Formatter,
    skip: bool,
    part: bool,
    kwdict: Kwdict,
    directory: PathBuf,
    filename: String,
    path: PathBuf,
    file: Option<File>,
    written: u64,
}

impl PathFormat {
    pub fn new(base: impl Into<PathBuf>, directory_fmt: &[String], filename_fmt: &str) -> Result<Self, AppError> {
        let directory_fmt = directory_fmt
            .iter()
            .map(|t| Formatter::new(t))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::format("directory", e))?;
        let filename_fmt = Formatter::new(filename_fmt).map_err(|e| AppError::format("filename", e))?;
        let base = base.into();

        Ok(Self {
            directory: base.clone(),
            path: base.clone(),
            base,
            directory_fmt,
            filename_fmt,
            skip: true,
            part: false,
            kwdict: Kwdict::new(),
            filename: String::new(),
            file: None,
            written: 0,
        })
    }

    /// Build a formatter from the job's extractor and its configuration.
    pub fn from_scope(scope: &JobScope<'_>) -> Result<Self, AppError> {
        let base = match scope.config("base-directory") {
            Some(Value::String(s)) => expand_path(s),
            Some(other) => {
                return Err(AppError::Config(format!("invalid base-directory: {other}")));
            }
            None => PathBuf::from(DEFAULT_BASE_DIRECTORY),
        };
        let directory_fmt = match scope.config("directory") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| AppError::Config(format!("invalid directory segment: {v}")))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => return Err(AppError::Config(format!("invalid directory: {other}"))),
            None => scope.extractor.directory_fmt(),
        };
        let filename_fmt = match scope.config("filename") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(AppError::Config(format!("invalid filename: {other}"))),
            None => scope.extractor.filename_fmt().to_string(),
        };
        let default = scope.config("keywords-default").cloned();
        let skip = scope.config("skip").and_then(Value::as_bool).unwrap_or(true);

        let mut pathfmt = Self::new(base, &directory_fmt, &filename_fmt)?.with_skip(skip);
        if default.is_some() {
            pathfmt = pathfmt.with_default(default);
        }
        Ok(pathfmt)
    }

    pub fn with_skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Value used for template keys missing from the metadata.
    pub fn with_default(mut self, default: Option<Value>) -> Self {
        self.directory_fmt = self
            .directory_fmt
            .into_iter()
            .map(|f| f.with_default(default.clone()))
            .collect();
        self.filename_fmt = self.filename_fmt.with_default(default);
        self
    }

    /// Render the directory for the following items and create it.
    pub fn set_directory(&mut self, kwdict: &Kwdict) -> Result<(), AppError> {
        let mut directory = self.base.clone();
        for fmt in &self.directory_fmt {
            let segment = fmt.format(kwdict).map_err(|e| AppError::format("directory", e))?;
            let segment = clean_path_segment(segment.trim());
            if !segment.is_empty() {
                directory.push(segment);
            }
        }
        std::fs::create_dir_all(&directory)?;
        self.directory = directory;
        Ok(())
    }

    /// Bind the metadata of the next item.
    pub fn set_keywords(&mut self, kwdict: &Kwdict) -> Result<(), AppError> {
        self.kwdict = kwdict.clone();
        self.file = None;
        self.written = 0;
        self.build_path()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn extension(&self) -> Option<&str> {
        match self.kwdict.get("extension") {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    fn build_path(&mut self) -> Result<(), AppError> {
        if self.extension().is_some() {
            let filename = self
                .filename_fmt
                .format(&self.kwdict)
                .map_err(|e| AppError::format("filename", e))?;
            self.filename = clean_path_segment(&filename);
            self.path = self.directory.join(&self.filename);
        } else {
            self.filename.clear();
            self.path = self.directory.clone();
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        if self.part {
            let mut path = self.path.clone().into_os_string();
            path.push(".part");
            PathBuf::from(path)
        } else {
            self.path.clone()
        }
    }

    fn sniff_extension(&self, file: &Path) -> Option<&'static str> {
        let extension = self.extension()?;
        let mut header = [0u8; 8];
        let mut handle = File::open(file).ok()?;
        handle.read_exact(&mut header).ok()?;
        check_extension(extension, &header)
    }
}

impl DownloadTarget for PathFormat {
    fn path(&self) -> &Path {
        &self.path
    }

    fn filename(&self) -> &str {
        &self.filename
    }

    fn has_extension(&self) -> bool {
        self.extension().is_some()
    }

    fn set_extension(&mut self, extension: &str) -> Result<(), AppError> {
        self.kwdict
            .insert("extension".to_string(), Value::String(extension.to_string()));
        self.build_path()
    }

    fn exists(&self) -> bool {
        self.skip && self.has_extension() && self.path.exists()
    }

    fn part_enable(&mut self) {
        self.part = true;
    }

    fn part_size(&self) -> u64 {
        if !self.part || !self.has_extension() {
            return 0;
        }
        std::fs::metadata(self.temp_path()).map_or(0, |m| m.len())
    }

    fn open(&mut self, offset: u64) -> Result<(), AppError> {
        if !self.has_extension() {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "missing filename extension",
            )));
        }
        let temp = self.temp_path();
        let file = if offset > 0 {
            OpenOptions::new().append(true).open(&temp)?
        } else {
            File::create(&temp)?
        };
        self.file = Some(file);
        self.written = offset;
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), AppError> {
        let file = self.file.as_mut().ok_or_else(|| {
            AppError::Io(std::io::Error::other("write to a target that is not open"))
        })?;
        file.write_all(chunk)?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written
    }

    fn finish(&mut self) -> Result<(), AppError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        let temp = self.temp_path();
        if let Some(actual) = self.sniff_extension(&temp) {
            tracing::debug!(path = %self.path.display(), extension = actual, "Adjusting filename extension");
            self.set_extension(actual)?;
        }
        if temp != self.path {
            std::fs::rename(&temp, &self.path)?;
        }
        Ok(())
    }

    fn discard(&mut self) {
        self.file = None;
        if !self.part && self.has_extension() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Compare a file header against the signature expected for `extension`.
///
/// Returns the extension the header actually belongs to when it does not
/// match and another known signature does.
pub fn check_extension(extension: &str, header: &[u8]) -> Option<&'static str> {
    const KNOWN: [&str; 3] = ["jpg", "png", "gif"];

    if header.len() < 8 || !KNOWN.contains(&extension) || signature_matches(extension, header) {
        return None;
    }
    KNOWN
        .into_iter()
        .find(|ext| *ext != extension && signature_matches(ext, header))
}

fn signature_matches(extension: &str, header: &[u8]) -> bool {
    match extension {
        "jpg" => header.starts_with(b"\xff\xd8"),
        "png" => header.starts_with(b"\x89PNG\r\n\x1a\n"),
        "gif" => header.starts_with(b"GIF8") && header.get(5) == Some(&b'a'),
        _ => false,
    }
}
