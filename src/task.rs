use crate::error::{Error, Result};
use crate::filter::{CropRect, FilterChain, PixelCrop};
use crate::resolution::{self, ResizeMode};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Gif,
    Webp,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Gif => "gif",
            OutputFormat::Webp => "webp",
        }
    }
}

/// One source file to convert, fully resolved. Immutable once handed to a runner.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionTask {
    pub source: PathBuf,
    /// Canonical output path; the orchestrator picks a free variant of it.
    pub output: PathBuf,
    pub format: OutputFormat,
    pub quality: u8,
    pub fps: f64,
    pub trim_start_secs: f64,
    pub trim_duration_secs: Option<f64>,
    pub crop: Option<CropRect>,
    pub resize: ResizeMode,
    pub orig_width: u32,
    pub orig_height: u32,
    /// Advisory; from a fallible probe.
    pub source_duration_secs: Option<f64>,
}

impl ConversionTask {
    /// Checks user-supplied values before anything is launched. The source
    /// file itself is checked per task by [`ConversionTask::check_source`].
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(Error::InvalidParameter(format!(
                "quality must be between 1 and 100, got {}",
                self.quality
            )));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "fps must be positive, got {}",
                self.fps
            )));
        }
        if !self.trim_start_secs.is_finite() || self.trim_start_secs < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "trim start must not be negative, got {}",
                self.trim_start_secs
            )));
        }
        if let Some(duration) = self.trim_duration_secs {
            if !duration.is_finite() || duration <= 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "trim duration must be positive, got {duration}"
                )));
            }
        }
        self.filter_chain().map(|_| ())
    }

    pub fn check_source(&self) -> Result<()> {
        if self.source.exists() {
            Ok(())
        } else {
            Err(Error::InputNotFound(self.source.clone()))
        }
    }

    fn pixel_crop(&self) -> Result<Option<PixelCrop>> {
        self.crop
            .map(|crop| crop.to_pixels(self.orig_width, self.orig_height))
            .transpose()
    }

    /// Even output size, computed from the cropped region when a crop is set.
    pub fn output_dimensions(&self) -> Result<(u32, u32)> {
        let (base_width, base_height) = match self.pixel_crop()? {
            Some(crop) => (crop.width, crop.height),
            None => (self.orig_width, self.orig_height),
        };
        resolution::resolve(base_width, base_height, self.resize)
    }

    pub fn filter_chain(&self) -> Result<FilterChain> {
        let crop = self.pixel_crop()?;
        let (width, height) = self.output_dimensions()?;
        Ok(FilterChain::build(crop, width, height, self.fps))
    }

    pub fn file_name(&self) -> String {
        display_name(&self.source)
    }
}

/// File name of `path`, or the whole path when it has none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `<dir>/<source stem>.<ext>`, where `dir` defaults to the source's folder.
pub fn canonical_output_path(
    source: &Path,
    output_dir: Option<&Path>,
    format: OutputFormat,
) -> Result<PathBuf> {
    let stem = source
        .file_stem()
        .ok_or_else(|| Error::InvalidParameter("input has no file stem".into()))?;
    let folder = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => source.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    Ok(folder.join(stem).with_extension(format.extension()))
}

fn reserve(candidate: &Path) -> Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(candidate) {
        Ok(_) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(error) => Err(Error::Io(io::Error::new(
            error.kind(),
            format!("could not create {}: {error}", candidate.display()),
        ))),
    }
}

/// Claims the first free name of `name.ext`, `name_1.ext`, `name_2.ext`, ...
/// by creating it empty, so no other writer can take it in between. The
/// output folder is created if needed.
pub fn reserve_output_path(canonical: &Path) -> Result<PathBuf> {
    if let Some(folder) = canonical.parent() {
        if !folder.as_os_str().is_empty() {
            std::fs::create_dir_all(folder)?;
        }
    }

    if reserve(canonical)? {
        return Ok(canonical.to_path_buf());
    }

    let stem = canonical
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();
    let extension = canonical
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()))
        .unwrap_or_default();

    let mut counter: u32 = 1;
    loop {
        let candidate = canonical.with_file_name(format!("{stem}_{counter}{extension}"));
        if reserve(&candidate)? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

/// A request after probing: a runnable task, or the reason its source could
/// not be read. Unreadable sources fail on their own without stopping the batch.
#[derive(Debug)]
pub enum PreparedTask {
    Ready(ConversionTask),
    Unreadable { source: PathBuf, error: Error },
}

impl PreparedTask {
    pub fn source(&self) -> &Path {
        match self {
            PreparedTask::Ready(task) => &task.source,
            PreparedTask::Unreadable { source, .. } => source,
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            PreparedTask::Ready(task) => task.file_name(),
            PreparedTask::Unreadable { source, .. } => display_name(source),
        }
    }
}

impl From<ConversionTask> for PreparedTask {
    fn from(task: ConversionTask) -> Self {
        PreparedTask::Ready(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(source: PathBuf) -> ConversionTask {
        ConversionTask {
            output: source.with_extension("gif"),
            source,
            format: OutputFormat::Gif,
            quality: 60,
            fps: 10.0,
            trim_start_secs: 0.0,
            trim_duration_secs: None,
            crop: None,
            resize: ResizeMode::Original,
            orig_width: 640,
            orig_height: 480,
            source_duration_secs: Some(10.0),
        }
    }

    fn existing_source() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"video").unwrap();
        (dir, source)
    }

    #[test]
    fn valid_task_passes() {
        let (_dir, source) = existing_source();
        assert!(task(source).validate().is_ok());
    }

    #[test]
    fn missing_source_is_a_per_task_check() {
        let task = task(PathBuf::from("/definitely/not/here.mp4"));
        assert!(task.validate().is_ok());
        assert!(matches!(task.check_source(), Err(Error::InputNotFound(_))));
    }

    #[test]
    fn quality_out_of_range_is_rejected() {
        let (_dir, source) = existing_source();
        for quality in [0, 101] {
            let mut task = task(source.clone());
            task.quality = quality;
            assert!(matches!(task.validate(), Err(Error::InvalidParameter(_))));
        }
    }

    #[test]
    fn zero_fps_is_rejected() {
        let (_dir, source) = existing_source();
        let mut task = task(source);
        task.fps = 0.0;
        assert!(matches!(task.validate(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn zero_trim_duration_is_rejected() {
        let (_dir, source) = existing_source();
        let mut task = task(source);
        task.trim_duration_secs = Some(0.0);
        assert!(matches!(task.validate(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn crop_drives_output_dimensions() {
        let mut task = task(PathBuf::from("clip.mp4"));
        task.crop = Some(CropRect {
            x: 0.0,
            y: 0.0,
            width: 0.5,
            height: 0.5,
        });
        assert_eq!(task.output_dimensions().unwrap(), (320, 240));
    }

    #[test]
    fn canonical_path_uses_source_folder() {
        let path =
            canonical_output_path(Path::new("/videos/clip.mp4"), None, OutputFormat::Webp).unwrap();
        assert_eq!(path, PathBuf::from("/videos/clip.webp"));
    }

    #[test]
    fn canonical_path_honours_output_dir() {
        let path = canonical_output_path(
            Path::new("/videos/clip.mp4"),
            Some(Path::new("/out")),
            OutputFormat::Gif,
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("/out/clip.gif"));
    }

    #[test]
    fn free_path_is_claimed() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join("name.gif");
        assert_eq!(reserve_output_path(&canonical).unwrap(), canonical);
        assert!(canonical.exists());
    }

    #[test]
    fn collisions_get_numeric_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join("name.gif");
        std::fs::write(&canonical, b"first").unwrap();
        assert_eq!(
            reserve_output_path(&canonical).unwrap(),
            dir.path().join("name_1.gif")
        );
        assert_eq!(
            reserve_output_path(&canonical).unwrap(),
            dir.path().join("name_2.gif")
        );
        assert_eq!(std::fs::read(&canonical).unwrap(), b"first");
    }

    #[test]
    fn missing_output_folder_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join("exports/today/name.gif");
        assert_eq!(reserve_output_path(&canonical).unwrap(), canonical);
        assert!(dir.path().join("exports/today").is_dir());
    }

    #[test]
    fn unreadable_task_keeps_its_file_name() {
        let prepared = PreparedTask::Unreadable {
            source: PathBuf::from("/videos/bad.mp4"),
            error: Error::ProbeFailed("Invalid data found".into()),
        };
        assert_eq!(prepared.file_name(), "bad.mp4");
        assert_eq!(prepared.source(), Path::new("/videos/bad.mp4"));
    }
}
