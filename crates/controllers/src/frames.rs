//! Frame sequence: loading, lookup and navigation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use samnotator_common::{SamnotatorError, SamnotatorResult};
use samnotator_project_model::FrameId;

use crate::events::{ControllerEvent, EventQueue};

/// Extensions accepted by [`ExtensionFilter::Default`].
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "bmp", "tiff", "tif", "gif", "webp"];

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

/// Position of a frame inside a video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFrameInfo {
    pub frame_index: usize,
    pub frame_count: usize,
    pub fps: Option<f32>,
}

/// Dimensions of a loaded frame, by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub width: u32,
    pub height: u32,
}

/// Something that can produce the pixels of one frame on demand.
pub trait FrameSource: std::fmt::Debug {
    /// Decode the full frame.
    fn load_rgba(&self) -> SamnotatorResult<image::RgbaImage>;

    /// How the frame is loaded, e.g. its path. Stored in project files.
    fn load_info(&self) -> String;

    /// Dimensions, known without decoding.
    fn image_info(&self) -> ImageInfo;

    fn video_info(&self) -> Option<VideoFrameInfo>;

    /// Backing file, when there is one.
    fn path(&self) -> Option<&Path>;
}

/// A frame stored as an image file.
#[derive(Debug, Clone, PartialEq)]
pub struct PathFrame {
    pub path: PathBuf,
    pub info: ImageInfo,
    pub video: Option<VideoFrameInfo>,
}

impl FrameSource for PathFrame {
    fn load_rgba(&self) -> SamnotatorResult<image::RgbaImage> {
        Ok(image::open(&self.path)?.to_rgba8())
    }

    fn load_info(&self) -> String {
        self.path.display().to_string()
    }

    fn image_info(&self) -> ImageInfo {
        self.info
    }

    fn video_info(&self) -> Option<VideoFrameInfo> {
        self.video
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Build frame sources from image files, keeping their order.
///
/// Only image headers are read. Unreadable files and empty images are
/// skipped. With `is_video`, frames are numbered among the kept files.
pub fn frame_sources_from_paths(
    paths: &[PathBuf],
    is_video: bool,
    fps: Option<f32>,
) -> Vec<Box<dyn FrameSource>> {
    let valid: Vec<(&PathBuf, ImageInfo)> = paths
        .iter()
        .filter_map(|path| match image::image_dimensions(path) {
            Ok((0, _)) | Ok((_, 0)) => {
                tracing::debug!(path = %path.display(), "Skipping empty image");
                None
            }
            Ok((width, height)) => Some((path, ImageInfo { width, height })),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable image");
                None
            }
        })
        .collect();

    let frame_count = valid.len();
    valid
        .into_iter()
        .enumerate()
        .map(|(frame_index, (path, info))| {
            let video = is_video.then_some(VideoFrameInfo {
                frame_index,
                frame_count,
                fps,
            });
            Box::new(PathFrame {
                path: path.clone(),
                info,
                video,
            }) as Box<dyn FrameSource>
        })
        .collect()
}

/// Which files `open_images` keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExtensionFilter {
    /// Common image formats, see [`DEFAULT_IMAGE_EXTENSIONS`].
    #[default]
    Default,
    /// Case-insensitive set of extensions, with or without the leading dot.
    Custom(HashSet<String>),
    /// Keep every path.
    All,
}

impl ExtensionFilter {
    /// Custom filter from a list of extensions.
    pub fn custom<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ExtensionFilter::Custom(
            extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        )
    }

    /// Whether `path` passes the filter. Default and custom filters only
    /// accept regular files.
    pub fn accepts(&self, path: &Path) -> bool {
        let extension = || {
            path.extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
        };
        match self {
            ExtensionFilter::All => true,
            ExtensionFilter::Default => {
                path.is_file()
                    && extension().is_some_and(|e| DEFAULT_IMAGE_EXTENSIONS.contains(&e.as_str()))
            }
            ExtensionFilter::Custom(set) => {
                path.is_file() && extension().is_some_and(|e| set.contains(&e))
            }
        }
    }
}

/// Owns the loaded frames and the current position in the sequence.
#[derive(Debug, Default)]
pub struct FrameController {
    sources: Vec<Box<dyn FrameSource>>,
    current: Option<usize>,
    events: EventQueue,
}

impl FrameController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the loaded frames. Frame ids are `0..n`; the first frame
    /// becomes current.
    pub fn reset(&mut self, sources: Option<Vec<Box<dyn FrameSource>>>) {
        self.sources = sources.unwrap_or_default();
        self.current = if self.sources.is_empty() { None } else { Some(0) };
        tracing::info!(frames = self.sources.len(), "Frames loaded");
        self.events
            .push(ControllerEvent::CurrentFrameChanged(self.current_frame_id()));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// All frame ids, in sequence order.
    pub fn frame_ids(&self) -> Vec<FrameId> {
        (0..self.sources.len() as u32).map(FrameId).collect()
    }

    /// Position of `frame_id` in the sequence.
    pub fn index_of(&self, frame_id: FrameId) -> SamnotatorResult<usize> {
        let index = frame_id.0 as usize;
        if index < self.sources.len() {
            Ok(index)
        } else {
            Err(SamnotatorError::frame(format!("Frame ID {frame_id} not found.")))
        }
    }

    fn source(&self, frame_id: FrameId) -> SamnotatorResult<&dyn FrameSource> {
        let index = self.index_of(frame_id)?;
        Ok(self.sources[index].as_ref())
    }

    fn set_current_index(&mut self, index: Option<usize>) -> Option<FrameId> {
        if self.current != index {
            self.current = index;
            self.events
                .push(ControllerEvent::CurrentFrameChanged(self.current_frame_id()));
        }
        self.current_frame_id()
    }

    /// Select a frame, or clear the selection.
    pub fn set_current_frame_id(&mut self, frame_id: Option<FrameId>) -> SamnotatorResult<()> {
        let index = frame_id.map(|id| self.index_of(id)).transpose()?;
        self.set_current_index(index);
        Ok(())
    }

    pub fn current_frame_id(&self) -> Option<FrameId> {
        self.current.map(|i| FrameId(i as u32))
    }

    pub fn frame_path(&self, frame_id: FrameId) -> SamnotatorResult<Option<PathBuf>> {
        Ok(self.source(frame_id)?.path().map(Path::to_path_buf))
    }

    pub fn frame_info(&self, frame_id: FrameId) -> SamnotatorResult<FrameInfo> {
        let info = self.source(frame_id)?.image_info();
        Ok(FrameInfo {
            frame_id,
            width: info.width,
            height: info.height,
        })
    }

    pub fn frame_load_info(&self, frame_id: FrameId) -> SamnotatorResult<String> {
        Ok(self.source(frame_id)?.load_info())
    }

    pub fn video_info(&self, frame_id: FrameId) -> SamnotatorResult<Option<VideoFrameInfo>> {
        Ok(self.source(frame_id)?.video_info())
    }

    /// Decode the pixels of a frame.
    pub fn load_frame(&self, frame_id: FrameId) -> SamnotatorResult<image::RgbaImage> {
        self.source(frame_id)?.load_rgba()
    }

    /// Step forward, staying on the last frame.
    pub fn next_frame(&mut self) -> Option<FrameId> {
        let current = self.current?;
        let next = (current + 1).min(self.sources.len() - 1);
        self.set_current_index(Some(next))
    }

    /// Step back, staying on the first frame.
    pub fn previous_frame(&mut self) -> Option<FrameId> {
        let current = self.current?;
        self.set_current_index(Some(current.saturating_sub(1)))
    }

    /// Load `paths` as the new frame sequence, keeping those `filter` accepts.
    pub fn open_images(&mut self, paths: &[PathBuf], filter: &ExtensionFilter) {
        let kept: Vec<PathBuf> = paths.iter().filter(|p| filter.accepts(p)).cloned().collect();
        if kept.len() != paths.len() {
            tracing::debug!(
                given = paths.len(),
                kept = kept.len(),
                "Filtered frame paths by extension"
            );
        }
        let sources = frame_sources_from_paths(&kept, false, None);
        self.reset(Some(sources));
    }

    /// Load every image of `dir`, in natural order (`img2` before `img10`).
    pub fn open_folder(&mut self, dir: &Path, filter: &ExtensionFilter) -> SamnotatorResult<()> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        alphanumeric_sort::sort_path_slice(&mut paths);
        self.open_images(&paths, filter);
        Ok(())
    }

    /// Open a folder or a single image.
    pub fn open_path(&mut self, path: &Path) -> SamnotatorResult<()> {
        self.open_path_filtered(path, &ExtensionFilter::Default)
    }

    /// [`FrameController::open_path`] with an explicit extension filter.
    pub fn open_path_filtered(
        &mut self,
        path: &Path,
        filter: &ExtensionFilter,
    ) -> SamnotatorResult<()> {
        if path.is_dir() {
            self.open_folder(path, filter)
        } else if path.is_file() {
            self.open_images(&[path.to_path_buf()], filter);
            Ok(())
        } else {
            Err(SamnotatorError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
    }

    /// Take pending events.
    pub fn drain_events(&mut self) -> Vec<ControllerEvent> {
        self.events.drain()
    }
}
