use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::errors::{ErrorLog, ViewerError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("asset path must not be empty")]
    EmptyPath,
    #[error("asset path '{path}' must be relative to the asset root")]
    AbsolutePath { path: String },
    #[error("asset path '{path}' must not contain '\\'")]
    Backslash { path: String },
    #[error("asset path '{path}' must not contain '..'")]
    ParentTraversal { path: String },
}

fn validate_asset_path(path: &str) -> Result<(), AssetError> {
    if path.is_empty() {
        return Err(AssetError::EmptyPath);
    }
    if path.starts_with('/') || Path::new(path).is_absolute() {
        return Err(AssetError::AbsolutePath {
            path: path.to_string(),
        });
    }
    if path.contains('\\') {
        return Err(AssetError::Backslash {
            path: path.to_string(),
        });
    }
    if path.split('/').any(|part| part == "..") {
        return Err(AssetError::ParentTraversal {
            path: path.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What a texture-bearing entity draws.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Texture {
    Empty,
    /// Blank stand-in for an image that is unknown or failed to load.
    Placeholder { name: String },
    Image {
        source: String,
        region: Option<Region>,
    },
}

/// A `L` command: cut `count` equally sized frames out of `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpritesheetRequest {
    pub name: String,
    pub source: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub origin_row: u32,
    pub origin_col: u32,
    pub count: u32,
    pub per_row: u32,
}

impl SpritesheetRequest {
    /// Frame names with their regions. A single frame takes the bare name,
    /// otherwise frames are suffixed `0..count`.
    pub fn frames(&self) -> Vec<(String, Region)> {
        let per_row = self.per_row.max(1);
        (0..self.count)
            .map(|index| {
                let name = if self.count > 1 {
                    format!("{}{index}", self.name)
                } else {
                    self.name.clone()
                };
                let region = Region {
                    x: self
                        .frame_width
                        .saturating_mul(self.origin_col.saturating_add(index % per_row)),
                    y: self
                        .frame_height
                        .saturating_mul(self.origin_row.saturating_add(index / per_row)),
                    width: self.frame_width,
                    height: self.frame_height,
                };
                (name, region)
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
enum ImageSource {
    Memory { width: u32, height: u32 },
    File(PathBuf),
}

type LoadResult = Result<(u32, u32), String>;

#[derive(Debug)]
pub enum LoadStatus {
    Pending,
    Done(LoadResult),
    /// The worker went away without reporting.
    Lost,
}

/// An in-flight spritesheet load. Poll it once per tick until it is no longer pending.
#[derive(Debug)]
pub struct LoadHandle {
    request: SpritesheetRequest,
    receiver: Receiver<LoadResult>,
}

impl LoadHandle {
    fn ready(request: SpritesheetRequest, result: LoadResult) -> Self {
        let (sender, receiver) = mpsc::channel();
        // The receiver is alive, so this cannot fail.
        let _ = sender.send(result);
        Self { request, receiver }
    }

    fn spawn(request: SpritesheetRequest, path: PathBuf) -> Self {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let result = image::image_dimensions(&path)
                .map_err(|error| format!("{}: {error}", path.display()));
            let _ = sender.send(result);
        });
        Self { request, receiver }
    }

    pub fn request(&self) -> &SpritesheetRequest {
        &self.request
    }

    pub fn poll(&self) -> LoadStatus {
        match self.receiver.try_recv() {
            Ok(result) => LoadStatus::Done(result),
            Err(TryRecvError::Empty) => LoadStatus::Pending,
            Err(TryRecvError::Disconnected) => LoadStatus::Lost,
        }
    }
}

/// Images, spritesheet frames and fonts known to the viewer.
#[derive(Debug, Default)]
pub struct AssetCatalog {
    root: PathBuf,
    images: HashMap<String, ImageSource>,
    sizes: HashMap<String, (u32, u32)>,
    frames: HashMap<String, Texture>,
    fonts: HashSet<String>,
    warned_missing: HashSet<String>,
}

impl AssetCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Declares an image file relative to the asset root. The file itself is only
    /// read when a spritesheet is cut from it.
    pub fn register_image_file(&mut self, name: &str, relative: &str) -> Result<(), AssetError> {
        validate_asset_path(relative)?;
        let path = self.root.join(relative);
        debug!(name, path = %path.display(), "asset_image_registered");
        self.images.insert(name.to_string(), ImageSource::File(path));
        Ok(())
    }

    /// Declares an image whose pixels are supplied by the host.
    pub fn register_memory_image(&mut self, name: &str, width: u32, height: u32) {
        self.images
            .insert(name.to_string(), ImageSource::Memory { width, height });
        self.sizes.insert(name.to_string(), (width, height));
    }

    pub fn register_font(&mut self, font: &str) {
        self.fonts.insert(font.to_string());
    }

    pub fn has_font(&self, font: &str) -> bool {
        self.fonts.contains(font)
    }

    /// Starts loading a spritesheet. `None` when every frame is already known.
    pub fn begin_load(&mut self, request: SpritesheetRequest) -> Option<LoadHandle> {
        let frames = request.frames();
        if !frames.is_empty() && frames.iter().all(|(name, _)| self.frames.contains_key(name)) {
            return None;
        }
        if let Some(size) = self.sizes.get(&request.source) {
            return Some(LoadHandle::ready(request, Ok(*size)));
        }
        match self.images.get(&request.source) {
            Some(ImageSource::Memory { width, height }) => {
                let size = (*width, *height);
                Some(LoadHandle::ready(request, Ok(size)))
            }
            Some(ImageSource::File(path)) => {
                let path = path.clone();
                info!(
                    asset = %request.name,
                    path = %path.display(),
                    "spritesheet_load_started"
                );
                Some(LoadHandle::spawn(request, path))
            }
            None => {
                let reason = format!("unknown source image '{}'", request.source);
                Some(LoadHandle::ready(request, Err(reason)))
            }
        }
    }

    /// Registers the frames of a finished load. Failures leave placeholders behind.
    pub fn finish_load(
        &mut self,
        request: &SpritesheetRequest,
        result: LoadResult,
        errors: &mut ErrorLog,
    ) {
        let outcome = result.and_then(|(width, height)| {
            self.sizes.insert(request.source.clone(), (width, height));
            let frames = request.frames();
            match frames.iter().find(|(_, region)| {
                u64::from(region.x) + u64::from(region.width) > u64::from(width)
                    || u64::from(region.y) + u64::from(region.height) > u64::from(height)
            }) {
                Some((name, _)) => Err(format!(
                    "frame '{name}' lies outside the {width}x{height} image"
                )),
                None => Ok(frames),
            }
        });

        match outcome {
            Ok(frames) => {
                debug!(
                    asset = %request.name,
                    frame_count = frames.len(),
                    "spritesheet_loaded"
                );
                for (name, region) in frames {
                    self.frames.insert(
                        name,
                        Texture::Image {
                            source: request.source.clone(),
                            region: Some(region),
                        },
                    );
                }
            }
            Err(reason) => {
                errors.push(ViewerError::AssetLoad {
                    asset: request.name.clone(),
                    reason,
                });
                for (name, _) in request.frames() {
                    self.frames
                        .insert(name.clone(), Texture::Placeholder { name });
                }
            }
        }
    }

    /// Texture for an `image` value. Unknown names draw a placeholder and are
    /// reported once.
    pub fn resolve_texture(&mut self, name: &str, errors: &mut ErrorLog) -> Texture {
        if name.is_empty() {
            return Texture::Empty;
        }
        if let Some(texture) = self.frames.get(name) {
            return texture.clone();
        }
        if self.images.contains_key(name) {
            return Texture::Image {
                source: name.to_string(),
                region: None,
            };
        }
        if self.warned_missing.insert(name.to_string()) {
            errors.push(ViewerError::MissingImage {
                name: name.to_string(),
            });
        }
        Texture::Placeholder {
            name: name.to_string(),
        }
    }
}
