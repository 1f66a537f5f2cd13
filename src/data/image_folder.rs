use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use tracing::{debug, warn};

use crate::data::dataset::Dataset;
use crate::data::sample::{Input, Sample};
use crate::error::{Result, SideTuneError};
use crate::math::tensor::Tensor;

pub const IMAGENET_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// Side length the pretrained backbones expect.
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Images laid out as `root/<class>/<file>`, one sub-directory per class.
///
/// Classes are the sorted sub-directory names. Every file is probed when the
/// folder is opened; files the `image` crate cannot identify are left out and
/// only counted.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    classes: Vec<String>,
    items: Vec<(PathBuf, usize)>,
    size: u32,
    skipped: usize,
}

impl ImageFolder {
    pub fn open(root: impl AsRef<Path>) -> Result<ImageFolder> {
        ImageFolder::with_size(root, DEFAULT_IMAGE_SIZE)
    }

    pub fn with_size(root: impl AsRef<Path>, size: u32) -> Result<ImageFolder> {
        let root = root.as_ref().to_path_buf();
        if size == 0 {
            return Err(SideTuneError::InvalidConfig("image size must be positive".into()));
        }

        let mut class_dirs: Vec<(String, PathBuf)> = std::fs::read_dir(&root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
            .collect();
        class_dirs.sort();
        if class_dirs.is_empty() {
            return Err(SideTuneError::EmptyDataset(format!("no class directories under {}", root.display())));
        }

        let mut items = Vec::new();
        let mut skipped = 0;
        for (label, (_, dir)) in class_dirs.iter().enumerate() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect();
            files.sort();
            for path in files {
                if is_readable_image(&path) {
                    items.push((path, label));
                } else {
                    debug!(path = %path.display(), "skipping unreadable image");
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, root = %root.display(), "skipped unreadable images");
        }

        Ok(ImageFolder {
            root,
            classes: class_dirs.into_iter().map(|(name, _)| name).collect(),
            items,
            size,
            skipped,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files left out because they could not be decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

fn is_readable_image(path: &Path) -> bool {
    image::io::Reader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map(|reader| reader.into_dimensions().is_ok())
        .unwrap_or(false)
}

/// Decodes an image, resizes it to `size x size` (bilinear) and returns a
/// `(3, size, size)` tensor normalised with the ImageNet statistics.
pub fn load_image(path: &Path, size: u32) -> Result<Tensor> {
    let rgb = image::open(path)?.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let plane = (size * size) as usize;
    let mut data = vec![0.0; 3 * plane];
    for (i, pixel) in rgb.pixels().enumerate() {
        for c in 0..3 {
            let value = pixel.0[c] as f64 / 255.0;
            data[c * plane + i] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    Tensor::from_vec(&[3, size as usize, size as usize], data)
}

impl Dataset for ImageFolder {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let (path, label) = self
            .items
            .get(index)
            .ok_or(SideTuneError::IndexOutOfRange { index, len: self.items.len() })?;
        Ok(Sample::new(Input::Image(load_image(path, self.size)?), *label))
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn targets(&self) -> Vec<usize> {
        self.items.iter().map(|(_, label)| *label).collect()
    }
}
