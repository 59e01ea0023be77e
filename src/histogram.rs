//! Histogram deployment
//!
//! Builds the `histogram` role artifact of an image: 256-bin counts per
//! channel, accumulated over every pixel source (all planes of a stack).
//!
//! ## Strategies
//!
//! - **Fast**: planes larger than [`FAST_MAX_DIMENSION`] on either side are
//!   downsampled before counting
//! - **Complete**: every pixel is counted
//!
//! Counting runs on the rayon pool: rows are folded into per-thread bin
//! arrays which are then reduced.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::files::{self, Role};
use crate::formats::FormatError;
use crate::image::Image;

/// Longest side counted by the fast strategy.
pub const FAST_MAX_DIMENSION: u32 = 1024;

const BINS: usize = 256;

#[derive(Debug, Error)]
pub enum HistogramError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Cannot read pixels: {0}")]
    Source(#[from] FormatError),

    #[error("Decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Plane {} has {actual} channel(s), expected {expected}", .plane.display())]
    ChannelMismatch {
        plane: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("No pixel to count")]
    Empty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistogramType {
    #[default]
    Fast,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHistogram {
    pub minimum: u8,
    pub maximum: u8,
    pub bins: Vec<u64>,
}

impl ChannelHistogram {
    fn from_bins(bins: [u64; BINS]) -> Self {
        let minimum = bins.iter().position(|&n| n > 0).unwrap_or(0) as u8;
        let maximum = bins.iter().rposition(|&n| n > 0).unwrap_or(0) as u8;
        Self {
            minimum,
            maximum,
            bins: bins.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramData {
    pub kind: HistogramType,
    pub planes: usize,
    pub sampled_pixels: u64,
    pub channels: Vec<ChannelHistogram>,
}

/// A deployed histogram artifact.
#[derive(Debug, Clone)]
pub struct Histogram {
    pub path: PathBuf,
    pub data: HistogramData,
}

impl Histogram {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistogramError> {
        let path = path.into();
        let data = serde_json::from_slice(&fs::read(&path)?)?;
        Ok(Self { path, data })
    }

    pub fn has_histogram_role(&self) -> bool {
        files::has_role(&self.path, Role::Histogram)
    }
}

/// Count the pixels of `image` into a new histogram file at `dest`.
///
/// `dest` must not exist yet.
pub fn build_histogram_file(
    image: &Image,
    dest: &Path,
    kind: HistogramType,
) -> Result<Histogram, HistogramError> {
    let sources = image.pixel_sources()?;
    let mut accumulated: Option<Vec<[u64; BINS]>> = None;
    let mut sampled_pixels = 0u64;

    for plane in &sources {
        if !plane.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", plane.display()),
            )
            .into());
        }

        let decoded = ImageReader::open(plane)?.with_guessed_format()?.decode()?;
        let (bins, pixels) = count_plane(&decoded, kind);

        match accumulated.as_mut() {
            None => accumulated = Some(bins),
            Some(acc) if acc.len() != bins.len() => {
                return Err(HistogramError::ChannelMismatch {
                    plane: plane.clone(),
                    expected: acc.len(),
                    actual: bins.len(),
                });
            }
            Some(acc) => merge(acc, &bins),
        }
        sampled_pixels += pixels;
    }

    let Some(bins) = accumulated.filter(|_| sampled_pixels > 0) else {
        return Err(HistogramError::Empty);
    };

    let data = HistogramData {
        kind,
        planes: sources.len(),
        sampled_pixels,
        channels: bins.into_iter().map(ChannelHistogram::from_bins).collect(),
    };

    let file = OpenOptions::new().write(true).create_new(true).open(dest)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &data)?;
    writer.flush()?;
    debug!(
        "Histogram of {} written to {} ({} pixels)",
        image.path().display(),
        dest.display(),
        sampled_pixels
    );

    Ok(Histogram {
        path: dest.to_path_buf(),
        data,
    })
}

fn count_plane(img: &DynamicImage, kind: HistogramType) -> (Vec<[u64; BINS]>, u64) {
    let sampled;
    let img = if kind == HistogramType::Fast
        && (img.width() > FAST_MAX_DIMENSION || img.height() > FAST_MAX_DIMENSION)
    {
        sampled = img.thumbnail(FAST_MAX_DIMENSION, FAST_MAX_DIMENSION);
        &sampled
    } else {
        img
    };

    if img.color().has_color() {
        let rgb = img.to_rgb8();
        (count_interleaved(rgb.as_raw(), 3), pixel_count(img))
    } else {
        let luma = img.to_luma8();
        (count_interleaved(luma.as_raw(), 1), pixel_count(img))
    }
}

fn pixel_count(img: &DynamicImage) -> u64 {
    u64::from(img.width()) * u64::from(img.height())
}

fn count_interleaved(raw: &[u8], channels: usize) -> Vec<[u64; BINS]> {
    // rows of 4096 pixels keep the per-task overhead low
    let chunk = channels * 4096;
    raw.par_chunks(chunk)
        .fold(
            || vec![[0u64; BINS]; channels],
            |mut acc, block| {
                for pixel in block.chunks_exact(channels) {
                    for (c, &value) in pixel.iter().enumerate() {
                        acc[c][value as usize] += 1;
                    }
                }
                acc
            },
        )
        .reduce(
            || vec![[0u64; BINS]; channels],
            |mut a, b| {
                merge(&mut a, &b);
                a
            },
        )
}

fn merge(acc: &mut [[u64; BINS]], other: &[[u64; BINS]]) {
    for (a, b) in acc.iter_mut().zip(other) {
        for (x, y) in a.iter_mut().zip(b) {
            *x += y;
        }
    }
}
