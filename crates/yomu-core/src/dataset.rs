//! Sample discovery, train/validation split, encoding and batching.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use tracing::{debug, info};

use crate::ctc::CtcTargets;
use crate::error::{Result, YomuError};
use crate::vocab::Vocabulary;

/// One image file and its ground-truth text (the file stem).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: String,
}

impl Sample {
    /// Build a sample from a path, taking the label from the file stem.
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Option<Self> {
        let path = path.into();
        let label = path.file_stem()?.to_str()?.to_string();
        Some(Self { path, label })
    }
}

/// Summary of a loaded sample set.
#[derive(Debug, Clone)]
pub struct DatasetStats {
    pub num_images: usize,
    pub num_labels: usize,
    pub num_unique_chars: usize,
    pub characters: String,
    pub max_label_len: usize,
}

impl DatasetStats {
    pub fn compute(samples: &[Sample], vocab: &Vocabulary) -> Self {
        Self {
            num_images: samples.len(),
            num_labels: samples.iter().filter(|s| !s.label.is_empty()).count(),
            num_unique_chars: vocab.len(),
            characters: vocab.characters().iter().collect(),
            max_label_len: max_label_len(samples),
        }
    }

    pub fn log(&self) {
        info!("Number of images found: {}", self.num_images);
        info!("Number of labels found: {}", self.num_labels);
        info!("Number of unique characters: {}", self.num_unique_chars);
        info!("Characters present: {:?}", self.characters);
        info!("Maximum label length: {}", self.max_label_len);
    }
}

/// Longest label (in characters) across the samples.
pub fn max_label_len(samples: &[Sample]) -> usize {
    samples
        .iter()
        .map(|s| s.label.chars().count())
        .max()
        .unwrap_or(0)
}

/// Collect every `.png` file in `dir`, sorted by path.
pub fn load_samples<P: AsRef<Path>>(dir: P) -> Result<Vec<Sample>> {
    let dir = dir.as_ref();
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_png = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"));
        if path.is_file() && is_png {
            paths.push(path);
        }
    }
    paths.sort();

    let samples: Vec<Sample> = paths.into_iter().filter_map(Sample::from_path).collect();
    if samples.is_empty() {
        return Err(YomuError::EmptyDataset {
            path: dir.to_path_buf(),
        });
    }

    debug!("Discovered {} samples in {:?}", samples.len(), dir);
    Ok(samples)
}

/// Partition samples into `(train, valid)`.
///
/// With `shuffle`, a seeded permutation is applied first, so a given seed
/// always yields the same split.
pub fn split_data(
    samples: &[Sample],
    train_fraction: f32,
    shuffle: bool,
    seed: u64,
) -> Result<(Vec<Sample>, Vec<Sample>)> {
    if !(0.0..=1.0).contains(&train_fraction) {
        return Err(YomuError::InvalidConfig(format!(
            "train fraction must be within [0, 1], got {train_fraction}"
        )));
    }

    let mut indices: Vec<usize> = (0..samples.len()).collect();
    if shuffle {
        shuffle_in_place(&mut indices, seed);
    }

    let train_size = (samples.len() as f32 * train_fraction).round() as usize;
    let (train_idx, valid_idx) = indices.split_at(train_size);
    let pick = |idx: &[usize]| idx.iter().map(|&i| samples[i].clone()).collect::<Vec<_>>();

    Ok((pick(train_idx), pick(valid_idx)))
}

/// Fisher-Yates shuffle driven by a seeded PCG generator.
pub fn shuffle_in_place<T>(items: &mut [T], seed: u64) {
    let mut rng = oorandom::Rand64::new(u128::from(seed));
    for i in (1..items.len()).rev() {
        let j = rng.rand_range(0..(i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}

/// A sample reduced to model-ready numbers.
#[derive(Debug, Clone)]
pub struct EncodedSample {
    /// Grayscale pixels in `[0, 1]`, row-major `height × width`.
    pub pixels: Vec<f32>,
    pub codes: Vec<u32>,
    pub label: String,
}

/// Decodes, grayscales and resizes images to a fixed size.
#[derive(Debug, Clone, Copy)]
pub struct SampleEncoder {
    pub width: u32,
    pub height: u32,
}

impl SampleEncoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Load an image file as normalized grayscale pixels.
    pub fn encode_image<P: AsRef<Path>>(&self, path: P) -> Result<Vec<f32>> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|source| YomuError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.encode_dynamic(&img))
    }

    /// Normalize an already decoded image.
    pub fn encode_dynamic(&self, img: &image::DynamicImage) -> Vec<f32> {
        let gray = img.to_luma8();
        let gray = if gray.dimensions() == (self.width, self.height) {
            gray
        } else {
            image::imageops::resize(&gray, self.width, self.height, FilterType::Triangle)
        };
        gray.into_raw()
            .into_iter()
            .map(|p| f32::from(p) / 255.0)
            .collect()
    }

    pub fn encode(&self, sample: &Sample, vocab: &Vocabulary) -> Result<EncodedSample> {
        Ok(EncodedSample {
            pixels: self.encode_image(&sample.path)?,
            codes: vocab.encode(&sample.label)?,
            label: sample.label.clone(),
        })
    }
}

/// A batch ready for the model.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(B, 1, H, W)` f32.
    pub images: Tensor,
    /// `(B, L_max)` u32, padded with the blank code.
    pub labels: Tensor,
    pub label_lengths: Vec<usize>,
    pub texts: Vec<String>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Labels and lengths in the form the CTC stage takes.
    pub fn targets(&self) -> CtcTargets<'_> {
        CtcTargets {
            labels: &self.labels,
            lengths: &self.label_lengths,
        }
    }
}

/// Encoded samples held in memory.
#[derive(Debug, Clone)]
pub struct Dataset {
    samples: Vec<EncodedSample>,
    width: usize,
    height: usize,
    blank: u32,
}

impl Dataset {
    /// Encode every sample up front.
    pub fn encode(samples: &[Sample], encoder: &SampleEncoder, vocab: &Vocabulary) -> Result<Self> {
        let encoded = samples
            .iter()
            .map(|s| encoder.encode(s, vocab))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_encoded(encoded, encoder, vocab))
    }

    pub fn from_encoded(
        samples: Vec<EncodedSample>,
        encoder: &SampleEncoder,
        vocab: &Vocabulary,
    ) -> Self {
        Self {
            samples,
            width: encoder.width as usize,
            height: encoder.height as usize,
            blank: vocab.blank(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[EncodedSample] {
        &self.samples
    }

    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.samples.len().div_ceil(batch_size.max(1))
    }

    /// Batches in dataset order.
    pub fn batches(&self, batch_size: usize, device: &Device) -> Result<Vec<Batch>> {
        let order: Vec<usize> = (0..self.samples.len()).collect();
        self.batches_in_order(&order, batch_size, device)
    }

    /// Batches following `order`. The last batch may be short.
    pub fn batches_in_order(
        &self,
        order: &[usize],
        batch_size: usize,
        device: &Device,
    ) -> Result<Vec<Batch>> {
        if batch_size == 0 {
            return Err(YomuError::InvalidConfig("batch size must be positive".into()));
        }
        order
            .chunks(batch_size)
            .map(|chunk| self.collate(chunk, device))
            .collect()
    }

    fn collate(&self, indices: &[usize], device: &Device) -> Result<Batch> {
        let size = indices.len();
        let pixels_per_image = self.width * self.height;
        let max_len = indices
            .iter()
            .map(|&i| self.samples[i].codes.len())
            .max()
            .unwrap_or(0)
            .max(1);

        let mut pixels = Vec::with_capacity(size * pixels_per_image);
        let mut labels = Vec::with_capacity(size * max_len);
        let mut label_lengths = Vec::with_capacity(size);
        let mut texts = Vec::with_capacity(size);

        for &i in indices {
            let sample = &self.samples[i];
            if sample.pixels.len() != pixels_per_image {
                return Err(YomuError::ShapeMismatch(format!(
                    "sample {:?} has {} pixels, expected {}",
                    sample.label,
                    sample.pixels.len(),
                    pixels_per_image
                )));
            }
            pixels.extend_from_slice(&sample.pixels);
            labels.extend_from_slice(&sample.codes);
            labels.extend(std::iter::repeat_n(self.blank, max_len - sample.codes.len()));
            label_lengths.push(sample.codes.len());
            texts.push(sample.label.clone());
        }

        Ok(Batch {
            images: Tensor::from_vec(pixels, (size, 1, self.height, self.width), device)?,
            labels: Tensor::from_vec(labels, (size, max_len), device)?,
            label_lengths,
            texts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(labels: &[&str]) -> Vec<Sample> {
        labels
            .iter()
            .map(|l| Sample {
                path: PathBuf::from(format!("{l}.png")),
                label: l.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_sample_from_path() {
        let s = Sample::from_path("data/captcha_images/226md.png").unwrap();
        assert_eq!(s.label, "226md");
    }

    #[test]
    fn test_split_sizes_and_disjoint() {
        let all = samples(&["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]);
        let (train, valid) = split_data(&all, 0.9, true, 42).unwrap();
        assert_eq!(train.len(), 9);
        assert_eq!(valid.len(), 1);
        assert!(train.iter().all(|t| !valid.contains(t)));
    }

    #[test]
    fn test_split_is_deterministic() {
        let all = samples(&["a", "b", "c", "d", "e", "f", "g", "h"]);
        let first = split_data(&all, 0.5, true, 7).unwrap();
        let second = split_data(&all, 0.5, true, 7).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_split_without_shuffle_keeps_order() {
        let all = samples(&["a", "b", "c", "d"]);
        let (train, valid) = split_data(&all, 0.5, false, 0).unwrap();
        assert_eq!(train, all[..2].to_vec());
        assert_eq!(valid, all[2..].to_vec());
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        let all = samples(&["a"]);
        assert!(split_data(&all, 1.5, true, 0).is_err());
    }

    #[test]
    fn test_collate_pads_labels_with_blank() {
        let vocab = Vocabulary::from_labels(["ab", "b"]);
        let encoder = SampleEncoder::new(4, 2);
        let encoded = vec![
            EncodedSample {
                pixels: vec![0.0; 8],
                codes: vocab.encode("ab").unwrap(),
                label: "ab".into(),
            },
            EncodedSample {
                pixels: vec![1.0; 8],
                codes: vocab.encode("b").unwrap(),
                label: "b".into(),
            },
        ];
        let dataset = Dataset::from_encoded(encoded, &encoder, &vocab);
        let batches = dataset.batches(16, &Device::Cpu).unwrap();
        assert_eq!(batches.len(), 1);

        let batch = &batches[0];
        assert_eq!(batch.images.dims(), &[2, 1, 2, 4]);
        assert_eq!(batch.label_lengths, vec![2, 1]);
        let labels: Vec<Vec<u32>> = batch.labels.to_vec2().unwrap();
        assert_eq!(labels, vec![vec![0, 1], vec![1, vocab.blank()]]);
    }

    #[test]
    fn test_last_batch_is_short() {
        let vocab = Vocabulary::from_labels(["a"]);
        let encoder = SampleEncoder::new(2, 2);
        let encoded = (0..5)
            .map(|_| EncodedSample {
                pixels: vec![0.5; 4],
                codes: vec![0],
                label: "a".into(),
            })
            .collect();
        let dataset = Dataset::from_encoded(encoded, &encoder, &vocab);
        assert_eq!(dataset.num_batches(2), 3);
        let batches = dataset.batches(2, &Device::Cpu).unwrap();
        assert_eq!(batches.last().unwrap().len(), 1);
    }

    #[test]
    fn test_encode_dynamic_resizes_and_normalizes() {
        let img = image::DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
            10,
            6,
            image::Luma([255]),
        ));
        let pixels = SampleEncoder::new(5, 3).encode_dynamic(&img);
        assert_eq!(pixels.len(), 15);
        assert!(pixels.iter().all(|&p| (p - 1.0).abs() < 1e-6));
    }
}
