//! # CTC loss
//!
//! Connectionist Temporal Classification loss over `(B, T, C)` log-probabilities.
//! The forward (alpha) recursion runs in log space and is written purely with
//! candle tensor ops, so gradients come from candle's autodiff.
//!
//! Impossible alignments use a large finite negative value instead of `-inf`
//! to keep `log_add_exp` and its gradient free of NaNs.

use candle_core::{DType, Device, Tensor};

use crate::error::{Result, YomuError};

const LOG_ZERO: f32 = -1e30;

/// Label sequences paired with their true lengths.
#[derive(Debug, Clone, Copy)]
pub struct CtcTargets<'a> {
    /// `(B, L_max)` u32 codes, padding ignored past each length.
    pub labels: &'a Tensor,
    pub lengths: &'a [usize],
}

/// Per-sample CTC negative log-likelihood.
#[derive(Debug, Clone)]
pub struct CtcLoss {
    blank: u32,
}

/// Extended label sequences (blanks around every label) and the masks the
/// recursion needs, built on the host.
struct Lattice {
    extended: Tensor,
    start: Tensor,
    skip: Tensor,
    last_blank: Tensor,
    last_label: Tensor,
    width: usize,
}

impl CtcLoss {
    pub fn new(blank: u32) -> Self {
        Self { blank }
    }

    pub fn blank(&self) -> u32 {
        self.blank
    }

    /// Loss per sample, shape `(B,)`.
    ///
    /// Every sample uses the full `T` time steps as its input length.
    pub fn forward(&self, log_probs: &Tensor, targets: CtcTargets<'_>) -> Result<Tensor> {
        let log_probs = log_probs.to_dtype(DType::F32)?;
        let (batch, steps, classes) = log_probs.dims3()?;
        if self.blank as usize >= classes {
            return Err(YomuError::ShapeMismatch(format!(
                "blank code {} is outside {} classes",
                self.blank, classes
            )));
        }

        let device = log_probs.device();
        let lattice = self.build_lattice(targets, batch, steps, classes, device)?;
        let log_zero = Tensor::full(LOG_ZERO, (batch, lattice.width), device)?;

        let emissions = |t: usize| -> Result<Tensor> {
            Ok(log_probs
                .narrow(1, t, 1)?
                .squeeze(1)?
                .contiguous()?
                .gather(&lattice.extended, 1)?)
        };

        // alpha_0: only the leading blank and the first label are reachable.
        let mut alpha = lattice.start.where_cond(&emissions(0)?, &log_zero)?;

        for t in 1..steps {
            let stay_or_advance = log_add_exp(&alpha, &shift_right(&alpha, 1)?)?;
            let with_skip = log_add_exp(&stay_or_advance, &shift_right(&alpha, 2)?)?;
            let merged = lattice.skip.where_cond(&with_skip, &stay_or_advance)?;
            alpha = (merged + emissions(t)?)?;
        }

        let end_blank = alpha.gather(&lattice.last_blank, 1)?;
        let end_label = alpha.gather(&lattice.last_label, 1)?;
        let log_likelihood = log_add_exp(&end_blank, &end_label)?.squeeze(1)?;

        Ok(log_likelihood.neg()?)
    }

    /// Mean loss over the batch.
    pub fn mean(&self, log_probs: &Tensor, targets: CtcTargets<'_>) -> Result<Tensor> {
        Ok(self.forward(log_probs, targets)?.mean_all()?)
    }

    fn build_lattice(
        &self,
        targets: CtcTargets<'_>,
        batch: usize,
        steps: usize,
        classes: usize,
        device: &Device,
    ) -> Result<Lattice> {
        let (label_batch, max_len) = targets.labels.dims2()?;
        if label_batch != batch || targets.lengths.len() != batch {
            return Err(YomuError::ShapeMismatch(format!(
                "predictions have batch {batch}, labels {label_batch}, lengths {}",
                targets.lengths.len()
            )));
        }

        let codes: Vec<Vec<u32>> = targets.labels.to_dtype(DType::U32)?.to_vec2()?;
        let width = 2 * max_len + 1;
        let mut extended = vec![self.blank; batch * width];
        let mut start = vec![0u8; batch * width];
        let mut skip = vec![0u8; batch * width];
        let mut last_blank = Vec::with_capacity(batch);
        let mut last_label = Vec::with_capacity(batch);

        for (b, row) in codes.iter().enumerate() {
            let len = targets.lengths[b];
            if len == 0 || len > max_len {
                return Err(YomuError::InvalidLabel(format!(
                    "label length {len} must be within 1..={max_len}"
                )));
            }
            let label = &row[..len];
            if let Some(&bad) = label
                .iter()
                .find(|&&c| c == self.blank || c as usize >= classes)
            {
                return Err(YomuError::InvalidLabel(format!(
                    "code {bad} is the blank or outside {classes} classes"
                )));
            }

            let repeats = label.windows(2).filter(|w| w[0] == w[1]).count();
            if len + repeats > steps {
                return Err(YomuError::InvalidLabel(format!(
                    "label of length {len} needs {} time steps, model produces {steps}",
                    len + repeats
                )));
            }

            let ext = &mut extended[b * width..(b + 1) * width];
            for (i, &c) in label.iter().enumerate() {
                ext[2 * i + 1] = c;
            }
            for s in 2..width {
                if ext[s] != self.blank && ext[s] != ext[s - 2] {
                    skip[b * width + s] = 1;
                }
            }
            start[b * width] = 1;
            start[b * width + 1] = 1;
            last_blank.push(2 * len as u32);
            last_label.push(2 * len as u32 - 1);
        }

        Ok(Lattice {
            extended: Tensor::from_vec(extended, (batch, width), device)?,
            start: Tensor::from_vec(start, (batch, width), device)?,
            skip: Tensor::from_vec(skip, (batch, width), device)?,
            last_blank: Tensor::from_vec(last_blank, (batch, 1), device)?,
            last_label: Tensor::from_vec(last_label, (batch, 1), device)?,
            width,
        })
    }
}

/// `ln(e^a + e^b)` elementwise.
///
/// Both terms are shifted by the shared maximum, which keeps the gradient
/// split evenly between `a` and `b` when they are equal.
fn log_add_exp(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let max = a.maximum(b)?;
    let sum = (a.broadcast_sub(&max)?.exp()? + b.broadcast_sub(&max)?.exp()?)?;
    Ok((max + sum.log()?)?)
}

/// Shift columns right by `by`, filling with `LOG_ZERO`.
fn shift_right(xs: &Tensor, by: usize) -> Result<Tensor> {
    let (rows, cols) = xs.dims2()?;
    let pad = Tensor::full(LOG_ZERO, (rows, by.min(cols)), xs.device())?;
    if by >= cols {
        return Ok(pad);
    }
    Ok(Tensor::cat(&[&pad, &xs.narrow(1, 0, cols - by)?], 1)?)
}

/// Result of the loss stage: predictions pass through untouched.
#[derive(Debug, Clone)]
pub struct CtcOutput {
    pub predictions: Tensor,
    /// Mean batch loss; `None` when no labels were supplied.
    pub loss: Option<Tensor>,
}

/// Training-time loss stage placed after the model's softmax output.
///
/// With labels it computes the batch loss; without labels it is a
/// pass-through, which is how the inference graph uses it.
#[derive(Debug, Clone)]
pub struct CtcLayer {
    loss: CtcLoss,
}

impl CtcLayer {
    pub fn new(blank: u32) -> Self {
        Self {
            loss: CtcLoss::new(blank),
        }
    }

    pub fn forward(&self, predictions: &Tensor, targets: Option<CtcTargets<'_>>) -> Result<CtcOutput> {
        let loss = targets
            .map(|t| self.loss.mean(predictions, t))
            .transpose()?;
        Ok(CtcOutput {
            predictions: predictions.clone(),
            loss,
        })
    }
}
