//! # CRNN model
//!
//! Two conv/pool blocks extract features, the image width becomes the time
//! axis, two bidirectional LSTMs encode the sequence and a dense head emits
//! per-step log-probabilities over the vocabulary plus blank.

use std::fmt;
use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{
    Conv2d, Conv2dConfig, Dropout, LSTMConfig, Linear, VarBuilder, VarMap, LSTM, RNN,
};
use serde::{Deserialize, Serialize};

use crate::ctc::{CtcLayer, CtcOutput, CtcTargets};
use crate::error::{Result, YomuError};

/// Total spatial reduction of the two 2×2 max-pool layers.
pub const DOWNSAMPLE_FACTOR: usize = 4;

/// Layer sizes and input geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub image_width: usize,
    pub image_height: usize,
    pub conv1_filters: usize,
    pub conv2_filters: usize,
    pub dense_units: usize,
    pub lstm1_units: usize,
    pub lstm2_units: usize,
    pub dropout: f32,
    pub lstm_dropout: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            image_width: 200,
            image_height: 50,
            conv1_filters: 32,
            conv2_filters: 64,
            dense_units: 64,
            lstm1_units: 128,
            lstm2_units: 64,
            dropout: 0.2,
            lstm_dropout: 0.25,
        }
    }
}

impl ModelConfig {
    /// Number of encoder time steps (one per 4 input columns).
    #[must_use]
    pub fn time_steps(&self) -> usize {
        self.image_width / 2 / 2
    }

    /// Features per time step after the conv blocks.
    #[must_use]
    pub fn feature_dim(&self) -> usize {
        self.image_height / 2 / 2 * self.conv2_filters
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_width < DOWNSAMPLE_FACTOR || self.image_height < DOWNSAMPLE_FACTOR {
            return Err(YomuError::InvalidConfig(format!(
                "image must be at least {DOWNSAMPLE_FACTOR}x{DOWNSAMPLE_FACTOR}, got {}x{}",
                self.image_width, self.image_height
            )));
        }
        let sizes = [
            ("conv1_filters", self.conv1_filters),
            ("conv2_filters", self.conv2_filters),
            ("dense_units", self.dense_units),
            ("lstm1_units", self.lstm1_units),
            ("lstm2_units", self.lstm2_units),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(YomuError::InvalidConfig(format!("{name} must be positive")));
        }
        for (name, p) in [("dropout", self.dropout), ("lstm_dropout", self.lstm_dropout)] {
            if !(0.0..1.0).contains(&p) {
                return Err(YomuError::InvalidConfig(format!(
                    "{name} must be within [0, 1), got {p}"
                )));
            }
        }
        Ok(())
    }
}

/// Two LSTMs reading the sequence in opposite directions, outputs concatenated.
pub struct BiLstm {
    forward: LSTM,
    backward: LSTM,
}

impl BiLstm {
    pub fn new(in_dim: usize, hidden: usize, vb: VarBuilder) -> Result<Self> {
        let forward = candle_nn::lstm(in_dim, hidden, LSTMConfig::default(), vb.pp("forward"))?;
        let backward = candle_nn::lstm(in_dim, hidden, LSTMConfig::default(), vb.pp("backward"))?;
        Ok(Self { forward, backward })
    }

    /// `(B, T, in)` → `(B, T, 2 * hidden)`.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, steps, _) = xs.dims3()?;
        let reverse: Vec<u32> = (0..steps as u32).rev().collect();
        let reverse = Tensor::from_vec(reverse, steps, xs.device())?;

        let fwd = self.forward.states_to_tensor(&self.forward.seq(xs)?)?;
        let reversed = xs.index_select(&reverse, 1)?;
        let bwd = self
            .backward
            .states_to_tensor(&self.backward.seq(&reversed)?)?
            .index_select(&reverse, 1)?;

        Ok(Tensor::cat(&[&fwd, &bwd], D::Minus1)?)
    }
}

/// The inference graph: images in, `(B, T, C)` log-probabilities out.
pub struct CaptchaModel {
    conv1: Conv2d,
    conv2: Conv2d,
    dense1: Linear,
    dropout: Dropout,
    bilstm1: BiLstm,
    bilstm2: BiLstm,
    lstm_dropout: Dropout,
    dense2: Linear,
    config: ModelConfig,
    num_classes: usize,
}

impl CaptchaModel {
    pub fn new(config: &ModelConfig, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        if num_classes < 2 {
            return Err(YomuError::InvalidConfig(format!(
                "need at least one character plus blank, got {num_classes} classes"
            )));
        }

        let same = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let conv1 = candle_nn::conv2d(1, config.conv1_filters, 3, same, vb.pp("conv1"))?;
        let conv2 = candle_nn::conv2d(
            config.conv1_filters,
            config.conv2_filters,
            3,
            same,
            vb.pp("conv2"),
        )?;
        let dense1 = candle_nn::linear(config.feature_dim(), config.dense_units, vb.pp("dense1"))?;
        let bilstm1 = BiLstm::new(config.dense_units, config.lstm1_units, vb.pp("bilstm1"))?;
        let bilstm2 = BiLstm::new(2 * config.lstm1_units, config.lstm2_units, vb.pp("bilstm2"))?;
        let dense2 = candle_nn::linear(2 * config.lstm2_units, num_classes, vb.pp("dense2"))?;

        Ok(Self {
            conv1,
            conv2,
            dense1,
            dropout: Dropout::new(config.dropout),
            bilstm1,
            bilstm2,
            lstm_dropout: Dropout::new(config.lstm_dropout),
            dense2,
            config: config.clone(),
            num_classes,
        })
    }

    /// Build a model whose weights live in a fresh `VarMap`.
    pub fn with_varmap(
        config: &ModelConfig,
        num_classes: usize,
        device: &Device,
    ) -> Result<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, num_classes, vb)?;
        Ok((model, varmap))
    }

    /// Load trained weights from a safetensors checkpoint.
    pub fn load<P: AsRef<Path>>(
        config: &ModelConfig,
        num_classes: usize,
        weights: P,
        device: &Device,
    ) -> Result<Self> {
        let (model, mut varmap) = Self::with_varmap(config, num_classes, device)?;
        varmap.load(weights)?;
        Ok(model)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// `(B, 1, H, W)` images → `(B, W/4, C)` log-probabilities.
    /// Dropout is active only when `train` is set.
    pub fn forward_t(&self, images: &Tensor, train: bool) -> Result<Tensor> {
        let (_, channels, height, width) = images.dims4()?;
        if channels != 1 || height != self.config.image_height || width != self.config.image_width
        {
            return Err(YomuError::ShapeMismatch(format!(
                "expected (B, 1, {}, {}) images, got {:?}",
                self.config.image_height,
                self.config.image_width,
                images.dims()
            )));
        }

        let xs = self.conv1.forward(images)?.relu()?.max_pool2d(2)?;
        let xs = self.conv2.forward(&xs)?.relu()?.max_pool2d(2)?;

        // (B, C, H', W') -> (B, W', C * H'): columns become time steps.
        let (batch, filters, rows, cols) = xs.dims4()?;
        let xs = xs
            .permute((0, 3, 1, 2))?
            .contiguous()?
            .reshape((batch, cols, filters * rows))?;

        let xs = self.dense1.forward(&xs)?.relu()?;
        let xs = self.dropout.forward(&xs, train)?;
        let xs = self.bilstm1.forward(&self.lstm_dropout.forward(&xs, train)?)?;
        let xs = self.bilstm2.forward(&self.lstm_dropout.forward(&xs, train)?)?;
        let logits = self.dense2.forward(&xs)?;

        Ok(candle_nn::ops::log_softmax(&logits, D::Minus1)?)
    }

    /// Inference forward pass.
    pub fn forward(&self, images: &Tensor) -> Result<Tensor> {
        self.forward_t(images, false)
    }

    /// Layer-by-layer output shapes and parameter counts.
    pub fn summary(&self) -> ModelSummary {
        let c = &self.config;
        let (h, w) = (c.image_height, c.image_width);
        let t = c.time_steps();
        let conv = |cin: usize, cout: usize| 9 * cin * cout + cout;
        let dense = |din: usize, dout: usize| din * dout + dout;
        let lstm = |din: usize, hidden: usize| 2 * (4 * hidden * (din + hidden) + 8 * hidden);

        let layers = vec![
            LayerSummary::new("image", "Input", vec![1, h, w], 0),
            LayerSummary::new(
                "conv1",
                "Conv2D+ReLU",
                vec![c.conv1_filters, h, w],
                conv(1, c.conv1_filters),
            ),
            LayerSummary::new("pool1", "MaxPool2D", vec![c.conv1_filters, h / 2, w / 2], 0),
            LayerSummary::new(
                "conv2",
                "Conv2D+ReLU",
                vec![c.conv2_filters, h / 2, w / 2],
                conv(c.conv1_filters, c.conv2_filters),
            ),
            LayerSummary::new("pool2", "MaxPool2D", vec![c.conv2_filters, h / 4, w / 4], 0),
            LayerSummary::new("reshape", "Reshape", vec![t, c.feature_dim()], 0),
            LayerSummary::new(
                "dense1",
                "Dense+ReLU",
                vec![t, c.dense_units],
                dense(c.feature_dim(), c.dense_units),
            ),
            LayerSummary::new("dropout", "Dropout", vec![t, c.dense_units], 0),
            LayerSummary::new(
                "bilstm1",
                "Bidirectional LSTM",
                vec![t, 2 * c.lstm1_units],
                lstm(c.dense_units, c.lstm1_units),
            ),
            LayerSummary::new(
                "bilstm2",
                "Bidirectional LSTM",
                vec![t, 2 * c.lstm2_units],
                lstm(2 * c.lstm1_units, c.lstm2_units),
            ),
            LayerSummary::new(
                "dense2",
                "Dense+LogSoftmax",
                vec![t, self.num_classes],
                dense(2 * c.lstm2_units, self.num_classes),
            ),
        ];

        ModelSummary { layers }
    }
}

/// The inference graph with the CTC stage attached for training.
pub struct TrainingModel {
    model: CaptchaModel,
    ctc: CtcLayer,
}

impl TrainingModel {
    pub fn new(model: CaptchaModel, blank: u32) -> Self {
        Self {
            model,
            ctc: CtcLayer::new(blank),
        }
    }

    pub fn forward_t(
        &self,
        images: &Tensor,
        targets: Option<CtcTargets<'_>>,
        train: bool,
    ) -> Result<CtcOutput> {
        let predictions = self.model.forward_t(images, train)?;
        self.ctc.forward(&predictions, targets)
    }

    /// The graph up to the softmax output, without the loss stage.
    pub fn prediction_model(&self) -> &CaptchaModel {
        &self.model
    }

    pub fn into_prediction_model(self) -> CaptchaModel {
        self.model
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSummary {
    pub name: &'static str,
    pub kind: &'static str,
    /// Output shape without the batch dimension.
    pub output_shape: Vec<usize>,
    pub params: usize,
}

impl LayerSummary {
    fn new(name: &'static str, kind: &'static str, output_shape: Vec<usize>, params: usize) -> Self {
        Self {
            name,
            kind,
            output_shape,
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSummary {
    pub layers: Vec<LayerSummary>,
}

impl ModelSummary {
    pub fn total_params(&self) -> usize {
        self.layers.iter().map(|l| l.params).sum()
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<10} {:<20} {:<18} {:>10}", "Layer", "Type", "Output", "Params")?;
        for layer in &self.layers {
            let shape = format!("{:?}", layer.output_shape);
            writeln!(
                f,
                "{:<10} {:<20} {:<18} {:>10}",
                layer.name, layer.kind, shape, layer.params
            )?;
        }
        write!(f, "Total params: {}", self.total_params())
    }
}
