//! MobileNetV2-style species classifier built with Burn
//!
//! Feature extractor: a stride-2 stem convolution followed by the standard
//! MobileNetV2 stack of inverted residual blocks and a 1x1 head convolution.
//! Classifier head: global average pooling, dropout, a dense ReLU layer,
//! dropout again, and a dense layer over the species classes.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Inverted residual settings: (expansion, output channels, repeats, first stride)
const BLOCK_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

const STEM_CHANNELS: usize = 32;
const HEAD_CHANNELS: usize = 1280;

/// Configuration for the SpeciesNet model
#[derive(Config, Debug)]
pub struct SpeciesNetConfig {
    /// Number of species classes
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "224")]
    pub input_size: usize,

    /// Channel width multiplier (alpha)
    #[config(default = "1.0")]
    pub width_multiplier: f64,

    /// Units of the dense layer before the classifier
    #[config(default = "1024")]
    pub hidden_units: usize,

    /// Dropout rate used twice in the classifier head
    #[config(default = "0.2")]
    pub dropout_rate: f64,
}

/// Round a channel count to a multiple of 8, never dropping more than 10%
fn make_divisible(value: f64) -> usize {
    let divisor = 8usize;
    let mut rounded = (((value + divisor as f64 / 2.0) as usize) / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * value {
        rounded += divisor;
    }
    rounded
}

fn relu6<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    x.clamp(0.0, 6.0)
}

/// Convolution followed by batch normalization (no activation)
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBn<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let padding = kernel_size / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);

        Self { conv, bn }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// MobileNetV2 inverted residual block
///
/// 1x1 expansion (skipped when the expansion factor is 1), 3x3 depthwise
/// convolution, 1x1 linear projection. The input is added back when the
/// block keeps both resolution and channel count.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    pub expand: Option<ConvBn<B>>,
    pub depthwise: ConvBn<B>,
    pub project: ConvBn<B>,
    in_channels: usize,
    out_channels: usize,
    stride: usize,
}

impl<B: Backend> InvertedResidual<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expansion: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expansion;

        let expand = if expansion == 1 {
            None
        } else {
            Some(ConvBn::new(in_channels, hidden, 1, 1, 1, device))
        };
        let depthwise = ConvBn::new(hidden, hidden, 3, stride, hidden, device);
        let project = ConvBn::new(hidden, out_channels, 1, 1, 1, device);

        Self {
            expand,
            depthwise,
            project,
            in_channels,
            out_channels,
            stride,
        }
    }

    pub fn has_residual(&self) -> bool {
        self.stride == 1 && self.in_channels == self.out_channels
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = x.clone();
        if let Some(expand) = &self.expand {
            out = relu6(expand.forward(out));
        }
        out = relu6(self.depthwise.forward(out));
        out = self.project.forward(out);

        if self.has_residual() {
            out + x
        } else {
            out
        }
    }
}

/// Species classifier network
#[derive(Module, Debug)]
pub struct SpeciesNet<B: Backend> {
    pub stem: ConvBn<B>,
    pub blocks: Vec<InvertedResidual<B>>,
    pub head_conv: ConvBn<B>,
    pub global_pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> SpeciesNet<B> {
    /// Create a freshly initialized network from configuration
    pub fn new(config: &SpeciesNetConfig, device: &B::Device) -> Self {
        let width = config.width_multiplier;

        let stem_channels = make_divisible(STEM_CHANNELS as f64 * width);
        let stem = ConvBn::new(3, stem_channels, 3, 2, 1, device);

        let mut blocks = Vec::new();
        let mut in_channels = stem_channels;
        for (expansion, channels, repeats, first_stride) in BLOCK_SETTINGS {
            let out_channels = make_divisible(channels as f64 * width);
            for i in 0..repeats {
                let stride = if i == 0 { first_stride } else { 1 };
                blocks.push(InvertedResidual::new(
                    in_channels,
                    out_channels,
                    stride,
                    expansion,
                    device,
                ));
                in_channels = out_channels;
            }
        }

        let head_channels = if width > 1.0 {
            make_divisible(HEAD_CHANNELS as f64 * width)
        } else {
            HEAD_CHANNELS
        };
        let head_conv = ConvBn::new(in_channels, head_channels, 1, 1, 1, device);

        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let dropout = DropoutConfig::new(config.dropout_rate).init();
        let fc1 = LinearConfig::new(head_channels, config.hidden_units).init(device);
        let fc2 = LinearConfig::new(config.hidden_units, config.num_classes).init(device);

        Self {
            stem,
            blocks,
            head_conv,
            global_pool,
            dropout,
            fc1,
            fc2,
            num_classes: config.num_classes,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = relu6(self.stem.forward(x));
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = relu6(self.head_conv.forward(x));

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dropout.forward(x);
        let x = self.fc1.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Forward pass with softmax over classes
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny_config(num_classes: usize) -> SpeciesNetConfig {
        SpeciesNetConfig::new(num_classes)
            .with_input_size(32)
            .with_width_multiplier(0.35)
            .with_hidden_units(16)
    }

    #[test]
    fn test_make_divisible() {
        assert_eq!(make_divisible(32.0), 32);
        assert_eq!(make_divisible(16.0 * 0.35), 8);
        assert_eq!(make_divisible(24.0 * 0.35), 8);
        assert_eq!(make_divisible(96.0 * 0.35), 32);
    }

    #[test]
    fn test_block_layout() {
        let device = Default::default();
        let model = SpeciesNet::<TestBackend>::new(&tiny_config(4), &device);

        assert_eq!(model.blocks.len(), 17);
        assert!(model.blocks[0].expand.is_none());
        assert!(!model.blocks[1].has_residual());
        assert!(model.blocks[2].has_residual());
    }

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let model = SpeciesNet::<TestBackend>::new(&tiny_config(5), &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 5]);
        assert_eq!(model.num_classes(), 5);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = SpeciesNet::<TestBackend>::new(&tiny_config(3), &device);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let probs = model
            .forward_softmax(input)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        let sum: f32 = probs.iter().sum();
        assert_eq!(probs.len(), 3);
        assert!((sum - 1.0).abs() < 1e-4);
    }
}
