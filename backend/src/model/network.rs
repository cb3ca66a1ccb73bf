use tch::nn::{self, ModuleT};
use tch::Tensor;

const CONV_CHANNELS: [i64; 3] = [32, 64, 128];
const HIDDEN: i64 = 128;

/// Three 3x3 conv + ReLU + 2x2 max-pool stages, then a 128-unit dense layer
/// and a 5-way output. Takes NHWC input in [0, 1] and returns logits.
#[derive(Debug)]
pub struct RetinaNet {
    convs: Vec<nn::Conv2D>,
    fc1: nn::Linear,
    fc2: nn::Linear,
}

impl RetinaNet {
    pub fn new(vs: &nn::Path, image_size: i64) -> Self {
        let mut convs = Vec::with_capacity(CONV_CHANNELS.len());
        let mut in_channels = shared::INPUT_CHANNELS as i64;
        for (i, &out_channels) in CONV_CHANNELS.iter().enumerate() {
            convs.push(nn::conv2d(
                vs / format!("conv{}", i + 1),
                in_channels,
                out_channels,
                3,
                Default::default(),
            ));
            in_channels = out_channels;
        }

        let side = feature_side(image_size);
        let fc1 = nn::linear(vs / "fc1", in_channels * side * side, HIDDEN, Default::default());
        let fc2 = nn::linear(
            vs / "fc2",
            HIDDEN,
            shared::Severity::COUNT as i64,
            Default::default(),
        );
        Self { convs, fc1, fc2 }
    }
}

/// Spatial side length after the conv stack: each stage loses 2 pixels to the
/// unpadded kernel, then halves.
pub fn feature_side(image_size: i64) -> i64 {
    (0..CONV_CHANNELS.len()).fold(image_size, |side, _| (side - 2) / 2)
}

impl ModuleT for RetinaNet {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
        let mut features = xs.permute([0, 3, 1, 2]);
        for conv in &self.convs {
            features = features.apply(conv).relu().max_pool2d_default(2);
        }
        features.flat_view().apply(&self.fc1).relu().apply(&self.fc2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn feature_side_matches_layer_arithmetic() {
        assert_eq!(feature_side(224), 26);
        assert_eq!(feature_side(32), 2);
    }

    #[test]
    fn forward_produces_one_logit_per_class() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = RetinaNet::new(&vs.root(), 32);
        let xs = Tensor::rand([2, 32, 32, 3], (Kind::Float, Device::Cpu));
        assert_eq!(net.forward_t(&xs, false).size(), vec![2, 5]);
    }
}
