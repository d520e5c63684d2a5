use std::sync::Arc;

use pyrflow_device::{
    parallel::{clamp_index, for_each_row},
    DeviceError, DeviceImage, ExecutionStrategy, Kernel, NdRange,
};
use pyrflow_image::ImageSize;

use super::Axis;

/// Smooths an intensity image along one axis and drops every other sample.
///
/// Out-of-image taps replicate the border sample. The integer accumulator
/// is normalised with rounding, so a flat field stays flat.
pub struct DownFilter {
    axis: Axis,
    taps: Vec<i32>,
    sum: i32,
    src: Arc<DeviceImage<u8, 1>>,
    dst: Arc<DeviceImage<u8, 1>>,
}

impl DownFilter {
    /// Bind a downfilter pass from `src` into `dst`.
    pub fn new(
        axis: Axis,
        taps: &[i32],
        sum: i32,
        src: Arc<DeviceImage<u8, 1>>,
        dst: Arc<DeviceImage<u8, 1>>,
    ) -> Self {
        Self {
            axis,
            taps: taps.to_vec(),
            sum,
            src,
            dst,
        }
    }

    /// Size of the output for an input of `size`.
    pub fn output_size(axis: Axis, size: ImageSize) -> ImageSize {
        match axis {
            Axis::X => [size.width / 2, size.height].into(),
            Axis::Y => [size.width, size.height / 2].into(),
        }
    }
}

impl Kernel for DownFilter {
    fn name(&self) -> &'static str {
        match self.axis {
            Axis::X => "downfilter_x",
            Axis::Y => "downfilter_y",
        }
    }

    fn launch(&self, range: &NdRange, strategy: ExecutionStrategy) -> Result<(), DeviceError> {
        self.dst
            .expect_size(Self::output_size(self.axis, self.src.size()))?;
        self.dst.expect_size(range.size())?;

        let src = self.src.view()?;
        let (src_w, src_h) = (self.src.width(), self.src.height());
        let radius = (self.taps.len() / 2) as isize;
        let half = self.sum / 2;

        self.dst.write_with(|dst| {
            for_each_row(strategy, range, dst, range.width(), |y, row| {
                for (x, out) in row.iter_mut().enumerate() {
                    let acc: i32 = match self.axis {
                        Axis::X => {
                            let line = &src[y * src_w..(y + 1) * src_w];
                            self.taps
                                .iter()
                                .enumerate()
                                .map(|(k, &t)| {
                                    t * line[clamp_index(2 * x, k as isize - radius, src_w)] as i32
                                })
                                .sum()
                        }
                        Axis::Y => self
                            .taps
                            .iter()
                            .enumerate()
                            .map(|(k, &t)| {
                                let sy = clamp_index(2 * y, k as isize - radius, src_h);
                                t * src[sy * src_w + x] as i32
                            })
                            .sum(),
                    };
                    *out = ((acc + half) / self.sum).clamp(0, u8::MAX as i32) as u8;
                }
            });
            Ok(())
        })
    }
}
