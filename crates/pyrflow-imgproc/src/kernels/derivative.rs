use std::sync::Arc;

use pyrflow_device::{
    parallel::{clamp_index, for_each_row},
    DeviceError, DeviceImage, ExecutionStrategy, Kernel, NdRange,
};
use pyrflow_image::Sample;

use super::Axis;

/// One 1D pass of the separable edge operator.
///
/// Correlates `src` with `taps` along `axis` at full resolution, with
/// replicated borders, and stores the response as 16-bit samples.
pub struct SeparablePass<S> {
    axis: Axis,
    taps: Vec<i32>,
    src: Arc<DeviceImage<S, 1>>,
    dst: Arc<DeviceImage<i16, 1>>,
}

impl<S> SeparablePass<S> {
    /// Bind a pass from `src` into `dst`.
    pub fn new(
        axis: Axis,
        taps: &[i32],
        src: Arc<DeviceImage<S, 1>>,
        dst: Arc<DeviceImage<i16, 1>>,
    ) -> Self {
        Self {
            axis,
            taps: taps.to_vec(),
            src,
            dst,
        }
    }
}

impl<S: Sample + Into<i32>> Kernel for SeparablePass<S> {
    fn name(&self) -> &'static str {
        match self.axis {
            Axis::X => "derivative_pass_h",
            Axis::Y => "derivative_pass_v",
        }
    }

    fn launch(&self, range: &NdRange, strategy: ExecutionStrategy) -> Result<(), DeviceError> {
        self.dst.expect_size(self.src.size())?;
        self.dst.expect_size(range.size())?;

        let src = self.src.view()?;
        let (w, h) = (self.src.width(), self.src.height());
        let radius = (self.taps.len() / 2) as isize;

        self.dst.write_with(|dst| {
            for_each_row(strategy, range, dst, w, |y, row| {
                for (x, out) in row.iter_mut().enumerate() {
                    let acc: i32 = self
                        .taps
                        .iter()
                        .enumerate()
                        .map(|(k, &t)| {
                            let offset = k as isize - radius;
                            let idx = match self.axis {
                                Axis::X => y * w + clamp_index(x, offset, w),
                                Axis::Y => clamp_index(y, offset, h) * w + x,
                            };
                            let sample: i32 = src[idx].into();
                            t * sample
                        })
                        .sum();
                    *out = acc.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                }
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrflow_device::Residency;

    fn published<S: Sample>(w: usize, h: usize, data: &[S]) -> Result<Arc<DeviceImage<S, 1>>, DeviceError> {
        let image = Arc::new(DeviceImage::allocate("src", [w, h].into(), Residency::DeviceOnly)?);
        image.write_with(|d| {
            d.copy_from_slice(data);
            Ok(())
        })?;
        Ok(image)
    }

    #[test]
    fn test_horizontal_derivative() -> Result<(), DeviceError> {
        let src = published::<u8>(4, 1, &[0, 10, 30, 60])?;
        let dst = Arc::new(DeviceImage::allocate("dst", [4, 1].into(), Residency::DeviceOnly)?);
        SeparablePass::new(Axis::X, &[-1, 0, 1], src, dst.clone())
            .launch(&NdRange::new([4, 1].into()), ExecutionStrategy::Serial)?;
        assert_eq!(dst.view()?, &[10, 30, 50, 30]);
        Ok(())
    }

    #[test]
    fn test_vertical_smoothing_of_signed_input() -> Result<(), DeviceError> {
        let src = published::<i16>(1, 3, &[-4, 8, 0])?;
        let dst = Arc::new(DeviceImage::allocate("dst", [1, 3].into(), Residency::DeviceOnly)?);
        SeparablePass::new(Axis::Y, &[1, 2, 1], src, dst.clone())
            .launch(&NdRange::new([1, 3].into()), ExecutionStrategy::ParallelRows)?;
        assert_eq!(dst.view()?, &[-4 * 3 + 8, -4 + 16, 8 + 0 * 3]);
        Ok(())
    }
}
