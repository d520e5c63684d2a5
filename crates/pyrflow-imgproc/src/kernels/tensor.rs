use std::sync::Arc;

use pyrflow_device::{
    parallel::for_each_row, DeviceError, DeviceImage, ExecutionStrategy, Kernel, NdRange,
};

/// Assembles the per-pixel Lucas-Kanade normal-equations matrix.
///
/// Each output pixel holds `[Σgx², Σgx·gy, Σgx·gy, Σgy²]` over a square
/// window of radius `radius`. Window samples outside the image are skipped.
pub struct StructureTensor {
    radius: usize,
    gx: Arc<DeviceImage<i16, 1>>,
    gy: Arc<DeviceImage<i16, 1>>,
    dst: Arc<DeviceImage<i32, 4>>,
}

impl StructureTensor {
    /// Bind the tensor assembly of `gx` and `gy` into `dst`.
    pub fn new(
        radius: usize,
        gx: Arc<DeviceImage<i16, 1>>,
        gy: Arc<DeviceImage<i16, 1>>,
        dst: Arc<DeviceImage<i32, 4>>,
    ) -> Self {
        Self { radius, gx, gy, dst }
    }
}

impl Kernel for StructureTensor {
    fn name(&self) -> &'static str {
        "structure_tensor"
    }

    fn launch(&self, range: &NdRange, strategy: ExecutionStrategy) -> Result<(), DeviceError> {
        let size = self.gx.size();
        self.gy.expect_size(size)?;
        self.dst.expect_size(size)?;
        self.dst.expect_size(range.size())?;

        let gx = self.gx.view()?;
        let gy = self.gy.view()?;
        let (w, h) = (size.width, size.height);
        let r = self.radius;

        self.dst.write_with(|dst| {
            for_each_row(strategy, range, dst, w * 4, |y, row| {
                let rows = y.saturating_sub(r)..(y + r + 1).min(h);
                for (x, out) in row.chunks_exact_mut(4).enumerate() {
                    let cols = x.saturating_sub(r)..(x + r + 1).min(w);
                    let (mut xx, mut xy, mut yy) = (0i32, 0i32, 0i32);
                    for wy in rows.clone() {
                        for wx in cols.clone() {
                            let ix = gx[wy * w + wx] as i32;
                            let iy = gy[wy * w + wx] as i32;
                            xx += ix * ix;
                            xy += ix * iy;
                            yy += iy * iy;
                        }
                    }
                    out.copy_from_slice(&[xx, xy, xy, yy]);
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

    fn gradient(name: &str, data: &[i16]) -> Result<Arc<DeviceImage<i16, 1>>, DeviceError> {
        let image = Arc::new(DeviceImage::allocate(name, [3, 2].into(), Residency::DeviceOnly)?);
        image.write_with(|d| {
            d.copy_from_slice(data);
            Ok(())
        })?;
        Ok(image)
    }

    #[test]
    fn test_tensor_window() -> Result<(), DeviceError> {
        let gx = gradient("gx", &[1, 0, 0, 0, 0, 2])?;
        let gy = gradient("gy", &[0, 0, 0, 0, 0, -3])?;
        let dst = Arc::new(DeviceImage::allocate("tensor", [3, 2].into(), Residency::DeviceOnly)?);
        StructureTensor::new(1, gx, gy, dst.clone())
            .launch(&NdRange::new([3, 2].into()), ExecutionStrategy::Serial)?;

        let tensor = dst.view()?;
        // (0, 0) only sees the sample at (0, 0) among the non-zero ones
        assert_eq!(&tensor[0..4], &[1, 0, 0, 0]);
        // (1, 0) sees both non-zero samples
        assert_eq!(&tensor[4..8], &[5, -6, -6, 9]);
        // (2, 1) only sees (2, 1)
        assert_eq!(&tensor[20..24], &[4, -6, -6, 9]);
        Ok(())
    }
}
