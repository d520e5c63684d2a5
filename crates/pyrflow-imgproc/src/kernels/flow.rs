use std::sync::Arc;

use pyrflow_device::{
    parallel::for_each_row, DeviceError, DeviceImage, ExecutionStrategy, Kernel, NdRange,
};

/// Source of the initial flow guess of a level.
pub enum FlowGuess {
    /// No coarser level: the guess is the zero field.
    Zero,
    /// Twice the flow of the next coarser level, sampled at half resolution.
    Upsampled(Arc<DeviceImage<f32, 2>>),
}

/// Single Lucas-Kanade step at every pixel of one level.
///
/// The temporal mismatch `It(q) = I2(q + g) - I1(q)` is accumulated over
/// the tensor window with the pixel's guess `g`, then the 2x2 system is
/// solved directly. A singular tensor leaves the guess unchanged.
pub struct FlowSolve {
    radius: usize,
    gain: f32,
    first: Arc<DeviceImage<u8, 1>>,
    second: Arc<DeviceImage<u8, 1>>,
    gx: Arc<DeviceImage<i16, 1>>,
    gy: Arc<DeviceImage<i16, 1>>,
    tensor: Arc<DeviceImage<i32, 4>>,
    guess: FlowGuess,
    dst: Arc<DeviceImage<f32, 2>>,
}

impl FlowSolve {
    /// Bind the flow solve of one level.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        radius: usize,
        gain: f32,
        first: Arc<DeviceImage<u8, 1>>,
        second: Arc<DeviceImage<u8, 1>>,
        gx: Arc<DeviceImage<i16, 1>>,
        gy: Arc<DeviceImage<i16, 1>>,
        tensor: Arc<DeviceImage<i32, 4>>,
        guess: FlowGuess,
        dst: Arc<DeviceImage<f32, 2>>,
    ) -> Self {
        Self {
            radius,
            gain,
            first,
            second,
            gx,
            gy,
            tensor,
            guess,
            dst,
        }
    }
}

/// Bilinear sample of a single channel image, with coordinates clamped to the image.
fn sample_bilinear(data: &[u8], w: usize, h: usize, u: f32, v: f32) -> f32 {
    let u = u.clamp(0.0, (w - 1) as f32);
    let v = v.clamp(0.0, (h - 1) as f32);

    let iu0 = u.trunc() as usize;
    let iv0 = v.trunc() as usize;
    let iu1 = (iu0 + 1).min(w - 1);
    let iv1 = (iv0 + 1).min(h - 1);

    let frac_u = u - iu0 as f32;
    let frac_v = v - iv0 as f32;

    let p00 = data[iv0 * w + iu0] as f32;
    let p01 = data[iv0 * w + iu1] as f32;
    let p10 = data[iv1 * w + iu0] as f32;
    let p11 = data[iv1 * w + iu1] as f32;

    (p00 * (1.0 - frac_u) + p01 * frac_u) * (1.0 - frac_v)
        + (p10 * (1.0 - frac_u) + p11 * frac_u) * frac_v
}

impl Kernel for FlowSolve {
    fn name(&self) -> &'static str {
        "flow_solve"
    }

    fn launch(&self, range: &NdRange, strategy: ExecutionStrategy) -> Result<(), DeviceError> {
        let size = self.first.size();
        self.second.expect_size(size)?;
        self.gx.expect_size(size)?;
        self.gy.expect_size(size)?;
        self.tensor.expect_size(size)?;
        self.dst.expect_size(size)?;
        self.dst.expect_size(range.size())?;

        let first = self.first.view()?;
        let second = self.second.view()?;
        let gx = self.gx.view()?;
        let gy = self.gy.view()?;
        let tensor = self.tensor.view()?;
        let coarse = match &self.guess {
            FlowGuess::Zero => None,
            FlowGuess::Upsampled(coarse) => {
                if coarse.width() == 0 || coarse.height() == 0 {
                    return Err(DeviceError::InvalidImageSize {
                        name: coarse.name().to_string(),
                        expected: size.halved(),
                        actual: coarse.size(),
                    });
                }
                Some((coarse.view()?, coarse.width(), coarse.height()))
            }
        };

        let (w, h) = (size.width, size.height);
        let r = self.radius;

        self.dst.write_with(|dst| {
            for_each_row(strategy, range, dst, w * 2, |y, row| {
                let rows = y.saturating_sub(r)..(y + r + 1).min(h);
                for (x, out) in row.chunks_exact_mut(2).enumerate() {
                    let (gu, gv) = match coarse {
                        None => (0.0, 0.0),
                        Some((flow, cw, ch)) => {
                            let idx = ((y / 2).min(ch - 1) * cw + (x / 2).min(cw - 1)) * 2;
                            (2.0 * flow[idx], 2.0 * flow[idx + 1])
                        }
                    };

                    let (mut bx, mut by) = (0.0f32, 0.0f32);
                    for wy in rows.clone() {
                        for wx in x.saturating_sub(r)..(x + r + 1).min(w) {
                            let q = wy * w + wx;
                            let warped =
                                sample_bilinear(second, w, h, wx as f32 + gu, wy as f32 + gv);
                            let it = warped - first[q] as f32;
                            bx += gx[q] as f32 * it;
                            by += gy[q] as f32 * it;
                        }
                    }

                    let t = &tensor[(y * w + x) * 4..(y * w + x) * 4 + 4];
                    let (a, c, d) = (t[0] as i64, t[1] as i64, t[3] as i64);
                    let det = a * d - c * c;
                    let (du, dv) = if det == 0 {
                        (0.0, 0.0)
                    } else {
                        let k = -self.gain as f64 / det as f64;
                        let (a, c, d) = (a as f64, c as f64, d as f64);
                        let (bx, by) = (bx as f64, by as f64);
                        ((k * (d * bx - c * by)) as f32, (k * (a * by - c * bx)) as f32)
                    };

                    out[0] = gu + du;
                    out[1] = gv + dv;
                }
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pyrflow_device::Residency;

    #[test]
    fn test_sample_bilinear() {
        let data = [0u8, 10, 20, 30];
        assert_relative_eq!(sample_bilinear(&data, 2, 2, 0.5, 0.0), 5.0);
        assert_relative_eq!(sample_bilinear(&data, 2, 2, 0.5, 0.5), 15.0);
        assert_relative_eq!(sample_bilinear(&data, 2, 2, -3.0, 7.0), 20.0);
        assert_relative_eq!(sample_bilinear(&data, 2, 2, 1.0, 1.0), 30.0);
    }

    fn filled<T: pyrflow_image::Sample, const C: usize>(
        name: &str,
        w: usize,
        h: usize,
        val: T,
    ) -> Result<Arc<DeviceImage<T, C>>, DeviceError> {
        let image = Arc::new(DeviceImage::allocate(name, [w, h].into(), Residency::DeviceOnly)?);
        image.write_with(|d| {
            d.fill(val);
            Ok(())
        })?;
        Ok(image)
    }

    #[test]
    fn test_singular_tensor_keeps_guess() -> Result<(), DeviceError> {
        let coarse = Arc::new(DeviceImage::<f32, 2>::allocate(
            "coarse",
            [2, 1].into(),
            Residency::DeviceOnly,
        )?);
        coarse.write_with(|d| {
            d.copy_from_slice(&[0.5, -0.25, 1.0, 0.0]);
            Ok(())
        })?;

        let dst = Arc::new(DeviceImage::allocate("flow", [4, 2].into(), Residency::HostVisible)?);
        FlowSolve::new(
            2,
            8.0,
            filled("first", 4, 2, 7u8)?,
            filled("second", 4, 2, 7u8)?,
            filled("gx", 4, 2, 0i16)?,
            filled("gy", 4, 2, 0i16)?,
            filled("tensor", 4, 2, 0i32)?,
            FlowGuess::Upsampled(coarse),
            dst.clone(),
        )
        .launch(&NdRange::new([4, 2].into()), ExecutionStrategy::Serial)?;

        let flow = dst.view()?;
        assert_eq!(&flow[0..2], &[1.0, -0.5]);
        assert_eq!(&flow[4..6], &[2.0, 0.0]);
        // row 1 maps onto the only coarse row
        assert_eq!(&flow[12..14], &[2.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_linear_ramp_shift() -> Result<(), DeviceError> {
        // I1(x) = 10x, I2(x) = 10(x - 1): the content moved by +1 along x
        let (w, h) = (9, 5);
        let ramp = |shift: f32| -> Result<Arc<DeviceImage<u8, 1>>, DeviceError> {
            let image = Arc::new(DeviceImage::allocate("ramp", [w, h].into(), Residency::DeviceOnly)?);
            image.write_with(|d| {
                d.iter_mut()
                    .enumerate()
                    .for_each(|(i, v)| *v = (100.0 + 10.0 * ((i % w) as f32 - shift)) as u8);
                Ok(())
            })?;
            Ok(image)
        };

        // sobel response of the ramp: 10 * 2 * 4
        let gx = filled("gx", w, h, 80i16)?;
        let gy = filled("gy", w, h, 0i16)?;
        let tensor = Arc::new(DeviceImage::<i32, 4>::allocate("tensor", [w, h].into(), Residency::DeviceOnly)?);
        tensor.write_with(|d| {
            for px in d.chunks_exact_mut(4) {
                px.copy_from_slice(&[80 * 80 * 9, 0, 0, 1]);
            }
            Ok(())
        })?;

        let dst = Arc::new(DeviceImage::allocate("flow", [w, h].into(), Residency::HostVisible)?);
        FlowSolve::new(1, 8.0, ramp(0.0)?, ramp(1.0)?, gx, gy, tensor, FlowGuess::Zero, dst.clone())
            .launch(&NdRange::new([w, h].into()), ExecutionStrategy::ParallelRows)?;

        let flow = dst.view()?;
        let centre = (2 * w + 4) * 2;
        assert_relative_eq!(flow[centre], 1.0, epsilon = 1e-4);
        assert_relative_eq!(flow[centre + 1], 0.0, epsilon = 1e-4);
        Ok(())
    }
}
