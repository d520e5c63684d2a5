use serde::{Deserialize, Serialize};

use pyrflow_device::ScopedTimer;

use crate::error::FlowError;

/// Coefficients of the device program.
///
/// All tap lists are applied as correlations centred on the middle tap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramSource {
    /// Smoothing taps of the half-resolution downfilter, normalised by their sum.
    pub downfilter: Vec<i32>,
    /// Derivative taps of the edge operator.
    pub derivative: Vec<i32>,
    /// Smoothing taps of the edge operator.
    pub smoothing: Vec<i32>,
    /// Radius of the square structure tensor window.
    pub window_radius: usize,
}

impl Default for ProgramSource {
    fn default() -> Self {
        Self {
            downfilter: vec![1, 4, 6, 4, 1],
            derivative: vec![-1, 0, 1],
            smoothing: vec![1, 2, 1],
            window_radius: 2,
        }
    }
}

/// A validated device program.
///
/// # Example
///
/// ```
/// use pyrflow_imgproc::program::{Program, ProgramSource};
///
/// let program = Program::build(ProgramSource::default()).unwrap();
/// assert_eq!(program.downfilter_sum(), 16);
/// assert_eq!(program.derivative_gain(), 8.0);
/// ```
#[derive(Clone, Debug)]
pub struct Program {
    source: ProgramSource,
    downfilter_sum: i32,
    derivative_gain: f32,
}

fn check_taps(log: &mut Vec<String>, name: &str, taps: &[i32]) {
    if taps.is_empty() || taps.len() % 2 == 0 {
        log.push(format!(
            "error: {name}: expected an odd, non-empty tap list, got {} taps",
            taps.len()
        ));
    }
}

fn abs_sum(taps: &[i32]) -> i64 {
    taps.iter().map(|&t| (t as i64).abs()).sum()
}

impl Program {
    /// Validate `source` and derive the constants the kernels need.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::ConfigurationError`] with the build log, one
    /// line per problem found.
    pub fn build(source: ProgramSource) -> Result<Self, FlowError> {
        let _timer = ScopedTimer::new("Build Program");
        let mut log = Vec::new();

        check_taps(&mut log, "downfilter", &source.downfilter);
        check_taps(&mut log, "derivative", &source.derivative);
        check_taps(&mut log, "smoothing", &source.smoothing);

        if source.downfilter.iter().any(|&t| t < 0) {
            log.push("error: downfilter: taps must be non-negative".to_string());
        }
        let downfilter_sum: i64 = source.downfilter.iter().map(|&t| t as i64).sum();
        if downfilter_sum <= 0 {
            log.push("error: downfilter: taps must have a positive sum".to_string());
        } else if downfilter_sum * u8::MAX as i64 > i32::MAX as i64 {
            log.push(format!(
                "error: downfilter: tap sum {downfilter_sum} overflows the accumulator"
            ));
        }

        let radius = (source.derivative.len() / 2) as i64;
        let moment: i64 = source
            .derivative
            .iter()
            .enumerate()
            .map(|(k, &t)| t as i64 * (k as i64 - radius))
            .sum();
        let smoothing_sum: i64 = source.smoothing.iter().map(|&t| t as i64).sum();
        let gain = moment * smoothing_sum;
        if gain == 0 {
            log.push(format!(
                "error: derivative: operator has zero gain (first moment {moment}, smoothing sum {smoothing_sum})"
            ));
        }

        let first_pass = u8::MAX as i64 * abs_sum(&source.derivative).max(abs_sum(&source.smoothing));
        let max_gradient = u8::MAX as i64 * abs_sum(&source.derivative) * abs_sum(&source.smoothing);
        if first_pass.max(max_gradient) > i16::MAX as i64 {
            log.push(format!(
                "error: derivative: response up to {} does not fit 16-bit samples",
                first_pass.max(max_gradient)
            ));
        }

        let window = (2 * source.window_radius as i64 + 1).pow(2);
        let max_tensor = max_gradient
            .min(i16::MAX as i64)
            .pow(2)
            .checked_mul(window)
            .unwrap_or(i64::MAX);
        if max_tensor > i32::MAX as i64 {
            log.push(format!(
                "error: structure tensor: window radius {} overflows 32-bit sums",
                source.window_radius
            ));
        }

        if !log.is_empty() {
            let log = log.join("\n");
            log::warn!("program build failed:\n{log}");
            return Err(FlowError::ConfigurationError(log));
        }

        log::debug!(
            "built program: downfilter {:?}, derivative {:?} x {:?}, window radius {}",
            source.downfilter,
            source.derivative,
            source.smoothing,
            source.window_radius
        );

        Ok(Self {
            source,
            downfilter_sum: downfilter_sum as i32,
            derivative_gain: gain as f32,
        })
    }

    /// The coefficients the program was built from.
    pub fn source(&self) -> &ProgramSource {
        &self.source
    }

    /// Downfilter taps.
    pub fn downfilter(&self) -> &[i32] {
        &self.source.downfilter
    }

    /// Normalisation of the downfilter.
    pub fn downfilter_sum(&self) -> i32 {
        self.downfilter_sum
    }

    /// Derivative taps.
    pub fn derivative(&self) -> &[i32] {
        &self.source.derivative
    }

    /// Smoothing taps of the edge operator.
    pub fn smoothing(&self) -> &[i32] {
        &self.source.smoothing
    }

    /// Radius of the structure tensor window.
    pub fn window_radius(&self) -> usize {
        self.source.window_radius
    }

    /// Response of the edge operator to a unit intensity ramp.
    ///
    /// Dividing a derivative sample by the gain yields intensity units per pixel.
    pub fn derivative_gain(&self) -> f32 {
        self.derivative_gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_program() -> Result<(), FlowError> {
        let program = Program::build(ProgramSource::default())?;
        assert_eq!(program.downfilter(), &[1, 4, 6, 4, 1]);
        assert_eq!(program.downfilter_sum(), 16);
        assert_eq!(program.derivative_gain(), 8.0);
        assert_eq!(program.window_radius(), 2);
        Ok(())
    }

    #[test]
    fn test_build_log_collects_every_problem() {
        let source = ProgramSource {
            downfilter: vec![1, -1],
            derivative: vec![1, 2, 1],
            smoothing: vec![],
            window_radius: 2,
        };
        let Err(FlowError::ConfigurationError(log)) = Program::build(source) else {
            panic!("expected a configuration error");
        };
        let lines = log.lines().collect::<Vec<_>>();
        assert!(lines.iter().any(|l| l.starts_with("error: downfilter: expected an odd")));
        assert!(lines.iter().any(|l| l.starts_with("error: smoothing")));
        assert!(lines.iter().any(|l| l.contains("non-negative")));
        assert!(lines.iter().any(|l| l.contains("positive sum")));
        assert!(lines.iter().any(|l| l.contains("zero gain")));
    }

    #[test]
    fn test_overflowing_window() {
        let source = ProgramSource {
            window_radius: 50,
            ..Default::default()
        };
        let res = Program::build(source);
        assert!(matches!(res, Err(FlowError::ConfigurationError(log)) if log.contains("window radius 50")));
    }

    #[test]
    fn test_source_from_json() -> Result<(), Box<dyn std::error::Error>> {
        let source: ProgramSource = serde_json::from_str(r#"{"window_radius": 3}"#)?;
        assert_eq!(source.window_radius, 3);
        assert_eq!(source.derivative, vec![-1, 0, 1]);
        Program::build(source)?;
        Ok(())
    }

    #[test]
    fn test_invalid_source_from_json_reports_log() -> Result<(), Box<dyn std::error::Error>> {
        let source: ProgramSource =
            serde_json::from_str(r#"{"derivative": [1, 2, 1], "smoothing": [1, 1]}"#)?;
        assert_eq!(source.downfilter, vec![1, 4, 6, 4, 1]);

        let err = Program::build(source).err().ok_or("build should fail")?;
        let message = err.to_string();
        assert!(message.starts_with("device program failed to build:\n"));
        assert!(message.contains("error: smoothing"));
        assert!(message.contains("zero gain"));
        Ok(())
    }
}
