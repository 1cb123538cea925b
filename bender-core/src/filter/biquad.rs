//! Butterworth design and a stateful cascade of second-order sections.
//!
//! Each section is the bilinear transform of one analog Butterworth pole
//! pair, pre-warped at the cutoff, so the cascade matches what a textbook
//! `butter(order, wn, output="sos")` design produces. Sections run in
//! transposed direct form II with two history values per section per channel.

use std::f64::consts::PI;

use crate::error::{BenderError, Result};

/// Filter response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    LowPass,
    HighPass,
}

/// Normalized (`a0 == 1`) coefficients of one second-order section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    fn design(response: Response, cutoff_hz: f64, sample_rate: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;

        let (b0, b1, b2) = match response {
            Response::LowPass => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            Response::HighPass => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// |H(e^{jω})| at `freq_hz`.
    pub fn magnitude_at(&self, freq_hz: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / sample_rate;
        let (s1, c1) = w.sin_cos();
        let (s2, c2) = (2.0 * w).sin_cos();
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);
        (num_re.hypot(num_im)) / (den_re.hypot(den_im))
    }
}

/// Design an even-order Butterworth filter as cascaded sections.
///
/// # Errors
/// `BenderError::Config` for an odd or zero order, or a cutoff outside
/// `(0, sample_rate / 2)`.
pub fn butterworth(
    order: usize,
    response: Response,
    cutoff_hz: f64,
    sample_rate: u32,
) -> Result<Vec<BiquadCoeffs>> {
    if order == 0 || order % 2 != 0 {
        return Err(BenderError::Config(format!(
            "butterworth order must be even and non-zero, got {order}"
        )));
    }
    let fs = sample_rate as f64;
    if !(cutoff_hz > 0.0 && cutoff_hz < fs / 2.0) {
        return Err(BenderError::Config(format!(
            "cutoff {cutoff_hz} Hz outside (0, {}) Hz",
            fs / 2.0
        )));
    }

    let sections = (0..order / 2)
        .map(|k| {
            // Pole pair k of the analog prototype sits at angle (2k+1)π/2N.
            let q = 1.0 / (2.0 * ((2 * k + 1) as f64 * PI / (2 * order) as f64).sin());
            BiquadCoeffs::design(response, cutoff_hz, fs, q)
        })
        .collect();
    Ok(sections)
}

/// A cascade of second-order sections with independent history per channel.
#[derive(Debug, Clone)]
pub struct SosFilter {
    sections: Vec<BiquadCoeffs>,
    channels: usize,
    /// `[z1, z2]` for section `s` of channel `c` at `c * sections.len() + s`.
    state: Vec<[f64; 2]>,
}

impl SosFilter {
    pub fn new(sections: Vec<BiquadCoeffs>, channels: usize) -> Self {
        let state = vec![[0.0; 2]; sections.len() * channels];
        Self {
            sections,
            channels,
            state,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Filter order (two per section).
    pub fn order(&self) -> usize {
        self.sections.len() * 2
    }

    /// Run one sample of `channel` through every section.
    #[inline]
    pub fn process(&mut self, channel: usize, mut x: f64) -> f64 {
        let n = self.sections.len();
        let state = &mut self.state[channel * n..(channel + 1) * n];
        for (c, z) in self.sections.iter().zip(state.iter_mut()) {
            let y = c.b0 * x + z[0];
            z[0] = c.b1 * x - c.a1 * y + z[1];
            z[1] = c.b2 * x - c.a2 * y;
            x = y;
        }
        x
    }

    /// Cascade magnitude response at `freq_hz`.
    pub fn magnitude_at(&self, freq_hz: f64, sample_rate: u32) -> f64 {
        self.sections
            .iter()
            .map(|c| c.magnitude_at(freq_hz, sample_rate as f64))
            .product()
    }

    /// Sum of squared history values across all sections and channels.
    pub fn state_energy(&self) -> f64 {
        self.state.iter().map(|z| z[0] * z[0] + z[1] * z[1]).sum()
    }

    /// Clear all history. Only valid on pipeline restart.
    pub fn reset(&mut self) {
        self.state.iter_mut().for_each(|z| *z = [0.0; 2]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const FS: u32 = 48_000;

    fn cascade(order: usize, response: Response, cutoff: f64) -> SosFilter {
        SosFilter::new(butterworth(order, response, cutoff, FS).unwrap(), 1)
    }

    #[test]
    fn highpass_is_minus_3db_at_cutoff() {
        let hp = cascade(4, Response::HighPass, 80.0);
        assert_eq!(hp.order(), 4);
        assert_abs_diff_eq!(hp.magnitude_at(80.0, FS), std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
        assert_abs_diff_eq!(hp.magnitude_at(2_000.0, FS), 1.0, epsilon = 1e-3);
        assert!(hp.magnitude_at(20.0, FS) < 0.01);
    }

    #[test]
    fn lowpass_is_minus_3db_at_cutoff_and_unity_at_dc() {
        let lp = cascade(6, Response::LowPass, 8_000.0);
        assert_eq!(lp.order(), 6);
        assert_abs_diff_eq!(lp.magnitude_at(8_000.0, FS), std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
        assert_abs_diff_eq!(lp.magnitude_at(0.0, FS), 1.0, epsilon = 1e-9);
        assert!(lp.magnitude_at(16_000.0, FS) < 0.01);
    }

    #[test]
    fn rejects_odd_order_and_bad_cutoff() {
        assert!(butterworth(3, Response::LowPass, 1_000.0, FS).is_err());
        assert!(butterworth(0, Response::LowPass, 1_000.0, FS).is_err());
        assert!(butterworth(4, Response::HighPass, 24_000.0, FS).is_err());
        assert!(butterworth(4, Response::HighPass, 0.0, FS).is_err());
    }

    #[test]
    fn highpass_removes_dc_over_time() {
        let mut hp = cascade(4, Response::HighPass, 80.0);
        let mut last = 1.0;
        for _ in 0..48_000 {
            last = hp.process(0, 0.5);
        }
        assert!(last.abs() < 1e-4, "dc residue {last}");
    }

    #[test]
    fn channels_keep_independent_history() {
        let mut lp = SosFilter::new(butterworth(2, Response::LowPass, 1_000.0, FS).unwrap(), 2);
        for _ in 0..100 {
            lp.process(0, 1.0);
        }
        // Channel 1 has seen nothing yet; its first output is just b0 * x.
        let first = lp.process(1, 1.0);
        let fresh = butterworth(2, Response::LowPass, 1_000.0, FS).unwrap()[0].b0;
        assert_abs_diff_eq!(first, fresh, epsilon = 1e-12);
    }

    #[test]
    fn state_carries_across_calls_like_one_long_run() {
        let signal: Vec<f64> = (0..1000).map(|i| ((i as f64) * 0.37).sin()).collect();

        let mut whole = cascade(4, Response::HighPass, 80.0);
        let expected: Vec<f64> = signal.iter().map(|&x| whole.process(0, x)).collect();

        let mut split = cascade(4, Response::HighPass, 80.0);
        let mut got = Vec::new();
        for piece in signal.chunks(137) {
            got.extend(piece.iter().map(|&x| split.process(0, x)));
        }
        assert_eq!(expected, got);
    }

    #[test]
    fn reset_clears_history() {
        let mut hp = cascade(4, Response::HighPass, 80.0);
        hp.process(0, 0.9);
        assert!(hp.state_energy() > 0.0);
        hp.reset();
        assert_eq!(hp.state_energy(), 0.0);
    }
}
