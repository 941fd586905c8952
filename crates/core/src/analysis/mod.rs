use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{audio::MAGNITUDE_LEN, Result, VisualiserError};

/// Magnitude that maps to the full 255 output level after windowing.
const FULL_SCALE_DB: f32 = 0.0;
/// Magnitudes at or below this level quantise to zero.
const FLOOR_DB: f32 = -72.0;

/// Converts blocks of PCM samples into the magnitude bytes carried by an
/// [`AudioSnapshot`](crate::AudioSnapshot).
///
/// The block is Hann-windowed, transformed with a real FFT, and each of the
/// first [`MAGNITUDE_LEN`] bins is mapped onto 0..=255 on a decibel scale.
pub struct SpectrumAnalyzer {
    fft_size: usize,
    planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SpectrumAnalyzer {
    /// `fft_size` must be a power of two of at least `2 * MAGNITUDE_LEN` for
    /// every output byte to correspond to a distinct bin.
    pub fn new(fft_size: usize) -> Result<Self> {
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return Err(VisualiserError::msg(format!(
                "fft size {fft_size} must be a power of two"
            )));
        }
        Ok(Self {
            fft_size,
            planner: RealFftPlanner::new(),
            fft: None,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Analyses `samples`, zero-padding or truncating to the FFT size.
    pub fn analyze(&mut self, samples: &[f32]) -> Result<[u8; MAGNITUDE_LEN]> {
        if samples.is_empty() {
            return Err(VisualiserError::msg("analysis requires at least one sample"));
        }

        let size = self.fft_size;
        let fft = self.prepare_fft();
        for (index, slot) in fft.input.iter_mut().enumerate() {
            let sample = samples.get(index).copied().unwrap_or(0.0);
            *slot = sample * hann_value(index, size);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
            .map_err(|err| VisualiserError::msg(format!("fft failed: {err}")))?;

        // Hann window coherent gain is 0.5, so a full-scale sine peaks at
        // size / 4.
        let reference = size as f32 / 4.0;
        let mut out = [0u8; MAGNITUDE_LEN];
        for (byte, bin) in out.iter_mut().zip(fft.spectrum.iter()) {
            *byte = quantise(bin.norm() / reference);
        }
        Ok(out)
    }

    fn prepare_fft(&mut self) -> &mut FftResources {
        let size = self.fft_size;
        let planner = &mut self.planner;
        self.fft.get_or_insert_with(|| {
            let plan = planner.plan_fft_forward(size);
            FftResources {
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                plan,
            }
        })
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("fft_size", &self.fft_size)
            .field("planned", &self.fft.is_some())
            .finish()
    }
}

fn quantise(amplitude: f32) -> u8 {
    if amplitude <= f32::EPSILON {
        return 0;
    }
    let db = 20.0 * amplitude.log10();
    let scaled = (db - FLOOR_DB) / (FULL_SCALE_DB - FLOOR_DB);
    (scaled.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_maps_to_zero() {
        let mut analyzer = SpectrumAnalyzer::new(2048).unwrap();
        let bytes = analyzer.analyze(&[0.0; 2048]).unwrap();
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let size = 2048;
        let bin = 64;
        let samples: Vec<f32> = (0..size)
            .map(|i| (2.0 * PI * bin as f32 * i as f32 / size as f32).sin())
            .collect();

        let mut analyzer = SpectrumAnalyzer::new(size).unwrap();
        let bytes = analyzer.analyze(&samples).unwrap();
        let (peak, _) = bytes
            .iter()
            .enumerate()
            .max_by_key(|(_, b)| **b)
            .unwrap();
        assert_eq!(peak, bin);
        assert!(bytes[bin] > 240);
    }

    #[test]
    fn rejects_bad_sizes_and_empty_input() {
        assert!(SpectrumAnalyzer::new(1000).is_err());
        let mut analyzer = SpectrumAnalyzer::new(256).unwrap();
        assert!(analyzer.analyze(&[]).is_err());
        // short blocks are zero padded
        assert!(analyzer.analyze(&[0.5; 10]).is_ok());
    }
}
