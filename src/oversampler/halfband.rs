use crate::utils::flush_denormal;

// -------------------------------------------------------------------------------------------------

/// Max supported number of taps.
pub const MAX_TAPS: usize = 63;
/// Max number of stored (non zero, one sided) coefficients.
const MAX_COEFFICIENTS: usize = (MAX_TAPS + 1) / 4;

// -------------------------------------------------------------------------------------------------

/// Linear phase, symmetric half-band FIR low-pass for 2x resampling stages.
///
/// Every even tap apart from the center (which is 0.5) of a half-band kernel is zero, so only
/// the odd offsets from the center of one half of the kernel are stored. The convolution folds
/// the mirrored taps, which needs one multiply per coefficient pair.
///
/// Coefficients are designed as a Kaiser windowed sinc with unity gain at DC and zero gain at
/// Nyquist.
#[derive(Debug, Clone)]
pub struct HalfbandFilter {
    num_taps: usize,
    coefficients: [f32; MAX_COEFFICIENTS],
    num_coefficients: usize,
    // input history, stored twice to read the window without wrapping
    history: [f32; 2 * MAX_TAPS],
    pos: usize,
}

impl HalfbandFilter {
    /// Create a new filter with `num_taps` (31 or 63, or any other `4 * n - 1` value up to
    /// [`MAX_TAPS`]) and the given Kaiser window beta.
    pub fn new(num_taps: usize, kaiser_beta: f64) -> Self {
        assert!(
            num_taps >= 3 && num_taps <= MAX_TAPS && (num_taps + 1) % 4 == 0,
            "Invalid half-band tap count"
        );
        let num_coefficients = (num_taps + 1) / 4;
        let center = (num_taps - 1) / 2;

        let mut designed = [0.0f64; MAX_COEFFICIENTS];
        for (index, coefficient) in designed.iter_mut().take(num_coefficients).enumerate() {
            let offset = (2 * index + 1) as f64;
            let sign = if index % 2 == 0 { 1.0 } else { -1.0 };
            let sinc = sign / (std::f64::consts::PI * offset);
            let ratio = offset / center as f64;
            let window = bessel_i0(kaiser_beta * (1.0 - ratio * ratio).max(0.0).sqrt())
                / bessel_i0(kaiser_beta);
            *coefficient = sinc * window;
        }
        // normalize to unity DC gain: 0.5 + 2 * sum(coefficients) == 1
        let sum = designed.iter().take(num_coefficients).sum::<f64>();
        let scale = if sum.abs() > f64::EPSILON { 0.25 / sum } else { 1.0 };

        let mut coefficients = [0.0f32; MAX_COEFFICIENTS];
        for (target, source) in coefficients.iter_mut().zip(designed.iter()) {
            *target = (source * scale) as f32;
        }

        Self {
            num_taps,
            coefficients,
            num_coefficients,
            history: [0.0; 2 * MAX_TAPS],
            pos: 0,
        }
    }

    /// Number of filter taps.
    pub fn num_taps(&self) -> usize {
        self.num_taps
    }

    /// Group delay in samples at the filter's rate.
    pub fn latency(&self) -> usize {
        (self.num_taps - 1) / 2
    }

    /// One sided, odd offset coefficients, starting next to the center tap.
    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients[..self.num_coefficients]
    }

    /// Apply the filter on a single sample.
    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let num_taps = self.num_taps;
        self.pos = if self.pos == 0 {
            num_taps - 1
        } else {
            self.pos - 1
        };
        self.history[self.pos] = input;
        self.history[self.pos + num_taps] = input;

        // window[k] holds the input from k samples ago
        let window = &self.history[self.pos..self.pos + num_taps];
        let center = (num_taps - 1) / 2;
        let mut output = 0.5 * window[center];
        for (index, coefficient) in self.coefficients[..self.num_coefficients]
            .iter()
            .enumerate()
        {
            let offset = 2 * index + 1;
            output += coefficient * (window[center - offset] + window[center + offset]);
        }
        flush_denormal(output)
    }

    /// Reset filter history.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.pos = 0;
    }
}

// -------------------------------------------------------------------------------------------------

/// Zeroth order modified Bessel function of the first kind (power series).
fn bessel_i0(x: f64) -> f64 {
    let half_x = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    for k in 1..64 {
        term *= half_x / k as f64;
        let squared = term * term;
        sum += squared;
        if squared < sum * 1e-17 {
            break;
        }
    }
    sum
}

// -------------------------------------------------------------------------------------------------
