//! Circular delay buffers with fractional reads.

use assume::assume;

// -------------------------------------------------------------------------------------------------

/// Mono circular delay buffer with fractional (linear interpolated) read positions.
///
/// The buffer size is rounded up to the next power of two, so positions wrap with a mask.
/// Reads address the buffer either relative to the most recently written sample (`read`)
/// or absolutely (`read_at`), which is what grains use to keep playing while writes stop.
#[derive(Debug, Default, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    buffer_mask: usize,
    write_pos: usize,
}

impl DelayLine {
    /// Create a new delay buffer which can hold at least the given number of sample frames.
    pub fn new(max_delay_frames: usize) -> Self {
        let mut delay_line = Self::default();
        delay_line.allocate(max_delay_frames);
        delay_line
    }

    /// (Re)allocate the buffer. Not real-time safe.
    pub fn allocate(&mut self, max_delay_frames: usize) {
        let buffer_frames = (max_delay_frames + 1).next_power_of_two().max(2);
        self.buffer = vec![0.0; buffer_frames];
        self.buffer_mask = buffer_frames - 1;
        self.write_pos = 0;
    }

    /// Buffer capacity in samples.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when the buffer got no memory allocated yet.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Absolute index of the most recently written sample.
    #[inline(always)]
    pub fn newest_index(&self) -> usize {
        self.write_pos.wrapping_sub(1) & self.buffer_mask
    }

    /// Absolute, fractional read position for the given delay in samples behind the most
    /// recently written sample.
    #[inline]
    pub fn position_for_delay(&self, delay: f64) -> f64 {
        if self.buffer.is_empty() {
            return 0.0;
        }
        (self.newest_index() as f64 - delay).rem_euclid(self.buffer.len() as f64)
    }

    /// Wrap an absolute, fractional position into the buffer.
    #[inline]
    pub fn wrap_position(&self, position: f64) -> f64 {
        if self.buffer.is_empty() {
            return 0.0;
        }
        position.rem_euclid(self.buffer.len() as f64)
    }

    /// Clear the buffer content and write position.
    pub fn flush(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }

    /// Write a new sample and advance the write position.
    #[inline]
    pub fn write(&mut self, input: f32) {
        if self.buffer.is_empty() {
            return;
        }
        let index = self.write_pos & self.buffer_mask;
        assume!(unsafe: index < self.buffer.len());
        self.buffer[index] = input;
        self.write_pos = (self.write_pos + 1) & self.buffer_mask;
    }

    /// Write a new sample, blended with the content which is going to be overwritten.
    /// `keep` = 0 writes the input only, `keep` = 1 keeps the old content.
    #[inline]
    pub fn write_blended(&mut self, input: f32, keep: f32) {
        if self.buffer.is_empty() {
            return;
        }
        let index = self.write_pos & self.buffer_mask;
        assume!(unsafe: index < self.buffer.len());
        let old = self.buffer[index];
        self.buffer[index] = input + (old - input) * keep;
        self.write_pos = (self.write_pos + 1) & self.buffer_mask;
    }

    /// Read a delayed sample: delay 0 is the most recently written sample.
    #[inline]
    pub fn read(&self, delay: f32) -> f32 {
        let max_delay = self.buffer.len().saturating_sub(2) as f32;
        let delay = delay.clamp(0.0, max_delay);
        self.read_at(self.newest_index() as f64 - delay as f64)
    }

    /// Read at an absolute, fractional position. Positions outside of the buffer wrap.
    #[inline]
    pub fn read_at(&self, position: f64) -> f32 {
        if self.buffer.is_empty() || !position.is_finite() {
            return 0.0;
        }
        let position_floor = position.floor();
        let fraction = (position - position_floor) as f32;

        let index1 = (position_floor as i64 as usize) & self.buffer_mask;
        let index2 = (index1 + 1) & self.buffer_mask;
        assume!(unsafe: index1 < self.buffer.len());
        assume!(unsafe: index2 < self.buffer.len());

        let value1 = self.buffer[index1];
        let value2 = self.buffer[index2];
        value1 + (value2 - value1) * fraction
    }
}

// -------------------------------------------------------------------------------------------------
