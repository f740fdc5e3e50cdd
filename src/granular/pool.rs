use super::envelope::GrainEnvelope;

// -------------------------------------------------------------------------------------------------

/// State of a single grain: a short, enveloped read through a delay buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grain {
    pub(crate) active: bool,
    /// Absolute fractional read position in the delay buffer.
    pub(crate) position: f64,
    /// Signed read position increment per sample.
    pub(crate) playback_rate: f64,
    pub(crate) age: u32,
    pub(crate) duration: u32,
    pub(crate) envelope: GrainEnvelope,
    pub(crate) pan: f32,
    pub(crate) gain_left: f32,
    pub(crate) gain_right: f32,
    pub(crate) reverse: bool,
    /// Trigger order, used to pick the earliest triggered grain on ties.
    pub(crate) sequence: u64,
}

impl Grain {
    pub const fn new() -> Self {
        Self {
            active: false,
            position: 0.0,
            playback_rate: 1.0,
            age: 0,
            duration: 0,
            envelope: GrainEnvelope::Hann,
            pan: 0.0,
            gain_left: 1.0,
            gain_right: 1.0,
            reverse: false,
            sequence: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
    pub fn position(&self) -> f64 {
        self.position
    }
    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }
    pub fn age(&self) -> u32 {
        self.age
    }
    pub fn duration(&self) -> u32 {
        self.duration
    }
    pub fn envelope(&self) -> GrainEnvelope {
        self.envelope
    }
    pub fn pan(&self) -> f32 {
        self.pan
    }
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Normalized progress through the grain's lifetime.
    #[inline]
    pub fn phase(&self) -> f64 {
        if self.duration == 0 {
            1.0
        } else {
            self.age as f64 / self.duration as f64
        }
    }

    /// True when the grain played all of its samples.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.age >= self.duration
    }
}

impl Default for Grain {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

/// Result of [`GrainPool::acquire_grain`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquiredGrain {
    /// Slot index of the acquired grain.
    pub index: usize,
    /// Previous state of the slot, when an active grain got stolen to make room.
    pub stolen: Option<Grain>,
}

// -------------------------------------------------------------------------------------------------

/// Fixed capacity arena of grain slots.
///
/// Acquiring returns a free slot when there is one. When all slots are busy, the oldest active
/// grain (greatest age, earliest trigger on ties) gets stolen and its previous state is handed
/// back, so the caller can fade it out instead of cutting it.
///
/// Capacity is fixed in [`Self::prepare`]: acquiring and releasing never allocates.
#[derive(Debug, Clone)]
pub struct GrainPool {
    grains: Vec<Grain>,
    active_count: usize,
    next_sequence: u64,
}

impl GrainPool {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        let mut pool = Self {
            grains: Vec::new(),
            active_count: 0,
            next_sequence: 0,
        };
        pool.prepare(capacity);
        pool
    }

    /// (Re)allocate all grain slots. Not real-time safe.
    pub fn prepare(&mut self, capacity: usize) {
        self.grains = vec![Grain::new(); capacity];
        self.active_count = 0;
        self.next_sequence = 0;
    }

    /// Total number of grain slots.
    pub fn capacity(&self) -> usize {
        self.grains.len()
    }

    /// Number of currently playing grains.
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Grab a slot for a new grain. Returns `None` only for a pool without capacity.
    ///
    /// The returned slot is marked active and reset to its initial state.
    pub fn acquire_grain(&mut self) -> Option<AcquiredGrain> {
        if self.grains.is_empty() {
            return None;
        }
        let (index, stolen) = match self.grains.iter().position(|grain| !grain.active) {
            Some(index) => {
                self.active_count += 1;
                (index, None)
            }
            None => {
                let index = self.oldest_grain_index()?;
                (index, Some(self.grains[index]))
            }
        };
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.grains[index] = Grain {
            active: true,
            sequence,
            ..Grain::new()
        };
        Some(AcquiredGrain { index, stolen })
    }

    /// Mark a slot as free. Releasing a free or invalid slot does nothing.
    pub fn release_grain(&mut self, index: usize) {
        if let Some(grain) = self.grains.get_mut(index) {
            if grain.active {
                grain.active = false;
                self.active_count -= 1;
            }
        }
    }

    pub fn grain(&self, index: usize) -> Option<&Grain> {
        self.grains.get(index)
    }

    pub fn grain_mut(&mut self, index: usize) -> Option<&mut Grain> {
        self.grains.get_mut(index)
    }

    /// Mutable access to all slots, active or not.
    pub(crate) fn grains_mut(&mut self) -> &mut [Grain] {
        &mut self.grains
    }

    /// Free all slots without deallocating.
    pub fn reset(&mut self) {
        self.grains.fill(Grain::new());
        self.active_count = 0;
        self.next_sequence = 0;
    }

    fn oldest_grain_index(&self) -> Option<usize> {
        self.grains
            .iter()
            .enumerate()
            .filter(|(_, grain)| grain.active)
            .max_by(|(_, a), (_, b)| a.age.cmp(&b.age).then(b.sequence.cmp(&a.sequence)))
            .map(|(index, _)| index)
    }
}

impl Default for GrainPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

// -------------------------------------------------------------------------------------------------
