use std::time::Instant;

/// Continuously refilling token bucket.
///
/// The bucket never reads the clock itself; callers pass `now` so that a
/// single admission decision refills every bucket it touches against the
/// same instant.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_refill: now,
        }
    }

    /// Credit the tokens accrued since the last refill, capped at capacity.
    pub fn refill(&mut self, now: Instant) {
        self.tokens = self.projected_tokens(now);
        self.last_refill = now;
    }

    /// Take one token if at least one is available. Does not refill.
    pub fn try_take(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Balance the bucket would hold if refilled at `now`, without mutating it.
    pub fn projected_tokens(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let tokens_to_add = self.refill_rate * elapsed.as_secs_f64();

        (self.tokens + tokens_to_add).clamp(0.0, self.capacity as f64)
    }

    pub fn is_full_at(&self, now: Instant) -> bool {
        self.projected_tokens(now) >= self.capacity as f64
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn available_tokens(&self) -> u32 {
        self.tokens.floor() as u32
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }
}
