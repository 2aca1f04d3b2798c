use std::time::Duration;
use std::time::Instant;

/// Tracks how long the agent has been working.
///
/// Each turn gets a fresh start instant; when the turn finishes its elapsed
/// time is folded into a session total that only ever grows.
#[derive(Debug, Default)]
pub struct ThinkingTimer {
    turn_start: Option<Instant>,
    last_turn: Duration,
    session_total: Duration,
}

impl ThinkingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_turn(&mut self) {
        self.start_turn_at(Instant::now());
    }

    pub fn finish_turn(&mut self) {
        self.finish_turn_at(Instant::now());
    }

    /// Elapsed time of the running turn, or of the last finished one.
    pub fn turn_elapsed(&self) -> Duration {
        self.turn_elapsed_at(Instant::now())
    }

    /// Total of all finished turns plus the running one, if any.
    pub fn session_elapsed(&self) -> Duration {
        self.session_elapsed_at(Instant::now())
    }

    fn start_turn_at(&mut self, now: Instant) {
        // A turn that never finished still counts towards the total.
        if self.turn_start.is_some() {
            self.finish_turn_at(now);
        }
        self.turn_start = Some(now);
        self.last_turn = Duration::ZERO;
    }

    fn finish_turn_at(&mut self, now: Instant) {
        if let Some(start) = self.turn_start.take() {
            self.last_turn = now.saturating_duration_since(start);
            self.session_total += self.last_turn;
        }
    }

    fn turn_elapsed_at(&self, now: Instant) -> Duration {
        match self.turn_start {
            Some(start) => now.saturating_duration_since(start),
            None => self.last_turn,
        }
    }

    fn session_elapsed_at(&self, now: Instant) -> Duration {
        match self.turn_start {
            Some(start) => self.session_total + now.saturating_duration_since(start),
            None => self.session_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn turn_time_resets_while_session_time_accumulates() {
        let t0 = Instant::now();
        let mut timer = ThinkingTimer::new();

        timer.start_turn_at(t0);
        timer.finish_turn_at(t0 + Duration::from_secs(3));
        assert_eq!(timer.turn_elapsed_at(t0 + Duration::from_secs(10)), Duration::from_secs(3));
        assert_eq!(timer.session_elapsed_at(t0 + Duration::from_secs(10)), Duration::from_secs(3));

        let t1 = t0 + Duration::from_secs(20);
        timer.start_turn_at(t1);
        assert_eq!(timer.turn_elapsed_at(t1 + Duration::from_secs(2)), Duration::from_secs(2));
        assert_eq!(timer.session_elapsed_at(t1 + Duration::from_secs(2)), Duration::from_secs(5));

        timer.finish_turn_at(t1 + Duration::from_secs(4));
        assert_eq!(timer.turn_elapsed_at(t1 + Duration::from_secs(60)), Duration::from_secs(4));
        assert_eq!(timer.session_elapsed_at(t1 + Duration::from_secs(60)), Duration::from_secs(7));
    }

    #[test]
    fn restarting_without_finishing_keeps_the_total_monotonic() {
        let t0 = Instant::now();
        let mut timer = ThinkingTimer::new();
        timer.start_turn_at(t0);
        timer.start_turn_at(t0 + Duration::from_secs(5));
        assert_eq!(timer.session_elapsed_at(t0 + Duration::from_secs(5)), Duration::from_secs(5));
        assert_eq!(timer.turn_elapsed_at(t0 + Duration::from_secs(6)), Duration::from_secs(1));
    }
}
