//! Common utilities shared across programs

use std::time::{Duration, Instant};

/// Tracks elapsed time since creation
pub struct TimeKeeper {
    start: Instant,
}

impl TimeKeeper {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// True once `limit` has passed; never for `None`
    pub fn has_elapsed(&self, limit: Option<Duration>) -> bool {
        limit.is_some_and(|limit| self.start.elapsed() >= limit)
    }
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

/// Centered horizontal bar for a signed value on a ±`max_value` scale
///
/// # Example
/// ```
/// use vibe_telemetry::create_bar;
///
/// // +1.5 on a ±2 scale, 40 characters plus the center marker
/// let bar = create_bar(1.5, 2.0, 40);
/// assert_eq!(bar.chars().count(), 41);
/// ```
pub fn create_bar(value: f64, max_value: f64, width: usize) -> String {
    let normalized = if max_value > 0.0 {
        (value / max_value).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let half = width / 2;
    let filled = ((normalized.abs() * half as f64) as usize).min(half);

    let (left, right) = if normalized < 0.0 {
        (
            format!("{}{}", " ".repeat(half - filled), "█".repeat(filled)),
            " ".repeat(half),
        )
    } else {
        (
            " ".repeat(half),
            format!("{}{}", "█".repeat(filled), " ".repeat(half - filled)),
        )
    };
    format!("{}|{}", left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_bar_zero() {
        let bar = create_bar(0.0, 2.0, 40);
        assert_eq!(bar.chars().count(), 41);
        assert!(!bar.contains('█'));
    }

    #[test]
    fn test_create_bar_sides() {
        let positive = create_bar(1.0, 2.0, 40);
        let negative = create_bar(-1.0, 2.0, 40);
        assert_eq!(positive.chars().count(), 41);
        assert_eq!(negative.chars().count(), 41);
        assert!(positive.split('|').nth(1).unwrap().contains('█'));
        assert!(negative.split('|').next().unwrap().contains('█'));
    }

    #[test]
    fn test_create_bar_clamps() {
        let bar = create_bar(10.0, 2.0, 10);
        assert_eq!(bar, "     |█████");
        assert_eq!(create_bar(1.0, 0.0, 4), "  |  ");
    }

    #[test]
    fn test_timekeeper() {
        let keeper = TimeKeeper::new();
        std::thread::sleep(Duration::from_millis(10));
        assert!(keeper.elapsed_secs() >= 0.01);
        assert!(keeper.has_elapsed(Some(Duration::from_millis(5))));
        assert!(!keeper.has_elapsed(None));
    }
}
