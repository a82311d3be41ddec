//! Pinch-to-click detection.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use nalgebra::Point2;

/// Returns the Euclidean distance between two pixel positions.
pub fn distance(a: Point2<i32>, b: Point2<i32>) -> f32 {
    nalgebra::distance(&a.cast::<f32>(), &b.cast::<f32>())
}

/// Decides how often a held pinch clicks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClickPolicy {
    /// Click once when the fingertips come together. The pinch has to be released before the next
    /// click.
    #[default]
    OncePerPinch,
    /// Click on every frame the pinch is held.
    EveryFrame,
    /// Click on every frame the pinch is held, but at most once per interval.
    Cooldown(Duration),
}

impl FromStr for ClickPolicy {
    type Err = anyhow::Error;

    /// Parses `once`, `every-frame`, or `cooldown:<milliseconds>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(Self::OncePerPinch),
            "every-frame" => Ok(Self::EveryFrame),
            _ => match s.strip_prefix("cooldown:") {
                Some(ms) => {
                    let ms: u64 = ms
                        .trim()
                        .parse()
                        .map_err(|e| anyhow::anyhow!("invalid cooldown '{}': {}", ms, e))?;
                    Ok(Self::Cooldown(Duration::from_millis(ms)))
                }
                None => anyhow::bail!(
                    "unknown click policy '{}' (expected 'once', 'every-frame' or 'cooldown:<ms>')",
                    s
                ),
            },
        }
    }
}

impl fmt::Display for ClickPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OncePerPinch => f.write_str("once"),
            Self::EveryFrame => f.write_str("every-frame"),
            Self::Cooldown(d) => write!(f, "cooldown:{}", d.as_millis()),
        }
    }
}

/// Turns a stream of pinched/released observations into clicks, according to a [`ClickPolicy`].
#[derive(Debug, Clone)]
pub struct ClickTrigger {
    policy: ClickPolicy,
    threshold: f32,
    engaged: bool,
    last_click: Option<Instant>,
}

impl ClickTrigger {
    pub const DEFAULT_THRESHOLD: f32 = 45.0;

    /// Creates a trigger that considers fingertips closer than `threshold` pixels as pinched.
    pub fn new(policy: ClickPolicy, threshold: f32) -> Self {
        Self {
            policy,
            threshold,
            engaged: false,
            last_click: None,
        }
    }

    pub fn policy(&self) -> ClickPolicy {
        self.policy
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Returns whether `distance` counts as a pinch.
    pub fn is_pinched(&self, distance: f32) -> bool {
        distance < self.threshold
    }

    /// Feeds the current pinch state, returning whether a click should be performed now.
    pub fn update(&mut self, pinched: bool, now: Instant) -> bool {
        let was_engaged = std::mem::replace(&mut self.engaged, pinched);
        if !pinched {
            return false;
        }

        let fire = match self.policy {
            ClickPolicy::OncePerPinch => !was_engaged,
            ClickPolicy::EveryFrame => true,
            ClickPolicy::Cooldown(cooldown) => match self.last_click {
                Some(last) => now.saturating_duration_since(last) >= cooldown,
                None => true,
            },
        };
        if fire {
            self.last_click = Some(now);
        }
        fire
    }

    /// Releases the pinch, for example because the hand left the frame or changed pose.
    pub fn release(&mut self) {
        self.engaged = false;
    }
}

impl Default for ClickTrigger {
    fn default() -> Self {
        Self::new(ClickPolicy::default(), Self::DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_threshold() {
        let trigger = ClickTrigger::default();

        let d = distance(Point2::new(100, 100), Point2::new(130, 100));
        assert_eq!(d, 30.0);
        assert!(trigger.is_pinched(d));

        let d = distance(Point2::new(100, 100), Point2::new(200, 100));
        assert_eq!(d, 100.0);
        assert!(!trigger.is_pinched(d));

        assert_eq!(distance(Point2::new(0, 0), Point2::new(3, 4)), 5.0);
        assert!(!trigger.is_pinched(45.0));
    }

    #[test]
    fn once_per_pinch() {
        let mut trigger = ClickTrigger::default();
        let t = Instant::now();
        assert!(trigger.update(true, t));
        assert!(!trigger.update(true, t));
        assert!(!trigger.update(true, t));
        assert!(!trigger.update(false, t));
        assert!(trigger.update(true, t));

        trigger.release();
        assert!(trigger.update(true, t));
    }

    #[test]
    fn every_frame() {
        let mut trigger = ClickTrigger::new(ClickPolicy::EveryFrame, 45.0);
        let t = Instant::now();
        assert!(trigger.update(true, t));
        assert!(trigger.update(true, t));
        assert!(!trigger.update(false, t));
        assert!(trigger.update(true, t));
    }

    #[test]
    fn cooldown() {
        let cooldown = Duration::from_millis(300);
        let mut trigger = ClickTrigger::new(ClickPolicy::Cooldown(cooldown), 45.0);
        let t = Instant::now();
        assert!(trigger.update(true, t));
        assert!(!trigger.update(true, t + Duration::from_millis(100)));
        assert!(!trigger.update(false, t + Duration::from_millis(200)));
        assert!(!trigger.update(true, t + Duration::from_millis(250)));
        assert!(trigger.update(true, t + Duration::from_millis(300)));
        assert!(!trigger.update(true, t + Duration::from_millis(400)));
    }

    #[test]
    fn parse_policy() {
        assert_eq!("once".parse::<ClickPolicy>().unwrap(), ClickPolicy::OncePerPinch);
        assert_eq!(
            "every-frame".parse::<ClickPolicy>().unwrap(),
            ClickPolicy::EveryFrame
        );
        assert_eq!(
            "cooldown:250".parse::<ClickPolicy>().unwrap(),
            ClickPolicy::Cooldown(Duration::from_millis(250))
        );
        assert!("cooldown:soon".parse::<ClickPolicy>().is_err());
        assert!("twice".parse::<ClickPolicy>().is_err());

        let policy = ClickPolicy::Cooldown(Duration::from_millis(80));
        assert_eq!(policy.to_string().parse::<ClickPolicy>().unwrap(), policy);
    }
}
