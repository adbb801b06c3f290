//! Route gate: decides whether code-block augmentation runs for the current
//! client-side location.
//!
//! The flag is a pure function of the location string and is recomputed
//! synchronously on every `pushState` and `popstate`, before the engine
//! reconciles any observer for that navigation.

use std::fmt;

/// What a navigation did to the suppression flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTransition {
    EnteredSuppressed,
    LeftSuppressed,
    StayedSuppressed,
    StayedAllowed,
}

impl RouteTransition {
    fn between(was: bool, now: bool) -> Self {
        match (was, now) {
            (false, true) => RouteTransition::EnteredSuppressed,
            (true, false) => RouteTransition::LeftSuppressed,
            (true, true) => RouteTransition::StayedSuppressed,
            (false, false) => RouteTransition::StayedAllowed,
        }
    }

    /// `true` when the destination route allows augmentation.
    pub fn lands_allowed(&self) -> bool {
        matches!(
            self,
            RouteTransition::LeftSuppressed | RouteTransition::StayedAllowed
        )
    }
}

impl fmt::Display for RouteTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RouteTransition::EnteredSuppressed => "entered_suppressed",
            RouteTransition::LeftSuppressed => "left_suppressed",
            RouteTransition::StayedSuppressed => "stayed_suppressed",
            RouteTransition::StayedAllowed => "stayed_allowed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct RouteGate {
    fragment: String,
    suppressed: bool,
}

impl RouteGate {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            suppressed: false,
        }
    }

    /// Pure check of `location` against the suppressed fragment.
    pub fn evaluate(&self, location: &str) -> bool {
        location.contains(&self.fragment)
    }

    /// Recompute the flag for `location` and report the transition.
    pub fn navigate(&mut self, location: &str) -> RouteTransition {
        let was = self.suppressed;
        self.suppressed = self.evaluate(location);
        RouteTransition::between(was, self.suppressed)
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://chat.example.com/", false)]
    #[case("https://chat.example.com/c/123", false)]
    #[case("https://chat.example.com/workspace/functions", true)]
    #[case("https://chat.example.com/workspace/functions/edit?id=x", true)]
    #[case("/admin/functions", true)]
    #[case("/function", false)]
    fn evaluate_matches_fragment(#[case] location: &str, #[case] suppressed: bool) {
        let gate = RouteGate::new("/functions");
        assert_eq!(gate.evaluate(location), suppressed);
    }

    #[rstest]
    #[case(false, true, RouteTransition::EnteredSuppressed)]
    #[case(true, false, RouteTransition::LeftSuppressed)]
    #[case(true, true, RouteTransition::StayedSuppressed)]
    #[case(false, false, RouteTransition::StayedAllowed)]
    fn transition_table(#[case] was: bool, #[case] now: bool, #[case] expected: RouteTransition) {
        assert_eq!(RouteTransition::between(was, now), expected);
    }

    #[test]
    fn navigate_updates_flag_synchronously() {
        let mut gate = RouteGate::new("/functions");
        assert!(!gate.is_suppressed());
        assert_eq!(gate.navigate("/workspace/functions"), RouteTransition::EnteredSuppressed);
        assert!(gate.is_suppressed());
        assert_eq!(gate.navigate("/workspace/functions/x"), RouteTransition::StayedSuppressed);
        assert_eq!(gate.navigate("/c/1"), RouteTransition::LeftSuppressed);
        assert!(!gate.is_suppressed());
    }

    #[test]
    fn lands_allowed_only_for_allowed_destinations() {
        assert!(RouteTransition::LeftSuppressed.lands_allowed());
        assert!(RouteTransition::StayedAllowed.lands_allowed());
        assert!(!RouteTransition::EnteredSuppressed.lands_allowed());
        assert!(!RouteTransition::StayedSuppressed.lands_allowed());
        assert_eq!(RouteTransition::LeftSuppressed.to_string(), "left_suppressed");
    }
}
