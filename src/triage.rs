//! Triage escalation tracking
//!
//! Each assistant turn carries a classification. The current urgency level
//! is replaced by every classification, so milder later turns lower it.
//! Emergency and crisis banners latch until the user dismisses them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Ordered urgency classification, mildest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageLevel {
    SelfCare,
    Routine,
    DoctorSoon,
    Urgent,
    Emergency,
}

impl TriageLevel {
    /// Wire name of the level
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SelfCare => "self_care",
            Self::Routine => "routine",
            Self::DoctorSoon => "doctor_soon",
            Self::Urgent => "urgent",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for TriageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriageLevel {
    type Err = Error;

    /// Lenient parse: case-insensitive, `-` and spaces read as `_`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "self_care" | "selfcare" | "low" => Ok(Self::SelfCare),
            "routine" => Ok(Self::Routine),
            "doctor_soon" | "see_doctor" | "moderate" => Ok(Self::DoctorSoon),
            "urgent" | "high" => Ok(Self::Urgent),
            "emergency" | "critical" => Ok(Self::Emergency),
            _ => Err(Error::Config(format!("unknown triage level: {s}"))),
        }
    }
}

/// Severity attached to a mental-health assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrisisSeverity {
    None,
    Low,
    Moderate,
    High,
    Critical,
}

impl CrisisSeverity {
    /// Lenient parse, unknown values read as `None`
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" | "mild" => Self::Low,
            "moderate" | "medium" => Self::Moderate,
            "high" | "severe" => Self::High,
            "critical" => Self::Critical,
            _ => Self::None,
        }
    }
}

/// Classification payload of one turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Urgency level, `None` when the backend sent none or an unknown value
    pub level: Option<TriageLevel>,
    pub crisis_detected: bool,
    pub crisis_severity: CrisisSeverity,
    /// Red-flag findings that justified the level
    #[serde(default)]
    pub red_flags: Vec<String>,
}

/// Banner the view layer should display, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Banner {
    /// Acute mental-health risk, sticky
    Crisis,
    /// Medical emergency, sticky
    Emergency,
    /// Mental-health support resources, dismissible and non-sticky
    SupportPanel,
}

/// Urgency state derived from the conversation so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageTracker {
    current_level: Option<TriageLevel>,
    emergency_banner: bool,
    crisis_banner: bool,
    support_panel: bool,
    #[serde(default)]
    red_flags: Vec<String>,
}

impl TriageTracker {
    /// Create a tracker with no classification yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one turn's classification into the tracker
    pub fn observe(&mut self, classification: &Classification) {
        let previous = self.current_level;

        if let Some(level) = classification.level {
            self.current_level = Some(level);
            self.red_flags.clone_from(&classification.red_flags);
            if level == TriageLevel::Emergency {
                self.emergency_banner = true;
            }
        } else {
            tracing::debug!("classification without level, keeping current level");
        }

        if classification.crisis_detected {
            self.crisis_banner = true;
            self.support_panel = false;
        } else {
            self.support_panel = matches!(
                classification.crisis_severity,
                CrisisSeverity::Moderate | CrisisSeverity::High
            );
        }

        if previous != self.current_level || classification.crisis_detected {
            tracing::info!(
                from = ?previous,
                to = ?self.current_level,
                crisis = classification.crisis_detected,
                "triage level updated"
            );
        }
    }

    /// Current urgency level
    #[must_use]
    pub const fn current_level(&self) -> Option<TriageLevel> {
        self.current_level
    }

    /// Red flags reported with the current level
    #[must_use]
    pub fn red_flags(&self) -> &[String] {
        &self.red_flags
    }

    /// Whether the sticky emergency banner is showing
    #[must_use]
    pub const fn emergency_banner(&self) -> bool {
        self.emergency_banner
    }

    /// Whether the sticky crisis banner is showing
    #[must_use]
    pub const fn crisis_active(&self) -> bool {
        self.crisis_banner
    }

    /// Whether the support panel is showing
    #[must_use]
    pub const fn support_panel(&self) -> bool {
        self.support_panel
    }

    /// Hide the emergency banner; the current level is untouched
    pub fn dismiss_emergency(&mut self) {
        self.emergency_banner = false;
    }

    /// Hide the crisis banner
    pub fn dismiss_crisis(&mut self) {
        self.crisis_banner = false;
    }

    /// Hide the support panel
    pub fn dismiss_support_panel(&mut self) {
        self.support_panel = false;
    }

    /// Dismiss the banner on top of the display order, returning it
    pub fn dismiss_top(&mut self) -> Option<Banner> {
        let top = self.banners().first().copied()?;
        match top {
            Banner::Crisis => self.dismiss_crisis(),
            Banner::Emergency => self.dismiss_emergency(),
            Banner::SupportPanel => self.dismiss_support_panel(),
        }
        Some(top)
    }

    /// Visible banners, crisis first
    #[must_use]
    pub fn banners(&self) -> Vec<Banner> {
        let mut banners = Vec::with_capacity(3);
        if self.crisis_banner {
            banners.push(Banner::Crisis);
        }
        if self.emergency_banner {
            banners.push(Banner::Emergency);
        }
        if self.support_panel {
            banners.push(Banner::SupportPanel);
        }
        banners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(level: TriageLevel) -> Classification {
        Classification {
            level: Some(level),
            crisis_detected: false,
            crisis_severity: CrisisSeverity::None,
            red_flags: vec![],
        }
    }

    #[test]
    fn levels_are_ordered() {
        assert!(TriageLevel::SelfCare < TriageLevel::Routine);
        assert!(TriageLevel::Routine < TriageLevel::DoctorSoon);
        assert!(TriageLevel::DoctorSoon < TriageLevel::Urgent);
        assert!(TriageLevel::Urgent < TriageLevel::Emergency);
    }

    #[test]
    fn self_care_raises_nothing() {
        let mut tracker = TriageTracker::new();
        tracker.observe(&level(TriageLevel::SelfCare));
        assert_eq!(tracker.current_level(), Some(TriageLevel::SelfCare));
        assert!(tracker.banners().is_empty());
    }

    #[test]
    fn level_is_replaced_not_maxed() {
        let mut tracker = TriageTracker::new();
        tracker.observe(&level(TriageLevel::Urgent));
        tracker.observe(&level(TriageLevel::Routine));
        assert_eq!(tracker.current_level(), Some(TriageLevel::Routine));
    }

    #[test]
    fn emergency_banner_latches_until_dismissed() {
        let mut tracker = TriageTracker::new();
        tracker.observe(&level(TriageLevel::Emergency));
        tracker.observe(&level(TriageLevel::SelfCare));
        assert!(tracker.emergency_banner());
        assert_eq!(tracker.current_level(), Some(TriageLevel::SelfCare));

        tracker.dismiss_emergency();
        assert!(!tracker.emergency_banner());
        assert_eq!(tracker.current_level(), Some(TriageLevel::SelfCare));
    }

    #[test]
    fn crisis_precedes_emergency() {
        let mut tracker = TriageTracker::new();
        tracker.observe(&Classification {
            level: Some(TriageLevel::Emergency),
            crisis_detected: true,
            crisis_severity: CrisisSeverity::Critical,
            red_flags: vec!["suicidal ideation".to_string()],
        });
        assert_eq!(tracker.banners(), vec![Banner::Crisis, Banner::Emergency]);
        assert!(tracker.crisis_active());

        assert_eq!(tracker.dismiss_top(), Some(Banner::Crisis));
        assert_eq!(tracker.banners(), vec![Banner::Emergency]);
    }

    #[test]
    fn support_panel_is_not_sticky() {
        let mut tracker = TriageTracker::new();
        tracker.observe(&Classification {
            level: Some(TriageLevel::Routine),
            crisis_detected: false,
            crisis_severity: CrisisSeverity::Moderate,
            red_flags: vec![],
        });
        assert_eq!(tracker.banners(), vec![Banner::SupportPanel]);

        tracker.observe(&level(TriageLevel::Routine));
        assert!(tracker.banners().is_empty());
    }

    #[test]
    fn missing_level_keeps_current() {
        let mut tracker = TriageTracker::new();
        tracker.observe(&level(TriageLevel::Urgent));
        tracker.observe(&Classification {
            level: None,
            crisis_detected: false,
            crisis_severity: CrisisSeverity::None,
            red_flags: vec![],
        });
        assert_eq!(tracker.current_level(), Some(TriageLevel::Urgent));
    }

    #[test]
    fn parses_lenient_level_names() {
        assert_eq!("Doctor-Soon".parse::<TriageLevel>().unwrap(), TriageLevel::DoctorSoon);
        assert_eq!("self care".parse::<TriageLevel>().unwrap(), TriageLevel::SelfCare);
        assert_eq!("EMERGENCY".parse::<TriageLevel>().unwrap(), TriageLevel::Emergency);
        assert!("whenever".parse::<TriageLevel>().is_err());
    }
}
