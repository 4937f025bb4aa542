//! Zone classification from the agent's position

use crate::config::ZoneSpec;
use crate::physics::Vec3;

/// Maps agent positions to course zones
#[derive(Debug, Clone)]
pub struct ZoneClassifier {
    zones: Vec<ZoneSpec>,
    agent_half_extent: f32,
}

impl ZoneClassifier {
    /// Create a classifier for zones ordered from lowest to highest
    #[must_use]
    pub fn new(zones: Vec<ZoneSpec>, agent_half_extent: f32) -> Self {
        Self {
            zones,
            agent_half_extent,
        }
    }

    /// Number of zones
    #[must_use]
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Zone by index
    #[must_use]
    pub fn zone(&self, index: usize) -> Option<&ZoneSpec> {
        self.zones.get(index)
    }

    /// Height of the bottom face of the agent
    #[must_use]
    pub fn feet_height(&self, position: &Vec3) -> f32 {
        position.y - self.agent_half_extent
    }

    /// Zone occupied at `position`, `None` when off-track
    ///
    /// Zones are checked from the highest down so that overlapping tolerance
    /// bands resolve to the higher stage.
    #[must_use]
    pub fn classify(&self, position: &Vec3) -> Option<usize> {
        let feet = self.feet_height(position);
        self.zones
            .iter()
            .enumerate()
            .rev()
            .find(|(_, zone)| Self::contains(zone, feet, position))
            .map(|(index, _)| index)
    }

    fn contains(zone: &ZoneSpec, feet: f32, position: &Vec3) -> bool {
        let tol = zone.tolerance;
        (feet - zone.floor_height).abs() <= tol
            && position.z >= zone.depth_min - tol
            && position.z <= zone.depth_max + tol
            && position.x.abs() <= zone.half_width + tol
    }

    /// Zone the agent should head for next
    ///
    /// One above the current zone when on track, otherwise one above the
    /// highest zone reached, saturating at the last zone.
    #[must_use]
    pub fn next_zone(&self, current: Option<usize>, highest: Option<usize>) -> Option<&ZoneSpec> {
        let last = self.zones.len().checked_sub(1)?;
        let next = match current.or(highest) {
            Some(index) => (index + 1).min(last),
            None => 0,
        };
        self.zones.get(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CourseConfig;

    fn classifier() -> ZoneClassifier {
        let config = CourseConfig::default();
        ZoneClassifier::new(config.zones, config.agent_half_extent)
    }

    #[test]
    fn test_start_pose_is_off_track() {
        let zones = classifier();
        assert_eq!(zones.classify(&Vec3::new(0.0, 0.5, 0.0)), None);
    }

    #[test]
    fn test_standing_on_a_platform_within_tolerance() {
        let zones = classifier();
        // Feet at 1.0 on the first step
        assert_eq!(zones.classify(&Vec3::new(0.0, 1.5, 9.0)), Some(0));
        // Settling jitter inside the tolerance still counts
        assert_eq!(zones.classify(&Vec3::new(0.0, 1.7, 9.0)), Some(0));
        // Airborne above the step does not
        assert_eq!(zones.classify(&Vec3::new(0.0, 2.0, 9.0)), None);
        // Outside the lateral band
        assert_eq!(zones.classify(&Vec3::new(6.0, 1.5, 9.0)), None);
    }

    #[test]
    fn test_highest_zone_wins_on_shared_edges() {
        let mut config = CourseConfig::default();
        config.zones[1].floor_height = config.zones[0].floor_height;
        let zones = ZoneClassifier::new(config.zones, config.agent_half_extent);
        assert_eq!(zones.classify(&Vec3::new(0.0, 1.5, 12.0)), Some(1));
    }

    #[test]
    fn test_next_zone_targets() {
        let zones = classifier();
        assert_eq!(zones.next_zone(None, None).unwrap().name, "step-1");
        assert_eq!(zones.next_zone(Some(0), Some(0)).unwrap().name, "step-2");
        assert_eq!(zones.next_zone(None, Some(1)).unwrap().name, "step-3");
        assert_eq!(zones.next_zone(Some(3), Some(3)).unwrap().name, "summit");
    }
}
