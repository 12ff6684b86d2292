use super::Direction;
use crate::config::Profile;

#[derive(Debug, Clone, Copy)]
pub struct SelectedProfile<'a> {
    pub profile: &'a Profile,
    pub direction: Direction,
}

/// Enabled profiles bound to `trigger` for `direction`, in configuration order.
///
/// Several profiles may share a trigger; all of them run, one after another,
/// so later profiles see the output of earlier ones.
pub fn select<'a>(
    profiles: &'a [Profile],
    trigger: &str,
    direction: Direction,
) -> Vec<SelectedProfile<'a>> {
    profiles
        .iter()
        .filter(|profile| profile.enabled)
        .filter(|profile| match direction {
            Direction::Forward => profile.trigger == trigger,
            Direction::Reverse => profile.reverse_trigger.as_deref() == Some(trigger),
        })
        .map(|profile| SelectedProfile { profile, direction })
        .collect()
}
